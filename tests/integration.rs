use std::sync::{Arc, Mutex};

use actron_air::ActronClient;

/// Run with: cargo test --test integration -- --ignored
/// Requires a real account:
///   ACTRON_REFRESH_TOKEN=<token from the device-code flow>
#[tokio::test]
#[ignore]
async fn list_systems_and_fetch_status() {
    let refresh_token =
        std::env::var("ACTRON_REFRESH_TOKEN").expect("ACTRON_REFRESH_TOKEN must be set");
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let updates: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
    let updates_clone = updates.clone();

    let client = ActronClient::builder()
        .refresh_token(refresh_token)
        .on_status(move |serial, _| {
            updates_clone.lock().unwrap().push(serial.to_string());
            Ok(())
        })
        .build()
        .unwrap();

    let systems = client.get_ac_systems().await.expect("listing failed");
    assert!(!systems.is_empty(), "account has no systems");
    println!("platform: {:?} ({})", client.platform(), client.base_url());

    for system in &systems {
        let status = client
            .get_ac_status(&system.serial)
            .await
            .unwrap_or_else(|e| panic!("status for {} failed: {e}", system.serial));
        println!(
            "{}: online={} on={} inside={:?} zones={}",
            status.serial_number,
            status.is_online,
            status.system_on(),
            status.inside_temperature(),
            status.zones.len()
        );
        for zone in status.zones() {
            println!(
                "  {:?} active={} mode={} range={}..{}",
                zone.title,
                zone.is_active(),
                zone.hvac_mode(),
                zone.min_temp(),
                zone.max_temp()
            );
        }
    }

    assert_eq!(updates.lock().unwrap().len(), systems.len());
    client.close().await;
}
