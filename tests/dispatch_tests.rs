use std::sync::{Arc, Mutex, Weak};

use actron_air::{
    Command, CommandSink, ErrorKind, FanMode, FanSeparator, Result, SetpointSide, StateRegistry,
    StatusSnapshot, ValidationError, project,
};
use async_trait::async_trait;
use serde_json::{Value, json};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl CommandSink for Recorder {
    async fn send_command(&self, serial: &str, command: &Command) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((serial.to_string(), command.to_json()["command"].clone()));
        Ok(())
    }
}

impl Recorder {
    fn last(&self) -> Value {
        self.sent.lock().unwrap().last().unwrap().1.clone()
    }
}

fn raw(mode: &str, fan: &str) -> Value {
    json!({
        "isOnline": true,
        "lastKnownState": {
            "UserAirconSettings": {
                "isOn": true,
                "Mode": mode,
                "FanMode": fan,
                "TemperatureSetpoint_Cool_oC": 24.0,
                "TemperatureSetpoint_Heat_oC": 20.0,
                "ZoneTemperatureSetpointVariance_oC": 2.0,
                "EnabledZones": [true, false, true]
            },
            "RemoteZoneInfo": [
                {"CanOperate": true, "NV_Title": "Living",
                 "TemperatureSetpoint_Cool_oC": 23.0, "TemperatureSetpoint_Heat_oC": 21.0},
                {"CanOperate": true, "NV_Title": "Bed"},
                {"CanOperate": false, "NV_Title": "Garage"}
            ],
            "NV_Limits": {"UserSetpoint_oC": {
                "setCool_Min": 18.0, "setCool_Max": 28.0,
                "setHeat_Min": 10.0, "setHeat_Max": 26.0
            }}
        }
    })
}

fn attached(mode: &str, fan: &str) -> (Arc<Recorder>, Arc<StatusSnapshot>) {
    let recorder = Arc::new(Recorder::default());
    let sink: Arc<dyn CommandSink> = recorder.clone();
    let mut registry = StateRegistry::new();
    registry.set_client(Arc::downgrade(&sink));
    let snapshot = registry.process_update("SYS-1", &raw(mode, fan));
    (recorder, snapshot)
}

#[tokio::test]
async fn commands_are_addressed_to_the_fetched_serial() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    snapshot.settings().unwrap().set_away_mode(true).await.unwrap();

    let sent = recorder.sent.lock().unwrap();
    assert_eq!(sent[0].0, "sys-1");
    assert_eq!(sent[0].1["UserAirconSettings.AwayMode"], true);
    assert_eq!(sent[0].1["type"], "set-settings");
}

#[tokio::test]
async fn cool_setpoint_above_limit_is_clamped() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    snapshot.settings().unwrap().set_temperature(30.0).await.unwrap();
    assert_eq!(
        recorder.last(),
        json!({"type": "set-settings", "UserAirconSettings.TemperatureSetpoint_Cool_oC": 28.0})
    );
}

#[tokio::test]
async fn auto_mode_moves_both_setpoints_together() {
    let (recorder, snapshot) = attached("AUTO", "AUTO");
    snapshot.settings().unwrap().set_temperature(25.0).await.unwrap();
    let cmd = recorder.last();
    assert_eq!(cmd["UserAirconSettings.TemperatureSetpoint_Cool_oC"], 25.0);
    assert_eq!(cmd["UserAirconSettings.TemperatureSetpoint_Heat_oC"], 21.0);
}

#[tokio::test]
async fn explicit_heat_setpoint_in_cool_mode_writes_heat_only() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    snapshot
        .settings()
        .unwrap()
        .set_setpoint(SetpointSide::Heat, 5.0)
        .await
        .unwrap();
    assert_eq!(
        recorder.last(),
        json!({"type": "set-settings", "UserAirconSettings.TemperatureSetpoint_Heat_oC": 10.0})
    );
}

#[tokio::test]
async fn off_keeps_the_stored_mode() {
    let (recorder, snapshot) = attached("HEAT", "AUTO");
    snapshot.settings().unwrap().set_system_mode("off").await.unwrap();
    assert_eq!(
        recorder.last(),
        json!({"type": "set-settings", "UserAirconSettings.isOn": false})
    );

    snapshot.settings().unwrap().set_system_mode(" heat ").await.unwrap();
    assert_eq!(recorder.last()["UserAirconSettings.Mode"], "HEAT");
    assert_eq!(recorder.last()["UserAirconSettings.isOn"], true);
}

#[tokio::test]
async fn invalid_mode_is_rejected_before_dispatch() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    let err = snapshot
        .settings()
        .unwrap()
        .set_system_mode("DRY")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(recorder.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn continuous_toggle_keeps_base_and_separator() {
    let (recorder, snapshot) = attached("COOL", "LOW-CONT");
    let settings = snapshot.settings().unwrap();

    settings.set_continuous_mode(false).await.unwrap();
    assert_eq!(recorder.last()["UserAirconSettings.FanMode"], "LOW");

    settings.set_continuous_mode(true).await.unwrap();
    assert_eq!(recorder.last()["UserAirconSettings.FanMode"], "LOW-CONT");

    settings.set_fan_mode("high").await.unwrap();
    assert_eq!(recorder.last()["UserAirconSettings.FanMode"], "HIGH+CONT");
}

#[test]
fn continuous_toggle_twice_restores_the_original_string() {
    for raw in ["LOW", "MED+CONT", "HIGH-CONT", "AUTO", "AUTO+CONT"] {
        let fan = FanMode::parse(raw);
        let toggled = fan.with_continuous(!fan.continuous);
        assert_ne!(toggled.to_string(), raw);
        assert_eq!(toggled.with_continuous(fan.continuous).to_string(), raw);
    }
    assert_eq!(FanMode::parse("HIGH-CONT").separator, FanSeparator::Dash);
}

#[tokio::test]
async fn zone_enable_then_disable_restores_the_array() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    let zone = snapshot.zone(1).unwrap();
    assert!(!zone.is_active());

    zone.enable(true).await.unwrap();
    assert_eq!(
        recorder.last()["UserAirconSettings.EnabledZones"],
        json!([true, true, true])
    );
    zone.enable(false).await.unwrap();
    assert_eq!(
        recorder.last()["UserAirconSettings.EnabledZones"],
        json!([true, false, true])
    );
}

#[tokio::test]
async fn zone_setpoint_is_clamped_to_the_zone_window() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    let zone = snapshot.zone(0).unwrap();
    // system cool target 24 with variance 2
    assert_eq!(zone.min_temp(), 22.0);
    assert_eq!(zone.max_temp(), 26.0);

    zone.set_temperature(30.0).await.unwrap();
    assert_eq!(
        recorder.last(),
        json!({"type": "set-settings", "RemoteZoneInfo[0].TemperatureSetpoint_Cool_oC": 26.0})
    );
}

#[tokio::test]
async fn auto_zone_without_own_setpoints_keeps_the_system_gap() {
    let (recorder, snapshot) = attached("AUTO", "AUTO");
    let bed = snapshot.zone(1).unwrap();
    assert_eq!(bed.cool_setpoint, None);

    bed.set_temperature(25.0).await.unwrap();
    assert_eq!(
        recorder.last(),
        json!({
            "type": "set-settings",
            "RemoteZoneInfo[1].TemperatureSetpoint_Cool_oC": 25.0,
            "RemoteZoneInfo[1].TemperatureSetpoint_Heat_oC": 21.0
        })
    );
}

#[test]
fn enabled_zone_that_cannot_operate_reports_off() {
    let (_recorder, snapshot) = attached("COOL", "AUTO");
    let garage = snapshot.zone(2).unwrap();
    assert!(!garage.can_operate);
    assert!(snapshot.settings().unwrap().enabled_zones[2]);
    assert!(!garage.is_active());
    assert_eq!(garage.hvac_mode(), actron_air::SystemMode::Off);
}

#[tokio::test]
async fn dropped_client_is_a_validation_error() {
    let (recorder, snapshot) = attached("COOL", "AUTO");
    drop(recorder);
    let err = snapshot
        .settings()
        .unwrap()
        .set_power(true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        actron_air::Error::Validation(ValidationError::NoClient)
    ));
}

#[tokio::test]
async fn snapshot_without_a_client_cannot_dispatch() {
    let snapshot = project(&raw("COOL", "AUTO"), "sys-1");
    assert!(!snapshot.has_client());
    let err = snapshot
        .zone(0)
        .unwrap()
        .enable(false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn rewiring_the_registry_updates_stored_snapshots() {
    let mut registry = StateRegistry::new();
    let before = registry.process_update("sys-1", &raw("COOL", "AUTO"));
    assert!(!before.has_client());

    let recorder = Arc::new(Recorder::default());
    let sink: Arc<dyn CommandSink> = recorder.clone();
    let weak: Weak<dyn CommandSink> = Arc::downgrade(&sink);
    registry.set_client(weak);
    assert!(registry.get("SYS-1").unwrap().has_client());
}
