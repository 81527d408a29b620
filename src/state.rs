use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::CommandSink;
use crate::status::{StatusSnapshot, project};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;
pub type StatusObserver =
    Box<dyn Fn(&str, &Value) -> std::result::Result<(), ObserverError> + Send + Sync>;

/// Latest snapshot per system, keyed by lowercase serial.
#[derive(Default)]
pub struct StateRegistry {
    statuses: HashMap<String, Arc<StatusSnapshot>>,
    latest_event_id: HashMap<String, String>,
    observers: Vec<StatusObserver>,
    client: Option<Weak<dyn CommandSink>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the command handle to every stored snapshot and all later ones.
    pub fn set_client(&mut self, client: Weak<dyn CommandSink>) {
        for snapshot in self.statuses.values_mut() {
            *snapshot = Arc::new((**snapshot).clone().with_client(client.clone()));
        }
        self.client = Some(client);
    }

    pub fn add_observer(
        &mut self,
        observer: impl Fn(&str, &Value) -> std::result::Result<(), ObserverError>
        + Send
        + Sync
        + 'static,
    ) {
        self.observers.push(Box::new(observer));
    }

    /// Replace the stored snapshot for `serial` and notify observers.
    /// Observer failures are logged and never reach the caller.
    pub fn process_update(&mut self, serial: &str, raw: &Value) -> Arc<StatusSnapshot> {
        let key = serial.to_lowercase();
        let mut snapshot = project(raw, &key);
        if let Some(client) = &self.client {
            snapshot = snapshot.with_client(client.clone());
        }
        let snapshot = Arc::new(snapshot);
        self.statuses.insert(key.clone(), Arc::clone(&snapshot));
        debug!(serial = %key, observers = self.observers.len(), "stored status update");

        for (i, observer) in self.observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer(&key, raw))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(observer = i, serial = %key, error = %e, "status observer failed"),
                Err(_) => warn!(observer = i, serial = %key, "status observer panicked"),
            }
        }
        snapshot
    }

    pub fn get(&self, serial: &str) -> Option<Arc<StatusSnapshot>> {
        self.statuses.get(&serial.to_lowercase()).cloned()
    }

    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.statuses.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn latest_event_id(&self, serial: &str) -> Option<&str> {
        self.latest_event_id
            .get(&serial.to_lowercase())
            .map(String::as_str)
    }

    pub fn set_latest_event_id(&mut self, serial: &str, event_id: impl Into<String>) {
        self.latest_event_id
            .insert(serial.to_lowercase(), event_id.into());
    }
}
