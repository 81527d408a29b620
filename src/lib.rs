mod auth;
mod client;
mod diff;
mod error;
mod logger;
mod protocol;
mod state;
mod status;
mod types;
mod zone;

pub use auth::DEFAULT_CLIENT_ID;
pub use client::{ActronClient, ActronClientBuilder, CommandSink};
pub use error::{Error, ErrorKind, Result, ValidationError};
pub use logger::{MessageLogMode, MessageLogger};
pub use protocol::{
    COMMAND_TYPE, Command, SetpointSide, SetpointTarget, Setpoints, away_mode_command,
    fan_mode_command, plan_setpoints, power_command, quiet_mode_command, setpoint_command,
    system_mode_command, turbo_mode_command, zone_enable_command,
};
pub use state::{ObserverError, StateRegistry, StatusObserver};
pub use status::{
    Alerts, DEFAULT_MAX_SETPOINT, DEFAULT_MIN_SETPOINT, LiveAircon, MasterInfo, OutdoorUnit,
    SetpointLimits, SettingsRef, StatusSnapshot, SystemIdentity, SystemRef, UserSettings, ZoneRef,
    project,
};
pub use types::*;
pub use zone::{DEFAULT_ZONE_VARIANCE, DETACHED_ZONE_MAX, DETACHED_ZONE_MIN, Peripheral, Zone};
