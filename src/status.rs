use std::ops::Deref;
use std::sync::Weak;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::client::CommandSink;
use crate::error::{Result, ValidationError};
use crate::protocol::{
    Command, SetpointSide, SetpointTarget, Setpoints, away_mode_command, fan_mode_command,
    plan_setpoints, power_command, quiet_mode_command, setpoint_command, system_mode_command,
    turbo_mode_command,
};
use crate::types::{FanMode, SystemMode, TemperatureRange, TurboMode};
use crate::zone::{Peripheral, Zone};

pub const DEFAULT_MIN_SETPOINT: f64 = 16.0;
pub const DEFAULT_MAX_SETPOINT: f64 = 32.0;

pub(crate) fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(number(&v))
}

/// Null or a value of the wrong shape becomes `T::default()`.
pub(crate) fn lenient<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let v = Value::deserialize(d)?;
    Ok(T::deserialize(v).unwrap_or_default())
}

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutdoorUnit {
    #[serde(rename = "ModelNumber", default, deserialize_with = "lenient_string")]
    pub model: Option<String>,
    #[serde(rename = "SerialNumber", default, deserialize_with = "lenient_string")]
    pub serial: Option<String>,
    #[serde(rename = "SoftwareVersion", default, deserialize_with = "lenient_string")]
    pub software_version: Option<String>,
    #[serde(rename = "Family", default, deserialize_with = "lenient_string")]
    pub family: Option<String>,
    #[serde(rename = "CompSpeed", default, deserialize_with = "lenient_f64")]
    pub comp_speed: Option<f64>,
    #[serde(rename = "CompPower", default, deserialize_with = "lenient_f64")]
    pub comp_power: Option<f64>,
    #[serde(rename = "CompRunningPWM", default, deserialize_with = "lenient_f64")]
    pub comp_running_pwm: Option<f64>,
    #[serde(rename = "CompressorOn", default, deserialize_with = "lenient")]
    pub compressor_on: Option<bool>,
    #[serde(rename = "AmbTemp", default, deserialize_with = "lenient_f64")]
    pub ambient_temp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemIdentity {
    #[serde(rename = "MasterWCModel", default, deserialize_with = "lenient_string")]
    pub master_model: Option<String>,
    #[serde(rename = "MasterSerial", default, deserialize_with = "lenient_string")]
    pub master_serial: Option<String>,
    #[serde(
        rename = "MasterWCFirmwareVersion",
        default,
        deserialize_with = "lenient_string"
    )]
    pub master_firmware: Option<String>,
    /// Filled from `NV_SystemSettings` when that section is present.
    #[serde(rename = "SystemName", default, deserialize_with = "lenient_string")]
    pub system_name: Option<String>,
    #[serde(rename = "OutdoorUnit", default, deserialize_with = "lenient")]
    pub outdoor_unit: Option<OutdoorUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserSettings {
    #[serde(rename = "isOn", default, deserialize_with = "lenient")]
    pub is_on: bool,
    #[serde(rename = "Mode", default, deserialize_with = "lenient_string")]
    pub mode: Option<String>,
    #[serde(rename = "FanMode", default, deserialize_with = "lenient")]
    pub fan_mode: String,
    #[serde(rename = "AwayMode", default, deserialize_with = "lenient")]
    pub away_mode: bool,
    #[serde(rename = "QuietModeEnabled", default, deserialize_with = "lenient")]
    pub quiet_mode: bool,
    #[serde(rename = "TurboMode", default, deserialize_with = "lenient")]
    pub turbo: TurboMode,
    #[serde(
        rename = "TemperatureSetpoint_Cool_oC",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub cool_setpoint: Option<f64>,
    #[serde(
        rename = "TemperatureSetpoint_Heat_oC",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub heat_setpoint: Option<f64>,
    #[serde(rename = "EnabledZones", default, deserialize_with = "lenient")]
    pub enabled_zones: Vec<bool>,
    #[serde(
        rename = "ZoneTemperatureSetpointVariance_oC",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub zone_variance: Option<f64>,
}

impl UserSettings {
    /// Mode absent or blank is [`ValidationError::NoMode`].
    pub fn system_mode(&self) -> std::result::Result<SystemMode, ValidationError> {
        match self.mode.as_deref().map(str::trim) {
            None | Some("") => Err(ValidationError::NoMode),
            Some(m) => m.parse(),
        }
    }

    pub fn fan(&self) -> FanMode {
        FanMode::parse(&self.fan_mode)
    }

    pub fn base_fan_mode(&self) -> String {
        self.fan().base
    }

    pub fn continuous_fan_enabled(&self) -> bool {
        self.fan().continuous
    }

    pub fn turbo_enabled(&self) -> bool {
        self.turbo.enabled()
    }

    pub fn turbo_supported(&self) -> bool {
        self.turbo.supported()
    }

    fn current_setpoints(&self) -> Setpoints {
        Setpoints {
            cool: self.cool_setpoint,
            heat: self.heat_setpoint,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LiveAircon {
    #[serde(rename = "SystemOn", alias = "isOn", default, deserialize_with = "lenient")]
    pub system_on: bool,
    #[serde(rename = "CompressorMode", default, deserialize_with = "lenient_string")]
    pub compressor_mode: Option<String>,
    #[serde(rename = "CompressorCapacity", default, deserialize_with = "lenient_f64")]
    pub compressor_capacity: Option<f64>,
    #[serde(rename = "FanRPM", default, deserialize_with = "lenient_f64")]
    pub fan_rpm: Option<f64>,
    #[serde(rename = "Defrost", default, deserialize_with = "lenient")]
    pub defrost: bool,
    #[serde(
        rename = "CompressorChasingTemperature",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub compressor_chasing_temperature: Option<f64>,
    #[serde(
        rename = "CompressorLiveTemperature",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub compressor_live_temperature: Option<f64>,
    #[serde(rename = "OutdoorUnit", default, deserialize_with = "lenient")]
    pub outdoor_unit: Option<OutdoorUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MasterInfo {
    #[serde(rename = "LiveTemp_oC", default, deserialize_with = "lenient_f64")]
    pub live_temp: Option<f64>,
    #[serde(rename = "LiveHumidity_pc", default, deserialize_with = "lenient_f64")]
    pub live_humidity: Option<f64>,
    #[serde(rename = "LiveOutdoorTemp_oC", default, deserialize_with = "lenient_f64")]
    pub live_outdoor_temp: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Alerts {
    #[serde(rename = "CleanFilter", default, deserialize_with = "lenient")]
    pub clean_filter: bool,
    #[serde(rename = "Defrosting", default, deserialize_with = "lenient")]
    pub defrosting: bool,
}

/// `NV_Limits.UserSetpoint_oC`
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SetpointLimits {
    #[serde(rename = "setCool_Min", default, deserialize_with = "lenient_f64")]
    pub cool_min: Option<f64>,
    #[serde(rename = "setCool_Max", default, deserialize_with = "lenient_f64")]
    pub cool_max: Option<f64>,
    #[serde(rename = "setHeat_Min", default, deserialize_with = "lenient_f64")]
    pub heat_min: Option<f64>,
    #[serde(rename = "setHeat_Max", default, deserialize_with = "lenient_f64")]
    pub heat_max: Option<f64>,
}

/// One parsed status response. Rebuilt wholesale on every fetch.
///
/// The client handle is a weak link used only for dispatching commands; it
/// is not updated when a newer snapshot replaces this one.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub serial_number: String,
    pub is_online: bool,
    pub last_known_state: Value,
    pub system: Option<SystemIdentity>,
    pub settings: Option<UserSettings>,
    pub master_info: Option<MasterInfo>,
    pub live: Option<LiveAircon>,
    pub alerts: Option<Alerts>,
    pub limits: Option<SetpointLimits>,
    pub zones: Vec<Zone>,
    pub peripherals: Vec<Peripheral>,
    source_serial: String,
    client: Option<Weak<dyn CommandSink>>,
}

fn section<T: DeserializeOwned>(state: &Value, pointer: &str) -> Option<T> {
    let raw = state.pointer(pointer)?;
    match T::deserialize(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(section = pointer, error = %e, "skipping malformed status section");
            None
        }
    }
}

fn project_zones(state: &Value) -> Vec<Zone> {
    let entries = match state.get("RemoteZoneInfo") {
        Some(Value::Array(entries)) => entries,
        Some(other) if !other.is_null() => {
            warn!("RemoteZoneInfo is not a list, ignoring zones");
            return Vec::new();
        }
        _ => return Vec::new(),
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            // a bad entry keeps its slot so later indices stay aligned
            let mut zone = Zone::deserialize(raw).unwrap_or_else(|e| {
                warn!(index, error = %e, "skipping malformed zone entry");
                Zone::default()
            });
            zone.index = Some(index);
            zone
        })
        .collect()
}

fn project_peripherals(state: &Value) -> Vec<Peripheral> {
    let Some(Value::Array(entries)) = state.pointer("/AirconSystem/Peripherals") else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let parsed = Peripheral::from_value(raw);
            if parsed.is_none() {
                warn!(index = i, "skipping peripheral entry that is not an object");
            }
            parsed
        })
        .collect()
}

/// Build a typed snapshot from one status response. Never fails: any
/// section that is missing or malformed is left unset.
pub fn project(raw: &Value, serial_hint: &str) -> StatusSnapshot {
    let is_online = raw
        .get("isOnline")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let state = match raw.get("lastKnownState") {
        Some(v @ Value::Object(_)) => v.clone(),
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(_) => {
            warn!("lastKnownState is not an object, ignoring it");
            Value::Object(Map::new())
        }
    };

    let mut system: Option<SystemIdentity> = section(&state, "/AirconSystem");
    if let Some(name) = state
        .pointer("/NV_SystemSettings/SystemName")
        .and_then(Value::as_str)
    {
        system.get_or_insert_with(SystemIdentity::default).system_name = Some(name.to_string());
    }

    let serial_number = system
        .as_ref()
        .and_then(|s| s.master_serial.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(serial_hint)
        .to_lowercase();

    let mut zones = project_zones(&state);
    let peripherals = project_peripherals(&state);
    for zone in &mut zones {
        let Some(index) = zone.index else { continue };
        zone.sensor_humidity = peripherals
            .iter()
            .find(|p| p.zone_assignments.contains(&index))
            .and_then(|p| p.humidity);
    }

    trace!(serial = %serial_number, zones = zones.len(), "projected status");

    StatusSnapshot {
        source_serial: serial_hint.to_lowercase(),
        serial_number,
        is_online,
        system,
        settings: section(&state, "/UserAirconSettings"),
        master_info: section(&state, "/MasterInfo"),
        live: section(&state, "/LiveAircon"),
        alerts: section(&state, "/Alerts"),
        limits: section(&state, "/NV_Limits/UserSetpoint_oC"),
        zones,
        peripherals,
        last_known_state: state,
        client: None,
    }
}

impl StatusSnapshot {
    pub fn with_client(mut self, client: Weak<dyn CommandSink>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn has_client(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.strong_count() > 0)
    }

    /// Serial used to address commands: the one the status was fetched for,
    /// or the projected serial when none was given.
    pub fn command_serial(&self) -> &str {
        if self.source_serial.is_empty() {
            &self.serial_number
        } else {
            &self.source_serial
        }
    }

    pub async fn dispatch(&self, command: &Command) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(ValidationError::NoClient)?;
        client.send_command(self.command_serial(), command).await
    }

    pub fn setpoint_range(&self, side: SetpointSide) -> TemperatureRange {
        let limits = self.limits.unwrap_or_default();
        let (min, max) = match side {
            SetpointSide::Cool => (limits.cool_min, limits.cool_max),
            SetpointSide::Heat => (limits.heat_min, limits.heat_max),
        };
        TemperatureRange::new(
            min.unwrap_or(DEFAULT_MIN_SETPOINT),
            max.unwrap_or(DEFAULT_MAX_SETPOINT),
        )
    }

    pub fn min_temp(&self) -> f64 {
        self.setpoint_range(SetpointSide::Cool).min
    }

    pub fn max_temp(&self) -> f64 {
        self.setpoint_range(SetpointSide::Cool).max
    }

    pub fn system_on(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.is_on)
    }

    pub fn inside_temperature(&self) -> Option<f64> {
        self.master_info.as_ref()?.live_temp
    }

    pub fn humidity(&self) -> Option<f64> {
        self.master_info.as_ref()?.live_humidity
    }

    pub fn outdoor_temperature(&self) -> Option<f64> {
        self.master_info.as_ref()?.live_outdoor_temp
    }

    pub fn clean_filter(&self) -> bool {
        self.alerts.is_some_and(|a| a.clean_filter)
    }

    pub fn defrost_mode(&self) -> bool {
        self.alerts.is_some_and(|a| a.defrosting)
    }

    pub fn compressor_mode(&self) -> Option<&str> {
        self.live.as_ref()?.compressor_mode.as_deref()
    }

    pub fn compressor_chasing_temperature(&self) -> Option<f64> {
        self.live.as_ref()?.compressor_chasing_temperature
    }

    pub fn compressor_live_temperature(&self) -> Option<f64> {
        self.live.as_ref()?.compressor_live_temperature
    }

    /// Live telemetry first, then the hardware block from `AirconSystem`.
    pub fn outdoor_unit(&self) -> Option<&OutdoorUnit> {
        self.live
            .as_ref()
            .and_then(|l| l.outdoor_unit.as_ref())
            .or_else(|| self.system.as_ref()?.outdoor_unit.as_ref())
    }

    pub fn compressor_speed(&self) -> f64 {
        self.outdoor_unit()
            .and_then(|u| u.comp_speed)
            .unwrap_or(0.0)
    }

    pub fn compressor_power(&self) -> f64 {
        self.outdoor_unit()
            .and_then(|u| u.comp_power)
            .unwrap_or(0.0)
    }

    pub fn peripheral_for_zone(&self, index: usize) -> Option<&Peripheral> {
        self.peripherals
            .iter()
            .find(|p| p.zone_assignments.contains(&index))
    }

    pub fn settings(&self) -> Option<SettingsRef<'_>> {
        self.settings.as_ref().map(|settings| SettingsRef {
            snapshot: self,
            settings,
        })
    }

    pub fn system(&self) -> Option<SystemRef<'_>> {
        self.system.as_ref().map(|identity| SystemRef {
            snapshot: self,
            identity,
        })
    }

    pub fn zone(&self, index: usize) -> Option<ZoneRef<'_>> {
        self.zones.get(index).map(|zone| ZoneRef {
            snapshot: self,
            zone,
        })
    }

    pub fn zones(&self) -> impl Iterator<Item = ZoneRef<'_>> {
        self.zones.iter().map(move |zone| ZoneRef {
            snapshot: self,
            zone,
        })
    }
}

/// Settings borrowed together with their snapshot so they can send commands.
#[derive(Debug, Clone, Copy)]
pub struct SettingsRef<'a> {
    snapshot: &'a StatusSnapshot,
    settings: &'a UserSettings,
}

impl Deref for SettingsRef<'_> {
    type Target = UserSettings;

    fn deref(&self) -> &UserSettings {
        self.settings
    }
}

impl SettingsRef<'_> {
    pub fn temperature_command(
        &self,
        value: f64,
        side: Option<SetpointSide>,
    ) -> std::result::Result<Command, ValidationError> {
        let mode = self.settings.system_mode()?;
        let plan = plan_setpoints(mode, value, side, self.settings.current_setpoints());
        let cool = self.snapshot.setpoint_range(SetpointSide::Cool);
        let heat = self.snapshot.setpoint_range(SetpointSide::Heat);
        Ok(setpoint_command(
            SetpointTarget::System,
            Setpoints {
                cool: plan.cool.map(|c| cool.clamp(c)),
                heat: plan.heat.map(|h| heat.clamp(h)),
            },
        ))
    }

    pub async fn set_system_mode(&self, mode: &str) -> Result<()> {
        let mode: SystemMode = mode.parse()?;
        self.snapshot.dispatch(&system_mode_command(mode)).await
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.snapshot.dispatch(&power_command(on)).await
    }

    /// Keeps continuous operation as it is.
    pub async fn set_fan_mode(&self, fan_mode: &str) -> Result<()> {
        let fan = self.settings.fan().with_base(fan_mode);
        self.snapshot.dispatch(&fan_mode_command(&fan)).await
    }

    pub async fn set_continuous_mode(&self, enabled: bool) -> Result<()> {
        let fan = self.settings.fan().with_continuous(enabled);
        self.snapshot.dispatch(&fan_mode_command(&fan)).await
    }

    pub async fn set_temperature(&self, value: f64) -> Result<()> {
        let cmd = self.temperature_command(value, None)?;
        self.snapshot.dispatch(&cmd).await
    }

    pub async fn set_setpoint(&self, side: SetpointSide, value: f64) -> Result<()> {
        let cmd = self.temperature_command(value, Some(side))?;
        self.snapshot.dispatch(&cmd).await
    }

    pub async fn set_away_mode(&self, enabled: bool) -> Result<()> {
        self.snapshot.dispatch(&away_mode_command(enabled)).await
    }

    pub async fn set_quiet_mode(&self, enabled: bool) -> Result<()> {
        self.snapshot.dispatch(&quiet_mode_command(enabled)).await
    }

    pub async fn set_turbo_mode(&self, enabled: bool) -> Result<()> {
        self.snapshot.dispatch(&turbo_mode_command(enabled)).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemRef<'a> {
    snapshot: &'a StatusSnapshot,
    identity: &'a SystemIdentity,
}

impl Deref for SystemRef<'_> {
    type Target = SystemIdentity;

    fn deref(&self) -> &SystemIdentity {
        self.identity
    }
}

impl SystemRef<'_> {
    pub async fn set_system_mode(&self, mode: &str) -> Result<()> {
        let mode: SystemMode = mode.parse()?;
        self.snapshot.dispatch(&system_mode_command(mode)).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneRef<'a> {
    snapshot: &'a StatusSnapshot,
    zone: &'a Zone,
}

impl Deref for ZoneRef<'_> {
    type Target = Zone;

    fn deref(&self) -> &Zone {
        self.zone
    }
}

impl<'a> ZoneRef<'a> {
    pub fn is_active(&self) -> bool {
        self.zone.is_active(Some(self.snapshot))
    }

    pub fn hvac_mode(&self) -> SystemMode {
        self.zone.hvac_mode(Some(self.snapshot))
    }

    pub fn min_temp(&self) -> f64 {
        self.zone.min_temp(Some(self.snapshot))
    }

    pub fn max_temp(&self) -> f64 {
        self.zone.max_temp(Some(self.snapshot))
    }

    pub fn peripheral(&self) -> Option<&'a Peripheral> {
        self.zone.peripheral(Some(self.snapshot))
    }

    pub fn peripheral_temperature(&self) -> Option<f64> {
        self.peripheral()?.temperature
    }

    pub fn peripheral_humidity(&self) -> Option<f64> {
        self.peripheral()?.humidity
    }

    pub fn battery_level(&self) -> Option<f64> {
        self.peripheral()?.battery_level
    }

    pub async fn enable(&self, enable: bool) -> Result<()> {
        let cmd = self.zone.enable_command(Some(self.snapshot), enable)?;
        self.snapshot.dispatch(&cmd).await
    }

    pub async fn set_temperature(&self, value: f64) -> Result<()> {
        let cmd = self
            .zone
            .temperature_command(Some(self.snapshot), value, None)?;
        self.snapshot.dispatch(&cmd).await
    }

    pub async fn set_setpoint(&self, side: SetpointSide, value: f64) -> Result<()> {
        let cmd = self
            .zone
            .temperature_command(Some(self.snapshot), value, Some(side))?;
        self.snapshot.dispatch(&cmd).await
    }
}
