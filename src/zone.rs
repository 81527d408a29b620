use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::ValidationError;
use crate::protocol::{
    Command, SetpointSide, SetpointTarget, Setpoints, plan_setpoints, setpoint_command,
    zone_enable_command,
};
use crate::status::{StatusSnapshot, lenient, lenient_f64, lenient_string, number};
use crate::types::{SystemMode, TemperatureRange};

pub const DEFAULT_ZONE_VARIANCE: f64 = 2.0;
/// Bounds reported by a zone that is not attached to a snapshot.
pub const DETACHED_ZONE_MIN: f64 = 16.0;
pub const DETACHED_ZONE_MAX: f64 = 30.0;

/// One entry of `RemoteZoneInfo`. Its position in that array is its identity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Zone {
    #[serde(rename = "CanOperate", default, deserialize_with = "lenient")]
    pub can_operate: bool,
    #[serde(rename = "NV_Title", default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(rename = "LiveTemp_oC", default, deserialize_with = "lenient_f64")]
    pub live_temp: Option<f64>,
    #[serde(rename = "LiveHumidity_pc", default, deserialize_with = "lenient_f64")]
    pub live_humidity: Option<f64>,
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

    /// Humidity reported by the peripheral assigned to this zone.
    #[serde(skip)]
    pub sensor_humidity: Option<f64>,
    #[serde(skip)]
    pub index: Option<usize>,
}

impl Zone {
    pub fn humidity(&self) -> Option<f64> {
        self.sensor_humidity.or(self.live_humidity)
    }

    /// Operable and switched on in the parent's `EnabledZones`.
    pub fn is_active(&self, parent: Option<&StatusSnapshot>) -> bool {
        if !self.can_operate {
            return false;
        }
        let (Some(index), Some(parent)) = (self.index, parent) else {
            return false;
        };
        parent
            .settings
            .as_ref()
            .and_then(|s| s.enabled_zones.get(index).copied())
            .unwrap_or(false)
    }

    pub fn hvac_mode(&self, parent: Option<&StatusSnapshot>) -> SystemMode {
        let Some(settings) = parent.and_then(|p| p.settings.as_ref()) else {
            return SystemMode::Off;
        };
        if !settings.is_on || !self.is_active(parent) {
            return SystemMode::Off;
        }
        settings.system_mode().unwrap_or(SystemMode::Off)
    }

    /// Settable range for one side: the system target plus or minus the zone
    /// variance, kept inside the device limits.
    pub fn temperature_range(
        &self,
        parent: Option<&StatusSnapshot>,
        side: SetpointSide,
    ) -> TemperatureRange {
        let Some(parent) = parent else {
            return TemperatureRange::new(DETACHED_ZONE_MIN, DETACHED_ZONE_MAX);
        };
        let limits = parent.setpoint_range(side);
        let Some(settings) = parent.settings.as_ref() else {
            return limits;
        };
        let target = match side {
            SetpointSide::Cool => settings.cool_setpoint,
            SetpointSide::Heat => settings.heat_setpoint,
        };
        let Some(target) = target else {
            return limits;
        };
        let variance = settings.zone_variance.unwrap_or(DEFAULT_ZONE_VARIANCE);
        TemperatureRange::new(
            limits.clamp(target - variance),
            limits.clamp(target + variance),
        )
    }

    pub fn min_temp(&self, parent: Option<&StatusSnapshot>) -> f64 {
        self.temperature_range(parent, SetpointSide::Cool).min
    }

    pub fn max_temp(&self, parent: Option<&StatusSnapshot>) -> f64 {
        self.temperature_range(parent, SetpointSide::Cool).max
    }

    pub fn peripheral<'a>(&self, parent: Option<&'a StatusSnapshot>) -> Option<&'a Peripheral> {
        parent?.peripheral_for_zone(self.index?)
    }

    fn attached<'a>(
        &self,
        parent: Option<&'a StatusSnapshot>,
    ) -> Result<(usize, &'a StatusSnapshot), ValidationError> {
        let index = self.index.ok_or(ValidationError::ZoneIndexNotSet)?;
        let parent = parent.ok_or(ValidationError::NoParent)?;
        Ok((index, parent))
    }

    pub fn enable_command(
        &self,
        parent: Option<&StatusSnapshot>,
        enable: bool,
    ) -> Result<Command, ValidationError> {
        let (index, parent) = self.attached(parent)?;
        let enabled_zones = parent
            .settings
            .as_ref()
            .map(|s| s.enabled_zones.as_slice())
            .unwrap_or_default();
        zone_enable_command(index, enabled_zones, enable)
    }

    /// Setpoint command for this zone, clamped to the zone's range.
    pub fn temperature_command(
        &self,
        parent: Option<&StatusSnapshot>,
        value: f64,
        side: Option<SetpointSide>,
    ) -> Result<Command, ValidationError> {
        let (index, parent) = self.attached(parent)?;
        if index >= parent.zones.len() {
            return Err(ValidationError::ZoneIndexOutOfRange {
                index,
                len: parent.zones.len(),
            });
        }
        let settings = parent.settings.as_ref().ok_or(ValidationError::NoMode)?;
        let mode = settings.system_mode()?;
        // the AUTO gap comes from the zone when it has both setpoints
        let current = match (self.cool_setpoint, self.heat_setpoint) {
            (Some(cool), Some(heat)) => Setpoints {
                cool: Some(cool),
                heat: Some(heat),
            },
            _ => Setpoints {
                cool: settings.cool_setpoint,
                heat: settings.heat_setpoint,
            },
        };
        let plan = plan_setpoints(mode, value, side, current);
        let cool_range = self.temperature_range(Some(parent), SetpointSide::Cool);
        let heat_range = self.temperature_range(Some(parent), SetpointSide::Heat);
        let clamped = Setpoints {
            cool: plan.cool.map(|c| cool_range.clamp(c)),
            heat: plan.heat.map(|h| heat_range.clamp(h)),
        };
        Ok(setpoint_command(SetpointTarget::Zone(index), clamped))
    }
}

/// Sensor module from `AirconSystem.Peripherals`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peripheral {
    pub logical_address: Option<u64>,
    pub device_type: Option<String>,
    pub serial_number: Option<String>,
    /// Zero-based indices into `RemoteZoneInfo`.
    pub zone_assignments: Vec<usize>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery_level: Option<f64>,
}

impl Peripheral {
    /// Returns `None` for entries that are not JSON objects. Unreadable
    /// readings become `None` rather than failing the entry.
    pub(crate) fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;

        let zone_assignments = match obj.get("ZoneAssignment") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(number)
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .map(|n| n as usize)
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(value = %other, "peripheral zone assignment is not a list");
                Vec::new()
            }
        };

        let sensor = raw.pointer("/SensorInputs/SHTC1");
        let temperature = sensor.and_then(|s| s.get("Temperature_oC")).and_then(number);
        let humidity = sensor
            .and_then(|s| s.get("RelativeHumidity_pc"))
            .and_then(number);

        Some(Self {
            logical_address: obj.get("LogicalAddress").and_then(Value::as_u64),
            device_type: obj
                .get("DeviceType")
                .and_then(Value::as_str)
                .map(str::to_string),
            serial_number: obj
                .get("SerialNumber")
                .and_then(Value::as_str)
                .map(str::to_string),
            zone_assignments,
            temperature,
            humidity,
            battery_level: raw.pointer("/SensorInputs/Battery/Level").and_then(number),
        })
    }

    /// Zones of `parent` this peripheral is assigned to. Indices past the
    /// zone array are skipped.
    pub fn zones<'a>(&self, parent: &'a StatusSnapshot) -> Vec<&'a Zone> {
        self.zone_assignments
            .iter()
            .filter_map(|&i| parent.zones.get(i))
            .collect()
    }
}
