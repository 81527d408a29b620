use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::error::ValidationError;
use crate::types::{FanMode, SystemMode};

pub const COMMAND_TYPE: &str = "set-settings";

const SETTINGS: &str = "UserAirconSettings";
const COOL_FIELD: &str = "TemperatureSetpoint_Cool_oC";
const HEAT_FIELD: &str = "TemperatureSetpoint_Heat_oC";

/// Partial settings update: field paths to values, tagged `set-settings`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    fields: Map<String, Value>,
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

impl Command {
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(COMMAND_TYPE.to_string()));
        Self { fields }
    }

    pub fn with(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        json!({ "command": self.fields })
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointSide {
    Cool,
    Heat,
}

impl SetpointSide {
    fn field(&self) -> &'static str {
        match self {
            SetpointSide::Cool => COOL_FIELD,
            SetpointSide::Heat => HEAT_FIELD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointTarget {
    System,
    Zone(usize),
}

impl SetpointTarget {
    fn path(&self, side: SetpointSide) -> String {
        match self {
            SetpointTarget::System => format!("{SETTINGS}.{}", side.field()),
            SetpointTarget::Zone(i) => format!("RemoteZoneInfo[{i}].{}", side.field()),
        }
    }
}

/// Cool/heat values to write. A `None` side is left out of the command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoints {
    pub cool: Option<f64>,
    pub heat: Option<f64>,
}

/// OFF only clears `isOn`, so the stored mode survives for the next power-on.
pub fn system_mode_command(mode: SystemMode) -> Command {
    match mode {
        SystemMode::Off => Command::new().with(format!("{SETTINGS}.isOn"), false),
        other => Command::new()
            .with(format!("{SETTINGS}.isOn"), true)
            .with(format!("{SETTINGS}.Mode"), other.as_str()),
    }
}

pub fn power_command(on: bool) -> Command {
    Command::new().with(format!("{SETTINGS}.isOn"), on)
}

pub fn fan_mode_command(fan: &FanMode) -> Command {
    Command::new().with(format!("{SETTINGS}.FanMode"), fan.to_string())
}

pub fn away_mode_command(enabled: bool) -> Command {
    Command::new().with(format!("{SETTINGS}.AwayMode"), enabled)
}

pub fn quiet_mode_command(enabled: bool) -> Command {
    Command::new().with(format!("{SETTINGS}.QuietModeEnabled"), enabled)
}

pub fn turbo_mode_command(enabled: bool) -> Command {
    Command::new().with(format!("{SETTINGS}.TurboMode.Enabled"), enabled)
}

pub fn setpoint_command(target: SetpointTarget, setpoints: Setpoints) -> Command {
    let mut cmd = Command::new();
    if let Some(cool) = setpoints.cool {
        cmd = cmd.with(target.path(SetpointSide::Cool), cool);
    }
    if let Some(heat) = setpoints.heat {
        cmd = cmd.with(target.path(SetpointSide::Heat), heat);
    }
    cmd
}

/// Decide which setpoint fields a temperature request writes.
///
/// COOL and HEAT write their own side. AUTO writes both: the explicit side
/// (cool when none is given) takes `value` and the other side keeps the
/// current cool/heat gap. Other modes write the explicit side, or cool.
pub fn plan_setpoints(
    mode: SystemMode,
    value: f64,
    side: Option<SetpointSide>,
    current: Setpoints,
) -> Setpoints {
    match (mode, side) {
        (SystemMode::Auto, side) => {
            let gap = match (current.cool, current.heat) {
                (Some(c), Some(h)) => c - h,
                _ => 0.0,
            };
            match side.unwrap_or(SetpointSide::Cool) {
                SetpointSide::Cool => Setpoints {
                    cool: Some(value),
                    heat: Some(value - gap),
                },
                SetpointSide::Heat => Setpoints {
                    cool: Some(value + gap),
                    heat: Some(value),
                },
            }
        }
        (_, Some(SetpointSide::Heat)) | (SystemMode::Heat, None) => Setpoints {
            cool: None,
            heat: Some(value),
        },
        _ => Setpoints {
            cool: Some(value),
            heat: None,
        },
    }
}

/// Whole-array replacement of `EnabledZones` with one position flipped.
pub fn zone_enable_command(
    index: usize,
    enabled_zones: &[bool],
    enable: bool,
) -> Result<Command, ValidationError> {
    if index >= enabled_zones.len() {
        return Err(ValidationError::ZoneIndexOutOfRange {
            index,
            len: enabled_zones.len(),
        });
    }
    let mut zones = enabled_zones.to_vec();
    zones[index] = enable;
    Ok(Command::new().with(format!("{SETTINGS}.EnabledZones"), zones))
}
