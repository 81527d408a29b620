use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

pub const BASE_URL_NEO: &str = "https://nimbus.actronair.com.au";
pub const BASE_URL_QUE: &str = "https://que.actronair.com.au";
pub const BASE_URL_ACONNECT: &str = "https://actron-connect.actronair.com.au";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Neo,
    Que,
    Aconnect,
}

impl Platform {
    pub fn base_url(&self) -> &'static str {
        match self {
            Platform::Neo => BASE_URL_NEO,
            Platform::Que => BASE_URL_QUE,
            Platform::Aconnect => BASE_URL_ACONNECT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Neo => "neo",
            Platform::Que => "que",
            Platform::Aconnect => "aconnect",
        }
    }

    pub fn from_base_url(url: &str) -> Option<Self> {
        let url = url.trim_end_matches('/');
        [Platform::Neo, Platform::Que, Platform::Aconnect]
            .into_iter()
            .find(|p| p.base_url() == url)
    }

    /// Backend a single system type string belongs to.
    pub fn for_system_type(system_type: &str) -> Self {
        let t = system_type.trim().to_ascii_lowercase();
        match t.as_str() {
            "nx-gen" | "nxgen" | "nx gen" => Platform::Que,
            "aconnect" => Platform::Aconnect,
            _ => Platform::Neo,
        }
    }

    /// Picks the backend for an account. Que wins over Aconnect, which wins over Neo.
    pub fn detect(systems: &[SystemSummary]) -> Self {
        systems
            .iter()
            .map(|s| Platform::for_system_type(&s.system_type))
            .max_by_key(|p| p.priority())
            .unwrap_or_default()
    }

    fn priority(&self) -> u8 {
        match self {
            Platform::Neo => 0,
            Platform::Aconnect => 1,
            Platform::Que => 2,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Auto,
    Cool,
    Fan,
    Heat,
    Off,
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Auto => "AUTO",
            SystemMode::Cool => "COOL",
            SystemMode::Fan => "FAN",
            SystemMode::Heat => "HEAT",
            SystemMode::Off => "OFF",
        }
    }
}

impl FromStr for SystemMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(SystemMode::Auto),
            "COOL" => Ok(SystemMode::Cool),
            "FAN" => Ok(SystemMode::Fan),
            "HEAT" => Ok(SystemMode::Heat),
            "OFF" => Ok(SystemMode::Off),
            _ => Err(ValidationError::InvalidMode {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanSeparator {
    #[default]
    Plus,
    Dash,
}

impl FanSeparator {
    fn as_char(&self) -> char {
        match self {
            FanSeparator::Plus => '+',
            FanSeparator::Dash => '-',
        }
    }
}

const CONT_SUFFIX: &str = "CONT";

/// Fan speed token plus the optional continuous suffix (`LOW+CONT`, `HIGH-CONT`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FanMode {
    pub base: String,
    pub continuous: bool,
    pub separator: FanSeparator,
}

impl FanMode {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        for sep in [FanSeparator::Plus, FanSeparator::Dash] {
            let suffix = format!("{}{CONT_SUFFIX}", sep.as_char());
            if let Some(base) = raw.strip_suffix(suffix.as_str()) {
                return Self {
                    base: base.to_string(),
                    continuous: true,
                    separator: sep,
                };
            }
        }
        Self {
            base: raw.to_string(),
            continuous: false,
            separator: FanSeparator::Plus,
        }
    }

    /// Toggle continuous operation, keeping the separator already in use.
    pub fn with_continuous(&self, continuous: bool) -> Self {
        Self {
            continuous,
            ..self.clone()
        }
    }

    /// Fresh speed assignment. Always reassembles with `+`.
    pub fn with_base(&self, base: &str) -> Self {
        Self {
            base: base.trim().to_ascii_uppercase(),
            continuous: self.continuous,
            separator: FanSeparator::Plus,
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.continuous {
            write!(f, "{}{}{CONT_SUFFIX}", self.base, self.separator.as_char())
        } else {
            f.write_str(&self.base)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TurboMode {
    Plain(bool),
    Detailed {
        #[serde(rename = "Supported", default)]
        supported: bool,
        #[serde(rename = "Enabled", default)]
        enabled: bool,
    },
}

impl Default for TurboMode {
    fn default() -> Self {
        TurboMode::Plain(false)
    }
}

impl TurboMode {
    pub fn enabled(&self) -> bool {
        match self {
            TurboMode::Plain(b) => *b,
            TurboMode::Detailed { enabled, .. } => *enabled,
        }
    }

    /// The plain boolean form carries no capability information.
    pub fn supported(&self) -> bool {
        match self {
            TurboMode::Plain(_) => false,
            TurboMode::Detailed { supported, .. } => *supported,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// NaN clamps to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() || value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkSet {
    One(Link),
    Many(Vec<Link>),
}

impl LinkSet {
    pub fn first(&self) -> Option<&Link> {
        match self {
            LinkSet::One(link) => Some(link),
            LinkSet::Many(links) => links.first(),
        }
    }
}

fn lowercase<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let s = String::deserialize(d)?;
    Ok(s.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemSummary {
    #[serde(deserialize_with = "lowercase")]
    pub serial: String,
    #[serde(rename = "type", default)]
    pub system_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "_links", default)]
    pub links: HashMap<String, LinkSet>,
}

impl SystemSummary {
    /// Relative path for a link relation, leading `/` stripped.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .get(rel)
            .and_then(LinkSet::first)
            .map(|l| l.href.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventQuery {
    Latest,
    Newer(String),
    Older(String),
}
