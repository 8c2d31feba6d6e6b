//! Finding severities and per-rule severity settings.
//!
//! Rules report with a [`Severity`]. Configuration assigns each rule a
//! [`SeveritySetting`], which can switch the rule off, keep whatever the
//! rule reports, or force a fixed severity onto every finding it emits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Severity of a reported finding.
///
/// Ordered: `Hint < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hint => "hint",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hint" => Ok(Severity::Hint),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(ConfigError::InvalidSeverity {
                value: s.to_string(),
            }),
        }
    }
}

/// How a rule's severity is configured for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SeveritySetting {
    /// The rule is not registered.
    Off,
    /// Findings keep the severity the rule reported.
    #[default]
    Default,
    /// Every finding from the rule is reported with this severity.
    Override(Severity),
}

impl SeveritySetting {
    pub fn is_off(&self) -> bool {
        matches!(self, SeveritySetting::Off)
    }

    /// Severity a finding is recorded with, given what the rule reported.
    pub fn resolve(&self, reported: Severity) -> Severity {
        match self {
            SeveritySetting::Override(severity) => *severity,
            SeveritySetting::Off | SeveritySetting::Default => reported,
        }
    }
}

impl fmt::Display for SeveritySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeveritySetting::Off => f.write_str("off"),
            SeveritySetting::Default => f.write_str("default"),
            SeveritySetting::Override(severity) => severity.fmt(f),
        }
    }
}

impl FromStr for SeveritySetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(SeveritySetting::Off),
            "default" => Ok(SeveritySetting::Default),
            _ => s.parse().map(SeveritySetting::Override),
        }
    }
}

impl TryFrom<String> for SeveritySetting {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SeveritySetting> for String {
    fn from(setting: SeveritySetting) -> Self {
        setting.to_string()
    }
}
