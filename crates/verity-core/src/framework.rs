//! Supported regulatory frameworks and their requirement checklists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

const ISO27001_REQUIREMENTS: &[&str] = &[
    "Information security policies must be formally documented and approved",
    "Access to systems and data must follow the principle of least privilege",
    "User access rights must be reviewed periodically",
    "Security incidents must be detected, logged, and reported",
    "Personal data must be protected against unauthorized access and disclosure",
];

const GDPR_REQUIREMENTS: &[&str] = &[
    "Personal data processing must be lawful, fair, and transparent",
    "Data must be collected for explicit and legitimate purposes",
    "Personal data must be protected by appropriate technical measures",
    "Data breaches must be detected and reported without undue delay",
];

/// A named regulatory standard whose text is pre-indexed as regulatory chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Iso27001,
    Gdpr,
}

impl Framework {
    pub const ALL: [Framework; 2] = [Framework::Iso27001, Framework::Gdpr];

    /// Stable identifier stamped on reports.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Iso27001 => "iso27001",
            Self::Gdpr => "gdpr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Iso27001 => "ISO 27001",
            Self::Gdpr => "GDPR",
        }
    }

    /// Headline requirements a policy is expected to address.
    pub fn requirements(&self) -> &'static [&'static str] {
        match self {
            Self::Iso27001 => ISO27001_REQUIREMENTS,
            Self::Gdpr => GDPR_REQUIREMENTS,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Framework {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "iso27001" | "iso" => Ok(Self::Iso27001),
            "gdpr" => Ok(Self::Gdpr),
            _ => Err(CoreError::Config(format!("unknown framework: {s}"))),
        }
    }
}
