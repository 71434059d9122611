use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Intel,
    Arm,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported architecture: '{identifier}'")]
pub struct UnsupportedArchError {
    pub identifier: String,
}

impl Arch {
    /// Architecture of the machine this binary was built for.
    pub fn host() -> Result<Arch, UnsupportedArchError> {
        std::env::consts::ARCH.parse()
    }
}

impl FromStr for Arch {
    type Err = UnsupportedArchError;

    /// Accepts both kernel-style names (`x86_64`, `aarch64`) and the
    /// processor names macOS reports (`i386`, `arm`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intel" | "i386" | "x86_64" | "x86-64" | "amd64" => Ok(Arch::Intel),
            "arm" | "arm64" | "aarch64" => Ok(Arch::Arm),
            _ => Err(UnsupportedArchError {
                identifier: s.to_owned(),
            }),
        }
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Intel => write!(f, "intel"),
            Arch::Arm => write!(f, "arm"),
        }
    }
}
