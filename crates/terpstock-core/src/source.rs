use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical dispensary identifiers used in records, paths and routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispensaryId {
    Cookies,
    Curaleaf,
    Flowery,
    #[serde(rename = "green_dragon")]
    GreenDragon,
    Muv,
    Sanctuary,
    Trulieve,
}

impl DispensaryId {
    pub const ALL: [Self; 7] = [
        Self::Cookies,
        Self::Curaleaf,
        Self::Flowery,
        Self::GreenDragon,
        Self::Muv,
        Self::Sanctuary,
        Self::Trulieve,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cookies => "cookies",
            Self::Curaleaf => "curaleaf",
            Self::Flowery => "flowery",
            Self::GreenDragon => "green_dragon",
            Self::Muv => "muv",
            Self::Sanctuary => "sanctuary",
            Self::Trulieve => "trulieve",
        }
    }
}

impl Display for DispensaryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispensaryId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "cookies" => Ok(Self::Cookies),
            "curaleaf" => Ok(Self::Curaleaf),
            "flowery" => Ok(Self::Flowery),
            "green_dragon" | "greendragon" => Ok(Self::GreenDragon),
            "muv" | "müv" => Ok(Self::Muv),
            "sanctuary" => Ok(Self::Sanctuary),
            "trulieve" => Ok(Self::Trulieve),
            other => Err(ValidationError::InvalidDispensary {
                value: other.to_owned(),
            }),
        }
    }
}
