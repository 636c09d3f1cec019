//! Known synthesis voices and their model assets

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A synthesis voice, selecting which model asset renders a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Voice {
    HfcMale,
    NorthernEnglishMale,
    #[default]
    NormanMale,
    RyanMale,
    SemaineFemale,
}

impl Voice {
    /// Every known voice, in display order
    pub const ALL: [Self; 5] = [
        Self::HfcMale,
        Self::NorthernEnglishMale,
        Self::NormanMale,
        Self::RyanMale,
        Self::SemaineFemale,
    ];

    /// Stable identifier used in config files and on the command line
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::HfcMale => "hfc-male",
            Self::NorthernEnglishMale => "northern-english-male",
            Self::NormanMale => "norman-male",
            Self::RyanMale => "ryan-male",
            Self::SemaineFemale => "semaine-female",
        }
    }

    /// File name of the model asset inside the models directory
    #[must_use]
    pub const fn asset_file(self) -> &'static str {
        match self {
            Self::HfcMale => "en_US-hfc_male-medium.onnx",
            Self::NorthernEnglishMale => "en_GB-northern_english_male-medium.onnx",
            Self::NormanMale => "en_US-norman-medium.onnx",
            Self::RyanMale => "en_US-ryan-high.onnx",
            Self::SemaineFemale => "en_US-semaine_female.onnx",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Voice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|v| v.id() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown voice: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_parse() {
        assert_eq!("ryan-male".parse::<Voice>().unwrap(), Voice::RyanMale);
        assert_eq!(" Semaine_Female ".parse::<Voice>().unwrap(), Voice::SemaineFemale);
        assert!("nobody".parse::<Voice>().is_err());
    }

    #[test]
    fn test_default_voice() {
        assert_eq!(Voice::default(), Voice::NormanMale);
        assert_eq!(Voice::default().asset_file(), "en_US-norman-medium.onnx");
    }

    #[test]
    fn test_ids_are_unique() {
        for v in Voice::ALL {
            assert_eq!(v.id().parse::<Voice>().unwrap(), v);
        }
    }
}
