//! Language identifier for per-language restoration models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Supported language
///
/// Each language has its own restoration lexicon on disk:
/// - Hr: Croatian, the default protected language
/// - Sl: Slovenian
/// - Sr: Serbian (Latin script)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Hr,
    Sl,
    Sr,
}

impl Language {
    /// All languages with a known lexicon layout
    pub const ALL: [Language; 3] = [Language::Hr, Language::Sl, Language::Sr];

    /// Short ISO 639-1 code, as used in requests and model file names
    pub fn code(&self) -> &'static str {
        match self {
            Language::Hr => "hr",
            Language::Sl => "sl",
            Language::Sr => "sr",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hr" => Ok(Language::Hr),
            "sl" => Ok(Language::Sl),
            "sr" => Ok(Language::Sr),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Hr
    }
}
