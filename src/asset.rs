//! Asset identifiers for the amounts a channel can carry.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The asset a channel is denominated in: the ledger's native asset or a
/// credit asset identified by a code and its issuing account.
///
/// Equality is equality of the canonical textual form, `"native"` or
/// `"CODE:ISSUER"`. The issuer may itself contain colons; only the first
/// colon separates code from issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl Asset {
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    pub fn code(&self) -> &str {
        match self {
            Asset::Native => "",
            Asset::Credit { code, .. } => code,
        }
    }

    pub fn issuer(&self) -> &str {
        match self {
            Asset::Native => "",
            Asset::Credit { issuer, .. } => issuer,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native"),
            Asset::Credit { code, issuer } => write!(f, "{}:{}", code, issuer),
        }
    }
}

impl FromStr for Asset {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "native" => Ok(Asset::Native),
            _ => {
                let (code, issuer) = s.split_once(':').unwrap_or((s, ""));
                Ok(Asset::Credit {
                    code: code.to_string(),
                    issuer: issuer.to_string(),
                })
            }
        }
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(Asset::Native))
    }
}
