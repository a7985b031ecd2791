use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(AppId, "Stable identifier of an application.");
string_id!(FeatureId, "Name of a feature within an application.");
string_id!(ModelId, "Logical model identifier, possibly an alias.");
string_id!(RequestId, "UUID v4 assigned to one inbound request.");
string_id!(TraceId, "Identifier of a request trace, equal to its RequestId.");

/// Deployment scope an API key is permanently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Sandbox,
}

impl Environment {
    /// Prefix convention used to bind an API key to an environment (`dev_`, `stg_`, ...).
    #[must_use]
    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::Development => "dev_",
            Self::Staging => "stg_",
            Self::Production => "prod_",
            Self::Sandbox => "sbx_",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }

    #[must_use]
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned by [`Environment::from_str`] for an unrecognized label.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown environment: {0}")]
pub struct ParseEnvironmentError(pub String);

impl std::str::FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stg" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            "sandbox" | "sbx" => Ok(Self::Sandbox),
            other => Err(ParseEnvironmentError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_prefixes_are_distinct() {
        let all = [
            Environment::Development,
            Environment::Staging,
            Environment::Production,
            Environment::Sandbox,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.key_prefix(), b.key_prefix());
            }
        }
    }

    #[test]
    fn only_production_is_strict() {
        assert!(Environment::Production.is_strict());
        assert!(!Environment::Sandbox.is_strict());
    }

    #[test]
    fn string_id_roundtrips_through_display() {
        let id = AppId::from("acme-corp");
        assert_eq!(id.to_string(), "acme-corp");
        assert_eq!(id.as_str(), "acme-corp");
    }

    #[test]
    fn environment_parses_label_and_short_form() {
        use std::str::FromStr;
        assert_eq!(Environment::from_str("production").unwrap(), Environment::Production);
        assert_eq!(Environment::from_str("prod").unwrap(), Environment::Production);
        assert!(Environment::from_str("nope").is_err());
    }
}
