use std::fmt;

use uuid::Uuid;

use crate::error::{ModelError, Result};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate_token(&value, $label)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ModelError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ModelError;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

const MAX_ID_LEN: usize = 128;

fn validate_token(value: &str, label: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ModelError::InvalidId(format!("{label} cannot be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ModelError::InvalidId(format!(
            "{label} exceeds {MAX_ID_LEN} characters"
        )));
    }
    let allowed = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':')
    };
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(ModelError::InvalidId(format!(
            "{label} `{value}` contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

string_id!(
    /// Module identifier in `category/name` form, e.g. `exploit/grover_key_search`.
    ModuleId,
    "module id"
);

string_id!(
    /// Identifier assigned to a target by the recon collaborator or operator.
    TargetId,
    "target id"
);

string_id!(
    /// Identifier of a configured quantum backend.
    BackendId,
    "backend id"
);

uuid_id!(
    /// Identifier of one assessment session.
    SessionId
);

uuid_id!(
    /// Identifier of a single finding.
    FindingId
);

uuid_id!(
    /// Identifier of a job submitted to a quantum backend.
    JobId
);

impl ModuleId {
    /// Category prefix of the id (`exploit` in `exploit/grover_key_search`).
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once('/').map(|(prefix, _)| prefix)
    }
}

impl JobId {
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|err| ModelError::InvalidId(format!("job id `{raw}`: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_reject_empty_and_shell_metacharacters() {
        assert!(ModuleId::new("").is_err());
        assert!(TargetId::new("host;rm").is_err());
        assert!(BackendId::new("local sim").is_err());
        assert!(ModuleId::new("exploit/grover_key_search").is_ok());
    }

    #[test]
    fn module_prefix_is_category_segment() {
        let id = ModuleId::new("auxiliary/structural_risk").unwrap();
        assert_eq!(id.prefix(), Some("auxiliary"));
        let bare = ModuleId::new("standalone").unwrap();
        assert_eq!(bare.prefix(), None);
    }
}
