use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_IDENTIFIER_LEN: usize = 128;

fn validate(field: &'static str, input: &str) -> Result<(), ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }

    let len = input.chars().count();
    if len > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::FieldTooLong {
            field,
            len,
            max: MAX_IDENTIFIER_LEN,
        });
    }

    for (index, ch) in input.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-');
        if !valid {
            return Err(ValidationError::InvalidChar { field, ch, index });
        }
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(input: &str) -> Result<Self, ValidationError> {
                validate($field, input)?;
                Ok(Self(input.to_owned()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate($field, &value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

identifier!(
    /// Client-chosen rule identifier: 1 to 128 characters of `[A-Za-z0-9_.-]`.
    RuleId,
    "ruleId"
);

identifier!(
    /// Registered VNF backend identity.
    InstanceId,
    "vnfInstanceId"
);
