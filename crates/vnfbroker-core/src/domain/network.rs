use std::fmt::{Display, Formatter};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// IPv4/IPv6 address, CIDR block, or the literal `any`.
///
/// The accepted text is kept as given so templates render what the caller
/// sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::parse_field("address", input)
    }

    pub(crate) fn parse_field(field: &'static str, input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::EmptyField { field });
        }
        if is_address(input) {
            Ok(Self(input.to_owned()))
        } else {
            Err(ValidationError::InvalidAddress {
                field,
                value: input.to_owned(),
            })
        }
    }

    pub fn is_any(&self) -> bool {
        self.0 == "any"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_address(input: &str) -> bool {
    if input == "any" {
        return true;
    }
    match input.split_once('/') {
        None => input.parse::<IpAddr>().is_ok(),
        Some((ip, prefix)) => {
            let Ok(ip) = ip.parse::<IpAddr>() else {
                return false;
            };
            if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            let max = if ip.is_ipv4() { 32 } else { 128 };
            prefix.parse::<u8>().is_ok_and(|bits| bits <= max)
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// TCP/UDP port in `1..=65535`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u16")]
pub struct Port(u16);

impl Port {
    pub fn new(value: u64) -> Result<Self, ValidationError> {
        match u16::try_from(value) {
            Ok(port) if port > 0 => Ok(Self(port)),
            _ => Err(ValidationError::InvalidPort {
                field: "port",
                value,
            }),
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u64> for Port {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(value: Port) -> Self {
        value.0
    }
}
