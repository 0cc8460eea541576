use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Address, InstanceId, Port, RuleId};
use crate::ValidationError;

const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallAction {
    Allow,
    Deny,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatType {
    #[serde(rename = "snat")]
    Source,
    #[serde(rename = "dnat")]
    Destination,
    #[serde(rename = "1to1")]
    OneToOne,
}

/// Free-text rule description, at most 500 characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Description(String);

impl Description {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Description {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let len = value.chars().count();
        if len > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "description",
                len,
                max: MAX_DESCRIPTION_LEN,
            });
        }
        Ok(Self(value))
    }
}

impl From<Description> for String {
    fn from(value: Description) -> Self {
        value.0
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Firewall rule as submitted for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FirewallRule {
    pub vnf_instance_id: InstanceId,
    pub rule_id: RuleId,
    pub action: FirewallAction,
    pub protocol: Protocol,
    pub source_ip: Address,
    pub destination_ip: Address,
    #[serde(default)]
    pub destination_port: Option<Port>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<Description>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NatRule {
    pub vnf_instance_id: InstanceId,
    pub rule_id: RuleId,
    pub nat_type: NatType,
    pub original_ip: Address,
    pub translated_ip: Address,
    #[serde(default)]
    pub original_port: Option<Port>,
    #[serde(default)]
    pub translated_port: Option<Port>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<Description>,
}

/// Target of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleRef {
    pub vnf_instance_id: InstanceId,
    pub rule_id: RuleId,
}

/// Target of a NAT delete. Some appliances keep one table per NAT type and
/// need `natType` to find the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NatRuleRef {
    pub vnf_instance_id: InstanceId,
    pub rule_id: RuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_type: Option<NatType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListRules {
    pub vnf_instance_id: InstanceId,
}

/// Common view over validated operation payloads.
pub trait RulePayload: DeserializeOwned + Serialize {
    fn instance_id(&self) -> &InstanceId;

    fn rule_id(&self) -> Option<&RuleId>;
}

impl RulePayload for FirewallRule {
    fn instance_id(&self) -> &InstanceId {
        &self.vnf_instance_id
    }

    fn rule_id(&self) -> Option<&RuleId> {
        Some(&self.rule_id)
    }
}

impl RulePayload for NatRule {
    fn instance_id(&self) -> &InstanceId {
        &self.vnf_instance_id
    }

    fn rule_id(&self) -> Option<&RuleId> {
        Some(&self.rule_id)
    }
}

impl RulePayload for RuleRef {
    fn instance_id(&self) -> &InstanceId {
        &self.vnf_instance_id
    }

    fn rule_id(&self) -> Option<&RuleId> {
        Some(&self.rule_id)
    }
}

impl RulePayload for NatRuleRef {
    fn instance_id(&self) -> &InstanceId {
        &self.vnf_instance_id
    }

    fn rule_id(&self) -> Option<&RuleId> {
        Some(&self.rule_id)
    }
}

impl RulePayload for ListRules {
    fn instance_id(&self) -> &InstanceId {
        &self.vnf_instance_id
    }

    fn rule_id(&self) -> Option<&RuleId> {
        None
    }
}

/// Validates a raw JSON payload into `T`. Pure: no I/O, no state.
pub fn parse_payload<T: RulePayload>(payload: &Value) -> Result<T, ValidationError> {
    if !payload.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    serde_json::from_value(payload.clone())
        .map_err(|error| ValidationError::Malformed(error.to_string()))
}
