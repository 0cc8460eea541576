//! # Domain Models
//!
//! Vendor-neutral rule payloads accepted by the broker.
//!
//! Every payload is validated while it is deserialized: identifiers, addresses,
//! ports and descriptions are newtypes that cannot hold invalid values, and
//! unknown fields are rejected. Validation never touches the network or any
//! shared state.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FirewallRule`] | Create/update firewall rule |
//! | [`NatRule`] | Create NAT rule |
//! | [`RuleRef`] | Firewall delete target |
//! | [`NatRuleRef`] | NAT delete target, optionally typed |
//! | [`ListRules`] | List request |
//! | [`RuleId`], [`InstanceId`] | `[A-Za-z0-9_.-]{1,128}` identifiers |
//! | [`Address`] | IP, CIDR block, or `any` |
//! | [`Port`] | Port in `1..=65535` |

mod identifier;
mod network;
mod rules;

pub use identifier::{InstanceId, RuleId};
pub use network::{Address, Port};
pub use rules::{
    parse_payload, Description, FirewallAction, FirewallRule, ListRules, NatRule, NatRuleRef,
    NatType, Protocol, RulePayload, RuleRef,
};
