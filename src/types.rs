//! Type-safe run policies.
//!
//! Replaces the stringly-typed policy fields of the sequence document with
//! proper enums that get compile-time validation and exhaustive matching.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// What to do when an action raises a non-fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailPolicy {
    /// Propagate the error and abort the run (default)
    #[default]
    Halt,
    /// Skip to the next sibling action
    Continue,
    /// Safe-off every instrument, then propagate
    Shutdown,
}

/// What to do when the operator interrupts the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterruptPolicy {
    /// Prompt the operator; quit shuts down, anything else aborts the
    /// remaining actions at the current nesting level (default)
    #[default]
    Pause,
    /// Keep executing as if nothing happened
    Continue,
    /// Safe-off every instrument first, then behave as `pause`
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_string_forms() {
        assert_eq!(FailPolicy::Halt.to_string(), "halt");
        assert_eq!(FailPolicy::Shutdown.to_string(), "shutdown");
        assert_eq!("continue".parse::<FailPolicy>().unwrap(), FailPolicy::Continue);
        assert_eq!("pause".parse::<InterruptPolicy>().unwrap(), InterruptPolicy::Pause);
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(FailPolicy::default(), FailPolicy::Halt);
        assert_eq!(InterruptPolicy::default(), InterruptPolicy::Pause);
    }

    #[test]
    fn test_policy_deserialize_from_yaml() {
        let p: FailPolicy = serde_yaml::from_str("shutdown").unwrap();
        assert_eq!(p, FailPolicy::Shutdown);
        assert!(serde_yaml::from_str::<FailPolicy>("explode").is_err());
    }
}
