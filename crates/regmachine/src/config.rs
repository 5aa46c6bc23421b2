//! Machine configuration.

use serde::{Deserialize, Serialize};

/// Knobs fixed at machine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Reject controllers that name operations missing from the table when
    /// the machine is built. When off, such operations fail with
    /// `UnknownOperation` the first time they execute.
    pub check_operations: bool,
    /// Emit a `trace` event for every executed instruction.
    pub trace_instructions: bool,
    /// Initial stack allocation.
    pub stack_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            check_operations: true,
            trace_instructions: false,
            stack_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MachineConfig =
            serde_json::from_str(r#"{ "trace_instructions": true }"#).unwrap();
        assert!(config.trace_instructions);
        assert!(config.check_operations);
        assert_eq!(config.stack_capacity, 64);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: MachineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MachineConfig::default());
    }
}
