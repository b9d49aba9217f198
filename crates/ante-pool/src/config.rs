//! Factory configuration.
//!
//! Provides [`FactoryConfig`] with protocol defaults. It can be built
//! programmatically or loaded from JSON.

use ante_core::constants::MAX_POOLS_PER_ASSERTION;
use ante_core::error::ConfigError;
use ante_core::types::CallContext;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FactoryConfig {
    /// Upper bound on pools sharing one assertion.
    pub max_pools_per_assertion: usize,
    /// Run the assertion once at creation and refuse pools for a failing one.
    pub check_assertion_on_create: bool,
    /// Gas handed to the creation-time assertion check.
    pub creation_gas_limit: u64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_pools_per_assertion: MAX_POOLS_PER_ASSERTION,
            check_assertion_on_create: true,
            creation_gas_limit: CallContext::DEFAULT_GAS_LIMIT,
        }
    }
}

impl FactoryConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pools_per_assertion == 0 {
            return Err(ConfigError::Invalid("max_pools_per_assertion must be non-zero".into()));
        }
        if self.check_assertion_on_create && self.creation_gas_limit == 0 {
            return Err(ConfigError::Invalid("creation_gas_limit must be non-zero".into()));
        }
        Ok(())
    }
}
