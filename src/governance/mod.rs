//! Shared governance state: circuit breakers and rate quotas.

pub mod circuit_breaker;
pub mod rate_limit;

use std::sync::Arc;

use crate::config::GovernanceConfig;
use crate::error::KilnError;

pub use circuit_breaker::{BreakerPermit, BreakerStatus, CircuitBreakerRegistry};
pub use rate_limit::RateGovernor;

/// Process-lifetime governance service.
///
/// Clone the `Arc` into every pipeline; all mutation goes through the
/// breaker and governor APIs.
#[derive(Debug)]
pub struct Governance {
    breakers: CircuitBreakerRegistry,
    rates: RateGovernor,
    config: GovernanceConfig,
}

impl Governance {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(config.failure_threshold, config.cooldown()),
            rates: RateGovernor::new(config.rate_limit_calls, config.rate_limit_window()),
            config,
        }
    }

    pub fn shared(config: GovernanceConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn rates(&self) -> &RateGovernor {
        &self.rates
    }

    /// Admission control: breaker first, then the rate counter.
    ///
    /// A rate rejection drops the breaker permit unresolved, so a half-open
    /// trial slot is not consumed by a call that never ran.
    pub fn admit(&self, principal: &str, tool: &str) -> Result<BreakerPermit, KilnError> {
        let permit = self.breakers.admit(tool)?;
        self.rates.try_acquire(principal, tool)?;
        Ok(permit)
    }
}
