//! Failure isolation: per-provider circuit breakers and health monitoring.

mod circuit_breaker;
mod health;

pub use circuit_breaker::{
    BreakerPolicy, CircuitBreaker, CircuitBreakers, CircuitSnapshot, CircuitStatus,
};
pub use health::{HealthMonitor, HealthPolicy, HealthRecord};
