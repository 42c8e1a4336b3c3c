pub mod exchange;
pub mod resolver;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod trace;

use thiserror::Error;

pub use crate::core::Resolver;
pub use exchange::{ExchangeError, Exchanger, UdpExchanger};
pub use resolver::{IterativeResolver, IterativeResolverBuilder};
pub use trace::{RecordingSink, TraceEvent, TraceSink, TracingSink};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid query type: {0}")]
    InvalidQueryType(String),

    #[error("invalid domain name: {0}")]
    InvalidName(String),

    #[error("no root nameservers in hints")]
    NoRootNameservers,

    #[error("maximum recursion depth reached: {0}")]
    MaxRecursion(usize),

    #[error("maximum name servers queried: {0}")]
    MaxNameservers(usize),

    #[error("maximum name server IPs queried: {0}")]
    MaxIps(usize),

    #[error("DNS resolution cancelled")]
    Cancelled,

    #[error("DNS resolution deadline exceeded")]
    DeadlineExceeded,
}

impl ResolveError {
    /// Errors that must abort every level of an in-progress resolution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Guardrail violations.
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::MaxRecursion(_) | Self::MaxNameservers(_) | Self::MaxIps(_))
    }
}
