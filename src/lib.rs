/// Bottin - An iterative DNS resolver
///
/// This library resolves names by walking the delegation chain from the
/// root nameservers, caching what it learns along the way.
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod convert;
pub mod core;
pub mod dns;
pub mod root;

// Re-export core types for convenience
pub use crate::core::*;
pub use cache::TtlCache;
pub use context::ResolveContext;
pub use dns::{IterativeResolver, ResolveError};
