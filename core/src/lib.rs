pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod interpreter;
pub mod parser;
pub mod rpc;
pub mod server;
pub mod types;

// Re-export main types
pub use types::*;

// Re-export the entry points for convenience
pub use compiler::{CompiledForm, CompiledRef};
pub use engine::{compile, run, validate, Engine, RunError};
pub use interpreter::{CapabilityRegistry, CapabilityResolver, ResolveRequest};
