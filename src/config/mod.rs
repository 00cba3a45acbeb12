//! Configuration parsing, schemas and types.

pub mod env;
pub mod parser;
pub mod schema;
pub mod types;

pub use env::apply_env_overrides;
pub use parser::load_config;
pub use types::*;
