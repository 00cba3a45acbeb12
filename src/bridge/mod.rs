//! Message routing between configured clients.
//!
//! ## Module Structure
//!
//! - `bus`: single-consumer channel from transports to the router
//! - `clients`: client id -> transport registry built from config
//! - `filter`: per-rule nickname and pattern filters
//! - `router`: evaluates rules and dispatches rendered sends
//! - `rules`: endpoints, rule compilation and matching
//! - `template`: `%client_id` / `%author` / `%msg` rendering

pub mod bus;
pub mod clients;
pub mod filter;
pub mod router;
pub mod rules;
pub mod template;

pub use bus::MessageBus;
pub use clients::ClientRegistry;
pub use router::Router;
pub use rules::RuleSet;
