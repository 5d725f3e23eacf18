//! Gateway server implementation

mod admin;
pub mod filter;
mod listener;
mod server;

pub use admin::{StatsBody, StatsQuery, create_admin_router};
pub use filter::{ConnectionFilter, ConnectionState, Decision, DenyReason};
pub use listener::MAX_EARLY_DATA;
pub use server::{Gateway, shutdown_signal};
