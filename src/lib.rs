//! Remote administration core for validator nodes: encrypted per-host credentials,
//! a durable host registry and request/stream transport over an SSH tunnel.

pub mod app;
pub mod constants;
pub mod errors;
pub mod services;
pub mod stores;
pub mod tunnel;
pub mod utils;

pub use app::App;
pub use errors::{ErrorKind, KenshoError};
