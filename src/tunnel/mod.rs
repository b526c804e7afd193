//! Authenticated tunnel seam and everything that runs over it.
//!
//! A [`TunnelConnection`] is supplied from outside (normally [`ssh::SshTunnel`]);
//! this module owns how it is used: request dispatch ([`client`]), long-lived
//! feeds ([`stream`]) and termination reporting ([`liveness`]).

pub mod client;
pub mod http;
pub mod liveness;
pub mod ssh;
pub mod stream;

use crate::errors::KenshoError;
use std::io::{Read, Write};
use std::time::Duration;

/// A sub-connection opened through a tunnel.
///
/// Reads and writes that cannot make progress yet must return
/// `io::ErrorKind::WouldBlock` (or `TimedOut`) instead of blocking indefinitely;
/// callers poll and enforce their own deadlines. Dropping the stream releases it.
pub trait TunnelStream: Read + Write + Send {}

impl<T: Read + Write + Send> TunnelStream for T {}

pub trait TunnelConnection: Send + Sync {
    /// Opens a sub-connection to `host:port` as seen from the remote side.
    fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn TunnelStream>, KenshoError>;

    /// Blocks until the connection terminates. `Ok(())` means a clean close.
    fn wait(&self) -> Result<(), KenshoError>;

    /// Closes the connection; a blocked `wait` returns `Ok(())`.
    fn close(&self);

    fn describe(&self) -> String {
        "tunnel".to_string()
    }
}

pub use client::TunnelClient;
pub use liveness::{LivenessState, LivenessSupervisor, LivenessWatch, Termination};
pub use ssh::{SshConnectOptions, SshTunnel};
pub use stream::{ServerEvent, TunnelEventStream};
