use crate::constants::network::{
    KEEPALIVE_INTERVAL_MS, KEEPALIVE_MAX_FAILURES, SESSION_POLL_TIMEOUT_MS, SSH_DEFAULT_PORT,
    TIMEOUT_SSH_READY_MS,
};
use crate::errors::KenshoError;
use crate::services::credentials::Credential;
use crate::services::logger::Logger;
use crate::tunnel::{TunnelConnection, TunnelStream};
use crate::utils::host_id::{join_host_port, split_host_port};
use crate::utils::paths::expand_home_path;
use base64::Engine;
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SshConnectOptions {
    pub host: String,
    pub port: u16,
    pub ready_timeout: Duration,
    pub keepalive_interval: Duration,
    pub passphrase: Option<String>,
    /// Expected host key, `SHA256:<base64>` as printed by `ssh-keygen -l`.
    pub host_key_fingerprint: Option<String>,
}

impl SshConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ready_timeout: Duration::from_millis(TIMEOUT_SSH_READY_MS),
            keepalive_interval: Duration::from_millis(KEEPALIVE_INTERVAL_MS),
            passphrase: None,
            host_key_fingerprint: None,
        }
    }

    pub fn from_host_id(host_id: &str) -> Result<Self, KenshoError> {
        let (host, port) = split_host_port(host_id)?;
        Ok(Self::new(host, port))
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase.filter(|p| !p.is_empty());
        self
    }

    pub fn with_host_key_fingerprint(mut self, fingerprint: Option<&str>) -> Self {
        self.host_key_fingerprint = fingerprint.and_then(normalize_fingerprint_sha256);
        self
    }
}

impl Default for SshConnectOptions {
    fn default() -> Self {
        Self::new("localhost", SSH_DEFAULT_PORT)
    }
}

fn normalize_fingerprint_sha256(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = trimmed.trim_end_matches('=');
    match cleaned.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sha256:") => {
            Some(format!("SHA256:{}", cleaned[7..].trim()))
        }
        _ => Some(format!("SHA256:{}", cleaned)),
    }
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn map_ssh_error(context: &str, err: ssh2::Error) -> KenshoError {
    let io_err: io::Error = err.into();
    match io_err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            KenshoError::timeout(format!("{}: timed out", context))
        }
        _ => KenshoError::transport(format!("{}: {}", context, io_err)),
    }
}

fn connect_tcp(options: &SshConnectOptions) -> Result<TcpStream, KenshoError> {
    let addrs = (options.host.as_str(), options.port)
        .to_socket_addrs()
        .map_err(|err| {
            KenshoError::transport(format!("Failed to resolve {}: {}", options.host, err))
        })?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, options.ready_timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => KenshoError::from(err),
        None => KenshoError::transport(format!("No addresses found for {}", options.host)),
    })
}

fn authenticate(
    session: &Session,
    credential: &Credential,
    passphrase: Option<&str>,
) -> Result<(), KenshoError> {
    let user = credential.user.as_str();
    if credential.is_key_material {
        let secret = credential.secret.trim();
        if secret.starts_with("-----BEGIN") {
            session
                .userauth_pubkey_memory(user, None, secret, passphrase)
                .map_err(|err| map_ssh_error("SSH key authentication failed", err))?;
        } else {
            let path = expand_home_path(secret);
            if !path.exists() {
                return Err(KenshoError::invalid_params(format!(
                    "Private key file {} does not exist",
                    path.display()
                )));
            }
            session
                .userauth_pubkey_file(user, None, &path, passphrase)
                .map_err(|err| map_ssh_error("SSH key authentication failed", err))?;
        }
    } else {
        session
            .userauth_password(user, &credential.secret)
            .map_err(|err| map_ssh_error("SSH password authentication failed", err))?;
    }
    if !session.authenticated() {
        return Err(KenshoError::transport("SSH authentication failed"));
    }
    Ok(())
}

struct SshChannelStream {
    channel: Channel,
}

impl Read for SshChannelStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for SshChannelStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

impl Drop for SshChannelStream {
    fn drop(&mut self) {
        let _ = self.channel.close();
    }
}

/// SSH session used as a tunnel: sub-connections are `direct-tcpip` channels.
pub struct SshTunnel {
    logger: Logger,
    session: Session,
    label: String,
    keepalive_interval: Duration,
    host_key_fingerprint: Option<String>,
    closed: Mutex<bool>,
    signal: Condvar,
}

impl SshTunnel {
    pub fn connect(
        logger: Logger,
        options: &SshConnectOptions,
        credential: &Credential,
    ) -> Result<Self, KenshoError> {
        let label = join_host_port(&options.host, options.port)?;
        let logger = logger.child("ssh");
        logger.info(
            "connecting",
            Some(&serde_json::json!({ "host_id": label, "user": credential.user, "auth": credential.kind_label() })),
        );

        let tcp = connect_tcp(options)?;
        let mut session = Session::new()
            .map_err(|err| map_ssh_error("Failed to create SSH session", err))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(options.ready_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|err| map_ssh_error("SSH handshake failed", err))?;

        let observed = fingerprint_host_key_sha256(&session);
        if let Some(expected) = options.host_key_fingerprint.as_ref() {
            if observed.as_ref() != Some(expected) {
                return Err(KenshoError::transport(format!(
                    "SSH host key mismatch (expected {}, got {})",
                    expected,
                    observed.unwrap_or_else(|| "unknown".to_string())
                )));
            }
        }

        authenticate(&session, credential, options.passphrase.as_deref())?;

        let interval = std::cmp::max(1, options.keepalive_interval.as_secs() as u32);
        session.set_keepalive(true, interval);
        session.set_timeout(SESSION_POLL_TIMEOUT_MS);

        logger.info(
            "connected",
            Some(&serde_json::json!({ "host_id": label, "host_key": observed })),
        );
        Ok(Self {
            logger,
            session,
            label,
            keepalive_interval: options.keepalive_interval.max(Duration::from_secs(1)),
            host_key_fingerprint: observed,
            closed: Mutex::new(false),
            signal: Condvar::new(),
        })
    }

    pub async fn connect_async(
        logger: Logger,
        options: SshConnectOptions,
        credential: Credential,
    ) -> Result<Arc<Self>, KenshoError> {
        tokio::task::spawn_blocking(move || Self::connect(logger, &options, &credential))
            .await
            .map_err(|err| KenshoError::transport(format!("SSH connect task failed: {}", err)))?
            .map(Arc::new)
    }

    pub fn host_key_fingerprint(&self) -> Option<&str> {
        self.host_key_fingerprint.as_deref()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl TunnelConnection for SshTunnel {
    fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn TunnelStream>, KenshoError> {
        if self.is_closed() {
            return Err(KenshoError::transport(format!(
                "SSH tunnel to {} is closed",
                self.label
            )));
        }
        self.session
            .set_timeout(timeout.as_millis().clamp(1, u32::MAX as u128) as u32);
        let channel = self.session.channel_direct_tcpip(host, port, None);
        self.session.set_timeout(SESSION_POLL_TIMEOUT_MS);
        let channel = channel.map_err(|err| {
            self.logger.warn(
                "failed to establish SSH tunnel",
                Some(&serde_json::json!({ "target": format!("{}:{}", host, port) })),
            );
            map_ssh_error("Failed to establish SSH tunnel", err)
        })?;
        Ok(Box::new(SshChannelStream { channel }))
    }

    fn wait(&self) -> Result<(), KenshoError> {
        let mut failures = 0u32;
        loop {
            {
                let closed = self.closed.lock().unwrap_or_else(|err| err.into_inner());
                let (closed, _) = self
                    .signal
                    .wait_timeout_while(closed, self.keepalive_interval, |closed| !*closed)
                    .unwrap_or_else(|err| err.into_inner());
                if *closed {
                    return Ok(());
                }
            }
            match self.session.keepalive_send() {
                Ok(_) => failures = 0,
                Err(err) => {
                    let io_err: io::Error = err.into();
                    let transient = matches!(
                        io_err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    );
                    failures += 1;
                    if !transient || failures >= KEEPALIVE_MAX_FAILURES {
                        if self.is_closed() {
                            return Ok(());
                        }
                        return Err(KenshoError::transport(format!(
                            "SSH connection to {} was lost: {}",
                            self.label, io_err
                        )));
                    }
                }
            }
        }
    }

    fn close(&self) {
        {
            let mut closed = self.closed.lock().unwrap_or_else(|err| err.into_inner());
            if *closed {
                return;
            }
            *closed = true;
        }
        self.signal.notify_all();
        let _ = self.session.disconnect(None, "closed by client", None);
        self.logger
            .info("disconnected", Some(&serde_json::json!({ "host_id": self.label })));
    }

    fn describe(&self) -> String {
        format!("ssh://{}", self.label)
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.close();
    }
}
