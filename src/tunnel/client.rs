use crate::constants::buffers::IO_CHUNK_SIZE;
use crate::constants::limits::{MAX_HEADER_BYTES, MAX_RESPONSE_BYTES};
use crate::constants::network::POLL_INTERVAL_MS;
use crate::errors::KenshoError;
use crate::services::logger::Logger;
use crate::tunnel::http::{self, ResponseHead, Target, ACCEPT_EVENT_STREAM, CONTENT_TYPE_JSON};
use crate::tunnel::stream::TunnelEventStream;
use crate::tunnel::{TunnelConnection, TunnelStream};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn is_pending(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

/// Reads at least one byte (or EOF as `Ok(0)`), polling until `deadline`.
pub(crate) fn read_some(
    stream: &mut dyn TunnelStream,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Result<usize, KenshoError> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(err) if is_pending(&err) => {
                if deadline_passed(deadline) {
                    return Err(KenshoError::timeout("Timed out waiting for tunneled response"));
                }
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                return Err(KenshoError::transport(format!(
                    "Tunnel read failed: {}",
                    err
                )))
            }
        }
    }
}

fn write_all_until(
    stream: &mut dyn TunnelStream,
    mut data: &[u8],
    deadline: Instant,
) -> Result<(), KenshoError> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(KenshoError::transport("Tunnel closed while sending request")),
            Ok(n) => data = &data[n..],
            Err(err) if is_pending(&err) => {
                if Instant::now() >= deadline {
                    return Err(KenshoError::timeout("Timed out sending tunneled request"));
                }
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                return Err(KenshoError::transport(format!(
                    "Tunnel write failed: {}",
                    err
                )))
            }
        }
    }
    loop {
        match stream.flush() {
            Ok(()) => return Ok(()),
            Err(err) if is_pending(&err) => {
                if Instant::now() >= deadline {
                    return Err(KenshoError::timeout("Timed out sending tunneled request"));
                }
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                return Err(KenshoError::transport(format!(
                    "Tunnel flush failed: {}",
                    err
                )))
            }
        }
    }
}

/// Dials, sends the request and reads the response head.
/// Returns the live stream, the parsed head and any body bytes already read.
fn send_and_read_head(
    tunnel: &dyn TunnelConnection,
    target: &Target,
    method: &str,
    payload: Option<&[u8]>,
    accept: &str,
    deadline: Instant,
) -> Result<(Box<dyn TunnelStream>, ResponseHead, Vec<u8>), KenshoError> {
    let request = http::encode_request(method, target, payload, accept)?;
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(KenshoError::timeout("Timed out before dialing tunnel"));
    }
    let mut stream = tunnel.dial(&target.host, target.port, remaining)?;
    if Instant::now() >= deadline {
        return Err(KenshoError::timeout("Timed out dialing through tunnel"));
    }
    write_all_until(stream.as_mut(), &request, deadline)?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; IO_CHUNK_SIZE];
    loop {
        let n = read_some(stream.as_mut(), &mut chunk, Some(deadline))?;
        if n == 0 {
            return Err(KenshoError::transport(
                "Tunnel closed before a response was received",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = http::find_head_end(&buf) {
            let head = http::parse_head(&buf[..end])?;
            let rest = buf.split_off(end);
            return Ok((stream, head, rest));
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(KenshoError::transport("Response headers too large"));
        }
    }
}

fn read_body(
    stream: &mut dyn TunnelStream,
    method: &str,
    head: &ResponseHead,
    initial: &[u8],
    deadline: Instant,
) -> Result<Vec<u8>, KenshoError> {
    let mut decoder = head.body_decoder(method)?;
    let mut body = Vec::new();
    decoder.feed(initial, &mut body)?;
    let mut chunk = [0u8; IO_CHUNK_SIZE];
    while !decoder.is_done() {
        let n = read_some(stream, &mut chunk, Some(deadline))?;
        if n == 0 {
            decoder.finish()?;
            break;
        }
        decoder.feed(&chunk[..n], &mut body)?;
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(KenshoError::transport(format!(
                "Response body exceeds {} bytes",
                MAX_RESPONSE_BYTES
            )));
        }
    }
    Ok(body)
}

/// Request/response transport over an established tunnel.
///
/// Every call opens its own sub-connection and releases it before returning,
/// whether the call succeeded, failed or timed out. Nothing is retried.
#[derive(Clone)]
pub struct TunnelClient {
    logger: Logger,
}

impl TunnelClient {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("tunnel"),
        }
    }

    /// Sends `method target` with an optional JSON payload and returns the body of a 2xx
    /// response. Other statuses become `Remote` errors carrying the body verbatim.
    pub async fn request(
        &self,
        tunnel: Arc<dyn TunnelConnection>,
        target: &str,
        method: &str,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<u8>, KenshoError> {
        let client = self.clone();
        let target = target.to_string();
        let method = method.to_string();
        tokio::task::spawn_blocking(move || {
            client.request_blocking(tunnel.as_ref(), &target, &method, payload.as_deref(), timeout)
        })
        .await
        .map_err(|err| KenshoError::transport(format!("Tunnel request task failed: {}", err)))?
    }

    pub fn request_blocking(
        &self,
        tunnel: &dyn TunnelConnection,
        target: &str,
        method: &str,
        payload: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, KenshoError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let parsed = http::parse_target(target)?;
        self.logger.debug(
            "request",
            Some(&serde_json::json!({
                "method": method,
                "target": target,
                "payload_bytes": payload.map(|p| p.len()).unwrap_or(0),
                "timeout_ms": timeout.as_millis() as u64,
            })),
        );

        let result = send_and_read_head(
            tunnel,
            &parsed,
            method,
            payload,
            CONTENT_TYPE_JSON,
            deadline,
        )
        .and_then(|(mut stream, head, rest)| {
            let body = read_body(stream.as_mut(), method, &head, &rest, deadline)?;
            drop(stream);
            if head.is_success() {
                Ok(body)
            } else {
                Err(KenshoError::remote(head.status, body))
            }
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(body) => self.logger.debug(
                "response",
                Some(&serde_json::json!({
                    "target": target,
                    "bytes": body.len(),
                    "elapsed_ms": elapsed_ms,
                })),
            ),
            Err(err) => self.logger.warn(
                "request failed",
                Some(&serde_json::json!({
                    "target": target,
                    "code": err.code,
                    "status": err.status(),
                    "error": err.message,
                    "elapsed_ms": elapsed_ms,
                })),
            ),
        }
        result
    }

    /// Opens a long-lived `GET` feed (server-sent events). `connect_timeout` bounds
    /// dialing and the response head; reading the body is unbounded until the
    /// caller closes the stream.
    pub async fn open_stream(
        &self,
        tunnel: Arc<dyn TunnelConnection>,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<TunnelEventStream, KenshoError> {
        let client = self.clone();
        let target = target.to_string();
        tokio::task::spawn_blocking(move || {
            client.open_stream_blocking(tunnel.as_ref(), &target, connect_timeout)
        })
        .await
        .map_err(|err| KenshoError::transport(format!("Tunnel stream task failed: {}", err)))?
    }

    pub fn open_stream_blocking(
        &self,
        tunnel: &dyn TunnelConnection,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<TunnelEventStream, KenshoError> {
        let deadline = Instant::now() + connect_timeout;
        let parsed = http::parse_target(target)?;
        self.logger
            .debug("open stream", Some(&serde_json::json!({ "target": target })));
        let (mut stream, head, rest) =
            send_and_read_head(tunnel, &parsed, "GET", None, ACCEPT_EVENT_STREAM, deadline)?;
        if !head.is_success() {
            let body = read_body(stream.as_mut(), "GET", &head, &rest, deadline)?;
            return Err(KenshoError::remote(head.status, body));
        }
        let decoder = head.body_decoder("GET")?;
        TunnelEventStream::new(stream, decoder, &rest)
    }
}
