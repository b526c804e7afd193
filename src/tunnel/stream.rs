use crate::constants::buffers::IO_CHUNK_SIZE;
use crate::errors::KenshoError;
use crate::tunnel::client::read_some;
use crate::tunnel::http::BodyDecoder;
use crate::tunnel::TunnelStream;
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// One server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct EventBuilder {
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl EventBuilder {
    /// Applies one line; returns a complete event on a blank line.
    ///
    /// A block without `data:` lines is dropped. The last seen `id:` sticks
    /// to every following event until the server sends another.
    fn push_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            return Some(ServerEvent {
                event,
                data: std::mem::take(&mut self.data).join("\n"),
                id: self.last_id.clone(),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Body of a long-lived tunneled response.
///
/// `Read` yields the decoded body bytes and blocks (polling) until data arrives
/// or the remote side ends the stream; `next_event` parses server-sent events.
pub struct TunnelEventStream {
    stream: Option<Box<dyn TunnelStream>>,
    decoder: BodyDecoder,
    decoded: Vec<u8>,
    offset: usize,
    idle_timeout: Option<Duration>,
    builder: EventBuilder,
    line: Vec<u8>,
    finished: bool,
}

impl TunnelEventStream {
    pub(crate) fn new(
        stream: Box<dyn TunnelStream>,
        mut decoder: BodyDecoder,
        initial: &[u8],
    ) -> Result<Self, KenshoError> {
        let mut decoded = Vec::new();
        decoder.feed(initial, &mut decoded)?;
        Ok(Self {
            stream: Some(stream),
            decoder,
            decoded,
            offset: 0,
            idle_timeout: None,
            builder: EventBuilder::default(),
            line: Vec::new(),
            finished: false,
        })
    }

    /// Fails reads that see no data for `timeout`. Unset by default.
    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Releases the sub-connection. Further reads return EOF.
    pub fn close(&mut self) {
        self.stream = None;
        self.finished = true;
        self.decoded.clear();
        self.offset = 0;
    }

    /// Pulls more decoded bytes into the buffer. Returns `false` at end of stream.
    fn fill(&mut self) -> Result<bool, KenshoError> {
        while self.offset >= self.decoded.len() {
            self.decoded.clear();
            self.offset = 0;
            if self.finished || self.decoder.is_done() {
                self.finished = true;
                return Ok(false);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(false);
            };
            let deadline = self.idle_timeout.map(|t| Instant::now() + t);
            let mut chunk = [0u8; IO_CHUNK_SIZE];
            let n = read_some(stream.as_mut(), &mut chunk, deadline)?;
            if n == 0 {
                self.finished = true;
                self.stream = None;
                self.decoder.finish()?;
                return Ok(false);
            }
            self.decoder.feed(&chunk[..n], &mut self.decoded)?;
        }
        Ok(true)
    }

    /// Next complete event, or `None` once the stream has ended.
    pub fn next_event(&mut self) -> Result<Option<ServerEvent>, KenshoError> {
        loop {
            if !self.fill()? {
                if !self.line.is_empty() {
                    let line = String::from_utf8_lossy(&self.line).to_string();
                    self.line.clear();
                    self.builder.push_line(line.trim_end_matches('\r'));
                }
                return Ok(self.builder.push_line(""));
            }
            while self.offset < self.decoded.len() {
                let byte = self.decoded[self.offset];
                self.offset += 1;
                if byte != b'\n' {
                    self.line.push(byte);
                    continue;
                }
                let line = String::from_utf8_lossy(&self.line).to_string();
                self.line.clear();
                if let Some(event) = self.builder.push_line(line.trim_end_matches('\r')) {
                    return Ok(Some(event));
                }
            }
        }
    }
}

impl Read for TunnelEventStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let more = self.fill().map_err(|err| {
            let kind = if err.retryable {
                io::ErrorKind::TimedOut
            } else {
                io::ErrorKind::Other
            };
            io::Error::new(kind, err.message)
        })?;
        if !more {
            return Ok(0);
        }
        let available = &self.decoded[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Drop for TunnelEventStream {
    fn drop(&mut self) {
        self.close();
    }
}
