//! HTTP/1.1 framing for requests carried over a tunnel sub-connection.

use crate::constants::limits::MAX_HEADER_BYTES;
use crate::errors::KenshoError;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";

/// Where a request goes: the tunnel dials `host:port`, the request line carries `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub host_header: String,
}

pub fn parse_target(address: &str) -> Result<Target, KenshoError> {
    let url = url::Url::parse(address.trim()).map_err(|err| {
        KenshoError::invalid_params(format!("Invalid target address <{}>: {}", address, err))
    })?;
    if url.scheme() != "http" {
        return Err(KenshoError::invalid_params(format!(
            "Unsupported scheme '{}' for tunneled request (only http)",
            url.scheme()
        )));
    }
    let host = match url.host() {
        Some(url::Host::Domain(domain)) => domain.to_string(),
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        None => {
            return Err(KenshoError::invalid_params(format!(
                "Target address <{}> has no host",
                address
            )))
        }
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    let host_header = match url.host() {
        Some(url::Host::Ipv6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    };
    Ok(Target {
        host,
        port,
        path,
        host_header,
    })
}

fn normalize_method(method: &str) -> Result<String, KenshoError> {
    let method = method.trim().to_uppercase();
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(KenshoError::invalid_params(format!(
            "Invalid HTTP method '{}'",
            method
        )));
    }
    Ok(method)
}

pub fn encode_request(
    method: &str,
    target: &Target,
    body: Option<&[u8]>,
    accept: &str,
) -> Result<Vec<u8>, KenshoError> {
    let method = normalize_method(method)?;
    let body = body.unwrap_or_default();
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: kensho/{}\r\nAccept: {}\r\nConnection: close\r\n",
        method,
        target.path,
        target.host_header,
        env!("CARGO_PKG_VERSION"),
        accept
    );
    head.push_str(&format!("Content-Type: {}\r\n", CONTENT_TYPE_JSON));
    if !body.is_empty() || matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Framing for the body that follows this head. Responses to `HEAD` never
    /// carry a body, whatever their `Content-Length` says.
    pub fn body_decoder(&self, method: &str) -> Result<BodyDecoder, KenshoError> {
        if method.trim().eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            return Ok(BodyDecoder::Length { remaining: 0 });
        }
        if let Some(encoding) = self.header("transfer-encoding") {
            if encoding.to_lowercase().contains("chunked") {
                return Ok(BodyDecoder::Chunked(ChunkedDecoder::default()));
            }
        }
        if let Some(length) = self.header("content-length") {
            let remaining = length.trim().parse::<usize>().map_err(|_| {
                KenshoError::transport(format!("Invalid Content-Length '{}'", length))
            })?;
            return Ok(BodyDecoder::Length { remaining });
        }
        Ok(BodyDecoder::UntilEof)
    }
}

/// Index just past the `\r\n\r\n` that ends the response head.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|idx| idx + 4)
}

pub fn parse_head(raw: &[u8]) -> Result<ResponseHead, KenshoError> {
    if raw.len() > MAX_HEADER_BYTES {
        return Err(KenshoError::transport("Response headers too large"));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| KenshoError::transport("Response headers are not valid UTF-8"))?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(KenshoError::transport(format!(
            "Malformed status line '{}'",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| KenshoError::transport(format!("Malformed status line '{}'", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| KenshoError::transport(format!("Malformed header line '{}'", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ChunkState {
    #[default]
    Size,
    Data(usize),
    DataEnd,
    Trailer,
    Done,
}

/// Incremental `Transfer-Encoding: chunked` decoder.
#[derive(Debug, Clone, Default)]
pub struct ChunkedDecoder {
    state: ChunkState,
    line: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> Result<(), KenshoError> {
        while !input.is_empty() {
            match self.state {
                ChunkState::Size => {
                    let byte = input[0];
                    input = &input[1..];
                    if byte != b'\n' {
                        self.line.push(byte);
                        if self.line.len() > 1024 {
                            return Err(KenshoError::transport("Chunk size line too long"));
                        }
                        continue;
                    }
                    let line = String::from_utf8_lossy(&self.line).to_string();
                    self.line.clear();
                    let size_text = line.trim_end_matches('\r').split(';').next().unwrap_or("");
                    let size = usize::from_str_radix(size_text.trim(), 16).map_err(|_| {
                        KenshoError::transport(format!("Invalid chunk size '{}'", size_text))
                    })?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    let take = remaining.min(input.len());
                    out.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.state = if remaining == take {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - take)
                    };
                }
                ChunkState::DataEnd => {
                    let byte = input[0];
                    input = &input[1..];
                    match byte {
                        b'\r' => {}
                        b'\n' => self.state = ChunkState::Size,
                        _ => return Err(KenshoError::transport("Missing CRLF after chunk")),
                    }
                }
                ChunkState::Trailer => {
                    let byte = input[0];
                    input = &input[1..];
                    if byte != b'\n' {
                        self.line.push(byte);
                        continue;
                    }
                    let blank = self.line.iter().all(|b| *b == b'\r');
                    self.line.clear();
                    if blank {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => break,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum BodyDecoder {
    Length { remaining: usize },
    Chunked(ChunkedDecoder),
    UntilEof,
}

impl BodyDecoder {
    pub fn is_done(&self) -> bool {
        match self {
            BodyDecoder::Length { remaining } => *remaining == 0,
            BodyDecoder::Chunked(decoder) => decoder.is_done(),
            BodyDecoder::UntilEof => false,
        }
    }

    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), KenshoError> {
        match self {
            BodyDecoder::Length { remaining } => {
                let take = (*remaining).min(input.len());
                out.extend_from_slice(&input[..take]);
                *remaining -= take;
                Ok(())
            }
            BodyDecoder::Chunked(decoder) => decoder.feed(input, out),
            BodyDecoder::UntilEof => {
                out.extend_from_slice(input);
                Ok(())
            }
        }
    }

    /// Validates that the peer closing the connection is a legal end of body.
    pub fn finish(&self) -> Result<(), KenshoError> {
        match self {
            BodyDecoder::Length { remaining } if *remaining > 0 => Err(KenshoError::transport(
                format!("Connection closed with {} body bytes outstanding", remaining),
            )),
            BodyDecoder::Chunked(decoder) if !decoder.is_done() => Err(KenshoError::transport(
                "Connection closed inside a chunked body",
            )),
            _ => Ok(()),
        }
    }
}
