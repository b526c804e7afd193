#![allow(dead_code)]

use kensho::errors::KenshoError;
use kensho::tunnel::{TunnelConnection, TunnelStream};
use once_cell::sync::Lazy;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub fn tmp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kensho-{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Tunnel whose sub-connections go to 127.0.0.1, whatever host is requested.
#[derive(Default)]
pub struct LoopbackTunnel {
    outcome: Mutex<Option<Result<(), KenshoError>>>,
    signal: Condvar,
}

impl LoopbackTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends the tunnel with the given cause; only the first call counts.
    pub fn terminate(&self, cause: Result<(), KenshoError>) {
        let mut outcome = self.outcome.lock().expect("lock");
        if outcome.is_none() {
            *outcome = Some(cause);
        }
        self.signal.notify_all();
    }
}

impl TunnelConnection for LoopbackTunnel {
    fn dial(
        &self,
        _host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn TunnelStream>, KenshoError> {
        if self.outcome.lock().expect("lock").is_some() {
            return Err(KenshoError::transport("loopback tunnel closed"));
        }
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nonblocking(true)?;
        Ok(Box::new(stream))
    }

    fn wait(&self) -> Result<(), KenshoError> {
        let outcome = self.outcome.lock().expect("lock");
        let outcome = self
            .signal
            .wait_while(outcome, |outcome| outcome.is_none())
            .expect("wait");
        outcome.clone().unwrap_or(Ok(()))
    }

    fn close(&self) {
        self.terminate(Ok(()));
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

/// Raw request as seen by a test server.
pub struct ReceivedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

pub fn read_request(stream: &mut TcpStream) -> ReceivedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).expect("read request");
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut body = buf[head_end..].to_vec();
    let request = ReceivedRequest {
        head,
        body: Vec::new(),
    };
    let length = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while body.len() < length {
        let n = stream.read(&mut chunk).expect("read body");
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    ReceivedRequest { body, ..request }
}

/// Serves exactly one connection with `handler` on a background thread.
pub fn serve_once<F>(handler: F) -> (u16, std::thread::JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        handler(stream);
    });
    (port, handle)
}

pub fn respond(stream: &mut TcpStream, status_line: &str, headers: &[(&str, &str)], body: &[u8]) {
    let mut out = format!("HTTP/1.1 {}\r\n", status_line);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");
    stream.flush().expect("flush");
}
