use kensho::errors::ErrorKind;
use kensho::services::logger::Logger;
use kensho::services::node_api::{NodeApi, Timeouts};
use kensho::tunnel::{TunnelClient, TunnelConnection};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;
use common::{read_request, respond, serve_once, LoopbackTunnel};

fn client() -> TunnelClient {
    TunnelClient::new(Logger::new("test"))
}

fn tunnel() -> Arc<dyn TunnelConnection> {
    Arc::new(LoopbackTunnel::new())
}

#[tokio::test]
async fn silent_target_times_out_within_deadline() {
    let (port, _server) = serve_once(|mut stream| {
        let _ = read_request(&mut stream);
        std::thread::sleep(Duration::from_secs(3));
    });

    let started = Instant::now();
    let err = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/status", port),
            "GET",
            None,
            Duration::from_secs(1),
        )
        .await
        .expect_err("silent server must time out");

    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.retryable);
    assert!(started.elapsed() < Duration::from_millis(1_900));
}

#[tokio::test]
async fn timed_out_request_releases_its_sub_connection() {
    let (tx, rx) = std::sync::mpsc::channel();
    let (port, server) = serve_once(move |mut stream| {
        let _ = read_request(&mut stream);
        let received = Instant::now();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).expect("client should hang up, not stall");
        tx.send((n, received.elapsed())).expect("send");
    });

    let err = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/status", port),
            "GET",
            None,
            Duration::from_millis(500),
        )
        .await
        .expect_err("silent server must time out");
    server.join().expect("server thread");

    assert!(err.retryable);
    let (n, closed_after) = rx.recv().expect("server saw the socket");
    assert_eq!(n, 0);
    assert!(closed_after < Duration::from_secs(2));
}

#[tokio::test]
async fn head_response_is_not_framed_by_content_length() {
    let (port, server) = serve_once(|mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.request_line(), "HEAD /status HTTP/1.1");
        respond(
            &mut stream,
            "200 OK",
            &[("Content-Length", "5"), ("Connection", "close")],
            b"",
        );
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("read timeout");
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).expect("client hang-up"), 0);
    });

    let started = Instant::now();
    let body = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/status", port),
            "HEAD",
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("head request");
    assert!(body.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    server.join().expect("server thread");
}

#[tokio::test]
async fn non_success_status_surfaces_body_verbatim() {
    let (port, server) = serve_once(|mut stream| {
        let _ = read_request(&mut stream);
        let body = br#"{"error":"bad path"}"#;
        respond(
            &mut stream,
            "404 Not Found",
            &[
                ("Content-Type", "application/json"),
                ("Content-Length", &body.len().to_string()),
            ],
            body,
        );
    });

    let err = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/nope", port),
            "GET",
            None,
            Duration::from_secs(5),
        )
        .await
        .expect_err("404 is an error");
    server.join().expect("server thread");

    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.body(), Some(&br#"{"error":"bad path"}"#[..]));
}

#[tokio::test]
async fn get_sends_expected_head_and_returns_body() {
    let (tx, rx) = std::sync::mpsc::channel();
    let (port, server) = serve_once(move |mut stream| {
        let request = read_request(&mut stream);
        tx.send((
            request.request_line().to_string(),
            request.header("host"),
            request.header("content-type"),
            request.header("connection"),
        ))
        .expect("send");
        respond(
            &mut stream,
            "200 OK",
            &[("Content-Length", "11")],
            b"{\"ok\":true}",
        );
    });

    let body = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/status?verbose=1", port),
            "get",
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("request");
    server.join().expect("server thread");

    assert_eq!(body, b"{\"ok\":true}");
    let (line, host, content_type, connection) = rx.recv().expect("request seen");
    assert_eq!(line, "GET /status?verbose=1 HTTP/1.1");
    assert_eq!(host, Some(format!("localhost:{}", port)));
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(connection.as_deref(), Some("close"));
}

#[tokio::test]
async fn decodes_chunked_and_close_delimited_bodies() {
    let (port, server) = serve_once(|mut stream| {
        let _ = read_request(&mut stream);
        respond(
            &mut stream,
            "200 OK",
            &[("Transfer-Encoding", "chunked")],
            b"4\r\nnode\r\n7\r\n-status\r\n0\r\n\r\n",
        );
    });
    let body = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/", port),
            "GET",
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("chunked request");
    server.join().expect("server thread");
    assert_eq!(body, b"node-status");

    let (port, server) = serve_once(|mut stream| {
        let _ = read_request(&mut stream);
        respond(&mut stream, "200 OK", &[], b"until close");
    });
    let body = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/", port),
            "GET",
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("close-delimited request");
    server.join().expect("server thread");
    assert_eq!(body, b"until close");
}

#[tokio::test]
async fn post_payload_reaches_server() {
    let (port, server) = serve_once(|mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.request_line(), "POST /echo HTTP/1.1");
        respond(
            &mut stream,
            "201 Created",
            &[("Content-Length", &request.body.len().to_string())],
            &request.body,
        );
    });

    let body = client()
        .request(
            tunnel(),
            &format!("http://localhost:{}/echo", port),
            "POST",
            Some(br#"{"command":"start"}"#.to_vec()),
            Duration::from_secs(5),
        )
        .await
        .expect("post");
    server.join().expect("server thread");
    assert_eq!(body, br#"{"command":"start"}"#);
}

#[tokio::test]
async fn rejects_non_http_targets_without_dialing() {
    let err = client()
        .request(
            tunnel(),
            "https://localhost:8282/status",
            "GET",
            None,
            Duration::from_secs(1),
        )
        .await
        .expect_err("https is not tunneled");
    assert_eq!(err.kind, ErrorKind::InvalidParams);
}

#[tokio::test]
async fn closed_tunnel_fails_with_transport_error() {
    let loopback = Arc::new(LoopbackTunnel::new());
    loopback.close();
    let err = client()
        .request(
            loopback,
            "http://localhost:1/status",
            "GET",
            None,
            Duration::from_secs(1),
        )
        .await
        .expect_err("closed tunnel");
    assert_eq!(err.kind, ErrorKind::Transport);
}

#[tokio::test]
async fn event_stream_yields_events_until_server_closes() {
    let (port, server) = serve_once(|mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.header("accept").as_deref(), Some("text/event-stream"));
        respond(
            &mut stream,
            "200 OK",
            &[("Content-Type", "text/event-stream")],
            b"event: block\ndata: {\"height\":10}\n\n",
        );
        std::thread::sleep(Duration::from_millis(100));
        stream.write_all(b"data: second\n\n").expect("write");
    });

    let mut events = client()
        .open_stream(
            tunnel(),
            &format!("http://localhost:{}/events", port),
            Duration::from_secs(5),
        )
        .await
        .expect("open stream");

    let collected = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        while let Some(event) = events.next_event().expect("next event") {
            out.push(event);
        }
        out
    })
    .await
    .expect("reader task");
    server.join().expect("server thread");

    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].event.as_deref(), Some("block"));
    assert_eq!(collected[0].data, "{\"height\":10}");
    assert_eq!(collected[1].data, "second");
}

#[tokio::test]
async fn event_stream_rejects_non_success_status() {
    let (port, server) = serve_once(|mut stream| {
        let _ = read_request(&mut stream);
        let body = br#"{"error":"feed unavailable"}"#;
        respond(
            &mut stream,
            "503 Service Unavailable",
            &[("Content-Length", &body.len().to_string())],
            body,
        );
    });

    let err = client()
        .open_stream(
            tunnel(),
            &format!("http://localhost:{}/events", port),
            Duration::from_secs(5),
        )
        .await
        .err()
        .expect("503 is an error");
    server.join().expect("server thread");

    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.body(), Some(&br#"{"error":"feed unavailable"}"#[..]));
}

#[tokio::test]
async fn node_api_posts_commands_to_execute_endpoint() {
    let (port, server) = serve_once(|mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.request_line(), "POST /api/execute HTTP/1.1");
        let payload: serde_json::Value =
            serde_json::from_slice(&request.body).expect("json payload");
        assert_eq!(
            payload,
            serde_json::json!({
                "command": "sekaid",
                "args": { "exec": ["sekaid", "tx", "--note", "two words"] }
            })
        );
        respond(&mut stream, "200 OK", &[("Content-Length", "2")], b"ok");
    });

    let api = NodeApi::new(client(), tunnel(), port)
        .expect("api")
        .with_timeouts(Timeouts::default());
    let out = api
        .sekaid(&["tx", "--note", "two words"])
        .await
        .expect("execute");
    server.join().expect("server thread");
    assert_eq!(out, b"ok");
}

#[tokio::test]
async fn node_api_parses_status_json() {
    let (port, server) = serve_once(|mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.request_line(), "GET /status HTTP/1.1");
        let body = br#"{"sekai":{"running":true}}"#;
        respond(
            &mut stream,
            "200 OK",
            &[("Content-Length", &body.len().to_string())],
            body,
        );
    });

    let api = NodeApi::new(client(), tunnel(), port).expect("api");
    let status = api.status().await.expect("status");
    server.join().expect("server thread");
    assert_eq!(status["sekai"]["running"], true);
}
