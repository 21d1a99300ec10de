use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use skua::http::Status;
use skua::parser::Request;
use skua::url_map::{Response, UrlMap};
use skua::{Config, Server};

fn hello(_req: &Request, resp: &mut Response) -> Status {
    resp.body.extend_from_slice(b"hello");
    Status::Ok
}

fn echo_path(req: &Request, resp: &mut Response) -> Status {
    resp.body.extend_from_slice(req.path.as_bytes());
    Status::Ok
}

fn default_map() -> UrlMap {
    let mut map = UrlMap::new();
    map.add("/", hello);
    map.add("/echo", echo_path);
    map
}

struct TestServer {
    port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(keep_alive_timeout: u32) -> Self {
        Self::start_with(default_map(), keep_alive_timeout)
    }

    fn start_with(map: UrlMap, keep_alive_timeout: u32) -> Self {
        let config = Config {
            port: 0,
            keep_alive_timeout,
            workers: Some(2),
            fd_limit: Some(512),
            ..Config::default()
        };
        let server = Server::bind(config).expect("bind");
        let port = server.local_port();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            server.run(map, flag).expect("run");
        });
        TestServer {
            port,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn stop(&mut self) -> Duration {
        self.shutdown.store(true, Ordering::Release);
        let start = Instant::now();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("server thread");
        }
        start.elapsed()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one response: head through the blank line, then Content-Length body.
fn read_response(stream: &mut TcpStream) -> (u16, String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).expect("read head");
        assert!(n > 0, "connection closed before response head");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");
    let content_length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .expect("Content-Length header")
        .trim()
        .parse()
        .expect("numeric length");

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).expect("read body");
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    (status, head, String::from_utf8_lossy(&body).to_string())
}

fn expect_eof(stream: &mut TcpStream) {
    let mut chunk = [0u8; 64];
    match stream.read(&mut chunk) {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {} more bytes", n),
        Err(e) => panic!("expected close, got error: {}", e),
    }
}

#[test]
fn single_request_connection_close() {
    let server = TestServer::start(15);
    let mut stream = server.connect();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, head, body) = read_response(&mut stream);

    assert_eq!(status, 200);
    assert!(head.contains("Connection: close"));
    assert!(head.contains("Content-Type: text/plain"));
    assert_eq!(body, "hello");
    expect_eof(&mut stream);
}

#[test]
fn keep_alive_serves_consecutive_requests() {
    let server = TestServer::start(15);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /echo/one HTTP/1.1\r\nHost: test\r\n\r\n")
        .unwrap();
    let (status, head, body) = read_response(&mut stream);
    assert_eq!(status, 200);
    assert!(head.contains("Connection: keep-alive"));
    assert_eq!(body, "/echo/one");

    stream
        .write_all(b"GET /echo/two HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, 200);
    assert_eq!(body, "/echo/two");
    expect_eof(&mut stream);
}

#[test]
fn idle_keep_alive_connection_is_expired() {
    let server = TestServer::start(1);
    let mut stream = server.connect();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n")
        .unwrap();
    let (status, head, _) = read_response(&mut stream);
    assert_eq!(status, 200);
    assert!(head.contains("Connection: keep-alive"));

    // One tick to advance the clock past the deadline, plus margin.
    let start = Instant::now();
    expect_eof(&mut stream);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn unmapped_prefix_is_not_found() {
    let mut map = UrlMap::new();
    map.add("/echo", echo_path);
    let server = TestServer::start_with(map, 15);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, 404);
    assert_eq!(body, "Not found");
    expect_eof(&mut stream);
}

#[test]
fn malformed_request_gets_bad_request() {
    let server = TestServer::start(15);
    let mut stream = server.connect();

    stream
        .write_all(b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n")
        .unwrap();
    let (status, head, _) = read_response(&mut stream);
    assert_eq!(status, 400);
    assert!(head.contains("Connection: close"));
    expect_eof(&mut stream);
}

#[test]
fn shutdown_with_active_keep_alive_connections_is_prompt() {
    let mut server = TestServer::start(60);
    let mut stream = server.connect();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n")
        .unwrap();
    let (status, _, _) = read_response(&mut stream);
    assert_eq!(status, 200);

    // Workers are woken through their notifiers; the acceptor notices the
    // flag within one poll interval.
    let elapsed = server.stop();
    assert!(elapsed < Duration::from_secs(3), "shutdown took {:?}", elapsed);
    expect_eof(&mut stream);
}
