//! End-to-end tests: a real server on loopback, driven by blocking clients.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use fortuna_core::ServerConfig;
use fortuna_http::{Server, ShutdownHandle};
use fortuna_store::{seed, Fortune, RecordStore, FORTUNES};
use socket2::{Domain, Protocol, Socket, Type};

struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn config() -> ServerConfig {
        ServerConfig::new()
            .listen("127.0.0.1:0".parse().unwrap())
            .num_workers(2)
            .tick(Duration::from_millis(100))
            .handle_signals(false)
    }

    fn start(input_buffer_size: usize) -> Self {
        Self::start_with(Self::config().input_buffer_size(input_buffer_size))
    }

    fn start_with(config: ServerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Fortune> = RecordStore::open(dir.path().join("e2e.db")).unwrap();
        seed(&store, &FORTUNES).unwrap();

        let server = Server::bind(config, Arc::new(store)).unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let thread = std::thread::spawn(move || server.run().unwrap());

        Self {
            addr,
            shutdown,
            thread: Some(thread),
            _dir: dir,
        }
    }

    fn connect(&self) -> Client {
        Client::wrap(TcpStream::connect(self.addr).unwrap())
    }

    /// Connect with a small receive window so the server's sends block.
    fn connect_narrow(&self) -> Client {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        socket.connect(&self.addr.into()).unwrap();
        Client::wrap(socket.into())
    }
}

impl Client {
    fn wrap(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            stream,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown().unwrap();
        if let Some(t) = self.thread.take() {
            t.join().unwrap();
        }
    }
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

#[derive(Debug)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Client {
    fn send(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).unwrap();
    }

    fn get(&mut self, path: &str) -> Reply {
        self.send(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes());
        self.read_reply()
    }

    fn read_reply(&mut self) -> Reply {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        let status: u16 = line
            .split(' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("bad status line {line:?}"));

        let mut headers = Vec::new();
        loop {
            line.clear();
            self.reader.read_line(&mut line).unwrap();
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            let (name, value) = trimmed.split_once(':').unwrap();
            headers.push((name.to_string(), value.trim().to_string()));
        }

        let len: usize = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).unwrap();
        Reply {
            status,
            headers,
            body: String::from_utf8(body).unwrap(),
        }
    }

    /// True once the server has closed the connection.
    fn at_eof(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.reader.read(&mut buf), Ok(0) | Err(_))
    }
}

#[test]
fn test_plaintext() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    let reply = client.get("/plaintext");

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "Hello, world!\n");
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(reply.header("server"), Some("fortuna"));
    let date = reply.header("date").unwrap();
    assert_eq!(date.len(), 29);
    assert!(date.ends_with(" GMT"));
}

#[test]
fn test_fortunes_listing() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    let reply = client.get("/fortunes");

    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("text/html; charset=utf-8"));
    let html = &reply.body;
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert_eq!(html.matches("<tr><td>").count(), FORTUNES.len() + 1);

    let messages: Vec<&str> = html
        .split("<tr><td>")
        .skip(1)
        .map(|row| {
            let start = row.find("</td><td>").unwrap() + "</td><td>".len();
            let end = row.find("</td></tr>").unwrap();
            &row[start..end]
        })
        .collect();
    let mut sorted = messages.clone();
    sorted.sort();
    assert_eq!(messages, sorted, "rows must be sorted by message");

    assert!(messages.contains(&"Additional fortune added at request time."));
    assert!(messages[0].starts_with("&lt;script&gt;alert(&quot;"));
    assert!(!html.contains("<script>"));
    assert_eq!(messages.last(), Some(&"フレームワークのベンチマーク"));
}

#[test]
fn test_pipelined_requests_keep_order_and_connection() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    client.send(
        b"GET /plaintext HTTP/1.1\r\nHost: a\r\n\r\n\
          GET /fortunes HTTP/1.1\r\nHost: a\r\n\r\n",
    );

    let first = client.read_reply();
    let second = client.read_reply();
    assert_eq!(first.body, "Hello, world!\n");
    assert!(second.body.contains("<table>"));

    let third = client.get("/plaintext");
    assert_eq!(third.status, 200);
    assert_eq!(third.body, "Hello, world!\n");
}

#[test]
fn test_pipelined_output_survives_partial_writes() {
    const DEPTH: usize = 200;
    let server = TestServer::start_with(
        TestServer::config()
            .input_buffer_size(1024)
            .output_limit(1024),
    );
    let mut client = server.connect_narrow();
    client.send(&b"GET /fortunes HTTP/1.1\r\nHost: a\r\n\r\n".repeat(DEPTH));
    // Let the server fill the socket and wait for write readiness.
    std::thread::sleep(Duration::from_millis(100));

    for i in 0..DEPTH {
        let reply = client.read_reply();
        assert_eq!(reply.status, 200, "response {i}");
        assert!(reply.body.ends_with("</table></body></html>"), "response {i}");
    }
    assert_eq!(client.get("/plaintext").body, "Hello, world!\n");
}

#[test]
fn test_request_split_across_writes() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    client.send(b"GET /plain");
    std::thread::sleep(Duration::from_millis(20));
    client.send(b"text HTTP/1.1\r\nHo");
    std::thread::sleep(Duration::from_millis(20));
    client.send(b"st: a\r\n\r\n");
    assert_eq!(client.read_reply().body, "Hello, world!\n");
}

#[test]
fn test_buffer_exhaustion_gets_431_then_close() {
    let server = TestServer::start(256);
    let mut client = server.connect();

    let mut raw = b"GET /plaintext HTTP/1.1\r\nX-Filler: ".to_vec();
    raw.resize(256, b'a');
    client.send(&raw);

    let reply = client.read_reply();
    assert_eq!(reply.status, 431);
    assert_eq!(reply.header("connection"), Some("close"));
    assert!(client.at_eof());
}

#[test]
fn test_not_found_and_method_not_allowed() {
    let server = TestServer::start(1024);
    let mut client = server.connect();

    let reply = client.get("/missing");
    assert_eq!(reply.status, 404);

    client.send(b"POST /plaintext HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
    let reply = client.read_reply();
    assert_eq!(reply.status, 405);
    assert_eq!(reply.header("allow"), Some("GET"));

    let reply = client.get("/plaintext");
    assert_eq!(reply.status, 200);
}

#[test]
fn test_malformed_request_gets_400_then_close() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    client.send(b"NOT HTTP AT ALL\r\n\r\n");
    let reply = client.read_reply();
    assert_eq!(reply.status, 400);
    assert!(client.at_eof());
}

#[test]
fn test_connection_close_is_honoured() {
    let server = TestServer::start(1024);
    let mut client = server.connect();
    client.send(b"GET /plaintext HTTP/1.1\r\nConnection: close\r\n\r\n");
    let reply = client.read_reply();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("connection"), Some("close"));
    assert!(client.at_eof());
}

#[test]
fn test_many_connections_across_workers() {
    let server = TestServer::start(1024);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mut client = server.connect();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(client.get("/plaintext").status, 200);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
