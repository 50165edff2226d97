//! End-to-end tests against a running server
//!
//! Each test starts a server on `127.0.0.1:0` with a temporary document
//! root and talks to it over real sockets.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use svcd::config::{RouteConfig, ServerConfig};
use svcd::http::session::FdSessionOps;
use svcd::http::{HttpClient, HttpContext, HttpRequest, Method};
use svcd::route::{RouteKind, RouteRegistry, ServiceLibraries};
use svcd::server::{RunningServer, Server};
use tempfile::TempDir;

const LIBRARY: &str = "libsvc.so";

#[derive(Default)]
struct Probe {
    /// Requests currently inside a handler, per client address
    in_flight: Mutex<HashMap<SocketAddr, usize>>,
    overlaps: AtomicUsize,
    calls: AtomicUsize,
}

fn route(pattern: &str, name: &str, kind: RouteKind, library: &str) -> RouteConfig {
    RouteConfig {
        pattern: pattern.to_string(),
        name: name.to_string(),
        kind,
        library: library.to_string(),
    }
}

fn services(probe: &Arc<Probe>) -> ServiceLibraries {
    let mut services = ServiceLibraries::new();
    services.register(LIBRARY, "echo", |_: &RouteRegistry, ctx: &mut HttpContext| {
        ctx.response_mut().set_body("ok");
        0
    });
    services.register(LIBRARY, "mirror", |_: &RouteRegistry, ctx: &mut HttpContext| {
        let body = ctx.request().body().to_vec();
        ctx.response_mut().set_body(body);
        0
    });
    services.register(LIBRARY, "status", |_: &RouteRegistry, ctx: &mut HttpContext| {
        let code = ctx
            .request()
            .query_param("code")
            .and_then(|c| c.parse::<u16>().ok())
            .unwrap_or(0);
        ctx.response_mut().set_status(code);
        0
    });
    services.register(LIBRARY, "fail", |_: &RouteRegistry, ctx: &mut HttpContext| {
        ctx.response_mut().set_body("partial");
        3
    });

    let probe = Arc::clone(probe);
    services.register(LIBRARY, "record", move |_: &RouteRegistry, ctx: &mut HttpContext| {
        let peer = match ctx.peer() {
            Some(peer) => peer,
            None => return 1,
        };
        {
            let mut in_flight = probe.in_flight.lock().unwrap();
            let n = in_flight.entry(peer).or_insert(0);
            *n += 1;
            if *n > 1 {
                probe.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        probe.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));

        // a reset slot starts every cycle with an empty response
        let fresh = ctx.response().body().is_empty() && ctx.response().headers().is_empty();
        let first = ctx.request().headers().contains("X-First");
        ctx.response_mut()
            .set_body(format!("fresh={} first={}", fresh, first));

        *probe.in_flight.lock().unwrap().get_mut(&peer).unwrap() -= 1;
        0
    });
    services
}

fn start(probe: &Arc<Probe>) -> (RunningServer, TempDir) {
    let doc_root = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        worker_task_n: 4,
        doc_root: doc_root.path().to_path_buf(),
        timeout: 5,
        poll_interval_ms: 20,
        routes: vec![
            route("^/svc/", "svc", RouteKind::Native, LIBRARY),
            route("^/lua/", "lua", RouteKind::UnsupportedScripted, "script.lua"),
            route("^/gone/", "gone", RouteKind::Native, "libgone.so"),
        ],
        ..ServerConfig::default()
    };
    config.limits.max_url_size = 256;

    let server = Server::bind(config, services(probe)).unwrap();
    (server.start().unwrap(), doc_root)
}

fn client(server: &RunningServer) -> HttpClient<FdSessionOps> {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    HttpClient::new(FdSessionOps::new(stream))
}

fn get(path: &str) -> HttpRequest {
    HttpRequest::builder()
        .method(Method::Get)
        .uri(path)
        .header("Host", "localhost")
        .build()
}

/// Read raw bytes up to and including the blank line ending a head
fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn test_static_fallback_not_found_then_found() {
    let probe = Arc::new(Probe::default());
    let (server, doc_root) = start(&probe);
    let mut client = client(&server);

    let response = client.get("/hello.txt").unwrap();
    assert_eq!(response.status().code(), 404);
    assert_eq!(response.headers().get("Content-Type"), Some("text/html"));
    assert!(String::from_utf8_lossy(response.body()).contains("404 Not Found"));

    fs::write(doc_root.path().join("hello.txt"), "hello, world").unwrap();
    let response = client.get("/hello.txt").unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("Content-Type"), Some("text/plain"));
    assert_eq!(response.headers().get("Content-Length"), Some("12"));
    assert_eq!(response.body(), b"hello, world");
}

#[test]
fn test_index_and_traversal() {
    let probe = Arc::new(Probe::default());
    let (server, doc_root) = start(&probe);
    fs::write(doc_root.path().join("index.html"), "<p>home</p>").unwrap();
    let mut client = client(&server);

    let response = client.get("/").unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("Content-Type"), Some("text/html"));
    assert_eq!(response.body(), b"<p>home</p>");

    let response = client.get("/a/../../etc/passwd").unwrap();
    assert_eq!(response.status().code(), 403);
}

#[test]
fn test_post_to_native_route() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    let response = client.post("/svc/echo", b"ignored".to_vec()).unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.reason(), "OK");
    assert_eq!(response.headers().get("Content-Length"), Some("2"));
    assert_eq!(response.body(), b"ok");
    assert_eq!(response.headers().get("Server"), Some("svcd"));
    assert_eq!(response.headers().get("Connection"), Some("keep-alive"));
    assert_eq!(
        response.headers().get("Content-Type"),
        Some("application/octet-stream")
    );
    let date = response.headers().get("Date").unwrap();
    assert!(httpdate::parse_http_date(date).is_ok());
}

#[test]
fn test_route_outcomes() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    // handler leaves an unknown code: treated as success
    let response = client.get("/svc/status?code=999").unwrap();
    assert_eq!(response.status().code(), 200);

    let response = client.get("/svc/status?code=302").unwrap();
    assert_eq!(response.status().code(), 302);

    let response = client.get("/svc/status?code=418").unwrap();
    assert_eq!(response.status().code(), 418);
    assert!(String::from_utf8_lossy(response.body()).contains("418"));

    let response = client.get("/svc/fail").unwrap();
    assert_eq!(response.status().code(), 500);
    assert!(!String::from_utf8_lossy(response.body()).contains("partial"));

    let response = client.get("/lua/run").unwrap();
    assert_eq!(response.status().code(), 501);

    let response = client.get("/gone/x").unwrap();
    assert_eq!(response.status().code(), 500);

    // missing symbol: GET falls back to static files, POST does not
    let response = client.get("/svc/nothing").unwrap();
    assert_eq!(response.status().code(), 404);
    let response = client.post("/svc/nothing", Vec::new()).unwrap();
    assert_eq!(response.status().code(), 404);
}

#[test]
fn test_method_not_allowed() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    let request = HttpRequest::builder()
        .method(Method::Options)
        .uri("/svc/echo")
        .build();
    client.send_request(&request).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 405);
    assert_eq!(
        response.headers().get("Allow"),
        Some("GET, HEAD, POST, PUT, PATCH, DELETE")
    );
}

#[test]
fn test_head_has_length_but_no_body() {
    let probe = Arc::new(Probe::default());
    let (server, doc_root) = start(&probe);
    fs::write(doc_root.path().join("page.html"), "0123456789").unwrap();
    let mut client = client(&server);

    let request = HttpRequest::builder()
        .method(Method::Head)
        .uri("/page.html")
        .build();
    client.send_request(&request).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("Content-Length"), Some("10"));
    assert!(response.body().is_empty());

    // the connection is still in sync for the next request
    let response = client.get("/page.html").unwrap();
    assert_eq!(response.body(), b"0123456789");
}

#[test]
fn test_chunked_request_body() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    let request = HttpRequest::builder()
        .method(Method::Post)
        .uri("/svc/mirror")
        .build();
    client
        .send_chunked(&request, b"chunked transfer coding", 5)
        .unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"chunked transfer coding");
    assert_eq!(response.headers().get("Content-Length"), Some("23"));
}

#[test]
fn test_expect_continue_reads_body_after_interim() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    client
        .send_raw(
            b"POST /svc/mirror HTTP/1.1\r\nHost: localhost\r\n\
              Expect: 100-continue\r\nContent-Length: 5\r\n\r\n",
        )
        .unwrap();
    let interim = client.receive_any().unwrap();
    assert_eq!(interim.status().code(), 100);

    client.send_raw(b"hello").unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"hello");
}

#[test]
fn test_expect_continue_chunked_overrides_zero_length() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    client
        .send_raw(
            b"POST /svc/mirror HTTP/1.1\r\nHost: localhost\r\n\
              Expect: 100-continue\r\nContent-Length: 0\r\n\
              Transfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap();
    let interim = client.receive_any().unwrap();
    assert_eq!(interim.status().code(), 100);

    client.send_raw(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"hello");
    assert_eq!(response.headers().get("Connection"), Some("keep-alive"));

    // the body was consumed, so the next request parses cleanly
    let response = client.get("/svc/echo").unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"ok");
}

#[test]
fn test_urgent_byte_before_request_is_drained() {
    use std::os::fd::AsRawFd;

    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let urgent = b"!";
    // SAFETY: valid socket and a one byte buffer.
    let sent = unsafe {
        libc::send(
            stream.as_raw_fd(),
            urgent.as_ptr() as *const libc::c_void,
            1,
            libc::MSG_OOB,
        )
    };
    assert_eq!(sent, 1);
    stream
        .write_all(b"GET /svc/echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.ends_with("\r\n\r\nok"), "{}", response);
}

#[test]
fn test_expect_continue_timeout_closes_without_response() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .write_all(
            b"POST /svc/mirror HTTP/1.1\r\nHost: localhost\r\n\
              Expect: 100-continue\r\nContent-Length: 5\r\n\r\n",
        )
        .unwrap();
    assert_eq!(read_head(&mut stream), "HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"he").unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty(), "unexpected response: {:?}", rest);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_keepalive_sequential_requests_reset_slot() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    let first = HttpRequest::builder()
        .method(Method::Get)
        .uri("/svc/record")
        .header("X-First", "1")
        .build();
    client.send_request(&first).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.body(), b"fresh=true first=true");

    client.send_request(&get("/svc/record")).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.body(), b"fresh=true first=false");
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pipelined_requests_single_owner() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let addr = server.local_addr();
            thread::spawn(move || {
                let stream = TcpStream::connect(addr).unwrap();
                let mut client = HttpClient::new(FdSessionOps::new(stream));
                client
                    .send_raw(
                        b"GET /svc/record HTTP/1.1\r\nX-First: 1\r\n\r\n\
                          GET /svc/record HTTP/1.1\r\n\r\n\
                          GET /svc/record HTTP/1.1\r\nConnection: close\r\n\r\n",
                    )
                    .unwrap();
                let bodies: Vec<Vec<u8>> = (0..3)
                    .map(|_| client.receive_response().unwrap().body().to_vec())
                    .collect();
                bodies
            })
        })
        .collect();

    for handle in handles {
        let bodies = handle.join().unwrap();
        assert_eq!(bodies[0], b"fresh=true first=true");
        assert_eq!(bodies[1], b"fresh=true first=false");
        assert_eq!(bodies[2], b"fresh=true first=false");
    }
    assert_eq!(probe.calls.load(Ordering::SeqCst), 12);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_client_errors_close_connection() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);

    let mut client = client(&server);
    let long = format!("/svc/{}", "a".repeat(300));
    let response = client.get(&long).unwrap();
    assert_eq!(response.status().code(), 414);
    assert_eq!(response.headers().get("Connection"), Some("close"));

    let cases: [(&[u8], u16); 3] = [
        (b"GARBAGE\r\n\r\n", 400),
        (b"GET / HTTP/2.0\r\n\r\n", 505),
        (b"POST /svc/mirror HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n", 400),
    ];
    for (raw, code) in cases {
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(raw).unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        let reply = String::from_utf8_lossy(&reply);
        assert!(
            reply.starts_with(&format!("HTTP/1.1 {} ", code)),
            "{:?} -> {}",
            String::from_utf8_lossy(raw),
            reply
        );
        assert!(reply.contains("Connection: close\r\n"));
    }
}

#[test]
fn test_http10_closes_by_default() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"GET /svc/echo HTTP/1.0\r\n\r\n").unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap();
    let reply = String::from_utf8_lossy(&reply);
    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("\r\n\r\nok"));
}

#[test]
fn test_routes_change_while_running() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let mut client = client(&server);

    let response = client.get("/api/echo").unwrap();
    assert_eq!(response.status().code(), 404);

    let registry = server.context().registry();
    registry
        .add("^/api/", "api", RouteKind::Native, LIBRARY)
        .unwrap();
    let response = client.get("/api/echo").unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"ok");

    assert_eq!(registry.erase("api"), 1);
    let response = client.get("/api/echo").unwrap();
    assert_eq!(response.status().code(), 404);
}

#[test]
fn test_shutdown_stops_accepting() {
    let probe = Arc::new(Probe::default());
    let (server, _doc_root) = start(&probe);
    let addr = server.local_addr();

    let mut client = client(&server);
    assert_eq!(client.get("/svc/echo").unwrap().status().code(), 200);

    server.shutdown();
    assert!(TcpStream::connect(addr).is_err());
}
