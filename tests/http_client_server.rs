use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use dfsrpc::client::{StreamRpcClient, StreamTransport, TcpTransport};
use dfsrpc::http::client::{HttpClient, HttpClientProtocol};
use dfsrpc::http::message::{HttpRequest, HttpResponse};
use dfsrpc::http::server::{HttpRequestHandler, HttpServer};
use dfsrpc::message::ResponseSink;
use dfsrpc::{ClientConfig, Error, ServerConfig, TransportPhase};

struct HelloHandler;

#[async_trait]
impl HttpRequestHandler for HelloHandler {
    async fn handle(&self, request: HttpRequest, sink: ResponseSink<HttpResponse>) {
        // echo the request's sequence header back in the body, if present
        let body = match request.field("X-Seq") {
            Some(seq) => Bytes::from(format!("hello {}", seq)),
            None => Bytes::from_static(b"hello"),
        };
        sink.respond(Ok(HttpResponse::with_body(200, body)));
    }
}

async fn spawn_hello_server() -> SocketAddr {
    let server = HttpServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(HelloHandler),
        None,
        ServerConfig::default(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

#[tokio::test]
async fn test_get_200_with_body() {
    let addr = spawn_hello_server().await;
    let client = HttpClient::new(vec![addr], ClientConfig::default());

    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    let response = client.call(request).await.unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body().unwrap().as_ref(), b"hello");
    assert_eq!(response.field("Content-Length"), Some("5"));
}

#[tokio::test]
async fn test_chunked_response_body() {
    // a hand-rolled peer so the exact chunked bytes are under test control
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .await
            .unwrap();
    });

    let client = HttpClient::new(vec![addr], ClientConfig::default());
    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    let response = client.call(request).await.unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body().unwrap().as_ref(), b"hello world");
}

/// A transport that fails the first N connect attempts, then delegates to
///  TCP. Lets the tests observe the engine's retry budget.
struct FlakyTransport {
    attempts: AtomicU32,
    failures: u32,
}

#[async_trait]
impl StreamTransport for FlakyTransport {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "synthetic connect failure",
            ));
        }
        TcpTransport.connect(addr).await
    }
}

#[tokio::test]
async fn test_connect_succeeds_on_third_try() {
    let addr = spawn_hello_server().await;

    let transport = Arc::new(FlakyTransport {
        attempts: AtomicU32::new(0),
        failures: 2,
    });
    let config = ClientConfig {
        reconnect_tries_max: 2,
        ..Default::default()
    };
    let client = StreamRpcClient::with_transport(
        vec![addr],
        HttpClientProtocol,
        SharedTransport(transport.clone()),
        config,
    );

    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    let response = client.call(request).await.unwrap();

    assert_eq!(response.status_code(), 200);
    // two failed attempts observed before the successful third
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_connect_budget_exhaustion_is_terminal() {
    let addr = spawn_hello_server().await;

    let transport = Arc::new(FlakyTransport {
        attempts: AtomicU32::new(0),
        failures: u32::MAX,
    });
    let config = ClientConfig {
        reconnect_tries_max: 2,
        ..Default::default()
    };
    let client = StreamRpcClient::with_transport(
        vec![addr],
        HttpClientProtocol,
        SharedTransport(transport.clone()),
        config,
    );

    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    match client.call(request).await {
        Err(Error::Transport {
            phase: TransportPhase::Connect,
            ..
        }) => {}
        other => panic!("expected a terminal connect error, got ok={}", other.is_ok()),
    }
    // initial attempt plus reconnect_tries_max retries
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
}

/// Forwards to a shared transport so tests can keep a counting handle.
struct SharedTransport(Arc<FlakyTransport>);

#[async_trait]
impl StreamTransport for SharedTransport {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        self.0.connect(addr).await
    }
}

#[tokio::test]
async fn test_recv_timeout_breaks_connection_and_frees_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // first connection: swallow the request, never answer
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await;

        // second connection (after the client reset): answer properly
        let (mut stream2, _) = listener.accept().await.unwrap();
        let _ = stream2.read(&mut buf).await.unwrap();
        stream2
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();

        // keep the first socket open past the end of the test
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let config = ClientConfig {
        recv_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let client = HttpClient::new(vec![addr], config);

    let started = Instant::now();
    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    match client.call(request).await {
        Err(Error::Timeout {
            phase: TransportPhase::Recv,
        }) => {}
        other => panic!("expected recv timeout, got ok={}", other.is_ok()),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));

    // the pool slot is free again and the reset connection re-dials
    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    let response = client.call(request).await.unwrap();
    assert_eq!(response.body().unwrap().as_ref(), b"ok");
}

#[tokio::test]
async fn test_send_timeout_against_black_hole_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // first connection: accept and read nothing, so the client's send
        //  backs up once the kernel buffers fill
        let (black_hole, _) = listener.accept().await.unwrap();

        // second connection (after the reset): behave
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(black_hole);
    });

    let config = ClientConfig {
        send_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let client = HttpClient::new(vec![addr], config);

    // large enough that the socket cannot swallow it whole
    let body = Bytes::from(vec![0x61u8; 64 * 1024 * 1024]);
    let mut request = HttpRequest::new("PUT", "/blob");
    request.set_field("Host", "x");
    request.set_body(body);

    let started = Instant::now();
    match client.call(request).await {
        Err(Error::Timeout {
            phase: TransportPhase::Send,
        }) => {}
        other => panic!("expected send timeout, got ok={}", other.is_ok()),
    }
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(2));

    // the pool slot is free and usable again
    let mut request = HttpRequest::new("GET", "/");
    request.set_field("Host", "x");
    let response = client.call(request).await.unwrap();
    assert_eq!(response.body().unwrap().as_ref(), b"ok");
}

#[tokio::test]
async fn test_responses_match_their_requests_under_concurrency() {
    let addr = spawn_hello_server().await;
    let client = Arc::new(HttpClient::new(
        vec![addr],
        ClientConfig {
            concurrency_level: 1,
            ..Default::default()
        },
    ));

    let mut calls = Vec::new();
    for seq in 0..8 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let mut request = HttpRequest::new("GET", "/");
            request.set_field("Host", "x");
            request.set_field("X-Seq", &seq.to_string());
            (seq, client.call(request).await.unwrap())
        }));
    }

    for call in calls {
        let (seq, response) = call.await.unwrap();
        assert_eq!(
            response.body().unwrap().as_ref(),
            format!("hello {}", seq).as_bytes()
        );
    }
}

#[tokio::test]
async fn test_get_convenience() {
    let addr = spawn_hello_server().await;
    let uri = dfsrpc::Uri::parse(&format!("http://{}/", addr)).unwrap();

    let response = HttpClient::get(&uri).await.unwrap();
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body().unwrap().as_ref(), b"hello");
}
