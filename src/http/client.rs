use std::net::SocketAddr;

use bytes::Bytes;

use crate::buffers::Buffers;
use crate::client::{ClientProtocol, PendingCalls, StreamRpcClient};
use crate::config::ClientConfig;
use crate::error::{Error, ParseReason};
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::{HttpParser, Parsed, ResponseKind};
use crate::message::ResponseSink;
use crate::uri::Uri;

/// [ClientProtocol] specialization for plain HTTP/1.1: requests marshal as
///  request line + header + body, responses arrive strictly in request order
///  on each connection (the client does not pipeline), so correlation is
///  FIFO.
pub struct HttpClientProtocol;

impl ClientProtocol for HttpClientProtocol {
    type Call = HttpRequest;
    type Reply = HttpResponse;
    type Parser = HttpParser<ResponseKind>;

    fn new_parser(&self, max_message_size: usize) -> Self::Parser {
        HttpParser::with_max_body_len(max_message_size)
    }

    fn new_pending(&self) -> PendingCalls<HttpRequest, HttpResponse> {
        PendingCalls::fifo()
    }

    fn call_key(&self, _call: &HttpRequest) -> Option<u32> {
        None
    }

    fn marshal_call(&self, call: &HttpRequest) -> Result<Buffers, Error> {
        Ok(call.marshal())
    }

    fn on_recv(
        &self,
        parser: &mut Self::Parser,
        input: &[u8],
        pending: &mut PendingCalls<HttpRequest, HttpResponse>,
    ) -> Result<(), Error> {
        let mut input = Bytes::copy_from_slice(input);
        loop {
            match parser.parse(input)? {
                Parsed::NeedMore => return Ok(()),
                Parsed::Message { message, leftover } => {
                    let Some(outstanding) = pending.pop_front() else {
                        // a response nobody asked for - the stream is broken
                        return Err(Error::parse("http", ParseReason::TrailingBytes));
                    };
                    outstanding.sink.respond(Ok(message));

                    match leftover {
                        Some(leftover) => input = leftover,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn on_eof(
        &self,
        parser: &mut Self::Parser,
        pending: &mut PendingCalls<HttpRequest, HttpResponse>,
    ) -> Result<(), Error> {
        // a response without Content-Length or chunking ends at close
        if let Some(message) = parser.finish()? {
            if let Some(outstanding) = pending.pop_front() {
                outstanding.sink.respond(Ok(message));
            }
        }
        Ok(())
    }
}

/// Connection-pooled HTTP/1.1 client. Any status code is a normal response;
///  errors from this client are transport, timeout or parse failures.
pub struct HttpClient {
    inner: StreamRpcClient<HttpClientProtocol>,
}

impl HttpClient {
    pub fn new(peer_addrs: Vec<SocketAddr>, config: ClientConfig) -> HttpClient {
        HttpClient {
            inner: StreamRpcClient::new(peer_addrs, HttpClientProtocol, config),
        }
    }

    /// Build a client for the peer a URI addresses (resolving its host).
    pub async fn for_uri(uri: &Uri, config: ClientConfig) -> Result<HttpClient, Error> {
        Ok(HttpClient::new(uri.socket_addrs().await?, config))
    }

    pub async fn call(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        self.inner.call(request).await
    }

    pub async fn handle(&self, request: HttpRequest, sink: ResponseSink<HttpResponse>) {
        self.inner.handle(request, sink).await
    }

    /// One-call GET of a URI.
    pub async fn get(uri: &Uri) -> Result<HttpResponse, Error> {
        let client = HttpClient::for_uri(uri, ClientConfig::default()).await?;
        client.call(HttpRequest::for_uri("GET", uri)).await
    }

    /// One-call PUT of a body to a URI.
    pub async fn put(uri: &Uri, body: Bytes) -> Result<HttpResponse, Error> {
        let client = HttpClient::for_uri(uri, ClientConfig::default()).await?;
        let mut request = HttpRequest::for_uri("PUT", uri);
        request.set_body(body);
        client.call(request).await
    }
}
