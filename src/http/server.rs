use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::warn;

use crate::buffers::Buffers;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::http::access_log::{AccessLog, RequestLogInfo};
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::{format_http_date, HttpParser, Parsed, RequestKind};
use crate::message::ResponseSink;
use crate::server::{RequestHandler, ServerEvent, ServerProtocol, StreamRpcServer};

/// The HTTP server's dispatch seam: one call per parsed request; the
///  response goes back on the connection the request arrived on, in arrival
///  order.
#[async_trait]
pub trait HttpRequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: HttpRequest, sink: ResponseSink<HttpResponse>);
}

/// [ServerProtocol] specialization for HTTP/1.1. The reply carries the
///  request-side log fields so the access log can be written after the
///  response goes out, when the handler has long since consumed the request.
pub struct HttpServerProtocol {
    access_log: Option<Arc<AccessLog>>,
}

impl ServerProtocol for HttpServerProtocol {
    type Request = HttpRequest;
    type Reply = (RequestLogInfo, HttpResponse);
    type Parser = HttpParser<RequestKind>;

    fn new_parser(&self, max_message_size: usize) -> Self::Parser {
        HttpParser::with_max_body_len(max_message_size)
    }

    fn on_recv(
        &self,
        parser: &mut Self::Parser,
        input: &[u8],
    ) -> Result<Vec<ServerEvent<HttpRequest, Self::Reply>>, Error> {
        let mut events = Vec::new();
        let mut input = Bytes::copy_from_slice(input);
        loop {
            match parser.parse(input)? {
                Parsed::NeedMore => return Ok(events),
                Parsed::Message { message, leftover } => {
                    events.push(ServerEvent::Request(message));
                    match leftover {
                        Some(leftover) => input = leftover,
                        None => return Ok(events),
                    }
                }
            }
        }
    }

    fn marshal_reply(&self, reply: &Self::Reply) -> Result<Buffers, Error> {
        Ok(reply.1.marshal())
    }

    fn on_reply_sent(&self, peer: SocketAddr, reply: &Self::Reply) {
        if let Some(access_log) = &self.access_log {
            access_log.write(peer, &reply.0, &reply.1);
        }
    }
}

/// Adapter between the engine-facing [RequestHandler] and the user-facing
///  [HttpRequestHandler]: captures the log fields, stamps the `Date` field,
///  and turns a handler that failed to respond into a 500 so the connection
///  stays usable.
struct HttpDispatch {
    inner: Arc<dyn HttpRequestHandler>,
}

#[async_trait]
impl RequestHandler<HttpRequest, (RequestLogInfo, HttpResponse)> for HttpDispatch {
    async fn handle(
        &self,
        _peer: SocketAddr,
        request: HttpRequest,
        sink: ResponseSink<(RequestLogInfo, HttpResponse)>,
    ) {
        let info = RequestLogInfo::of(&request);

        let (inner_sink, inner_receiver) = ResponseSink::channel("http-request-handler");
        self.inner.handle(request, inner_sink).await;

        let mut response = match inner_receiver.recv().await {
            Ok(response) => response,
            Err(e) => {
                warn!("request handler failed: {}", e);
                HttpResponse::with_body(500, Bytes::from_static(b"internal error"))
            }
        };

        if response.field("Date").is_none() {
            response.set_field("Date", &format_http_date(Utc::now()));
        }
        sink.respond(Ok((info, response)));
    }
}

/// HTTP/1.1 server: accept loop, per-connection parsing, handler dispatch,
///  response write-back, optional access logging in Common or Combined
///  format.
pub struct HttpServer {
    inner: StreamRpcServer<HttpServerProtocol>,
}

impl HttpServer {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn HttpRequestHandler>,
        access_log: Option<Arc<AccessLog>>,
        config: ServerConfig,
    ) -> std::io::Result<HttpServer> {
        let inner = StreamRpcServer::bind(
            addr,
            HttpServerProtocol { access_log },
            Arc::new(HttpDispatch { inner: handler }),
            config,
        )
        .await?;
        Ok(HttpServer { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn run(&self) {
        self.inner.run().await
    }
}
