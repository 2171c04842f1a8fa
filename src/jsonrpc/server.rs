use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::http::access_log::AccessLog;
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::server::{HttpRequestHandler, HttpServer};
use crate::json::JsonValue;
use crate::jsonrpc::{encode_error_response, encode_response, RequestEnvelope};
use crate::message::{MessageFactory, ResponseSink};
use crate::server::RpcHandler;

/// Bridges HTTP to JSON-RPC: parses the envelope out of each POST body,
///  dispatches the business request, and wraps the answer back into a
///  response envelope on HTTP 200.
struct JsonRpcDispatch {
    factory: Arc<MessageFactory>,
    handler: Arc<dyn RpcHandler>,
}

impl JsonRpcDispatch {
    async fn dispatch(&self, request: &HttpRequest) -> Bytes {
        let empty = Bytes::new();
        let payload = request.body().unwrap_or(&empty);

        let envelope = match RequestEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("undecodable request envelope: {}", e);
                return encode_error_response("ParseError", &e.to_string(), &JsonValue::Null);
            }
        };
        let id = envelope.id.clone();

        let body = match envelope.decode_body(&self.factory) {
            Ok(body) => body,
            Err(Error::Parse {
                reason: crate::error::ParseReason::UnknownMessageType,
                ..
            }) => {
                debug!(method = %envelope.method, "unknown method");
                return encode_error_response(
                    "MethodNotFound",
                    &format!("unknown method {:?}", envelope.method),
                    &id,
                );
            }
            Err(e) => {
                debug!("undecodable request params: {}", e);
                return encode_error_response("ParseError", &e.to_string(), &id);
            }
        };

        let (sink, receiver) = ResponseSink::channel("jsonrpc-request-handler");
        self.handler.handle(body, sink).await;

        match receiver.recv().await {
            Ok(body) => {
                // void results (type id 0) become "result": null
                if body.type_id() == 0 {
                    encode_response(None, &id)
                } else {
                    encode_response(Some(body.as_ref()), &id)
                }
            }
            Err(e) => {
                warn!("handler failed: {}", e);
                encode_error_response("InternalError", &e.to_string(), &id)
            }
        }
    }
}

#[async_trait]
impl HttpRequestHandler for JsonRpcDispatch {
    async fn handle(&self, request: HttpRequest, sink: ResponseSink<HttpResponse>) {
        let payload = self.dispatch(&request).await;

        let mut response = HttpResponse::new(200);
        response.set_field("Content-Type", "application/json");
        response.set_body(payload);
        sink.respond(Ok(response));
    }
}

/// JSON-RPC 1.0 server: an HTTP server whose handler understands the
///  envelope. Access logging works exactly as for the plain HTTP server.
pub struct JsonRpcServer {
    inner: HttpServer,
}

impl JsonRpcServer {
    pub async fn bind(
        addr: SocketAddr,
        factory: Arc<MessageFactory>,
        handler: Arc<dyn RpcHandler>,
        access_log: Option<Arc<AccessLog>>,
        config: ServerConfig,
    ) -> std::io::Result<JsonRpcServer> {
        let inner = HttpServer::bind(
            addr,
            Arc::new(JsonRpcDispatch { factory, handler }),
            access_log,
            config,
        )
        .await?;
        Ok(JsonRpcServer { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn run(&self) {
        self.inner.run().await
    }
}
