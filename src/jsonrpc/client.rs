use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::buffers::Buffers;
use crate::client::{ClientProtocol, PendingCalls, StreamRpcClient};
use crate::config::ClientConfig;
use crate::error::{Error, ParseReason};
use crate::http::message::HttpRequest;
use crate::http::parser::{HttpParser, Parsed, ResponseKind};
use crate::json::JsonValue;
use crate::jsonrpc::{decode_response, encode_request};
use crate::message::{MessageFactory, ResponseSink, WireMessage};
use crate::uri::Uri;

/// A JSON-RPC call in flight: the business request plus the envelope id it
///  was sent under.
pub struct JsonRpcCall {
    pub id: JsonValue,
    pub body: Box<dyn WireMessage>,
}

/// [ClientProtocol] specialization for JSON-RPC over HTTP: calls POST to a
///  configured path, responses arrive in request order on each connection
///  and additionally echo the request id, which is verified.
pub struct JsonRpcClientProtocol {
    factory: Arc<MessageFactory>,
    post_path: String,
    host: String,
}

impl JsonRpcClientProtocol {
    /// Pair a parsed HTTP response with the oldest outstanding call and
    ///  finish decoding the envelope inside it.
    fn complete(
        &self,
        response: crate::http::message::HttpResponse,
        outstanding: crate::client::PendingCall<JsonRpcCall, Box<dyn WireMessage>>,
    ) -> Result<(), Error> {
        let empty = Bytes::new();
        let payload = response.body().unwrap_or(&empty);
        let result = self
            .factory
            .response_decoder_by_name(outstanding.call.body.type_name())
            .ok_or_else(|| Error::parse("jsonrpc", ParseReason::UnknownMessageType))
            .and_then(|decoder| decode_response(payload, &outstanding.call.id, decoder));

        match result {
            Ok(body) => {
                outstanding.sink.respond(Ok(body));
                Ok(())
            }
            Err(e) => {
                // an undecodable response breaks the FIFO pairing
                outstanding.sink.respond(Err(e.duplicate()));
                Err(e)
            }
        }
    }
}

impl ClientProtocol for JsonRpcClientProtocol {
    type Call = JsonRpcCall;
    type Reply = Box<dyn WireMessage>;
    type Parser = HttpParser<ResponseKind>;

    fn new_parser(&self, max_message_size: usize) -> Self::Parser {
        HttpParser::with_max_body_len(max_message_size)
    }

    fn new_pending(&self) -> PendingCalls<JsonRpcCall, Box<dyn WireMessage>> {
        PendingCalls::fifo()
    }

    fn call_key(&self, _call: &JsonRpcCall) -> Option<u32> {
        None
    }

    fn marshal_call(&self, call: &JsonRpcCall) -> Result<Buffers, Error> {
        let payload = encode_request(call.body.as_ref(), &call.id);

        let mut request = HttpRequest::new("POST", &self.post_path);
        request.set_field("Host", &self.host);
        request.set_field("Content-Type", "application/json");
        request.set_body(payload);
        Ok(request.marshal())
    }

    fn on_recv(
        &self,
        parser: &mut Self::Parser,
        input: &[u8],
        pending: &mut PendingCalls<JsonRpcCall, Box<dyn WireMessage>>,
    ) -> Result<(), Error> {
        let mut input = Bytes::copy_from_slice(input);
        loop {
            match parser.parse(input)? {
                Parsed::NeedMore => return Ok(()),
                Parsed::Message { message, leftover } => {
                    let Some(outstanding) = pending.pop_front() else {
                        return Err(Error::parse("jsonrpc", ParseReason::TrailingBytes));
                    };
                    self.complete(message, outstanding)?;

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
        pending: &mut PendingCalls<JsonRpcCall, Box<dyn WireMessage>>,
    ) -> Result<(), Error> {
        if let Some(message) = parser.finish()? {
            if let Some(outstanding) = pending.pop_front() {
                self.complete(message, outstanding)?;
            }
        }
        Ok(())
    }
}

/// JSON-RPC 1.0 client over HTTP. Requests are numbered with a private
///  monotonic id; the response's echoed id is checked against it.
pub struct JsonRpcClient {
    inner: StreamRpcClient<JsonRpcClientProtocol>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(
        peer_addrs: Vec<SocketAddr>,
        host: &str,
        post_path: &str,
        factory: Arc<MessageFactory>,
        config: ClientConfig,
    ) -> JsonRpcClient {
        let protocol = JsonRpcClientProtocol {
            factory,
            post_path: post_path.to_owned(),
            host: host.to_owned(),
        };
        JsonRpcClient {
            inner: StreamRpcClient::new(peer_addrs, protocol, config),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a client for the peer a URI addresses; the URI's resource is
    ///  the POST path (e.g. `/JSONRPC`).
    pub async fn for_uri(
        uri: &Uri,
        factory: Arc<MessageFactory>,
        config: ClientConfig,
    ) -> Result<JsonRpcClient, Error> {
        let host = if uri.port() != 0 {
            format!("{}:{}", uri.host(), uri.port())
        } else {
            uri.host().to_owned()
        };
        Ok(JsonRpcClient::new(
            uri.socket_addrs().await?,
            &host,
            uri.resource(),
            factory,
            config,
        ))
    }

    fn next_call(&self, body: Box<dyn WireMessage>) -> JsonRpcCall {
        JsonRpcCall {
            id: JsonValue::from(self.next_id.fetch_add(1, Ordering::Relaxed)),
            body,
        }
    }

    /// Invoke the method named by the request's type name. An `error` member
    ///  in the response envelope is delivered as a [super::JsonRpcError]
    ///  body on the success path: it is the peer's answer.
    pub async fn call(&self, request: Box<dyn WireMessage>) -> Result<Box<dyn WireMessage>, Error> {
        self.inner.call(self.next_call(request)).await
    }

    /// As [JsonRpcClient::call] with an explicit completion sink.
    pub async fn handle(
        &self,
        request: Box<dyn WireMessage>,
        sink: ResponseSink<Box<dyn WireMessage>>,
    ) {
        self.inner.handle(self.next_call(request), sink).await
    }
}
