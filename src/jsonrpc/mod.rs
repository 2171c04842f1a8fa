//! JSON-RPC 1.0 over HTTP/1.1.
//!
//! Request envelope: `{"method": string, "params": [...], "id": value}`;
//!  response envelope: `{"result": value|null, "error": value|null, "id":
//!  value}`. The transport is a POST to a configured path with
//!  `Content-Type: application/json`. The `id` is opaque to the peer and
//!  echoed verbatim; business messages ride as the single element of
//!  `params` and as the `result` object.

pub mod client;
pub mod server;

use std::any::Any;

use bytes::Bytes;

use crate::error::{Error, ParseReason};
use crate::json::writer::JsonMarshaller;
use crate::json::reader::JsonUnmarshaller;
use crate::json::JsonValue;
use crate::marshal::{Marshaller, Unmarshaller};
use crate::message::{MessageDecoder, MessageFactory, NullMessage, WireMessage};

pub use client::JsonRpcClient;
pub use server::JsonRpcServer;

fn parse_err() -> Error {
    Error::parse("jsonrpc", ParseReason::InvalidJson)
}

/// An application-level failure delivered through the `error` member of a
///  response envelope. It arrives on the normal response path - it is the
///  peer's answer, not a transport failure.
#[derive(Debug)]
pub struct JsonRpcError(pub JsonValue);

impl WireMessage for JsonRpcError {
    fn type_id(&self) -> u32 {
        u32::MAX
    }

    fn type_name(&self) -> &'static str {
        "error"
    }

    fn marshal(&self, marshaller: &mut dyn Marshaller) {
        marshaller.write_str("error", &self.0.to_string());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Serialize a request envelope around a business message.
pub fn encode_request(body: &dyn WireMessage, id: &JsonValue) -> Bytes {
    let mut m = JsonMarshaller::new();
    m.begin_struct("");
    m.write_str("method", body.type_name());
    m.begin_seq("params", 1);
    m.begin_struct("");
    body.marshal(&mut m);
    m.end_struct();
    m.end_seq();
    m.write_value("id", id.clone());
    m.end_struct();
    m.finish()
}

/// Serialize a success response envelope. A `None` body becomes
///  `"result": null` (void results).
pub fn encode_response(body: Option<&dyn WireMessage>, id: &JsonValue) -> Bytes {
    let mut m = JsonMarshaller::new();
    m.begin_struct("");
    match body {
        Some(body) => {
            m.begin_struct("result");
            body.marshal(&mut m);
            m.end_struct();
        }
        None => m.write_null("result"),
    }
    m.write_null("error");
    m.write_value("id", id.clone());
    m.end_struct();
    m.finish()
}

/// Serialize an error response envelope with `{"name", "message"}` as the
///  error value.
pub fn encode_error_response(name: &str, message: &str, id: &JsonValue) -> Bytes {
    let mut m = JsonMarshaller::new();
    m.begin_struct("");
    m.write_null("result");
    m.begin_struct("error");
    m.write_str("name", name);
    m.write_str("message", message);
    m.end_struct();
    m.write_value("id", id.clone());
    m.end_struct();
    m.finish()
}

/// A parsed request envelope whose business payload is not yet decoded.
///  Splitting envelope from payload lets the server echo the `id` in error
///  envelopes even when the payload is undecodable.
pub struct RequestEnvelope {
    pub method: String,
    pub id: JsonValue,
    doc: JsonValue,
}

impl RequestEnvelope {
    pub fn parse(payload: &[u8]) -> Result<RequestEnvelope, Error> {
        let doc = crate::json::parse_json(payload)?;
        let envelope = doc.as_object().ok_or_else(parse_err)?;

        let method = envelope
            .get("method")
            .and_then(JsonValue::as_str)
            .ok_or_else(parse_err)?
            .to_owned();
        let id = envelope.get("id").cloned().unwrap_or(JsonValue::Null);

        Ok(RequestEnvelope { method, id, doc })
    }

    /// Decode the single `params` element through the factory's decoder for
    ///  this envelope's method.
    pub fn decode_body(&self, factory: &MessageFactory) -> Result<Box<dyn WireMessage>, Error> {
        let decoder = factory
            .request_decoder_by_name(&self.method)
            .ok_or_else(|| Error::parse("jsonrpc", ParseReason::UnknownMessageType))?;

        let mut reader = JsonUnmarshaller::new(&self.doc);
        let len = reader.begin_seq("params")?;
        let body: Box<dyn WireMessage> = if len == 0 {
            Box::new(NullMessage)
        } else {
            reader.begin_struct("")?;
            let body = decoder(&mut reader)?;
            reader.end_struct()?;
            body
        };
        reader.end_seq()?;
        Ok(body)
    }
}

/// A decoded request envelope.
pub struct DecodedRequest {
    pub body: Box<dyn WireMessage>,
    pub id: JsonValue,
}

/// Parse and decode a request envelope in one step.
pub fn decode_request(payload: &[u8], factory: &MessageFactory) -> Result<DecodedRequest, Error> {
    let envelope = RequestEnvelope::parse(payload)?;
    let body = envelope.decode_body(factory)?;
    Ok(DecodedRequest {
        body,
        id: envelope.id,
    })
}

/// Decode a response envelope against the request it answers. The echoed
///  `id` must match; an `error` member yields a [JsonRpcError] on the normal
///  response path.
pub fn decode_response(
    payload: &[u8],
    expected_id: &JsonValue,
    decoder: &MessageDecoder,
) -> Result<Box<dyn WireMessage>, Error> {
    let doc = crate::json::parse_json(payload)?;
    let envelope = doc.as_object().ok_or_else(parse_err)?;

    let id = envelope.get("id").unwrap_or(&JsonValue::Null);
    if id != expected_id {
        return Err(Error::parse("jsonrpc", ParseReason::CorrelationMismatch));
    }

    match envelope.get("error") {
        Some(error) if !error.is_null() => {
            return Ok(Box::new(JsonRpcError(error.clone())));
        }
        _ => {}
    }

    match envelope.get("result") {
        None => Err(parse_err()),
        Some(JsonValue::Null) => Ok(Box::new(NullMessage)),
        Some(_) => {
            let mut reader = JsonUnmarshaller::new(&doc);
            reader.begin_struct("result")?;
            let body = decoder(&mut reader)?;
            reader.end_struct()?;
            Ok(body)
        }
    }
}
