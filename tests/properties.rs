//! Generative round-trip and incrementality properties of the wire codecs.

mod common;

use bytes::{BufMut, Bytes, BytesMut};
use quickcheck::{quickcheck, Arbitrary, Gen};

use common::{echo_result_decoder, EchoArgs, PROG, VERS};
use dfsrpc::http::message::HttpRequest;
use dfsrpc::http::parser::{encode_chunked, HttpParser, Parsed, RequestKind, ResponseKind};
use dfsrpc::oncrpc::parser::{record_mark, RecordParser};
use dfsrpc::oncrpc::{decode_reply, OncRpcCall, OncRpcReply};

fn token(g: &mut Gen, max_len: usize) -> String {
    let alphabet: Vec<char> = ('a'..='z').chain('0'..='9').collect();
    let len = usize::arbitrary(g) % max_len + 1;
    (0..len)
        .map(|_| *g.choose(&alphabet).expect("alphabet is not empty"))
        .collect()
}

#[derive(Debug, Clone)]
struct ArbitraryRequest {
    method: String,
    target: String,
    fields: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Arbitrary for ArbitraryRequest {
    fn arbitrary(g: &mut Gen) -> ArbitraryRequest {
        let method = g
            .choose(&["GET", "PUT", "POST", "DELETE", "HEAD"])
            .expect("method set is not empty")
            .to_string();
        let field_count = usize::arbitrary(g) % 5;
        let fields = (0..field_count)
            .map(|i| (format!("x-{}-{}", token(g, 8), i), token(g, 16)))
            .collect();
        ArbitraryRequest {
            method,
            target: format!("/{}", token(g, 12)),
            fields,
            body: Vec::arbitrary(g),
        }
    }
}

quickcheck! {
    /// Parsing a marshalled request reproduces method, target, every field
    ///  and the body bytes.
    fn prop_http_request_roundtrip(request: ArbitraryRequest) -> bool {
        let mut original = HttpRequest::new(&request.method, &request.target);
        original.set_field("Host", "prop");
        for (name, value) in &request.fields {
            original.set_field(name, value);
        }
        if !request.body.is_empty() {
            original.set_body(Bytes::from(request.body.clone()));
        }

        let wire = original.marshal().to_bytes();
        let mut parser = HttpParser::<RequestKind>::new();
        let Ok(Parsed::Message { message: parsed, leftover: None }) = parser.parse(wire) else {
            return false;
        };

        parsed.method() == request.method
            && parsed.target() == request.target
            && request.fields.iter().all(|(name, value)| {
                parsed.field(name) == Some(value.as_str())
            })
            && parsed.body().map(|b| b.to_vec()).unwrap_or_default() == request.body
    }

    /// Feeding a serialized message in arbitrary chunks yields the same
    ///  message as feeding it whole.
    fn prop_http_parser_incrementality(request: ArbitraryRequest, splits: Vec<u8>) -> bool {
        let mut original = HttpRequest::new(&request.method, &request.target);
        original.set_field("Host", "prop");
        if !request.body.is_empty() {
            original.set_body(Bytes::from(request.body.clone()));
        }
        let wire = original.marshal().to_bytes();

        let mut parser = HttpParser::<RequestKind>::new();
        let mut produced = None;
        let mut offset = 0;
        let mut split_iter = splits.into_iter();
        while offset < wire.len() {
            let step = (split_iter.next().unwrap_or(u8::MAX) as usize % 64) + 1;
            let end = (offset + step).min(wire.len());
            match parser.parse(wire.slice(offset..end)) {
                Ok(Parsed::NeedMore) => {}
                Ok(Parsed::Message { message, leftover }) => {
                    if leftover.is_some() {
                        return false;
                    }
                    produced = Some(message);
                }
                Err(_) => return false,
            }
            offset = end;
        }

        match produced {
            Some(parsed) => {
                parsed.method() == request.method
                    && parsed.target() == request.target
                    && parsed.body().map(|b| b.to_vec()).unwrap_or_default() == request.body
            }
            None => false,
        }
    }

    /// Chunked encoding decodes back to the original body for arbitrary
    ///  bodies and chunk sizes.
    fn prop_chunked_roundtrip(body: Vec<u8>, chunk_hint: u16) -> bool {
        let chunk_len = (chunk_hint as usize % 4096) + 1;
        let mut wire = BytesMut::new();
        wire.put_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        wire.put_slice(&encode_chunked(&body, chunk_len));

        let mut parser = HttpParser::<ResponseKind>::new();
        match parser.parse(wire.freeze()) {
            Ok(Parsed::Message { message, leftover: None }) => {
                message.body().map(|b| b.to_vec()).unwrap_or_default() == body
            }
            _ => false,
        }
    }

    /// ONC-RPC reply envelopes survive encode/decode for arbitrary xids and
    ///  payloads.
    fn prop_oncrpc_reply_roundtrip(xid: u32, payload: String) -> bool {
        let reply = OncRpcReply::success(
            xid,
            Box::new(common::EchoResult {
                payload: payload.clone(),
            }),
        );
        let wire = reply.marshal(false).to_bytes();
        let Ok(decoded) = decode_reply(wire, &echo_result_decoder()) else {
            return false;
        };
        if decoded.xid != xid {
            return false;
        }
        let Ok(body) = decoded.into_result() else {
            return false;
        };
        match body.into_any().downcast::<common::EchoResult>() {
            Ok(result) => result.payload == payload,
            Err(_) => false,
        }
    }

    /// Call envelopes survive encode/decode including the record mark.
    fn prop_oncrpc_call_roundtrip(xid: u32, payload: String) -> bool {
        let call = OncRpcCall::new(
            xid,
            PROG,
            VERS,
            Box::new(EchoArgs {
                payload: payload.clone(),
            }),
        );
        let framed = call.marshal(true).to_bytes();

        // strip the record mark through the stream parser
        let mut parser = RecordParser::new(16 * 1024 * 1024);
        let records = match parser.feed(&framed) {
            Ok(records) => records,
            Err(_) => return false,
        };
        if records.len() != 1 {
            return false;
        }

        let factory = common::echo_factory();
        match dfsrpc::oncrpc::decode_call(records[0].clone(), &factory) {
            Ok(dfsrpc::oncrpc::CallOutcome::Call(decoded)) => {
                decoded.xid == xid
                    && decoded.prog == PROG
                    && decoded.vers == VERS
                    && decoded
                        .body
                        .into_any()
                        .downcast::<EchoArgs>()
                        .map(|args| args.payload == payload)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// The record parser reassembles identically for every fragmentation of
    ///  the same payload.
    fn prop_record_parser_fragmentation(payload: Vec<u8>, cuts: Vec<u8>) -> bool {
        // frame the payload as a series of fragments at arbitrary cut points
        let mut wire = BytesMut::new();
        let mut rest: &[u8] = &payload;
        let mut cut_iter = cuts.iter();
        while !rest.is_empty() {
            let cut = (*cut_iter.next().unwrap_or(&u8::MAX) as usize % rest.len()) + 1;
            let (fragment, tail) = rest.split_at(cut);
            wire.put_slice(&record_mark(fragment.len(), tail.is_empty()));
            wire.put_slice(fragment);
            rest = tail;
        }
        if payload.is_empty() {
            wire.put_slice(&record_mark(0, true));
        }

        let mut parser = RecordParser::new(16 * 1024 * 1024);
        match parser.feed(&wire) {
            Ok(records) => records.len() == 1 && records[0].as_ref() == payload.as_slice(),
            Err(_) => false,
        }
    }
}
