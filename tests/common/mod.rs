#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dfsrpc::marshal::{Marshaller, Unmarshaller};
use dfsrpc::message::{null_decoder, MessageDecoder, MessageFactory, NullMessage, WireMessage};
use dfsrpc::{ResponseSink, RpcHandler};

pub const PROG: u32 = 100000;
pub const VERS: u32 = 2;
pub const PROC_ECHO: u32 = 4;

/// Echo procedure arguments; procedure number 4, method name "echo".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoArgs {
    pub payload: String,
}

impl WireMessage for EchoArgs {
    fn type_id(&self) -> u32 {
        PROC_ECHO
    }

    fn type_name(&self) -> &'static str {
        "echo"
    }

    fn marshal(&self, m: &mut dyn Marshaller) {
        m.write_str("payload", &self.payload);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoResult {
    pub payload: String,
}

impl WireMessage for EchoResult {
    fn type_id(&self) -> u32 {
        PROC_ECHO
    }

    fn type_name(&self) -> &'static str {
        "echo"
    }

    fn marshal(&self, m: &mut dyn Marshaller) {
        m.write_str("payload", &self.payload);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn echo_args_decoder() -> MessageDecoder {
    Box::new(|u: &mut dyn Unmarshaller| {
        Ok(Box::new(EchoArgs {
            payload: u.read_string("payload")?,
        }) as Box<dyn WireMessage>)
    })
}

pub fn echo_result_decoder() -> MessageDecoder {
    Box::new(|u: &mut dyn Unmarshaller| {
        Ok(Box::new(EchoResult {
            payload: u.read_string("payload")?,
        }) as Box<dyn WireMessage>)
    })
}

/// Factory with the echo procedure under `(PROG, VERS, PROC_ECHO)` and the
///  "echo" method name.
pub fn echo_factory() -> Arc<MessageFactory> {
    Arc::new(
        MessageFactory::new()
            .register_proc(PROG, VERS, PROC_ECHO, echo_args_decoder(), echo_result_decoder())
            .register_method("echo", echo_args_decoder(), echo_result_decoder()),
    )
}

/// Factory whose echo procedure has an empty (void) result.
pub fn echo_void_factory() -> Arc<MessageFactory> {
    Arc::new(
        MessageFactory::new()
            .register_proc(PROG, VERS, PROC_ECHO, echo_args_decoder(), null_decoder())
            .register_method("noop", null_decoder(), null_decoder()),
    )
}

/// Handler answering every echo request with an [EchoResult] of the same
///  payload.
pub struct EchoHandler;

#[async_trait]
impl RpcHandler for EchoHandler {
    async fn handle(
        &self,
        request: Box<dyn WireMessage>,
        sink: ResponseSink<Box<dyn WireMessage>>,
    ) {
        let args = request
            .into_any()
            .downcast::<EchoArgs>()
            .expect("test handler only receives echo requests");
        sink.respond(Ok(Box::new(EchoResult {
            payload: args.payload,
        })));
    }
}

/// Handler answering every request with an empty result.
pub struct VoidHandler;

#[async_trait]
impl RpcHandler for VoidHandler {
    async fn handle(
        &self,
        _request: Box<dyn WireMessage>,
        sink: ResponseSink<Box<dyn WireMessage>>,
    ) {
        sink.respond(Ok(Box::new(NullMessage)));
    }
}

/// Handler that drops its sink without responding, simulating a broken
///  application.
pub struct UnresponsiveHandler;

#[async_trait]
impl RpcHandler for UnresponsiveHandler {
    async fn handle(
        &self,
        _request: Box<dyn WireMessage>,
        _sink: ResponseSink<Box<dyn WireMessage>>,
    ) {
    }
}
