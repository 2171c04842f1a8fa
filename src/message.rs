use std::any::Any;
use std::fmt::Debug;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::Error;
use crate::marshal::{Marshaller, Unmarshaller};

/// A business message that can put itself on the wire through a [Marshaller].
///
/// `type_id` doubles as the ONC-RPC procedure number of the message, and
///  `type_name` as its JSON-RPC method name; both are stable identifiers
///  agreed between client and server.
pub trait WireMessage: Debug + Send + 'static {
    fn type_id(&self) -> u32;
    fn type_name(&self) -> &'static str;
    fn marshal(&self, marshaller: &mut dyn Marshaller);

    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// The empty message: a call without arguments or a reply without results
///  (ONC-RPC procedure 0 convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullMessage;

impl WireMessage for NullMessage {
    fn type_id(&self) -> u32 {
        0
    }

    fn type_name(&self) -> &'static str {
        "null"
    }

    fn marshal(&self, _marshaller: &mut dyn Marshaller) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Decodes one business message from an [Unmarshaller].
pub type MessageDecoder =
    Box<dyn Fn(&mut dyn Unmarshaller) -> Result<Box<dyn WireMessage>, Error> + Send + Sync>;

/// Returns a decoder for [NullMessage], for procedures without arguments or
///  results.
pub fn null_decoder() -> MessageDecoder {
    Box::new(|_| Ok(Box::new(NullMessage) as Box<dyn WireMessage>))
}

struct FactoryEntry {
    request: MessageDecoder,
    response: MessageDecoder,
}

/// Registry of message decoders, keyed by `(prog, vers, proc)` for ONC-RPC
///  and by method name for JSON-RPC. Populated once at construction time and
///  read-only afterwards, so lookups need no synchronization.
#[derive(Default)]
pub struct MessageFactory {
    by_proc: FxHashMap<(u32, u32, u32), FactoryEntry>,
    by_name: FxHashMap<&'static str, FactoryEntry>,
}

impl MessageFactory {
    pub fn new() -> MessageFactory {
        Default::default()
    }

    pub fn register_proc(
        mut self,
        prog: u32,
        vers: u32,
        proc: u32,
        request: MessageDecoder,
        response: MessageDecoder,
    ) -> Self {
        self.by_proc
            .insert((prog, vers, proc), FactoryEntry { request, response });
        self
    }

    pub fn register_method(
        mut self,
        name: &'static str,
        request: MessageDecoder,
        response: MessageDecoder,
    ) -> Self {
        self.by_name.insert(name, FactoryEntry { request, response });
        self
    }

    pub fn request_decoder(&self, prog: u32, vers: u32, proc: u32) -> Option<&MessageDecoder> {
        self.by_proc.get(&(prog, vers, proc)).map(|e| &e.request)
    }

    pub fn response_decoder(&self, prog: u32, vers: u32, proc: u32) -> Option<&MessageDecoder> {
        self.by_proc.get(&(prog, vers, proc)).map(|e| &e.response)
    }

    pub fn request_decoder_by_name(&self, name: &str) -> Option<&MessageDecoder> {
        self.by_name.get(name).map(|e| &e.request)
    }

    pub fn response_decoder_by_name(&self, name: &str) -> Option<&MessageDecoder> {
        self.by_name.get(name).map(|e| &e.response)
    }

    /// The versions registered for a program, for PROG_MISMATCH replies.
    pub fn version_range(&self, prog: u32) -> Option<(u32, u32)> {
        let mut range: Option<(u32, u32)> = None;
        for (p, vers, _) in self.by_proc.keys() {
            if *p == prog {
                range = Some(match range {
                    Some((low, high)) => (low.min(*vers), high.max(*vers)),
                    None => (*vers, *vers),
                });
            }
        }
        range
    }
}

/// The write-once completion side of a request. `respond` consumes the sink,
///  which is what enforces the exactly-once contract at compile time; a sink
///  that is dropped without responding is a framework bug, detected here and
///  reported, and the waiting caller receives a terminal error.
pub struct ResponseSink<R: Send> {
    tx: Option<oneshot::Sender<Result<R, Error>>>,
    context: &'static str,
}

impl<R: Send> ResponseSink<R> {
    pub fn channel(context: &'static str) -> (ResponseSink<R>, ResponseReceiver<R>) {
        let (tx, rx) = oneshot::channel();
        (
            ResponseSink {
                tx: Some(tx),
                context,
            },
            ResponseReceiver { rx },
        )
    }

    pub fn respond(mut self, result: Result<R, Error>) {
        let tx = self
            .tx
            .take()
            .expect("sink can only be consumed by respond()");
        // A closed receiver means the caller gave up waiting; nothing to do.
        let _ = tx.send(result);
    }
}

impl<R: Send> Drop for ResponseSink<R> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            error!(
                context = self.context,
                "request dropped without a response - this is a bug in the response path"
            );
        }
    }
}

/// The caller's side of a [ResponseSink] pair.
pub struct ResponseReceiver<R: Send> {
    rx: oneshot::Receiver<Result<R, Error>>,
}

impl<R: Send> ResponseReceiver<R> {
    /// Resolves with the request's terminal result. If the sink was dropped
    ///  unresponded this yields [Error::ConnectionDropped], so the caller
    ///  always observes exactly one completion.
    pub async fn recv(self) -> Result<R, Error> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionDropped),
        }
    }
}
