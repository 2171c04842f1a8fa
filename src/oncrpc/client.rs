use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::buffers::Buffers;
use crate::client::{ClientProtocol, PendingCalls, StreamRpcClient};
use crate::config::ClientConfig;
use crate::error::{Error, ParseReason};
use crate::message::{MessageFactory, ResponseSink, WireMessage};
use crate::oncrpc::parser::RecordParser;
use crate::oncrpc::{decode_reply, peek_reply_xid, OncRpcCall};

/// Allocates transaction ids monotonically with wraparound. The 32-bit space
///  is large enough that an id can never still be outstanding when it comes
///  around again; the per-connection in-flight map asserts this.
pub(crate) struct XidAllocator(AtomicU32);

impl XidAllocator {
    pub(crate) fn new(first: u32) -> XidAllocator {
        XidAllocator(AtomicU32::new(first))
    }

    pub(crate) fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// [ClientProtocol] specialization for streamed ONC-RPC: calls marshal as
///  record-marked XDR, replies may complete out of order and are correlated
///  by xid.
pub struct OncRpcClientProtocol {
    factory: Arc<MessageFactory>,
}

impl ClientProtocol for OncRpcClientProtocol {
    type Call = OncRpcCall;
    type Reply = Box<dyn WireMessage>;
    type Parser = RecordParser;

    fn new_parser(&self, max_message_size: usize) -> RecordParser {
        RecordParser::new(max_message_size)
    }

    fn new_pending(&self) -> PendingCalls<OncRpcCall, Box<dyn WireMessage>> {
        PendingCalls::by_key()
    }

    fn call_key(&self, call: &OncRpcCall) -> Option<u32> {
        Some(call.xid)
    }

    fn marshal_call(&self, call: &OncRpcCall) -> Result<Buffers, Error> {
        Ok(call.marshal(true))
    }

    fn on_recv(
        &self,
        parser: &mut RecordParser,
        input: &[u8],
        pending: &mut PendingCalls<OncRpcCall, Box<dyn WireMessage>>,
    ) -> Result<(), Error> {
        for record in parser.feed(input)? {
            let xid = peek_reply_xid(&record)?;
            let Some(outstanding) = pending.remove(xid) else {
                debug!(xid, "reply for unknown xid - dropping");
                continue;
            };

            let decoder = match self.factory.response_decoder(
                outstanding.call.prog,
                outstanding.call.vers,
                outstanding.call.proc_number(),
            ) {
                Some(decoder) => decoder,
                None => {
                    outstanding.sink.respond(Err(Error::parse(
                        "oncrpc",
                        ParseReason::UnknownMessageType,
                    )));
                    continue;
                }
            };

            match decode_reply(record, decoder) {
                Ok(reply) => outstanding.sink.respond(reply.into_result()),
                Err(e) => {
                    // a reply that cannot be decoded leaves the stream in an
                    //  unknown state: fail this call and the connection
                    outstanding.sink.respond(Err(e.duplicate()));
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// ONC-RPC client over TCP, bound to one `(prog, vers)` pair.
pub struct OncRpcClient {
    inner: StreamRpcClient<OncRpcClientProtocol>,
    prog: u32,
    vers: u32,
    xids: XidAllocator,
}

impl OncRpcClient {
    pub fn new(
        peer_addrs: Vec<SocketAddr>,
        prog: u32,
        vers: u32,
        factory: Arc<MessageFactory>,
        config: ClientConfig,
    ) -> OncRpcClient {
        Self::with_initial_xid(peer_addrs, prog, vers, factory, config, 1)
    }

    /// As [OncRpcClient::new] with a chosen first transaction id, for
    ///  deterministic wire traces.
    pub fn with_initial_xid(
        peer_addrs: Vec<SocketAddr>,
        prog: u32,
        vers: u32,
        factory: Arc<MessageFactory>,
        config: ClientConfig,
        first_xid: u32,
    ) -> OncRpcClient {
        OncRpcClient {
            inner: StreamRpcClient::new(peer_addrs, OncRpcClientProtocol { factory }, config),
            prog,
            vers,
            xids: XidAllocator::new(first_xid),
        }
    }

    pub fn prog(&self) -> u32 {
        self.prog
    }

    pub fn vers(&self) -> u32 {
        self.vers
    }

    /// Invoke the procedure identified by the request's type id and await
    ///  its decoded result.
    pub async fn call(&self, request: Box<dyn WireMessage>) -> Result<Box<dyn WireMessage>, Error> {
        let call = OncRpcCall::new(self.xids.next(), self.prog, self.vers, request);
        self.inner.call(call).await
    }

    /// As [OncRpcClient::call] with an explicit completion sink.
    pub async fn handle(
        &self,
        request: Box<dyn WireMessage>,
        sink: ResponseSink<Box<dyn WireMessage>>,
    ) {
        let call = OncRpcCall::new(self.xids.next(), self.prog, self.vers, request);
        self.inner.handle(call, sink).await
    }
}
