use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::buffers::Buffers;
use crate::config::ServerConfig;
use crate::error::{Error, RpcErrorCode};
use crate::message::{MessageFactory, ResponseSink};
use crate::oncrpc::parser::RecordParser;
use crate::oncrpc::{
    decode_call, AcceptStat, CallOutcome, MismatchInfo, OncRpcCall, OncRpcReply, OncRpcReplyBody,
};
use crate::server::{RequestHandler, RpcHandler, ServerEvent, ServerProtocol, StreamRpcServer};

/// Re-export of the dispatch seam under the name the ONC-RPC family uses.
pub use crate::server::RpcHandler as OncRpcHandler;

/// [ServerProtocol] specialization for streamed ONC-RPC.
pub struct OncRpcServerProtocol {
    factory: Arc<MessageFactory>,
}

impl ServerProtocol for OncRpcServerProtocol {
    type Request = OncRpcCall;
    type Reply = OncRpcReply;
    type Parser = RecordParser;

    fn new_parser(&self, max_message_size: usize) -> RecordParser {
        RecordParser::new(max_message_size)
    }

    fn on_recv(
        &self,
        parser: &mut RecordParser,
        input: &[u8],
    ) -> Result<Vec<ServerEvent<OncRpcCall, OncRpcReply>>, Error> {
        let mut events = Vec::new();
        for record in parser.feed(input)? {
            match decode_call(record, &self.factory)? {
                CallOutcome::Call(call) => events.push(ServerEvent::Request(call)),
                CallOutcome::Reject(reply) => events.push(ServerEvent::ImmediateReply(reply)),
            }
        }
        Ok(events)
    }

    fn marshal_reply(&self, reply: &OncRpcReply) -> Result<Buffers, Error> {
        Ok(reply.marshal(true))
    }
}

/// Map a handler-side failure to the reply envelope the protocol wants for
///  it: protocol errors keep their accept/reject status, everything else
///  (including a handler that dropped its sink) becomes SYSTEM_ERR.
pub(crate) fn error_reply(xid: u32, error: Error) -> OncRpcReply {
    match error {
        Error::Protocol { code } => match code {
            RpcErrorCode::ProgramUnavailable => {
                OncRpcReply::accepted_error(xid, AcceptStat::ProgUnavail, None)
            }
            RpcErrorCode::ProgramMismatch { low, high } => OncRpcReply::accepted_error(
                xid,
                AcceptStat::ProgMismatch,
                Some(MismatchInfo { low, high }),
            ),
            RpcErrorCode::ProcedureUnavailable => {
                OncRpcReply::accepted_error(xid, AcceptStat::ProcUnavail, None)
            }
            RpcErrorCode::GarbageArguments => {
                OncRpcReply::accepted_error(xid, AcceptStat::GarbageArgs, None)
            }
            RpcErrorCode::System => OncRpcReply::accepted_error(xid, AcceptStat::SystemErr, None),
            RpcErrorCode::RpcMismatch { low, high } => OncRpcReply {
                xid,
                body: OncRpcReplyBody::RpcMismatch(MismatchInfo { low, high }),
            },
        },
        Error::Auth { stat } => OncRpcReply {
            xid,
            body: OncRpcReplyBody::AuthError(stat),
        },
        _ => OncRpcReply::accepted_error(xid, AcceptStat::SystemErr, None),
    }
}

/// Adapter unwrapping the envelope for the [RpcHandler] and re-wrapping its
///  answer with the call's xid.
struct OncRpcDispatch {
    inner: Arc<dyn RpcHandler>,
}

#[async_trait]
impl RequestHandler<OncRpcCall, OncRpcReply> for OncRpcDispatch {
    async fn handle(&self, _peer: SocketAddr, call: OncRpcCall, sink: ResponseSink<OncRpcReply>) {
        let xid = call.xid;

        let (inner_sink, inner_receiver) = ResponseSink::channel("oncrpc-request-handler");
        self.inner.handle(call.body, inner_sink).await;

        let reply = match inner_receiver.recv().await {
            Ok(body) => OncRpcReply::success(xid, body),
            Err(e) => {
                warn!(xid, "handler failed: {}", e);
                error_reply(xid, e)
            }
        };
        sink.respond(Ok(reply));
    }
}

/// ONC-RPC server over TCP.
pub struct OncRpcServer {
    inner: StreamRpcServer<OncRpcServerProtocol>,
}

impl OncRpcServer {
    pub async fn bind(
        addr: SocketAddr,
        factory: Arc<MessageFactory>,
        handler: Arc<dyn RpcHandler>,
        config: ServerConfig,
    ) -> std::io::Result<OncRpcServer> {
        let inner = StreamRpcServer::bind(
            addr,
            OncRpcServerProtocol { factory },
            Arc::new(OncRpcDispatch { inner: handler }),
            config,
        )
        .await?;
        Ok(OncRpcServer { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn run(&self) {
        self.inner.run().await
    }
}
