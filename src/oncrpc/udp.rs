use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, TransportPhase};
use crate::message::{MessageFactory, ResponseSink, WireMessage};
use crate::oncrpc::client::XidAllocator;
use crate::oncrpc::server::error_reply;
use crate::oncrpc::{decode_call, decode_reply, peek_reply_xid, CallOutcome, OncRpcCall};
use crate::server::RpcHandler;

/// Largest UDP payload the datagram transport accepts or produces.
const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// One-shot ONC-RPC client over UDP: send the call as a single datagram,
///  await the single reply carrying the same xid. Datagrams with a foreign
///  xid (late replies to earlier, timed-out calls) are dropped. There is no
///  retry on timeout; that decision belongs to the caller.
pub struct OncRpcUdpClient {
    socket: UdpSocket,
    prog: u32,
    vers: u32,
    factory: Arc<MessageFactory>,
    recv_timeout: Duration,
    xids: XidAllocator,
    /// UDP has no per-request demultiplexing, so exchanges on one client are
    ///  serialized; a second call waits for the first to finish.
    exchange_lock: tokio::sync::Mutex<()>,
}

impl OncRpcUdpClient {
    pub async fn connect(
        peer: SocketAddr,
        prog: u32,
        vers: u32,
        factory: Arc<MessageFactory>,
        recv_timeout: Duration,
    ) -> std::io::Result<OncRpcUdpClient> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal address")
        } else {
            "[::]:0".parse().expect("literal address")
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;

        Ok(OncRpcUdpClient {
            socket,
            prog,
            vers,
            factory,
            recv_timeout,
            xids: XidAllocator::new(1),
            exchange_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub async fn call(&self, request: Box<dyn WireMessage>) -> Result<Box<dyn WireMessage>, Error> {
        let _exchange = self.exchange_lock.lock().await;

        let call = OncRpcCall::new(self.xids.next(), self.prog, self.vers, request);
        // no record marking on datagrams: the payload is the whole message
        let payload = call.marshal(false).to_bytes();

        self.socket
            .send(&payload)
            .await
            .map_err(|e| Error::transport(TransportPhase::Send, e))?;

        let decoder = self
            .factory
            .response_decoder(call.prog, call.vers, call.proc_number())
            .ok_or_else(|| {
                Error::parse("oncrpc", crate::error::ParseReason::UnknownMessageType)
            })?;

        let deadline = Instant::now() + self.recv_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    phase: TransportPhase::Recv,
                });
            }

            let read = timeout(remaining, self.socket.recv(&mut buf))
                .await
                .map_err(|_| Error::Timeout {
                    phase: TransportPhase::Recv,
                })?
                .map_err(|e| Error::transport(TransportPhase::Recv, e))?;

            let datagram = Bytes::copy_from_slice(&buf[..read]);
            match peek_reply_xid(&datagram) {
                Ok(xid) if xid == call.xid => {
                    return decode_reply(datagram, decoder)?.into_result();
                }
                Ok(xid) => {
                    debug!(xid, expected = call.xid, "datagram with foreign xid - dropping");
                }
                Err(_) => {
                    debug!("undecodable datagram - dropping");
                }
            }
        }
    }
}

/// ONC-RPC server over UDP: every received datagram is one call, dispatched
///  independently; the reply goes to the sender address recorded at receive
///  time.
pub struct OncRpcUdpServer {
    socket: Arc<UdpSocket>,
    factory: Arc<MessageFactory>,
    handler: Arc<dyn RpcHandler>,
}

impl OncRpcUdpServer {
    pub async fn bind(
        addr: SocketAddr,
        factory: Arc<MessageFactory>,
        handler: Arc<dyn RpcHandler>,
    ) -> std::io::Result<OncRpcUdpServer> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("listening on {:?} (udp)", socket.local_addr()?);
        Ok(OncRpcUdpServer {
            socket,
            factory,
            handler,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (read, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let payload = Bytes::copy_from_slice(&buf[..read]);
            let outcome = match decode_call(payload, &self.factory) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%peer, "undecodable datagram - dropping: {}", e);
                    continue;
                }
            };

            let socket = self.socket.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let reply = match outcome {
                    CallOutcome::Reject(reply) => reply,
                    CallOutcome::Call(call) => {
                        let xid = call.xid;
                        let (sink, receiver) = ResponseSink::channel("oncrpc-udp-handler");
                        handler.handle(call.body, sink).await;
                        match receiver.recv().await {
                            Ok(body) => crate::oncrpc::OncRpcReply::success(xid, body),
                            Err(e) => {
                                warn!(xid, "handler failed: {}", e);
                                error_reply(xid, e)
                            }
                        }
                    }
                };

                let payload = reply.marshal(false).to_bytes();
                if let Err(e) = socket.send_to(&payload, peer).await {
                    warn!(%peer, "error sending reply datagram: {}", e);
                }
            });
        }
    }
}
