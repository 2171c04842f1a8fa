use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

use crate::buffers::Buffers;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::message::ResponseSink;

/// What the server-side parser produced from received bytes.
pub enum ServerEvent<Req, Rep> {
    /// A decoded business request, to be dispatched to the handler.
    Request(Req),
    /// A protocol-level reply that short-circuits the handler (e.g. an
    ///  ONC-RPC PROG_UNAVAIL reject for an unknown program).
    ImmediateReply(Rep),
}

/// Protocol hook specializing the stream server engine.
pub trait ServerProtocol: Send + Sync + 'static {
    type Request: Send + 'static;
    type Reply: Send + 'static;
    type Parser: Send + 'static;

    fn new_parser(&self, max_message_size: usize) -> Self::Parser;

    /// Feed received bytes; return the requests (and immediate replies) they
    ///  complete, in wire order. A returned error closes the connection.
    fn on_recv(
        &self,
        parser: &mut Self::Parser,
        input: &[u8],
    ) -> Result<Vec<ServerEvent<Self::Request, Self::Reply>>, Error>;

    fn marshal_reply(&self, reply: &Self::Reply) -> Result<Buffers, Error>;

    /// Called after a reply has been written out; the HTTP family hooks its
    ///  access log here.
    fn on_reply_sent(&self, _peer: SocketAddr, _reply: &Self::Reply) {}
}

/// The user-facing dispatch seam: receives each decoded request together
///  with the sink its response must go to, exactly once.
#[async_trait]
pub trait RequestHandler<Req, Rep: Send>: Send + Sync + 'static {
    async fn handle(&self, peer: SocketAddr, request: Req, sink: ResponseSink<Rep>);
}

/// Business-message dispatch seam shared by the RPC server families: the
///  handler sees the unwrapped request and answers through the sink; the
///  server re-wraps the answer in the protocol envelope of the connection it
///  arrived on.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        request: Box<dyn crate::message::WireMessage>,
        sink: ResponseSink<Box<dyn crate::message::WireMessage>>,
    );
}

/// Accept loop plus per-connection request/response pump over TCP.
///
/// Each accepted connection gets its own task and its own parser instance.
///  Requests on one connection are served sequentially, which preserves
///  response order. Any receive, parse or send error closes the connection
///  and drops its in-flight state: servers never retry, recovery belongs to
///  the client.
pub struct StreamRpcServer<P: ServerProtocol> {
    listener: TcpListener,
    protocol: Arc<P>,
    handler: Arc<dyn RequestHandler<P::Request, P::Reply>>,
    config: ServerConfig,
}

impl<P: ServerProtocol> StreamRpcServer<P> {
    pub async fn bind(
        addr: SocketAddr,
        protocol: P,
        handler: Arc<dyn RequestHandler<P::Request, P::Reply>>,
        config: ServerConfig,
    ) -> std::io::Result<StreamRpcServer<P>> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {:?}", listener.local_addr()?);
        Ok(StreamRpcServer {
            listener,
            protocol: Arc::new(protocol),
            handler,
            config,
        })
    }

    /// The actually bound address; useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop forever. Individual connection failures are
    ///  logged and do not affect the loop.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let protocol = self.protocol.clone();
                    let handler = self.handler.clone();
                    let max_message_size = self.config.max_message_size;
                    tokio::spawn(async move {
                        if let Err(e) =
                            serve_connection(protocol, handler, stream, peer, max_message_size)
                                .await
                        {
                            debug!(%peer, "connection closed: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                }
            }
        }
    }
}

async fn serve_connection<P: ServerProtocol>(
    protocol: Arc<P>,
    handler: Arc<dyn RequestHandler<P::Request, P::Reply>>,
    mut stream: TcpStream,
    peer: SocketAddr,
    max_message_size: usize,
) -> Result<(), Error> {
    let mut parser = protocol.new_parser(max_message_size);
    let mut read_buf = vec![0u8; 16 * 1024];

    loop {
        let read = stream
            .read(&mut read_buf)
            .await
            .map_err(|e| Error::transport(crate::error::TransportPhase::Recv, e))?;
        if read == 0 {
            trace!(%peer, "peer closed the connection");
            return Ok(());
        }

        let events = protocol.on_recv(&mut parser, &read_buf[..read])?;
        for event in events {
            let reply = match event {
                ServerEvent::ImmediateReply(reply) => Ok(reply),
                ServerEvent::Request(request) => {
                    let (sink, receiver) = ResponseSink::channel("stream-rpc-server");
                    handler.handle(peer, request, sink).await;
                    receiver.recv().await
                }
            };

            match reply {
                Ok(reply) => {
                    let buffers = protocol.marshal_reply(&reply)?;
                    write_buffers(&mut stream, &buffers).await?;
                    protocol.on_reply_sent(peer, &reply);
                }
                Err(e) => {
                    // The handler could not produce a response; without one
                    //  the connection is out of sync, so it is closed.
                    warn!(%peer, "handler failed to respond: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

async fn write_buffers(stream: &mut TcpStream, buffers: &Buffers) -> Result<(), Error> {
    for chunk in buffers.chunks() {
        stream
            .write_all(chunk)
            .await
            .map_err(|e| Error::transport(crate::error::TransportPhase::Send, e))?;
    }
    stream
        .flush()
        .await
        .map_err(|e| Error::transport(crate::error::TransportPhase::Send, e))
}
