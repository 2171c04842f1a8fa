use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::buffers::Buffers;
use crate::config::ClientConfig;
use crate::error::{Error, TransportPhase};
use crate::message::ResponseSink;
use crate::pool::ConnectionPool;

/// The socket capability a stream client is built over; TCP is provided,
///  TLS is a second implementation supplied by the embedding application.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

pub struct TcpTransport;

#[async_trait]
impl StreamTransport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// A request waiting for its response on one connection.
pub struct PendingCall<C, R: Send> {
    pub call: C,
    pub sink: ResponseSink<R>,
    pub created_at: Instant,
}

enum PendingInner<C, R: Send> {
    /// Ordered-response protocols (HTTP, JSON-RPC): responses complete the
    ///  oldest outstanding request.
    Fifo(VecDeque<PendingCall<C, R>>),
    /// Correlated protocols (ONC-RPC): responses carry the xid of their call.
    ByKey(FxHashMap<u32, PendingCall<C, R>>),
}

/// The in-flight structure of one connection.
pub struct PendingCalls<C, R: Send> {
    inner: PendingInner<C, R>,
}

impl<C, R: Send> PendingCalls<C, R> {
    pub fn fifo() -> PendingCalls<C, R> {
        PendingCalls {
            inner: PendingInner::Fifo(VecDeque::new()),
        }
    }

    pub fn by_key() -> PendingCalls<C, R> {
        PendingCalls {
            inner: PendingInner::ByKey(FxHashMap::default()),
        }
    }

    pub fn push(&mut self, key: Option<u32>, pending: PendingCall<C, R>) {
        match &mut self.inner {
            PendingInner::Fifo(queue) => queue.push_back(pending),
            PendingInner::ByKey(map) => {
                let key = key.expect("keyed protocols must assign a key to every call");
                let evicted = map.insert(key, pending);
                debug_assert!(evicted.is_none(), "correlation keys must not be reused in flight");
            }
        }
    }

    /// The oldest outstanding request (FIFO protocols).
    pub fn pop_front(&mut self) -> Option<PendingCall<C, R>> {
        match &mut self.inner {
            PendingInner::Fifo(queue) => queue.pop_front(),
            PendingInner::ByKey(_) => None,
        }
    }

    /// The request correlated with `key` (keyed protocols).
    pub fn remove(&mut self, key: u32) -> Option<PendingCall<C, R>> {
        match &mut self.inner {
            PendingInner::Fifo(_) => None,
            PendingInner::ByKey(map) => map.remove(&key),
        }
    }

    pub fn contains_key(&self, key: u32) -> bool {
        match &self.inner {
            PendingInner::Fifo(_) => false,
            PendingInner::ByKey(map) => map.contains_key(&key),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.inner {
            PendingInner::Fifo(queue) => queue.is_empty(),
            PendingInner::ByKey(map) => map.is_empty(),
        }
    }

    fn is_outstanding(&self, key: Option<u32>) -> bool {
        match key {
            Some(key) => self.contains_key(key),
            None => !self.is_empty(),
        }
    }

    /// Fail every outstanding request with (a copy of) the same error. Called
    ///  when the connection they were sent on breaks.
    pub fn drain_with_error(&mut self, error: &Error) {
        match &mut self.inner {
            PendingInner::Fifo(queue) => {
                for pending in queue.drain(..) {
                    pending.sink.respond(Err(error.duplicate()));
                }
            }
            PendingInner::ByKey(map) => {
                for (_, pending) in map.drain() {
                    pending.sink.respond(Err(error.duplicate()));
                }
            }
        }
    }
}

/// Protocol hook specializing the stream client engine: how calls go onto
///  the wire, how received bytes turn back into completed calls.
pub trait ClientProtocol: Send + Sync + 'static {
    type Call: Send + 'static;
    type Reply: Send + 'static;
    type Parser: Send + 'static;

    fn new_parser(&self, max_message_size: usize) -> Self::Parser;

    /// Fresh in-flight bookkeeping for a new connection: FIFO or keyed.
    fn new_pending(&self) -> PendingCalls<Self::Call, Self::Reply>;

    /// The correlation key of a call; `None` on FIFO protocols.
    fn call_key(&self, call: &Self::Call) -> Option<u32>;

    fn marshal_call(&self, call: &Self::Call) -> Result<Buffers, Error>;

    /// Feed received bytes into `parser`; complete every pending call whose
    ///  response is now available by taking it out of `pending` and calling
    ///  its sink. A returned error is fatal for the connection.
    fn on_recv(
        &self,
        parser: &mut Self::Parser,
        input: &[u8],
        pending: &mut PendingCalls<Self::Call, Self::Reply>,
    ) -> Result<(), Error>;

    /// The peer closed the stream. Protocols whose responses may be
    ///  delimited by connection close (HTTP without `Content-Length`)
    ///  complete the outstanding call here; the default treats close as
    ///  never completing anything.
    fn on_eof(
        &self,
        _parser: &mut Self::Parser,
        _pending: &mut PendingCalls<Self::Call, Self::Reply>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

enum ConnState<P: ClientProtocol, T: StreamTransport> {
    /// No socket yet (or the previous one broke); the next use dials.
    Fresh,
    Connected {
        stream: T::Stream,
        parser: P::Parser,
        pending: PendingCalls<P::Call, P::Reply>,
    },
}

pub struct Connection<P: ClientProtocol, T: StreamTransport> {
    state: ConnState<P, T>,
}

impl<P: ClientProtocol, T: StreamTransport> Connection<P, T> {
    fn fresh() -> Connection<P, T> {
        Connection {
            state: ConnState::Fresh,
        }
    }
}

/// Connection-pooled RPC client over a stream transport.
///
/// A request acquires a pooled connection (blocking cooperatively if all are
///  busy), dials it if necessary with up to `reconnect_tries_max` retries,
///  sends, and receives until its own response has arrived, each phase under
///  its configured deadline. Transport errors and timeouts break the
///  connection: every request in flight on it fails with the same error and
///  the slot returns to the pool holding a fresh unconnected socket.
pub struct StreamRpcClient<P: ClientProtocol, T: StreamTransport = TcpTransport> {
    protocol: P,
    transport: T,
    peer_addrs: Vec<SocketAddr>,
    config: ClientConfig,
    pool: ConnectionPool<Connection<P, T>>,
}

impl<P: ClientProtocol> StreamRpcClient<P, TcpTransport> {
    pub fn new(peer_addrs: Vec<SocketAddr>, protocol: P, config: ClientConfig) -> Self {
        Self::with_transport(peer_addrs, protocol, TcpTransport, config)
    }
}

impl<P: ClientProtocol, T: StreamTransport> StreamRpcClient<P, T> {
    pub fn with_transport(
        peer_addrs: Vec<SocketAddr>,
        protocol: P,
        transport: T,
        config: ClientConfig,
    ) -> Self {
        assert!(!peer_addrs.is_empty(), "a client needs at least one peer address");
        let pool = ConnectionPool::new(
            (0..config.effective_concurrency_level()).map(|_| Connection::fresh()),
        );
        StreamRpcClient {
            protocol,
            transport,
            peer_addrs,
            config,
            pool,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issue a call and await its result.
    pub async fn call(&self, call: P::Call) -> Result<P::Reply, Error> {
        let (sink, receiver) = ResponseSink::channel("stream-rpc-client");
        self.handle(call, sink).await;
        receiver.recv().await
    }

    /// Drive one call to completion; its terminal result - response, protocol
    ///  error or transport failure - goes to `sink`, exactly once. Callers
    ///  wanting to fan out run several `handle` futures concurrently; the
    ///  pool bounds how many of them actually occupy a connection.
    pub async fn handle(&self, call: P::Call, sink: ResponseSink<P::Reply>) {
        let mut connection = self.pool.acquire().await;
        self.exchange(&mut connection, call, sink).await;
        self.pool.release(connection);
    }

    /// One request/response exchange on a checked-out connection. The sink is
    ///  always completed exactly once, whatever happens.
    async fn exchange(
        &self,
        connection: &mut Connection<P, T>,
        call: P::Call,
        sink: ResponseSink<P::Reply>,
    ) {
        if matches!(connection.state, ConnState::Fresh) {
            match self.connect_with_retries().await {
                Ok(stream) => {
                    connection.state = ConnState::Connected {
                        stream,
                        parser: self.protocol.new_parser(self.config.max_message_size),
                        pending: self.protocol.new_pending(),
                    };
                }
                Err(error) => {
                    sink.respond(Err(error));
                    return;
                }
            }
        }

        let ConnState::Connected {
            stream,
            parser,
            pending,
        } = &mut connection.state
        else {
            unreachable!("connected above or returned");
        };

        let buffers = match self.protocol.marshal_call(&call) {
            Ok(buffers) => buffers,
            Err(error) => {
                sink.respond(Err(error));
                return;
            }
        };
        let key = self.protocol.call_key(&call);

        pending.push(
            key,
            PendingCall {
                call,
                sink,
                created_at: Instant::now(),
            },
        );

        // send phase
        if let Err(error) = send_buffers(stream, &buffers, &self.config).await {
            warn!("send failed, resetting connection: {}", error);
            pending.drain_with_error(&error);
            connection.state = ConnState::Fresh;
            return;
        }

        // receive phase: read and parse until our own call is answered
        let deadline = Instant::now() + self.config.recv_timeout;
        let mut read_buf = vec![0u8; 16 * 1024];
        while pending.is_outstanding(key) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match timeout(remaining, stream.read(&mut read_buf)).await {
                Err(_) => Err(Error::Timeout {
                    phase: TransportPhase::Recv,
                }),
                Ok(Err(e)) => Err(Error::transport(TransportPhase::Recv, e)),
                Ok(Ok(0)) => {
                    // a close may legally delimit the response body
                    match self.protocol.on_eof(parser, pending) {
                        Ok(()) if !pending.is_outstanding(key) => {
                            // answered, but the socket is gone
                            connection.state = ConnState::Fresh;
                            return;
                        }
                        Ok(()) => Err(Error::transport(
                            TransportPhase::Recv,
                            io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "peer closed the connection",
                            ),
                        )),
                        Err(e) => Err(e),
                    }
                }
                Ok(Ok(read)) => {
                    trace!(bytes = read, "received");
                    self.protocol.on_recv(parser, &read_buf[..read], pending)
                }
            };

            if let Err(error) = outcome {
                warn!("receive failed, resetting connection: {}", error);
                pending.drain_with_error(&error);
                connection.state = ConnState::Fresh;
                return;
            }
        }
    }

    /// Dial the peer, cycling through its resolved addresses in order, with
    ///  up to `reconnect_tries_max` whole-cycle retries after the first
    ///  attempt.
    async fn connect_with_retries(&self) -> Result<T::Stream, Error> {
        let mut last_error = None;

        for attempt in 0..=self.config.reconnect_tries_max {
            if attempt > 0 {
                debug!(attempt, "retrying connect");
            }
            for &addr in &self.peer_addrs {
                match timeout(self.config.connect_timeout, self.transport.connect(addr)).await {
                    Ok(Ok(stream)) => {
                        trace!(%addr, "connected");
                        return Ok(stream);
                    }
                    Ok(Err(e)) => {
                        debug!(%addr, "connect failed: {}", e);
                        last_error = Some(Error::transport(TransportPhase::Connect, e));
                    }
                    Err(_) => {
                        debug!(%addr, "connect timed out");
                        last_error = Some(Error::Timeout {
                            phase: TransportPhase::Connect,
                        });
                    }
                }
            }
        }

        Err(last_error.expect("at least one address was attempted"))
    }
}

async fn send_buffers<S: AsyncWrite + Unpin>(
    stream: &mut S,
    buffers: &Buffers,
    config: &ClientConfig,
) -> Result<(), Error> {
    let write_all = async {
        for chunk in buffers.chunks() {
            stream.write_all(chunk).await?;
        }
        stream.flush().await
    };

    timeout(config.send_timeout, write_all)
        .await
        .map_err(|_| Error::Timeout {
            phase: TransportPhase::Send,
        })?
        .map_err(|e| Error::transport(TransportPhase::Send, e))
}
