//! RPC transport core for distributed-filesystem clients and servers.
//!
//! This crate is the plumbing underneath a filesystem client/server pair: a
//!  reusable framework for invoking and serving remote procedure calls over
//!  stream (TCP, with a seam for TLS) and datagram (UDP) sockets, speaking
//!  two wire encodings - ONC-RPC (XDR, RFC 5531) and JSON-RPC 1.0 over
//!  HTTP/1.1.
//!
//! ## Architecture
//!
//! The stream side is one client engine and one server engine, specialized
//!  per protocol:
//!
//! * [client::StreamRpcClient] owns a bounded FIFO pool of connections
//!   ([pool::ConnectionPool], `concurrency_level` slots). A request acquires
//!   a connection, dials it if necessary (capped retries), marshals, sends,
//!   and receives until its own response has arrived, each phase under its
//!   own deadline. A connection is used by exactly one request exchange at a
//!   time, which is what keeps its parser and in-flight state single-threaded
//!   without locks.
//! * [server::StreamRpcServer] accepts connections and gives each one its
//!   own task and parser; requests dispatch to a handler seam and responses
//!   are written back on the same connection in arrival order.
//!
//! Parsers are incremental and purely synchronous: they accept buffers of
//!  arbitrary split and hand back complete messages plus leftover bytes
//!  ([http::parser::HttpParser], [oncrpc::parser::RecordParser]). Business
//!  messages travel through the [marshal::Marshaller] /
//!  [marshal::Unmarshaller] visitor pair, which is what lets one message
//!  type ride both XDR and JSON.
//!
//! ## Correlation
//!
//! HTTP and JSON-RPC responses arrive in request order per connection (no
//!  pipelining), so in-flight requests are a FIFO; JSON-RPC additionally
//!  verifies the echoed envelope id. ONC-RPC replies may complete out of
//!  order and are correlated by xid. Every request's response sink is
//!  invoked exactly once - with the response, a protocol error, or the
//!  transport failure that killed its connection.

pub mod buffers;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod json;
pub mod jsonrpc;
pub mod marshal;
pub mod message;
pub mod oncrpc;
pub mod pool;
pub mod server;
pub mod uri;

pub use buffers::Buffers;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, ParseReason, RpcErrorCode, TransportPhase};
pub use message::{MessageDecoder, MessageFactory, NullMessage, ResponseSink, WireMessage};
pub use server::RpcHandler;
pub use uri::Uri;
