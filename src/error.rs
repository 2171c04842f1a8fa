use std::io;

use crate::oncrpc::AuthStat;

/// Errors surfaced by the transport core. This is a closed set: everything a
///  caller can observe from a failed RPC is one of these variants. Application
///  level failures (HTTP status >= 400, a JSON-RPC `error` member) are *not*
///  errors at this layer - they are delivered as normal responses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed wire bytes. `context` names the parser that gave up.
    #[error("parse error in {context}: {reason}")]
    Parse {
        context: &'static str,
        reason: ParseReason,
    },

    /// A socket operation failed. The connection it happened on is broken and
    ///  will be reset; all requests in flight on it fail with this error.
    #[error("transport error during {phase:?}: {source}")]
    Transport {
        phase: TransportPhase,
        #[source]
        source: io::Error,
    },

    /// A socket operation exceeded its configured deadline. Treated like a
    ///  transport error for connection-reset purposes.
    #[error("timeout during {phase:?}")]
    Timeout { phase: TransportPhase },

    /// The peer rejected or failed the call at the RPC protocol level
    ///  (ONC-RPC accept/reject status other than SUCCESS).
    #[error("protocol error: {code:?}")]
    Protocol { code: RpcErrorCode },

    /// ONC-RPC MSG_DENIED / AUTH_ERROR, carrying the server's auth_stat.
    #[error("authentication error: {stat:?}")]
    Auth { stat: AuthStat },

    /// Host name resolution produced no usable address.
    #[error("cannot resolve {host:?} to a socket address")]
    AddressResolution { host: String },

    /// The request was accepted but its response sink was dropped without
    ///  being called. This is reported by the framework when it detects the
    ///  dropped sink; the caller sees it as the request's terminal result.
    #[error("connection dropped before a response was produced")]
    ConnectionDropped,
}

/// Stable reason codes for [Error::Parse].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseReason {
    MalformedStartLine,
    HeaderFieldWithoutColon,
    HeaderTooLarge,
    ConflictingContentLength,
    InvalidContentLength,
    ChunkSizeOverflow,
    MalformedChunk,
    BodyTooLarge,
    UnexpectedEof,
    InvalidUtf8,
    InvalidJson,
    MalformedEnvelope,
    UnknownMessageType,
    TrailingBytes,
    CorrelationMismatch,
    MissingScheme,
    InvalidPort,
    InvalidHost,
    InvalidPercentEncoding,
}

impl std::fmt::Display for ParseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The socket operation during which a transport error or timeout occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Connect,
    Send,
    Recv,
    Close,
}

/// ONC-RPC status codes mapped to a closed error set (RFC 5531). The numeric
///  values are the conventional error codes of the original protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    ProgramUnavailable,
    ProgramMismatch { low: u32, high: u32 },
    ProcedureUnavailable,
    GarbageArguments,
    System,
    RpcMismatch { low: u32, high: u32 },
}

impl RpcErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            RpcErrorCode::ProgramUnavailable => 1,
            RpcErrorCode::ProgramMismatch { .. } => 2,
            RpcErrorCode::ProcedureUnavailable => 3,
            RpcErrorCode::GarbageArguments => 4,
            RpcErrorCode::System => 5,
            RpcErrorCode::RpcMismatch { .. } => 6,
        }
    }
}

impl Error {
    pub(crate) fn parse(context: &'static str, reason: ParseReason) -> Error {
        Error::Parse { context, reason }
    }

    pub(crate) fn transport(phase: TransportPhase, source: io::Error) -> Error {
        Error::Transport { phase, source }
    }

    /// Whether this error breaks the connection it occurred on. Parse errors
    ///  and transport errors do; protocol-level replies do not.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. } | Error::Transport { .. } | Error::Timeout { .. }
        )
    }

    /// A structural copy, for failing every request in flight on a broken
    ///  connection with the same error. `io::Error` is not `Clone`, so the
    ///  transport variant reconstructs an equivalent error from kind and
    ///  message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Parse { context, reason } => Error::Parse {
                context,
                reason: *reason,
            },
            Error::Transport { phase, source } => Error::Transport {
                phase: *phase,
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Error::Timeout { phase } => Error::Timeout { phase: *phase },
            Error::Protocol { code } => Error::Protocol { code: *code },
            Error::Auth { stat } => Error::Auth { stat: *stat },
            Error::AddressResolution { host } => Error::AddressResolution {
                host: host.clone(),
            },
            Error::ConnectionDropped => Error::ConnectionDropped,
        }
    }
}
