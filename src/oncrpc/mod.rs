//! ONC-RPC (RFC 5531) envelopes and their XDR wire form.
//!
//! Call envelope layout: `xid, msg_type=CALL, rpcvers=2, prog, vers, proc,
//!  cred, verf, arguments`. Reply envelope: `xid, msg_type=REPLY, reply_stat`,
//!  then either `verf, accept_stat [, results | mismatch_info]` for
//!  MSG_ACCEPTED or `reject_stat [, mismatch_info | auth_stat]` for
//!  MSG_DENIED.
//!
//! On stream transports every message travels inside one or more record
//!  fragments (see [parser::RecordParser]); on datagram transports the
//!  envelope is the whole UDP payload.

pub mod client;
pub mod parser;
pub mod server;
pub mod udp;
pub mod xdr;

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::buffers::Buffers;
use crate::error::{Error, ParseReason, RpcErrorCode};
use crate::marshal::{Marshaller, Unmarshaller};
use crate::message::{MessageDecoder, MessageFactory, WireMessage};
use crate::oncrpc::xdr::{XdrMarshaller, XdrUnmarshaller};

pub use client::OncRpcClient;
pub use server::{OncRpcHandler, OncRpcServer};
pub use udp::{OncRpcUdpClient, OncRpcUdpServer};

/// The only RPC protocol version this crate speaks.
pub const RPC_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum MsgType {
    Call = 0,
    Reply = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ReplyStat {
    Accepted = 0,
    Denied = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum AcceptStat {
    Success = 0,
    ProgUnavail = 1,
    ProgMismatch = 2,
    ProcUnavail = 3,
    GarbageArgs = 4,
    SystemErr = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum RejectStat {
    RpcMismatch = 0,
    AuthError = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum AuthStat {
    Ok = 0,
    BadCred = 1,
    RejectedCred = 2,
    BadVerf = 3,
    RejectedVerf = 4,
    TooWeak = 5,
    InvalidResp = 6,
    Failed = 7,
}

/// Auth flavors recognized at the envelope level; anything else is carried
///  through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlavor {
    None,
    Sys,
    Short,
    Other(u32),
}

impl From<u32> for AuthFlavor {
    fn from(value: u32) -> AuthFlavor {
        match value {
            0 => AuthFlavor::None,
            1 => AuthFlavor::Sys,
            2 => AuthFlavor::Short,
            other => AuthFlavor::Other(other),
        }
    }
}

impl From<AuthFlavor> for u32 {
    fn from(value: AuthFlavor) -> u32 {
        match value {
            AuthFlavor::None => 0,
            AuthFlavor::Sys => 1,
            AuthFlavor::Short => 2,
            AuthFlavor::Other(other) => other,
        }
    }
}

/// An opaque credential or verifier blob with its flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Bytes,
}

impl OpaqueAuth {
    pub fn none() -> OpaqueAuth {
        OpaqueAuth {
            flavor: AuthFlavor::None,
            body: Bytes::new(),
        }
    }

    fn marshal(&self, m: &mut XdrMarshaller) {
        m.write_u32("flavor", self.flavor.into());
        m.write_opaque("body", &self.body);
    }

    fn unmarshal(u: &mut XdrUnmarshaller) -> Result<OpaqueAuth, Error> {
        let flavor = AuthFlavor::from(u.read_u32("flavor")?);
        let body = u.read_opaque("body")?;
        Ok(OpaqueAuth { flavor, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MismatchInfo {
    pub low: u32,
    pub high: u32,
}

/// A call envelope owning its business request. The XDR `proc` field is the
///  inner message's type id.
#[derive(Debug)]
pub struct OncRpcCall {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
    pub body: Box<dyn WireMessage>,
}

impl OncRpcCall {
    pub fn new(xid: u32, prog: u32, vers: u32, body: Box<dyn WireMessage>) -> OncRpcCall {
        OncRpcCall {
            xid,
            prog,
            vers,
            cred: OpaqueAuth::none(),
            verf: OpaqueAuth::none(),
            body,
        }
    }

    pub fn proc_number(&self) -> u32 {
        self.body.type_id()
    }

    /// XDR-encode; with `record_marked` the message is framed as a single
    ///  last fragment for stream transports.
    pub fn marshal(&self, record_marked: bool) -> Buffers {
        let mut m = XdrMarshaller::new();
        m.write_u32("xid", self.xid);
        m.write_u32("msg_type", MsgType::Call.into());
        m.write_u32("rpcvers", RPC_VERSION);
        m.write_u32("prog", self.prog);
        m.write_u32("vers", self.vers);
        m.write_u32("proc", self.proc_number());
        self.cred.marshal(&mut m);
        self.verf.marshal(&mut m);
        self.body.marshal(&mut m);
        frame(m.into_bytes(), record_marked)
    }
}

/// The body of a reply envelope, covering every reply_stat / accept_stat /
///  reject_stat combination of RFC 5531.
#[derive(Debug)]
pub enum OncRpcReplyBody {
    Success {
        verf: OpaqueAuth,
        body: Box<dyn WireMessage>,
    },
    /// MSG_ACCEPTED with an accept_stat other than SUCCESS. `mismatch` is
    ///  present exactly for PROG_MISMATCH.
    AcceptedError {
        verf: OpaqueAuth,
        stat: AcceptStat,
        mismatch: Option<MismatchInfo>,
    },
    /// MSG_DENIED / RPC_MISMATCH
    RpcMismatch(MismatchInfo),
    /// MSG_DENIED / AUTH_ERROR
    AuthError(AuthStat),
}

#[derive(Debug)]
pub struct OncRpcReply {
    pub xid: u32,
    pub body: OncRpcReplyBody,
}

impl OncRpcReply {
    pub fn success(xid: u32, body: Box<dyn WireMessage>) -> OncRpcReply {
        OncRpcReply {
            xid,
            body: OncRpcReplyBody::Success {
                verf: OpaqueAuth::none(),
                body,
            },
        }
    }

    pub fn accepted_error(xid: u32, stat: AcceptStat, mismatch: Option<MismatchInfo>) -> OncRpcReply {
        debug_assert!(stat != AcceptStat::Success);
        debug_assert!((stat == AcceptStat::ProgMismatch) == mismatch.is_some());
        OncRpcReply {
            xid,
            body: OncRpcReplyBody::AcceptedError {
                verf: OpaqueAuth::none(),
                stat,
                mismatch,
            },
        }
    }

    pub fn marshal(&self, record_marked: bool) -> Buffers {
        let mut m = XdrMarshaller::new();
        m.write_u32("xid", self.xid);
        m.write_u32("msg_type", MsgType::Reply.into());
        match &self.body {
            OncRpcReplyBody::Success { verf, body } => {
                m.write_u32("reply_stat", ReplyStat::Accepted.into());
                verf.marshal(&mut m);
                m.write_u32("accept_stat", AcceptStat::Success.into());
                body.marshal(&mut m);
            }
            OncRpcReplyBody::AcceptedError {
                verf,
                stat,
                mismatch,
            } => {
                m.write_u32("reply_stat", ReplyStat::Accepted.into());
                verf.marshal(&mut m);
                m.write_u32("accept_stat", (*stat).into());
                if let Some(info) = mismatch {
                    m.write_u32("low", info.low);
                    m.write_u32("high", info.high);
                }
            }
            OncRpcReplyBody::RpcMismatch(info) => {
                m.write_u32("reply_stat", ReplyStat::Denied.into());
                m.write_u32("reject_stat", RejectStat::RpcMismatch.into());
                m.write_u32("low", info.low);
                m.write_u32("high", info.high);
            }
            OncRpcReplyBody::AuthError(stat) => {
                m.write_u32("reply_stat", ReplyStat::Denied.into());
                m.write_u32("reject_stat", RejectStat::AuthError.into());
                m.write_u32("auth_stat", (*stat).into());
            }
        }
        frame(m.into_bytes(), record_marked)
    }

    /// Map this reply to the caller-visible result per the protocol error
    ///  mapping: SUCCESS yields the business message, everything else one of
    ///  the typed protocol/auth errors.
    pub fn into_result(self) -> Result<Box<dyn WireMessage>, Error> {
        match self.body {
            OncRpcReplyBody::Success { body, .. } => Ok(body),
            OncRpcReplyBody::AcceptedError { stat, mismatch, .. } => {
                let code = match (stat, mismatch) {
                    (AcceptStat::ProgUnavail, _) => RpcErrorCode::ProgramUnavailable,
                    (AcceptStat::ProgMismatch, Some(info)) => RpcErrorCode::ProgramMismatch {
                        low: info.low,
                        high: info.high,
                    },
                    (AcceptStat::ProgMismatch, None) => RpcErrorCode::ProgramMismatch {
                        low: 0,
                        high: 0,
                    },
                    (AcceptStat::ProcUnavail, _) => RpcErrorCode::ProcedureUnavailable,
                    (AcceptStat::GarbageArgs, _) => RpcErrorCode::GarbageArguments,
                    (AcceptStat::SystemErr, _) => RpcErrorCode::System,
                    (AcceptStat::Success, _) => {
                        unreachable!("Success is represented by OncRpcReplyBody::Success")
                    }
                };
                Err(Error::Protocol { code })
            }
            OncRpcReplyBody::RpcMismatch(info) => Err(Error::Protocol {
                code: RpcErrorCode::RpcMismatch {
                    low: info.low,
                    high: info.high,
                },
            }),
            OncRpcReplyBody::AuthError(stat) => Err(Error::Auth { stat }),
        }
    }
}

fn frame(payload: Bytes, record_marked: bool) -> Buffers {
    let mut buffers = Buffers::with_capacity(2);
    if record_marked {
        buffers.push(parser::record_mark(payload.len(), true));
    }
    buffers.push(payload);
    buffers
}

fn envelope_err() -> Error {
    Error::parse("oncrpc", ParseReason::MalformedEnvelope)
}

/// Outcome of decoding a received call on the server side.
pub enum CallOutcome {
    Call(OncRpcCall),
    /// The envelope was well-formed but the call cannot be dispatched; the
    ///  appropriate error reply is already prepared.
    Reject(OncRpcReply),
}

/// Decode a call envelope plus its business request. Unknown program,
///  version or procedure and argument decode failures yield a ready-made
///  error reply ([CallOutcome::Reject]); a malformed envelope is a parse
///  error that kills the connection.
pub fn decode_call(payload: Bytes, factory: &MessageFactory) -> Result<CallOutcome, Error> {
    let mut u = XdrUnmarshaller::new(payload);

    let xid = u.read_u32("xid")?;
    let msg_type =
        MsgType::try_from(u.read_u32("msg_type")?).map_err(|_| envelope_err())?;
    if msg_type != MsgType::Call {
        return Err(envelope_err());
    }

    let rpcvers = u.read_u32("rpcvers")?;
    if rpcvers != RPC_VERSION {
        return Ok(CallOutcome::Reject(OncRpcReply {
            xid,
            body: OncRpcReplyBody::RpcMismatch(MismatchInfo {
                low: RPC_VERSION,
                high: RPC_VERSION,
            }),
        }));
    }

    let prog = u.read_u32("prog")?;
    let vers = u.read_u32("vers")?;
    let proc = u.read_u32("proc")?;
    let cred = OpaqueAuth::unmarshal(&mut u)?;
    let verf = OpaqueAuth::unmarshal(&mut u)?;

    let Some(decoder) = factory.request_decoder(prog, vers, proc) else {
        let reply = match factory.version_range(prog) {
            None => OncRpcReply::accepted_error(xid, AcceptStat::ProgUnavail, None),
            Some((low, high)) if !(low..=high).contains(&vers) => OncRpcReply::accepted_error(
                xid,
                AcceptStat::ProgMismatch,
                Some(MismatchInfo { low, high }),
            ),
            Some(_) => OncRpcReply::accepted_error(xid, AcceptStat::ProcUnavail, None),
        };
        return Ok(CallOutcome::Reject(reply));
    };

    let body = match decoder(&mut u) {
        Ok(body) => body,
        Err(_) => {
            return Ok(CallOutcome::Reject(OncRpcReply::accepted_error(
                xid,
                AcceptStat::GarbageArgs,
                None,
            )))
        }
    };

    Ok(CallOutcome::Call(OncRpcCall {
        xid,
        prog,
        vers,
        cred,
        verf,
        body,
    }))
}

/// The xid of a reply envelope, without consuming the rest. Used to pick the
///  outstanding call (and with it the result decoder) before fully decoding.
pub fn peek_reply_xid(payload: &[u8]) -> Result<u32, Error> {
    if payload.len() < 4 {
        return Err(Error::parse("oncrpc", ParseReason::UnexpectedEof));
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Decode a reply envelope. `result_decoder` is only consulted for
///  SUCCESS replies; it comes from the outstanding call matched by xid.
pub fn decode_reply(
    payload: Bytes,
    result_decoder: &MessageDecoder,
) -> Result<OncRpcReply, Error> {
    let mut u = XdrUnmarshaller::new(payload);

    let xid = u.read_u32("xid")?;
    let msg_type =
        MsgType::try_from(u.read_u32("msg_type")?).map_err(|_| envelope_err())?;
    if msg_type != MsgType::Reply {
        return Err(envelope_err());
    }

    let reply_stat =
        ReplyStat::try_from(u.read_u32("reply_stat")?).map_err(|_| envelope_err())?;

    let body = match reply_stat {
        ReplyStat::Accepted => {
            let verf = OpaqueAuth::unmarshal(&mut u)?;
            let accept_stat =
                AcceptStat::try_from(u.read_u32("accept_stat")?).map_err(|_| envelope_err())?;
            match accept_stat {
                AcceptStat::Success => OncRpcReplyBody::Success {
                    verf,
                    body: result_decoder(&mut u)?,
                },
                AcceptStat::ProgMismatch => OncRpcReplyBody::AcceptedError {
                    verf,
                    stat: accept_stat,
                    mismatch: Some(MismatchInfo {
                        low: u.read_u32("low")?,
                        high: u.read_u32("high")?,
                    }),
                },
                _ => OncRpcReplyBody::AcceptedError {
                    verf,
                    stat: accept_stat,
                    mismatch: None,
                },
            }
        }
        ReplyStat::Denied => {
            let reject_stat =
                RejectStat::try_from(u.read_u32("reject_stat")?).map_err(|_| envelope_err())?;
            match reject_stat {
                RejectStat::RpcMismatch => OncRpcReplyBody::RpcMismatch(MismatchInfo {
                    low: u.read_u32("low")?,
                    high: u.read_u32("high")?,
                }),
                RejectStat::AuthError => OncRpcReplyBody::AuthError(
                    AuthStat::try_from(u.read_u32("auth_stat")?).map_err(|_| envelope_err())?,
                ),
            }
        }
    };

    Ok(OncRpcReply { xid, body })
}
