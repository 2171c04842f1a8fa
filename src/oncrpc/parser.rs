use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ParseReason};

/// Build the 4-byte record-marking header: high bit flags the last fragment,
///  the low 31 bits carry the fragment length.
pub fn record_mark(len: usize, last: bool) -> Bytes {
    debug_assert!(len <= 0x7fff_ffff);
    let mut header = len as u32;
    if last {
        header |= 0x8000_0000;
    }
    let mut out = BytesMut::with_capacity(4);
    out.put_u32(header);
    out.freeze()
}

struct Fragment {
    remaining: usize,
    last: bool,
}

/// Incremental record-marking reassembler for streamed ONC-RPC. Accumulates
///  fragment payloads until a "last fragment" header's payload completes,
///  then emits the concatenated record. Datagram transports bypass this
///  entirely (one message per datagram, no marking).
pub struct RecordParser {
    max_record_len: usize,
    acc: BytesMut,
    record: BytesMut,
    fragment: Option<Fragment>,
}

impl RecordParser {
    pub fn new(max_record_len: usize) -> RecordParser {
        RecordParser {
            max_record_len,
            acc: BytesMut::new(),
            record: BytesMut::new(),
            fragment: None,
        }
    }

    /// Feed received bytes; returns every record completed by this input, in
    ///  order.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Bytes>, Error> {
        self.acc.extend_from_slice(input);

        let mut completed = Vec::new();
        loop {
            match &mut self.fragment {
                None => {
                    if self.acc.len() < 4 {
                        return Ok(completed);
                    }
                    let header = self.acc.get_u32();
                    let len = (header & 0x7fff_ffff) as usize;
                    if self.record.len() + len > self.max_record_len {
                        return Err(Error::parse("oncrpc", ParseReason::BodyTooLarge));
                    }
                    self.fragment = Some(Fragment {
                        remaining: len,
                        last: header & 0x8000_0000 != 0,
                    });
                }
                Some(fragment) => {
                    let take = fragment.remaining.min(self.acc.len());
                    self.record.put_slice(&self.acc.split_to(take));
                    fragment.remaining -= take;
                    if fragment.remaining > 0 {
                        return Ok(completed);
                    }
                    let last = fragment.last;
                    self.fragment = None;
                    if last {
                        completed.push(self.record.split().freeze());
                    }
                }
            }
        }
    }

    /// Whether the parser sits at a record boundary (no partial input).
    pub fn is_idle(&self) -> bool {
        self.acc.is_empty() && self.record.is_empty() && self.fragment.is_none()
    }
}
