use bytes::Bytes;

/// An ordered sequence of byte buffers, written to a socket with vectored I/O.
///  Marshalling builds one of these so that an already-materialized header and
///  a caller-owned body can be sent without copying either.
#[derive(Debug, Default, Clone)]
pub struct Buffers {
    chunks: Vec<Bytes>,
}

impl Buffers {
    pub fn new() -> Buffers {
        Buffers { chunks: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Buffers {
        Buffers {
            chunks: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Concatenate into a single contiguous buffer. Used by the datagram
    ///  transport (one UDP payload per message) and by tests; the stream
    ///  transports write the chunks as-is.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut out = Vec::with_capacity(self.len());
                for chunk in &self.chunks {
                    out.extend_from_slice(chunk);
                }
                Bytes::from(out)
            }
        }
    }
}

impl From<Bytes> for Buffers {
    fn from(chunk: Bytes) -> Self {
        let mut buffers = Buffers::new();
        buffers.push(chunk);
        buffers
    }
}

impl FromIterator<Bytes> for Buffers {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        let mut buffers = Buffers::new();
        for chunk in iter {
            buffers.push(chunk);
        }
        buffers
    }
}
