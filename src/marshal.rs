use bytes::Bytes;

use crate::error::Error;

/// Visitor through which business messages write themselves onto the wire.
///
/// The two implementations differ in how much of the call they use: the XDR
///  marshaller ignores keys entirely (XDR is positional), the JSON marshaller
///  uses keys inside objects and ignores them inside arrays. Messages call the
///  same sequence either way, which is what lets one message type travel over
///  both encodings.
pub trait Marshaller {
    fn write_bool(&mut self, key: &str, value: bool);
    fn write_u32(&mut self, key: &str, value: u32);
    fn write_u64(&mut self, key: &str, value: u64);
    fn write_i64(&mut self, key: &str, value: i64);
    fn write_f64(&mut self, key: &str, value: f64);
    fn write_str(&mut self, key: &str, value: &str);
    /// Opaque byte data (XDR `opaque<>`; base64 is NOT applied on JSON, the
    ///  JSON marshaller writes it as an array of numbers).
    fn write_opaque(&mut self, key: &str, value: &[u8]);
    fn write_null(&mut self, key: &str);

    fn begin_struct(&mut self, key: &str);
    fn end_struct(&mut self);

    /// `len` must equal the number of elements subsequently written.
    fn begin_seq(&mut self, key: &str, len: usize);
    fn end_seq(&mut self);
}

/// Mirror of [Marshaller] for decoding. All reads are fallible: the input is
///  wire data.
pub trait Unmarshaller {
    fn read_bool(&mut self, key: &str) -> Result<bool, Error>;
    fn read_u32(&mut self, key: &str) -> Result<u32, Error>;
    fn read_u64(&mut self, key: &str) -> Result<u64, Error>;
    fn read_i64(&mut self, key: &str) -> Result<i64, Error>;
    fn read_f64(&mut self, key: &str) -> Result<f64, Error>;
    fn read_string(&mut self, key: &str) -> Result<String, Error>;
    fn read_opaque(&mut self, key: &str) -> Result<Bytes, Error>;

    fn begin_struct(&mut self, key: &str) -> Result<(), Error>;
    fn end_struct(&mut self) -> Result<(), Error>;

    /// Returns the element count of the sequence.
    fn begin_seq(&mut self, key: &str) -> Result<usize, Error>;
    fn end_seq(&mut self) -> Result<(), Error>;
}
