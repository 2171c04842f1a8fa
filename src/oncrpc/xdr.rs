use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ParseReason};
use crate::marshal::{Marshaller, Unmarshaller};

fn eof() -> Error {
    Error::parse("xdr", ParseReason::UnexpectedEof)
}

/// XDR (RFC 4506) encoder. All quantities are big-endian and padded to
///  4-byte alignment; keys passed through the [Marshaller] interface are
///  ignored because XDR is purely positional.
pub struct XdrMarshaller {
    buf: BytesMut,
}

impl XdrMarshaller {
    pub fn new() -> XdrMarshaller {
        XdrMarshaller {
            buf: BytesMut::new(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn put_padded(&mut self, data: &[u8]) {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        let padding = (4 - data.len() % 4) % 4;
        self.buf.put_bytes(0, padding);
    }
}

impl Default for XdrMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaller for XdrMarshaller {
    fn write_bool(&mut self, _key: &str, value: bool) {
        self.buf.put_u32(value as u32);
    }

    fn write_u32(&mut self, _key: &str, value: u32) {
        self.buf.put_u32(value);
    }

    fn write_u64(&mut self, _key: &str, value: u64) {
        self.buf.put_u64(value);
    }

    fn write_i64(&mut self, _key: &str, value: i64) {
        self.buf.put_i64(value);
    }

    fn write_f64(&mut self, _key: &str, value: f64) {
        self.buf.put_f64(value);
    }

    fn write_str(&mut self, _key: &str, value: &str) {
        self.put_padded(value.as_bytes());
    }

    fn write_opaque(&mut self, _key: &str, value: &[u8]) {
        self.put_padded(value);
    }

    fn write_null(&mut self, _key: &str) {}

    fn begin_struct(&mut self, _key: &str) {}

    fn end_struct(&mut self) {}

    fn begin_seq(&mut self, _key: &str, len: usize) {
        self.buf.put_u32(len as u32);
    }

    fn end_seq(&mut self) {}
}

/// XDR decoder over a received buffer.
pub struct XdrUnmarshaller {
    buf: Bytes,
}

impl XdrUnmarshaller {
    pub fn new(buf: Bytes) -> XdrUnmarshaller {
        XdrUnmarshaller { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn take_u32(&mut self) -> Result<u32, Error> {
        if self.buf.remaining() < 4 {
            return Err(eof());
        }
        Ok(self.buf.get_u32())
    }

    fn take_padded(&mut self) -> Result<Bytes, Error> {
        let len = self.take_u32()? as usize;
        let padding = (4 - len % 4) % 4;
        if self.buf.remaining() < len + padding {
            return Err(eof());
        }
        let data = self.buf.split_to(len);
        self.buf.advance(padding);
        Ok(data)
    }
}

impl Unmarshaller for XdrUnmarshaller {
    fn read_bool(&mut self, key: &str) -> Result<bool, Error> {
        match self.read_u32(key)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::parse("xdr", ParseReason::MalformedEnvelope)),
        }
    }

    fn read_u32(&mut self, _key: &str) -> Result<u32, Error> {
        self.take_u32()
    }

    fn read_u64(&mut self, _key: &str) -> Result<u64, Error> {
        if self.buf.remaining() < 8 {
            return Err(eof());
        }
        Ok(self.buf.get_u64())
    }

    fn read_i64(&mut self, _key: &str) -> Result<i64, Error> {
        if self.buf.remaining() < 8 {
            return Err(eof());
        }
        Ok(self.buf.get_i64())
    }

    fn read_f64(&mut self, _key: &str) -> Result<f64, Error> {
        if self.buf.remaining() < 8 {
            return Err(eof());
        }
        Ok(self.buf.get_f64())
    }

    fn read_string(&mut self, _key: &str) -> Result<String, Error> {
        let data = self.take_padded()?;
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::parse("xdr", ParseReason::InvalidUtf8))
    }

    fn read_opaque(&mut self, _key: &str) -> Result<Bytes, Error> {
        self.take_padded()
    }

    fn begin_struct(&mut self, _key: &str) -> Result<(), Error> {
        Ok(())
    }

    fn end_struct(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn begin_seq(&mut self, _key: &str) -> Result<usize, Error> {
        Ok(self.take_u32()? as usize)
    }

    fn end_seq(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty("", &[0, 0, 0, 0])]
    #[case::one_byte("a", &[0, 0, 0, 1, b'a', 0, 0, 0])]
    #[case::four_bytes("abcd", &[0, 0, 0, 4, b'a', b'b', b'c', b'd'])]
    #[case::five_bytes("abcde", &[0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0])]
    fn test_string_padding(#[case] input: &str, #[case] expected: &[u8]) {
        let mut marshaller = XdrMarshaller::new();
        marshaller.write_str("", input);
        assert_eq!(marshaller.into_bytes().as_ref(), expected);
    }

    #[test]
    fn test_primitive_roundtrip() {
        let mut marshaller = XdrMarshaller::new();
        marshaller.write_bool("", true);
        marshaller.write_u32("", 0x11223344);
        marshaller.write_u64("", u64::MAX - 1);
        marshaller.write_i64("", -17);
        marshaller.write_f64("", 2.5);
        marshaller.write_str("", "osd/1");
        marshaller.write_opaque("", &[9, 8, 7]);
        marshaller.begin_seq("", 2);
        marshaller.write_u32("", 1);
        marshaller.write_u32("", 2);
        marshaller.end_seq();

        let mut reader = XdrUnmarshaller::new(marshaller.into_bytes());
        assert!(reader.read_bool("").unwrap());
        assert_eq!(reader.read_u32("").unwrap(), 0x11223344);
        assert_eq!(reader.read_u64("").unwrap(), u64::MAX - 1);
        assert_eq!(reader.read_i64("").unwrap(), -17);
        assert_eq!(reader.read_f64("").unwrap(), 2.5);
        assert_eq!(reader.read_string("").unwrap(), "osd/1");
        assert_eq!(reader.read_opaque("").unwrap().as_ref(), &[9, 8, 7]);
        assert_eq!(reader.begin_seq("").unwrap(), 2);
        assert_eq!(reader.read_u32("").unwrap(), 1);
        assert_eq!(reader.read_u32("").unwrap(), 2);
        reader.end_seq().unwrap();
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_u32() {
        let mut reader = XdrUnmarshaller::new(Bytes::from_static(&[0, 0, 1]));
        assert!(reader.read_u32("").is_err());
    }

    #[test]
    fn test_truncated_opaque() {
        // declared length 9, only one payload byte present
        let mut reader = XdrUnmarshaller::new(Bytes::from_static(&[0, 0, 0, 9, b'a']));
        assert!(reader.read_opaque("").is_err());
    }

    #[test]
    fn test_bool_rejects_other_values() {
        let mut reader = XdrUnmarshaller::new(Bytes::from_static(&[0, 0, 0, 2]));
        assert!(reader.read_bool("").is_err());
    }
}
