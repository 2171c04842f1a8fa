use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, ParseReason};
use crate::marshal::Unmarshaller;

fn parse_err() -> Error {
    Error::parse("json", ParseReason::InvalidJson)
}

/// Parse a complete buffer into a JSON DOM.
pub fn parse_json(buf: &[u8]) -> Result<Value, Error> {
    serde_json::from_slice(buf).map_err(|_| parse_err())
}

struct Cursor<'a> {
    value: &'a Value,
    /// Next element for array iteration; unused on objects.
    index: usize,
}

/// [Unmarshaller] over a parsed JSON tree, driven by key requests from a
///  message decoder. Object members are looked up by key (order-independent);
///  array elements are delivered sequentially.
pub struct JsonUnmarshaller<'a> {
    stack: Vec<Cursor<'a>>,
}

impl<'a> JsonUnmarshaller<'a> {
    pub fn new(root: &'a Value) -> JsonUnmarshaller<'a> {
        JsonUnmarshaller {
            stack: vec![Cursor {
                value: root,
                index: 0,
            }],
        }
    }

    fn next_value(&mut self, key: &str) -> Result<&'a Value, Error> {
        let top = self.stack.last_mut().ok_or_else(parse_err)?;
        match top.value {
            Value::Object(map) => map.get(key).ok_or_else(parse_err),
            Value::Array(items) => {
                let value = items.get(top.index).ok_or_else(parse_err)?;
                top.index += 1;
                Ok(value)
            }
            _ => Err(parse_err()),
        }
    }
}

impl Unmarshaller for JsonUnmarshaller<'_> {
    fn read_bool(&mut self, key: &str) -> Result<bool, Error> {
        self.next_value(key)?.as_bool().ok_or_else(parse_err)
    }

    fn read_u32(&mut self, key: &str) -> Result<u32, Error> {
        let value = self.next_value(key)?.as_u64().ok_or_else(parse_err)?;
        u32::try_from(value).map_err(|_| parse_err())
    }

    fn read_u64(&mut self, key: &str) -> Result<u64, Error> {
        self.next_value(key)?.as_u64().ok_or_else(parse_err)
    }

    fn read_i64(&mut self, key: &str) -> Result<i64, Error> {
        self.next_value(key)?.as_i64().ok_or_else(parse_err)
    }

    fn read_f64(&mut self, key: &str) -> Result<f64, Error> {
        self.next_value(key)?.as_f64().ok_or_else(parse_err)
    }

    fn read_string(&mut self, key: &str) -> Result<String, Error> {
        Ok(self
            .next_value(key)?
            .as_str()
            .ok_or_else(parse_err)?
            .to_owned())
    }

    fn read_opaque(&mut self, key: &str) -> Result<Bytes, Error> {
        let items = self.next_value(key)?.as_array().ok_or_else(parse_err)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let byte = item.as_u64().ok_or_else(parse_err)?;
            out.push(u8::try_from(byte).map_err(|_| parse_err())?);
        }
        Ok(Bytes::from(out))
    }

    fn begin_struct(&mut self, key: &str) -> Result<(), Error> {
        let value = self.next_value(key)?;
        if !value.is_object() {
            return Err(parse_err());
        }
        self.stack.push(Cursor { value, index: 0 });
        Ok(())
    }

    fn end_struct(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(cursor) if cursor.value.is_object() => Ok(()),
            _ => Err(parse_err()),
        }
    }

    fn begin_seq(&mut self, key: &str) -> Result<usize, Error> {
        let value = self.next_value(key)?;
        let len = value.as_array().ok_or_else(parse_err)?.len();
        self.stack.push(Cursor { value, index: 0 });
        Ok(len)
    }

    fn end_seq(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(cursor) if cursor.value.is_array() => Ok(()),
            _ => Err(parse_err()),
        }
    }
}
