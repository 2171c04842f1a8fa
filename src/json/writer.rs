use bytes::Bytes;
use serde_json::{Map, Number, Value};

use crate::marshal::Marshaller;

enum Container {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

struct Level {
    key: String,
    container: Container,
}

/// [Marshaller] implementation that builds a JSON document. Nesting is
///  tracked with an explicit stack; scalar writes consult the current
///  container to decide whether their key is emitted (object member) or
///  ignored (array element). [JsonMarshaller::finish] serializes the
///  document.
pub struct JsonMarshaller {
    stack: Vec<Level>,
    root: Option<Value>,
}

impl JsonMarshaller {
    pub fn new() -> JsonMarshaller {
        JsonMarshaller {
            stack: Vec::new(),
            root: None,
        }
    }

    /// Insert a pre-built [Value]; used by the RPC envelope code to echo
    ///  opaque values such as the JSON-RPC `id`.
    pub fn write_value(&mut self, key: &str, value: Value) {
        self.insert(key, value);
    }

    /// Serialize the document written so far. A document without any writes
    ///  serializes as `null`.
    pub fn finish(mut self) -> Bytes {
        debug_assert!(
            self.stack.is_empty(),
            "unbalanced begin/end calls while marshalling"
        );
        let root = self.root.take().unwrap_or(Value::Null);
        Bytes::from(serde_json::to_vec(&root).expect("serde_json::Value always serializes"))
    }

    fn insert(&mut self, key: &str, value: Value) {
        match self.stack.last_mut() {
            None => self.root = Some(value),
            Some(level) => match &mut level.container {
                Container::Object(map) => {
                    map.insert(key.to_owned(), value);
                }
                Container::Array(items) => items.push(value),
            },
        }
    }
}

impl Default for JsonMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaller for JsonMarshaller {
    fn write_bool(&mut self, key: &str, value: bool) {
        self.insert(key, Value::Bool(value));
    }

    fn write_u32(&mut self, key: &str, value: u32) {
        self.insert(key, Value::Number(value.into()));
    }

    fn write_u64(&mut self, key: &str, value: u64) {
        self.insert(key, Value::Number(value.into()));
    }

    fn write_i64(&mut self, key: &str, value: i64) {
        self.insert(key, Value::Number(value.into()));
    }

    fn write_f64(&mut self, key: &str, value: f64) {
        let number = Number::from_f64(value).unwrap_or_else(|| 0.into());
        self.insert(key, Value::Number(number));
    }

    fn write_str(&mut self, key: &str, value: &str) {
        self.insert(key, Value::String(value.to_owned()));
    }

    fn write_opaque(&mut self, key: &str, value: &[u8]) {
        let items = value.iter().map(|&b| Value::Number(b.into())).collect();
        self.insert(key, Value::Array(items));
    }

    fn write_null(&mut self, key: &str) {
        self.insert(key, Value::Null);
    }

    fn begin_struct(&mut self, key: &str) {
        self.stack.push(Level {
            key: key.to_owned(),
            container: Container::Object(Map::new()),
        });
    }

    fn end_struct(&mut self) {
        let level = self
            .stack
            .pop()
            .expect("end_struct without matching begin_struct");
        let value = match level.container {
            Container::Object(map) => Value::Object(map),
            Container::Array(_) => unreachable!("struct level must hold an object"),
        };
        self.insert(&level.key, value);
    }

    fn begin_seq(&mut self, key: &str, len: usize) {
        self.stack.push(Level {
            key: key.to_owned(),
            container: Container::Array(Vec::with_capacity(len)),
        });
    }

    fn end_seq(&mut self) {
        let level = self
            .stack
            .pop()
            .expect("end_seq without matching begin_seq");
        let value = match level.container {
            Container::Array(items) => Value::Array(items),
            Container::Object(_) => unreachable!("sequence level must hold an array"),
        };
        self.insert(&level.key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_object() {
        let mut marshaller = JsonMarshaller::new();
        marshaller.begin_struct("");
        marshaller.write_str("name", "volume0");
        marshaller.write_u32("size", 42);
        marshaller.write_bool("ro", false);
        marshaller.write_null("owner");
        marshaller.end_struct();

        assert_eq!(
            marshaller.finish().as_ref(),
            br#"{"name":"volume0","size":42,"ro":false,"owner":null}"#
        );
    }

    #[test]
    fn test_keys_ignored_inside_arrays() {
        let mut marshaller = JsonMarshaller::new();
        marshaller.begin_seq("", 3);
        marshaller.write_u32("ignored", 1);
        marshaller.write_u32("also-ignored", 2);
        marshaller.begin_struct("ignored-too");
        marshaller.write_str("k", "v");
        marshaller.end_struct();
        marshaller.end_seq();

        assert_eq!(marshaller.finish().as_ref(), br#"[1,2,{"k":"v"}]"#);
    }

    #[test]
    fn test_member_order_is_write_order() {
        let mut marshaller = JsonMarshaller::new();
        marshaller.begin_struct("");
        marshaller.write_u32("z", 1);
        marshaller.write_u32("a", 2);
        marshaller.write_u32("m", 3);
        marshaller.end_struct();

        assert_eq!(marshaller.finish().as_ref(), br#"{"z":1,"a":2,"m":3}"#);
    }

    #[test]
    fn test_empty_document_is_null() {
        assert_eq!(JsonMarshaller::new().finish().as_ref(), b"null");
    }
}
