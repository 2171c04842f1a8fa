pub mod reader;
pub mod writer;

pub use reader::{parse_json, JsonUnmarshaller};
pub use writer::JsonMarshaller;

/// The JSON DOM used at the RPC envelope boundary. Object member order is
///  preserved (`serde_json` with `preserve_order`), matching the wire.
pub type JsonValue = serde_json::Value;
