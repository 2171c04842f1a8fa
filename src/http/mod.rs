pub mod access_log;
pub mod client;
pub mod message;
pub mod parser;
pub mod server;

pub use access_log::{AccessLog, AccessLogFormat};
pub use client::HttpClient;
pub use message::{HttpMessage, HttpRequest, HttpResponse, HttpVersion};
pub use parser::{parse_http_date, HttpParser, Parsed, RequestKind, ResponseKind};
pub use server::{HttpRequestHandler, HttpServer};
