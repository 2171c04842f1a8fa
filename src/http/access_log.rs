use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::http::message::{HttpRequest, HttpResponse, HttpVersion};

/// Access log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    /// Common Log Format:
    ///  `host - - [time] "method target HTTP/version" status bytes`
    Common,
    /// Common plus referer and user agent.
    Combined,
}

/// The request-side fields of an access log line, captured before the
///  request is handed to (and consumed by) the request handler.
#[derive(Debug, Clone)]
pub struct RequestLogInfo {
    pub time: DateTime<Utc>,
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestLogInfo {
    pub fn of(request: &HttpRequest) -> RequestLogInfo {
        RequestLogInfo {
            time: request.created_wall(),
            method: request.method().to_owned(),
            target: request.target().to_owned(),
            version: request.version(),
            referer: request.field("Referer").map(str::to_owned),
            user_agent: request.field("User-Agent").map(str::to_owned),
        }
    }
}

enum Destination {
    File {
        path: PathBuf,
        file: Option<File>,
    },
    Stream(Box<dyn Write + Send>),
}

/// Post-response request log for the HTTP server family. Writes serialize
///  behind a mutex; a failing destination is reported through `tracing` but
///  never fails the request being logged.
pub struct AccessLog {
    format: AccessLogFormat,
    destination: Mutex<Destination>,
}

impl AccessLog {
    /// Log to a file, appending. With `lazy_open` the file is only opened
    ///  (and created) on the first write.
    pub fn to_file(
        path: impl Into<PathBuf>,
        format: AccessLogFormat,
        lazy_open: bool,
    ) -> std::io::Result<AccessLog> {
        let path = path.into();
        let file = if lazy_open {
            None
        } else {
            Some(Self::open_file(&path)?)
        };
        Ok(AccessLog {
            format,
            destination: Mutex::new(Destination::File { path, file }),
        })
    }

    /// Log to an arbitrary stream, e.g. stderr.
    pub fn to_stream(stream: impl Write + Send + 'static, format: AccessLogFormat) -> AccessLog {
        AccessLog {
            format,
            destination: Mutex::new(Destination::Stream(Box::new(stream))),
        }
    }

    fn open_file(path: &PathBuf) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    pub fn write(&self, peer: SocketAddr, request: &RequestLogInfo, response: &HttpResponse) {
        let line = self.format_line(peer, request, response);

        let mut destination = self
            .destination
            .lock()
            .expect("a panic while holding the access log lock is a bug");

        let result = match &mut *destination {
            Destination::File { path, file } => {
                if file.is_none() {
                    match Self::open_file(path) {
                        Ok(opened) => *file = Some(opened),
                        Err(e) => {
                            warn!("cannot open access log {:?}: {}", path, e);
                            return;
                        }
                    }
                }
                let file = file.as_mut().expect("opened above");
                writeln!(file, "{}", line)
            }
            Destination::Stream(stream) => writeln!(stream, "{}", line),
        };

        if let Err(e) = result {
            warn!("error writing access log line: {}", e);
        }
    }

    fn format_line(
        &self,
        peer: SocketAddr,
        request: &RequestLogInfo,
        response: &HttpResponse,
    ) -> String {
        let mut line = format!(
            "{} - - [{}] \"{} {} HTTP/{}\" {} {}",
            peer.ip(),
            request.time.format("%d/%b/%Y:%H:%M:%S %z"),
            request.method,
            request.target,
            request.version,
            response.status_code(),
            response.body_len(),
        );

        if self.format == AccessLogFormat::Combined {
            line.push_str(&format!(
                " \"{}\" \"{}\"",
                request.referer.as_deref().unwrap_or("-"),
                request.user_agent.as_deref().unwrap_or("-"),
            ));
        }
        line
    }
}
