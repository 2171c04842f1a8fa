use std::time::Duration;

/// Configuration of a stream-socket RPC client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The number of connections the client keeps to one peer, i.e. the
    ///  degree of parallelism toward that peer. Each request exclusively
    ///  occupies one connection from the moment it is sent until its response
    ///  arrives; further requests block cooperatively until a connection
    ///  becomes free.
    pub concurrency_level: u16,

    /// Deadline for a single TCP connect attempt.
    pub connect_timeout: Duration,

    /// How often a failed connect is retried before the request that needed
    ///  the connection receives a terminal connect error.
    pub reconnect_tries_max: u16,

    /// Deadline for receiving the complete response to a request, measured
    ///  from the start of the receive phase.
    pub recv_timeout: Duration,

    /// Deadline for writing out a marshalled request.
    pub send_timeout: Duration,

    /// Upper bound for a single parsed message (HTTP body, reassembled
    ///  ONC-RPC record). Messages beyond this fail parsing rather than
    ///  exhausting memory.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            concurrency_level: 1,
            connect_timeout: Duration::from_secs(5),
            reconnect_tries_max: 2,
            recv_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// A `concurrency_level` of 0 would deadlock the pool; it is treated as 1.
    pub(crate) fn effective_concurrency_level(&self) -> usize {
        self.concurrency_level.max(1) as usize
    }
}

/// Configuration of a stream-socket RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound for a single parsed message, as for clients.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            max_message_size: 16 * 1024 * 1024,
        }
    }
}
