//! Server configuration
//!
//! Fixed at start-up. Defaults can be overridden from environment variables
//! and the bind address from the first command-line argument.

use std::net::SocketAddr;

use crate::avatar::AvatarStyle;
use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// WebSocket read/write buffer size
pub const SOCKET_BUFFER_SIZE: usize = 1024;

/// Per-client outbound queue capacity
pub const MESSAGE_BUFFER_SIZE: usize = 256;

/// Room command mailbox capacity
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Transport read buffer size
    pub read_buffer_size: usize,

    /// Transport write buffer size
    pub write_buffer_size: usize,

    /// Capacity of each client's outbound queue
    pub queue_capacity: usize,

    /// Capacity of the room's command mailbox
    pub command_capacity: usize,

    /// Where unauthenticated requests are redirected
    pub login_path: String,

    /// Name of the session cookie
    pub cookie_name: String,

    /// Log room events through the trace sink
    pub trace: bool,

    /// How avatar URLs are chosen
    pub avatar: AvatarStyle,

    /// Register the development identity provider
    pub dev_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            read_buffer_size: SOCKET_BUFFER_SIZE,
            write_buffer_size: SOCKET_BUFFER_SIZE,
            queue_capacity: MESSAGE_BUFFER_SIZE,
            command_capacity: COMMAND_BUFFER_SIZE,
            login_path: "/login".to_string(),
            cookie_name: "auth".to_string(),
            trace: false,
            avatar: AvatarStyle::default(),
            dev_auth: false,
        }
    }
}

impl ServerConfig {
    /// Build a config from defaults, `CHAT_*` environment variables and
    /// the command-line arguments
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars = std::env::vars().filter(|(k, _)| k.starts_with("CHAT_"));
        let addr = std::env::args().nth(1);
        Self::default().apply(vars, addr)
    }

    /// Overlay `CHAT_*` settings and an optional bind address
    pub fn apply<I>(mut self, vars: I, addr: Option<String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "CHAT_ADDR" => self.bind_addr = parse("CHAT_ADDR", &value)?,
                "CHAT_READ_BUFFER" => {
                    self.read_buffer_size = parse_size("CHAT_READ_BUFFER", &value)?
                }
                "CHAT_WRITE_BUFFER" => {
                    self.write_buffer_size = parse_size("CHAT_WRITE_BUFFER", &value)?
                }
                "CHAT_QUEUE_CAPACITY" => {
                    self.queue_capacity = parse_size("CHAT_QUEUE_CAPACITY", &value)?
                }
                "CHAT_TRACE" => self.trace = parse_flag("CHAT_TRACE", &value)?,
                "CHAT_DEV_AUTH" => self.dev_auth = parse_flag("CHAT_DEV_AUTH", &value)?,
                "CHAT_AVATAR" => {
                    self.avatar = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "CHAT_AVATAR",
                        value: value.clone(),
                    })?
                }
                _ => {}
            }
        }

        if let Some(addr) = addr {
            self.bind_addr = parse("bind address", &addr)?;
        }

        Ok(self)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the per-client queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable the development identity provider
    pub fn dev_auth(mut self, enabled: bool) -> Self {
        self.dev_auth = enabled;
        self
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_size(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
