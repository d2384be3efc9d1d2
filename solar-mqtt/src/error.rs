use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    MQTTOptionError(#[from] rumqttc::OptionError),

    #[error(transparent)]
    MQTTClientError(#[from] rumqttc::ClientError),

    #[error(transparent)]
    MQTTConnectionError(#[from] rumqttc::ConnectionError),

    #[error(transparent)]
    InvalidSocketAddr(#[from] std::net::AddrParseError),

    #[cfg(feature = "rtu")]
    #[error(transparent)]
    SerialError(#[from] tokio_serial::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    /// Transport open or exchange failure. The connection handle is already
    /// invalidated when this is returned; the next exchange must re-open.
    #[error("transport {transport}: {source}")]
    Connection {
        transport: String,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected raw payload. The device stays online; the affected entity
    /// is published as unavailable.
    #[error("register {register}: {reason}")]
    Decode { register: String, reason: String },

    /// Serial-number check failed at startup. The device is disabled for the
    /// rest of the session; other devices are unaffected.
    #[error("device {device}: configured serial {expected:?} but device reports {actual:?}")]
    IdentityMismatch {
        device: String,
        expected: String,
        actual: String,
    },

    /// A command write kept failing until the attempt ceiling.
    #[error("register {register}: write failed after {attempts} attempts")]
    WriteRejected { register: String, attempts: u32 },

    /// Invalid or contradictory configuration. The only error that is fatal
    /// to the process, surfaced before the scheduler starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("RecvError")]
    RecvError,

    #[error("SendError")]
    SendError,

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl Error {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
