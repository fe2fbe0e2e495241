use std::io;

/// Error kinds per the MITM proxy's error handling design.
///
/// `Protocol` and `Io` abort only the session that raised them. `Crypto`
/// fails the current TLS handshake / cert mint without touching other cache
/// entries. `Blocked` and `Upstream` come back through the handler contract.
/// `Config` is fatal and only ever raised before `Server::run` accepts its
/// first connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("blocked by handler")]
    Blocked,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
