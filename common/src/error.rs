//! Error type shared by the camwatch library modules.

use std::path::PathBuf;

/// Errors raised by configuration loading, alert bookkeeping and
/// digest authentication.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration parsed but is not usable.
    #[error("invalid config: {0}")]
    Config(String),

    /// An event was attributed to a camera the aggregator does not track.
    #[error("unknown camera: {0}")]
    UnknownCamera(String),

    /// The server's `WWW-Authenticate` header is missing or not a digest
    /// challenge we can answer.
    #[error("unsupported authentication challenge: {0}")]
    DigestChallenge(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
