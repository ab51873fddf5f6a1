use std::net::SocketAddr;

use thiserror::Error;

/// Error surface for the daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] preview_core::ConfigError),

    #[error("build error: {0}")]
    Build(#[from] preview_build::BuildError),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server on {addr} failed: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("signal handler failed: {0}")]
    Signal(#[source] std::io::Error),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}
