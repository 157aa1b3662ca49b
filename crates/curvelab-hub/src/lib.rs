//! # Curvelab Hub Crate
//!
//! The session hub: one authoritative document replica per session id,
//! plus fan-out of change and presence messages to every other client in
//! the session. The hub never originates commands; it is a combined relay
//! and durable replica that keeps late joiners consistent.

pub mod config;
pub mod server;
pub mod session;

pub use config::HubConfig;
pub use server::run;
pub use session::{SessionRegistry, SessionRoom};

/// Errors from running the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
