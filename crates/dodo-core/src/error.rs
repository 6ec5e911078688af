//! Error types for the dodo engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DodoError>;

/// Errors surfaced by plan validation, preflight, or run teardown.
///
/// Per-request failures are never represented here: they are classified
/// into outcome labels and counted in the latency summary instead.
#[derive(Error, Debug)]
pub enum DodoError {
    #[error("target URL is required")]
    MissingUrl,

    #[error("unsupported URL scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("dodo count must be at least 1")]
    ZeroDodos,

    #[error("at least one of request count or duration must be set")]
    NoBudget,

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("unsupported proxy scheme: {0} (expected http, socks5 or socks5h)")]
    UnsupportedProxyScheme(String),

    #[error("template error in {field}: {source}")]
    Template {
        field: String,
        #[source]
        source: crate::template::TemplateError,
    },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    #[error("no usable client remains after proxy screening")]
    NoUsableClient,

    #[error("interrupted")]
    Interrupted,
}
