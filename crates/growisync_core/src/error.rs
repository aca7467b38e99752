//! Error taxonomy for GROWI API operations.

/// Error from a GROWI API call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Request never produced a response (DNS, connect, timeout, TLS).
    #[error("failed to reach GROWI API")]
    Connectivity(#[from] reqwest::Error),

    /// Client or request could not be built (TLS backend, invalid MIME type).
    #[error("failed to build GROWI request")]
    Request(#[source] reqwest::Error),

    /// Server refused the credentials.
    #[error("GROWI API rejected credentials for {verb} (HTTP {status})")]
    Unauthorized {
        /// API verb that was called.
        verb: String,
        /// HTTP status code.
        status: u16,
    },

    /// Non-success status, or a payload carrying `errors` / `ok: false`.
    #[error("GROWI API rejected {verb} (HTTP {status}): {detail}")]
    ServerRejection {
        /// API verb that was called.
        verb: String,
        /// HTTP status code.
        status: u16,
        /// Error payload or response body.
        detail: String,
    },

    /// Response body did not match the expected shape.
    #[error("failed to decode GROWI {verb} response")]
    Decode {
        verb: String,
        #[source]
        source: serde_json::Error,
    },

    /// Local file could not be read.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn rejection(verb: &str, status: u16, detail: impl Into<String>) -> Self {
        Self::ServerRejection {
            verb: verb.to_string(),
            status,
            detail: detail.into(),
        }
    }

    /// Whether the server answered but refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ServerRejection { .. } | Self::Unauthorized { .. })
    }
}
