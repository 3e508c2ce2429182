/// Shared error type used across all threadline crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The selector resolved to nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller lacks membership or role on the owning project.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The model provider rejected the request or its stream failed.
    #[error("provider {provider}: {message}")]
    Upstream { provider: String, message: String },

    /// A store transaction failed.
    #[error("persistence: {0}")]
    Persistence(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable snake_case name of the variant, used on the wire and in
    /// persisted `error` content parts.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::Upstream { .. } => "upstream_error",
            Error::Persistence(_) => "persistence_error",
            Error::Invalid(_) => "invalid",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::Other(_) => "other",
        }
    }

    /// Whether the error is raised before any streaming begins.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Forbidden(_) | Error::Invalid(_))
    }

    /// Format the error the way it is stored in an `error` content part.
    pub fn to_content_text(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    fn specificity(&self) -> u8 {
        match self {
            Error::NotFound(_) | Error::Forbidden(_) | Error::Invalid(_) => 4,
            Error::Upstream { .. } | Error::Timeout(_) | Error::Http(_) => 3,
            Error::Persistence(_) | Error::Io(_) => 2,
            Error::Json(_) | Error::Config(_) | Error::Auth(_) => 1,
            Error::Other(_) => 0,
        }
    }

    /// Pick the error to surface when two failures happened in the same
    /// stream. Upstream failures outrank persistence failures; ties keep
    /// `self`.
    pub fn more_specific(self, other: Error) -> Error {
        if other.specificity() > self.specificity() {
            other
        } else {
            self
        }
    }
}
