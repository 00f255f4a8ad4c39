//! Error types for the tilesync crate.

use std::fmt;

/// Result type for tilesync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing tiles.
///
/// Only structural failures live here. Delivery loss between the scheduler
/// and the caching agent is never raised; it is counted in
/// [`ScheduleReport`](crate::ScheduleReport) instead.
#[derive(Debug)]
pub enum Error {
    /// A coordinate or zoom level cannot be projected onto the tile grid.
    OutOfRangeInput {
        /// What was being projected.
        context: &'static str,
        /// Description of the offending value.
        detail: String,
    },
    /// The persistent cache could not be opened or queried.
    CacheUnavailable {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
    /// A synchronization parameter is outside its allowed range.
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// A message to or from the caching agent could not be encoded or decoded.
    Protocol {
        /// The error message.
        message: String,
    },
    /// A track file could not be parsed.
    Track {
        /// The error message.
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfRangeInput { context, detail } => {
                write!(f, "{context} out of range: {detail}")
            }
            Error::CacheUnavailable { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
            Error::InvalidConfig { field, detail } => {
                write!(f, "invalid {field}: {detail}")
            }
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Protocol { message } => write!(f, "malformed agent message: {message}"),
            Error::Track { message } => write!(f, "failed to parse track: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn cache(operation: &'static str, error: impl fmt::Display) -> Self {
        Error::CacheUnavailable {
            operation,
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol {
            message: e.to_string(),
        }
    }
}

impl From<gpx::errors::GpxError> for Error {
    fn from(e: gpx::errors::GpxError) -> Self {
        Error::Track {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_out_of_range() {
        let err = Error::OutOfRangeInput {
            context: "latitude",
            detail: "90 is beyond the projection limit".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "latitude out of range: 90 is beyond the projection limit"
        );
    }

    #[test]
    fn test_display_cache_unavailable() {
        let err = Error::cache("open", "permission denied");
        assert_eq!(err.to_string(), "cache open failed: permission denied");
    }
}
