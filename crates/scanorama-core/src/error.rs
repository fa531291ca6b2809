//! Error taxonomy for Scanorama
//!
//! Every fallible operation in the workspace returns one of the tags below.
//! Engines translate prober and repository failures into this taxonomy and
//! record the user-visible message on the terminal job row, so operators can
//! reconstruct a failed run without reading logs.

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for Scanorama operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tagged errors for discovery, scanning, scheduling, and persistence
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input: bad CIDR, oversized network, malformed cron, unknown scan type
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced job, profile, or scheduled job does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate name, built-in profile mutation, or illegal state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Repository or prober temporarily unavailable; the caller decides on retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The surrounding context was cancelled before the operation finished
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Deadline expired before a terminal state was reached
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unexpected failure; always logged with context at the site that raised it
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures worth retrying on a later cron fire
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transient(format!("I/O error: {}", err))
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Validation(format!("Invalid IP address: {}", err))
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::Validation(format!("Invalid network: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Validation(format!("TOML parse error: {}", err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("unique constraint violated: {}", db))
            }
            sqlx::Error::PoolTimedOut => {
                Error::Transient("database connection pool timed out".to_string())
            }
            other => Error::Transient(format!("database error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("network too large".to_string());
        assert_eq!(err.to_string(), "Validation error: network too large");

        let err = Error::Conflict("duplicate job name".to_string());
        assert_eq!(err.to_string(), "Conflict: duplicate job name");
    }

    #[test]
    fn test_io_error_is_transient() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Transient(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_addr_parse_is_validation() {
        let parse_err = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_network_parse_is_validation() {
        use ipnetwork::IpNetwork;
        let net_err = "300.0.0.0/24".parse::<IpNetwork>().unwrap_err();
        let err: Error = net_err.into();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_result_alias() {
        fn fails() -> Result<()> {
            Err(Error::Timeout("wait_for_completion".to_string()))
        }
        assert!(fails().unwrap_err().is_transient());
    }
}
