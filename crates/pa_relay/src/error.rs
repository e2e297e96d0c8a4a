//! Relay Error Types

use thiserror::Error;

/// Errors from the power relay serial backend
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("power port not found: {0}")]
    PortUnavailable(String),

    #[error("power port already locked by another process: {0}")]
    LockUnavailable(String),

    #[error("failed to configure serial port: {0}")]
    ConfigureFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::PortUnavailable("/dev/ttyUSB0".into());
        assert!(err.to_string().contains("ttyUSB0"));
    }
}
