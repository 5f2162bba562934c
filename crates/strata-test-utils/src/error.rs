//! Device-level errors.

/// Failure reported by the device while creating an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The descriptor was rejected by validation.
    Validation(String),
    /// The device ran out of memory.
    OutOfMemory,
    /// Any other device-internal failure.
    Internal(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::OutOfMemory => write!(f, "Device out of memory"),
            Self::Internal(msg) => write!(f, "Internal device error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DeviceError::Validation("bad vertex layout".into());
        assert_eq!(err.to_string(), "Validation error: bad vertex layout");
        assert_eq!(DeviceError::OutOfMemory.to_string(), "Device out of memory");
    }
}
