use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum SensorsError {
    #[error("{0} parameter is missing")]
    MissingParameter(&'static str),

    #[error("invalid {field} parameter: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("{field} conflict: {reason}")]
    Conflict { field: &'static str, reason: String },

    #[error("Gpio ledger error: {0}")]
    Ledger(String),

    /// The ledger holds no allocation with this uuid
    #[error("Gpio ledger error: gpio device \"{0}\" does not exist")]
    UnknownGpio(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("{operation} failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: Box<SensorsError>,
    },

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl SensorsError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    pub fn conflict(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the caller-supplied field this error is about, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingParameter(field) => Some(field),
            Self::InvalidParameter { field, .. } | Self::Conflict { field, .. } => Some(field),
            Self::OperationFailed { source, .. } => source.field(),
            _ => None,
        }
    }

    /// True when a ledger or catalog call failed, directly or under a rollback.
    pub fn is_dependency(&self) -> bool {
        match self {
            Self::Ledger(_)
            | Self::UnknownGpio(_)
            | Self::Catalog(_)
            | Self::IoError(_)
            | Self::SerdeJsonError(_) => true,
            Self::OperationFailed { source, .. } => source.is_dependency(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SensorsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_reaches_through_rollback() {
        let err = SensorsError::OperationFailed {
            operation: "add_dht22",
            source: Box::new(SensorsError::conflict("gpio", "GPIO17 is already used")),
        };
        assert_eq!(err.field(), Some("gpio"));
        assert!(!err.is_dependency());
    }

    #[test]
    fn test_dependency_classification() {
        assert!(SensorsError::Ledger("no response".into()).is_dependency());
        assert!(SensorsError::UnknownGpio("g-1".into()).is_dependency());
        assert!(!SensorsError::MissingParameter("name").is_dependency());
        assert_eq!(
            SensorsError::MissingParameter("name").to_string(),
            "name parameter is missing"
        );
    }
}
