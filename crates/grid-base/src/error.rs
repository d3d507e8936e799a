//! Fault types for the object-tree surface.
//!
//! These cover configuration-time failures only. The residual/Jacobian/root
//! hot path never produces these; it signals invalidity through the null
//! sentinel or an alert.

use thiserror::Error;

/// A recoverable failure from the set/get/add/remove surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ObjectError {
    /// `set` was called with a name the target does not accept.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Correct parameter name, unacceptable value.
    #[error("invalid value for parameter '{0}': {1}")]
    InvalidParameterValue(String, String),

    /// Tree insertion rejected (duplicate, wrong container, cycle).
    #[error("unable to add object: {0}")]
    AddFailure(String),

    /// Tree removal rejected (not a child, unknown handle).
    #[error("unable to remove object: {0}")]
    RemoveFailure(String),

    /// The container does not accept objects of this type.
    #[error("unrecognized object type '{0}'")]
    UnrecognizedObject(String),

    /// `update_object` could not find a match in the new tree.
    #[error("object update failed: {0}")]
    UpdateFailure(String),

    /// A clone could not be completed; the partial clone was destroyed.
    #[error("clone failed: {0}")]
    CloneFailure(String),

    #[error("file operation failed: {0}")]
    FileOperation(String),

    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    /// An action could not be carried out (e.g. alarm with no comm link).
    #[error("execution failure: {0}")]
    ExecutionFailure(String),

    /// A generation-counted handle no longer points at a live object.
    #[error("stale object handle")]
    StaleHandle,

    #[error("expression error: {0}")]
    Expression(String),
}

impl ObjectError {
    /// Failures that leave the target unchanged and can simply be retried
    /// with corrected input.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ObjectError::UnknownParameter(_)
                | ObjectError::InvalidParameterValue(_, _)
                | ObjectError::UnrecognizedObject(_)
                | ObjectError::Expression(_)
        )
    }

    /// Failures that indicate the tree or a handle is in an unexpected
    /// shape; usually a caller bug.
    pub fn is_structural_error(&self) -> bool {
        matches!(
            self,
            ObjectError::AddFailure(_)
                | ObjectError::RemoveFailure(_)
                | ObjectError::UpdateFailure(_)
                | ObjectError::CloneFailure(_)
                | ObjectError::StaleHandle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ObjectError::UnknownParameter("x".into()).is_configuration_error());
        assert!(ObjectError::StaleHandle.is_structural_error());
        assert!(!ObjectError::StaleHandle.is_configuration_error());
    }

    #[test]
    fn display() {
        let e = ObjectError::InvalidParameterValue("spread".into(), "must be non-negative".into());
        assert!(e.to_string().contains("spread"));
    }
}
