//! Error taxonomy for the WDM core and the reference frameworks.
//!
//! Everything here is unrecoverable at the point it is raised: errors are
//! returned straight to the caller, which decides whether to report and abort.
//! The calibration layer wraps these in `anyhow::Error` with extra context.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WdmError {
    /// Out-of-domain or wrong-typed value, or a name no layer declares.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A WDM model identifier that no registered class answers to.
    #[error("{name} is not a valid WDM class")]
    UnknownVariant { name: String },

    /// An abstract operation was invoked on a model that does not override it.
    #[error("{model} does not implement `{operation}`")]
    NotImplemented {
        model: &'static str,
        operation: &'static str,
    },

    #[error("unknown quantity `{0}`")]
    UnknownQuantity(String),

    #[error("unknown framework `{0}`")]
    UnknownFramework(String),

    #[error("numerical failure in {context}: {reason}")]
    Numerical {
        context: &'static str,
        reason: String,
    },
}

impl WdmError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn numerical(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Numerical {
            context,
            reason: reason.into(),
        }
    }
}

pub type WdmResult<T> = std::result::Result<T, WdmError>;
