//! Error types.
//!
//! The coordinator has almost no recoverable failure modes. Duplicate
//! publishes, empty batches and bursts of `send` calls are all normal
//! operation. What remains is listed here.

use thiserror::Error;

/// Errors produced by the state layer.
#[derive(Debug, Error)]
pub enum StateError {
    /// The model type declares reference semantics: its clones alias the same
    /// storage, so a working copy could not be isolated from the published
    /// snapshot. Raised as a panic at coordinator construction.
    #[error("model type `{model}` has shared identity; ManagedState requires value semantics")]
    SharedIdentity {
        /// Type name of the rejected model.
        model: &'static str,
    },

    /// An action was sent through a handle whose coordinator has been dropped.
    #[error("coordinator has been released")]
    Released,

    /// Configuration text could not be parsed.
    #[error("invalid coordinator configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_identity_message_names_the_model() {
        let err = StateError::SharedIdentity { model: "app::Session" };
        assert!(err.to_string().contains("app::Session"));
    }

    #[test]
    fn config_errors_convert_from_serde() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StateError = parse.into();
        assert!(matches!(err, StateError::Config(_)));
    }
}
