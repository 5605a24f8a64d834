//! Coordinator configuration.
//!
//! The only tunable today is when the action channel flushes. The debounce
//! window is an integration choice, not a correctness requirement, so it is
//! configurable rather than fixed.
//!
//! JSON forms:
//!
//! ```json
//! { "flush": "manual" }
//! { "flush": { "debounce_micros": 250 } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Result;

/// Default debounce window for [`FlushPolicy::Debounce`].
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_micros(100);

/// When an action channel delivers its buffered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Deliver only when `flush` is called.
    Manual,

    /// Deliver once no push has arrived for the given window.
    ///
    /// Needs a tokio runtime when the channel is created.
    #[serde(rename = "debounce_micros", deserialize_with = "duration_from_micros")]
    Debounce(Duration),
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Debounce(DEFAULT_DEBOUNCE)
    }
}

fn duration_from_micros<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_micros)
}

/// Settings shared by a coordinator and every child scoped from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Flush trigger for the action channel.
    pub flush: FlushPolicy,
}

impl CoordinatorConfig {
    /// Configuration whose channel only flushes on demand.
    pub fn manual() -> Self {
        Self {
            flush: FlushPolicy::Manual,
        }
    }

    /// Configuration with a debounce window.
    pub fn debounce(window: Duration) -> Self {
        Self {
            flush: FlushPolicy::Debounce(window),
        }
    }

    /// Parse configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    #[test]
    fn default_is_short_debounce() {
        assert_eq!(
            CoordinatorConfig::default().flush,
            FlushPolicy::Debounce(DEFAULT_DEBOUNCE)
        );
    }

    #[test]
    fn parses_manual() {
        let config = CoordinatorConfig::from_json(r#"{"flush": "manual"}"#).unwrap();
        assert_eq!(config, CoordinatorConfig::manual());
    }

    #[test]
    fn parses_debounce_window() {
        let config =
            CoordinatorConfig::from_json(r#"{"flush": {"debounce_micros": 250}}"#).unwrap();
        assert_eq!(config.flush, FlushPolicy::Debounce(Duration::from_micros(250)));
    }

    #[test]
    fn empty_object_uses_defaults() {
        let config = CoordinatorConfig::from_json("{}").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = CoordinatorConfig::from_json(r#"{"window": 3}"#).unwrap_err();
        assert!(matches!(err, StateError::Config(_)));
    }
}
