//! Fatal error taxonomy for a run.
//!
//! Lower layers return `anyhow::Result` with context; each stage classifies
//! its failure into one of these variants so the binary can report which
//! stage halted. Per-date verification failures are not errors, see
//! [`crate::driver::FixState::FailedVerification`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResetError {
    /// Invalid or missing settings. Raised before any browser action.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Login was refused or the resulting session could not be verified.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// A page failed to load or an expected element never appeared.
    #[error("navigation failed: {0}")]
    Navigation(String),
}

impl ResetError {
    pub fn configuration(error: anyhow::Error) -> Self {
        Self::Configuration(format!("{error:#}"))
    }

    pub fn authentication(error: anyhow::Error) -> Self {
        Self::Authentication(format!("{error:#}"))
    }

    pub fn navigation(error: anyhow::Error) -> Self {
        Self::Navigation(format!("{error:#}"))
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::Navigation(_) => "navigation",
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::ResetError;

    #[test]
    fn classified_errors_keep_the_context_chain() {
        let error = Err::<(), _>(anyhow::anyhow!("element not found"))
            .context("failed to open archive for 2023-05")
            .expect_err("must fail");
        let classified = ResetError::navigation(error);
        let message = classified.to_string();
        assert!(message.starts_with("navigation failed: failed to open archive for 2023-05"));
        assert!(message.contains("element not found"));
        assert_eq!(classified.stage(), "navigation");
    }

    #[test]
    fn configuration_message_is_prefixed() {
        let error = ResetError::Configuration("months must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "configuration error: months must be positive"
        );
    }
}
