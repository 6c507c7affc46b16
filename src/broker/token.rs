// =============================================================================
// Bearer token providers
// =============================================================================
//
// Upstox issues a daily access token out of band. The desk never performs the
// login flow; it only reads whatever token the operator supplied. `EnvToken`
// re-reads its variable on every call so a new token can be exported (or
// written to `.env` and re-sourced) without restarting the process.
// =============================================================================

use super::BrokerError;

/// Supplies the bearer credential attached to every broker request.
pub trait TokenProvider: Send + Sync {
    fn bearer(&self) -> Result<String, BrokerError>;
}

/// Reads the token from an environment variable on each call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn bearer(&self) -> Result<String, BrokerError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(BrokerError::MissingToken(format!("{} is not set", self.var))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_token_reports_missing_variable() {
        let provider = EnvToken::new("UT_TRIGGER_TEST_TOKEN_THAT_IS_NEVER_SET");
        let err = provider.bearer().unwrap_err();
        assert!(matches!(err, BrokerError::MissingToken(_)));
    }

    #[test]
    fn env_token_trims_value() {
        std::env::set_var("UT_TRIGGER_TEST_TOKEN_TRIM", "  abc123\n");
        let provider = EnvToken::new("UT_TRIGGER_TEST_TOKEN_TRIM");
        assert_eq!(provider.bearer().unwrap(), "abc123");
    }
}
