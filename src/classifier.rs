//! CM business-error classification.
//!
//! Which codes are retryable is data: a list of [`RetryRule`]s built from
//! configuration. Anything no rule matches is terminal.

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, OutcomeMessages};

/// Classification of one CM business error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub retryable: bool,
    pub user_message: String,
}

/// One entry of the retryable predicate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryRule {
    /// Matches one code exactly.
    Exact(String),
    /// Matches every code starting with the prefix.
    Prefix(String),
}

impl RetryRule {
    /// Parse `CODE` or `PREFIX*`. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_suffix('*') {
            Some("") => None,
            Some(prefix) => Some(Self::Prefix(prefix.to_ascii_uppercase())),
            None => Some(Self::Exact(raw.to_ascii_uppercase())),
        }
    }

    fn matches(&self, code: &str) -> bool {
        match self {
            Self::Exact(c) => c == code,
            Self::Prefix(p) => code.starts_with(p.as_str()),
        }
    }
}

/// Decides whether a CM error code is worth resubmitting.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<RetryRule>,
    messages: OutcomeMessages,
}

impl ErrorClassifier {
    pub fn new(rules: Vec<RetryRule>, messages: OutcomeMessages) -> Self {
        Self { rules, messages }
    }

    /// Build from the engine config's retryable code list.
    pub fn from_config(config: &EngineConfig) -> Self {
        let rules = config
            .retryable_codes
            .iter()
            .filter_map(|raw| RetryRule::parse(raw))
            .collect();
        Self::new(rules, config.messages.clone())
    }

    /// Classify an error code. Unknown codes are terminal.
    pub fn classify(&self, code: &str, message: &str) -> Verdict {
        let normalized = code.trim().to_ascii_uppercase();
        let retryable =
            !normalized.is_empty() && self.rules.iter().any(|rule| rule.matches(&normalized));

        let base = if retryable {
            &self.messages.retry_guidance
        } else {
            &self.messages.failure
        };
        let user_message = if message.trim().is_empty() {
            base.clone()
        } else {
            format!("{base} (CM {normalized}: {})", message.trim())
        };

        Verdict {
            retryable,
            user_message,
        }
    }

    /// Whether `code` is in the retryable set.
    pub fn is_retryable(&self, code: &str) -> bool {
        self.classify(code, "").retryable
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(codes: &[&str]) -> ErrorClassifier {
        ErrorClassifier::new(
            codes.iter().filter_map(|c| RetryRule::parse(c)).collect(),
            OutcomeMessages::default(),
        )
    }

    #[test]
    fn parse_rules() {
        assert_eq!(RetryRule::parse("CMONB1"), Some(RetryRule::Exact("CMONB1".into())));
        assert_eq!(RetryRule::parse(" cmtmp* "), Some(RetryRule::Prefix("CMTMP".into())));
        assert_eq!(RetryRule::parse("*"), None);
        assert_eq!(RetryRule::parse("  "), None);
    }

    #[test]
    fn exact_and_prefix_matching() {
        let c = classifier(&["CMONB1", "CMTMP*"]);
        assert!(c.is_retryable("CMONB1"));
        assert!(c.is_retryable("cmonb1"));
        assert!(c.is_retryable("CMTMP42"));
        assert!(!c.is_retryable("CMONB10"));
        assert!(!c.is_retryable("CMVAL1"));
    }

    #[test]
    fn unknown_codes_fail_closed() {
        let c = classifier(&["CMONB1"]);
        let verdict = c.classify("ZZZ999", "something odd");
        assert!(!verdict.retryable);
        assert!(verdict.user_message.starts_with(&OutcomeMessages::default().failure));
        assert!(!c.is_retryable(""));
    }

    #[test]
    fn empty_rule_set_retries_nothing() {
        let c = classifier(&[]);
        assert!(!c.is_retryable("CMONB1"));
    }

    #[test]
    fn retry_message_differs_from_failure_message() {
        let c = classifier(&["CMONB1"]);
        let retry = c.classify("CMONB1", "duplicate");
        let fail = c.classify("CMVAL1", "duplicate");
        assert!(retry.retryable);
        assert_ne!(retry.user_message, fail.user_message);
        assert!(retry.user_message.contains("CMONB1"));
    }

    #[test]
    fn default_uses_engine_config_codes() {
        let c = ErrorClassifier::default();
        assert!(c.is_retryable("CMONB1"));
        assert!(c.is_retryable("CMTMP7"));
    }
}
