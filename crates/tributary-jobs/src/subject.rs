//! Subject naming and matching.
//!
//! Subjects are dot-separated tokens. A queue named `emails` owns the
//! pattern `emails.*` and every job `send` lands on `emails.send`.
//! Patterns support two wildcards: `*` matches exactly one token and `>`
//! matches one or more trailing tokens.

use crate::error::{JobError, JobResult};

/// Pattern covering every job of a queue: `<queue>.*`.
pub fn wildcard_subject(queue: &str) -> String {
    format!("{queue}.*")
}

/// Subject a job is published on: `<queue>.<job>`.
pub fn job_subject(queue: &str, job_name: &str) -> String {
    format!("{queue}.{job_name}")
}

/// Returns the job name of a subject published under `queue`.
pub fn job_name<'a>(queue: &str, subject: &'a str) -> Option<&'a str> {
    subject
        .strip_prefix(queue)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|name| !name.is_empty())
}

/// Whether `subject` is matched by `pattern`.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Checks that `name` can be used as a single subject token.
///
/// Queue, cursor, and job names end up inside subjects and storage keys, so
/// they must be non-empty and free of separators, wildcards, and whitespace.
pub fn validate_name(name: &str) -> JobResult<()> {
    if name.is_empty() {
        return Err(JobError::InvalidName("name must not be empty".to_string()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '.' | '*' | '>' | ':') || c.is_whitespace())
    {
        return Err(JobError::InvalidName(format!(
            "{name:?} contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_builders() {
        assert_eq!(wildcard_subject("emails"), "emails.*");
        assert_eq!(job_subject("emails", "send"), "emails.send");
    }

    #[test]
    fn test_job_name() {
        assert_eq!(job_name("emails", "emails.send"), Some("send"));
        assert_eq!(job_name("emails", "emails."), None);
        assert_eq!(job_name("emails", "emailsx.send"), None);
        assert_eq!(job_name("emails", "other.send"), None);
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(matches("emails.*", "emails.send"));
        assert!(!matches("emails.*", "emails"));
        assert!(!matches("emails.*", "emails.send.now"));
        assert!(!matches("emails.*", "reports.send"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(matches("emails.>", "emails.send"));
        assert!(matches("emails.>", "emails.send.now"));
        assert!(!matches("emails.>", "emails"));
    }

    #[test]
    fn test_literal_pattern() {
        assert!(matches("emails.send", "emails.send"));
        assert!(!matches("emails.send", "emails.sent"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("emails").is_ok());
        assert!(validate_name("send-welcome_v2").is_ok());

        for bad in ["", "a.b", "a*", "a>", "a b", "a:b"] {
            let err = validate_name(bad).unwrap_err();
            assert!(matches!(err, JobError::InvalidName(_)), "{bad:?}");
        }
    }
}
