//! Bounds-checked MQTT topic paths.
//!
//! Topics are assembled from a configured base path plus static suffixes and
//! entry indices. Every step is validated, so an over-long or malformed topic
//! is rejected when it is built rather than truncated when it is published.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_TOPIC_LENGTH;
use crate::error::{Error, Result};

/// A validated MQTT topic name.
///
/// Topic names never contain wildcards (`+`, `#`) or NUL, are never empty and
/// never exceed [`MAX_TOPIC_LENGTH`] bytes.
///
/// # Examples
///
/// ```
/// use lockbridge_core::TopicPath;
///
/// let base = TopicPath::new("lockbridge/lock/").unwrap();
/// assert_eq!(base.as_str(), "lockbridge/lock");
///
/// let code = base.indexed("/keypad/codes", 3).unwrap();
/// assert_eq!(code.as_str(), "lockbridge/lock/keypad/codes/3");
///
/// assert_eq!(base.strip_base("lockbridge/lock/action"), Some("/action"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPath(String);

impl TopicPath {
    /// Create a topic from a base path. A trailing `/` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopicPath`] for empty paths or paths containing
    /// wildcards, and [`Error::TopicTooLong`] past the length limit.
    pub fn new(path: &str) -> Result<Self> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidTopicPath(path.to_string()));
        }
        validate_segment(trimmed)?;
        check_length(trimmed.len())?;
        Ok(Self(trimmed.to_string()))
    }

    /// Append a suffix such as `/state`. A missing leading `/` is added.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TopicPath::new`].
    pub fn join(&self, suffix: &str) -> Result<Self> {
        let suffix = suffix.trim_end_matches('/');
        if suffix.is_empty() {
            return Ok(self.clone());
        }
        validate_segment(suffix)?;

        let separator = usize::from(!suffix.starts_with('/'));
        check_length(self.0.len() + separator + suffix.len())?;

        let mut joined = String::with_capacity(self.0.len() + separator + suffix.len());
        joined.push_str(&self.0);
        if separator == 1 {
            joined.push('/');
        }
        joined.push_str(suffix);
        Ok(Self(joined))
    }

    /// Append a suffix followed by a numeric entry index.
    pub fn indexed(&self, suffix: &str, index: usize) -> Result<Self> {
        self.join(suffix)?.join(&index.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the part of `topic` after this base path, including the
    /// leading `/`, or `None` if `topic` is not below this path.
    pub fn strip_base<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.0.as_str())
            .filter(|rest| rest.starts_with('/'))
    }

    /// Check whether `topic` equals this base path plus `suffix`.
    pub fn matches(&self, suffix: &str, topic: &str) -> bool {
        self.strip_base(topic) == Some(suffix)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.contains(['+', '#', '\0']) {
        return Err(Error::InvalidTopicPath(segment.to_string()));
    }
    Ok(())
}

fn check_length(length: usize) -> Result<()> {
    if length > MAX_TOPIC_LENGTH {
        return Err(Error::TopicTooLong {
            length,
            limit: MAX_TOPIC_LENGTH,
        });
    }
    Ok(())
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TopicPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<TopicPath> for String {
    fn from(value: TopicPath) -> Self {
        value.0
    }
}

impl std::str::FromStr for TopicPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("lockbridge/lock", "lockbridge/lock")]
    #[case("lockbridge/lock/", "lockbridge/lock")]
    #[case("a", "a")]
    fn test_new_valid(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(TopicPath::new(input).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("home/+/lock")]
    #[case("home/#")]
    fn test_new_invalid(#[case] input: &str) {
        assert!(matches!(
            TopicPath::new(input),
            Err(Error::InvalidTopicPath(_))
        ));
    }

    #[test]
    fn test_join_adds_separator() {
        let base = TopicPath::new("base").unwrap();
        assert_eq!(base.join("state").unwrap().as_str(), "base/state");
        assert_eq!(base.join("/state").unwrap().as_str(), "base/state");
        assert_eq!(base.join("").unwrap(), base);
    }

    #[test]
    fn test_join_rejects_wildcards() {
        let base = TopicPath::new("base").unwrap();
        assert!(base.join("/+").is_err());
    }

    #[test]
    fn test_too_long_is_rejected_at_construction() {
        let long = "x".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(matches!(
            TopicPath::new(&long),
            Err(Error::TopicTooLong { .. })
        ));

        let base = TopicPath::new(&"y".repeat(MAX_TOPIC_LENGTH - 2)).unwrap();
        assert!(base.join("/ab").is_err());
        assert!(base.join("/a").is_ok());
    }

    #[test]
    fn test_indexed() {
        let base = TopicPath::new("hub/opener").unwrap();
        let topic = base.indexed("/timecontrol/entries", 12).unwrap();
        assert_eq!(topic.as_str(), "hub/opener/timecontrol/entries/12");
    }

    #[test]
    fn test_strip_base_requires_separator() {
        let base = TopicPath::new("hub/lock").unwrap();
        assert_eq!(base.strip_base("hub/lock/state"), Some("/state"));
        assert_eq!(base.strip_base("hub/lockx/state"), None);
        assert_eq!(base.strip_base("hub/lock"), None);
        assert!(base.matches("/action", "hub/lock/action"));
        assert!(!base.matches("/action", "hub/lock/actionx"));
    }

    #[test]
    fn test_serde_validates() {
        let ok: TopicPath = serde_json::from_str("\"a/b\"").unwrap();
        assert_eq!(ok.as_str(), "a/b");
        assert!(serde_json::from_str::<TopicPath>("\"a/#\"").is_err());
    }
}
