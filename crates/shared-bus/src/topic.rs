//! # Topic Patterns
//!
//! Topics are dotted strings (`photo.uploaded`,
//! `photo.processing.stage.completed`). A subscription pattern is either an
//! exact topic or a prefix ending in a `*` segment, which matches one or
//! more trailing segments: `photo.*` covers the whole photo family,
//! `photo.processing.*` only the processing sub-family.

use thiserror::Error;

/// Errors from pattern parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern string is empty or has an empty segment.
    #[error("malformed pattern '{0}'")]
    Malformed(String),
    /// `*` appeared somewhere other than the final segment.
    #[error("wildcard must be the final segment in '{0}'")]
    WildcardNotTrailing(String),
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<String>,
    trailing_wildcard: bool,
}

impl TopicPattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    ///
    /// `Malformed` on empty patterns or empty segments;
    /// `WildcardNotTrailing` when `*` is not the last segment.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Malformed(pattern.to_string()));
        }
        let raw: Vec<&str> = pattern.split('.').collect();
        if raw.iter().any(|s| s.is_empty()) {
            return Err(PatternError::Malformed(pattern.to_string()));
        }
        let trailing_wildcard = *raw.last().expect("non-empty") == "*";
        let head = if trailing_wildcard {
            &raw[..raw.len() - 1]
        } else {
            &raw[..]
        };
        if head.iter().any(|s| *s == "*") {
            return Err(PatternError::WildcardNotTrailing(pattern.to_string()));
        }
        if trailing_wildcard && head.is_empty() {
            // Bare "*" subscribes to everything.
            return Ok(Self {
                segments: Vec::new(),
                trailing_wildcard: true,
            });
        }
        Ok(Self {
            segments: head.iter().map(|s| (*s).to_string()).collect(),
            trailing_wildcard,
        })
    }

    /// An exact-match pattern for a known topic.
    #[must_use]
    pub fn exact(topic: &str) -> Self {
        Self {
            segments: topic.split('.').map(String::from).collect(),
            trailing_wildcard: false,
        }
    }

    /// A pattern matching every topic.
    #[must_use]
    pub fn all() -> Self {
        Self {
            segments: Vec::new(),
            trailing_wildcard: true,
        }
    }

    /// Whether a concrete topic matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('.').collect();
        if self.trailing_wildcard {
            // Prefix must match and at least one extra segment must follow.
            topic_segments.len() > self.segments.len()
                && self
                    .segments
                    .iter()
                    .zip(topic_segments.iter())
                    .all(|(p, t)| p == t)
        } else {
            topic_segments.len() == self.segments.len()
                && self
                    .segments
                    .iter()
                    .zip(topic_segments.iter())
                    .all(|(p, t)| p == t)
        }
    }

    /// Canonical rendering, usable as a subscription-tracking key.
    #[must_use]
    pub fn render(&self) -> String {
        if self.trailing_wildcard {
            if self.segments.is_empty() {
                "*".to_string()
            } else {
                format!("{}.*", self.segments.join("."))
            }
        } else {
            self.segments.join(".")
        }
    }
}
