//! Segmented topics and wildcard topic patterns.
//!
//! A topic is a sequence of segments written with `::` (or `.`) separators,
//! e.g. `fetch::end::html`. A pattern has the same shape, except any segment
//! may be `*`, which matches exactly one segment at that position. There is
//! no multi-segment globbing: `fetch::*` does not match `fetch::end::html`.

use std::fmt;
use std::str::FromStr;

use crate::error::{HintError, Result};

/// Wildcard segment in a [`TopicPattern`].
pub const WILDCARD: &str = "*";

const SEPARATOR: &str = "::";

fn split_segments(raw: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = raw
        .split(SEPARATOR)
        .flat_map(|part| part.split('.'))
        .collect();

    if segments.iter().any(|s| s.is_empty()) {
        return Err(HintError::InvalidTopic {
            topic: raw.to_string(),
            reason: "empty segment",
        });
    }

    Ok(segments)
}

/// A concrete topic an event is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    segments: Vec<String>,
}

impl Topic {
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = split_segments(raw)?;
        if segments.contains(&WILDCARD) {
            return Err(HintError::InvalidTopic {
                topic: raw.to_string(),
                reason: "wildcards are only allowed in patterns",
            });
        }

        Ok(Self {
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    /// Build from known-good segments (event topics).
    pub(crate) fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(SEPARATOR))
    }
}

impl FromStr for Topic {
    type Err = HintError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One token of a [`TopicPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Exact(String),
    Any,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Exact(expected) => expected == segment,
            Segment::Any => true,
        }
    }
}

/// A subscription pattern.
///
/// Matches a topic iff both have the same number of segments and every
/// non-wildcard segment equals the topic segment exactly (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = split_segments(raw)?
            .into_iter()
            .map(|s| {
                if s == WILDCARD {
                    Segment::Any
                } else {
                    Segment::Exact(s.to_string())
                }
            })
            .collect();

        Ok(Self { segments })
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        self.segments.len() == topic.segments.len()
            && self
                .segments
                .iter()
                .zip(&topic.segments)
                .all(|(pattern, segment)| pattern.matches(segment))
    }

    /// True when the pattern has no wildcard segment.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Exact(_)))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Exact(s) => s.as_str(),
                Segment::Any => WILDCARD,
            })
            .collect();
        f.write_str(&parts.join(SEPARATOR))
    }
}

impl FromStr for TopicPattern {
    type Err = HintError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&Topic> for TopicPattern {
    fn from(topic: &Topic) -> Self {
        Self {
            segments: topic
                .segments
                .iter()
                .cloned()
                .map(Segment::Exact)
                .collect(),
        }
    }
}
