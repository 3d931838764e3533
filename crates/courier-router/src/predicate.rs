//! Typed predicate matcher keys.
//!
//! Three independent families: geographic range, file descriptor, and poll
//! descriptor. Each key is a value type compared by structural equality —
//! registering twice with a field-for-field identical key accumulates into
//! the same bucket, distinct keys never merge. Dispatch evaluates the
//! payload against every registered key and runs every bucket whose
//! predicate holds (fan-out, in registration order).

use courier_core::update::{Document, Location, Poll, PollKind};

/// An inclusive geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRange {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoRange {
    /// Creates a bounding box from inclusive latitude/longitude bounds.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Returns `true` if the location lies within the box, bounds included.
    pub fn contains(&self, location: &Location) -> bool {
        location.latitude >= self.min_lat
            && location.latitude <= self.max_lat
            && location.longitude >= self.min_lon
            && location.longitude <= self.max_lon
    }
}

/// A file-descriptor condition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileFilter {
    /// Exact MIME type to require; `None` accepts any type.
    pub mime_type: Option<String>,
    /// Upper size bound in bytes; `None` means unbounded.
    pub max_size: Option<u64>,
}

impl FileFilter {
    /// Condition on an exact MIME type.
    pub fn mime(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            max_size: None,
        }
    }

    /// Adds an upper size bound in bytes.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Returns `true` if the document satisfies the condition.
    ///
    /// A document without a reported size passes any size bound.
    pub fn matches(&self, document: &Document) -> bool {
        let mime_ok = match &self.mime_type {
            None => true,
            Some(required) => document.mime_type.as_deref() == Some(required.as_str()),
        };
        let size_ok = match self.max_size {
            None => true,
            Some(cap) => document.file_size.is_none_or(|size| size <= cap),
        };
        mime_ok && size_ok
    }
}

/// A poll-descriptor condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFilter {
    /// Poll sub-kind to require; `None` accepts any kind.
    pub kind: Option<PollKind>,
    /// Minimum total voter count; `0` means no minimum.
    pub min_votes: u32,
    /// Anonymity flag, matched exactly.
    pub is_anonymous: bool,
    /// Multiple-choice flag, matched exactly — consulted only for
    /// regular polls, since quizzes are single-answer by construction.
    pub allows_multiple: bool,
}

impl PollFilter {
    /// Condition on a poll sub-kind with no further constraints.
    pub fn of_kind(kind: PollKind) -> Self {
        Self {
            kind: Some(kind),
            min_votes: 0,
            is_anonymous: false,
            allows_multiple: false,
        }
    }

    /// Returns `true` if the poll satisfies the condition.
    pub fn matches(&self, poll: &Poll) -> bool {
        let kind_ok = self.kind.is_none_or(|kind| poll.kind == kind);
        let votes_ok = self.min_votes == 0 || poll.total_voter_count >= self.min_votes;
        let anonymous_ok = poll.is_anonymous == self.is_anonymous;
        let multiple_ok =
            poll.kind != PollKind::Regular || poll.allows_multiple_answers == self.allows_multiple;
        kind_ok && votes_ok && anonymous_ok && multiple_ok
    }
}
