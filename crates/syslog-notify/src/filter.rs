// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Admission filters deciding which records enter a dispatcher queue.
//!
//! Filters run on the producer path, before a record is queued, so they must
//! be cheap and free of side effects. Any `Fn(&MessageRecord) -> bool` is a
//! filter:
//!
//! ```
//! use std::sync::Arc;
//! use syslog_notify::filter::AdmissionFilter;
//! use syslog_notify::message::MessageRecord;
//!
//! let no_debug: Arc<dyn AdmissionFilter> =
//!     Arc::new(|record: &MessageRecord| record.tag() != "debug");
//! let now = chrono::Utc::now().fixed_offset();
//! assert!(!no_debug.admit(&MessageRecord::new("debug", "h1", "noise", now)));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::message::{MessageRecord, Severity};

pub trait AdmissionFilter: Send + Sync {
    /// Returns `true` when the record should be queued for delivery.
    fn admit(&self, record: &MessageRecord) -> bool;
}

impl<F> AdmissionFilter for F
where
    F: Fn(&MessageRecord) -> bool + Send + Sync,
{
    fn admit(&self, record: &MessageRecord) -> bool {
        self(record)
    }
}

/// Admits every record. This is the default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AdmissionFilter for AcceptAll {
    fn admit(&self, _record: &MessageRecord) -> bool {
        true
    }
}

/// Rejects records whose tag is in a deny list. Matching is exact.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    denied: HashSet<String>,
}

impl TagFilter {
    pub fn deny<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma separated list of tags, ignoring blanks.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::deny(
            list.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty()),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }
}

impl AdmissionFilter for TagFilter {
    fn admit(&self, record: &MessageRecord) -> bool {
        !self.denied.contains(record.tag())
    }
}

/// Rejects records less severe than `min_severity`.
#[derive(Debug, Clone, Copy)]
pub struct SeverityFilter {
    min_severity: Severity,
}

impl SeverityFilter {
    #[must_use]
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl AdmissionFilter for SeverityFilter {
    fn admit(&self, record: &MessageRecord) -> bool {
        record.severity() <= self.min_severity
    }
}

/// Admits a record only when every inner filter does. An empty set admits
/// everything.
#[derive(Clone, Default)]
pub struct AllOf {
    filters: Vec<Arc<dyn AdmissionFilter>>,
}

impl AllOf {
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn AdmissionFilter>>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: Arc<dyn AdmissionFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl AdmissionFilter for AllOf {
    fn admit(&self, record: &MessageRecord) -> bool {
        self.filters.iter().all(|filter| filter.admit(record))
    }
}

impl fmt::Debug for AllOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllOf({} filters)", self.filters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Facility;

    fn record(tag: &str, severity: Severity) -> MessageRecord {
        MessageRecord::new(tag, "h1", "content", chrono::Utc::now().fixed_offset())
            .with_priority(severity, Facility::User)
    }

    #[test]
    fn test_accept_all() {
        assert!(AcceptAll.admit(&record("", Severity::Debug)));
        assert!(AcceptAll.admit(&record("app", Severity::Emergency)));
    }

    #[test]
    fn test_closure_filter() {
        let filter = |record: &MessageRecord| record.tag() != "debug";
        assert!(filter.admit(&record("app", Severity::Notice)));
        assert!(!filter.admit(&record("debug", Severity::Notice)));
    }

    #[test]
    fn test_tag_filter() {
        let filter = TagFilter::parse(" debug, ,cron ,");
        assert!(!filter.is_empty());
        assert!(!filter.admit(&record("debug", Severity::Error)));
        assert!(!filter.admit(&record("cron", Severity::Error)));
        assert!(filter.admit(&record("app", Severity::Error)));
        assert!(filter.admit(&record("Debug", Severity::Error)));

        assert!(TagFilter::parse("").is_empty());
    }

    #[test]
    fn test_severity_filter() {
        let filter = SeverityFilter::new(Severity::Warning);
        assert!(filter.admit(&record("app", Severity::Emergency)));
        assert!(filter.admit(&record("app", Severity::Warning)));
        assert!(!filter.admit(&record("app", Severity::Notice)));
        assert!(!filter.admit(&record("app", Severity::Debug)));
    }

    #[test]
    fn test_all_of() {
        let filter = AllOf::new(vec![
            Arc::new(TagFilter::deny(["debug"])),
            Arc::new(SeverityFilter::new(Severity::Error)),
        ]);
        assert_eq!(filter.len(), 2);
        assert!(filter.admit(&record("app", Severity::Critical)));
        assert!(!filter.admit(&record("debug", Severity::Critical)));
        assert!(!filter.admit(&record("app", Severity::Warning)));

        assert!(AllOf::default().admit(&record("debug", Severity::Debug)));
    }
}
