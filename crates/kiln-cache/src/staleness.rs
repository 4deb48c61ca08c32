//! Staleness policies deciding which stored archives a flush removes.

use chrono::{DateTime, Duration, Utc};
use kiln_core::FileEntry;

/// Decides whether a listed object is stale.
pub trait StalenessPolicy: Send + Sync {
    fn is_stale(&self, entry: &FileEntry) -> bool;
}

impl<F> StalenessPolicy for F
where
    F: Fn(&FileEntry) -> bool + Send + Sync,
{
    fn is_stale(&self, entry: &FileEntry) -> bool {
        self(entry)
    }
}

/// Stale when last modified more than a number of days ago.
///
/// Zero or negative days make every entry stale.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    cutoff: Option<DateTime<Utc>>,
}

impl MaxAge {
    /// Policy relative to the current time.
    pub fn days(days: i64) -> Self {
        Self::days_before(days, Utc::now())
    }

    /// Policy relative to `now`.
    pub fn days_before(days: i64, now: DateTime<Utc>) -> Self {
        let cutoff = if days <= 0 {
            None
        } else {
            // Saturate rather than overflow for absurd ages.
            Some(
                Duration::try_days(days)
                    .and_then(|age| now.checked_sub_signed(age))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            )
        };
        Self { cutoff }
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

impl StalenessPolicy for MaxAge {
    fn is_stale(&self, entry: &FileEntry) -> bool {
        match self.cutoff {
            Some(cutoff) => entry.last_modified < cutoff,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(age_days: i64, now: DateTime<Utc>) -> FileEntry {
        FileEntry {
            path: format!("acme/app/{age_days}.tgz"),
            size: 1,
            last_modified: now - Duration::days(age_days),
        }
    }

    #[test]
    fn test_max_age_thirty_days() {
        let now = Utc::now();
        let policy = MaxAge::days_before(30, now);
        assert!(!policy.is_stale(&entry(0, now)));
        assert!(!policy.is_stale(&entry(10, now)));
        assert!(policy.is_stale(&entry(40, now)));
    }

    #[test]
    fn test_non_positive_age_flushes_everything() {
        let now = Utc::now();
        for days in [0, -5] {
            let policy = MaxAge::days_before(days, now);
            assert!(policy.is_stale(&entry(0, now)));
            assert!(policy.is_stale(&entry(-1, now)));
        }
    }

    #[test]
    fn test_huge_age_does_not_overflow() {
        let now = Utc::now();
        let policy = MaxAge::days_before(i64::MAX, now);
        assert!(!policy.is_stale(&entry(10_000, now)));
    }

    #[test]
    fn test_closure_policy() {
        let policy = |e: &FileEntry| e.size > 100;
        let now = Utc::now();
        let mut big = entry(0, now);
        big.size = 1024;
        assert!(policy.is_stale(&big));
        assert!(!policy.is_stale(&entry(0, now)));
    }
}
