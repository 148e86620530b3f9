//! Per-job success/failure accounting
//!
//! One tracker belongs to one compression job; it is owned by the job loop
//! and dropped with it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Names of the items that failed, in the order they were recorded.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub user_id: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub stats: BTreeMap<String, CategoryStats>,
}

#[derive(Debug)]
pub struct ProgressTracker {
    user_id: String,
    total: usize,
    started_at: Instant,
    stats: BTreeMap<String, CategoryStats>,
}

impl ProgressTracker {
    pub fn new(user_id: impl Into<String>, total: usize) -> Self {
        Self {
            user_id: user_id.into(),
            total,
            started_at: Instant::now(),
            stats: BTreeMap::new(),
        }
    }

    /// Set the item count once it is known; the start time is kept.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn record_success(&mut self, category: &str) {
        let stats = self.stats.entry(category.to_string()).or_default();
        stats.total += 1;
        stats.success += 1;
    }

    pub fn record_failure(&mut self, category: &str, item: impl Into<String>) {
        let stats = self.stats.entry(category.to_string()).or_default();
        stats.total += 1;
        stats.failed += 1;
        stats.errors.push(item.into());
    }

    pub fn processed(&self) -> usize {
        self.stats.values().map(|s| s.total).sum()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let processed = self.processed();
        let percentage = if self.total == 0 {
            100
        } else {
            ((processed * 100 + self.total / 2) / self.total).min(100) as u8
        };
        ProgressSnapshot {
            total: self.total,
            processed,
            success: self.stats.values().map(|s| s.success).sum(),
            failed: self.stats.values().map(|s| s.failed).sum(),
            percentage,
        }
    }

    pub fn summary(&self) -> JobSummary {
        let snapshot = self.progress();
        JobSummary {
            user_id: self.user_id.clone(),
            total: self.total,
            success: snapshot.success,
            failed: snapshot.failed,
            duration_ms: self.elapsed().as_millis() as u64,
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_category() {
        let mut tracker = ProgressTracker::new("user_1", 4);
        tracker.record_success("Aset_basic");
        tracker.record_success("Aset_basic");
        tracker.record_failure("Bset_emotional", "question_3.json");

        let progress = tracker.progress();
        assert_eq!(progress.processed, 3);
        assert_eq!(progress.success, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.percentage, 75);

        let summary = tracker.summary();
        assert_eq!(summary.user_id, "user_1");
        assert_eq!(summary.stats["Aset_basic"].success, 2);
        assert_eq!(
            summary.stats["Bset_emotional"].errors,
            vec!["question_3.json".to_string()]
        );
    }

    #[test]
    fn test_set_total_keeps_start_time() {
        let mut tracker = ProgressTracker::new("user_1", 0);
        std::thread::sleep(Duration::from_millis(20));
        tracker.set_total(2);
        tracker.record_success("Cset_basic");

        let summary = tracker.summary();
        assert_eq!(summary.total, 2);
        assert!(summary.duration_ms >= 20);
        assert_eq!(tracker.progress().percentage, 50);
    }

    #[test]
    fn test_empty_job_is_complete() {
        let tracker = ProgressTracker::new("user_1", 0);
        assert_eq!(tracker.progress().percentage, 100);
        assert!(tracker.summary().stats.is_empty());
    }
}
