use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub target: String,
    pub expected: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Coarse start/end accounting per stage per task. No interim increments:
/// each stage invocation writes exactly one start and one end, including
/// runs where no item ever arrived.
#[derive(Default)]
pub struct ProgressTracker {
    records: DashMap<(String, String), ProgressRecord>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, stage: &str, target: &str, task_id: &str, expected: usize) {
        info!(stage, target, task = task_id, expected, "stage started");
        self.records.insert(
            (stage.to_string(), task_id.to_string()),
            ProgressRecord {
                target: target.to_string(),
                expected,
                started_at: Utc::now(),
                ended_at: None,
            },
        );
    }

    pub fn end(&self, stage: &str, target: &str, task_id: &str, expected: usize) {
        info!(stage, target, task = task_id, expected, "stage ended");
        match self
            .records
            .get_mut(&(stage.to_string(), task_id.to_string()))
        {
            Some(mut record) => record.ended_at = Some(Utc::now()),
            None => {
                warn!(stage, task = task_id, "progress end without matching start");
            }
        }
    }

    pub fn snapshot(&self, stage: &str, task_id: &str) -> Option<ProgressRecord> {
        self.records
            .get(&(stage.to_string(), task_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Every (stage, task) record, for end-of-run summaries.
    pub fn snapshot_all(&self) -> Vec<(String, String, ProgressRecord)> {
        self.records
            .iter()
            .map(|entry| {
                let (stage, task) = entry.key().clone();
                (stage, task, entry.value().clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_end_completes_record() {
        let tracker = ProgressTracker::new();
        tracker.start("SubdomainScan", "example.com", "task-1", 3);

        let record = tracker.snapshot("SubdomainScan", "task-1").unwrap();
        assert_eq!(record.expected, 3);
        assert!(record.ended_at.is_none());

        tracker.end("SubdomainScan", "example.com", "task-1", 3);
        let record = tracker.snapshot("SubdomainScan", "task-1").unwrap();
        assert!(record.ended_at.is_some());
        assert!(record.ended_at.unwrap() >= record.started_at);
    }

    #[test]
    fn end_without_start_leaves_no_record() {
        let tracker = ProgressTracker::new();
        tracker.end("PortScan", "example.com", "task-1", 2);
        assert!(tracker.snapshot("PortScan", "task-1").is_none());
    }

    #[test]
    fn records_are_scoped_by_stage_and_task() {
        let tracker = ProgressTracker::new();
        tracker.start("PortScan", "example.com", "task-1", 1);
        tracker.start("PortScan", "example.org", "task-2", 1);

        assert_eq!(tracker.snapshot_all().len(), 2);
        assert_eq!(
            tracker.snapshot("PortScan", "task-2").unwrap().target,
            "example.org"
        );
    }
}
