//! Task-graph classification.
//!
//! A [`TaskGraph`] is a snapshot of one task group, every task filed under
//! exactly one [`TaskState`] bucket. Classification is a pure function of
//! the fetched task records.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Unscheduled,
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Unscheduled,
        TaskState::Pending,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Exception,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exception => "exception",
        }
    }

    /// Failed and exception tasks need a human.
    pub fn is_stuck(self) -> bool {
        matches!(self, Self::Failed | Self::Exception)
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task as listed in its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub taskid: String,
    pub label: String,
    pub worker_type: String,
    pub state: TaskState,
}

/// Live status of a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub resolved: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    buckets: BTreeMap<TaskState, Vec<TaskRecord>>,
}

impl TaskGraph {
    /// File every record under its state. A task id listed more than once
    /// keeps its first position and its last reported state.
    pub fn classify(records: impl IntoIterator<Item = TaskRecord>) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, TaskRecord> = HashMap::new();
        for record in records {
            if !latest.contains_key(&record.taskid) {
                order.push(record.taskid.clone());
            }
            latest.insert(record.taskid.clone(), record);
        }

        let mut buckets: BTreeMap<TaskState, Vec<TaskRecord>> =
            TaskState::ALL.iter().map(|s| (*s, Vec::new())).collect();
        for taskid in order {
            if let Some(record) = latest.remove(&taskid) {
                buckets.entry(record.state).or_default().push(record);
            }
        }
        Self { buckets }
    }

    pub fn bucket(&self, state: TaskState) -> &[TaskRecord] {
        self.buckets.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.bucket(state).len()
    }

    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Failed tasks followed by exception tasks.
    pub fn stuck(&self) -> impl Iterator<Item = &TaskRecord> {
        self.bucket(TaskState::Failed)
            .iter()
            .chain(self.bucket(TaskState::Exception))
    }

    pub fn state_of(&self, taskid: &str) -> Option<TaskState> {
        self.buckets
            .iter()
            .find(|(_, tasks)| tasks.iter().any(|t| t.taskid == taskid))
            .map(|(state, _)| *state)
    }

    /// Every task completed. An empty graph is not complete: the group may
    /// simply not be indexed yet.
    pub fn is_complete(&self) -> bool {
        let total = self.total();
        total > 0 && self.count(TaskState::Completed) == total
    }

    /// `floor(100 * (completed + failed + exception) / total)`, 0 for an empty graph.
    pub fn percent_resolved(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let resolved: usize = TaskState::ALL
            .iter()
            .filter(|s| s.is_resolved())
            .map(|s| self.count(*s))
            .sum();
        (resolved * 100 / total) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, state: TaskState) -> TaskRecord {
        TaskRecord {
            taskid: id.into(),
            label: format!("label-{id}"),
            worker_type: "b-linux".into(),
            state,
        }
    }

    #[test]
    fn every_task_lands_in_exactly_one_bucket() {
        let g = TaskGraph::classify(vec![
            task("A", TaskState::Unscheduled),
            task("B", TaskState::Pending),
            task("C", TaskState::Running),
            task("D", TaskState::Completed),
            task("E", TaskState::Failed),
            task("F", TaskState::Exception),
        ]);
        assert_eq!(g.total(), 6);
        for state in TaskState::ALL {
            assert_eq!(g.count(state), 1, "{state}");
        }
        assert_eq!(g.state_of("E"), Some(TaskState::Failed));
        assert_eq!(g.state_of("Z"), None);
    }

    #[test]
    fn duplicate_listing_keeps_last_state() {
        let g = TaskGraph::classify(vec![
            task("A", TaskState::Running),
            task("B", TaskState::Completed),
            task("A", TaskState::Failed),
        ]);
        assert_eq!(g.total(), 2);
        assert_eq!(g.count(TaskState::Running), 0);
        assert_eq!(g.state_of("A"), Some(TaskState::Failed));
    }

    #[test]
    fn percent_resolved_floors() {
        let g = TaskGraph::classify(vec![
            task("A", TaskState::Completed),
            task("B", TaskState::Failed),
            task("C", TaskState::Running),
        ]);
        // 2/3 = 66.66…
        assert_eq!(g.percent_resolved(), 66);
    }

    #[test]
    fn percent_resolved_is_zero_for_empty_graph() {
        assert_eq!(TaskGraph::default().percent_resolved(), 0);
        assert_eq!(TaskGraph::classify(vec![]).percent_resolved(), 0);
    }

    #[test]
    fn complete_only_when_everything_completed() {
        let done = TaskGraph::classify(vec![
            task("A", TaskState::Completed),
            task("B", TaskState::Completed),
        ]);
        assert!(done.is_complete());

        let failed = TaskGraph::classify(vec![
            task("A", TaskState::Completed),
            task("B", TaskState::Exception),
        ]);
        assert!(!failed.is_complete());
        assert_eq!(failed.percent_resolved(), 100);
    }

    #[test]
    fn empty_graph_is_not_complete() {
        assert!(!TaskGraph::classify(vec![]).is_complete());
    }

    #[test]
    fn stuck_lists_failed_before_exception() {
        let g = TaskGraph::classify(vec![
            task("X", TaskState::Exception),
            task("A", TaskState::Failed),
            task("B", TaskState::Completed),
        ]);
        let ids: Vec<_> = g.stuck().map(|t| t.taskid.as_str()).collect();
        assert_eq!(ids, vec!["A", "X"]);
    }

    #[test]
    fn task_state_serializes_lowercase() {
        let s = serde_json::to_string(&TaskState::Exception).unwrap();
        assert_eq!(s, "\"exception\"");
        let back: TaskState = serde_json::from_str("\"unscheduled\"").unwrap();
        assert_eq!(back, TaskState::Unscheduled);
    }
}
