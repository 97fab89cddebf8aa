//! Release data model.
//!
//! `Upstream*` types mirror the ShipIt API payload; `Release`, `Phase` and
//! `NotificationThread` are the locally tracked records owned by the
//! [`ReleaseRepository`](crate::store::ReleaseRepository).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Upstream (ShipIt) payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRelease {
    pub name: String,
    pub product: String,
    #[serde(default)]
    pub version: String,
    /// Source repository short name, e.g. `mozilla-beta`.
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub phases: Vec<UpstreamPhase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPhase {
    pub name: String,
    #[serde(rename = "actionTaskId", default)]
    pub action_task_id: Option<String>,
    #[serde(default)]
    pub submitted: bool,
    /// ShipIt reports a completion timestamp (or `null`); older payloads
    /// carried a bare boolean. Either way only its presence matters.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub completed: bool,
}

impl UpstreamPhase {
    /// A phase is triggered once ShipIt has scheduled its action task.
    pub fn triggered(&self) -> bool {
        self.completed
    }

    pub fn groupid(&self) -> Option<&str> {
        self.action_task_id.as_deref().filter(|id| !id.is_empty())
    }
}

fn deserialize_flag<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    // Empty or zero values mean "not yet", whatever their JSON type.
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    })
}

/// Drop releases whose product is in `ignored` (case-insensitive).
pub fn filter_ignored(releases: Vec<UpstreamRelease>, ignored: &[String]) -> Vec<UpstreamRelease> {
    releases
        .into_iter()
        .filter(|r| !ignored.iter().any(|p| p.eq_ignore_ascii_case(&r.product)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tracked records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    /// Task group id; `None` until the phase is triggered.
    pub groupid: Option<String>,
    pub triggered: bool,
    /// Set locally once the phase's task graph was observed fully completed.
    pub done: bool,
}

impl Phase {
    pub fn from_upstream(phase: &UpstreamPhase) -> Self {
        Self {
            name: phase.name.clone(),
            groupid: phase.groupid().map(str::to_string),
            triggered: phase.triggered(),
            done: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationThread {
    /// Chat-assigned message id of the thread's root message.
    pub threadid: String,
    pub release: String,
    pub tasks: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub product: String,
    pub version: String,
    pub repo: String,
    pub revision: String,
    /// Pipeline order.
    pub phases: Vec<Phase>,
    pub threads: Vec<NotificationThread>,
}

impl Release {
    /// Build an untracked view of an upstream release: no threads, nothing done.
    pub fn from_upstream(upstream: &UpstreamRelease) -> Self {
        Self {
            name: upstream.name.clone(),
            product: upstream.product.clone(),
            version: upstream.version.clone(),
            repo: upstream.project.clone(),
            revision: upstream.revision.clone(),
            phases: upstream.phases.iter().map(Phase::from_upstream).collect(),
            threads: Vec::new(),
        }
    }

    /// The last triggered phase in pipeline order.
    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.iter().rev().find(|p| p.triggered)
    }

    pub fn is_task_tracked(&self, taskid: &str) -> bool {
        self.threads.iter().any(|t| t.tasks.contains(taskid))
    }

    pub fn tracked_tasks(&self) -> BTreeSet<String> {
        self.threads
            .iter()
            .flat_map(|t| t.tasks.iter().cloned())
            .collect()
    }
}
