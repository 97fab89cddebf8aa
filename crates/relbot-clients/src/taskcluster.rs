//! Taskcluster queue client: task-group listings and single-task status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use relbot_core::{Config, RelbotError, Result, TaskGraphSource, TaskRecord, TaskState, TaskStatus};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::fetch_json;
use crate::hawk::Credentials;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListPage {
    pub tasks: Vec<ListEntry>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListEntry {
    pub status: StatusBody,
    #[serde(default)]
    pub task: TaskDefinition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusBody {
    pub task_id: String,
    #[serde(default)]
    pub worker_type: String,
    pub state: TaskState,
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Run {
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskDefinition {
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Metadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    pub status: StatusBody,
}

impl ListEntry {
    pub(crate) fn into_record(self) -> TaskRecord {
        let ListEntry { status, mut task } = self;
        let label = task
            .tags
            .remove("label")
            .filter(|l| !l.is_empty())
            .unwrap_or(task.metadata.name);
        TaskRecord {
            taskid: status.task_id,
            label,
            worker_type: status.worker_type,
            state: status.state,
        }
    }
}

impl StatusBody {
    pub(crate) fn into_status(self) -> TaskStatus {
        TaskStatus {
            state: self.state,
            resolved: self.runs.last().and_then(|r| r.resolved),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskclusterClient {
    http: Client,
    root_url: String,
    credentials: Option<Credentials>,
}

impl TaskclusterClient {
    pub fn new(http: Client, root_url: &str, credentials: Option<Credentials>) -> Self {
        Self {
            http,
            root_url: root_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_config(config: &Config, http: Client) -> Self {
        let credentials = config
            .taskcluster_credentials()
            .map(|(client_id, access_token)| Credentials {
                client_id: client_id.to_string(),
                access_token: access_token.to_string(),
            });
        Self::new(http, &config.taskcluster_root_url, credentials)
    }

    fn queue_url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/api/queue/v1/{path}", self.root_url);
        Url::parse(&raw).map_err(|e| RelbotError::Configuration(format!("bad queue URL {raw}: {e}")))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        let mut request = self.http.get(url.clone());
        if let Some(credentials) = &self.credentials {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                credentials.authorization("GET", &url)?,
            );
        }
        fetch_json(request, what).await
    }
}

impl TaskGraphSource for TaskclusterClient {
    async fn fetch_group(&self, groupid: &str) -> Result<Vec<TaskRecord>> {
        let what = format!("task group {groupid}");
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let mut url = self.queue_url(&format!("task-group/{groupid}/list"))?;
            if let Some(token) = &token {
                url.query_pairs_mut().append_pair("continuationToken", token);
            }
            let page: ListPage = self.get(url, &what).await?;
            pages += 1;
            records.extend(page.tasks.into_iter().map(ListEntry::into_record));
            match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(RelbotError::fetch(what, "continuation token did not advance"));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(groupid, pages, tasks = records.len(), "listed task group");
        Ok(records)
    }

    async fn fetch_task_status(&self, taskid: &str) -> Result<TaskStatus> {
        let url = self.queue_url(&format!("task/{taskid}/status"))?;
        let response: StatusResponse = self.get(url, &format!("task {taskid}")).await?;
        Ok(response.status.into_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn entry(taskid: &str, state: &str) -> serde_json::Value {
        serde_json::json!({
            "status": {"taskId": taskid, "workerType": "b-linux", "state": state, "runs": []},
            "task": {"tags": {"label": format!("build-{taskid}")}, "metadata": {"name": "ignored"}}
        })
    }

    #[tokio::test]
    async fn fetch_group_follows_continuation_tokens() {
        let mut server = mockito::Server::new_async().await;
        // The paged request matches both mocks; each is expected exactly once.
        let second = server
            .mock("GET", "/api/queue/v1/task-group/G1/list")
            .match_query(Matcher::UrlEncoded("continuationToken".into(), "page2".into()))
            .expect(1)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({"taskGroupId": "G1", "tasks": [entry("C", "exception")]})
                    .to_string(),
            )
            .create_async()
            .await;

        let first = server
            .mock("GET", "/api/queue/v1/task-group/G1/list")
            .expect(1)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "taskGroupId": "G1",
                    "tasks": [entry("A", "completed"), entry("B", "failed")],
                    "continuationToken": "page2"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let client = TaskclusterClient::new(Client::new(), &server.url(), None);
        let records = client.fetch_group("G1").await.unwrap();
        first.assert_async().await;
        second.assert_async().await;

        let ids: Vec<_> = records.iter().map(|r| r.taskid.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(records[1].state, TaskState::Failed);
        assert_eq!(records[2].label, "build-C");
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/queue/v1/task-group/nope/list")
            .with_status(404)
            .with_body(r#"{"code": "ResourceNotFound"}"#)
            .create_async()
            .await;

        let client = TaskclusterClient::new(Client::new(), &server.url(), None);
        let err = client.fetch_group("nope").await.unwrap_err();
        assert!(matches!(err, RelbotError::NotFound(_)));
    }

    #[tokio::test]
    async fn task_status_uses_last_run_resolution() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/queue/v1/task/T1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status": {"taskId": "T1", "state": "completed", "runs": [
                    {"runId": 0, "state": "exception", "resolved": "2020-09-14T10:00:00.000Z"},
                    {"runId": 1, "state": "completed", "resolved": "2020-09-14T11:30:00.000Z"}
                ]}}"#,
            )
            .create_async()
            .await;

        let client = TaskclusterClient::new(Client::new(), &server.url(), None);
        let status = client.fetch_task_status("T1").await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(
            status.resolved.unwrap().to_rfc3339(),
            "2020-09-14T11:30:00+00:00"
        );
    }

    #[tokio::test]
    async fn credentials_sign_requests() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/queue/v1/task/T1/status")
            .match_header("authorization", Matcher::Regex(r#"^Hawk id="relbot", ts="\d+", nonce="\w+", mac="[^"]+"$"#.into()))
            .with_status(200)
            .with_body(r#"{"status": {"taskId": "T1", "state": "running", "runs": [{}]}}"#)
            .create_async()
            .await;

        let credentials = Credentials {
            client_id: "relbot".into(),
            access_token: "secret".into(),
        };
        let client = TaskclusterClient::new(Client::new(), &server.url(), Some(credentials));
        let status = client.fetch_task_status("T1").await.unwrap();
        mock.assert_async().await;
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.resolved, None);
    }
}
