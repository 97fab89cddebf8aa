//! Slack Block Kit rendering.
//!
//! Everything here is pure: structured release/graph data in, [`Message`]
//! out. Size limits of the transport are enforced at construction time so
//! callers never have to think about them.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::graph::{TaskGraph, TaskRecord, TaskState};
use crate::model::Release;

/// Slack rejects messages with more blocks than this.
pub const MAX_BLOCKS: usize = 50;
/// Slack's limit for a section's text.
pub const MAX_SECTION_CHARS: usize = 3000;
/// Stuck tasks rendered individually before the rest are summarised.
pub const MAX_STUCK_TASKS: usize = 12;

const LIVE_LOG: &str = "public/logs/live.log";
const TREEHERDER_RESULT_STATUS: &str =
    "testfailed,busted,exception,retry,usercancel,running,pending,runnable";

// ---------------------------------------------------------------------------
// Block Kit types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Text {
    Mrkdwn { text: String },
    PlainText { text: String },
}

impl Text {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Mrkdwn { text } | Self::PlainText { text } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Button { text: Text, url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: Text },
    Divider,
    Actions { elements: Vec<Element> },
}

impl Block {
    pub fn section(text: impl Into<String>) -> Self {
        Self::Section {
            text: Text::Mrkdwn {
                text: truncate_chars(&text.into(), MAX_SECTION_CHARS),
            },
        }
    }

    pub fn divider() -> Self {
        Self::Divider
    }

    pub fn buttons(buttons: impl IntoIterator<Item = (&'static str, String)>) -> Self {
        Self::Actions {
            elements: buttons
                .into_iter()
                .map(|(label, url)| Element::Button {
                    text: Text::PlainText {
                        text: label.to_string(),
                    },
                    url,
                })
                .collect(),
        }
    }
}

/// A chat message: plain-text fallback plus optional rich blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl Message {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: Vec::new(),
        }
    }

    /// Build a block message, cutting it down to [`MAX_BLOCKS`].
    pub fn with_blocks(text: impl Into<String>, mut blocks: Vec<Block>) -> Self {
        if blocks.len() > MAX_BLOCKS {
            let dropped = blocks.len() - (MAX_BLOCKS - 1);
            blocks.truncate(MAX_BLOCKS - 1);
            blocks.push(Block::section(format!("_…{dropped} more blocks not shown_")));
        }
        Self {
            text: text.into(),
            blocks,
        }
    }

    /// Terminal-friendly rendering of the blocks (or the fallback text).
    pub fn to_plain_text(&self) -> String {
        if self.blocks.is_empty() {
            return self.text.clone();
        }
        let mut lines = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Section { text } => lines.push(text.as_str().to_string()),
                Block::Divider => lines.push("---".to_string()),
                Block::Actions { elements } => {
                    for Element::Button { text, url } in elements {
                        lines.push(format!("  [{}] {url}", text.as_str()));
                    }
                }
            }
        }
        lines.join("\n")
    }
}

/// Cut `s` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Phase names carry the product as a suffix (`push_firefox`); drop it for display.
pub fn display_phase_name(name: &str) -> String {
    static PRODUCT_SUFFIX: OnceLock<Regex> = OnceLock::new();
    PRODUCT_SUFFIX
        .get_or_init(|| Regex::new(r"_(firefox|thunderbird|fennec|devedition)").unwrap())
        .replace_all(name, "")
        .into_owned()
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Links {
    pub taskcluster_root_url: String,
    pub treeherder_url: String,
}

impl Links {
    pub fn task(&self, taskid: &str) -> String {
        format!("{}/tasks/{taskid}", self.taskcluster_root_url)
    }

    pub fn group(&self, groupid: &str) -> String {
        format!("{}/tasks/groups/{groupid}", self.taskcluster_root_url)
    }

    pub fn artifact(&self, taskid: &str, path: &str) -> String {
        format!(
            "{}/api/queue/v1/task/{taskid}/artifacts/{path}",
            self.taskcluster_root_url
        )
    }

    /// Log viewer for the latest run's live log.
    pub fn log(&self, taskid: &str) -> String {
        format!(
            "{}/tasks/{taskid}/runs/-1/logs/{}",
            self.taskcluster_root_url,
            urlencoding::encode(&self.artifact(taskid, LIVE_LOG))
        )
    }

    pub fn treeherder(&self, release: &Release, label: &str) -> String {
        format!(
            "{}/#/jobs?repo={}&resultStatus={}&searchStr={}&revision={}",
            self.treeherder_url,
            release.repo,
            urlencoding::encode(TREEHERDER_RESULT_STATUS),
            urlencoding::encode(label),
            release.revision
        )
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Renderer {
    pub links: Links,
    /// Handle pinged on stuck and complete notifications.
    pub mention: String,
    pub command_prefix: String,
    pub poll_interval_secs: u64,
}

impl Renderer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            links: Links {
                taskcluster_root_url: config.taskcluster_root_url.trim_end_matches('/').into(),
                treeherder_url: config.treeherder_url.trim_end_matches('/').into(),
            },
            mention: config.mention.clone(),
            command_prefix: config.command_prefix.clone(),
            poll_interval_secs: config.poll_interval_secs,
        }
    }

    fn command(&self, rest: &str) -> String {
        if self.command_prefix.is_empty() {
            format!("`{rest}`")
        } else {
            format!("`{} {rest}`", self.command_prefix)
        }
    }

    // --- building blocks ---------------------------------------------------

    /// Phase-by-phase signoff state.
    pub fn signoff_blocks(&self, release: &Release) -> Vec<Block> {
        let mut blocks = vec![Block::section(format!("Status: *{}*", release.name))];
        for phase in &release.phases {
            let name = display_phase_name(&phase.name);
            let line = if phase.triggered {
                let mut line = format!("• {name} - :white_check_mark:");
                if phase.done {
                    line.push_str(" (graph complete)");
                }
                if let Some(groupid) = &phase.groupid {
                    line.push('\n');
                    line.push_str(&self.links.group(groupid));
                }
                line
            } else {
                format!("• {name} - :passport_control:")
            };
            blocks.push(Block::section(line));
        }
        blocks.push(Block::divider());
        blocks
    }

    pub fn graph_blocks(&self, graph: &TaskGraph) -> Vec<Block> {
        let counts = [
            (TaskState::Unscheduled, "tasks unscheduled"),
            (TaskState::Pending, "tasks pending"),
            (TaskState::Running, "tasks running"),
            (TaskState::Failed, "task failures"),
            (TaskState::Exception, "task exceptions"),
        ]
        .iter()
        .map(|(state, what)| format!("{} {what}", graph.count(*state)))
        .collect::<Vec<_>>()
        .join("\n");

        vec![
            Block::section(format!(
                "*{}% resolved*\n{} total tasks",
                graph.percent_resolved(),
                graph.total()
            )),
            Block::divider(),
            Block::section(counts),
            Block::divider(),
        ]
    }

    /// One entry per stuck task plus an overflow summary, fitting in `room`
    /// blocks. Entries are capped at [`MAX_STUCK_TASKS`] and shrink further
    /// so the summary of the rest is never cut.
    pub fn stuck_task_blocks(
        &self,
        release: &Release,
        tasks: &[TaskRecord],
        room: usize,
    ) -> Vec<Block> {
        if tasks.is_empty() {
            return Vec::new();
        }
        // heading, then three blocks per entry
        let room = room.saturating_sub(1);
        let mut shown = tasks.len().min(MAX_STUCK_TASKS).min(room / 3);
        if shown < tasks.len() {
            shown = shown.min(room.saturating_sub(1) / 3);
        }

        let mut blocks = vec![Block::section("*Stuck Tasks:*")];
        for task in &tasks[..shown] {
            blocks.push(Block::section(format!(
                "{} - {} - {}",
                task.label, task.worker_type, task.taskid
            )));
            blocks.push(Block::buttons([
                ("Taskcluster", self.links.task(&task.taskid)),
                ("Taskcluster Log", self.links.log(&task.taskid)),
                ("Treeherder", self.links.treeherder(release, &task.label)),
            ]));
            blocks.push(Block::divider());
        }
        if tasks.len() > shown {
            let rest = &tasks[shown..];
            let ids = rest
                .iter()
                .map(|t| t.taskid.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            blocks.push(Block::section(format!(
                "_…and {} more stuck tasks:_ {ids}",
                rest.len()
            )));
        }
        blocks
    }

    // --- notifications -----------------------------------------------------

    pub fn stuck(&self, release: &Release, graph: &TaskGraph, tasks: &[TaskRecord]) -> Message {
        let headline = format!("@{} - {} is stuck!", self.mention, release.name);
        let mut blocks = vec![Block::section(&headline), Block::divider()];
        blocks.extend(self.signoff_blocks(release));
        blocks.extend(self.graph_blocks(graph));
        let room = MAX_BLOCKS.saturating_sub(blocks.len());
        blocks.extend(self.stuck_task_blocks(release, tasks, room));
        Message::with_blocks(headline, blocks)
    }

    pub fn phase_complete(&self, release: &str, phase: &str) -> Message {
        Message::plain(format!(
            "@{} - {release} phase {phase} is complete.",
            self.mention
        ))
    }

    pub fn task_resolved(&self, taskid: &str) -> Message {
        Message::plain(format!("{taskid} is now green!"))
    }

    pub fn group_not_found(&self, release: &str, groupid: &str) -> Message {
        Message::plain(format!(
            "@{} - {release} with groupid {groupid} not found",
            self.mention
        ))
    }

    pub fn group_unreachable(&self, release: &str, groupid: &str, error: &str) -> Message {
        Message::plain(format!(
            "@{} - {release}: could not fetch task group {groupid}: {error}",
            self.mention
        ))
    }

    // --- command replies ---------------------------------------------------

    pub fn overall_status(&self, releases: &[Release]) -> Message {
        let mut blocks = vec![Block::section("Releases in-flight:"), Block::divider()];
        for release in releases {
            blocks.extend(self.signoff_blocks(release));
        }
        if releases.is_empty() {
            blocks.push(Block::section("None!"));
        }
        Message::with_blocks(format!("{} releases in-flight", releases.len()), blocks)
    }

    /// Signoff state plus, when available, the current phase's task graph.
    pub fn release_detail(&self, release: &Release, graph: Option<&TaskGraph>) -> Message {
        let mut blocks = vec![Block::divider()];
        blocks.extend(self.signoff_blocks(release));
        if let Some(graph) = graph {
            blocks.extend(self.graph_blocks(graph));
            let stuck: Vec<TaskRecord> = graph.stuck().cloned().collect();
            let room = MAX_BLOCKS.saturating_sub(blocks.len());
            blocks.extend(self.stuck_task_blocks(release, &stuck, room));
        }
        Message::with_blocks(format!("Status of {}", release.name), blocks)
    }

    pub fn release_detail_unavailable(&self, release: &Release, error: &str) -> Message {
        let mut message = self.release_detail(release, None);
        message.blocks.push(Block::section(format!(
            "Could not fetch the task graph: {error}"
        )));
        message
    }

    pub fn release_not_found(&self) -> Message {
        Message::with_blocks(
            "No matching release",
            vec![
                Block::section(format!(
                    "No matching release status could be found. Message {} for usage",
                    self.command("help")
                )),
                Block::divider(),
            ],
        )
    }

    pub fn not_understood(&self) -> Message {
        Message::with_blocks(
            "Sorry, I don't understand",
            vec![Block::section(format!(
                "Sorry, I don't understand. Try messaging {} for usage",
                self.command("help")
            ))],
        )
    }

    pub fn failure(&self, error: &str) -> Message {
        Message::with_blocks(
            "Something went wrong",
            vec![Block::section(format!(
                "Sorry, something went wrong while checking releases: {error}"
            ))],
        )
    }

    pub fn help(&self) -> Message {
        let minutes = (self.poll_interval_secs / 60).max(1);
        let blocks = vec![
            Block::section("*Supported queries:*"),
            Block::section(self.command("status")),
            Block::section(
                ">>> Shows each active release in ShipIt. Checks only what phases have been \
                 signed off. Doesn't inspect the Taskcluster graph status within a phase",
            ),
            Block::section(self.command("status $release")),
            Block::section(
                ">>> Shows each phase signoff status and inspects the most recent phase's \
                 Taskcluster graph status. Highlighting how far along the graph is and which \
                 (if any) tasks are stuck and require attention.\n\n\
                 $release: can be a substring of the full release name. e.g. 'devedition' \
                 would match 'Devedition-70.0b5-build1'",
            ),
            Block::divider(),
            Block::section("*Background tasks (non interactive):*"),
            Block::section(format!(
                "• every {minutes} min the bot checks active releases in ShipIt and pings \
                 {} if a phase's Taskcluster graph has one or more stuck tasks, when a \
                 phase's graph completes, and in-thread when a reported task goes green.",
                self.mention
            )),
            Block::divider(),
        ];
        Message::with_blocks("relbot usage", blocks)
    }
}
