//! Chat command parsing and the on-demand status queries.
//!
//! The handler reads the store and fetches fresh upstream data but never
//! writes: answering `status` must not change what the reconciler reports.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{RelbotError, Result};
use crate::graph::TaskGraph;
use crate::model::{filter_ignored, Release};
use crate::render::{Message, Renderer};
use crate::source::{ReleaseSource, TaskGraphSource};
use crate::store::{run_blocking, ReleaseRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `status`: signoff state of every release in flight.
    Overall,
    /// `status <fragment>`: one release plus its current task graph.
    Detail(String),
    Help,
    Unknown,
}

impl Command {
    /// Parse a chat message. `None` means the message is not addressed to
    /// the bot (it does not start with `prefix`) and should be ignored.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        static MENTION: OnceLock<Regex> = OnceLock::new();
        let text = text.trim().to_lowercase();
        let text = MENTION
            .get_or_init(|| Regex::new(r"^<@[a-z0-9]+(\|[^>]*)?>\s*").unwrap())
            .replace(&text, "");

        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        let prefix = prefix.trim().to_lowercase();
        if !prefix.is_empty() {
            if tokens.first() != Some(&prefix.as_str()) {
                return None;
            }
            tokens.remove(0);
        }

        Some(match tokens.as_slice() {
            ["status"] => Self::Overall,
            ["status", .., fragment] => Self::Detail(fragment.to_string()),
            ["help"] => Self::Help,
            _ => Self::Unknown,
        })
    }
}

pub struct CommandHandler<R, G, S> {
    releases: Arc<R>,
    graphs: Arc<G>,
    store: Arc<S>,
    renderer: Renderer,
    ignored_products: Vec<String>,
}

impl<R, G, S> CommandHandler<R, G, S>
where
    R: ReleaseSource,
    G: TaskGraphSource,
    S: ReleaseRepository + 'static,
{
    pub fn new(
        releases: Arc<R>,
        graphs: Arc<G>,
        store: Arc<S>,
        renderer: Renderer,
        ignored_products: Vec<String>,
    ) -> Self {
        Self {
            releases,
            graphs,
            store,
            renderer,
            ignored_products,
        }
    }

    /// Parse and answer `text`; `None` when the message is not a command.
    pub async fn respond(&self, text: &str) -> Option<Message> {
        let command = Command::parse(text, &self.renderer.command_prefix)?;
        Some(self.handle(&command).await)
    }

    /// Always produces a reply: failures are rendered, not returned.
    pub async fn handle(&self, command: &Command) -> Message {
        debug!(?command, "handling chat command");
        match command {
            Command::Help => self.renderer.help(),
            Command::Unknown => self.renderer.not_understood(),
            Command::Overall => match self.view().await {
                Ok(releases) => self.renderer.overall_status(&releases),
                Err(e) => self.failed(e),
            },
            Command::Detail(fragment) => match self.detail(fragment).await {
                Ok(message) => message,
                Err(e) => self.failed(e),
            },
        }
    }

    async fn detail(&self, fragment: &str) -> Result<Message> {
        let releases = self.view().await?;
        let Some(release) = find_release(&releases, fragment) else {
            return Ok(self.renderer.release_not_found());
        };

        let Some(groupid) = release
            .current_phase()
            .and_then(|p| p.groupid.clone())
        else {
            return Ok(self.renderer.release_detail(release, None));
        };

        Ok(match self.graphs.fetch_group(&groupid).await {
            Ok(records) => {
                let graph = TaskGraph::classify(records);
                self.renderer.release_detail(release, Some(&graph))
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(release = %release.name, groupid = %groupid, error = %e, "task graph unavailable");
                self.renderer
                    .release_detail_unavailable(release, &e.to_string())
            }
        })
    }

    /// Fresh upstream releases with locally tracked `done` flags and threads
    /// laid over them.
    pub async fn view(&self) -> Result<Vec<Release>> {
        let upstream = filter_ignored(self.releases.fetch_releases().await?, &self.ignored_products);
        let stored = run_blocking(&self.store, |s| s.list_releases()).await?;
        Ok(upstream
            .iter()
            .map(|u| overlay(Release::from_upstream(u), &stored))
            .collect())
    }

    fn failed(&self, e: RelbotError) -> Message {
        warn!(error = %e, "chat command failed");
        self.renderer.failure(&e.to_string())
    }
}

/// First release whose name contains `fragment`, ignoring case.
pub fn find_release<'a>(releases: &'a [Release], fragment: &str) -> Option<&'a Release> {
    let fragment = fragment.to_lowercase();
    releases
        .iter()
        .find(|r| r.name.to_lowercase().contains(&fragment))
}

fn overlay(mut release: Release, stored: &[Release]) -> Release {
    let Some(known) = stored.iter().find(|s| s.name == release.name) else {
        return release;
    };
    for phase in &mut release.phases {
        phase.done = known
            .phases
            .iter()
            .any(|p| p.name == phase.name && p.groupid == phase.groupid && p.done);
    }
    release.threads = known.threads.clone();
    release
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskState::{Completed, Failed, Running};
    use crate::store::RedbReleaseStore;
    use crate::testing::{renderer, task, upstream, FakeGraphs, FakeReleases};
    use tempfile::TempDir;

    #[test]
    fn parse_requires_prefix() {
        assert_eq!(Command::parse("status", "shipit"), None);
        assert_eq!(Command::parse("hello shipit status", "shipit"), None);
        assert_eq!(Command::parse("shipit status", "shipit"), Some(Command::Overall));
        assert_eq!(Command::parse("  ShipIt   STATUS ", "shipit"), Some(Command::Overall));
    }

    #[test]
    fn parse_strips_leading_mention() {
        assert_eq!(
            Command::parse("<@U024BE7LH> shipit help", "shipit"),
            Some(Command::Help)
        );
        assert_eq!(Command::parse("<@U024BE7LH> status", ""), Some(Command::Overall));
    }

    #[test]
    fn parse_detail_uses_last_token() {
        assert_eq!(
            Command::parse("shipit status Devedition", "shipit"),
            Some(Command::Detail("devedition".into()))
        );
        assert_eq!(
            Command::parse("shipit status of firefox-81", "shipit"),
            Some(Command::Detail("firefox-81".into()))
        );
    }

    #[test]
    fn parse_anything_else_is_unknown() {
        assert_eq!(Command::parse("shipit", "shipit"), Some(Command::Unknown));
        assert_eq!(Command::parse("shipit deploy", "shipit"), Some(Command::Unknown));
        assert_eq!(Command::parse("shipit help me", "shipit"), Some(Command::Unknown));
    }

    struct Harness {
        _dir: TempDir,
        releases: Arc<FakeReleases>,
        graphs: Arc<FakeGraphs>,
        store: Arc<RedbReleaseStore>,
        handler: CommandHandler<FakeReleases, FakeGraphs, RedbReleaseStore>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RedbReleaseStore::open(&dir.path().join("relbot.redb")).unwrap());
        let releases = Arc::new(FakeReleases::new(vec![
            upstream("Firefox-80.0b3", "firefox", &[("promote_firefox", Some("g80"))]),
            upstream("Firefox-81.0", "firefox", &[("promote_firefox", Some("g81"))]),
            upstream("Thunderbird-78.2", "thunderbird", &[("promote_thunderbird", Some("gtb"))]),
        ]));
        let graphs = Arc::new(FakeGraphs::default());
        let handler = CommandHandler::new(
            Arc::clone(&releases),
            Arc::clone(&graphs),
            Arc::clone(&store),
            renderer(),
            vec!["thunderbird".into()],
        );
        Harness {
            _dir: dir,
            releases,
            graphs,
            store,
            handler,
        }
    }

    #[tokio::test]
    async fn overall_status_lists_non_ignored_releases_without_graph_fetches() {
        let h = harness();
        let reply = h.handler.respond("shipit status").await.unwrap();
        let text = reply.to_plain_text();
        assert!(text.contains("Firefox-80.0b3"));
        assert!(text.contains("Firefox-81.0"));
        assert!(!text.contains("Thunderbird"));
        assert!(h.graphs.group_fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn detail_picks_first_match_and_shows_graph() {
        let h = harness();
        h.graphs
            .set_group("g80", vec![task("A", Failed), task("B", Running), task("C", Completed)]);

        let reply = h.handler.respond("shipit status firefox").await.unwrap();
        let text = reply.to_plain_text();
        assert!(text.contains("Status: *Firefox-80.0b3*"));
        assert!(text.contains("*66% resolved*"));
        assert!(text.contains("label-A - b-linux - A"));
        assert_eq!(h.graphs.fetch_count("g80"), 1);
        assert_eq!(h.graphs.fetch_count("g81"), 0);
    }

    #[tokio::test]
    async fn detail_never_matches_ignored_products() {
        let h = harness();
        let reply = h.handler.respond("shipit status thunderbird").await.unwrap();
        assert!(reply
            .to_plain_text()
            .contains("No matching release status could be found"));
    }

    #[tokio::test]
    async fn detail_with_unreachable_graph_still_answers() {
        let h = harness();
        h.graphs.break_group("g81", "HTTP 502");
        let reply = h.handler.respond("shipit status 81.0").await.unwrap();
        let text = reply.to_plain_text();
        assert!(text.contains("Status: *Firefox-81.0*"));
        assert!(text.contains("Could not fetch the task graph"));
    }

    #[tokio::test]
    async fn upstream_failure_renders_apology() {
        let h = harness();
        h.releases.fail(true);
        let reply = h.handler.respond("shipit status").await.unwrap();
        assert!(reply.to_plain_text().contains("something went wrong"));
    }

    #[tokio::test]
    async fn queries_do_not_write_to_store() {
        let h = harness();
        h.graphs.set_group("g80", vec![task("A", Failed)]);
        h.handler.respond("shipit status").await.unwrap();
        h.handler.respond("shipit status 80.0b3").await.unwrap();
        assert!(h.store.list_releases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_overlays_done_flags_for_same_groupid_only() {
        let h = harness();
        h.store
            .sync(&[
                upstream("Firefox-80.0b3", "firefox", &[("promote_firefox", Some("g80"))]),
                upstream("Firefox-81.0", "firefox", &[("promote_firefox", Some("old"))]),
            ])
            .unwrap();
        assert!(h.store.mark_phase_done("Firefox-80.0b3", "promote_firefox").unwrap());
        assert!(h.store.mark_phase_done("Firefox-81.0", "promote_firefox").unwrap());

        let view = h.handler.view().await.unwrap();
        assert!(view[0].phases[0].done);
        assert!(!view[1].phases[0].done);
    }

    #[tokio::test]
    async fn unaddressed_messages_get_no_reply() {
        let h = harness();
        assert!(h.handler.respond("lunch anyone?").await.is_none());
    }
}
