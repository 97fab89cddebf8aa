//! Durable [`ReleaseRepository`] backed by redb.
//!
//! # Table design
//!
//! ```text
//! releases      name                          -> JSON ReleaseRow
//! phases        name ++ 0x00 ++ position(u32 BE) -> JSON Phase
//! threads       threadid                      -> JSON ThreadRow (owning release)
//! thread_tasks  threadid                      => taskid   (multimap)
//! ```
//!
//! Phase keys sort by release then pipeline position, so one range scan
//! returns a release's phases in order. Release names never contain NUL.
//!
//! Ownership is explicit: deleting a release removes its phase range and
//! every thread row pointing at it, and deleting a thread removes its
//! `thread_tasks` entries, all inside the same write transaction.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{
    Database, DatabaseError, MultimapTable, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, Table,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::error::{storage, RelbotError, Result};
use crate::model::{NotificationThread, Phase, Release, UpstreamRelease};

use super::ReleaseRepository;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");
const PHASES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("phases");
const THREADS: TableDefinition<&str, &[u8]> = TableDefinition::new("threads");
const THREAD_TASKS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("thread_tasks");

type BytesTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;
type NamedTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type TaskTable<'txn> = MultimapTable<'txn, &'static str, &'static str>;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ReleaseRow {
    product: String,
    version: String,
    repo: String,
    revision: String,
}

impl From<&UpstreamRelease> for ReleaseRow {
    fn from(r: &UpstreamRelease) -> Self {
        Self {
            product: r.product.clone(),
            version: r.version.clone(),
            repo: r.project.clone(),
            revision: r.revision.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadRow {
    release: String,
    created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn phase_key(release: &str, position: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(release.len() + 5);
    key.extend_from_slice(release.as_bytes());
    key.push(0);
    key.extend_from_slice(&position.to_be_bytes());
    key
}

/// Inclusive key bounds covering every phase of `release`.
fn phase_bounds(release: &str) -> (Vec<u8>, Vec<u8>) {
    (phase_key(release, 0), phase_key(release, u32::MAX))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(storage)
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(storage)
}

// ---------------------------------------------------------------------------
// Readers shared by read and write transactions
// ---------------------------------------------------------------------------

fn read_phases<T>(table: &T, release: &str) -> Result<Vec<Phase>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let (lo, hi) = phase_bounds(release);
    let mut phases = Vec::new();
    for entry in table.range(lo.as_slice()..=hi.as_slice()).map_err(storage)? {
        let (_, v) = entry.map_err(storage)?;
        phases.push(decode(v.value())?);
    }
    Ok(phases)
}

fn read_threads<T>(table: &T, release: &str) -> Result<Vec<(String, ThreadRow)>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut threads = Vec::new();
    for entry in table.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let row: ThreadRow = decode(v.value())?;
        if row.release == release {
            threads.push((k.value().to_string(), row));
        }
    }
    Ok(threads)
}

fn read_tasks<T>(table: &T, threadid: &str) -> Result<BTreeSet<String>>
where
    T: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut tasks = BTreeSet::new();
    for value in table.get(threadid).map_err(storage)? {
        tasks.insert(value.map_err(storage)?.value().to_string());
    }
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Cascading deletes
// ---------------------------------------------------------------------------

fn remove_phases(phases: &mut BytesTable<'_>, release: &str) -> Result<()> {
    let (lo, hi) = phase_bounds(release);
    let keys = phases
        .range(lo.as_slice()..=hi.as_slice())
        .map_err(storage)?
        .map(|entry| entry.map(|(k, _)| k.value().to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(storage)?;
    for key in keys {
        phases.remove(key.as_slice()).map_err(storage)?;
    }
    Ok(())
}

fn remove_thread(threads: &mut NamedTable<'_>, tasks: &mut TaskTable<'_>, threadid: &str) -> Result<()> {
    tasks.remove_all(threadid).map_err(storage)?;
    threads.remove(threadid).map_err(storage)?;
    Ok(())
}

fn remove_release(
    releases: &mut NamedTable<'_>,
    phases: &mut BytesTable<'_>,
    threads: &mut NamedTable<'_>,
    tasks: &mut TaskTable<'_>,
    name: &str,
) -> Result<()> {
    remove_phases(phases, name)?;
    for (threadid, _) in read_threads(threads, name)? {
        remove_thread(threads, tasks, &threadid)?;
    }
    releases.remove(name).map_err(storage)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// RedbReleaseStore
// ---------------------------------------------------------------------------

pub struct RedbReleaseStore {
    db: Database,
}

impl RedbReleaseStore {
    /// Open or create the store at `path`, creating all tables up front so
    /// read transactions never see a missing table.
    pub fn open(path: &Path) -> Result<Self> {
        Self::try_open(path)?.ok_or_else(|| {
            RelbotError::Storage(format!("{} is locked by another process", path.display()))
        })
    }

    /// Like [`open`](Self::open), but `None` when another process (a running
    /// `relbot serve`) holds the file lock.
    pub fn try_open(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match Database::create(path) {
            Ok(db) => Self::init(db).map(Some),
            Err(DatabaseError::DatabaseAlreadyOpen) => Ok(None),
            Err(e) => Err(storage(e)),
        }
    }

    /// An empty store that lives only as long as this value.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(storage)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let wt = db.begin_write().map_err(storage)?;
        wt.open_table(RELEASES).map_err(storage)?;
        wt.open_table(PHASES).map_err(storage)?;
        wt.open_table(THREADS).map_err(storage)?;
        wt.open_multimap_table(THREAD_TASKS).map_err(storage)?;
        wt.commit().map_err(storage)?;
        Ok(Self { db })
    }

    fn load_release(
        &self,
        name: &str,
        row: ReleaseRow,
        phases: &impl ReadableTable<&'static [u8], &'static [u8]>,
        threads: &impl ReadableTable<&'static str, &'static [u8]>,
        tasks: &impl ReadableMultimapTable<&'static str, &'static str>,
    ) -> Result<Release> {
        let mut open_threads = Vec::new();
        for (threadid, thread) in read_threads(threads, name)? {
            open_threads.push(NotificationThread {
                tasks: read_tasks(tasks, &threadid)?,
                threadid,
                release: thread.release,
                created_at: thread.created_at,
            });
        }
        open_threads.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(Release {
            name: name.to_string(),
            product: row.product,
            version: row.version,
            repo: row.repo,
            revision: row.revision,
            phases: read_phases(phases, name)?,
            threads: open_threads,
        })
    }
}

impl ReleaseRepository for RedbReleaseStore {
    fn sync(&self, upstream: &[UpstreamRelease]) -> Result<Vec<Release>> {
        let mut listed = HashSet::new();
        let wanted: Vec<&UpstreamRelease> = upstream
            .iter()
            .filter(|r| listed.insert(r.name.as_str()))
            .collect();

        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut releases = wt.open_table(RELEASES).map_err(storage)?;
            let mut phases = wt.open_table(PHASES).map_err(storage)?;
            let mut threads = wt.open_table(THREADS).map_err(storage)?;
            let mut tasks = wt.open_multimap_table(THREAD_TASKS).map_err(storage)?;

            let existing = releases
                .iter()
                .map_err(storage)?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage)?;
            for name in existing.iter().filter(|n| !listed.contains(n.as_str())) {
                tracing::info!(release = %name, "release no longer in flight, dropping");
                remove_release(&mut releases, &mut phases, &mut threads, &mut tasks, name)?;
            }

            for release in wanted {
                let row = encode(&ReleaseRow::from(release))?;
                let previous = read_phases(&phases, &release.name)?;
                if previous.is_empty() {
                    tracing::info!(release = %release.name, "tracking new release");
                }
                releases
                    .insert(release.name.as_str(), row.as_slice())
                    .map_err(storage)?;

                remove_phases(&mut phases, &release.name)?;
                let mut regrouped = false;
                for (position, upstream_phase) in release.phases.iter().enumerate() {
                    let mut phase = Phase::from_upstream(upstream_phase);
                    // A new groupid means a new triggering: earlier completion is stale.
                    if let Some(prev) = previous.iter().find(|p| p.name == phase.name) {
                        phase.done = prev.done && prev.groupid == phase.groupid;
                        regrouped |= prev.groupid.is_some() && prev.groupid != phase.groupid;
                    }
                    let key = phase_key(&release.name, position as u32);
                    phases
                        .insert(key.as_slice(), encode(&phase)?.as_slice())
                        .map_err(storage)?;
                }
                // Tasks tracked from a superseded group can never go green.
                if regrouped {
                    for (threadid, _) in read_threads(&threads, &release.name)? {
                        remove_thread(&mut threads, &mut tasks, &threadid)?;
                    }
                    tracing::info!(release = %release.name, "task group replaced, dropped open threads");
                }
            }
        }
        wt.commit().map_err(storage)?;

        self.list_releases()
    }

    fn list_releases(&self) -> Result<Vec<Release>> {
        let rt = self.db.begin_read().map_err(storage)?;
        let releases = rt.open_table(RELEASES).map_err(storage)?;
        let phases = rt.open_table(PHASES).map_err(storage)?;
        let threads = rt.open_table(THREADS).map_err(storage)?;
        let tasks = rt.open_multimap_table(THREAD_TASKS).map_err(storage)?;

        let mut result = Vec::new();
        for entry in releases.iter().map_err(storage)? {
            let (k, v) = entry.map_err(storage)?;
            let row: ReleaseRow = decode(v.value())?;
            result.push(self.load_release(k.value(), row, &phases, &threads, &tasks)?);
        }
        Ok(result)
    }

    fn get_release(&self, name: &str) -> Result<Option<Release>> {
        let rt = self.db.begin_read().map_err(storage)?;
        let releases = rt.open_table(RELEASES).map_err(storage)?;
        let Some(v) = releases.get(name).map_err(storage)? else {
            return Ok(None);
        };
        let row: ReleaseRow = decode(v.value())?;
        let phases = rt.open_table(PHASES).map_err(storage)?;
        let threads = rt.open_table(THREADS).map_err(storage)?;
        let tasks = rt.open_multimap_table(THREAD_TASKS).map_err(storage)?;
        self.load_release(name, row, &phases, &threads, &tasks)
            .map(Some)
    }

    fn open_thread(&self, release: &str, threadid: &str, taskids: &[String]) -> Result<()> {
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let releases = wt.open_table(RELEASES).map_err(storage)?;
            if releases.get(release).map_err(storage)?.is_none() {
                return Err(RelbotError::NotFound(format!("release {release}")));
            }
            let mut threads = wt.open_table(THREADS).map_err(storage)?;
            let mut tasks = wt.open_multimap_table(THREAD_TASKS).map_err(storage)?;

            let mut tracked_elsewhere = HashSet::new();
            for (other, _) in read_threads(&threads, release)? {
                if other != threadid {
                    tracked_elsewhere.extend(read_tasks(&tasks, &other)?);
                }
            }
            let fresh: Vec<&String> = taskids
                .iter()
                .filter(|t| !tracked_elsewhere.contains(*t))
                .collect();
            if fresh.is_empty() {
                tracing::debug!(release, threadid, "all tasks already tracked, no thread opened");
                return Ok(());
            }

            if threads.get(threadid).map_err(storage)?.is_none() {
                let row = encode(&ThreadRow {
                    release: release.to_string(),
                    created_at: Utc::now(),
                })?;
                threads.insert(threadid, row.as_slice()).map_err(storage)?;
            }
            for taskid in fresh {
                tasks.insert(threadid, taskid.as_str()).map_err(storage)?;
            }
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn update_thread_tasks(&self, threadid: &str, taskids: &[String]) -> Result<()> {
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let threads = wt.open_table(THREADS).map_err(storage)?;
            if threads.get(threadid).map_err(storage)?.is_none() {
                return Err(RelbotError::NotFound(format!("thread {threadid}")));
            }
            let mut tasks = wt.open_multimap_table(THREAD_TASKS).map_err(storage)?;
            tasks.remove_all(threadid).map_err(storage)?;
            for taskid in taskids {
                tasks.insert(threadid, taskid.as_str()).map_err(storage)?;
            }
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn prune_empty_threads(&self, release: &str) -> Result<usize> {
        let wt = self.db.begin_write().map_err(storage)?;
        let mut pruned = 0;
        {
            let mut threads = wt.open_table(THREADS).map_err(storage)?;
            let mut tasks = wt.open_multimap_table(THREAD_TASKS).map_err(storage)?;
            for (threadid, _) in read_threads(&threads, release)? {
                if read_tasks(&tasks, &threadid)?.is_empty() {
                    remove_thread(&mut threads, &mut tasks, &threadid)?;
                    pruned += 1;
                }
            }
        }
        wt.commit().map_err(storage)?;
        Ok(pruned)
    }

    fn mark_phase_done(&self, release: &str, phase: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(storage)?;
        let changed = {
            let mut phases = wt.open_table(PHASES).map_err(storage)?;
            let current = read_phases(&phases, release)?;
            match current.iter().position(|p| p.name == phase) {
                Some(position) if current[position].triggered && !current[position].done => {
                    let mut updated = current[position].clone();
                    updated.done = true;
                    let key = phase_key(release, position as u32);
                    phases
                        .insert(key.as_slice(), encode(&updated)?.as_slice())
                        .map_err(storage)?;
                    true
                }
                _ => false,
            }
        };
        wt.commit().map_err(storage)?;
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
