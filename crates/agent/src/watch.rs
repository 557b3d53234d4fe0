// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discovery and watch controller.
//!
//! Maintains the live mapping of watched directories, the selected-active
//! file per logical stream, and the running tailers, under a stream of
//! filesystem events. The active file among rotated candidates is the one
//! with the most recent date embedded in its name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, LogConfig};
use crate::monitor::Stat;
use crate::reader::SeekPos;
use crate::record::Record;
use crate::tail::Tailer;

const FS_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A directory registered with the filesystem event source, together with
/// the indices of the log configs it serves. A directory may serve several
/// configs when base directories coincide or a recursive descent satisfies
/// more than one.
#[derive(Debug, Default)]
struct WatchedDir {
    configs: Vec<usize>,
}

/// The active file of one logical stream and its running tailer.
struct WatchedFile {
    path: PathBuf,
    date: NaiveDateTime,
    wake_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A file matched during discovery, before a tailer is attached.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    date: NaiveDateTime,
    config: usize,
}

#[derive(Debug, Default)]
struct Discovery {
    dirs: HashMap<PathBuf, Vec<usize>>,
    files: HashMap<String, Candidate>,
}

/// Watch controller task. Sole owner of the directory/file/reverse maps;
/// all mutation happens on this task.
pub struct Watcher {
    configs: Vec<Arc<LogConfig>>,
    read_buffer_size: usize,
    message_tx: mpsc::Sender<Record>,
    monitor_tx: mpsc::Sender<Stat>,
    fs_watcher: RecommendedWatcher,
    fs_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    watching_dir: HashMap<PathBuf, WatchedDir>,
    watching_file: HashMap<String, WatchedFile>,
    reverse_map: HashMap<PathBuf, String>,
    retired: Vec<JoinHandle<()>>,
    initialized: bool,
}

impl Watcher {
    pub fn new(
        config: &Config,
        message_tx: mpsc::Sender<Record>,
        monitor_tx: mpsc::Sender<Stat>,
    ) -> anyhow::Result<Self> {
        let (fs_tx, fs_rx) = mpsc::channel(FS_EVENT_CHANNEL_CAPACITY);
        let fs_watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            // Runs on the notify thread; a full channel applies backpressure.
            let _ = fs_tx.blocking_send(event);
        })
        .context("create filesystem watcher")?;

        Ok(Self {
            configs: config.logs.iter().cloned().map(Arc::new).collect(),
            read_buffer_size: config.read_buffer_size,
            message_tx,
            monitor_tx,
            fs_watcher,
            fs_rx,
            watching_dir: HashMap::new(),
            watching_file: HashMap::new(),
            reverse_map: HashMap::new(),
            retired: Vec::new(),
            initialized: false,
        })
    }

    /// Run the controller until cancellation. `ready` fires once the
    /// initial walk has finished, successfully or not.
    pub async fn run(mut self, ready: oneshot::Sender<()>, shutdown: CancellationToken) {
        let init = self.initialize(&shutdown);
        let _ = ready.send(());
        if let Err(e) = init {
            warn!("failed to start file watcher: {e:#}");
            self.drain_tailers().await;
            return;
        }
        if self.watching_dir.is_empty() && self.watching_file.is_empty() {
            warn!("nothing to watch");
            return;
        }
        info!("file watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutting down file watcher");
                    break;
                }
                event = self.fs_rx.recv() => match event {
                    Some(Ok(event)) => self.dispatch(&shutdown, event),
                    Some(Err(e)) => warn!(err = %e, "filesystem watcher error"),
                    None => break,
                }
            }
        }
        self.drain_tailers().await;
    }

    /// Walk every configured base directory, start a tailer per retained
    /// stream file (positioned at the tail), and register the found
    /// directories with the event source.
    fn initialize(&mut self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let all: Vec<usize> = (0..self.configs.len()).collect();
        let found = discover(&self.configs, None, &all)?;
        self.adopt(shutdown, found);
        self.initialized = true;
        Ok(())
    }

    /// Merge a discovery result: install stream files and register new
    /// directories with the event source.
    fn adopt(&mut self, shutdown: &CancellationToken, found: Discovery) {
        for (key, candidate) in found.files {
            self.install_file(shutdown, key, candidate);
        }
        for (path, configs) in found.dirs {
            let dir = self.watching_dir.entry(path.clone()).or_default();
            let newly_watched = dir.configs.is_empty();
            for idx in configs {
                if !dir.configs.contains(&idx) {
                    dir.configs.push(idx);
                }
            }
            if newly_watched {
                info!(path = %path.display(), "watching directory");
                if let Err(e) = self.fs_watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!(path = %path.display(), err = %e, "failed to watch directory");
                }
            }
        }
    }

    /// Install the active file for a stream key. An existing file with a
    /// later or equal embedded date wins; otherwise its tailer is cancelled
    /// and replaced.
    fn install_file(&mut self, shutdown: &CancellationToken, key: String, candidate: Candidate) {
        if let Some(current_date) = self.watching_file.get(&key).map(|f| f.date) {
            if current_date >= candidate.date {
                return;
            }
            self.unwatch_file(&key);
        }
        // The initial walk resumes at end-of-file; anything discovered
        // later is a fresh file and is read from the start.
        let start = if self.initialized { SeekPos::Head } else { SeekPos::Tail };
        let watched = self.start_tailer(shutdown, &candidate, start);
        self.reverse_map.insert(candidate.path, key.clone());
        self.watching_file.insert(key, watched);
    }

    fn start_tailer(
        &self,
        shutdown: &CancellationToken,
        candidate: &Candidate,
        start: SeekPos,
    ) -> WatchedFile {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let cancel = shutdown.child_token();
        let tailer = Tailer::new(
            candidate.path.clone(),
            Arc::clone(&self.configs[candidate.config]),
            self.read_buffer_size,
            self.message_tx.clone(),
            self.monitor_tx.clone(),
            wake_rx,
        );
        let handle = tokio::spawn(tailer.run(start, cancel.clone()));
        WatchedFile { path: candidate.path.clone(), date: candidate.date, wake_tx, cancel, handle }
    }

    fn dispatch(&mut self, shutdown: &CancellationToken, event: notify::Event) {
        debug!(kind = ?event.kind, paths = ?event.paths, "filesystem event");
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Old path first, new path second.
                if let Some(from) = event.paths.first().cloned() {
                    self.on_remove(&from);
                }
                if let Some(to) = event.paths.get(1).cloned() {
                    self.on_create(shutdown, &to);
                }
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.on_create(shutdown, path);
                }
            }
            EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::From | RenameMode::Any | RenameMode::Other,
            )) => {
                for path in event.paths {
                    self.on_remove(&path);
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.on_write(path);
                }
            }
            _ => {}
        }
    }

    fn on_create(&mut self, shutdown: &CancellationToken, path: &Path) {
        // The path may already be gone again; a failed stat means the
        // event is ignored, never a crash.
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "failed to stat created path");
                return;
            }
        };
        if meta.is_dir() {
            self.on_new_dir(shutdown, path);
        } else {
            self.on_new_file(shutdown, path);
        }
    }

    /// A directory appeared under a watched parent: descend with the
    /// parent's recursive configs only.
    fn on_new_dir(&mut self, shutdown: &CancellationToken, path: &Path) {
        let Some(parent) = path.parent() else { return };
        let Some(dir) = self.watching_dir.get(parent) else {
            warn!(path = %path.display(), "created directory has no watched parent");
            return;
        };
        let recursive: Vec<usize> =
            dir.configs.iter().copied().filter(|&idx| self.configs[idx].recursive).collect();
        if recursive.is_empty() {
            return;
        }
        match discover(&self.configs, Some(path), &recursive) {
            Ok(found) => self.adopt(shutdown, found),
            Err(e) => warn!(path = %path.display(), "scoped discovery failed: {e:#}"),
        }
    }

    fn on_new_file(&mut self, shutdown: &CancellationToken, path: &Path) {
        let Some(parent) = path.parent() else { return };
        let Some(dir) = self.watching_dir.get(parent) else {
            warn!(path = %path.display(), "created file has no watched parent");
            return;
        };
        let mut matches = Vec::new();
        for &idx in &dir.configs {
            if let Some((key, date)) = match_stream(path, &self.configs[idx]) {
                matches.push((key, Candidate { path: path.to_path_buf(), date, config: idx }));
            }
        }
        for (key, candidate) in matches {
            self.install_file(shutdown, key, candidate);
        }
    }

    /// Forward a write event into the owning tailer's wake inbox.
    fn on_write(&mut self, path: &Path) {
        if let Some(key) = self.reverse_map.get(path) {
            if let Some(file) = self.watching_file.get(key) {
                // A full inbox means a wake is already pending.
                let _ = file.wake_tx.try_send(());
            } else {
                warn!(path = %path.display(), "reverse map entry without watched file");
            }
        }
    }

    fn on_remove(&mut self, path: &Path) {
        if self.watching_dir.contains_key(path) {
            self.unwatch_dir(path);
        } else if let Some(key) = self.reverse_map.get(path).cloned() {
            self.unwatch_file(&key);
        } else {
            debug!(path = %path.display(), "ignoring removal of unwatched path");
        }
    }

    /// Remove a directory and cascade: every watched file and descendant
    /// directory under it is taken down first.
    fn unwatch_dir(&mut self, path: &Path) {
        let files: Vec<String> = self
            .watching_file
            .iter()
            .filter(|(_, file)| file.path.starts_with(path))
            .map(|(key, _)| key.clone())
            .collect();
        for key in files {
            self.unwatch_file(&key);
        }
        let dirs: Vec<PathBuf> = self
            .watching_dir
            .keys()
            .filter(|dir| dir.as_path() != path && dir.starts_with(path))
            .cloned()
            .collect();
        for dir in dirs {
            self.watching_dir.remove(&dir);
            let _ = self.fs_watcher.unwatch(&dir);
            info!(path = %dir.display(), "unwatching directory");
        }
        self.watching_dir.remove(path);
        let _ = self.fs_watcher.unwatch(path);
        info!(path = %path.display(), "unwatching directory");
    }

    fn unwatch_file(&mut self, key: &str) {
        if let Some(file) = self.watching_file.remove(key) {
            info!(path = %file.path.display(), "stopping tailer");
            file.cancel.cancel();
            self.reverse_map.remove(&file.path);
            self.retired.push(file.handle);
        } else {
            warn!(key, "watched file missing for stream key");
        }
    }

    /// Cancel and join every tailer, including ones retired by rotation.
    async fn drain_tailers(&mut self) {
        for (_, file) in self.watching_file.drain() {
            file.cancel.cancel();
            self.retired.push(file.handle);
        }
        self.reverse_map.clear();
        for handle in self.retired.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Walk the base directories (or `scope`, when descending into a newly
/// created directory) for the given configs. Collects watchable
/// directories and the latest-dated candidate file per stream key.
fn discover(
    configs: &[Arc<LogConfig>],
    scope: Option<&Path>,
    indices: &[usize],
) -> anyhow::Result<Discovery> {
    let mut found = Discovery::default();
    for &idx in indices {
        let config = &configs[idx];
        let base = scope.unwrap_or(&config.basedir);
        debug!(base = %base.display(), tag = %config.tag, "searching for log files");
        let walker = walkdir::WalkDir::new(base).follow_links(false);
        let walker = if config.recursive { walker } else { walker.max_depth(1) };
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", base.display()))?;
            if entry.file_type().is_dir() {
                // Non-recursive configs watch only the base directory.
                if !config.recursive && entry.depth() > 0 {
                    continue;
                }
                let dir = found.dirs.entry(entry.path().to_path_buf()).or_default();
                if !dir.contains(&idx) {
                    dir.push(idx);
                }
            } else if let Some((key, date)) = match_stream(entry.path(), config) {
                let candidate = Candidate { path: entry.path().to_path_buf(), date, config: idx };
                match found.files.get(&key) {
                    Some(current) if current.date >= date => {}
                    _ => {
                        found.files.insert(key, candidate);
                    }
                }
            }
        }
    }
    Ok(found)
}

/// Match a path against a stream config, returning the stream key and the
/// embedded date.
///
/// The key is the path with the capture's byte range deleted, joined with
/// the date format. Cutting by capture indices keeps the identity stable
/// even when a date-like substring appears elsewhere in the path.
fn match_stream(path: &Path, config: &LogConfig) -> Option<(String, NaiveDateTime)> {
    let text = path.to_str()?;
    let caps = config.target_file_regexp.captures(text)?;
    let group = caps.get(1)?;
    let Some(date) = parse_file_date(group.as_str(), &config.file_time_format) else {
        warn!(
            path = text,
            format = %config.file_time_format,
            "date substring does not parse, ignoring file"
        );
        return None;
    };
    let key = format!("{}{}:{}", &text[..group.start()], &text[group.end()..], config.file_time_format);
    Some((key, date))
}

/// Parse an embedded file date, accepting date-only formats at midnight.
fn parse_file_date(text: &str, format: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
        return Some(datetime);
    }
    NaiveDate::parse_from_str(text, format).ok().and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
