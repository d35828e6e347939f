//! Incremental rebuilds on source changes.
//!
//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: `notify` monitors the static roots of every binding
//!    glob recursively, debounced so a burst of saves becomes one batch.
//! 2. **Dispatcher**: every path in a batch is matched against the binding
//!    patterns. Each matching binding is triggered once per batch, and only
//!    the step bound to the changed file runs.
//! 3. **Workers**: one per bound step. A worker runs its step at most once at a
//!    time and keeps at most one more trigger queued; triggers arriving while
//!    one is already queued are coalesced into it.
//!
//! Step failures are logged by the step task and never stop the loop.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::WatchError;
use crate::graph::Task;
use crate::paths::normalize_path;

const DEBOUNCE: Duration = Duration::from_millis(250);

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Bindings exist but nothing is being watched yet.
    Idle,
    /// Waiting for changes.
    Watching,
    /// At least one bound step is running or queued.
    Dispatching,
    Stopped,
}

struct Worker {
    patterns: Vec<Pattern>,
    name: String,
    trigger: mpsc::Sender<()>,
}

/// Routes changed paths to the workers of the bindings they match.
pub struct Dispatcher {
    workers: Vec<Worker>,
    in_flight: Arc<AtomicUsize>,
    armed: AtomicBool,
    stopped: AtomicBool,
}

impl Dispatcher {
    /// Spawns one worker per bound task on the current runtime. Bindings
    /// sharing a task share its worker, so a task never overlaps itself.
    pub fn new(bindings: Vec<(Pattern, Task)>) -> Self {
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut grouped: Vec<(Vec<Pattern>, Task)> = Vec::new();
        for (pattern, task) in bindings {
            match grouped.iter_mut().find(|(_, t)| t.name() == task.name()) {
                Some((patterns, _)) => patterns.push(pattern),
                None => grouped.push((vec![pattern], task)),
            }
        }

        let workers = grouped
            .into_iter()
            .map(|(patterns, task)| {
                let (trigger, rx) = mpsc::channel(1);
                let name = task.name().to_owned();
                tokio::spawn(work(task, rx, in_flight.clone()));
                Worker {
                    patterns,
                    name,
                    trigger,
                }
            })
            .collect();

        Self {
            workers,
            in_flight,
            armed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> WatchState {
        if self.stopped.load(Ordering::SeqCst) {
            WatchState::Stopped
        } else if !self.armed.load(Ordering::SeqCst) {
            WatchState::Idle
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            WatchState::Dispatching
        } else {
            WatchState::Watching
        }
    }

    /// Triggers every task with a binding matched by at least one of
    /// `paths`, once. Returns how many tasks were triggered or coalesced.
    pub fn dispatch<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> usize {
        if self.stopped.load(Ordering::SeqCst) {
            return 0;
        }

        let paths: Vec<&Path> = paths.into_iter().collect();
        let mut count = 0;

        for worker in &self.workers {
            let matched = paths.iter().any(|path| {
                worker
                    .patterns
                    .iter()
                    .any(|pattern| pattern.matches_path_with(path, MATCH))
            });

            if !matched {
                continue;
            }

            count += 1;
            self.in_flight.fetch_add(1, Ordering::SeqCst);

            match worker.trigger.try_send(()) {
                Ok(()) => tracing::debug!("queued {}", worker.name),
                Err(TrySendError::Full(())) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!("{} already queued, coalescing", worker.name);
                }
                Err(TrySendError::Closed(())) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!("worker for {} is gone", worker.name);
                }
            }
        }

        count
    }
}

async fn work(task: Task, mut rx: mpsc::Receiver<()>, in_flight: Arc<AtomicUsize>) {
    while rx.recv().await.is_some() {
        tracing::info!("change detected, running {}", task.name());

        if let Err(e) = task.run().await {
            tracing::error!("{e}");
        }

        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Watches the sources of every `(glob, task)` binding and re-runs the task
/// whenever a matching file is created, modified or removed. Runs until the
/// watcher shuts down.
pub async fn watch(root: &Utf8Path, bindings: Vec<(String, Task)>) -> Result<(), WatchError> {
    let mut watched = HashSet::new();
    let mut resolved = Vec::with_capacity(bindings.len());

    for (glob, task) in bindings {
        let (path, pattern) =
            resolve_watch_path(root, &glob).map_err(|e| WatchError::Resolve(glob.clone(), e))?;
        tracing::debug!("{} -> {}", pattern, task.name());
        watched.insert(path);
        resolved.push((pattern, task));
    }

    let dispatcher = Dispatcher::new(resolved);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
        // the receiver only goes away when the loop below has ended
        let _ = tx.send(result);
    })?;

    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    dispatcher.arm();

    while let Some(result) = rx.recv().await {
        match result {
            Ok(events) => {
                let paths = events
                    .iter()
                    .filter(|de| {
                        matches!(
                            de.event.kind,
                            EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                        )
                    })
                    .flat_map(|de| de.event.paths.iter().map(|p| p.as_path()));

                let triggered = dispatcher.dispatch(paths);
                if triggered > 0 {
                    tracing::debug!("{triggered} steps triggered, {:?}", dispatcher.state());
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
        }
    }

    dispatcher.stop();
    Ok(())
}

/// Splits a glob relative to `root` into a canonical static directory (for
/// watching) and a compiled absolute pattern (for matching).
///
/// Directories that do not exist yet are watched through their nearest
/// existing ancestor so files created later are still noticed.
pub fn resolve_watch_path(root: &Utf8Path, glob: &str) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = normalize_path(&root.join(glob));

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let static_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // Canonicalize the deepest existing ancestor of the static part
    let mut existing = static_part.as_path();
    while !existing.exists() {
        existing = existing
            .parent()
            .ok_or_else(|| anyhow::anyhow!("no part of '{static_part}' exists"))?;
    }
    let missing = static_part.strip_prefix(existing)?;
    let absolute = existing.canonicalize_utf8()?;

    let (watch_root, pattern) = if suffix_part.as_str().is_empty() && absolute.is_file() {
        // Concrete file: watch the parent so atomic replacements are caught
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        (parent, absolute)
    } else if absolute.is_file() {
        anyhow::bail!("'{absolute}' is a file, but the glob continues below it");
    } else {
        let pattern = absolute.join(missing).join(&suffix_part);
        (absolute, pattern)
    };

    let pattern = Pattern::new(pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::TaskError;

    fn tree() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let root = root.canonicalize_utf8().unwrap();
        fs::create_dir_all(root.join("scss/parts")).unwrap();
        fs::write(root.join("index.html"), "").unwrap();
        (dir, root)
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = tree();
        let (watch, pattern) = resolve_watch_path(&root, "scss/**/*.scss").unwrap();

        assert_eq!(watch, root.join("scss"));
        assert_eq!(pattern.as_str(), root.join("scss/**/*.scss"));
        assert!(pattern.matches_path_with(root.join("scss/parts/_a.scss").as_std_path(), MATCH));
        assert!(!pattern.matches_path_with(root.join("js/a.js").as_std_path(), MATCH));
    }

    #[test]
    fn test_top_level_wildcard_does_not_descend() {
        let (_dir, root) = tree();
        let (watch, pattern) = resolve_watch_path(&root, "*.html").unwrap();

        assert_eq!(watch, root);
        assert!(pattern.matches_path_with(root.join("index.html").as_std_path(), MATCH));
        assert!(!pattern.matches_path_with(root.join("scss/x.html").as_std_path(), MATCH));
    }

    #[test]
    fn test_concrete_file() {
        let (_dir, root) = tree();
        let (watch, pattern) = resolve_watch_path(&root, "index.html").unwrap();

        assert_eq!(watch, root);
        assert_eq!(pattern.as_str(), root.join("index.html"));
    }

    #[test]
    fn test_missing_directory_watches_ancestor() {
        let (_dir, root) = tree();
        let (watch, pattern) = resolve_watch_path(&root, "svg/icons/*.svg").unwrap();

        assert_eq!(watch, root);
        assert_eq!(pattern.as_str(), root.join("svg/icons/*.svg"));
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    struct Counter {
        runs: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    fn counted(name: &'static str, delay: Duration) -> (Arc<Counter>, Task) {
        let counter = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let p = counter.clone();
        let task = Task::new(name, move || {
            let p = p.clone();
            async move {
                let now = p.running.fetch_add(1, Ordering::SeqCst) + 1;
                p.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                p.running.fetch_sub(1, Ordering::SeqCst);
                p.runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TaskError>(())
            }
        });

        (counter, task)
    }

    fn pattern(s: &str) -> Pattern {
        Pattern::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_change_only_triggers_its_binding() {
        let (styles, styles_task) = counted("styles", Duration::ZERO);
        let (scripts, scripts_task) = counted("scripts", Duration::ZERO);

        let dispatcher = Dispatcher::new(vec![
            (pattern("/src/scss/**/*.scss"), styles_task),
            (pattern("/src/js/**/*.js"), scripts_task),
        ]);

        let triggered = dispatcher.dispatch([Path::new("/src/scss/parts/_a.scss")]);
        assert_eq!(triggered, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(styles.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scripts.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_triggers_binding_once() {
        let (styles, task) = counted("styles", Duration::ZERO);
        let dispatcher = Dispatcher::new(vec![(pattern("/src/scss/*.scss"), task)]);

        let batch = [
            Path::new("/src/scss/a.scss"),
            Path::new("/src/scss/b.scss"),
            Path::new("/src/index.html"),
        ];
        assert_eq!(dispatcher.dispatch(batch), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(styles.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_triggers_during_run_are_coalesced() {
        let (styles, task) = counted("styles", Duration::from_millis(100));
        let dispatcher = Dispatcher::new(vec![(pattern("/src/scss/*.scss"), task)]);
        dispatcher.arm();
        let changed = [Path::new("/src/scss/a.scss")];

        dispatcher.dispatch(changed);
        // let the worker pick up the first trigger and start running
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(styles.running.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.state(), WatchState::Dispatching);

        for _ in 0..10 {
            dispatcher.dispatch(changed);
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(styles.runs.load(Ordering::SeqCst), 2);
        assert_eq!(styles.peak.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.state(), WatchState::Watching);
    }

    #[tokio::test]
    async fn test_bindings_of_one_step_share_a_worker() {
        let (images, task) = counted("images", Duration::from_millis(50));
        let dispatcher = Dispatcher::new(vec![
            (pattern("/src/img/*.png"), task.clone()),
            (pattern("/src/img/*.jpg"), task),
        ]);

        let batch = [Path::new("/src/img/a.png"), Path::new("/src/img/b.jpg")];
        assert_eq!(dispatcher.dispatch(batch), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(images.runs.load(Ordering::SeqCst), 1);
        assert_eq!(images.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_file_change_runs_only_its_step() {
        let (_dir, root) = tree();
        fs::create_dir_all(root.join("js")).unwrap();

        let (styles, styles_task) = counted("styles", Duration::ZERO);
        let (scripts, scripts_task) = counted("scripts", Duration::ZERO);
        let bindings = vec![
            ("scss/**/*.scss".to_string(), styles_task),
            ("js/*.js".to_string(), scripts_task),
        ];

        let watched = root.clone();
        let handle = tokio::spawn(async move { watch(&watched, bindings).await });

        // give the watcher time to register before touching anything
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(root.join("scss/parts/_a.scss"), "a { }").unwrap();

        for _ in 0..50 {
            if styles.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(!handle.is_finished());
        assert!(styles.runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(scripts.runs.load(Ordering::SeqCst), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (_, task) = counted("markup", Duration::ZERO);
        let dispatcher = Dispatcher::new(vec![(pattern("/src/*.html"), task)]);

        assert_eq!(dispatcher.state(), WatchState::Idle);
        dispatcher.arm();
        assert_eq!(dispatcher.state(), WatchState::Watching);
        dispatcher.stop();
        assert_eq!(dispatcher.state(), WatchState::Stopped);
        assert_eq!(dispatcher.dispatch([Path::new("/src/index.html")]), 0);
    }
}
