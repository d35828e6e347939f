//! Task graph: named asynchronous tasks composed with [`sequence`] and
//! [`parallel`].
//!
//! A [`Node`] is a tree. Leaves are [`Task`]s or [`Node::Named`] references
//! to other registered nodes; inner nodes fix their composition mode when
//! they are built. References are replaced with their targets by the
//! [`Registry`](crate::Registry) before a tree is run, so the runner itself
//! never looks anything up.
//!
//! ## Failure policy
//!
//! * `sequence` awaits members one by one and stops at the first failure;
//!   later members never start.
//! * `parallel` spawns every member before awaiting any of them. The first
//!   failure (in order of completion) is logged and returned as soon as it
//!   arrives. The other members are not cancelled: they keep running in the
//!   background and their own failures are logged. A panicking member counts
//!   as a failure.

use std::any::Any;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::error::TaskError;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

type Action = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A named, zero-argument asynchronous action. Cloning is cheap.
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    action: Action,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || Box::pin(action())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self) -> Result<(), TaskError> {
        let span = tracing::debug_span!("task", name = %self.name);
        (self.action)().instrument(span).await
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Task(Task),
    /// Reference to another registered node.
    Named(String),
    Sequence(Vec<Node>),
    Parallel(Vec<Node>),
}

/// Runs `nodes` one after another.
pub fn sequence(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Sequence(nodes.into_iter().collect())
}

/// Runs `nodes` concurrently.
pub fn parallel(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Parallel(nodes.into_iter().collect())
}

impl Node {
    pub fn task<F, Fut>(name: impl Into<Arc<str>>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Node::Task(Task::new(name, action))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Node::Named(name.into())
    }

    /// Names of every node this one refers to, directly or through nesting.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Node::Task(_) => Vec::new(),
            Node::Named(name) => vec![name.as_str()],
            Node::Sequence(nodes) | Node::Parallel(nodes) => {
                nodes.iter().flat_map(Node::references).collect()
            }
        }
    }

    /// Short human readable outline, e.g. `series(clean, parallel(a, b))`.
    pub fn outline(&self) -> String {
        let join = |nodes: &[Node]| {
            nodes
                .iter()
                .map(Node::outline)
                .collect::<Vec<_>>()
                .join(", ")
        };

        match self {
            Node::Task(task) => task.name().to_owned(),
            Node::Named(name) => name.clone(),
            Node::Sequence(nodes) => format!("series({})", join(nodes)),
            Node::Parallel(nodes) => format!("parallel({})", join(nodes)),
        }
    }

    /// Runs the tree to completion.
    pub fn run(self) -> TaskFuture {
        Box::pin(async move {
            match self {
                Node::Task(task) => task.run().await,
                Node::Named(name) => Err(TaskError::Unknown(name)),
                Node::Sequence(nodes) => {
                    for node in nodes {
                        node.run().await?;
                    }
                    Ok(())
                }
                Node::Parallel(nodes) => run_parallel(nodes).await,
            }
        })
    }
}

async fn run_parallel(nodes: Vec<Node>) -> Result<(), TaskError> {
    let mut set = JoinSet::new();

    for node in nodes {
        let label = node.outline();
        let member = tokio::spawn(node.run());

        set.spawn(async move {
            match member.await {
                Ok(result) => result,
                Err(e) => Err(panicked(label, e)),
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = flatten(joined) {
            tracing::error!("{e}");

            // the rest keep running; their failures are only logged
            if !set.is_empty() {
                tokio::spawn(async move {
                    while let Some(joined) = set.join_next().await {
                        if let Err(e) = flatten(joined) {
                            tracing::error!("{e}");
                        }
                    }
                });
            }

            return Err(e);
        }
    }

    Ok(())
}

fn flatten(joined: Result<Result<(), TaskError>, JoinError>) -> Result<(), TaskError> {
    joined.unwrap_or_else(|e| Err(panicked(String::from("parallel"), e)))
}

/// Converts a join failure of a spawned node into a task error.
pub(crate) fn panicked(label: String, error: JoinError) -> TaskError {
    let message = match error.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(error) => error.to_string(),
    };

    TaskError::Panicked(label, message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Barrier;

    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, name: &'static str) -> Node {
        let log = log.clone();
        Node::task(name, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    fn fail(name: &'static str) -> Node {
        Node::task(name, move || async move {
            Err(TaskError::failed(name, anyhow::anyhow!("broken")))
        })
    }

    fn explode() -> Result<(), TaskError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order() {
        let log = Log::default();
        let tree = sequence([record(&log, "a"), record(&log, "b"), record(&log, "c")]);

        tree.run().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let log = Log::default();
        let tree = sequence([record(&log, "a"), fail("b"), record(&log, "c")]);

        let err = tree.run().await.unwrap_err();
        assert_eq!(err.task(), "b");
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_parallel_starts_every_member() {
        let barrier = Arc::new(Barrier::new(3));
        let member = |name: &'static str| {
            let barrier = barrier.clone();
            Node::task(name, move || {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            })
        };

        let tree = parallel([member("a"), member("b"), member("c")]);
        tokio::time::timeout(Duration::from_secs(5), tree.run())
            .await
            .expect("members should not wait on each other")
            .unwrap();
    }

    #[tokio::test]
    async fn test_parallel_reports_first_failure_and_keeps_siblings() {
        let done = Arc::new(AtomicUsize::new(0));
        let slow = |name: &'static str, ms: u64| {
            let done = done.clone();
            Node::task(name, move || {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let late_failure = Node::task("late", || async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Err(TaskError::failed("late", anyhow::anyhow!("also broken")))
        });

        let tree = parallel([slow("x", 30), fail("early"), late_failure, slow("y", 90)]);
        let err = tree.run().await.unwrap_err();

        assert_eq!(err.task(), "early");
        assert_eq!(done.load(Ordering::SeqCst), 0);

        // nothing was cancelled
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_parallel_failure_next_to_endless_member() {
        let endless = Node::task("serve", || std::future::pending::<Result<(), TaskError>>());
        let tree = parallel([fail("watch"), endless]);

        let err = tokio::time::timeout(Duration::from_secs(2), tree.run())
            .await
            .expect("failure should be returned without waiting for the endless member")
            .unwrap_err();
        assert_eq!(err.task(), "watch");
    }

    #[tokio::test]
    async fn test_parallel_reports_panics() {
        let tree = parallel([Node::task("p", || async { explode() })]);
        let err = tree.run().await.unwrap_err();

        let TaskError::Panicked(name, message) = err else {
            panic!("expected a panic report");
        };
        assert_eq!(name, "p");
        assert_eq!(message, "boom");
    }

    #[tokio::test]
    async fn test_unresolved_reference() {
        let err = sequence([Node::named("ghost")]).run().await.unwrap_err();
        assert!(matches!(err, TaskError::Unknown(name) if name == "ghost"));
    }

    #[test]
    fn test_outline_and_references() {
        let log = Log::default();
        let tree = sequence([
            Node::named("clean"),
            parallel([record(&log, "styles"), Node::named("scripts")]),
        ]);

        assert_eq!(tree.outline(), "series(clean, parallel(styles, scripts))");
        assert_eq!(tree.references(), vec!["clean", "scripts"]);
    }
}
