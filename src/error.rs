use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Where inside a file an external collaborator reported a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

fn at_location(location: &Option<Location>) -> String {
    match location {
        Some(location) => format!(" at {location}"),
        None => String::new(),
    }
}

/// A single operation failed on a single file.
#[derive(Debug, Error)]
#[error("{operation} failed on '{file}'{}:\n{source}", at_location(.location))]
pub struct TransformError {
    pub operation: &'static str,
    pub file: Utf8PathBuf,
    pub location: Option<Location>,
    #[source]
    pub source: anyhow::Error,
}

impl TransformError {
    pub fn new(
        operation: &'static str,
        file: impl Into<Utf8PathBuf>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            operation,
            file: file.into(),
            location: None,
            source: source.into(),
        }
    }

    pub fn at(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't read or write files.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Step worker stopped unexpectedly.\n{0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors produced while removing the output directory.
#[derive(Debug, Error)]
#[error("Couldn't remove '{path}':\n{source}")]
pub struct CleanError {
    pub path: Utf8PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}' is not registered")]
    Unknown(String),

    #[error("Task '{0}' refers back to itself")]
    Cycle(String),

    #[error("Task '{name}':\n{source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task '{0}' panicked: {1}")]
    Panicked(String, String),
}

impl TaskError {
    pub fn failed(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Failed {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Name of the task this error originates from, if it has one.
    pub fn task(&self) -> &str {
        match self {
            TaskError::Unknown(name)
            | TaskError::Cycle(name)
            | TaskError::Failed { name, .. }
            | TaskError::Panicked(name, _) => name,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}':\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}':\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("Watch binding '{0}' targets unknown step '{1}'")]
    UnknownStep(String, String),

    #[error("Invalid browserslist query '{0}': {1}")]
    Browsers(String, String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch glob '{0}':\n{1}")]
    Resolve(String, anyhow::Error),
}

#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind the HTTP server:\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),
}
