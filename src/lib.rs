#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod asset;
mod config;
mod core;
mod error;
mod graph;
mod io;
pub mod logging;
mod paths;
mod registry;
#[cfg(feature = "server")]
mod serve;
pub mod step;
#[cfg(feature = "live")]
mod watch;

pub use crate::asset::{Asset, FileSet, Section, SourceMap};
pub use crate::config::{Config, DEFAULT_CONFIG_FILE, Outputs, Sources, Tools, WatchBinding};
pub use crate::core::Mode;
pub use crate::error::*;
pub use crate::graph::{Node, Task, TaskFuture, parallel, sequence};
pub use crate::io::clean;
pub use crate::registry::{Registry, STEPS, standard_steps};
#[cfg(feature = "server")]
pub use crate::serve::serve;
pub use crate::step::{Operation, Report, TransformStep};
#[cfg(feature = "live")]
pub use crate::watch::{Dispatcher, WatchState, resolve_watch_path, watch};
