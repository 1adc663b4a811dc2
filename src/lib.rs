#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod compiler;
pub mod config;
mod core;
pub mod engine;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod server;
mod utils;
pub mod watch;

pub use crate::compiler::{AssetCompiler, AssetKind, Pipeline};
pub use crate::config::{Config, Settings, SourceSet};
pub use crate::core::{Artifact, BuildMode};
pub use crate::engine::{Diagnostics, Task, TaskGraph};
pub use crate::error::*;
pub use crate::output::{OutputWriter, clean};
pub use crate::pipeline::{Session, build};
#[cfg(feature = "live")]
pub use crate::pipeline::dev;
pub use crate::watch::{BindingState, WatchBinding, WatchOrchestrator};
