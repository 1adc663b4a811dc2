use std::fmt::Display;
#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// What went wrong while compiling a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A source file could not be parsed.
    Syntax,
    /// An import or template could not be located.
    ImportResolution,
    /// Anything else, e.g. a minifier or printer failure.
    Internal,
}

impl Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileErrorKind::Syntax => write!(f, "syntax error"),
            CompileErrorKind::ImportResolution => write!(f, "unresolved import"),
            CompileErrorKind::Internal => write!(f, "internal error"),
        }
    }
}

/// A compile failure tagged with the offending file.
#[derive(Debug, Clone, Error)]
#[error("{kind} in '{file}': {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub file: Utf8PathBuf,
    pub message: String,
}

impl CompileError {
    pub fn syntax(file: impl AsRef<Utf8Path>, message: impl Display) -> Self {
        Self::new(CompileErrorKind::Syntax, file, message)
    }

    pub fn resolution(file: impl AsRef<Utf8Path>, message: impl Display) -> Self {
        Self::new(CompileErrorKind::ImportResolution, file, message)
    }

    pub fn internal(file: impl AsRef<Utf8Path>, message: impl Display) -> Self {
        Self::new(CompileErrorKind::Internal, file, message)
    }

    fn new(kind: CompileErrorKind, file: impl AsRef<Utf8Path>, message: impl Display) -> Self {
        Self {
            kind,
            file: file.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    PermissionDenied,
    NotFound,
    Other,
}

impl From<std::io::ErrorKind> for IoErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => IoErrorKind::NotFound,
            _ => IoErrorKind::Other,
        }
    }
}

/// A filesystem failure in the output tree.
#[derive(Debug, Error)]
#[error("I/O error at '{path}': {source}")]
pub struct IoError {
    pub kind: IoErrorKind,
    pub path: Utf8PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl IoError {
    pub fn new(path: impl AsRef<Utf8Path>, source: std::io::Error) -> Self {
        Self {
            kind: source.kind().into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Extension used to tag bare `std::io` results with the path they touched.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: impl AsRef<Utf8Path>) -> Result<T, IoError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Utf8Path>) -> Result<T, IoError> {
        self.map_err(|e| IoError::new(path, e))
    }
}

#[derive(Debug, Error)]
pub enum TaskCause {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("no such task")]
    UnknownTask,

    #[error("task declared twice")]
    Duplicate,
}

#[derive(Debug, Error)]
#[error("Task '{task}': {cause}")]
pub struct TaskError {
    pub task: String,
    #[source]
    pub cause: TaskCause,
}

impl TaskError {
    pub fn new(task: impl Into<String>, cause: impl Into<TaskCause>) -> Self {
        Self {
            task: task.into(),
            cause: cause.into(),
        }
    }

    /// Compile failures leave the previous artifact in place and are safe
    /// to retry on the next change.
    pub fn is_compile(&self) -> bool {
        matches!(self.cause, TaskCause::Compile(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Unrecognized build mode '{0}', expected 'development' or 'production'")]
    Mode(String),

    #[error("Couldn't resolve project root '{0}'.\n{1}")]
    Root(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("Couldn't resolve watch path '{0}'.\n{1}")]
    Resolve(String, anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TsumugiError {
    #[error("Error while loading configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while building assets.\n{0}")]
    Task(#[from] TaskError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}
