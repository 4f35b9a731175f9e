use std::path::PathBuf;

/// Errors that can occur when using the log shelf.
///
/// None of these ever reach a caller of [`LogShelf::append`](crate::LogShelf::append);
/// background passes report them through `tracing` and carry on.
#[derive(Debug, thiserror::Error)]
pub enum LogShelfError {
    #[error("Failed to create directory '{0}': {1}")]
    CreateDirectoryFailed(PathBuf, String),
    #[error("Failed to create file '{0}': {1}")]
    CreateFileFailed(PathBuf, String),
    #[error("Failed to rename file from '{from}' to '{to}': {error}")]
    RenameFileError { from: PathBuf, to: PathBuf, error: String },
    #[error("Failed to compress '{from}' into '{to}': {error}")]
    CompressFailed { from: PathBuf, to: PathBuf, error: String },
    #[error("Failed to remove archive directory '{0}': {1}")]
    RemoveDirectoryFailed(PathBuf, String),
    #[error("Failed to set file permissions for '{path}': {error}")]
    SetFilePermissionsError { path: PathBuf, error: String },
    #[error("Failed to spawn background worker '{0}': {1}")]
    SpawnWorkerFailed(&'static str, String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("File IO error: {0}")]
    FileIOError(#[from] std::io::Error),
}
