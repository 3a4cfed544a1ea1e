//! The textual tool contract consumed by the orchestration layer.
//!
//! Each operation has a structured form returning `Result<_, Rejection>` and a
//! textual form returning the string an agent sees. Text results never fail:
//! a rejection becomes its message ("BLOCKED: ...", "... already exists ...").

use crate::activity::{ActivityEvent, ActivitySink, TracingSink};
use crate::args::{ReadRequest, WriteRequest};
use crate::boundary::{BoundaryEnforcer, ValidatedPath};
use crate::error::{Operation, Rejection};
use crate::salvage::extract_code_blocks;
use std::{io, path::PathBuf, sync::Arc};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

/// Gateway file operations confined to one workspace root.
#[derive(Clone)]
pub struct WorkspaceTools {
    enforcer: BoundaryEnforcer,
    sink: Arc<dyn ActivitySink>,
}

impl WorkspaceTools {
    pub fn new(enforcer: BoundaryEnforcer, sink: Arc<dyn ActivitySink>) -> Self {
        Self { enforcer, sink }
    }

    /// Tools that report activity through `tracing`.
    pub fn with_tracing(enforcer: BoundaryEnforcer) -> Self {
        Self::new(enforcer, Arc::new(TracingSink))
    }

    pub fn enforcer(&self) -> &BoundaryEnforcer {
        &self.enforcer
    }

    /// Write a file and describe the outcome.
    pub async fn write(&self, request: &WriteRequest) -> String {
        match self
            .write_file(
                &request.filename,
                &request.content,
                request.subdirectory(),
                request.overwrite.get(),
            )
            .await
        {
            Ok(path) => format!("Content successfully written to {}", path),
            Err(rejection) => rejection.to_string(),
        }
    }

    pub async fn write_file(
        &self,
        filename: &str,
        content: &str,
        subdirectory: Option<&str>,
        overwrite: bool,
    ) -> Result<ValidatedPath, Rejection> {
        let result = async {
            let path = self
                .enforcer
                .resolve_for_write(filename, subdirectory, overwrite)
                .await?;
            if overwrite {
                fs::write(path.as_path(), content)
                    .await
                    .map_err(|e| Rejection::io(Operation::Write, path.as_path(), e))?;
            } else {
                create_new(path.as_path(), content).await?;
            }
            Ok::<_, Rejection>(path)
        }
        .await;

        match &result {
            Ok(path) => self.sink.record(ActivityEvent::FileWritten {
                path: path.as_path().to_path_buf(),
                bytes: content.len(),
            }),
            Err(rejection) => self.report(Operation::Write, rejection),
        }
        result
    }

    /// Read a file and return its content, or describe why not.
    pub async fn read(&self, request: &ReadRequest) -> String {
        match self.read_file(&request.path).await {
            Ok((_, content)) => content,
            Err(rejection) => rejection.to_string(),
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<(ValidatedPath, String), Rejection> {
        let result = async {
            let path = self.enforcer.resolve_for_read(path).await?;
            let content = fs::read_to_string(path.as_path())
                .await
                .map_err(|e| Rejection::io(Operation::Read, path.as_path(), e))?;
            Ok::<_, Rejection>((path, content))
        }
        .await;

        match &result {
            Ok((path, content)) => self.sink.record(ActivityEvent::FileRead {
                path: path.as_path().to_path_buf(),
                bytes: content.len(),
            }),
            Err(rejection) => self.report(Operation::Read, rejection),
        }
        result
    }

    /// Files directly under the workspace (or a subdirectory), one per line.
    pub async fn list(&self, subdirectory: Option<&str>) -> String {
        match self.list_files(subdirectory).await {
            Ok(names) if names.is_empty() => "(empty)".to_string(),
            Ok(names) => names.join("\n"),
            Err(rejection) => rejection.to_string(),
        }
    }

    /// Sorted names of the regular files in a workspace directory.
    pub async fn list_files(&self, subdirectory: Option<&str>) -> Result<Vec<String>, Rejection> {
        let result = async {
            let dir = self.enforcer.resolve_directory(subdirectory).await?;
            let mut entries = fs::read_dir(dir.as_path())
                .await
                .map_err(|e| Rejection::io(Operation::List, dir.as_path(), e))?;

            let mut names = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Rejection::io(Operation::List, dir.as_path(), e))?
            {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                if is_file {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok::<_, Rejection>(names)
        }
        .await;

        if let Err(rejection) = &result {
            self.report(Operation::List, rejection);
        }
        result
    }

    /// Delete a file and describe the outcome.
    pub async fn delete(&self, path: &str) -> String {
        match self.delete_file(path).await {
            Ok(path) => format!("Deleted {}", path),
            Err(rejection) => rejection.to_string(),
        }
    }

    pub async fn delete_file(&self, path: &str) -> Result<ValidatedPath, Rejection> {
        let result = async {
            let path = self.enforcer.resolve_for_delete(path).await?;
            fs::remove_file(path.as_path())
                .await
                .map_err(|e| Rejection::io(Operation::Delete, path.as_path(), e))?;
            Ok::<_, Rejection>(path)
        }
        .await;

        match &result {
            Ok(path) => self.sink.record(ActivityEvent::FileDeleted {
                path: path.as_path().to_path_buf(),
            }),
            Err(rejection) => self.report(Operation::Delete, rejection),
        }
        result
    }

    /// Save the code blocks an agent pasted into `text`.
    ///
    /// Returns the workspace-relative names of the files written. A block is
    /// skipped when the file already exists, is non-empty and is at least as
    /// long as the block.
    pub async fn salvage(&self, text: &str) -> Vec<String> {
        let mut saved = Vec::new();
        let mut saved_paths: Vec<PathBuf> = Vec::new();

        for block in extract_code_blocks(text) {
            let path = match self
                .enforcer
                .resolve_for_write(&block.filename, None, true)
                .await
            {
                Ok(path) => path,
                Err(rejection) => {
                    self.report(Operation::Write, &rejection);
                    continue;
                }
            };

            if let Ok(metadata) = fs::metadata(path.as_path()).await {
                let existing = metadata.len();
                if existing > 0 && existing >= block.content.len() as u64 {
                    debug!(path = %path, existing, "Existing file is at least as large, not salvaging");
                    continue;
                }
            }

            match fs::write(path.as_path(), &block.content).await {
                Ok(()) => {
                    info!(path = %path, language = %block.language, "Salvaged code block");
                    saved_paths.push(path.into_path_buf());
                    saved.push(block.filename);
                }
                Err(e) => {
                    let rejection = Rejection::io(Operation::Write, path.as_path(), e);
                    self.report(Operation::Write, &rejection);
                }
            }
        }

        if !saved_paths.is_empty() {
            self.sink
                .record(ActivityEvent::Salvaged { files: saved_paths });
        }
        saved
    }

    fn report(&self, operation: Operation, rejection: &Rejection) {
        let event = match rejection {
            Rejection::OutsideWorkspace { attempted, root } => ActivityEvent::Blocked {
                attempted: attempted.clone(),
                root: root.clone(),
                operation,
            },
            Rejection::AlreadyExists { path } => ActivityEvent::AlreadyExists { path: path.clone() },
            Rejection::NotFound { path } => ActivityEvent::NotFound { path: path.clone() },
            Rejection::NotAFile { .. } | Rejection::Io { .. } => ActivityEvent::Failed {
                operation,
                error: rejection.to_string(),
            },
        };
        self.sink.record(event);
    }
}

impl std::fmt::Debug for WorkspaceTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceTools")
            .field("root", &self.enforcer.root())
            .finish()
    }
}

/// Write `content` to a file that must not exist yet.
///
/// The existence check in the enforcer can race a concurrent writer; the
/// exclusive create here is what decides the winner.
async fn create_new(path: &std::path::Path, content: &str) -> Result<(), Rejection> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Rejection::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => Rejection::io(Operation::Write, path, e),
        })?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| Rejection::io(Operation::Write, path, e))?;
    file.flush()
        .await
        .map_err(|e| Rejection::io(Operation::Write, path, e))?;
    Ok(())
}
