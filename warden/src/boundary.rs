//! Boundary enforcement for workspace file operations.
//!
//! Maps caller-supplied, untrusted path fragments to absolute paths that are
//! guaranteed to lie inside the workspace root, or rejects them.
//!
//! ## Resolution
//!
//! 1. Backslashes become forward slashes.
//! 2. Leading slashes and drive-letter prefixes (`C:`) are stripped, so every
//!    fragment is relative no matter what it claims to be.
//! 3. The fragment is joined under the root, or under `root/subdirectory`.
//! 4. The joined path is normalized lexically and then canonicalized. Missing
//!    trailing components are allowed (writes create them); every component
//!    that exists is resolved through the filesystem, symlinks included.
//! 5. The canonical path must be the root itself or lie under it
//!    component-wise, so `/a/workspace2` never passes for `/a/workspace`.
//!
//! ## Security
//!
//! The containment check in step 5 is the only security-critical invariant.
//! Callers must perform their I/O on the returned [`ValidatedPath`], never on
//! the raw fragment.

use crate::error::{Operation, Rejection};
use anyhow::{Context, Result, anyhow};
use std::{
    fmt,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};

/// An absolute, canonical path inside the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ValidatedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Resolves untrusted fragments against one workspace root.
///
/// Stateless apart from the root; cloning is cheap and no locking is needed.
#[derive(Debug, Clone)]
pub struct BoundaryEnforcer {
    root: PathBuf,
}

impl BoundaryEnforcer {
    /// Canonicalize `root` and refuse the filesystem root or an empty path.
    ///
    /// The directory must already exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(anyhow!("An empty path is not a valid workspace root"));
        }

        let canonical = std::fs::canonicalize(root)
            .with_context(|| format!("Failed to canonicalize workspace root '{}'", root.display()))?;

        if canonical.parent().is_none() {
            return Err(anyhow!(
                "The filesystem root is not a valid workspace root (resolved from '{}')",
                root.display()
            ));
        }
        if !canonical.is_dir() {
            return Err(anyhow!(
                "Workspace root '{}' is not a directory",
                canonical.display()
            ));
        }

        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is the root or a descendant of it.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Resolve a write target, creating its missing parent directories.
    ///
    /// Rejects with `AlreadyExists` when the target exists and `overwrite` is
    /// false; the existing file is left untouched.
    pub async fn resolve_for_write(
        &self,
        filename: &str,
        subdirectory: Option<&str>,
        overwrite: bool,
    ) -> Result<ValidatedPath, Rejection> {
        let target = self
            .confine(filename, subdirectory, Operation::Write)
            .await?;
        if target == self.root {
            return Err(Rejection::NotAFile { path: target });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Rejection::io(Operation::Write, parent, e))?;

            // A directory swapped for a symlink between resolution and creation
            // must not carry the write outside.
            let parent_canonical = fs::canonicalize(parent)
                .await
                .map_err(|e| Rejection::io(Operation::Write, parent, e))?;
            if !self.contains(&parent_canonical) {
                warn!(path = %target.display(), root = %self.root.display(), "Parent escaped workspace after creation");
                return Err(Rejection::OutsideWorkspace {
                    attempted: target,
                    root: self.root.clone(),
                });
            }
        }

        match fs::symlink_metadata(&target).await {
            Ok(_) if !overwrite => return Err(Rejection::AlreadyExists { path: target }),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Rejection::io(Operation::Write, target, e)),
        }

        Ok(ValidatedPath(target))
    }

    /// Resolve an existing read target.
    pub async fn resolve_for_read(&self, path: &str) -> Result<ValidatedPath, Rejection> {
        let target = self.confine(path, None, Operation::Read).await?;
        self.require_existing(target, Operation::Read).await
    }

    /// Resolve an existing regular file for deletion. The root itself and
    /// directories are rejected with `NotAFile`.
    pub async fn resolve_for_delete(&self, path: &str) -> Result<ValidatedPath, Rejection> {
        let target = self.confine(path, None, Operation::Delete).await?;
        if target == self.root {
            return Err(Rejection::NotAFile { path: target });
        }

        let validated = self.require_existing(target, Operation::Delete).await?;
        let metadata = fs::metadata(validated.as_path())
            .await
            .map_err(|e| Rejection::io(Operation::Delete, validated.as_path(), e))?;
        if metadata.is_dir() {
            return Err(Rejection::NotAFile {
                path: validated.into_path_buf(),
            });
        }
        Ok(validated)
    }

    /// Resolve an existing directory for listing. `None` lists the root.
    pub async fn resolve_directory(
        &self,
        subdirectory: Option<&str>,
    ) -> Result<ValidatedPath, Rejection> {
        let target = self.confine("", subdirectory, Operation::List).await?;
        let validated = self.require_existing(target, Operation::List).await?;
        let metadata = fs::metadata(validated.as_path())
            .await
            .map_err(|e| Rejection::io(Operation::List, validated.as_path(), e))?;
        if !metadata.is_dir() {
            return Err(Rejection::NotFound {
                path: validated.into_path_buf(),
            });
        }
        Ok(validated)
    }

    async fn require_existing(
        &self,
        target: PathBuf,
        operation: Operation,
    ) -> Result<ValidatedPath, Rejection> {
        match fs::metadata(&target).await {
            Ok(_) => Ok(ValidatedPath(target)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Rejection::NotFound { path: target }),
            Err(e) => Err(Rejection::io(operation, target, e)),
        }
    }

    /// Steps 1-5: strip, join, canonicalize and check containment.
    async fn confine(
        &self,
        fragment: &str,
        subdirectory: Option<&str>,
        operation: Operation,
    ) -> Result<PathBuf, Rejection> {
        let mut joined = self.root.clone();
        if let Some(subdirectory) = effective_subdirectory(subdirectory) {
            joined.push(relative_fragment(subdirectory));
        }
        joined.push(relative_fragment(fragment));

        let normalized = normalize_path_lexically(&joined);
        let resolved = match canonicalize_allowing_missing(&normalized).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // An entry exists but cannot be resolved (dangling symlink).
                // Its target cannot be proven to stay inside the root.
                warn!(path = %normalized.display(), "Unresolvable entry in path, refusing");
                return Err(Rejection::OutsideWorkspace {
                    attempted: normalized,
                    root: self.root.clone(),
                });
            }
            Err(e) => return Err(Rejection::io(operation, normalized, e)),
        };

        if self.contains(&resolved) {
            debug!(operation = %operation, path = %resolved.display(), "Path confined to workspace");
            Ok(resolved)
        } else {
            warn!(
                operation = %operation,
                path = %resolved.display(),
                root = %self.root.display(),
                "Blocked path outside workspace"
            );
            Err(Rejection::OutsideWorkspace {
                attempted: resolved,
                root: self.root.clone(),
            })
        }
    }
}

/// The subdirectory to join under, or `None` for absent, empty, `"null"` or
/// `"none"` values.
pub fn effective_subdirectory(subdirectory: Option<&str>) -> Option<&str> {
    let subdirectory = subdirectory?.trim();
    if subdirectory.is_empty()
        || subdirectory.eq_ignore_ascii_case("null")
        || subdirectory.eq_ignore_ascii_case("none")
    {
        None
    } else {
        Some(subdirectory)
    }
}

/// Unify separators and strip every leading root marker (slashes, drive letters).
pub fn relative_fragment(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let mut rest = unified.as_str();
    loop {
        let stripped = strip_drive_letter(rest.trim_start_matches('/'));
        if stripped.len() == rest.len() {
            break;
        }
        rest = stripped;
    }
    rest.to_string()
}

fn strip_drive_letter(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &s[2..]
    } else {
        s
    }
}

/// Normalize a path lexically (without filesystem access).
fn normalize_path_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    stack.pop();
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}

/// Canonicalize the longest existing prefix of `path` and append the missing
/// tail. `path` must be absolute and free of `..` components.
async fn canonicalize_allowing_missing(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        match fs::symlink_metadata(existing).await {
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }

    let mut resolved = fs::canonicalize(existing).await?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
