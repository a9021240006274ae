use std::path::{Component, Path, PathBuf};

use crate::error::GuardrailError;

/// Argument keys that name a path and are resolved against the sandbox root
/// before a command is dispatched.
pub const PATHLIKE_ARGS: [&str; 4] = ["file", "filename", "directory", "clone_path"];

/// Sandbox root for everything an agent touches on disk.
///
/// Logical paths from the model are resolved lexically against the root and,
/// when `restrict` is on, rejected if they escape it. Writes additionally go
/// through [`WorkspaceGuard::is_write_allowed`], which resolves symlinks.
pub struct WorkspaceGuard {
    /// Canonical (absolute, symlinks resolved) workspace root.
    canonical_root: PathBuf,
    restrict: bool,
}

impl WorkspaceGuard {
    /// Create a new guard for the given workspace path.
    /// Creates the directory if it doesn't exist and resolves to canonical path.
    pub fn new(workspace_path: &Path) -> std::io::Result<Self> {
        Self::with_restriction(workspace_path, true)
    }

    /// Like [`WorkspaceGuard::new`] but lets absolute paths outside the root
    /// through when `restrict` is false.
    pub fn with_restriction(workspace_path: &Path, restrict: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(workspace_path)?;
        let canonical_root = std::fs::canonicalize(workspace_path)?;
        Ok(Self {
            canonical_root,
            restrict,
        })
    }

    /// Map a logical path argument to an absolute path under the root.
    ///
    /// Relative paths are joined to the root; `..` and `.` components are
    /// folded lexically so that `a/../../x` cannot slip out.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf, GuardrailError> {
        let candidate = Path::new(logical);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.canonical_root.join(candidate)
        };
        let normalized = normalize(&joined);

        if self.restrict && !normalized.starts_with(&self.canonical_root) {
            return Err(GuardrailError::PathOutsideWorkspace {
                path: PathBuf::from(logical),
                workspace: self.canonical_root.clone(),
            });
        }
        Ok(normalized)
    }

    /// Rewrite the path-like entries of a command's arguments in place.
    ///
    /// A `directory` of `""` or `"/"` means the workspace root itself.
    pub fn resolve_path_args(
        &self,
        args: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), GuardrailError> {
        for key in PATHLIKE_ARGS {
            let Some(value) = args.get(key).and_then(|v| v.as_str()) else {
                continue;
            };
            let resolved = if key == "directory" && (value.is_empty() || value == "/") {
                self.canonical_root.clone()
            } else {
                self.resolve(value)?
            };
            args.insert(
                key.to_string(),
                serde_json::Value::String(resolved.display().to_string()),
            );
        }
        Ok(())
    }

    /// Check if a write to the given path is allowed.
    /// Resolves symlinks to prevent escape via symlink traversal.
    pub fn is_write_allowed(&self, target: &Path) -> Result<bool, std::io::Error> {
        let canonical = if target.exists() {
            std::fs::canonicalize(target)?
        } else {
            let parent = target.parent().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
            })?;
            if parent.exists() {
                let canonical_parent = std::fs::canonicalize(parent)?;
                canonical_parent.join(target.file_name().unwrap_or_default())
            } else {
                return Ok(false);
            }
        };

        Ok(canonical.starts_with(&self.canonical_root))
    }

    /// Get the canonical workspace root path.
    pub fn canonical_root(&self) -> &Path {
        &self.canonical_root
    }
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
