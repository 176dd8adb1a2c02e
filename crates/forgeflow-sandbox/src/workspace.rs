use async_trait::async_trait;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use forgeflow_utils::types::{FileAction, FileEdit, RepoRef};

use crate::command_spec::CommandSpec;
use crate::process::{BoundedRun, ProcessLimits, run_bounded};
use crate::SandboxError;

/// Directories never copied into a sandbox.
const COPY_SKIP: &[&str] = &[".git", "target", "node_modules"];

/// Provisions the reference checkout a sandbox starts from.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync + std::fmt::Debug {
    /// Create a fresh workspace under `parent`.
    async fn provision(
        &self,
        repo: &RepoRef,
        parent: &Utf8Path,
        limits: &ProcessLimits,
    ) -> Result<SandboxWorkspace, SandboxError>;
}

/// Shallow `git clone` of the base branch.
#[derive(Debug, Clone, Default)]
pub struct GitCloneProvider {
    secrets: Vec<(String, String)>,
}

impl GitCloneProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials exposed to git as environment variables during the clone.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Vec<(String, String)>) -> Self {
        self.secrets = secrets;
        self
    }
}

#[async_trait]
impl WorkspaceProvider for GitCloneProvider {
    async fn provision(
        &self,
        repo: &RepoRef,
        parent: &Utf8Path,
        limits: &ProcessLimits,
    ) -> Result<SandboxWorkspace, SandboxError> {
        let workspace = SandboxWorkspace::create(parent)?;
        let target = workspace.root().join("repo");

        let mut spec = CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--branch"])
            .arg(&repo.base_branch)
            .arg(&repo.clone_url)
            .arg(target.as_str())
            .cwd(workspace.root().as_std_path())
            .env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in &self.secrets {
            spec = spec.secret(key, value);
        }

        let BoundedRun {
            exit_code,
            timed_out,
            output,
            ..
        } = run_bounded(&spec, limits).await?;
        if timed_out || exit_code != Some(0) {
            let masker = forgeflow_redaction::SecretMasker::default()
                .with_literals(spec.secret_values());
            return Err(SandboxError::Provision(format!(
                "git clone of {} failed{}: {}",
                repo.full_name(),
                if timed_out { " (timed out)" } else { "" },
                masker.mask(output.trim())
            )));
        }

        Ok(workspace.with_checkout(target))
    }
}

/// Recursive copy of a local directory; used for local runs and tests.
#[derive(Debug, Clone)]
pub struct LocalCopyProvider {
    source: Utf8PathBuf,
}

impl LocalCopyProvider {
    #[must_use]
    pub fn new(source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl WorkspaceProvider for LocalCopyProvider {
    async fn provision(
        &self,
        _repo: &RepoRef,
        parent: &Utf8Path,
        _limits: &ProcessLimits,
    ) -> Result<SandboxWorkspace, SandboxError> {
        let workspace = SandboxWorkspace::create(parent)?;
        let target = workspace.root().join("repo");
        let source = self.source.clone();
        let dest = target.clone();
        tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| SandboxError::Provision(format!("copy task failed: {e}")))?
            .map_err(|e| SandboxError::Provision(format!("copy of {} failed: {e}", self.source)))?;
        Ok(workspace.with_checkout(target))
    }
}

fn copy_tree(from: &Utf8Path, to: &Utf8Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let file_type = entry.file_type()?;
        let src = from.join(name);
        let dst = to.join(name);
        if file_type.is_dir() {
            if !COPY_SKIP.contains(&name) {
                copy_tree(&src, &dst)?;
            }
        } else if file_type.is_file() {
            std::fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}

/// Ephemeral directory owned by one execution.
///
/// Removed by [`SandboxWorkspace::teardown`] or, failing that, on drop.
#[derive(Debug)]
pub struct SandboxWorkspace {
    dir: Option<TempDir>,
    root: Utf8PathBuf,
    checkout: Utf8PathBuf,
}

impl SandboxWorkspace {
    /// Create an empty workspace directory under `parent`.
    pub fn create(parent: &Utf8Path) -> Result<Self, SandboxError> {
        forgeflow_utils::paths::ensure_dir_all(parent)
            .map_err(|e| SandboxError::Provision(format!("cannot create {parent}: {e}")))?;
        let dir = tempfile::Builder::new()
            .prefix("sbx-")
            .tempdir_in(parent)
            .map_err(|e| SandboxError::Provision(format!("cannot create sandbox dir: {e}")))?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|p| SandboxError::Provision(format!("non UTF-8 sandbox path {}", p.display())))?;
        Ok(Self {
            dir: Some(dir),
            checkout: root.clone(),
            root,
        })
    }

    #[must_use]
    pub fn with_checkout(mut self, checkout: Utf8PathBuf) -> Self {
        self.checkout = checkout;
        self
    }

    /// The sandbox directory itself.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Where commands run and edits land.
    #[must_use]
    pub fn checkout(&self) -> &Utf8Path {
        &self.checkout
    }

    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.dir.is_none()
    }

    /// Apply edits in order. Paths must stay inside the checkout.
    pub fn apply_edits(&self, edits: &[FileEdit]) -> Result<(), SandboxError> {
        for edit in edits {
            let target = confined_path(&self.checkout, &edit.path)?;
            match edit.action {
                FileAction::Create | FileAction::Modify => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| SandboxError::io(&target, e))?;
                    }
                    let content = edit.content.as_deref().unwrap_or_default();
                    std::fs::write(&target, content).map_err(|e| SandboxError::io(&target, e))?;
                }
                FileAction::Delete => match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = %edit.path, "Delete of missing file ignored");
                    }
                    Err(e) => return Err(SandboxError::io(&target, e)),
                },
            }
        }
        Ok(())
    }

    /// Remove the workspace. Safe to call more than once.
    pub fn teardown(&mut self) -> Result<(), SandboxError> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(|e| SandboxError::io(&self.root, e)),
            None => Ok(()),
        }
    }
}

impl Drop for SandboxWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(path = %self.root, error = %e, "Sandbox teardown on drop failed");
        }
    }
}

/// Resolve `relative` under `root`, rejecting anything that could escape it.
pub fn confined_path(root: &Utf8Path, relative: &str) -> Result<Utf8PathBuf, SandboxError> {
    let reject = |reason: &str| SandboxError::InvalidEditPath {
        path: relative.to_string(),
        reason: reason.to_string(),
    };

    let path = Utf8Path::new(relative);
    if relative.is_empty() {
        return Err(reject("empty path"));
    }
    if path.is_absolute() || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(reject("absolute paths are not allowed"));
    }
    for component in path.components() {
        match component {
            Utf8Component::Normal(_) | Utf8Component::CurDir => {}
            Utf8Component::ParentDir => return Err(reject("'..' is not allowed")),
            Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(reject("absolute paths are not allowed"));
            }
        }
    }

    let joined = root.join(path);
    // Symlinks already in the checkout must not lead outside it.
    if let (Ok(canon_root), Some(parent)) = (root.canonicalize_utf8(), joined.parent()) {
        let mut existing = parent.to_path_buf();
        while !existing.exists() {
            match existing.parent() {
                Some(p) => existing = p.to_path_buf(),
                None => break,
            }
        }
        if let Ok(canon) = existing.canonicalize_utf8()
            && !canon.starts_with(&canon_root)
        {
            return Err(reject("path escapes the workspace through a symlink"));
        }
    }
    // Writes follow a symlinked file to wherever it points.
    if std::fs::symlink_metadata(&joined).is_ok_and(|meta| meta.file_type().is_symlink()) {
        return Err(reject("path is a symlink"));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    fn edit(path: &str, action: FileAction, content: Option<&str>) -> FileEdit {
        FileEdit {
            path: path.to_string(),
            action,
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn test_teardown_is_idempotent_and_removes_dir() {
        let (_temp, parent) = parent();
        let mut ws = SandboxWorkspace::create(&parent).unwrap();
        let root = ws.root().to_owned();
        assert!(root.is_dir());

        ws.teardown().unwrap();
        assert!(!root.exists());
        assert!(ws.is_torn_down());
        ws.teardown().unwrap();
    }

    #[test]
    fn test_drop_removes_dir() {
        let (_temp, parent) = parent();
        let ws = SandboxWorkspace::create(&parent).unwrap();
        let root = ws.root().to_owned();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn test_apply_edits() {
        let (_temp, parent) = parent();
        let ws = SandboxWorkspace::create(&parent).unwrap();
        std::fs::write(ws.checkout().join("old.txt"), "bye").unwrap();

        ws.apply_edits(&[
            edit("src/lib.rs", FileAction::Create, Some("pub fn f() {}\n")),
            edit("./README.md", FileAction::Modify, Some("# hi\n")),
            edit("old.txt", FileAction::Delete, None),
            edit("never-existed.txt", FileAction::Delete, None),
        ])
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(ws.checkout().join("src/lib.rs")).unwrap(),
            "pub fn f() {}\n"
        );
        assert!(ws.checkout().join("README.md").is_file());
        assert!(!ws.checkout().join("old.txt").exists());
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let (_temp, parent) = parent();
        let ws = SandboxWorkspace::create(&parent).unwrap();
        for bad in ["../outside.txt", "/etc/passwd", "a/../../b", ""] {
            let err = ws
                .apply_edits(&[edit(bad, FileAction::Create, Some("x"))])
                .unwrap_err();
            assert!(
                matches!(err, SandboxError::InvalidEditPath { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (_temp, parent) = parent();
        let outside = TempDir::new().unwrap();
        let ws = SandboxWorkspace::create(&parent).unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.checkout().join("link")).unwrap();

        let err = ws
            .apply_edits(&[edit("link/evil.txt", FileAction::Create, Some("x"))])
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidEditPath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_not_written_through() {
        let (_temp, parent) = parent();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("authorized_keys");
        std::fs::write(&target, "original\n").unwrap();
        let ws = SandboxWorkspace::create(&parent).unwrap();
        std::os::unix::fs::symlink(&target, ws.checkout().join("config.toml")).unwrap();

        let err = ws
            .apply_edits(&[edit("config.toml", FileAction::Modify, Some("pwned\n"))])
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidEditPath { ref reason, .. } if reason.contains("symlink")));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original\n");
    }

    #[tokio::test]
    async fn test_local_copy_skips_vcs_dirs() {
        let (_temp, parent) = parent();
        let source = TempDir::new().unwrap();
        let src = Utf8PathBuf::from_path_buf(source.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::write(src.join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(src.join("src")).unwrap();
        std::fs::write(src.join("src/main.rs"), "fn main() {}").unwrap();

        let repo = RepoRef {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            base_branch: "main".to_string(),
            clone_url: src.to_string(),
        };
        let ws = LocalCopyProvider::new(src)
            .provision(&repo, &parent, &ProcessLimits::default())
            .await
            .unwrap();
        assert!(ws.checkout().join("src/main.rs").is_file());
        assert!(!ws.checkout().join(".git").exists());
    }
}
