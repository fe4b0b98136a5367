//! Container image builder.

use gradeflow_core::{GradeflowError, ImageRef, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::runner::{CommandExecutor, CommandSpec};

/// Image label carrying the build-context digest.
pub const CONTEXT_DIGEST_LABEL: &str = "gradeflow.context-digest";

/// A successfully built image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub image: ImageRef,
    pub context_digest: String,
    pub duration_ms: u64,
}

/// SHA-256 over every file in the build context.
///
/// Files are visited in sorted relative-path order and each contributes its
/// path and contents, so the digest is stable across machines and changes
/// when a file is renamed. Symlinks are never followed: a link contributes
/// its target path instead of contents.
pub fn context_digest(context: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(context, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for (path, is_symlink) in &files {
        let relative = path.strip_prefix(context).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        if *is_symlink {
            hasher.update(b"symlink:");
            hasher.update(std::fs::read_link(path)?.to_string_lossy().as_bytes());
        } else {
            hasher.update(std::fs::read(path)?);
        }
        hasher.update(b"\0");
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(dir: &Path, files: &mut Vec<(PathBuf, bool)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else {
            files.push((entry.path(), file_type.is_symlink()));
        }
    }
    Ok(())
}

/// Builds images with `docker build`.
pub struct ImageBuilder {
    executor: Arc<dyn CommandExecutor>,
    timeout_secs: u64,
}

impl ImageBuilder {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// `docker build -t {uri} --label gradeflow.context-digest={digest} {context}`
    pub fn build_command(&self, context: &Path, image: &ImageRef, digest: &str) -> CommandSpec {
        CommandSpec::new(
            "docker",
            [
                "build".to_string(),
                "-t".to_string(),
                image.uri(),
                "--label".to_string(),
                format!("{CONTEXT_DIGEST_LABEL}={digest}"),
                context.to_string_lossy().to_string(),
            ],
        )
        .with_timeout(self.timeout_secs)
    }

    /// Build `image` from `context`. Any failure is a [`GradeflowError::Build`].
    pub async fn build(&self, context: &Path, image: &ImageRef) -> Result<BuiltImage> {
        if !context.is_dir() {
            return Err(GradeflowError::Build(format!(
                "build context {:?} is not a directory",
                context
            )));
        }

        let digest = context_digest(context).map_err(|e| {
            GradeflowError::Build(format!("failed to hash build context {:?}: {e}", context))
        })?;
        debug!(context = ?context, digest = %digest, "Hashed build context");

        let spec = self.build_command(context, image, &digest);
        info!(image = %image, "Building image");

        let output = self
            .executor
            .execute(&spec)
            .await
            .map_err(|e| GradeflowError::Build(e.to_string()))?;

        if !output.success() {
            return Err(GradeflowError::Build(format!(
                "docker build for {} failed with {}",
                image,
                output.failure_summary()
            )));
        }

        Ok(BuiltImage {
            image: image.clone(),
            context_digest: digest,
            duration_ms: output.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedExecutor;
    use gradeflow_core::FunctionName;

    fn image() -> ImageRef {
        ImageRef::new(
            "reg.example.com",
            "functions",
            &FunctionName::parse("proof-eval-v1").unwrap(),
        )
    }

    fn context_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_context_digest_deterministic() {
        let a = context_with(&[("requirements.txt", "openai\n"), ("app/evaluation.py", "x = 1")]);
        let b = context_with(&[("app/evaluation.py", "x = 1"), ("requirements.txt", "openai\n")]);
        let digest_a = context_digest(a.path()).unwrap();
        assert_eq!(digest_a.len(), 64);
        assert_eq!(digest_a, context_digest(b.path()).unwrap());
    }

    #[test]
    fn test_context_digest_changes_with_content_and_name() {
        let base = context_with(&[("evaluation.py", "x = 1")]);
        let edited = context_with(&[("evaluation.py", "x = 2")]);
        let renamed = context_with(&[("preview.py", "x = 1")]);
        let digest = context_digest(base.path()).unwrap();
        assert_ne!(digest, context_digest(edited.path()).unwrap());
        assert_ne!(digest, context_digest(renamed.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_context_digest_does_not_follow_symlinks() {
        let dir = context_with(&[("app/evaluation.py", "x = 1")]);
        // Directory link back to the context root: following it never ends.
        std::os::unix::fs::symlink(dir.path(), dir.path().join("app/loop")).unwrap();
        std::os::unix::fs::symlink("evaluation.py", dir.path().join("app/alias.py")).unwrap();

        let digest = context_digest(dir.path()).unwrap();
        assert_eq!(digest, context_digest(dir.path()).unwrap());

        std::fs::remove_file(dir.path().join("app/alias.py")).unwrap();
        std::os::unix::fs::symlink("other.py", dir.path().join("app/alias.py")).unwrap();
        assert_ne!(digest, context_digest(dir.path()).unwrap());
    }

    #[test]
    fn test_build_command_shape() {
        let builder = ImageBuilder::new(Arc::new(ScriptedExecutor::new())).with_timeout(900);
        let spec = builder.build_command(Path::new("app"), &image(), "abc");
        assert_eq!(
            spec.command_line(),
            "docker build -t reg.example.com/functions:proof-eval-v1 --label gradeflow.context-digest=abc app"
        );
        assert_eq!(spec.timeout_secs, 900);
    }

    #[tokio::test]
    async fn test_build_success_runs_docker_once() {
        let ctx = context_with(&[("Dockerfile", "FROM python:3.11")]);
        let executor = Arc::new(ScriptedExecutor::new());
        let builder = ImageBuilder::new(executor.clone());

        let built = builder.build(ctx.path(), &image()).await.expect("build");
        assert_eq!(built.image, image());
        assert_eq!(built.context_digest, context_digest(ctx.path()).unwrap());
        assert_eq!(executor.count_matching("docker build"), 1);
    }

    #[tokio::test]
    async fn test_build_failure_is_build_error() {
        let ctx = context_with(&[("Dockerfile", "FROM python:3.11")]);
        let executor = Arc::new(
            ScriptedExecutor::new().fail_when("docker build", 1, "ERROR: pip install failed"),
        );
        let builder = ImageBuilder::new(executor);

        let err = builder.build(ctx.path(), &image()).await.unwrap_err();
        assert_eq!(err.class(), "build");
        assert!(err.to_string().contains("pip install failed"));
    }

    #[tokio::test]
    async fn test_missing_context_never_invokes_docker() {
        let executor = Arc::new(ScriptedExecutor::new());
        let builder = ImageBuilder::new(executor.clone());

        let err = builder
            .build(Path::new("/definitely/not/here"), &image())
            .await
            .unwrap_err();
        assert_eq!(err.class(), "build");
        assert!(executor.calls().is_empty());
    }
}
