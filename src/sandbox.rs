//! Isolated working directories for test applications.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::MockAgentError;

/// A builder for provisioning a [`Sandbox`].
///
/// # Example
///
/// ```no_run
/// # use mock_agent::SandboxBuilder;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sandbox = SandboxBuilder::new()
///     .package("express")
///     .fixture("fixtures/server.js")
///     .install_with("npm", ["install", "express"])
///     .create()
///     .await?;
///
/// // run the test application from sandbox.path() ...
///
/// sandbox.remove().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SandboxBuilder {
    packages: Vec<String>,
    fixtures: Vec<PathBuf>,
    install_command: Option<(String, Vec<String>)>,
}

impl SandboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dependency name, reported by [`Sandbox::packages`].
    #[must_use]
    pub fn package(mut self, name: impl Into<String>) -> Self {
        self.packages.push(name.into());
        self
    }

    /// Adds a fixture file to copy into the sandbox root.
    #[must_use]
    pub fn fixture(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixtures.push(path.into());
        self
    }

    /// Sets the command run inside the sandbox after fixtures are copied,
    /// typically a package-manager install.
    #[must_use]
    pub fn install_with<I>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.install_command = Some((
            program.into(),
            args.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Provisions the sandbox: creates the directory, copies fixtures, and
    /// runs the install command if one was set.
    ///
    /// # Errors
    ///
    /// Returns [`MockAgentError::InstallFailed`] with the captured stderr if
    /// the install command exits non-zero.
    pub async fn create(self) -> Result<Sandbox, MockAgentError> {
        let dir = tempfile::Builder::new()
            .prefix("mock-agent-sandbox-")
            .tempdir()?;

        for fixture in &self.fixtures {
            let file_name = fixture.file_name().ok_or_else(|| {
                MockAgentError::Sandbox(format!(
                    "fixture path has no file name: {}",
                    fixture.display()
                ))
            })?;
            tokio::fs::copy(fixture, dir.path().join(file_name)).await?;
        }

        if let Some((program, args)) = &self.install_command {
            tracing::debug!(program = %program, "running sandbox install command");
            let output = Command::new(program)
                .args(args)
                .current_dir(dir.path())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await?;
            if !output.status.success() {
                return Err(MockAgentError::InstallFailed {
                    status: output.status,
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        }

        Ok(Sandbox {
            dir,
            packages: self.packages,
        })
    }
}

/// A provisioned working directory plus its recorded dependencies.
///
/// Owned by the test suite. Call [`Sandbox::remove`] on every exit path; the
/// backing directory is also cleaned up on drop as a last resort.
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
    packages: Vec<String>,
}

impl Sandbox {
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::new()
    }

    /// The sandbox root directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The dependency names recorded while building the sandbox.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Removes the sandbox directory and everything in it.
    pub async fn remove(self) -> Result<(), MockAgentError> {
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close()).await??;
        Ok(())
    }
}
