//! Running external commands (SSO CLI flows, MFA token helpers, post-login scripts).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &std::path::Path,
        args: &[String],
        timeout: std::time::Duration,
    ) -> crate::Result<CommandOutput>;

    async fn run_shell(
        &self,
        command_line: &str,
        timeout: std::time::Duration,
    ) -> crate::Result<CommandOutput> {
        self.run(
            std::path::Path::new("/bin/sh"),
            &["-c".to_owned(), command_line.to_owned()],
            timeout,
        )
        .await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Let the child use the terminal directly (browser-based SSO prompts print there).
    pub inherit_stderr: bool,
}

#[async_trait::async_trait]
impl CommandRunner for ShellRunner {
    #[tracing::instrument(skip(self))]
    async fn run(
        &self,
        program: &std::path::Path,
        args: &[String],
        timeout: std::time::Duration,
    ) -> crate::Result<CommandOutput> {
        let stderr = if self.inherit_stderr {
            std::process::Stdio::inherit()
        } else {
            std::process::Stdio::piped()
        };
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                crate::Error::UserError(format!("Failed to spawn {}: {e}", program.display()))
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(r) => r?,
            Err(_) => {
                tracing::warn!(
                    program = %program.display(),
                    timeout = ?timeout,
                    "command timed out"
                );
                return Err(crate::Error::UserError(format!(
                    "{} did not finish within {}s",
                    program.display(),
                    timeout.as_secs()
                )));
            }
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(program = %program.display(), code = ?result.code, "command finished");
        Ok(result)
    }
}

/// Expands a leading `~/` using `$HOME`.
pub fn expand_home(path: &str) -> std::path::PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => std::path::PathBuf::from(home).join(rest),
        _ => std::path::PathBuf::from(path),
    }
}
