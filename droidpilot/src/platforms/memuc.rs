//! MEmu control binary (`memuc`) backend for both the device shell and the
//! instance lifecycle.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::context::Resolution;
use crate::errors::AutomationError;
use crate::platforms::parse;
use crate::platforms::{DeviceShell, InstanceControl, InstanceStatus};

/// Runs `memuc` subcommands. Stateless apart from its configuration, so one
/// controller can be shared by every worker.
#[derive(Debug, Clone)]
pub struct MemucController {
    binary: PathBuf,
    command_timeout: Duration,
}

impl MemucController {
    pub fn new(binary: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    /// Runs `memuc <args>` and returns trimmed stdout.
    #[instrument(level = "debug", skip(self))]
    async fn run(&self, args: &[String]) -> Result<String, AutomationError> {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| {
                AutomationError::TransportFailure(format!(
                    "memuc {} did not answer within {:?}",
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| {
                AutomationError::TransportFailure(format!(
                    "failed to spawn {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutomationError::TransportFailure(format!(
                "memuc {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("memuc {} -> {stdout:?}", args.join(" "));
        Ok(stdout)
    }

    async fn adb_shell(&self, instance_id: u32, shell_args: &[&str]) -> Result<String, AutomationError> {
        let mut args = vec![
            "adb".to_string(),
            "-i".to_string(),
            instance_id.to_string(),
            "shell".to_string(),
        ];
        args.extend(shell_args.iter().map(|s| s.to_string()));
        self.run(&args).await
    }

    async fn on_instance(&self, verb: &str, instance_id: u32, extra: &[&str]) -> Result<String, AutomationError> {
        let mut args = vec![verb.to_string(), "-i".to_string(), instance_id.to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        self.run(&args).await
    }
}

/// `input text` treats spaces as argument separators; the device expects `%s`.
fn escape_input_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' ' => "%s".to_string(),
            '\'' | '"' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' | '`' | '\\' => {
                format!("\\{c}")
            }
            other => other.to_string(),
        })
        .collect()
}

#[async_trait::async_trait]
impl DeviceShell for MemucController {
    async fn tap(&self, instance_id: u32, x: u32, y: u32) -> Result<(), AutomationError> {
        self.adb_shell(instance_id, &["input", "tap", &x.to_string(), &y.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| AutomationError::InputDispatchFailed(format!("tap ({x}, {y}): {e}")))
    }

    async fn swipe(
        &self,
        instance_id: u32,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u64,
    ) -> Result<(), AutomationError> {
        self.adb_shell(
            instance_id,
            &[
                "input",
                "swipe",
                &from.0.to_string(),
                &from.1.to_string(),
                &to.0.to_string(),
                &to.1.to_string(),
                &duration_ms.to_string(),
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| AutomationError::InputDispatchFailed(format!("swipe {from:?} -> {to:?}: {e}")))
    }

    async fn key_event(&self, instance_id: u32, key_code: u32) -> Result<(), AutomationError> {
        self.adb_shell(instance_id, &["input", "keyevent", &key_code.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| AutomationError::InputDispatchFailed(format!("keyevent {key_code}: {e}")))
    }

    async fn input_text(&self, instance_id: u32, text: &str) -> Result<(), AutomationError> {
        let escaped = escape_input_text(text);
        self.adb_shell(instance_id, &["input", "text", &escaped])
            .await
            .map(|_| ())
            .map_err(|e| AutomationError::InputDispatchFailed(format!("input text: {e}")))
    }

    #[instrument(level = "debug", skip(self))]
    async fn capture_screen(
        &self,
        instance_id: u32,
        destination: &Path,
    ) -> Result<(), AutomationError> {
        let remote = format!("/sdcard/screen_{instance_id}.png");
        let local = destination.to_string_lossy().to_string();

        // A stale file would mask a failed pull.
        if destination.exists() {
            tokio::fs::remove_file(destination).await?;
        }

        self.adb_shell(instance_id, &["screencap", "-p", &remote]).await?;
        let pulled = self
            .run(&[
                "adb".to_string(),
                "-i".to_string(),
                instance_id.to_string(),
                "pull".to_string(),
                remote.clone(),
                local.clone(),
            ])
            .await;

        if pulled.is_ok() && destination.exists() {
            return Ok(());
        }

        warn!(
            "Pull of {remote} produced no file for instance {instance_id}, falling back to native capture"
        );
        self.on_instance("screencap", instance_id, &["-f", &local]).await?;

        if destination.exists() {
            Ok(())
        } else {
            Err(AutomationError::CaptureFailed(format!(
                "no screenshot written to {local} for instance {instance_id}"
            )))
        }
    }

    async fn screen_resolution(&self, instance_id: u32) -> Result<Resolution, AutomationError> {
        let raw = self.adb_shell(instance_id, &["wm", "size"]).await?;
        parse::parse_resolution(&raw).ok_or_else(|| {
            AutomationError::TransportFailure(format!(
                "unrecognised screen size response from instance {instance_id}: {raw:?}"
            ))
        })
    }

    async fn start_app(&self, instance_id: u32, package: &str) -> Result<(), AutomationError> {
        self.on_instance("startapp", instance_id, &[package]).await.map(|_| ())
    }

    async fn stop_app(&self, instance_id: u32, package: &str) -> Result<(), AutomationError> {
        self.on_instance("stopapp", instance_id, &[package]).await.map(|_| ())
    }

    async fn proxy(&self, instance_id: u32) -> Result<Option<String>, AutomationError> {
        let raw = self
            .adb_shell(instance_id, &["settings", "get", "global", "http_proxy"])
            .await?;
        Ok(parse::parse_proxy(&raw))
    }
}

#[async_trait::async_trait]
impl InstanceControl for MemucController {
    async fn start(&self, instance_id: u32) -> Result<(), AutomationError> {
        self.on_instance("start", instance_id, &[]).await.map(|_| ())
    }

    async fn stop(&self, instance_id: u32) -> Result<(), AutomationError> {
        self.on_instance("stop", instance_id, &[]).await.map(|_| ())
    }

    async fn clone_instance(&self, base_id: u32) -> Result<u32, AutomationError> {
        let raw = self.on_instance("clone", base_id, &[]).await?;
        parse::parse_clone_output(&raw).ok_or_else(|| {
            AutomationError::TransportFailure(format!("clone of instance {base_id} failed: {raw:?}"))
        })
    }

    async fn remove(&self, instance_id: u32) -> Result<(), AutomationError> {
        self.on_instance("remove", instance_id, &[]).await.map(|_| ())
    }

    async fn rename(&self, instance_id: u32, title: &str) -> Result<(), AutomationError> {
        self.on_instance("rename", instance_id, &[title]).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<InstanceStatus>, AutomationError> {
        let raw = self.run(&["listv2".to_string()]).await?;
        Ok(parse::parse_instance_listing(&raw))
    }

    async fn is_running(&self, instance_id: u32) -> Result<bool, AutomationError> {
        let raw = self.on_instance("isvmrunning", instance_id, &[]).await?;
        Ok(parse::parse_running_flag(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::escape_input_text;

    #[test]
    fn input_text_escapes_spaces_and_shell_metacharacters() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("a&b"), "a\\&b");
        assert_eq!(escape_input_text("plain"), "plain");
    }
}
