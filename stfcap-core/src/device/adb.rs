//! [`DeviceAgent`] backed by the `adb` command-line client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::device::{CommandOutput, DeviceAgent, FileStat, ForwardTarget};
use crate::error::{CaptureError, Result};

/// A device reached through `adb`, optionally pinned to one serial.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(serial: Option<String>) -> Self {
        Self {
            adb: PathBuf::from("adb"),
            serial,
        }
    }

    /// Use a specific `adb` executable instead of the one on `PATH`.
    pub fn with_adb_path(mut self, adb: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    async fn exec(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, "adb");
        Ok(self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .await?)
    }

    /// Run `adb <args>` and return stdout, failing on a non-zero exit.
    async fn exec_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.exec(args).await?;
        check(args, output)
    }
}

fn check(args: &[&str], output: Output) -> Result<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if message.is_empty() {
        message = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    Err(CaptureError::Device {
        command: args.join(" "),
        message: format!("{} ({message})", output.status),
    })
}

/// Parse `getprop` output: one `[key]: [value]` pair per line.
pub fn parse_getprop(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse `stat -c '%s %a'` output.
fn parse_stat(output: &str) -> Option<FileStat> {
    let mut fields = output.split_whitespace();
    let size = fields.next()?.parse().ok()?;
    let mode = u32::from_str_radix(fields.next()?, 8).ok()?;
    Some(FileStat { size, mode })
}

#[async_trait]
impl DeviceAgent for AdbDevice {
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.exec_checked(&full).await
    }

    async fn open_command(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        debug!(args = ?full, "adb (streaming)");

        let mut child = self
            .command(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| CaptureError::Device {
            command: full.join(" "),
            message: "stdout not captured".into(),
        })?;
        Ok(Box::new(ChildOutput {
            _child: child,
            stdout,
        }))
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let script = format!("stat -c '%s %a' {path}");
        let args = ["shell", script.as_str()];
        let output = self.exec(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if let Some(stat) = parse_stat(&stdout) {
            return Ok(Some(stat));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("No such file") || stderr.contains("No such file") {
            return Ok(None);
        }
        check(&args, output).map(|_| None)
    }

    async fn push(&self, data: Bytes, path: &str, mode: u32) -> Result<()> {
        let script = format!("'cat > {path} && chmod {mode:o} {path}'");
        let args = ["exec-in", "sh", "-c", script.as_str()];
        debug!(path, size = data.len(), mode = %format!("{mode:o}"), "adb push");

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&data).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        check(&args, output).map(|_| ())
    }

    async fn properties(&self) -> Result<HashMap<String, String>> {
        let out = self.run_command(&["getprop"]).await?;
        Ok(parse_getprop(&out))
    }

    async fn forward(&self, target: &ForwardTarget) -> Result<SocketAddr> {
        let remote = target.to_string();
        let args = ["forward", "tcp:0", remote.as_str()];
        let out = self.exec_checked(&args).await?;
        let port: u16 = out.trim().parse().map_err(|_| CaptureError::Device {
            command: args.join(" "),
            message: format!("unexpected forward output: {:?}", out.trim()),
        })?;
        debug!(%remote, port, "forwarded");
        Ok(SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

// ── ChildOutput ──────────────────────────────────────────────────

/// Stdout of a streaming `adb shell`, keeping the child alive. The child is
/// killed when this is dropped.
struct ChildOutput {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for ChildOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getprop_pairs() {
        let out = "[ro.build.version.sdk]: [29]\n[ro.product.cpu.abi]: [arm64-v8a]\n\
                   [empty.value]: []\ngarbage line\n";
        let props = parse_getprop(out);
        assert_eq!(props["ro.build.version.sdk"], "29");
        assert_eq!(props["ro.product.cpu.abi"], "arm64-v8a");
        assert_eq!(props["empty.value"], "");
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn stat_output() {
        assert_eq!(
            parse_stat("1048576 755\n"),
            Some(FileStat {
                size: 1048576,
                mode: 0o755
            })
        );
        assert_eq!(parse_stat("stat: '/x': No such file or directory"), None);
    }

    #[test]
    fn serial_is_optional() {
        assert_eq!(AdbDevice::new(None).serial(), None);
        assert_eq!(AdbDevice::new(Some("emulator-5554".into())).serial(), Some("emulator-5554"));
    }
}
