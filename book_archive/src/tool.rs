//! Running external decoder tools (`unrar`, `7z`, poppler) with a deadline.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::ExtractionError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Default deadline for a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Where to find one external tool and how long it may run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Explicit executable. Looked up on `PATH` by its default name when unset.
    pub path: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Tool settings for every format that shells out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolSettings {
    pub rar: ToolConfig,
    pub seven_zip: ToolConfig,
    pub pdfinfo: ToolConfig,
    pub pdftoppm: ToolConfig,
}

impl ToolSettings {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ToolConfig)> {
        [
            ("unrar", &self.rar),
            ("7z", &self.seven_zip),
            ("pdfinfo", &self.pdfinfo),
            ("pdftoppm", &self.pdftoppm),
        ]
        .into_iter()
    }
}

/// A resolved external executable.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: &'static str,
    program: PathBuf,
    timeout: Duration,
}

impl ExternalTool {
    /// Resolve `name` (or the configured override) to an executable.
    pub fn resolve(name: &'static str, config: &ToolConfig) -> Result<Self, ExtractionError> {
        let wanted = config
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(name));
        let program = which::which(&wanted).map_err(|e| {
            log::warn!("'{}' not found ({:?}): {}", name, wanted, e);
            ExtractionError::ToolMissing(wanted.display().to_string())
        })?;
        log::debug!("Using {:?} for '{}'", program, name);
        Ok(Self {
            name,
            program,
            timeout: config.timeout(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the tool to completion and capture its output.
    ///
    /// The child is killed if the deadline passes. A non-zero exit status is *not*
    /// an error here; callers interpret it per format.
    pub async fn run<I, S>(&self, args: I) -> Result<Output, ExtractionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractionError::ToolMissing(self.program.display().to_string())
            } else {
                ExtractionError::from(e)
            }
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => {
                log::warn!("'{}' exceeded {:?}, killed", self.name, self.timeout);
                Err(ExtractionError::Timeout {
                    tool: self.name.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Write an executable shell script standing in for a tool.
#[cfg(all(test, unix))]
pub(crate) fn fake_tool(dir: &std::path::Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("tool.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
