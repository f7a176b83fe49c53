use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// `unrar` exit code for "no files matched".
const UNRAR_NO_FILES: i32 = 10;

/// An archive backend for RAR/CBR books using the external `unrar` tool.
///
/// Listing parses `unrar l`; extraction streams a single member through `unrar p`
/// on stdout, so no temporary files are written.
pub struct RarImageArchive {
    /// Path to the RAR archive file.
    path: PathBuf,
    tool: ExternalTool,
}

impl RarImageArchive {
    /// Resolve `unrar` and bind it to the archive at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the RAR/CBR file.
    /// * `config` - Tool location and timeout.
    pub fn new(path: &Path, config: &ToolConfig) -> Result<Self, OpenError> {
        let tool = ExternalTool::resolve("unrar", config)?;
        Ok(Self {
            path: path.to_path_buf(),
            tool,
        })
    }
}

/// Split off `n` whitespace-separated fields and return the untouched remainder,
/// so names with repeated spaces survive.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

/// Parse the table printed by `unrar l`:
///
/// ```text
///  Attributes      Size     Date    Time   Name
/// ----------- ---------  ---------- -----  ----
///     ..A....      1234  2021-01-01 12:00  pages/01.jpg
/// ----------- ---------  ---------- -----  ----
/// ```
pub(crate) fn parse_listing(stdout: &str) -> Vec<RawEntry> {
    let mut entries = Vec::new();
    let mut listing_started = false;

    for line in stdout.lines() {
        if line.trim().starts_with("--------") {
            if listing_started {
                break;
            }
            listing_started = true;
            continue;
        }
        if !listing_started || line.trim().is_empty() {
            continue;
        }
        // Each line looks like: attrs size date time name
        let Some((fields, name)) = split_fields(line, 4) else {
            continue;
        };
        let attrs = fields[0];
        let name = name.replace('\\', "/");
        if attrs.contains('D') || attrs.starts_with('d') {
            entries.push(RawEntry::dir(name));
        } else {
            let size = fields[1].parse().unwrap_or(0);
            entries.push(RawEntry::file(name, size));
        }
    }
    entries
}

#[async_trait::async_trait]
impl FormatAdapter for RarImageArchive {
    fn kind(&self) -> FormatKind {
        FormatKind::Rar
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        log::info!("Listing RAR archive {:?}", &self.path);
        let output = self
            .tool
            .run([
                OsStr::new("l"),
                OsStr::new("-c-"),
                OsStr::new("--"),
                self.path.as_os_str(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OpenError::corrupt(&self.path, stderr.trim()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_listing(&stdout))
    }

    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let output = self
            .tool
            .run([
                OsStr::new("p"),
                OsStr::new("-inul"),
                OsStr::new("-c-"),
                OsStr::new("--"),
                self.path.as_os_str(),
                OsStr::new(id.as_str()),
            ])
            .await?;
        match output.status.code() {
            Some(0) => Ok(output.stdout),
            Some(UNRAR_NO_FILES) => Err(ExtractionError::NotFound(id.to_string())),
            code => Err(ExtractionError::corrupt(
                id.as_str(),
                format!("unrar exited with {:?}", code),
            )),
        }
    }
}
