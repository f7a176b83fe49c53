use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// An archive backend for 7z/CB7 books using the external `7z` tool.
///
/// Solid 7z archives decompress from the start of a block for every member, so
/// concurrent reads buy nothing; the adapter reports no random access.
pub struct SevenZipImageArchive {
    path: PathBuf,
    tool: ExternalTool,
}

impl SevenZipImageArchive {
    pub fn new(path: &Path, config: &ToolConfig) -> Result<Self, OpenError> {
        let tool = ExternalTool::resolve("7z", config)?;
        Ok(Self {
            path: path.to_path_buf(),
            tool,
        })
    }
}

#[derive(Default)]
struct Block {
    path: Option<String>,
    size: u64,
    is_dir: bool,
}

impl Block {
    fn finish(self, entries: &mut Vec<RawEntry>) {
        let Some(path) = self.path else {
            return;
        };
        let path = path.replace('\\', "/");
        if self.is_dir {
            entries.push(RawEntry::dir(path));
        } else {
            entries.push(RawEntry::file(path, self.size));
        }
    }
}

/// Parse the technical listing printed by `7z l -slt`.
///
/// The archive's own properties come before the `----------` line; after it each
/// member is a block of `Key = Value` lines separated by a blank line.
pub(crate) fn parse_listing(stdout: &str) -> Vec<RawEntry> {
    let mut entries = Vec::new();
    let mut lines = stdout.lines();
    for line in lines.by_ref() {
        if line.trim() == "----------" {
            break;
        }
    }

    let mut block = Block::default();
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            std::mem::take(&mut block).finish(&mut entries);
            continue;
        }
        let Some((key, value)) = line.split_once(" = ").or_else(|| {
            line.strip_suffix(" =").map(|key| (key, ""))
        }) else {
            continue;
        };
        match key {
            "Path" => block.path = Some(value.to_string()),
            "Size" => block.size = value.parse().unwrap_or(0),
            "Folder" => block.is_dir = value == "+",
            "Attributes" => block.is_dir |= value.starts_with('D'),
            _ => {}
        }
    }
    block.finish(&mut entries);
    entries
}

#[async_trait::async_trait]
impl FormatAdapter for SevenZipImageArchive {
    fn kind(&self) -> FormatKind {
        FormatKind::SevenZip
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        log::info!("Listing 7z archive {:?}", &self.path);
        let output = self
            .tool
            .run([
                OsStr::new("l"),
                OsStr::new("-slt"),
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
                OsStr::new("x"),
                OsStr::new("-so"),
                OsStr::new("-y"),
                OsStr::new("-bd"),
                // Entry names are literal paths, never wildcards or list files.
                OsStr::new("-spd"),
                OsStr::new("--"),
                self.path.as_os_str(),
                OsStr::new(id.as_str()),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::corrupt(id.as_str(), stderr.trim()));
        }
        // 7z exits cleanly with no output when the member does not exist.
        if output.stdout.is_empty() {
            log::info!("7z produced nothing for '{}'", id);
            return Err(ExtractionError::NotFound(id.to_string()));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "
7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21

Listing archive: book.cb7

--
Path = book.cb7
Type = 7z
Physical Size = 4242
Headers Size = 210
Solid = +
Blocks = 1

----------
Path = pages
Size = 0
Packed Size = 0
Modified = 2021-03-04 10:11:12
Attributes = D drwxr-xr-x
Folder = +

Path = pages/01.png
Size = 3000
Packed Size = 4000
Modified = 2021-03-04 10:11:12
Attributes = A -rw-r--r--
Folder = -

Path = pages/page 2 final.jpg
Size = 1000
Packed Size =
Attributes = A -rw-r--r--
Folder = -
";

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing(LISTING);
        assert_eq!(
            entries,
            vec![
                RawEntry::dir("pages"),
                RawEntry::file("pages/01.png", 3000),
                RawEntry::file("pages/page 2 final.jpg", 1000),
            ]
        );
    }

    #[test]
    fn test_archive_header_is_not_an_entry() {
        let entries = parse_listing("Path = book.7z\nType = 7z\n\n----------\n");
        assert!(entries.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        // Arguments: x -so -y -bd -spd -- <archive> <entry>
        let body = r#"[ "$1" = x ] && [ "$5" = -spd ] && [ "$6" = -- ] || exit 7
case "$8" in
  '*.jpg') printf 'cover' ;;
  missing.jpg) ;;
  *) echo 'Data Error' >&2; exit 2 ;;
esac"#;
        let config = ToolConfig {
            path: Some(crate::tool::fake_tool(dir.path(), body)),
            ..Default::default()
        };
        let archive = SevenZipImageArchive::new(Path::new("book.cb7"), &config).unwrap();

        let data = archive.extract(&EntryId::from("*.jpg")).await.unwrap();
        assert_eq!(data, b"cover");
        let missing = archive.extract(&EntryId::from("missing.jpg")).await.unwrap_err();
        assert!(matches!(missing, ExtractionError::NotFound(_)), "{missing:?}");
        let broken = archive.extract(&EntryId::from("broken.jpg")).await.unwrap_err();
        assert!(matches!(broken, ExtractionError::CorruptEntry { .. }), "{broken:?}");
    }
}
