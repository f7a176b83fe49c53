use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// Resolution pages are rendered at.
pub const PDF_RENDER_DPI: u32 = 72 * 4;

/// PDF books rendered one page at a time by poppler's `pdftoppm`.
///
/// Every page becomes a synthetic `pageNNNN.png` entry; `pdfinfo` supplies the
/// page count. Any page can be rendered on its own, so access is random.
pub struct PdfImageArchive {
    path: PathBuf,
    info: ExternalTool,
    render: ExternalTool,
}

impl PdfImageArchive {
    pub fn new(path: &Path, tools: &ToolSettings) -> Result<Self, OpenError> {
        let info = ExternalTool::resolve("pdfinfo", &tools.pdfinfo)?;
        let render = ExternalTool::resolve("pdftoppm", &tools.pdftoppm)?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
            render,
        })
    }

    /// Poppler's tools do not understand `--`, so keep a relative path from
    /// looking like an option.
    fn path_arg(&self) -> OsString {
        if self.path.is_relative() {
            Path::new(".").join(&self.path).into_os_string()
        } else {
            self.path.clone().into_os_string()
        }
    }
}

pub(crate) fn page_entry_name(page: u32) -> String {
    format!("page{:04}.png", page)
}

/// 1-based page number of a `pageNNNN.png` entry.
pub(crate) fn page_number(id: &EntryId) -> Option<u32> {
    let digits = id.as_str().strip_prefix("page")?.strip_suffix(".png")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

/// Page count from `pdfinfo` output (`Pages:          12`).
pub(crate) fn parse_page_count(stdout: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let value = line.strip_prefix("Pages:")?;
        value.trim().parse().ok()
    })
}

#[async_trait::async_trait]
impl FormatAdapter for PdfImageArchive {
    fn kind(&self) -> FormatKind {
        FormatKind::Pdf
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        log::info!("Listing PDF {:?}", &self.path);
        let output = self.info.run([self.path_arg()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OpenError::corrupt(&self.path, stderr.trim()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let pages = parse_page_count(&stdout)
            .ok_or_else(|| OpenError::corrupt(&self.path, "pdfinfo reported no page count"))?;
        log::debug!("{:?} has {} pages", &self.path, pages);
        Ok((1..=pages)
            .map(|page| RawEntry::file(page_entry_name(page), 0))
            .collect())
    }

    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let page = page_number(id).ok_or_else(|| ExtractionError::NotFound(id.to_string()))?;
        let page = page.to_string();
        let dpi = PDF_RENDER_DPI.to_string();
        let path = self.path_arg();
        // Without an output root pdftoppm writes the image to stdout.
        let output = self
            .render
            .run([
                OsStr::new("-png"),
                OsStr::new("-r"),
                OsStr::new(&dpi),
                OsStr::new("-f"),
                OsStr::new(&page),
                OsStr::new("-l"),
                OsStr::new(&page),
                OsStr::new("-singlefile"),
                path.as_os_str(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::corrupt(id.as_str(), stderr.trim()));
        }
        // Pages past the end render nothing.
        if output.stdout.is_empty() {
            return Err(ExtractionError::NotFound(id.to_string()));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "Title:          Sample
Producer:       pdfTeX-1.40.21
Tagged:         no
Pages:          12
Encrypted:      no
Page size:      595.276 x 841.89 pts (A4)
";

    #[test]
    fn test_parse_page_count() {
        assert_eq!(parse_page_count(INFO), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn test_page_names() {
        assert_eq!(page_entry_name(7), "page0007.png");
        assert_eq!(page_number(&EntryId::from("page0007.png")), Some(7));
        assert_eq!(page_number(&EntryId::from("page0000.png")), None);
        assert_eq!(page_number(&EntryId::from("page+7.png")), None);
        assert_eq!(page_number(&EntryId::from("cover.png")), None);
    }

    #[test]
    fn test_missing_poppler() {
        let tools = ToolSettings {
            pdfinfo: ToolConfig {
                path: Some(PathBuf::from("/nonexistent/pdfinfo")),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = PdfImageArchive::new(Path::new("book.pdf"), &tools).err().unwrap();
        assert!(matches!(err, OpenError::Tool(ExtractionError::ToolMissing(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_and_render() {
        let dir = tempfile::tempdir().unwrap();
        let info_dir = dir.path().join("info");
        let render_dir = dir.path().join("render");
        std::fs::create_dir_all(&info_dir).unwrap();
        std::fs::create_dir_all(&render_dir).unwrap();

        let info = crate::tool::fake_tool(&info_dir, "printf 'Pages:          3\\n'");
        // Arguments: -png -r 288 -f N -l N -singlefile <file>
        let render = crate::tool::fake_tool(
            &render_dir,
            r#"[ "$9" = ./-book.pdf ] || exit 99
case "$5" in
  2) printf 'page-two' ;;
  3) exit 1 ;;
esac"#,
        );
        let tools = ToolSettings {
            pdfinfo: ToolConfig {
                path: Some(info),
                ..Default::default()
            },
            pdftoppm: ToolConfig {
                path: Some(render),
                ..Default::default()
            },
            ..Default::default()
        };
        let archive = PdfImageArchive::new(Path::new("-book.pdf"), &tools).unwrap();

        let entries = archive.list_entries().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(names, vec!["page0001.png", "page0002.png", "page0003.png"]);

        let data = archive.extract(&EntryId::from("page0002.png")).await.unwrap();
        assert_eq!(data, b"page-two");
        let blank = archive.extract(&EntryId::from("page0001.png")).await.unwrap_err();
        assert!(matches!(blank, ExtractionError::NotFound(_)), "{blank:?}");
        let broken = archive.extract(&EntryId::from("page0003.png")).await.unwrap_err();
        assert!(matches!(broken, ExtractionError::CorruptEntry { .. }), "{broken:?}");
        let bogus = archive.extract(&EntryId::from("notes.txt")).await.unwrap_err();
        assert!(matches!(bogus, ExtractionError::NotFound(_)));
    }
}
