//! Entry classification and natural ordering.

use std::cmp::Ordering;

use image::ImageFormat;

use crate::model::{EntryId, EntryKind, FormatKind, RawEntry};

/// How many leading bytes adapters capture per entry for sniffing.
pub const PREFIX_LEN: usize = 32;

/// Extensions of images we can decode.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "ico", "tga", "pnm", "pbm", "pgm",
    "ppm", "avif", "qoi",
];

const ARCHIVE_EXTENSIONS: &[(&str, FormatKind)] = &[
    ("zip", FormatKind::Zip),
    ("cbz", FormatKind::Zip),
    ("rar", FormatKind::Rar),
    ("cbr", FormatKind::Rar),
    ("7z", FormatKind::SevenZip),
    ("cb7", FormatKind::SevenZip),
    ("tar", FormatKind::Tar),
    ("cbt", FormatKind::Tar),
    ("tgz", FormatKind::TarGz),
    ("gz", FormatKind::TarGz),
    ("tbz", FormatKind::TarBz2),
    ("tbz2", FormatKind::TarBz2),
    ("bz2", FormatKind::TarBz2),
    ("pdf", FormatKind::Pdf),
];

/// Detect a container format from its leading bytes.
///
/// The tar signature sits at offset 257, so plain tar is only recognised when the
/// prefix is long enough.
pub fn sniff_archive(prefix: &[u8]) -> Option<FormatKind> {
    if prefix.starts_with(b"PK\x03\x04")
        || prefix.starts_with(b"PK\x05\x06")
        || prefix.starts_with(b"PK\x07\x08")
    {
        Some(FormatKind::Zip)
    } else if prefix.starts_with(b"Rar!\x1a\x07") {
        Some(FormatKind::Rar)
    } else if prefix.starts_with(b"7z\xbc\xaf\x27\x1c") {
        Some(FormatKind::SevenZip)
    } else if prefix.starts_with(&[0x1f, 0x8b]) {
        Some(FormatKind::TarGz)
    } else if prefix.starts_with(b"BZh") {
        Some(FormatKind::TarBz2)
    } else if prefix.starts_with(b"%PDF-") {
        Some(FormatKind::Pdf)
    } else if prefix.get(257..262) == Some(b"ustar".as_slice()) {
        Some(FormatKind::Tar)
    } else {
        None
    }
}

/// Map an extension (without the dot, any case) to a container format.
pub fn archive_from_extension(ext: &str) -> Option<FormatKind> {
    let ext = ext.to_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, kind)| *kind)
}

/// Image formats whose signatures are long enough to overrule a file extension.
/// Two-byte magics such as BMP's `BM` show up in plain text too often.
fn has_strong_signature(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Tiff
            | ImageFormat::Avif
            | ImageFormat::Qoi
    )
}

/// Decide what an entry is. Content sniffing wins; the extension is the fallback.
pub fn classify(id: &EntryId, prefix: &[u8]) -> EntryKind {
    if let Ok(format) = image::guess_format(prefix) {
        if has_strong_signature(format) {
            return EntryKind::Image;
        }
    }
    if sniff_archive(prefix).is_some() {
        return EntryKind::Archive;
    }
    classify_by_extension(id)
}

fn classify_by_extension(id: &EntryId) -> EntryKind {
    let Some(ext) = id.extension() else {
        return EntryKind::Other;
    };
    if archive_from_extension(&ext).is_some() {
        return EntryKind::Archive;
    }
    let is_image_mime = mime_guess::from_ext(&ext)
        .iter()
        .any(|m| m.type_() == mime_guess::mime::IMAGE);
    if is_image_mime && SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        EntryKind::Image
    } else {
        EntryKind::Other
    }
}

/// Classify a raw listing entry, directories included.
pub fn classify_raw(entry: &RawEntry) -> EntryKind {
    if entry.is_dir {
        EntryKind::Directory
    } else {
        classify(&entry.id, &entry.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    /// Digit run with leading zeros stripped (`"0"` for all zeros).
    Number(String),
    Text(String),
}

impl Part {
    fn as_str(&self) -> &str {
        match self {
            Part::Number(s) | Part::Text(s) => s,
        }
    }
}

impl Ord for Part {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Part::Number(a), Part::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Part::Text(a), Part::Text(b)) => a.cmp(b),
            (a, b) => a.as_str().cmp(b.as_str()),
        }
    }
}

impl PartialOrd for Part {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural-order key: `page2` sorts before `page10`, case is ignored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(Vec<Part>);

/// Build the natural sort key of a name.
pub fn sort_key(name: &str) -> SortKey {
    let lowered = name.to_lowercase();
    let mut parts = Vec::new();
    let mut run = String::new();
    let mut in_digits = false;

    for c in lowered.chars() {
        let is_digit = c.is_ascii_digit();
        if !run.is_empty() && is_digit != in_digits {
            parts.push(finish_run(std::mem::take(&mut run), in_digits));
        }
        in_digits = is_digit;
        run.push(c);
    }
    if !run.is_empty() {
        parts.push(finish_run(run, in_digits));
    }
    SortKey(parts)
}

fn finish_run(run: String, digits: bool) -> Part {
    if digits {
        let trimmed = run.trim_start_matches('0');
        Part::Number(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
    } else {
        Part::Text(run)
    }
}

/// Sort names in natural order, keeping the input order for equal keys.
pub fn natural_sort<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by_cached_key(|n| sort_key(n.as_ref()));
}
