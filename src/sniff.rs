use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Media-type oracle consulted once per carved file, before the filter
/// policy decides whether the file is kept.
pub trait ContentClassifier {
    /// Returns a media type such as `text/plain` for the file at `path`.
    fn classify(&mut self, path: &Path) -> io::Result<String>;
}

/// Leading bytes the classifier inspects.
const SNIFF_LEN: usize = 512;

/// Offset of the "ustar" marker inside a tar header block.
const TAR_MAGIC_OFFSET: usize = 257;

/// Classifies files by their leading magic bytes, falling back to
/// `text/plain` for printable content and `application/octet-stream`
/// for everything else.
pub struct MagicClassifier;

impl ContentClassifier for MagicClassifier {
    fn classify(&mut self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut buf = vec![0u8; SNIFF_LEN];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "nothing to classify",
            ));
        }
        Ok(sniff_media_type(&buf).to_string())
    }
}

/// Maps leading bytes to a media type.
pub fn sniff_media_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png";
    }
    if data.starts_with(b"GIF8") {
        return "image/gif";
    }
    if data.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if data.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        return "application/zip";
    }
    if data.starts_with(&[0x1F, 0x8B]) {
        return "application/gzip";
    }
    if data.starts_with(&[0x7F, 0x45, 0x4C, 0x46]) {
        return "application/x-executable";
    }
    if data.starts_with(b"SQLite format 3\0") {
        return "application/vnd.sqlite3";
    }
    if data.len() > TAR_MAGIC_OFFSET + 5 && &data[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
    {
        return "application/x-tar";
    }
    if looks_textual(data) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// A probe block is content padded with zeros up to the block size, so
/// trailing NULs are not held against the text check.
fn looks_textual(data: &[u8]) -> bool {
    let trimmed = match data.iter().rposition(|&b| b != 0) {
        Some(last) => &data[..=last],
        None => return false,
    };
    match std::str::from_utf8(trimmed) {
        Ok(text) => text
            .chars()
            .all(|c| !c.is_control() || c == '\n' || c == '\r' || c == '\t'),
        Err(_) => false,
    }
}
