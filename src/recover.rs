use chrono::{Local, TimeZone};
use log::{debug, error};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::copier::BlockCopier;
use crate::inode::DeletedInode;
use crate::sniff::ContentClassifier;

/// Recovery policy and collaborators turning a deleted inode into a file
/// in the output directory.
pub struct Carver<C: BlockCopier, S: ContentClassifier> {
    out_dir: PathBuf,
    ignore_extensions: HashSet<String>,
    recover_extensions: HashSet<String>,
    copier: C,
    classifier: S,
}

impl<C: BlockCopier, S: ContentClassifier> Carver<C, S> {
    /// Creates the carver and its output directory.
    pub fn new(
        out_dir: PathBuf,
        ignore_extensions: HashSet<String>,
        recover_extensions: HashSet<String>,
        copier: C,
        classifier: S,
    ) -> io::Result<Self> {
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            ignore_extensions,
            recover_extensions,
            copier,
            classifier,
        })
    }

    /// Attempts recovery of one deleted inode.
    ///
    /// The block at logical offset zero is copied first so the classifier
    /// has bytes to sniff; only then is the extension chosen, the filter
    /// policy applied, and the rest of the extent map copied. Returns the
    /// final path, or `None` when the inode was abandoned or filtered.
    pub fn carve(&mut self, inode: &DeletedInode, block_size: u64) -> Option<PathBuf> {
        let first = inode.extents.get(&0)?;
        let stem = format!("{}_{}", format_ctime(inode.ctime), inode.ino);
        let mut path = self.out_dir.join(&stem);

        if let Err(err) = self
            .copier
            .copy_blocks(&path, block_size, first.start_block, 0, 1)
        {
            debug!("inode {}: probe copy failed: {}", inode.ino, err);
            let _ = fs::remove_file(&path);
            return None;
        }

        match self.classifier.classify(&path) {
            Ok(media_type) => {
                let extension = extension_for(&media_type);
                if let Some(ref ext) = extension {
                    let renamed = self.out_dir.join(format!("{}.{}", stem, ext));
                    match fs::rename(&path, &renamed) {
                        Ok(()) => path = renamed,
                        Err(err) => error!("inode {}: rename failed: {}", inode.ino, err),
                    }
                }
                if !self.retained(extension.as_deref()) {
                    debug!("inode {}: filtered out as {:?}", inode.ino, extension);
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
            Err(err) => {
                // No extension can be inferred; keep the file as it is.
                debug!("inode {}: classifier failed: {}", inode.ino, err);
            }
        }

        for (logical, run) in &inode.extents {
            if let Err(err) =
                self.copier
                    .copy_blocks(&path, block_size, run.start_block, *logical, run.block_count)
            {
                // A failed run leaves the file partial rather than dropped.
                debug!(
                    "inode {}: copy of extent @{} failed: {}",
                    inode.ino, logical, err
                );
            }
        }

        eprintln!("\nRecovered file -> {}", path.display());
        Some(path)
    }

    /// The ignore list always wins; the recover list, when present,
    /// retains only what it names.
    fn retained(&self, extension: Option<&str>) -> bool {
        if let Some(ext) = extension {
            if self.ignore_extensions.contains(ext) {
                return false;
            }
        }
        if self.recover_extensions.is_empty() {
            return true;
        }
        match extension {
            Some(ext) => self.recover_extensions.contains(ext),
            None => false,
        }
    }
}

/// Fixed media-type map consulted before the generic derivation.
fn mapped_extension(media_type: &str) -> Option<&'static str> {
    match media_type {
        "application/octet-stream" => Some("bin"),
        "text/plain" => Some("txt"),
        "image/jpeg" => Some("jpg"),
        "application/gzip" => Some("gz"),
        _ => None,
    }
}

/// Derives a file extension from a media type: the subtype after the
/// final `/`, minus any `+suffix`, minus one leading vendor prefix of
/// the form `alnum+[-.]`, lowercased.
pub fn extension_for(media_type: &str) -> Option<String> {
    if let Some(ext) = mapped_extension(media_type) {
        return Some(ext.to_string());
    }
    let subtype = media_type.rsplit('/').next()?;
    let token = strip_vendor_prefix(subtype.split('+').next()?);
    if token.is_empty() {
        None
    } else {
        Some(token.to_lowercase())
    }
}

fn strip_vendor_prefix(token: &str) -> &str {
    for (at, ch) in token.char_indices() {
        match ch {
            '-' | '.' if at > 0 => return &token[at + 1..],
            _ if ch.is_ascii_alphanumeric() => continue,
            _ => return token,
        }
    }
    token
}

/// Local calendar rendering of the deletion instant, used as the file
/// name prefix. The raw epoch value stands in when the instant cannot
/// be represented.
pub fn format_ctime(ctime: u32) -> String {
    Local
        .timestamp_opt(ctime as i64, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d-%H:%M").to_string())
        .unwrap_or_else(|| ctime.to_string())
}
