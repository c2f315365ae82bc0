//! Paged directory listings
//!
//! A listing reads the immediate children of one directory and delivers them
//! in pages. The final page is always empty, or an error when the directory
//! itself cannot be read, so every listing produces exactly one terminal
//! message.

use chrono::{DateTime, Utc};
use log::warn;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, ScanError};
use crate::models::normalize_mtime;

/// Kind of a listed entry. Symbolic links are never followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { mtime: DateTime<Utc> },
    Other,
    /// Present in the directory but could not be stat'ed
    Unreadable,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// List `dir` and hand every page to `deliver`.
///
/// Stops early when `deliver` returns false (the receiver is gone).
/// Children that cannot be stat'ed are delivered as [`EntryKind::Unreadable`];
/// a child error that does not name its path fails the whole listing.
pub fn list_directory<F>(dir: &Path, page_size: usize, mut deliver: F)
where
    F: FnMut(Result<Vec<ListedEntry>>) -> bool,
{
    let page_size = page_size.max(1);
    let walker = WalkDir::new(dir)
        .min_depth(0)
        .max_depth(1)
        .follow_links(false)
        .into_iter();

    let mut page = Vec::with_capacity(page_size);
    for entry in walker {
        let (path, kind) = match entry {
            Ok(entry) if entry.depth() == 0 => continue,
            Ok(entry) => {
                let kind = entry_kind(&entry);
                (entry.into_path(), kind)
            }
            Err(e) if e.depth() == 0 => {
                deliver(Err(ScanError::filesystem(
                    Some(dir.to_path_buf()),
                    e.to_string(),
                )));
                return;
            }
            Err(e) => match e.path() {
                Some(path) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    (path.to_path_buf(), EntryKind::Unreadable)
                }
                None => {
                    deliver(Err(ScanError::filesystem(
                        Some(dir.to_path_buf()),
                        e.to_string(),
                    )));
                    return;
                }
            },
        };

        page.push(ListedEntry { path, kind });
        if page.len() == page_size {
            let full = std::mem::replace(&mut page, Vec::with_capacity(page_size));
            if !deliver(Ok(full)) {
                return;
            }
        }
    }

    if !page.is_empty() && !deliver(Ok(page)) {
        return;
    }
    deliver(Ok(Vec::new()));
}

fn entry_kind(entry: &walkdir::DirEntry) -> EntryKind {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        match entry
            .metadata()
            .map_err(|e| e.to_string())
            .and_then(|m| m.modified().map_err(|e| e.to_string()))
        {
            Ok(modified) => EntryKind::File {
                mtime: normalize_mtime(modified),
            },
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                EntryKind::Unreadable
            }
        }
    } else {
        EntryKind::Other
    }
}
