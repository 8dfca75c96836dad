//! Change detection - which vault files exist, and which of them changed.
//!
//! Detection uses only `stat` (mtime + size); file contents are never read
//! here, so the cost is one metadata call per file regardless of size.

use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::tracking::FileMeta;

/// Directory names skipped anywhere below the vault root.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".obsidian",
    ".beads",
    ".claude",
    "node_modules",
    ".trash",
    ".txtai-index",
];

const DOCUMENT_EXTENSION: &str = "md";

/// A document file found under the vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Root-relative path with `/` separators.
    pub id: String,
}

/// Enumerate indexable documents under `root`.
///
/// Symlinks are never followed or returned, and every hit is re-checked to
/// resolve inside the resolved root; files that fail to resolve are skipped.
pub fn scan(root: &Path) -> Vec<Candidate> {
    let root_resolved = match root.canonicalize() {
        Ok(r) => r,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "cannot resolve vault root");
            return vec![];
        }
    };

    let mut candidates: Vec<Candidate> = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .filter_entry(|entry| {
            entry.depth() == 0 || !is_excluded_name(&entry.file_name().to_string_lossy())
        })
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.path_is_symlink())
        .filter(|entry| entry.file_type().map_or(false, |ft| ft.is_file()))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext == DOCUMENT_EXTENSION)
        })
        .filter_map(|entry| candidate(root, &root_resolved, entry.into_path()))
        .collect();

    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    candidates
}

fn candidate(root: &Path, root_resolved: &Path, path: PathBuf) -> Option<Candidate> {
    match path.canonicalize() {
        Ok(resolved) if resolved.starts_with(root_resolved) => {}
        Ok(resolved) => {
            debug!(file = %resolved.display(), "skipping file outside vault");
            return None;
        }
        Err(e) => {
            debug!(file = %path.display(), error = %e, "skipping unresolvable file");
            return None;
        }
    }

    let relative = path.strip_prefix(root).ok()?;
    if is_excluded(relative) {
        return None;
    }
    let id = document_id(relative)?;
    Some(Candidate { path, id })
}

/// True if the file is new (`previous` is `None`) or its mtime or size moved.
/// A failing `stat` also counts as changed.
pub fn file_changed(path: &Path, previous: Option<&FileMeta>) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    match FileMeta::from_path(path) {
        Ok(current) => current != *previous,
        Err(_) => true,
    }
}

/// Whether any component of a root-relative path is an excluded directory.
pub fn is_excluded(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => is_excluded_name(&name.to_string_lossy()),
        _ => false,
    })
}

fn is_excluded_name(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

fn document_id(relative: &Path) -> Option<String> {
    let parts: Vec<String> = relative
        .components()
        .map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
