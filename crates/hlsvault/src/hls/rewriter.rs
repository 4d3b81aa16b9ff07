//! Rewrites a fetched playlist so its segment lines point at local files.
//!
//! A segment line is replaced by `ts/{local name}` only when the segment is
//! part of the current batch, has a mapping entry, and the mapped file exists
//! on disk. Everything else passes through unchanged, so a rewritten playlist
//! never references a missing local file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::DownloadError;
use crate::fs;
use crate::job::SEGMENT_DIR;
use crate::naming::original_name;
use crate::state::mapping::NameMapping;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub path: PathBuf,
    pub replaced: usize,
    pub segment_lines: usize,
}

pub struct PlaylistRewriter<'a> {
    segment_dir: &'a Path,
    mapping: &'a NameMapping,
    batch: &'a HashSet<String>,
}

impl<'a> PlaylistRewriter<'a> {
    /// `batch` holds original segment names (see [`original_name`]).
    pub fn new(segment_dir: &'a Path, mapping: &'a NameMapping, batch: &'a HashSet<String>) -> Self {
        Self {
            segment_dir,
            mapping,
            batch,
        }
    }

    /// Rewrite `source` into a new file at `dest`.
    pub async fn write_new(&self, source: &Path, dest: &Path) -> Result<RewriteOutcome, DownloadError> {
        let content = tokio::fs::read_to_string(source).await?;
        let (rewritten, replaced, segment_lines) = self.rewrite(&content).await;
        fs::write_atomic(dest, rewritten).await?;
        info!(
            source = %source.display(),
            dest = %dest.display(),
            replaced,
            segment_lines,
            "Local playlist written"
        );
        Ok(RewriteOutcome {
            path: dest.to_path_buf(),
            replaced,
            segment_lines,
        })
    }

    /// Patch an existing local playlist in place. Lines already pointing at
    /// local files are left as they are.
    pub async fn update_in_place(&self, path: &Path) -> Result<RewriteOutcome, DownloadError> {
        let content = tokio::fs::read_to_string(path).await?;
        let (rewritten, replaced, segment_lines) = self.rewrite(&content).await;
        if replaced > 0 {
            fs::write_atomic(path, rewritten).await?;
        }
        info!(path = %path.display(), replaced, "Local playlist updated");
        Ok(RewriteOutcome {
            path: path.to_path_buf(),
            replaced,
            segment_lines,
        })
    }

    async fn rewrite(&self, content: &str) -> (String, usize, usize) {
        let mut out = String::with_capacity(content.len());
        let mut replaced = 0;
        let mut segment_lines = 0;

        for (i, raw) in content.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let (line, cr) = match raw.strip_suffix('\r') {
                Some(line) => (line, "\r"),
                None => (raw, ""),
            };
            let trimmed = line.trim();
            if !is_segment_line(trimmed) {
                out.push_str(raw);
                continue;
            }
            segment_lines += 1;

            match self.local_reference(trimmed).await {
                Some(local) => {
                    out.push_str(&local);
                    out.push_str(cr);
                    replaced += 1;
                }
                None => out.push_str(raw),
            }
        }
        (out, replaced, segment_lines)
    }

    async fn local_reference(&self, uri: &str) -> Option<String> {
        let name = original_name(uri);
        if !self.batch.contains(&name) {
            return None;
        }
        let local = self.mapping.get(&name)?;
        match tokio::fs::try_exists(self.segment_dir.join(local)).await {
            Ok(true) => Some(format!("{SEGMENT_DIR}/{local}")),
            _ => {
                debug!(segment = %name, local, "Mapped segment missing on disk, keeping remote URI");
                None
            }
        }
    }
}

fn is_segment_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}
