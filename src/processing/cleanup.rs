//! Deletes archive and metadata files once extraction has demonstrably
//! succeeded.
//!
//! Port of `original_source/.../post_processor.py::cleanup_archives`:
//! cleanup only runs when `has_video_files` is true, so a failed or
//! partial extraction never silently destroys the only copy of the
//! downloaded data.

use std::path::Path;

use crate::error::EngineResult;
use crate::processing::magic;

const CLEANUP_EXTENSIONS: &[&str] = &["rar", "r00", "par2", "nfo", "sfv", "srr", "srs", "nzb"];

/// Remove archive/par2/metadata files from `directory`. No-ops (and
/// returns `0`) unless a video file is already present, since that's
/// the only reliable signal that extraction actually produced something
/// worth keeping.
pub async fn cleanup_archives(directory: &Path) -> EngineResult<usize> {
    if !magic::has_video_files(directory).await? {
        return Ok(0);
    }

    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if is_cleanup_candidate(&path) {
            candidates.push(path);
        }
    }

    for path in candidates {
        if tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

fn is_cleanup_candidate(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_lowercase();

    if CLEANUP_EXTENSIONS.iter().any(|ext| name.ends_with(&format!(".{ext}"))) {
        return true;
    }
    // old-style .rNN / .sNN split-archive volumes
    if let Some((_, suffix)) = name.rsplit_once('.') {
        if suffix.len() == 3 && (suffix.starts_with('r') || suffix.starts_with('s')) && suffix[1..].chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    // vol###.par2 recovery volumes
    if name.ends_with(".par2") {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_cleanup_when_no_video_present() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.rar"), b"x").await.unwrap();
        let removed = cleanup_archives(dir.path()).await.unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("a.rar").exists());
    }

    #[tokio::test]
    async fn removes_archive_metadata_once_video_present() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.rar"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("a.nfo"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("movie.mkv"), b"x").await.unwrap();
        let removed = cleanup_archives(dir.path()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join("movie.mkv").exists());
        assert!(!dir.path().join("a.rar").exists());
    }
}
