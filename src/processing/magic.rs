//! Magic-byte detection and obfuscated-filename recovery.
//!
//! Usenet posters frequently strip or scramble file extensions to dodge
//! automated takedown scanners. Before anything else runs we sniff the
//! first bytes of every file in the download directory and restore a
//! sane extension, the same way
//! `original_source/.../post_processor.py::deobfuscate_files` does.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::EngineResult;

const RAR4_MAGIC: &[u8] = b"Rar!\x1a\x07\x00";
const RAR5_MAGIC: &[u8] = b"Rar!\x1a\x07\x01\x00";
const SEVEN_Z_MAGIC: &[u8] = b"7z\xbc\xaf\x27\x1c";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PAR2_MAGIC: &[u8] = b"PAR2\x00PKT";

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "m4v", "ts", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Rar,
    SevenZ,
    Zip,
    Par2,
}

impl ArchiveType {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::Rar => "rar",
            ArchiveType::SevenZ => "7z",
            ArchiveType::Zip => "zip",
            ArchiveType::Par2 => "par2",
        }
    }
}

/// Sniff the leading bytes of `path`. Reads at most 16 bytes.
pub async fn detect_file_type(path: &Path) -> EngineResult<Option<ArchiveType>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    Ok(sniff(&bytes))
}

fn sniff(bytes: &[u8]) -> Option<ArchiveType> {
    if bytes.starts_with(PAR2_MAGIC) {
        Some(ArchiveType::Par2)
    } else if bytes.starts_with(RAR5_MAGIC) || bytes.starts_with(RAR4_MAGIC) {
        Some(ArchiveType::Rar)
    } else if bytes.starts_with(SEVEN_Z_MAGIC) {
        Some(ArchiveType::SevenZ)
    } else if bytes.starts_with(ZIP_MAGIC) {
        Some(ArchiveType::Zip)
    } else {
        None
    }
}

fn has_known_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    const KNOWN: &[&str] = &[
        ".rar", ".zip", ".7z", ".par2", ".nfo", ".sfv", ".srr", ".srs", ".nzb", ".txt", ".jpg", ".jpeg", ".png",
        ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".m4v", ".ts", ".webm", ".idx", ".sub", ".srt",
    ];
    if KNOWN.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }
    if is_old_style_rar_part(&lower) || is_par2_volume(&lower) || is_part_rar(&lower) {
        return true;
    }
    false
}

/// `.r00`, `.r01`, ... `.s00`, `.s01`, ...
fn is_old_style_rar_part(lower: &str) -> bool {
    let suffix = match lower.rsplit_once('.') {
        Some((_, s)) => s,
        None => return false,
    };
    suffix.len() == 3 && (suffix.starts_with('r') || suffix.starts_with('s')) && suffix[1..].chars().all(|c| c.is_ascii_digit())
}

/// `name.partNN.rar`
fn is_part_rar(lower: &str) -> bool {
    if !lower.ends_with(".rar") {
        return false;
    }
    let without_rar = &lower[..lower.len() - 4];
    match without_rar.rsplit_once(".part") {
        Some((_, digits)) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// `name.volNNN+NN.par2` or `name.volNNN.par2`
fn is_par2_volume(lower: &str) -> bool {
    if !lower.ends_with(".par2") {
        return false;
    }
    let without_par2 = &lower[..lower.len() - 5];
    without_par2.rsplit_once(".vol").is_some_and(|(_, rest)| rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
}

/// Rename obfuscated files in `directory` by sniffing magic bytes, and
/// return the number of files renamed.
///
/// RAR parts are renamed sequentially (`.rar`, `.r00`, `.r01`, ..., then
/// `.s00`, `.s01`, ... past `.r99`) in directory-listing order, which is
/// the best ordering signal available once names are scrambled — this
/// matches the original's fallback behavior when no part numbers survive
/// in the names.
pub async fn deobfuscate_files(directory: &Path) -> EngineResult<usize> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut candidates: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if has_known_extension(name) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.len() < 1024 {
            continue;
        }
        candidates.push(path);
    }
    candidates.sort();

    let mut existing_names: HashSet<String> = HashSet::new();
    let mut reread = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = reread.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            existing_names.insert(name.to_string());
        }
    }

    let mut renamed = 0usize;
    let mut rar_parts: Vec<PathBuf> = Vec::new();

    for path in candidates {
        match detect_file_type(&path).await? {
            Some(ArchiveType::Rar) => rar_parts.push(path),
            Some(kind) => {
                if rename_with_collision_suffix(&path, kind.extension(), &mut existing_names).await? {
                    renamed += 1;
                }
            }
            None => {}
        }
    }

    for (index, path) in rar_parts.into_iter().enumerate() {
        let suffix = rar_part_suffix(index);
        if rename_with_collision_suffix(&path, &suffix, &mut existing_names).await? {
            renamed += 1;
        }
    }

    Ok(renamed)
}

fn rar_part_suffix(index: usize) -> String {
    if index == 0 {
        "rar".to_string()
    } else if index <= 100 {
        format!("r{:02}", index - 1)
    } else {
        format!("s{:02}", index - 101)
    }
}

async fn rename_with_collision_suffix(path: &Path, extension: &str, existing_names: &mut HashSet<String>) -> EngineResult<bool> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let mut candidate = format!("{stem}.{extension}");
    let mut n = 1;
    while existing_names.contains(&candidate) {
        candidate = format!("{stem}_{n}.{extension}");
        n += 1;
    }
    let dest = path.with_file_name(&candidate);
    tokio::fs::rename(path, &dest).await?;
    existing_names.insert(candidate);
    Ok(true)
}

async fn list_files(directory: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case(ext)).unwrap_or(false)
}

pub async fn find_par2_files(directory: &Path) -> EngineResult<Vec<PathBuf>> {
    Ok(list_files(directory).await?.into_iter().filter(|p| has_extension(p, "par2")).collect())
}

/// Prefer the main `.par2` index (not a `.volNNN.par2` piece); else the
/// smallest file, since the index is typically far smaller than any
/// recovery-block volume.
pub async fn find_main_par2(directory: &Path) -> EngineResult<Option<PathBuf>> {
    let par2_files = find_par2_files(directory).await?;
    if par2_files.is_empty() {
        return Ok(None);
    }

    let non_vol: Vec<&PathBuf> = par2_files
        .iter()
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_lowercase();
            !name.contains(".vol")
        })
        .collect();

    if let Some(p) = non_vol.first() {
        return Ok(Some((*p).clone()));
    }

    let mut smallest: Option<(PathBuf, u64)> = None;
    for path in par2_files {
        let len = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(u64::MAX);
        smallest = match smallest {
            Some((p, l)) if l <= len => Some((p, l)),
            _ => Some((path, len)),
        };
    }
    Ok(smallest.map(|(p, _)| p))
}

pub async fn find_rar_files(directory: &Path) -> EngineResult<Vec<PathBuf>> {
    Ok(list_files(directory).await?.into_iter().filter(|p| has_extension(p, "rar")).collect())
}

/// Prefer `.partNN.rar`, then a plain `.rar` without `.part`, then
/// whatever sniffs as RAR by magic bytes, then alphabetical first.
pub async fn find_first_rar(directory: &Path) -> EngineResult<Option<PathBuf>> {
    let rar_files = find_rar_files(directory).await?;
    if rar_files.is_empty() {
        return Ok(None);
    }

    let part_one = rar_files.iter().find(|p| {
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_lowercase();
        name.contains(".part01.rar") || name.contains(".part001.rar") || name.contains(".part1.rar")
    });
    if let Some(p) = part_one {
        return Ok(Some(p.clone()));
    }

    let plain = rar_files.iter().find(|p| {
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_lowercase();
        !name.contains(".part")
    });
    if let Some(p) = plain {
        return Ok(Some(p.clone()));
    }

    for path in &rar_files {
        if let Some(ArchiveType::Rar) = detect_file_type(path).await? {
            return Ok(Some(path.clone()));
        }
    }

    Ok(rar_files.into_iter().next())
}

pub async fn find_zip_files(directory: &Path) -> EngineResult<Vec<PathBuf>> {
    Ok(list_files(directory).await?.into_iter().filter(|p| has_extension(p, "zip")).collect())
}

pub async fn find_7z_files(directory: &Path) -> EngineResult<Vec<PathBuf>> {
    Ok(list_files(directory).await?.into_iter().filter(|p| has_extension(p, "7z")).collect())
}

pub async fn has_video_files(directory: &Path) -> EngineResult<bool> {
    for path in list_files(directory).await? {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_archive_magic_bytes() {
        assert_eq!(sniff(RAR4_MAGIC), Some(ArchiveType::Rar));
        assert_eq!(sniff(RAR5_MAGIC), Some(ArchiveType::Rar));
        assert_eq!(sniff(SEVEN_Z_MAGIC), Some(ArchiveType::SevenZ));
        assert_eq!(sniff(ZIP_MAGIC), Some(ArchiveType::Zip));
        assert_eq!(sniff(PAR2_MAGIC), Some(ArchiveType::Par2));
        assert_eq!(sniff(b"not an archive"), None);
    }

    #[test]
    fn recognizes_known_extensions_including_split_archive_schemes() {
        assert!(has_known_extension("movie.mkv"));
        assert!(has_known_extension("archive.r00"));
        assert!(has_known_extension("archive.s12"));
        assert!(has_known_extension("archive.part01.rar"));
        assert!(has_known_extension("recovery.vol003+04.par2"));
        assert!(!has_known_extension("dGhpcyBpcyBzY3JhbWJsZWQ"));
    }

    #[test]
    fn rar_part_suffix_sequences_through_r_then_s() {
        assert_eq!(rar_part_suffix(0), "rar");
        assert_eq!(rar_part_suffix(1), "r00");
        assert_eq!(rar_part_suffix(100), "r99");
        assert_eq!(rar_part_suffix(101), "s00");
    }

    #[tokio::test]
    async fn deobfuscate_renames_magic_sniffed_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut rar_bytes = RAR4_MAGIC.to_vec();
        rar_bytes.extend(vec![0u8; 2000]);
        tokio::fs::write(dir.path().join("scrambled1"), &rar_bytes).await.unwrap();

        let mut par2_bytes = PAR2_MAGIC.to_vec();
        par2_bytes.extend(vec![0u8; 2000]);
        tokio::fs::write(dir.path().join("scrambled2"), &par2_bytes).await.unwrap();

        let renamed = deobfuscate_files(dir.path()).await.unwrap();
        assert_eq!(renamed, 2);
        assert!(dir.path().join("scrambled1.rar").exists());
        assert!(dir.path().join("scrambled2.par2").exists());
    }

    #[tokio::test]
    async fn find_main_par2_prefers_non_volume_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("show.vol003+04.par2"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("show.par2"), b"xx").await.unwrap();
        let main = find_main_par2(dir.path()).await.unwrap().unwrap();
        assert_eq!(main.file_name().unwrap(), "show.par2");
    }
}
