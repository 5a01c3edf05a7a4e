//! Archive extraction via system tools: `unrar`/`unrar-free` for RAR,
//! `7z`/`7za` for 7z and ZIP.
//!
//! Port of `original_source/.../post_processor.py::extract_archives` and
//! its `_extract_rar`/`_extract_zip`/`_extract_7z` helpers. ZIP has no
//! subprocess equivalent in the original (it uses Python's in-process
//! `zipfile` module) — handled here via `7z`, which natively reads ZIP,
//! keeping extraction uniformly subprocess-based rather than pulling in
//! a dedicated ZIP crate for one format.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineResult;
use crate::processing::external_tool::{self, ToolResult};
use crate::processing::magic;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(7200);

/// Extract every archive found in `directory` (RAR, 7z, ZIP). Returns
/// `(any_extracted, message)`.
pub async fn extract_archives(directory: &Path) -> EngineResult<(bool, String)> {
    let mut extracted_any = false;
    let mut messages = Vec::new();

    if let Some(first_rar) = magic::find_first_rar(directory).await? {
        match extract_rar(&first_rar, directory).await {
            Ok(msg) => {
                extracted_any = true;
                messages.push(msg);
            }
            Err(msg) => return Ok((false, msg)),
        }
    }

    for zip in magic::find_zip_files(directory).await? {
        match extract_zip(&zip, directory).await {
            Ok(msg) => {
                extracted_any = true;
                messages.push(msg);
            }
            Err(msg) => return Ok((false, msg)),
        }
    }

    for sevenz in magic::find_7z_files(directory).await? {
        match extract_7z(&sevenz, directory).await {
            Ok(msg) => {
                extracted_any = true;
                messages.push(msg);
            }
            Err(msg) => return Ok((false, msg)),
        }
    }

    if extracted_any {
        Ok((true, messages.join("; ")))
    } else {
        Ok((false, "no archives found".to_string()))
    }
}

/// Try `unrar`, then `unrar-free`, then fall back to `7z`. The unrar
/// error (if any) is preserved over the 7z fallback's own noise, since
/// unrar's diagnostics are usually the more specific of the two.
async fn extract_rar(rar_path: &Path, output_dir: &Path) -> std::result::Result<String, String> {
    let rar_name = rar_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let out_arg = format!("{}/", output_dir.display());

    let unrar_result = external_tool::run("unrar", &["x", "-o+", "-y", rar_name, &out_arg], Some(output_dir), EXTRACT_TIMEOUT).await;
    if unrar_result.is_success() {
        return Ok("extracted with unrar".to_string());
    }
    let unrar_error = match &unrar_result {
        ToolResult::NotFound => None,
        _ => Some(external_tool::clean_extraction_error(&unrar_result.combined_output())),
    };

    let unrar_free_result = external_tool::run("unrar-free", &["x", "-o+", "-y", rar_name, &out_arg], Some(output_dir), EXTRACT_TIMEOUT).await;
    if unrar_free_result.is_success() {
        return Ok("extracted with unrar-free".to_string());
    }
    let unrar_free_error = match &unrar_free_result {
        ToolResult::NotFound => None,
        _ => Some(external_tool::clean_extraction_error(&unrar_free_result.combined_output())),
    };

    let seven_z_out = format!("-o{}", output_dir.display());
    let seven_z_result = external_tool::run("7z", &["x", "-y", &seven_z_out, rar_name], Some(output_dir), EXTRACT_TIMEOUT).await;
    if seven_z_result.is_success() {
        return Ok("extracted with 7z fallback".to_string());
    }

    Err(unrar_error
        .or(unrar_free_error)
        .unwrap_or_else(|| external_tool::clean_extraction_error(&seven_z_result.combined_output())))
}

async fn extract_zip(zip_path: &Path, output_dir: &Path) -> std::result::Result<String, String> {
    let name = zip_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let out_arg = format!("-o{}", output_dir.display());
    let result = external_tool::run("7z", &["x", "-y", &out_arg, name], Some(output_dir), EXTRACT_TIMEOUT).await;
    if result.is_success() {
        Ok("extracted zip with 7z".to_string())
    } else {
        Err(external_tool::clean_extraction_error(&result.combined_output()))
    }
}

async fn extract_7z(path: &Path, output_dir: &Path) -> std::result::Result<String, String> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let out_arg = format!("-o{}", output_dir.display());

    let result = external_tool::run("7z", &["x", "-y", &out_arg, name], Some(output_dir), EXTRACT_TIMEOUT).await;
    if result.is_success() {
        return Ok("extracted with 7z".to_string());
    }
    if !matches!(result, ToolResult::NotFound) {
        return Err(external_tool::clean_extraction_error(&result.combined_output()));
    }

    let result = external_tool::run("7za", &["x", "-y", &out_arg, name], Some(output_dir), EXTRACT_TIMEOUT).await;
    if result.is_success() {
        Ok("extracted with 7za".to_string())
    } else {
        Err(external_tool::clean_extraction_error(&result.combined_output()))
    }
}

/// Delete RAR volumes belonging to the same split-archive set as
/// `first_rar` (`.rNN`, `.sNN`, `.partNN.rar`, and the lead `.rar`).
pub async fn delete_rar_parts(first_rar: &Path, directory: &Path) -> EngineResult<()> {
    let base = rar_base_name(first_rar.file_name().and_then(|n| n.to_str()).unwrap_or_default());

    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut to_delete: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if rar_base_name(&name) == base && is_rar_volume(&name) {
            to_delete.push(entry.path());
        }
    }
    for path in to_delete {
        let _ = tokio::fs::remove_file(path).await;
    }
    Ok(())
}

fn is_rar_volume(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".rar") || lower.rsplit_once('.').is_some_and(|(_, suffix)| {
        suffix.len() == 3 && (suffix.starts_with('r') || suffix.starts_with('s')) && suffix[1..].chars().all(|c| c.is_ascii_digit())
    })
}

fn rar_base_name(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(idx) = lower.find(".part") {
        return name[..idx].to_string();
    }
    if let Some(idx) = lower.rfind(".rar") {
        return name[..idx].to_string();
    }
    if let Some((stem, _)) = name.rsplit_once('.') {
        return stem.to_string();
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rar_base_name_strips_part_and_extension_suffixes() {
        assert_eq!(rar_base_name("Movie.2024.part01.rar"), "Movie.2024");
        assert_eq!(rar_base_name("Movie.2024.rar"), "Movie.2024");
        assert_eq!(rar_base_name("Movie.2024.r00"), "Movie.2024");
    }

    #[test]
    fn is_rar_volume_matches_rnn_and_snn_suffixes() {
        assert!(is_rar_volume("a.rar"));
        assert!(is_rar_volume("a.r00"));
        assert!(is_rar_volume("a.s12"));
        assert!(!is_rar_volume("a.nfo"));
    }
}
