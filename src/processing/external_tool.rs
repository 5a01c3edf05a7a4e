//! Shared helper for invoking external post-processing tools (`par2`,
//! `unrar`, `unrar-free`, `7z`, `7za`) as subprocesses with a hard
//! timeout.
//!
//! Grounded on `original_source/.../post_processor.py`'s
//! `subprocess.run(..., timeout=N)` calls: a missing binary is reported
//! distinctly from a non-zero exit so callers can skip gracefully (par2
//! missing is non-fatal) or fail (extraction tool missing after all
//! candidates are exhausted).

use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug)]
pub enum ToolResult {
    Success { stdout: String, stderr: String },
    NonZeroExit { code: Option<i32>, stdout: String, stderr: String },
    NotFound,
    TimedOut,
}

impl ToolResult {
    pub fn combined_output(&self) -> String {
        match self {
            ToolResult::Success { stdout, stderr } | ToolResult::NonZeroExit { stdout, stderr, .. } => {
                format!("{stdout}\n{stderr}")
            }
            ToolResult::NotFound => String::new(),
            ToolResult::TimedOut => String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }
}

/// Run `program args...` with `cwd` as the working directory, killing it
/// if it doesn't finish within `timeout`.
pub async fn run(program: &str, args: &[&str], cwd: Option<&Path>, timeout: Duration) -> ToolResult {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.kill_on_drop(true);

    let child = match cmd.output() {
        fut => tokio::time::timeout(timeout, fut).await,
    };

    match child {
        Ok(Ok(output)) => from_output(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => ToolResult::NotFound,
        Ok(Err(_)) => ToolResult::NotFound,
        Err(_) => ToolResult::TimedOut,
    }
}

fn from_output(output: Output) -> ToolResult {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        ToolResult::Success { stdout, stderr }
    } else {
        ToolResult::NonZeroExit { code: output.status.code(), stdout, stderr }
    }
}

/// Produce a concise, user-facing extraction error from raw tool output —
/// strips 7z/unrar banners, keeps the meaningful reason. Port of
/// `_clean_extraction_error`.
pub fn clean_extraction_error(raw_error: &str) -> String {
    if raw_error.trim().is_empty() {
        return "unknown extraction error".to_string();
    }
    let lower = raw_error.to_lowercase();

    let known: &[(&[&str], &str)] = &[
        (&["no files to extract", "no files"], "archive is empty or contains no extractable files"),
        (&["wrong password", "encrypted"], "archive is password-protected"),
        (&["unexpected end of archive", "truncated"], "archive is incomplete or corrupted"),
        (&["crc failed", "checksum"], "archive data is corrupted (CRC error)"),
        (&["data error"], "archive data is corrupted"),
        (&["timed out", "timeout"], "extraction timed out"),
        (&["disk full", "no space"], "not enough disk space for extraction"),
    ];
    for (needles, message) in known {
        if needles.iter().any(|n| lower.contains(n)) {
            return message.to_string();
        }
    }
    if lower.contains("cannot open") && lower.contains("volume") {
        return "missing archive volumes (split archive incomplete)".to_string();
    }
    if lower.contains("not found") && (lower.contains("command") || lower.contains("no such file")) {
        return "extraction tool not available".to_string();
    }

    let meaningful: Vec<&str> = raw_error
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("7-Zip") && !line.starts_with("p7zip"))
        .filter(|line| !line.contains("Copyright") && !line.contains("Igor Pavlov"))
        .filter(|line| !line.starts_with("64-bit") && !line.starts_with("32-bit"))
        .filter(|line| !line.contains("Scanning the drive"))
        .filter(|line| !line.starts_with("Extracting archive:"))
        .filter(|line| !line.to_lowercase().starts_with("unrar"))
        .filter(|line| !(line.chars().next().is_some_and(|c| c.is_ascii_digit()) && line.contains("file")))
        .collect();

    if meaningful.is_empty() {
        return "extraction failed".to_string();
    }
    let mut result = meaningful.iter().take(2).copied().collect::<Vec<_>>().join("; ");
    if result.len() > 120 {
        result.truncate(117);
        result.push_str("...");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_failure_patterns() {
        assert_eq!(clean_extraction_error("Wrong password for archive.rar"), "archive is password-protected");
        assert_eq!(clean_extraction_error("CRC failed in foo.rar"), "archive data is corrupted (CRC error)");
        assert_eq!(clean_extraction_error("process timed out after 7200s"), "extraction timed out");
    }

    #[test]
    fn strips_7z_banner_noise() {
        let raw = "7-Zip 21.07 (x64)\nCopyright (c) 1999-2021 Igor Pavlov\nScanning the drive\nError: corrupt header";
        assert_eq!(clean_extraction_error(raw), "Error: corrupt header");
    }

    #[test]
    fn empty_input_reports_unknown() {
        assert_eq!(clean_extraction_error(""), "unknown extraction error");
    }
}
