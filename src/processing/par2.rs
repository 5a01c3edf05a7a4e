//! PAR2 verification and repair via the system `par2` binary.
//!
//! Port of `original_source/.../post_processor.py::run_par2_repair`:
//! `par2 verify <main>` first (cheap), falling back to `par2 repair
//! <main>` only if verification reports damage. A verify run that says
//! "main packet not found" means the PAR2 set itself is incomplete —
//! treated as a skip, not a failure, since there's nothing to repair
//! against.

use std::path::Path;
use std::time::Duration;

use crate::error::EngineResult;
use crate::processing::external_tool::{self, ToolResult};
use crate::processing::magic;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(3600);
const REPAIR_TIMEOUT: Duration = Duration::from_secs(7200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Par2Status {
    NoPar2Files,
    Success,
    Failed,
}

/// Verify (and repair if necessary) the PAR2 set in `directory`.
/// Returns `(status, message)`.
pub async fn run_par2_repair(directory: &Path) -> EngineResult<(Par2Status, String)> {
    let main_par2 = match magic::find_main_par2(directory).await? {
        Some(p) => p,
        None => return Ok((Par2Status::NoPar2Files, "no par2 files present".to_string())),
    };
    let main_name = main_par2.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();

    let verify = external_tool::run("par2", &["verify", &main_name], Some(directory), VERIFY_TIMEOUT).await;

    match &verify {
        ToolResult::Success { .. } => Ok((Par2Status::Success, "verified, all files intact".to_string())),
        ToolResult::NotFound => Ok((Par2Status::Failed, "par2 tool not available".to_string())),
        ToolResult::TimedOut => Ok((Par2Status::Failed, "par2 verify timed out".to_string())),
        ToolResult::NonZeroExit { stdout, stderr, .. } => {
            let combined = format!("{stdout}\n{stderr}");
            if combined.to_lowercase().contains("main packet not found") {
                return Ok((Par2Status::NoPar2Files, "par2 set incomplete, skipping".to_string()));
            }

            let repair = external_tool::run("par2", &["repair", &main_name], Some(directory), REPAIR_TIMEOUT).await;
            match repair {
                ToolResult::Success { .. } => Ok((Par2Status::Success, "repaired successfully".to_string())),
                ToolResult::NotFound => Ok((Par2Status::Failed, "par2 tool not available".to_string())),
                ToolResult::TimedOut => Ok((Par2Status::Failed, "par2 repair timed out".to_string())),
                ToolResult::NonZeroExit { stdout, stderr, .. } => {
                    Ok((Par2Status::Failed, external_tool::clean_extraction_error(&format!("{stdout}\n{stderr}"))))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_par2_files_is_reported_as_skip_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = run_par2_repair(dir.path()).await.unwrap();
        assert_eq!(status, Par2Status::NoPar2Files);
    }
}
