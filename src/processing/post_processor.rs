//! Post-processing pipeline: deobfuscate filenames, verify/repair PAR2
//! sets, extract archives, clean up, and validate the result actually
//! contains something worth keeping.
//!
//! Orchestration and validation rules are a direct port of
//! `original_source/.../post_processor.py::post_process`.

use std::path::Path;

use tracing::{info, warn};

use crate::config::PostProcessingConfig;
use crate::error::{EngineError, EngineResult, PostProcessingError};
use crate::processing::{cleanup, magic, par2, rar};
use crate::processing::par2::Par2Status;

#[derive(Debug, Clone)]
pub struct PostProcessOutcome {
    pub deobfuscated_count: usize,
    pub par2_status: Par2Status,
    pub par2_message: String,
    pub extracted: bool,
    pub extraction_message: String,
    pub cleaned_up_count: usize,
}

pub struct PostProcessor {
    config: PostProcessingConfig,
}

impl PostProcessor {
    pub fn new(config: PostProcessingConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline against `directory` (a download's temp
    /// directory, prior to merge into its final location).
    pub async fn process(&self, directory: &Path) -> EngineResult<PostProcessOutcome> {
        let deobfuscated_count = if self.config.deobfuscate_file_names {
            magic::deobfuscate_files(directory).await?
        } else {
            0
        };
        if deobfuscated_count > 0 {
            info!(count = deobfuscated_count, "deobfuscated file names");
        }

        let par2_files = magic::find_par2_files(directory).await?;
        let (par2_status, par2_message) = if self.config.auto_par2_repair && !par2_files.is_empty() {
            let (status, message) = par2::run_par2_repair(directory).await?;
            if status == Par2Status::Success && self.config.delete_par2_after_repair {
                for path in &par2_files {
                    let _ = tokio::fs::remove_file(path).await;
                }
            }
            (status, message)
        } else if par2_files.is_empty() {
            (Par2Status::NoPar2Files, "no par2 files present".to_string())
        } else {
            (Par2Status::NoPar2Files, "par2 repair disabled".to_string())
        };

        let rar_files = magic::find_rar_files(directory).await?;
        let zip_files = magic::find_zip_files(directory).await?;
        let sevenz_files = magic::find_7z_files(directory).await?;
        let has_archives = !rar_files.is_empty() || !zip_files.is_empty() || !sevenz_files.is_empty();

        if !has_archives {
            if magic::has_video_files(directory).await? {
                let cleaned_up_count = if !par2_files.is_empty() { cleanup::cleanup_archives(directory).await? } else { 0 };
                return Ok(PostProcessOutcome {
                    deobfuscated_count,
                    par2_status,
                    par2_message,
                    extracted: false,
                    extraction_message: "no archives present, video already extracted".to_string(),
                    cleaned_up_count,
                });
            }

            if !par2_files.is_empty() {
                return Err(EngineError::PostProcessing(PostProcessingError::RecoveryOnly));
            }

            return Err(EngineError::PostProcessing(PostProcessingError::ExtractionFailed(
                "no archives, no video, and no recovery files found".to_string(),
            )));
        }

        if par2_status == Par2Status::Failed {
            warn!(message = %par2_message, "par2 repair failed, attempting extraction anyway");
        }

        let (extracted, extraction_message) = if self.config.auto_extract_rar {
            match rar::extract_archives(directory).await {
                Ok((ok, msg)) => (ok, msg),
                Err(e) => return Err(e),
            }
        } else {
            (false, "archive extraction disabled".to_string())
        };

        if !extracted {
            return Err(EngineError::PostProcessing(PostProcessingError::ExtractionFailed(extraction_message)));
        }

        if self.config.delete_rar_after_extract {
            if let Some(first_rar) = magic::find_first_rar(directory).await? {
                rar::delete_rar_parts(&first_rar, directory).await?;
            }
        }

        if !magic::has_video_files(directory).await? {
            return Err(EngineError::PostProcessing(PostProcessingError::ExtractionFailed(
                "extraction completed but no video files found".to_string(),
            )));
        }

        let cleaned_up_count = cleanup::cleanup_archives(directory).await?;

        Ok(PostProcessOutcome { deobfuscated_count, par2_status, par2_message, extracted, extraction_message, cleaned_up_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PostProcessingConfig {
        PostProcessingConfig::default()
    }

    #[tokio::test]
    async fn no_archives_no_video_no_par2_fails() {
        let dir = tempfile::tempdir().unwrap();
        let processor = PostProcessor::new(config());
        let result = processor.process(dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn no_archives_with_video_already_present_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("movie.mkv"), b"data").await.unwrap();
        let processor = PostProcessor::new(config());
        let outcome = processor.process(dir.path()).await.unwrap();
        assert!(!outcome.extracted);
    }

    #[tokio::test]
    async fn only_par2_recovery_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("show.par2"), b"PAR2\x00PKTxxxx").await.unwrap();
        let mut cfg = config();
        cfg.auto_par2_repair = false;
        let processor = PostProcessor::new(cfg);
        let result = processor.process(dir.path()).await;
        assert!(result.is_err());
    }
}
