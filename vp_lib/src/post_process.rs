//! Per stage/caller handling of a finished job: where the job works, whether its
//! per-sample exit logs are trusted, and moving its outputs into the canonical tree.

use crate::artifacts::{artifact_file_name, relocate, ArtifactStore};
use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use vp_types::constants::EXIT_LOG_EXTENSION;
use vp_types::{Caller, PipelineConfig, PipelineError, Sample, Stage};

/// Where a job writes before its outputs are moved into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkDir {
    /// A per-stage directory on the configured scratch storage.
    Scratch,
    /// A staging directory beside the canonical directory.
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcessPlan {
    pub work_dir: WorkDir,
    /// Scan `{sample}.exit` logs and fail on any non-zero status.
    pub check_exit_logs: bool,
}

impl PostProcessPlan {
    /// Look up the handling of `stage`. Merging is not a per-sample stage and has no plan.
    pub fn for_stage(stage: Stage) -> Result<PostProcessPlan> {
        let (work_dir, check_exit_logs) = match stage {
            Stage::Align => (WorkDir::Staging, true),
            Stage::CallRaw(Caller::Gatk) => (WorkDir::Scratch, true),
            Stage::CallRaw(Caller::Freebayes) => (WorkDir::Staging, true),
            // deepvariant writes no per-sample logs; its exit status is all we get
            Stage::CallRaw(Caller::Deepvariant) => (WorkDir::Scratch, false),
            Stage::FilterCalls(_) => (WorkDir::Staging, true),
            Stage::MergeCalls(_) => {
                bail!("{stage} has no per-sample post-processing; it is run by the merge engine")
            }
        };
        Ok(PostProcessPlan {
            work_dir,
            check_exit_logs,
        })
    }

    pub fn work_dir_path(
        &self,
        stage: Stage,
        config: &PipelineConfig,
        store: &ArtifactStore,
    ) -> PathBuf {
        match self.work_dir {
            WorkDir::Scratch => config.scratch_dir.join(stage.name()),
            WorkDir::Staging => store.staging_dir(stage),
        }
    }

    /// Everything that follows a successful job: log validation, relocation of every
    /// pending sample's artifact and index, and removal of the work directory.
    pub fn apply(
        &self,
        stage: Stage,
        samples: &[Sample],
        work_dir: &Path,
        log_dir: &Path,
        store: &ArtifactStore,
    ) -> Result<()> {
        if self.check_exit_logs {
            check_exit_logs(stage, samples, log_dir)?;
        }
        relocate_outputs(stage, samples, work_dir, store)?;
        fs::remove_dir_all(work_dir).with_context(|| work_dir.display().to_string())
    }
}

/// Empty `dir`, creating it if needed, so that nothing left by an interrupted
/// earlier job can be mistaken for output.
pub fn reset_work_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).with_context(|| dir.display().to_string()),
    }
    fs::create_dir_all(dir).with_context(|| dir.display().to_string())
}

pub fn exit_log_path(log_dir: &Path, sample: &Sample) -> PathBuf {
    log_dir.join(artifact_file_name(sample, EXIT_LOG_EXTENSION))
}

/// Fail on the first sample whose exit log is missing, unparsable or non-zero.
pub fn check_exit_logs(stage: Stage, samples: &[Sample], log_dir: &Path) -> Result<()> {
    for sample in samples {
        let log = exit_log_path(log_dir, sample);
        let status = fs::read_to_string(&log)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok());
        match status {
            Some(0) => {}
            Some(status) => {
                return Err(PipelineError::FailedExitLog {
                    stage: stage.name(),
                    sample: sample.clone(),
                    status,
                    log,
                }
                .into())
            }
            None => {
                return Err(PipelineError::MissingExitLog {
                    stage: stage.name(),
                    sample: sample.clone(),
                    log,
                }
                .into())
            }
        }
    }
    Ok(())
}

/// Move `{sample}.{ext}` and its index from `work_dir` to the canonical paths.
/// The index goes first so that a present artifact always has its index.
pub fn relocate_outputs(
    stage: Stage,
    samples: &[Sample],
    work_dir: &Path,
    store: &ArtifactStore,
) -> Result<()> {
    for sample in samples {
        let moves = [
            (
                work_dir.join(artifact_file_name(sample, stage.index_extension())),
                store.index_path(sample, stage),
            ),
            (
                work_dir.join(artifact_file_name(sample, stage.extension())),
                store.path(sample, stage),
            ),
        ];
        for (src, _) in &moves {
            if !src.is_file() {
                return Err(PipelineError::MissingOutput {
                    stage: stage.name(),
                    sample: sample.clone(),
                    path: src.clone(),
                }
                .into());
            }
        }
        for (src, dst) in &moves {
            relocate(src, dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(ids: &[&str]) -> Vec<Sample> {
        ids.iter().map(|&id| Sample::new(id)).collect()
    }

    #[test]
    fn test_every_stage_has_a_plan() {
        use strum::IntoEnumIterator;
        let callers: Vec<_> = Caller::iter().collect();
        for stage in Stage::per_sample_stages(&callers) {
            assert!(PostProcessPlan::for_stage(stage).is_ok(), "{stage}");
        }
        assert!(PostProcessPlan::for_stage(Stage::MergeCalls(Caller::Gatk)).is_err());
        assert_eq!(
            PostProcessPlan::for_stage(Stage::CallRaw(Caller::Deepvariant)).unwrap(),
            PostProcessPlan {
                work_dir: WorkDir::Scratch,
                check_exit_logs: false
            }
        );
    }

    #[test]
    fn test_check_exit_logs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stage = Stage::Align;
        fs::write(dir.path().join("A.exit"), "0\n")?;
        fs::write(dir.path().join("B.exit"), "1\n")?;
        fs::write(dir.path().join("C.exit"), "garbage")?;

        check_exit_logs(stage, &samples(&["A"]), dir.path())?;

        let err = check_exit_logs(stage, &samples(&["A", "B"]), dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::FailedExitLog { status: 1, sample, .. }) if sample.as_str() == "B"
        ));
        for id in ["C", "D"] {
            let err = check_exit_logs(stage, &samples(&[id]), dir.path()).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::MissingExitLog { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_apply_relocates_and_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ArtifactStore::new(dir.path().join("store"));
        store.create_layout(&[Caller::Freebayes])?;
        let stage = Stage::FilterCalls(Caller::Freebayes);
        let plan = PostProcessPlan::for_stage(stage)?;
        let work = store.staging_dir(stage);
        let logs = dir.path().join("logs");
        reset_work_dir(&work)?;
        fs::create_dir_all(&logs)?;
        for id in ["A", "B"] {
            fs::write(work.join(format!("{id}.vcf.gz")), id)?;
            fs::write(work.join(format!("{id}.vcf.gz.tbi")), id)?;
            fs::write(logs.join(format!("{id}.exit")), "0")?;
        }

        plan.apply(stage, &samples(&["A", "B"]), &work, &logs, &store)?;
        assert!(store.exists(&Sample::new("A"), stage));
        assert!(store.index_path(&Sample::new("B"), stage).is_file());
        assert!(!work.exists());
        Ok(())
    }

    #[test]
    fn test_missing_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ArtifactStore::new(dir.path().join("store"));
        store.create_layout(&[Caller::Gatk])?;
        let stage = Stage::Align;
        let work = store.staging_dir(stage);
        reset_work_dir(&work)?;
        fs::write(work.join("A.bam"), "")?;

        let err = relocate_outputs(stage, &samples(&["A"]), &work, &store).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingOutput { path, .. }) => {
                assert_eq!(path, &work.join("A.bam.bai"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // nothing was moved
        assert!(!store.exists(&Sample::new("A"), stage));
        Ok(())
    }

    #[test]
    fn test_reset_work_dir_discards_leftovers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let work = dir.path().join("scratch/call_raw.gatk");
        fs::create_dir_all(&work)?;
        fs::write(work.join("A.vcf.gz"), "partial")?;
        reset_work_dir(&work)?;
        assert!(work.is_dir());
        assert_eq!(fs::read_dir(&work)?.count(), 0);
        Ok(())
    }
}
