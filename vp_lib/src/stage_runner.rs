//! Runs one per-sample stage over the working set, invoking the external job only
//! for the samples that do not yet have the stage's artifact.

use crate::artifacts::ArtifactStore;
use crate::jobs::{ensure_success, JobLauncher, StageJob};
use crate::post_process::{reset_work_dir, PostProcessPlan};
use crate::sample_set::WorkingSet;
use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use vp_types::{PipelineConfig, Sample, Stage};

/// What a stage did during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: String,
    /// Samples the job was asked to compute. Empty when the stage was already complete.
    pub pending: Vec<Sample>,
    pub invoked: bool,
}

pub struct StageRunner<'a, L: JobLauncher> {
    config: &'a PipelineConfig,
    store: &'a ArtifactStore,
    launcher: &'a L,
    log_root: PathBuf,
    commit: bool,
}

impl<'a, L: JobLauncher> StageRunner<'a, L> {
    /// `log_root` receives one log directory per stage.
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a ArtifactStore,
        launcher: &'a L,
        log_root: &Path,
        commit: bool,
    ) -> Self {
        StageRunner {
            config,
            store,
            launcher,
            log_root: log_root.to_path_buf(),
            commit,
        }
    }

    /// Samples of the working set lacking the artifact of `stage`, in sorted order.
    pub fn pending(&self, stage: Stage, working_set: &WorkingSet) -> Vec<Sample> {
        self.store.missing(stage, working_set.iter())
    }

    /// Directory the job for `stage` reads its inputs from.
    fn input_dir(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Align => self.config.raw_dir.clone(),
            Stage::CallRaw(_) => self.store.stage_dir(Stage::Align),
            Stage::FilterCalls(c) => self.store.stage_dir(Stage::CallRaw(c)),
            Stage::MergeCalls(c) => self.store.stage_dir(Stage::FilterCalls(c)),
        }
    }

    fn program(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Align => &self.config.tools.align,
            Stage::CallRaw(_) => &self.config.tools.call,
            Stage::FilterCalls(_) => &self.config.tools.filter,
            Stage::MergeCalls(_) => &self.config.tools.merge,
        }
    }

    /// Bring `stage` up to date for every sample of the working set.
    ///
    /// A failed job is fatal; outputs already moved into place by earlier runs are kept
    /// and the next run recomputes only what is still missing.
    pub fn run(&self, stage: Stage, working_set: &WorkingSet) -> Result<StageReport> {
        let pending = self.pending(stage, working_set);
        if pending.is_empty() {
            info!(
                "{stage}: already complete for all {} samples",
                working_set.len()
            );
            return Ok(StageReport {
                stage: stage.name(),
                pending,
                invoked: false,
            });
        }

        let plan = PostProcessPlan::for_stage(stage)?;
        let work_dir = plan.work_dir_path(stage, self.config, self.store);
        reset_work_dir(&work_dir)?;
        let log_dir = self.log_root.join(stage.name());
        fs::create_dir_all(&log_dir).with_context(|| log_dir.display().to_string())?;

        let job = StageJob {
            stage,
            program: self.program(stage).to_path_buf(),
            samples: pending.clone(),
            input_dir: self.input_dir(stage),
            reference: self.config.reference.clone(),
            output_dir: work_dir.clone(),
            log_dir: log_dir.clone(),
            threads: self.config.threads,
            commit: self.commit,
        };
        info!(
            "{stage}: {} of {} samples pending: {}",
            pending.len(),
            working_set.len(),
            pending.iter().join(",")
        );
        let status = self
            .launcher
            .run_stage(&job)
            .with_context(|| format!("launching the {stage} job"))?;
        ensure_success(&stage.name(), status)?;

        if self.commit {
            plan.apply(stage, &pending, &work_dir, &log_dir, self.store)
                .with_context(|| format!("post-processing {stage}"))?;
            info!("{stage}: finished {} samples", pending.len());
        } else {
            fs::remove_dir_all(&work_dir).with_context(|| work_dir.display().to_string())?;
            info!("{stage}: dry run, outputs were not collected");
        }

        Ok(StageReport {
            stage: stage.name(),
            pending,
            invoked: true,
        })
    }
}
