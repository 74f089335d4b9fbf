//! Top-level driver: resolve the working set, bring every per-sample stage up to
//! date in order, merge each caller's filtered calls, and record what happened.

use crate::artifacts::{link_relative, ArtifactStore};
use crate::jobs::JobLauncher;
use crate::lock::RunLock;
use crate::merge::{aggregate_samples, find_current_aggregate, MergeEngine, MergeReport};
use crate::sample_set::{SampleSetResolver, WorkingSet};
use crate::stage_runner::{StageReport, StageRunner};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use vp_types::constants::SUMMARY_FILE_NAME;
use vp_types::manifest::Manifest;
use vp_types::{Caller, PipelineConfig, PipelineError, Sample, Stage};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub manifest: PathBuf,
    /// Explicit inclusion list. `None` selects the whole manifest.
    pub samples: Option<Vec<String>>,
    /// Run directory for logs and the summary. Must not exist yet.
    pub output_dir: PathBuf,
    /// When false, jobs are only asked what they would do.
    pub commit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub date: String,
    pub commit: bool,
    pub working_set: WorkingSet,
    pub stages: Vec<StageReport>,
    pub merges: Vec<MergeReport>,
}

/// Samples of the working set not yet in the current aggregate of a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMerge {
    pub caller: Caller,
    pub current: Option<PathBuf>,
    pub samples: Vec<Sample>,
}

/// What a run would do, computed without mutating anything.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub working_set: WorkingSet,
    pub stages: Vec<StageReport>,
    pub merges: Vec<PendingMerge>,
}

pub struct Pipeline<'a, L: JobLauncher> {
    config: &'a PipelineConfig,
    store: ArtifactStore,
    launcher: &'a L,
}

impl<'a, L: JobLauncher> Pipeline<'a, L> {
    pub fn new(config: &'a PipelineConfig, launcher: &'a L) -> Self {
        Pipeline {
            config,
            store: ArtifactStore::new(&config.artifact_root),
            launcher,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn working_set(&self, manifest: &Path, samples: Option<&[String]>) -> Result<WorkingSet> {
        let manifest = Manifest::read(manifest)?;
        let working_set = SampleSetResolver::new(self.config).resolve(&manifest, samples)?;
        if working_set.is_empty() {
            warn!("no samples selected from {}", manifest.path().display());
        } else {
            info!("working set of {} samples", working_set.len());
        }
        Ok(working_set)
    }

    /// Report the pending work of every stage and merge. Nothing is created or invoked.
    pub fn check(&self, manifest: &Path, samples: Option<&[String]>) -> Result<CheckReport> {
        self.launcher.preflight(self.config)?;
        let working_set = self.working_set(manifest, samples)?;

        let stages = Stage::per_sample_stages(&self.config.callers)
            .into_iter()
            .map(|stage| StageReport {
                stage: stage.name(),
                pending: self.store.missing(stage, working_set.iter()),
                invoked: false,
            })
            .collect();

        let mut merges = Vec::new();
        for &caller in &self.config.callers {
            let current =
                find_current_aggregate(&self.store.stage_dir(Stage::MergeCalls(caller)), caller)?;
            let merged = match &current {
                Some(path) => aggregate_samples(path)?,
                None => BTreeSet::new(),
            };
            merges.push(PendingMerge {
                caller,
                current,
                samples: working_set
                    .iter()
                    .filter(|s| !merged.contains(*s))
                    .cloned()
                    .collect(),
            });
        }

        Ok(CheckReport {
            working_set,
            stages,
            merges,
        })
    }

    /// Run the whole pipeline for the working set. `today` names new aggregates.
    ///
    /// Everything that can be validated up front (tools, run directory, manifest and
    /// working set) is validated before the artifact hierarchy is touched.
    pub fn run(&self, opts: &RunOptions, today: NaiveDate) -> Result<RunSummary> {
        self.launcher.preflight(self.config)?;
        if opts.output_dir.try_exists()? {
            return Err(PipelineError::OutputDirExists {
                path: opts.output_dir.clone(),
            }
            .into());
        }
        let working_set = self.working_set(&opts.manifest, opts.samples.as_deref())?;

        self.store.create_layout(&self.config.callers)?;
        let _lock = RunLock::acquire(self.store.root())?;

        if let Some(parent) = opts.output_dir.parent() {
            fs::create_dir_all(parent).with_context(|| parent.display().to_string())?;
        }
        fs::create_dir(&opts.output_dir)
            .with_context(|| opts.output_dir.display().to_string())?;
        let log_root = opts.output_dir.join("logs");
        fs::create_dir(&log_root).with_context(|| log_root.display().to_string())?;
        if !opts.commit {
            info!("dry run: jobs will not commit and nothing will be merged");
        }

        let runner = StageRunner::new(
            self.config,
            &self.store,
            self.launcher,
            &log_root,
            opts.commit,
        );
        let mut stages = Vec::new();
        for stage in Stage::per_sample_stages(&self.config.callers) {
            stages.push(runner.run(stage, &working_set)?);
            if opts.commit {
                self.link_current(stage, &working_set)?;
            }
        }

        let engine = MergeEngine::new(
            self.config,
            &self.store,
            self.launcher,
            &log_root,
            opts.commit,
        );
        let mut merges = Vec::new();
        for &caller in &self.config.callers {
            let filtered = self.filtered_calls(caller, &working_set);
            merges.push(engine.merge(caller, &filtered, today)?);
            if opts.commit {
                self.link_current_aggregate(caller)?;
            }
        }

        let summary = RunSummary {
            date: today.to_string(),
            commit: opts.commit,
            working_set,
            stages,
            merges,
        };
        let summary_path = opts.output_dir.join(SUMMARY_FILE_NAME);
        let writer = BufWriter::new(
            File::create(&summary_path).with_context(|| summary_path.display().to_string())?,
        );
        serde_json::to_writer_pretty(writer, &summary)
            .with_context(|| summary_path.display().to_string())?;
        info!("run complete, summary written to {}", summary_path.display());
        Ok(summary)
    }

    /// Filtered call sets present for the working set.
    fn filtered_calls(&self, caller: Caller, working_set: &WorkingSet) -> BTreeMap<Sample, PathBuf> {
        let stage = Stage::FilterCalls(caller);
        working_set
            .iter()
            .filter(|s| self.store.exists(s, stage))
            .map(|s| (s.clone(), self.store.path(s, stage)))
            .collect()
    }

    fn link_current(&self, stage: Stage, working_set: &WorkingSet) -> Result<()> {
        for sample in working_set.iter() {
            let Some(link) = self.store.current_link(sample, stage) else {
                continue;
            };
            if self.store.exists(sample, stage) {
                link_relative(&self.store.path(sample, stage), &link)?;
            }
        }
        Ok(())
    }

    fn link_current_aggregate(&self, caller: Caller) -> Result<()> {
        let dir = self.store.stage_dir(Stage::MergeCalls(caller));
        if let Some(current) = find_current_aggregate(&dir, caller)? {
            link_relative(&current, &self.store.current_aggregate_link(caller))?;
        }
        Ok(())
    }
}
