//! Incremental merging of filtered per-sample call sets into a dated aggregate.
//!
//! The newest existing aggregate of a caller is authoritative. Samples its header
//! already declares are never merged again; every other sample of the working set
//! is merged on top of it into a new aggregate, so the sample set only grows.

use crate::artifacts::{copy_into_place, relocate, ArtifactStore};
use crate::jobs::{ensure_success, IndexJob, JobLauncher, MergeJob};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use vp_types::constants::{VCF_FIXED_COLUMNS, VCF_NUM_FIXED_COLUMNS};
use vp_types::{Caller, PipelineConfig, PipelineError, Sample, Stage};

fn corrupt(path: &Path, reason: String) -> anyhow::Error {
    PipelineError::CorruptAggregate {
        path: path.to_path_buf(),
        reason,
    }
    .into()
}

/// Sample columns of a bgzip/gzip-compressed VCF, in header order.
///
/// The `#CHROM` line must start with the nine fixed VCF columns; everything after
/// them is a sample.
pub fn read_sample_columns(path: &Path) -> Result<Vec<Sample>> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let reader = BufReader::new(MultiGzDecoder::new(file));
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading the header of {}", path.display()))?;
        if line.starts_with("##") {
            continue;
        }
        if !line.starts_with('#') {
            break;
        }
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        if fields.len() < VCF_NUM_FIXED_COLUMNS
            || fields[..VCF_NUM_FIXED_COLUMNS] != VCF_FIXED_COLUMNS
        {
            return Err(corrupt(
                path,
                format!(
                    "header does not start with the columns {}",
                    VCF_FIXED_COLUMNS.join(" ")
                ),
            ));
        }
        return Ok(fields[VCF_NUM_FIXED_COLUMNS..]
            .iter()
            .map(|&s| Sample::new(s))
            .collect());
    }
    Err(corrupt(path, "no #CHROM header line".to_string()))
}

/// The set of samples an aggregate already contains. A sample declared twice is fatal.
pub fn aggregate_samples(path: &Path) -> Result<BTreeSet<Sample>> {
    let columns = read_sample_columns(path)?;
    let dups: Vec<_> = columns.iter().duplicates().collect();
    if !dups.is_empty() {
        return Err(corrupt(
            path,
            format!("sample(s) declared more than once: {}", dups.iter().join(", ")),
        ));
    }
    Ok(columns.into_iter().collect())
}

/// The most recently modified aggregate of `caller` in `dir`, if any.
/// Hidden files, such as in-progress merges, are ignored.
pub fn find_current_aggregate(dir: &Path, caller: Caller) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| dir.display().to_string()),
    };
    let prefix = format!("{caller}.");
    let suffix = format!(".{}", Stage::MergeCalls(caller).extension());

    let mut newest: Option<(SystemTime, String, PathBuf)> = None;
    for entry in entries {
        let entry = entry.with_context(|| dir.display().to_string())?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.starts_with(&prefix) || !name.ends_with(&suffix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let candidate = (meta.modified()?, name, entry.path());
        // Equal timestamps fall back to the name, whose date sorts chronologically.
        if newest
            .as_ref()
            .map_or(true, |best| (&candidate.0, &candidate.1) > (&best.0, &best.1))
        {
            newest = Some(candidate);
        }
    }
    Ok(newest.map(|(_, _, path)| path))
}

/// Inputs of one merge, fully determined before anything is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub caller: Caller,
    /// The authoritative previous aggregate.
    pub current: Option<PathBuf>,
    /// Samples `current` already contains.
    pub previous_samples: BTreeSet<Sample>,
    /// Filtered call sets not yet merged, sorted by sample.
    pub new_inputs: Vec<(Sample, PathBuf)>,
    pub output: PathBuf,
}

impl MergePlan {
    /// Files to merge, previous aggregate first.
    pub fn inputs(&self) -> Vec<&Path> {
        self.current
            .iter()
            .map(PathBuf::as_path)
            .chain(self.new_inputs.iter().map(|(_, p)| p.as_path()))
            .collect()
    }

    pub fn expected_samples(&self) -> BTreeSet<Sample> {
        self.previous_samples
            .iter()
            .cloned()
            .chain(self.new_inputs.iter().map(|(s, _)| s.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Every sample of the working set is already in the current aggregate.
    UpToDate { current: Option<PathBuf> },
    /// Planned but not executed.
    DryRun { output: PathBuf, added: Vec<Sample> },
    Merged { path: PathBuf, added: Vec<Sample> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub caller: Caller,
    #[serde(flatten)]
    pub outcome: MergeOutcome,
}

pub struct MergeEngine<'a, L: JobLauncher> {
    config: &'a PipelineConfig,
    store: &'a ArtifactStore,
    launcher: &'a L,
    log_root: PathBuf,
    commit: bool,
}

impl<'a, L: JobLauncher> MergeEngine<'a, L> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a ArtifactStore,
        launcher: &'a L,
        log_root: &Path,
        commit: bool,
    ) -> Self {
        MergeEngine {
            config,
            store,
            launcher,
            log_root: log_root.to_path_buf(),
            commit,
        }
    }

    /// Decide what to merge. `filtered` maps working-set samples to their filtered call sets.
    pub fn plan(
        &self,
        caller: Caller,
        filtered: &BTreeMap<Sample, PathBuf>,
        date: NaiveDate,
    ) -> Result<MergePlan> {
        let merged_dir = self.store.stage_dir(Stage::MergeCalls(caller));
        let current = find_current_aggregate(&merged_dir, caller)?;
        let previous_samples = match &current {
            Some(path) => aggregate_samples(path)?,
            None => BTreeSet::new(),
        };
        let new_inputs = filtered
            .iter()
            .filter(|(sample, _)| !previous_samples.contains(*sample))
            .map(|(sample, path)| (sample.clone(), path.clone()))
            .collect();
        Ok(MergePlan {
            caller,
            current,
            previous_samples,
            new_inputs,
            output: self.store.aggregate_path(caller, date),
        })
    }

    /// Merge every filtered sample not yet in the current aggregate into a new one.
    pub fn merge(
        &self,
        caller: Caller,
        filtered: &BTreeMap<Sample, PathBuf>,
        date: NaiveDate,
    ) -> Result<MergeReport> {
        let plan = self.plan(caller, filtered, date)?;
        let outcome = self.execute(&plan)?;
        Ok(MergeReport { caller, outcome })
    }

    fn execute(&self, plan: &MergePlan) -> Result<MergeOutcome> {
        let caller = plan.caller;
        let added: Vec<Sample> = plan.new_inputs.iter().map(|(s, _)| s.clone()).collect();
        if added.is_empty() {
            info!(
                "merge {caller}: all samples already present in {}",
                plan.current
                    .as_deref()
                    .map_or_else(|| "(no aggregate)".to_string(), |p| p.display().to_string())
            );
            return Ok(MergeOutcome::UpToDate {
                current: plan.current.clone(),
            });
        }
        if plan.output.try_exists()? {
            return Err(PipelineError::PreexistingOutput {
                path: plan.output.clone(),
            }
            .into());
        }

        let stage = Stage::MergeCalls(caller);
        let log_dir = self.log_root.join(stage.name());
        fs::create_dir_all(&log_dir).with_context(|| log_dir.display().to_string())?;
        let file_list = log_dir.join("file_list.txt");
        write_file_list(&file_list, &plan.inputs())?;

        info!(
            "merge {caller}: adding {} samples to {}: {}",
            added.len(),
            plan.current
                .as_deref()
                .map_or_else(|| "a new aggregate".to_string(), |p| p.display().to_string()),
            added.iter().join(",")
        );
        if !self.commit {
            return Ok(MergeOutcome::DryRun {
                output: plan.output.clone(),
                added,
            });
        }

        let tmp = partial_path(&plan.output)?;
        let tmp_index = index_path(&tmp);
        let result = self.build_aggregate(plan, &file_list, &log_dir, &tmp);
        if let Err(err) = result {
            for path in [&tmp, &tmp_index] {
                if let Err(rm_err) = fs::remove_file(path) {
                    if rm_err.kind() != io::ErrorKind::NotFound {
                        warn!("could not remove {}: {rm_err}", path.display());
                    }
                }
            }
            return Err(err);
        }

        // the index lands first so that a visible aggregate always has one
        relocate(&tmp_index, &index_path(&plan.output))?;
        relocate(&tmp, &plan.output)?;
        info!("merge {caller}: wrote {}", plan.output.display());
        Ok(MergeOutcome::Merged {
            path: plan.output.clone(),
            added,
        })
    }

    /// Produce, verify and index the new aggregate at `tmp`.
    fn build_aggregate(
        &self,
        plan: &MergePlan,
        file_list: &Path,
        log_dir: &Path,
        tmp: &Path,
    ) -> Result<()> {
        let stage = Stage::MergeCalls(plan.caller);
        match (plan.current.as_ref(), plan.new_inputs.as_slice()) {
            // a merge needs at least two inputs; a lone sample is the aggregate
            (None, [(_, only)]) => copy_into_place(only, tmp)?,
            _ => {
                let job = MergeJob {
                    program: self.config.tools.merge.clone(),
                    file_list: file_list.to_path_buf(),
                    output: tmp.to_path_buf(),
                    log_dir: log_dir.to_path_buf(),
                    threads: self.config.threads,
                };
                let status = self
                    .launcher
                    .run_merge(&job)
                    .with_context(|| format!("launching the {stage} job"))?;
                ensure_success(&stage.name(), status)?;
            }
        }

        let merged = read_sample_columns(tmp)?;
        let expected = plan.expected_samples();
        let found: BTreeSet<_> = merged.iter().cloned().collect();
        if found.len() != merged.len() || found != expected {
            return Err(PipelineError::AggregateMismatch {
                caller: plan.caller,
                found: merged.len(),
                expected: expected.len(),
            }
            .into());
        }

        let index = IndexJob {
            program: self.config.tools.index.clone(),
            target: tmp.to_path_buf(),
        };
        let status = self
            .launcher
            .run_index(&index)
            .with_context(|| format!("indexing {}", tmp.display()))?;
        ensure_success(&format!("{stage} index"), status)?;
        if !index_path(tmp).is_file() {
            bail!("{stage}: the index job did not write {}", index_path(tmp).display());
        }
        Ok(())
    }
}

/// Hidden in-progress name beside `output`, ignored when looking for aggregates.
fn partial_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .with_context(|| format!("{} has no file name", output.display()))?
        .to_string_lossy();
    let stem = name.strip_suffix(".vcf.gz").unwrap_or(&name);
    Ok(output.with_file_name(format!(".{stem}.partial.vcf.gz")))
}

fn index_path(vcf: &Path) -> PathBuf {
    let mut name = vcf.as_os_str().to_owned();
    name.push(".tbi");
    PathBuf::from(name)
}

fn write_file_list(path: &Path, inputs: &[&Path]) -> Result<()> {
    let mut f = File::create(path).with_context(|| path.display().to_string())?;
    for input in inputs {
        writeln!(f, "{}", input.display())?;
    }
    Ok(())
}
