//! In-process stand-ins for the external jobs, for exercising the orchestration
//! without any aligner, caller or merge tool installed.

use crate::artifacts::artifact_file_name;
use crate::jobs::{IndexJob, JobLauncher, MergeJob, StageJob};
use crate::merge::read_sample_columns;
use crate::post_process::exit_log_path;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use vp_types::constants::VCF_FIXED_COLUMNS;
use vp_types::{Sample, Stage};

/// Write a small gzip-compressed VCF declaring `samples`, with a single record.
pub fn write_vcf_gz<S: AsRef<str>>(path: &Path, samples: &[S]) -> Result<()> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut enc = GzEncoder::new(file, Compression::fast());
    writeln!(enc, "##fileformat=VCFv4.2")?;
    let mut header: Vec<&str> = VCF_FIXED_COLUMNS.to_vec();
    header.extend(samples.iter().map(|s| s.as_ref()));
    writeln!(enc, "{}", header.join("\t"))?;
    write!(enc, "chr1\t10000\t.\tA\tG\t50\tPASS\t.\tGT")?;
    for _ in samples {
        write!(enc, "\t0/1")?;
    }
    writeln!(enc)?;
    enc.finish()?;
    Ok(())
}

fn exit_code(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// Records every job and produces the files a well-behaved job would, unless told to misbehave.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    pub stage_jobs: RefCell<Vec<StageJob>>,
    pub merge_jobs: RefCell<Vec<MergeJob>>,
    pub index_jobs: RefCell<Vec<IndexJob>>,
    /// The job of this stage exits with status 1 without writing anything.
    pub fail_stage: Option<Stage>,
    /// This sample's exit log reports status 1 for this stage.
    pub failing_sample: Option<(Stage, Sample)>,
    /// This sample's artifact is not written for this stage.
    pub skip_output: Option<(Stage, Sample)>,
    pub fail_merge: bool,
    /// The merge silently loses the last sample of its inputs.
    pub drop_last_merged_sample: bool,
}

impl FakeLauncher {
    pub fn stage_calls(&self) -> usize {
        self.stage_jobs.borrow().len()
    }

    pub fn merge_calls(&self) -> usize {
        self.merge_jobs.borrow().len()
    }

    /// Samples each invocation of `stage` was asked for, in invocation order.
    pub fn requested(&self, stage: Stage) -> Vec<Vec<String>> {
        self.stage_jobs
            .borrow()
            .iter()
            .filter(|job| job.stage == stage)
            .map(|job| job.samples.iter().map(ToString::to_string).collect())
            .collect()
    }

    fn matches(target: &Option<(Stage, Sample)>, stage: Stage, sample: &Sample) -> bool {
        target
            .as_ref()
            .is_some_and(|(s, id)| *s == stage && id == sample)
    }

    fn write_artifact(job: &StageJob, sample: &Sample) -> Result<()> {
        let stage = job.stage;
        let artifact = job
            .output_dir
            .join(artifact_file_name(sample, stage.extension()));
        let index = job
            .output_dir
            .join(artifact_file_name(sample, stage.index_extension()));
        match stage {
            Stage::Align => fs::write(&artifact, format!("BAM {sample}"))?,
            _ => write_vcf_gz(&artifact, &[sample])?,
        }
        fs::write(index, "index")?;
        Ok(())
    }
}

impl JobLauncher for FakeLauncher {
    fn run_stage(&self, job: &StageJob) -> Result<ExitStatus> {
        self.stage_jobs.borrow_mut().push(job.clone());
        if self.fail_stage == Some(job.stage) {
            return Ok(exit_code(1));
        }
        if !job.commit {
            return Ok(exit_code(0));
        }
        for sample in &job.samples {
            if !Self::matches(&self.skip_output, job.stage, sample) {
                Self::write_artifact(job, sample)?;
            }
            let status = if Self::matches(&self.failing_sample, job.stage, sample) {
                1
            } else {
                0
            };
            fs::write(exit_log_path(&job.log_dir, sample), format!("{status}\n"))?;
        }
        Ok(exit_code(0))
    }

    fn run_merge(&self, job: &MergeJob) -> Result<ExitStatus> {
        self.merge_jobs.borrow_mut().push(job.clone());
        if self.fail_merge {
            return Ok(exit_code(1));
        }
        let list = fs::read_to_string(&job.file_list)?;
        let mut samples = Vec::new();
        for input in list.lines().filter(|l| !l.is_empty()) {
            samples.extend(read_sample_columns(&PathBuf::from(input))?);
        }
        if self.drop_last_merged_sample {
            samples.pop();
        }
        write_vcf_gz(&job.output, &samples)?;
        Ok(exit_code(0))
    }

    fn run_index(&self, job: &IndexJob) -> Result<ExitStatus> {
        self.index_jobs.borrow_mut().push(job.clone());
        let mut index = job.target.clone().into_os_string();
        index.push(".tbi");
        fs::write(PathBuf::from(index), "index")?;
        Ok(exit_code(0))
    }
}
