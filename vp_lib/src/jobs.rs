//! Structured invocation of the external transformation jobs.
//!
//! Every job is described by a plain request struct that renders to an explicit
//! argument vector; nothing goes through a shell.

use crate::tools::check_tools;
use anyhow::{Context, Result};
use itertools::Itertools;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use vp_types::{PipelineConfig, PipelineError, Sample, Stage};

/// One invocation of a per-sample stage job.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub stage: Stage,
    pub program: PathBuf,
    /// Exactly the samples to (re)compute.
    pub samples: Vec<Sample>,
    pub input_dir: PathBuf,
    pub reference: PathBuf,
    /// Work directory the job writes `{sample}.{ext}` files into.
    pub output_dir: PathBuf,
    /// Directory for per-sample exit logs and the job's own stdout/stderr.
    pub log_dir: PathBuf,
    pub threads: usize,
    /// When false the job only reports what it would do.
    pub commit: bool,
}

impl StageJob {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(caller) = self.stage.caller() {
            args.push("--caller".into());
            args.push(caller.name().into());
        }
        args.push("--samples".into());
        args.push(self.samples.iter().join(",").into());
        for (flag, path) in [
            ("--input-dir", &self.input_dir),
            ("--reference", &self.reference),
            ("--output-dir", &self.output_dir),
            ("--log-dir", &self.log_dir),
        ] {
            args.push(flag.into());
            args.push(path.into());
        }
        args.push("--threads".into());
        args.push(self.threads.to_string().into());
        if self.commit {
            args.push("--commit".into());
        }
        args
    }
}

/// Merge of an aggregate and new per-sample call sets, streamed into `output`.
#[derive(Debug, Clone)]
pub struct MergeJob {
    pub program: PathBuf,
    /// File listing the inputs, one per line, previous aggregate first.
    pub file_list: PathBuf,
    pub output: PathBuf,
    pub log_dir: PathBuf,
    pub threads: usize,
}

impl MergeJob {
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "merge".into(),
            "--file-list".into(),
            self.file_list.clone().into(),
            "--output-type".into(),
            "z".into(),
            "--threads".into(),
            self.threads.to_string().into(),
        ]
    }
}

/// Builds a random-access index next to a compressed call set.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub program: PathBuf,
    pub target: PathBuf,
}

impl IndexJob {
    pub fn args(&self) -> Vec<OsString> {
        vec!["-f".into(), "-p".into(), "vcf".into(), self.target.clone().into()]
    }
}

/// Runs external jobs. The orchestrator only inspects the returned exit status.
pub trait JobLauncher {
    /// Verify that the jobs can be launched at all, before anything is mutated.
    fn preflight(&self, _config: &PipelineConfig) -> Result<()> {
        Ok(())
    }

    fn run_stage(&self, job: &StageJob) -> Result<ExitStatus>;

    fn run_merge(&self, job: &MergeJob) -> Result<ExitStatus>;

    fn run_index(&self, job: &IndexJob) -> Result<ExitStatus>;
}

/// Launches jobs as child processes and waits for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

fn log_file(dir: &Path, name: &str) -> Result<File> {
    let path = dir.join(name);
    File::create(&path).with_context(|| path.display().to_string())
}

fn describe(program: &Path, args: &[OsString]) -> String {
    format!(
        "{} {}",
        program.display(),
        args.iter().map(|a| a.to_string_lossy()).join(" ")
    )
}

impl JobLauncher for ProcessLauncher {
    fn preflight(&self, config: &PipelineConfig) -> Result<()> {
        check_tools(&config.tools)
    }

    fn run_stage(&self, job: &StageJob) -> Result<ExitStatus> {
        let args = job.args();
        Command::new(&job.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(log_file(&job.log_dir, "job.stdout")?)
            .stderr(log_file(&job.log_dir, "job.stderr")?)
            .status()
            .with_context(|| format!("running {}", describe(&job.program, &args)))
    }

    fn run_merge(&self, job: &MergeJob) -> Result<ExitStatus> {
        let args = job.args();
        let output =
            File::create(&job.output).with_context(|| job.output.display().to_string())?;
        Command::new(&job.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(log_file(&job.log_dir, "merge.stderr")?)
            .status()
            .with_context(|| format!("running {}", describe(&job.program, &args)))
    }

    fn run_index(&self, job: &IndexJob) -> Result<ExitStatus> {
        let args = job.args();
        let output = Command::new(&job.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running {}", describe(&job.program, &args)))?;
        if !output.status.success() {
            log::error!(
                "{}: {}",
                describe(&job.program, &args),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        Ok(output.status)
    }
}

/// Turn an unsuccessful exit status into a fatal `JobFailed` error.
pub fn ensure_success(job: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::JobFailed {
            job: job.to_string(),
            code: status.code(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use vp_types::Caller;

    fn args_to_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_stage_job_args() {
        let job = StageJob {
            stage: Stage::CallRaw(Caller::Freebayes),
            program: "/opt/call".into(),
            samples: vec![Sample::new("A"), Sample::new("B; rm -rf /")],
            input_dir: "/store/align".into(),
            reference: "/ref/g.fa".into(),
            output_dir: "/scratch/call_raw.freebayes".into(),
            log_dir: "/run/logs/call_raw.freebayes".into(),
            threads: 8,
            commit: true,
        };
        assert_eq!(
            args_to_strings(job.args()),
            [
                "--caller",
                "freebayes",
                "--samples",
                "A,B; rm -rf /",
                "--input-dir",
                "/store/align",
                "--reference",
                "/ref/g.fa",
                "--output-dir",
                "/scratch/call_raw.freebayes",
                "--log-dir",
                "/run/logs/call_raw.freebayes",
                "--threads",
                "8",
                "--commit",
            ]
        );

        let dry = StageJob {
            stage: Stage::Align,
            commit: false,
            ..job
        };
        let args = args_to_strings(dry.args());
        assert_eq!(args[0], "--samples");
        assert!(!args.contains(&"--commit".to_string()));
    }

    #[test]
    fn test_ensure_success() {
        assert!(ensure_success("align", ExitStatus::from_raw(0)).is_ok());
        // raw wait status: exit code 3
        let err = ensure_success("align", ExitStatus::from_raw(3 << 8)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::JobFailed { code: Some(3), .. })
        ));
    }

    #[test]
    fn test_process_launcher_runs_stage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let job = StageJob {
            stage: Stage::Align,
            program: "echo".into(),
            samples: vec![Sample::new("S1")],
            input_dir: dir.path().into(),
            reference: dir.path().join("ref.fa"),
            output_dir: dir.path().into(),
            log_dir: dir.path().into(),
            threads: 1,
            commit: false,
        };
        let status = ProcessLauncher.run_stage(&job)?;
        assert!(status.success());
        let stdout = std::fs::read_to_string(dir.path().join("job.stdout"))?;
        assert!(stdout.starts_with("--samples S1"));
        Ok(())
    }
}
