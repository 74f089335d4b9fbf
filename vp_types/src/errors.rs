#![deny(missing_docs)]
//! Fatal conditions recognized by the pipeline.
//!
//! These are raised inside `anyhow::Error` so that context can be attached on the way up;
//! use `downcast_ref::<PipelineError>()` to recover the specific kind.

use crate::sample::{Caller, Sample};
use std::path::PathBuf;

/// Every fatal inconsistency the orchestrator can detect.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The manifest lists the same identifier more than once.
    #[error("sample {sample} is listed more than once in the manifest {}", .manifest.display())]
    DuplicateSample {
        /// Repeated identifier.
        sample: Sample,
        /// Manifest being read.
        manifest: PathBuf,
    },

    /// A manifest identifier cannot be used as a sample name.
    #[error("sample identifier '{sample}' on line {line} of the manifest is invalid: {reason}")]
    InvalidSample {
        /// Offending identifier.
        sample: String,
        /// Manifest line, counting the header.
        line: usize,
        /// Which rule it breaks.
        reason: &'static str,
    },

    /// An explicitly requested sample is absent from the manifest.
    #[error("requested sample(s) not found in the manifest: {}", .samples.join(", "))]
    UnknownSample {
        /// Every unknown identifier, in request order.
        samples: Vec<String>,
    },

    /// An explicitly requested sample lacks its raw inputs.
    #[error("requested sample {sample} is missing required input {}", .path.display())]
    MissingPrerequisite {
        /// Offending sample.
        sample: Sample,
        /// First missing input.
        path: PathBuf,
    },

    /// The run directory must not exist before the run.
    #[error("output directory {} already exists", .path.display())]
    OutputDirExists {
        /// Directory given on the command line.
        path: PathBuf,
    },

    /// A configured external program cannot be found or is not executable.
    #[error("{role} tool '{program}' was not found or is not executable")]
    MissingTool {
        /// What the tool is used for.
        role: &'static str,
        /// The configured program.
        program: String,
    },

    /// The configuration names a caller that has no post-processing defined.
    #[error("unknown variant caller '{0}'")]
    UnknownCaller(String),

    /// An external job terminated unsuccessfully.
    #[error("{job} job exited with status {}", describe_code(.code))]
    JobFailed {
        /// Job name.
        job: String,
        /// Exit code, if the job was not killed by a signal.
        code: Option<i32>,
    },

    /// A per-sample exit log reports a non-zero status even though the job succeeded.
    #[error("{stage} reported exit status {status} for sample {sample} in {}", .log.display())]
    FailedExitLog {
        /// Stage name.
        stage: String,
        /// Offending sample.
        sample: Sample,
        /// Reported status.
        status: i32,
        /// Log file inspected.
        log: PathBuf,
    },

    /// A per-sample exit log is absent or unreadable after a successful job.
    #[error("{stage} produced no usable exit log for sample {sample} at {}", .log.display())]
    MissingExitLog {
        /// Stage name.
        stage: String,
        /// Offending sample.
        sample: Sample,
        /// Expected log path.
        log: PathBuf,
    },

    /// An expected output is absent after a job claimed success.
    #[error("{stage} did not produce {} for sample {sample}", .path.display())]
    MissingOutput {
        /// Stage name.
        stage: String,
        /// Offending sample.
        sample: Sample,
        /// Expected file.
        path: PathBuf,
    },

    /// A previous aggregate has a malformed or inconsistent header.
    #[error("aggregate {} is corrupt: {reason}", .path.display())]
    CorruptAggregate {
        /// Aggregate file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// The new aggregate's name is already taken.
    #[error("aggregate {} already exists; remove or rename it before merging again today", .path.display())]
    PreexistingOutput {
        /// Colliding path.
        path: PathBuf,
    },

    /// The merge result does not contain exactly the expected samples.
    #[error("merged {caller} aggregate declares {found} samples, expected {expected}")]
    AggregateMismatch {
        /// Caller whose aggregate was merged.
        caller: Caller,
        /// Sample count declared by the new aggregate.
        found: usize,
        /// Previous plus newly merged samples.
        expected: usize,
    },

    /// Another run holds the artifact hierarchy lock.
    #[error("another run holds the lock on {}", .path.display())]
    LockHeld {
        /// Lock file.
        path: PathBuf,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}
