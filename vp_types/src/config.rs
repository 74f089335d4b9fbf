//! Installation-specific parameters, loaded once from a TOML file and passed by
//! reference to every component.

use crate::sample::{Caller, Sample};
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_threads() -> usize {
    4
}

fn default_callers() -> Vec<Caller> {
    vec![Caller::Gatk]
}

fn default_read1_suffix() -> String {
    "_R1.fastq.gz".to_string()
}

fn default_read2_suffix() -> String {
    "_R2.fastq.gz".to_string()
}

/// External programs invoked by the pipeline. Bare names are looked up on the PATH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolPaths {
    pub align: PathBuf,
    pub call: PathBuf,
    pub filter: PathBuf,
    pub merge: PathBuf,
    pub index: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            align: "varpipe-align".into(),
            call: "varpipe-call".into(),
            filter: "varpipe-filter".into(),
            merge: "bcftools".into(),
            index: "tabix".into(),
        }
    }
}

impl ToolPaths {
    /// Every configured tool paired with the role it plays.
    pub fn roles(&self) -> [(&'static str, &Path); 5] {
        [
            ("align", &self.align),
            ("call", &self.call),
            ("filter", &self.filter),
            ("merge", &self.merge),
            ("index", &self.index),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Reference genome FASTA handed to the alignment and calling jobs.
    pub reference: PathBuf,
    /// Root of the canonical artifact hierarchy.
    pub artifact_root: PathBuf,
    /// Directory holding the raw paired inputs of every sample.
    pub raw_dir: PathBuf,
    /// Fast scratch storage used as a work directory by some jobs.
    pub scratch_dir: PathBuf,
    /// Worker count passed through to every external job.
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_callers")]
    pub callers: Vec<Caller>,
    #[serde(default = "default_read1_suffix")]
    pub read1_suffix: String,
    #[serde(default = "default_read2_suffix")]
    pub read2_suffix: String,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl PipelineConfig {
    /// Read and validate a config file. Relative paths are resolved against the
    /// directory containing the file.
    pub fn load(path: &Path) -> Result<PipelineConfig> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        PipelineConfig::from_toml_str(&s, base_dir)
            .with_context(|| format!("error in config file {}", path.display()))
    }

    pub fn from_toml_str(s: &str, base_dir: &Path) -> Result<PipelineConfig> {
        let mut config: PipelineConfig = toml::from_str(s)?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for dir in [
            &mut self.reference,
            &mut self.artifact_root,
            &mut self.raw_dir,
            &mut self.scratch_dir,
        ] {
            if dir.is_relative() {
                *dir = base_dir.join(&*dir);
            }
        }
        // Tools given as bare names stay bare so they are found on the PATH.
        for tool in [
            &mut self.tools.align,
            &mut self.tools.call,
            &mut self.tools.filter,
            &mut self.tools.merge,
            &mut self.tools.index,
        ] {
            if tool.is_relative() && tool.components().count() > 1 {
                *tool = base_dir.join(&*tool);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.threads > 0, "threads must be at least 1");
        ensure!(!self.callers.is_empty(), "at least one caller is required");
        let dups: Vec<_> = self.callers.iter().duplicates().collect();
        ensure!(
            dups.is_empty(),
            "callers are listed more than once: {}",
            dups.iter().join(", ")
        );
        ensure!(
            !self.read1_suffix.is_empty()
                && !self.read2_suffix.is_empty()
                && self.read1_suffix != self.read2_suffix,
            "read1_suffix and read2_suffix must be distinct and non-empty"
        );
        Ok(())
    }

    /// The raw paired inputs a sample needs before it can be aligned.
    pub fn raw_inputs(&self, sample: &Sample) -> [PathBuf; 2] {
        [
            self.raw_dir.join(format!("{sample}{}", self.read1_suffix)),
            self.raw_dir.join(format!("{sample}{}", self.read2_suffix)),
        ]
    }
}
