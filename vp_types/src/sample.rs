use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use strum_macros::{EnumIter, IntoStaticStr};

/// An opaque identifier naming one unit of work.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(String);

impl Sample {
    pub fn new(id: impl Into<String>) -> Self {
        Sample(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sample {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sample {
    fn from(id: &str) -> Self {
        Sample::new(id)
    }
}

/// The variant callers this pipeline knows how to post-process.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "&'static str")]
#[strum(serialize_all = "lowercase")]
pub enum Caller {
    Gatk,
    Freebayes,
    Deepvariant,
}

impl Caller {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl Display for Caller {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Caller {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Caller, PipelineError> {
        use strum::IntoEnumIterator;
        Caller::iter()
            .find(|caller| caller.name() == s)
            .ok_or_else(|| PipelineError::UnknownCaller(s.to_string()))
    }
}

impl TryFrom<String> for Caller {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Caller, PipelineError> {
        s.parse()
    }
}

/// One step of the pipeline. Caller-parameterized stages of different callers
/// never share an output directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Align,
    CallRaw(Caller),
    FilterCalls(Caller),
    MergeCalls(Caller),
}

impl Stage {
    /// The per-sample stages in execution order: alignment first, then raw calling and
    /// filtering for each caller. Merging is driven separately.
    pub fn per_sample_stages(callers: &[Caller]) -> Vec<Stage> {
        std::iter::once(Stage::Align)
            .chain(
                callers
                    .iter()
                    .flat_map(|&c| [Stage::CallRaw(c), Stage::FilterCalls(c)]),
            )
            .collect()
    }

    pub fn caller(self) -> Option<Caller> {
        match self {
            Stage::Align => None,
            Stage::CallRaw(c) | Stage::FilterCalls(c) | Stage::MergeCalls(c) => Some(c),
        }
    }

    /// Name used for log directories and job names, e.g. `call_raw.gatk`.
    pub fn name(self) -> String {
        match self {
            Stage::Align => "align".to_string(),
            Stage::CallRaw(c) => format!("call_raw.{c}"),
            Stage::FilterCalls(c) => format!("filter_calls.{c}"),
            Stage::MergeCalls(c) => format!("merge_calls.{c}"),
        }
    }

    /// Extension of the artifact file, without a leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Stage::Align => "bam",
            Stage::CallRaw(_) | Stage::FilterCalls(_) | Stage::MergeCalls(_) => "vcf.gz",
        }
    }

    /// Extension of the companion index written next to every artifact.
    pub fn index_extension(self) -> &'static str {
        match self {
            Stage::Align => "bam.bai",
            Stage::CallRaw(_) | Stage::FilterCalls(_) | Stage::MergeCalls(_) => "vcf.gz.tbi",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
