//! Selection of the samples a run works on.

use anyhow::Result;
use itertools::Itertools;
use log::warn;
use serde::Serialize;
use std::collections::BTreeSet;
use vp_types::constants::MANIFEST_SENTINEL_SAMPLE;
use vp_types::manifest::Manifest;
use vp_types::{PipelineConfig, PipelineError, Sample};

/// The samples selected for the current run, in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkingSet {
    samples: BTreeSet<Sample>,
}

impl WorkingSet {
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, sample: &Sample) -> bool {
        self.samples.contains(sample)
    }
}

impl FromIterator<Sample> for WorkingSet {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        WorkingSet {
            samples: iter.into_iter().collect(),
        }
    }
}

/// Identifiers become file names and are passed to jobs as a comma-separated list.
fn invalid_id_reason(id: &str) -> Option<&'static str> {
    if id.contains(',') {
        Some("it contains ','")
    } else if id.contains('/') {
        Some("it contains '/'")
    } else if id.starts_with('.') {
        Some("it starts with '.'")
    } else if id.chars().any(char::is_control) {
        Some("it contains a control character")
    } else {
        None
    }
}

/// Read-only: nothing is created or modified while resolving.
pub struct SampleSetResolver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> SampleSetResolver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        SampleSetResolver { config }
    }

    /// Every real sample of the manifest. Placeholder rows are skipped and a
    /// repeated identifier is fatal.
    pub fn manifest_samples(&self, manifest: &Manifest) -> Result<BTreeSet<Sample>> {
        let mut samples = BTreeSet::new();
        for row in manifest.rows() {
            if row.sample_id == MANIFEST_SENTINEL_SAMPLE {
                continue;
            }
            if row.sample_id.is_empty() {
                warn!(
                    "{}: line {} has an empty sampleID, skipping",
                    manifest.path().display(),
                    row.line
                );
                continue;
            }
            if let Some(reason) = invalid_id_reason(&row.sample_id) {
                return Err(PipelineError::InvalidSample {
                    sample: row.sample_id.clone(),
                    line: row.line,
                    reason,
                }
                .into());
            }
            let sample = Sample::new(row.sample_id.as_str());
            if samples.contains(&sample) {
                return Err(PipelineError::DuplicateSample {
                    sample,
                    manifest: manifest.path().to_path_buf(),
                }
                .into());
            }
            samples.insert(sample);
        }
        Ok(samples)
    }

    /// Produce the working set from the manifest and an optional explicit inclusion list.
    ///
    /// Samples lacking raw inputs are dropped with a warning, unless they were
    /// explicitly requested, in which case resolution fails.
    pub fn resolve(&self, manifest: &Manifest, explicit: Option<&[String]>) -> Result<WorkingSet> {
        let known = self.manifest_samples(manifest)?;

        let (candidates, is_explicit) = match explicit {
            Some(requested) => {
                for dup in requested.iter().duplicates() {
                    warn!("sample {dup} was requested more than once");
                }
                let unknown: Vec<String> = requested
                    .iter()
                    .unique()
                    .filter(|id| !known.contains(&Sample::new(id.as_str())))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(PipelineError::UnknownSample { samples: unknown }.into());
                }
                let chosen: BTreeSet<Sample> =
                    requested.iter().map(|id| Sample::new(id.as_str())).collect();
                (chosen, true)
            }
            None => (known, false),
        };

        let mut working_set = BTreeSet::new();
        for sample in candidates {
            let missing = self
                .config
                .raw_inputs(&sample)
                .into_iter()
                .find(|path| !path.is_file());
            match missing {
                None => {
                    working_set.insert(sample);
                }
                Some(path) if is_explicit => {
                    return Err(PipelineError::MissingPrerequisite { sample, path }.into());
                }
                Some(path) => {
                    warn!(
                        "sample {sample} is missing input {}, skipping it",
                        path.display()
                    );
                }
            }
        }
        Ok(WorkingSet {
            samples: working_set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
        manifest: Manifest,
    }

    /// A manifest listing `ids`, with raw inputs present for `with_inputs`.
    fn fixture(ids: &[&str], with_inputs: &[&str]) -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let config = PipelineConfig::from_toml_str(
            r#"
reference = "ref.fa"
artifact_root = "store"
raw_dir = "raw"
scratch_dir = "scratch"
"#,
            dir.path(),
        )?;
        fs::create_dir_all(&config.raw_dir)?;
        for id in with_inputs {
            for path in config.raw_inputs(&Sample::new(*id)) {
                fs::write(path, "@r\nACGT\n+\nIIII\n")?;
            }
        }
        let manifest_path = dir.path().join("manifest.tsv");
        let body: String = ids.iter().map(|id| format!("{id}\tfam\n")).collect();
        fs::write(&manifest_path, format!("sampleID\tfamily\n{body}"))?;
        let manifest = Manifest::read(&manifest_path)?;
        Ok(Fixture {
            _dir: dir,
            config,
            manifest,
        })
    }

    fn ids(ws: &WorkingSet) -> Vec<&str> {
        ws.iter().map(Sample::as_str).collect()
    }

    fn requested(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_full_manifest_skips_sentinel_and_prunes() -> Result<()> {
        let f = fixture(&["C", "0", "A", "B", "0"], &["A", "B"])?;
        let ws = SampleSetResolver::new(&f.config).resolve(&f.manifest, None)?;
        // C lacks raw inputs and was not requested explicitly
        assert_eq!(ids(&ws), ["A", "B"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_manifest_sample() -> Result<()> {
        let f = fixture(&["A", "B", "A"], &["A", "B"])?;
        let err = SampleSetResolver::new(&f.config)
            .resolve(&f.manifest, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DuplicateSample { sample, .. }) if sample.as_str() == "A"
        ));
        Ok(())
    }

    #[test]
    fn test_explicit_list() -> Result<()> {
        let f = fixture(&["A", "B", "C"], &["A", "B", "C"])?;
        let resolver = SampleSetResolver::new(&f.config);
        let ws = resolver.resolve(&f.manifest, Some(&requested(&["C", "A", "C"])))?;
        assert_eq!(ids(&ws), ["A", "C"]);
        Ok(())
    }

    #[test]
    fn test_unknown_explicit_sample_touches_nothing() -> Result<()> {
        let f = fixture(&["A", "B", "C"], &["A", "B", "C"])?;
        let before: Vec<_> = fs::read_dir(f._dir.path())?.collect::<Result<_, _>>()?;
        let err = SampleSetResolver::new(&f.config)
            .resolve(&f.manifest, Some(&requested(&["B", "D"])))
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::UnknownSample { samples }) => assert_eq!(samples, &["D"]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains('D'));
        let after: Vec<_> = fs::read_dir(f._dir.path())?.collect::<Result<_, _>>()?;
        assert_eq!(before.len(), after.len());
        assert!(!Path::new(&f.config.artifact_root).exists());
        Ok(())
    }

    #[test]
    fn test_explicit_sample_missing_prerequisite() -> Result<()> {
        let f = fixture(&["A", "B"], &["A"])?;
        let err = SampleSetResolver::new(&f.config)
            .resolve(&f.manifest, Some(&requested(&["A", "B"])))
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingPrerequisite { sample, path }) => {
                assert_eq!(sample.as_str(), "B");
                assert!(path.ends_with("B_R1.fastq.gz"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_identifiers() -> Result<()> {
        for bad in ["X,Y", "a/b", "..", ".hidden"] {
            let f = fixture(&["A", bad], &["A"])?;
            let err = SampleSetResolver::new(&f.config)
                .resolve(&f.manifest, None)
                .unwrap_err();
            match err.downcast_ref::<PipelineError>() {
                Some(PipelineError::InvalidSample { sample, line, .. }) => {
                    assert_eq!(sample, bad);
                    assert_eq!(*line, 3);
                }
                other => panic!("{bad}: unexpected error {other:?}"),
            }
        }
        // dots and dashes inside a name are fine
        let f = fixture(&["NA12878-rep.2"], &["NA12878-rep.2"])?;
        let ws = SampleSetResolver::new(&f.config).resolve(&f.manifest, None)?;
        assert_eq!(ids(&ws), ["NA12878-rep.2"]);
        Ok(())
    }

    #[test]
    fn test_sentinel_cannot_be_requested() -> Result<()> {
        let f = fixture(&["A", "0"], &["A"])?;
        let err = SampleSetResolver::new(&f.config)
            .resolve(&f.manifest, Some(&requested(&["0"])))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownSample { .. })
        ));
        Ok(())
    }
}
