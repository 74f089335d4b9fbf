//! Canonical locations of every artifact, plus the filesystem helpers that move
//! finished files into those locations and mirror them into the flat "current" view.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use vp_types::constants::{AGGREGATE_DATE_FORMAT, CURRENT_VIEW_DIR, PARTIAL_DIR};
use vp_types::{Caller, Sample, Stage};

/// Maps (sample, stage) pairs to paths under a single root. Existence of an
/// artifact at its canonical path is the only record that a stage finished.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every artifact of `stage`. Distinct for every (stage, caller).
    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Align => self.root.join("align"),
            Stage::CallRaw(c) => self.caller_dir(c).join("raw"),
            Stage::FilterCalls(c) => self.caller_dir(c).join("filtered"),
            Stage::MergeCalls(c) => self.caller_dir(c).join("merged"),
        }
    }

    fn caller_dir(&self, caller: Caller) -> PathBuf {
        self.root.join("calls").join(caller.name())
    }

    /// Staging directory that jobs writing beside the canonical tree use.
    pub fn staging_dir(&self, stage: Stage) -> PathBuf {
        self.stage_dir(stage).join(PARTIAL_DIR)
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join(CURRENT_VIEW_DIR)
    }

    pub fn path(&self, sample: &Sample, stage: Stage) -> PathBuf {
        self.stage_dir(stage)
            .join(artifact_file_name(sample, stage.extension()))
    }

    pub fn index_path(&self, sample: &Sample, stage: Stage) -> PathBuf {
        self.stage_dir(stage)
            .join(artifact_file_name(sample, stage.index_extension()))
    }

    pub fn exists(&self, sample: &Sample, stage: Stage) -> bool {
        self.path(sample, stage).is_file()
    }

    /// The samples lacking the artifact of `stage`, in iteration order.
    pub fn missing<'s>(
        &self,
        stage: Stage,
        samples: impl IntoIterator<Item = &'s Sample>,
    ) -> Vec<Sample> {
        samples
            .into_iter()
            .filter(|sample| !self.exists(sample, stage))
            .cloned()
            .collect()
    }

    /// Path of the aggregate created for `caller` on `date`.
    pub fn aggregate_path(&self, caller: Caller, date: NaiveDate) -> PathBuf {
        self.stage_dir(Stage::MergeCalls(caller)).join(format!(
            "{caller}.{}.{}",
            date.format(AGGREGATE_DATE_FORMAT),
            Stage::MergeCalls(caller).extension()
        ))
    }

    /// Where the flat view exposes a per-sample artifact, if the stage is mirrored at all.
    /// Raw calls are intermediate and are not mirrored.
    pub fn current_link(&self, sample: &Sample, stage: Stage) -> Option<PathBuf> {
        let name = match stage {
            Stage::Align => artifact_file_name(sample, stage.extension()),
            Stage::FilterCalls(c) => format!("{sample}.{c}.{}", stage.extension()),
            Stage::CallRaw(_) | Stage::MergeCalls(_) => return None,
        };
        Some(self.current_dir().join(name))
    }

    /// Where the flat view exposes the newest aggregate of `caller`.
    pub fn current_aggregate_link(&self, caller: Caller) -> PathBuf {
        self.current_dir().join(format!(
            "{caller}.merged.{}",
            Stage::MergeCalls(caller).extension()
        ))
    }

    /// Create every directory of the hierarchy. Directories that already exist are fine.
    pub fn create_layout(&self, callers: &[Caller]) -> Result<()> {
        let dirs = std::iter::once(self.current_dir()).chain(
            Stage::per_sample_stages(callers)
                .into_iter()
                .chain(callers.iter().map(|&c| Stage::MergeCalls(c)))
                .map(|stage| self.stage_dir(stage)),
        );
        for dir in dirs {
            fs::create_dir_all(&dir).with_context(|| dir.display().to_string())?;
        }
        Ok(())
    }
}

/// `{sample}.{ext}`, the naming convention shared with the external jobs.
pub fn artifact_file_name(sample: &Sample, ext: &str) -> String {
    format!("{sample}.{ext}")
}

/// Resolve `.` and `..` components without touching the filesystem.
/// A trailing separator is insignificant.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out.iter().collect()
}

/// Relative path that, joined onto `from_dir`, names the same location as `to`.
///
/// Both paths must be absolute, or both relative to the same base. Shared leading
/// segments are collapsed and one `..` is emitted for every remaining segment of
/// `from_dir`.
pub fn relative_path(from_dir: &Path, to: &Path) -> Result<PathBuf> {
    if from_dir.is_absolute() != to.is_absolute() {
        bail!(
            "cannot relate {} to {}: one path is absolute and the other is not",
            to.display(),
            from_dir.display()
        );
    }
    let from = lexical_normalize(from_dir);
    let to = lexical_normalize(to);
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();

    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    // climbing out of an unnamed parent of from_dir has no relative answer
    if from[common..].contains(&Component::ParentDir) {
        bail!(
            "cannot relate {} to {}: the directory climbs above its base",
            to.iter().collect::<PathBuf>().display(),
            from.iter().collect::<PathBuf>().display()
        );
    }

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for c in &to[common..] {
        rel.push(c);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Ok(rel)
}

/// Point `link` at `target` with a relative symlink, replacing any previous link.
pub fn link_relative(target: &Path, link: &Path) -> Result<()> {
    let Some(link_dir) = link.parent() else {
        bail!("symlink path {} has no parent directory", link.display());
    };
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(link).with_context(|| link.display().to_string())?;
        }
        Ok(_) => bail!(
            "refusing to replace {} with a symlink: it is not a symlink",
            link.display()
        ),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).with_context(|| link.display().to_string()),
    }
    let rel = relative_path(link_dir, target)?;
    std::os::unix::fs::symlink(&rel, link)
        .with_context(|| format!("linking {} -> {}", link.display(), rel.display()))
}

/// Move a finished file to its final path so that the destination appears whole or not at all.
///
/// Within one filesystem this is a rename. Across filesystems the data is copied into a
/// temporary file in the destination directory, which is then renamed into place.
pub fn relocate(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
            copy_into_place(src, dst)?;
            fs::remove_file(src).with_context(|| src.display().to_string())
        }
        Err(err) => Err(err)
            .with_context(|| format!("moving {} to {}", src.display(), dst.display())),
    }
}

/// Copy `src` to `dst` through a temporary file in the destination directory.
pub fn copy_into_place(src: &Path, dst: &Path) -> Result<()> {
    let Some(dir) = dst.parent() else {
        bail!("destination {} has no parent directory", dst.display());
    };
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| dir.display().to_string())?;
    let mut reader = File::open(src).with_context(|| src.display().to_string())?;
    io::copy(&mut reader, tmp.as_file_mut())
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst)
        .with_context(|| format!("persisting {}", dst.display()))?;
    Ok(())
}
