//! Reader for sample manifests: CSV (`.csv`) or tab-separated (anything else)
//! files with a `sampleID` column.

use crate::constants::MANIFEST_SAMPLE_COLUMN;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// One data row of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    /// 1-based line number in the file, counting the header.
    pub line: usize,
    pub sample_id: String,
}

#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn read(path: &Path) -> Result<Manifest> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
            _ => b'\t',
        };
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(BufReader::new(file));

        let mut headers = rdr
            .headers()
            .with_context(|| path.display().to_string())?
            .clone();
        headers.trim();
        let Some(col) = headers.iter().position(|h| h == MANIFEST_SAMPLE_COLUMN) else {
            bail!(
                "The manifest '{}' must contain a column named '{MANIFEST_SAMPLE_COLUMN}', \
                 but it was not found. Please check the headers in the file.",
                path.display()
            );
        };

        let mut rows = Vec::new();
        for result in rdr.records() {
            let mut record = result.with_context(|| path.display().to_string())?;
            record.trim();
            let line = record.position().map_or(0, |p| p.line() as usize);
            let Some(sample_id) = record.get(col) else {
                bail!(
                    "Error in manifest '{}'. On line {line}: row has no '{MANIFEST_SAMPLE_COLUMN}' field",
                    path.display()
                );
            };
            rows.push(ManifestRow {
                line,
                sample_id: sample_id.to_string(),
            });
        }
        Ok(Manifest {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows in file order.
    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    #[test]
    fn test_read_tsv_and_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tsv = dir.path().join("samples.tsv");
        write(&tsv, "family\tsampleID\tsex\nF1\tA \tM\nF1\t0\tF\n# note\nF2\tB\tF\n")?;
        let manifest = Manifest::read(&tsv)?;
        let ids: Vec<_> = manifest.rows().iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(ids, ["A", "0", "B"]);
        assert_eq!(manifest.rows()[0].line, 2);

        let csv = dir.path().join("samples.csv");
        write(&csv, "sampleID,notes\nC,x\n")?;
        assert_eq!(Manifest::read(&csv)?.rows()[0].sample_id, "C");
        Ok(())
    }

    #[test]
    fn test_missing_column() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tsv = dir.path().join("samples.tsv");
        write(&tsv, "sample\tsex\nA\tM\n")?;
        let err = Manifest::read(&tsv).unwrap_err();
        assert!(err.to_string().contains("sampleID"));
        assert!(Manifest::read(&dir.path().join("absent.tsv")).is_err());
        Ok(())
    }
}
