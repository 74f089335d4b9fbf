use anyhow::{bail, Result};
use chrono::Local;
use env_logger::Builder;
use itertools::Itertools;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Convert an io::error to a string and strip "(os error 4)" from the end.
fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Print an error chain to stderr.
pub fn print_error_chain(err: &anyhow::Error) {
    let error_chain = err.chain().join("\n\tCaused by: ");
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        let io_err_str = io_error_to_string(io_err);
        match err.chain().len() {
            1 => eprintln!("ERROR: {io_err_str}"),
            2 => eprintln!("ERROR: {io_err_str}: {err}"),
            _ => eprintln!("ERROR: {error_chain}"),
        };
    } else {
        eprintln!("ERROR: {error_chain}");
    };
}

/// Log to stderr as `<timestamp> [LEVEL] - message`, at info level unless
/// `RUST_LOG` says otherwise.
pub fn init_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();
}

/// An input path that must exist, canonicalized when the command line is parsed
/// so that relative paths stay valid whatever the jobs' working directory.
#[derive(Serialize, Deserialize, Clone)]
#[serde(transparent)]
pub struct CliPath {
    path: PathBuf,
}

impl From<PathBuf> for CliPath {
    fn from(path: PathBuf) -> Self {
        CliPath { path }
    }
}

impl FromStr for CliPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<CliPath> {
        match Path::new(s).canonicalize() {
            Ok(p) => Ok(CliPath::from(p)),
            Err(e) => bail!(io_error_to_string(&e)),
        }
    }
}

impl Display for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(&self.path.display(), f)
    }
}

impl Debug for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(&self.path, f)
    }
}

impl From<CliPath> for PathBuf {
    fn from(obj: CliPath) -> PathBuf {
        obj.path
    }
}

impl AsRef<Path> for CliPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Deref for CliPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}
