//! Locating the external programs named in the config.

use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use vp_types::{PipelineError, ToolPaths};

/// Determines whether a path is a file and has executable permissions.
pub fn is_executable_file<P: AsRef<Path>>(path: P) -> bool {
    use libc::{access, X_OK};
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    if path.as_ref().is_file() {
        if let Ok(path) = CString::new(path.as_ref().as_os_str().as_bytes()) {
            return unsafe { access(path.as_c_str().as_ptr(), X_OK) } == 0;
        }
    }
    false
}

/// Resolve a configured program. Paths with a separator are used as given;
/// bare names are searched for on the PATH.
pub fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable_file(program).then(|| program.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable_file(candidate))
    })
}

/// Fail with `MissingTool` for the first configured program that cannot be run.
pub fn check_tools(tools: &ToolPaths) -> Result<()> {
    for (role, program) in tools.roles() {
        if find_program(program).is_none() {
            return Err(PipelineError::MissingTool {
                role,
                program: program.display().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_find_program() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let exe = dir.path().join("aligner");
        fs::write(&exe, "#!/bin/sh\nexit 0\n")?;
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))?;
        let plain = dir.path().join("notes.txt");
        fs::write(&plain, "x")?;
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644))?;

        assert_eq!(find_program(&exe), Some(exe.clone()));
        assert_eq!(find_program(&plain), None);
        assert_eq!(find_program(&dir.path().join("absent")), None);
        assert!(find_program(Path::new("sh")).is_some());
        Ok(())
    }

    #[test]
    fn test_check_tools() {
        let tools = ToolPaths {
            align: "/nonexistent/align".into(),
            ..ToolPaths::default()
        };
        let err = check_tools(&tools).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingTool { role: "align", .. })
        ));
    }
}
