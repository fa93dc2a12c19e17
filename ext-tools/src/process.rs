use anyhow::{bail, Context, Error};
use itertools::Itertools;
use log::info;
use std::ffi::OsStr;
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// An external program could not be started
#[derive(Debug)]
pub struct MissingDependency {
    /// Program that was looked up
    pub tool: String,
    /// How to install it
    pub guidance: String,
}

impl std::error::Error for MissingDependency {}

impl Display for MissingDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} could not be run. {}", self.tool, self.guidance)
    }
}

/// An external program, plus installation guidance shown when it is missing
#[derive(Clone, Debug)]
pub struct ExternalTool {
    program: PathBuf,
    guidance: String,
}

impl ExternalTool {
    /// `program` is looked up on `PATH` unless it contains a directory
    pub fn new(program: impl Into<PathBuf>, guidance: impl Into<String>) -> ExternalTool {
        ExternalTool {
            program: program.into(),
            guidance: guidance.into(),
        }
    }

    fn missing(&self) -> MissingDependency {
        MissingDependency {
            tool: self.program.display().to_string(),
            guidance: self.guidance.clone(),
        }
    }

    /// Run `<program> --version` and return its trimmed stdout. Fails with
    /// [`MissingDependency`] when the program cannot be run or reports an error.
    pub fn check_version(&self) -> Result<String, Error> {
        let stdout = self.run(&["--version"], None).map_err(|e| match e.downcast::<MissingDependency>() {
            Ok(missing) => Error::new(missing),
            Err(e) => Error::new(self.missing()).context(e),
        })?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run the program with `args`, optionally from `cwd`, and return its stdout.
    ///
    /// No shell is involved. A non-zero exit is an error carrying the exit status and stderr.
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S], cwd: Option<&Path>) -> Result<Vec<u8>, Error> {
        let command_line = format!(
            "{} {}",
            self.program.display(),
            args.iter().map(|a| a.as_ref().to_string_lossy()).join(" ")
        );
        match cwd {
            Some(dir) => info!("running `{}` in {}", command_line, dir.display()),
            None => info!("running `{}`", command_line),
        }

        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.missing().into()),
            Err(e) => return Err(e).with_context(|| format!("failed to start `{command_line}`")),
        };

        if !output.status.success() {
            bail!(
                "`{}` failed with {}: {}",
                command_line,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_program() {
        let tool = ExternalTool::new("/nonexistent/dir/not-a-tool", "install it from example.org");
        let err = tool.check_version().unwrap_err();
        let missing = err.downcast_ref::<MissingDependency>().unwrap();
        assert_eq!(missing.tool, "/nonexistent/dir/not-a-tool");
        assert!(err.to_string().contains("example.org"));

        let err = tool.run(&["x"], None).unwrap_err();
        assert!(err.downcast_ref::<MissingDependency>().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status() {
        let ok = ExternalTool::new("true", "");
        assert!(ok.run::<&str>(&[], None).unwrap().is_empty());

        let failing = ExternalTool::new("false", "");
        let err = failing.run::<&str>(&[], None).unwrap_err();
        assert!(err.downcast_ref::<MissingDependency>().is_none());
        assert!(err.to_string().contains("false"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let pwd = ExternalTool::new("pwd", "");
        let out = pwd.run::<&str>(&[], Some(dir.path())).unwrap();
        let printed = PathBuf::from(String::from_utf8(out).unwrap().trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_version_check_is_missing_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let tool = crate::test_util::fake_tool(dir.path(), "broken", "echo oops >&2\nexit 3\n");
        let err = ExternalTool::new(tool, "reinstall it").check_version().unwrap_err();
        assert!(err.downcast_ref::<MissingDependency>().is_some());
        assert!(format!("{err:#}").contains("oops"));
    }
}
