//! Isolated environment trees.
//!
//! An environment is a self-contained directory: an interpreter link under
//! `bin/` (`Scripts\` on Windows), installed packages under the
//! site-packages directory, a `pyvenv.cfg` marker, and the state record.
//! Process execution and interpreter discovery are injected through
//! [`ProcessRunner`] so environment creation is testable without a real
//! interpreter on the machine.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;
use tracing::info;

use crate::state::{StateError, StateStore};

/// Marker and metadata file that makes a directory an environment.
const PYVENV_CFG: &str = "pyvenv.cfg";
/// The installed-package record, one `name==version` per line.
const STATE_FILE: &str = "burrow.lock";
/// Advisory lock taken for the duration of any mutation.
const LOCK_FILE: &str = ".lock";

/// Environment failure.
#[derive(Error, Debug)]
pub enum EnvError {
    /// The path exists but does not look like an environment.
    #[error("{0} is not a burrow environment (missing pyvenv.cfg)")]
    NotAnEnvironment(PathBuf),

    /// Refusing to materialize over an existing environment.
    #[error("an environment already exists at {0}")]
    AlreadyExists(PathBuf),

    /// No usable interpreter was found on the machine.
    #[error("no python interpreter found: {0}")]
    PythonNotFound(String),

    /// The interpreter's version output was unrecognizable.
    #[error("could not detect python version from '{0}'")]
    VersionDetect(String),

    /// The state record failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Filesystem failure.
    #[error("environment io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability for locating and running an interpreter. Injected, never
/// global, so tests can substitute a fake.
pub trait ProcessRunner: Send + Sync {
    /// Find the interpreter executable to seed new environments with.
    fn locate_python(&self) -> std::io::Result<PathBuf>;

    /// Run a program to completion, capturing its output.
    fn run(&self, program: &Path, args: &[&str]) -> std::io::Result<Output>;
}

/// [`ProcessRunner`] backed by the real system.
///
/// `BURROW_PYTHON` overrides interpreter discovery; otherwise `python3`
/// then `python` are looked up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn locate_python(&self) -> std::io::Result<PathBuf> {
        if let Ok(path) = std::env::var("BURROW_PYTHON") {
            return Ok(PathBuf::from(path));
        }
        which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))
    }

    fn run(&self, program: &Path, args: &[&str]) -> std::io::Result<Output> {
        Command::new(program).args(args).output()
    }
}

/// An isolated environment rooted at an absolute path. Sole owner of the
/// installed-package mapping; nothing else writes the state record.
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    /// Directory name of the environment. A plain field, nothing more.
    pub name: String,
    python_version: String,
}

impl Environment {
    /// Create a fresh environment at `path` with an interpreter matching
    /// `python_version` (detected from the located interpreter when `None`).
    pub fn materialize(
        path: &Path,
        python_version: Option<&str>,
        runner: &dyn ProcessRunner,
    ) -> Result<Self, EnvError> {
        let root = std::path::absolute(path)?;
        if root.join(PYVENV_CFG).exists() {
            return Err(EnvError::AlreadyExists(root));
        }

        let python = runner
            .locate_python()
            .map_err(|e| EnvError::PythonNotFound(e.to_string()))?;
        let version = match python_version {
            Some(v) => v.to_string(),
            None => detect_version(runner, &python)?,
        };

        let env = Self {
            name: dir_name(&root),
            root,
            python_version: version,
        };

        std::fs::create_dir_all(env.bin_dir())?;
        std::fs::create_dir_all(env.site_packages())?;
        link_interpreter(&python, &env.python_executable())?;

        let home = python.parent().unwrap_or_else(|| Path::new("/"));
        std::fs::write(
            env.root.join(PYVENV_CFG),
            format!(
                "home = {}\ninclude-system-site-packages = false\nversion = {}\n",
                home.display(),
                env.python_version
            ),
        )?;
        env.state_store().write(&std::collections::BTreeMap::new())?;

        info!(root = %env.root.display(), version = %env.python_version, "environment created");
        Ok(env)
    }

    /// Open an existing environment, reading its interpreter version from
    /// `pyvenv.cfg`.
    pub fn open(path: &Path) -> Result<Self, EnvError> {
        let root = std::path::absolute(path)?;
        let cfg_path = root.join(PYVENV_CFG);
        let contents = match std::fs::read_to_string(&cfg_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EnvError::NotAnEnvironment(root));
            }
            Err(e) => return Err(e.into()),
        };

        let python_version = contents
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once('=')?;
                (key.trim() == "version").then(|| value.trim().to_string())
            })
            .unwrap_or_default();

        Ok(Self {
            name: dir_name(&root),
            root,
            python_version,
        })
    }

    /// The environment's absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The interpreter version recorded at creation.
    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    /// Where installed package trees live.
    pub fn site_packages(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Lib").join("site-packages")
        } else {
            self.root.join("lib").join("site-packages")
        }
    }

    /// Where executables live.
    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts")
        } else {
            self.root.join("bin")
        }
    }

    /// Platform-specific path of a named tool inside the environment.
    pub fn executable(&self, tool: &str) -> PathBuf {
        if cfg!(windows) {
            self.bin_dir().join(format!("{tool}.exe"))
        } else {
            self.bin_dir().join(tool)
        }
    }

    /// The environment's interpreter path.
    pub fn python_executable(&self) -> PathBuf {
        self.executable("python")
    }

    /// The durable installed-package record.
    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.root.join(STATE_FILE))
    }

    /// Path of the advisory lock file serializing mutations.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

fn dir_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse `Python X.Y.Z` from the interpreter's `--version` output (some
/// interpreters print it to stderr).
fn detect_version(runner: &dyn ProcessRunner, python: &Path) -> Result<String, EnvError> {
    let output = runner
        .run(python, &["--version"])
        .map_err(|e| EnvError::PythonNotFound(e.to_string()))?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.split_whitespace()
        .nth(1)
        .map(ToString::to_string)
        .ok_or_else(|| EnvError::VersionDetect(text.trim().to_string()))
}

#[cfg(unix)]
fn link_interpreter(python: &Path, target: &Path) -> std::io::Result<()> {
    if target.exists() {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(python, target)
}

#[cfg(not(unix))]
fn link_interpreter(python: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(python, target).map(|_| ())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    /// Runner that serves a dummy interpreter file and canned version
    /// output, so tests never need python installed.
    pub(crate) struct FakeRunner {
        pub python: PathBuf,
        pub version_output: &'static str,
    }

    impl FakeRunner {
        pub(crate) fn in_dir(dir: &Path) -> Self {
            let python = dir.join("python3");
            std::fs::write(&python, b"#!/bin/true\n").unwrap();
            Self {
                python,
                version_output: "Python 3.12.1\n",
            }
        }
    }

    impl ProcessRunner for FakeRunner {
        fn locate_python(&self) -> std::io::Result<PathBuf> {
            Ok(self.python.clone())
        }

        fn run(&self, _program: &Path, _args: &[&str]) -> std::io::Result<Output> {
            Ok(Output {
                status: std::process::ExitStatus::from_raw(0),
                stdout: self.version_output.as_bytes().to_vec(),
                stderr: Vec::new(),
            })
        }
    }

    #[test]
    fn materialize_builds_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::in_dir(dir.path());
        let env =
            Environment::materialize(&dir.path().join("venv"), None, &runner).unwrap();

        assert!(env.root().join(PYVENV_CFG).exists());
        assert!(env.site_packages().is_dir());
        assert!(env.python_executable().exists());
        assert_eq!(env.python_version(), "3.12.1");
        assert_eq!(env.name, "venv");
        assert!(env.state_store().read().unwrap().is_empty());
    }

    #[test]
    fn explicit_version_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::in_dir(dir.path());
        let env =
            Environment::materialize(&dir.path().join("venv"), Some("3.11.9"), &runner).unwrap();
        assert_eq!(env.python_version(), "3.11.9");
    }

    #[test]
    fn materialize_refuses_an_existing_environment() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::in_dir(dir.path());
        let target = dir.path().join("venv");
        Environment::materialize(&target, None, &runner).unwrap();

        let err = Environment::materialize(&target, None, &runner).unwrap_err();
        assert!(matches!(err, EnvError::AlreadyExists(_)));
    }

    #[test]
    fn open_round_trips_the_version() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::in_dir(dir.path());
        let target = dir.path().join("venv");
        Environment::materialize(&target, Some("3.10.2"), &runner).unwrap();

        let env = Environment::open(&target).unwrap();
        assert_eq!(env.python_version(), "3.10.2");
    }

    #[test]
    fn open_rejects_a_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Environment::open(dir.path()).unwrap_err();
        assert!(matches!(err, EnvError::NotAnEnvironment(_)));
    }

    #[test]
    fn executable_paths_live_under_bin() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::in_dir(dir.path());
        let env =
            Environment::materialize(&dir.path().join("venv"), Some("3.12.0"), &runner).unwrap();
        assert!(env.executable("pip").starts_with(env.bin_dir()));
    }
}
