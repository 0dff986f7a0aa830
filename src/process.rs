use std::env;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use serde::{Deserialize, Serialize};

use crate::delegate::{Delegate, DelegateCore};
use crate::hook::{CommandEnv, DebugHook};
use crate::image::{self, AfterImage, BeforeImage, Outcome};
use crate::record::Invocation;
use crate::staging::Staging;
use crate::{Error, Result, Value};

/// Name of the helper executable searched for on `$PATH` when no explicit
/// path is configured.
pub const HELPER_NAME: &str = "delegate-function-run";

/// Crosses into a local child process.
///
/// The forward step serializes the remaining chain and its invocation to a
/// before-image, starts the helper executable, and reads the return value
/// and mutated state back from the after-image. The sudo, ssh, Slurm, and
/// Docker delegates embed this one and contribute command prefixes and
/// file staging around the same protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessDelegate {
    pub(crate) core: DelegateCore,
    #[serde(default)]
    staging_root: Option<PathBuf>,
    #[serde(default)]
    helper_path: Option<PathBuf>,
    #[serde(default)]
    launcher_pid: Option<u32>,
}

impl ProcessDelegate {
    /// Create a subprocess link with a private temporary staging root and
    /// the helper found on `$PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage images under this directory instead of a private temporary
    /// one. Required (by the respective constructors) for Slurm and
    /// Docker, where both sides must see the same path.
    pub fn staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Use this helper executable instead of searching `$PATH` for
    /// [`HELPER_NAME`]. The path is used verbatim; it must be valid in the
    /// execution context the helper starts in.
    pub fn helper_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_path = Some(path.into());
        self
    }

    /// The configured helper path, if any.
    pub fn configured_helper_path(&self) -> Option<&Path> {
        self.helper_path.as_deref()
    }

    /// The configured staging root, if any.
    pub fn configured_staging_root(&self) -> Option<&Path> {
        self.staging_root.as_deref()
    }

    /// Pid of the process that most recently drove this link's boundary.
    ///
    /// For an outermost link this is the caller's pid; for a nested link it
    /// is the pid of the helper the link ran inside, carried back in the
    /// after-image.
    pub fn launcher_pid(&self) -> Option<u32> {
        self.launcher_pid
    }

    /// Locate the helper executable.
    pub(crate) fn find_helper(&self) -> Result<PathBuf> {
        if let Some(path) = &self.helper_path {
            return Ok(path.clone());
        }
        let paths = env::var_os("PATH").unwrap_or_default();
        search_path(&paths, HELPER_NAME)
            .ok_or_else(|| Error::HelperNotFound(HELPER_NAME.to_string()))
    }

    /// The baseline helper command line, with image paths as seen by the
    /// helper.
    pub(crate) fn base_helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        Ok(vec![
            self.find_helper()?.display().to_string(),
            "--delegate-before".into(),
            before.display().to_string(),
            "--delegate-after".into(),
            after.display().to_string(),
            "--log-level".into(),
            (log::max_level() as usize).to_string(),
        ])
    }
}

crate::core_builders!(ProcessDelegate);

impl From<ProcessDelegate> for Delegate {
    fn from(d: ProcessDelegate) -> Self {
        Delegate::Process(d)
    }
}

impl Boundary for ProcessDelegate {
    fn process(&self) -> &ProcessDelegate {
        self
    }

    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        self.base_helper_argv(before, after)
    }
}

/// The boundary-specific parts of the external-process protocol. The
/// protocol driver ([`forward_external`]) is shared; implementors supply
/// the helper command line for their boundary and, when staging needs more
/// than local files (ssh), the whole launch sequence.
pub(crate) trait Boundary {
    /// The embedded subprocess configuration.
    fn process(&self) -> &ProcessDelegate;

    /// Command line that starts the helper on the far side of the
    /// boundary.
    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>>;

    /// Stage whatever the boundary needs and run the helper to completion.
    fn run(&self, staging: &Staging) -> Result<ExitReport> {
        let argv = self.helper_argv(staging.before_path(), staging.after_path())?;
        let core = &self.process().core;
        run_helper(&argv, core.interactive, core.debug_pre_hook.as_ref())
    }
}

impl Delegate {
    pub(crate) fn as_boundary(&self) -> Option<&dyn Boundary> {
        match self {
            Delegate::Process(d) => Some(d),
            Delegate::Sudo(d) => Some(d),
            Delegate::Ssh(d) => Some(d),
            Delegate::Slurm(d) => Some(d),
            Delegate::Docker(d) => Some(d),
            Delegate::Direct(_) | Delegate::WorkDir(_) => None,
        }
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut ProcessDelegate> {
        match self {
            Delegate::Process(d) => Some(d),
            Delegate::Sudo(d) => Some(&mut d.process),
            Delegate::Ssh(d) => Some(&mut d.process),
            Delegate::Slurm(d) => Some(&mut d.process),
            Delegate::Docker(d) => Some(&mut d.process),
            Delegate::Direct(_) | Delegate::WorkDir(_) => None,
        }
    }
}

/// Forward step shared by every process-crossing delegate.
///
/// Stages the before-image, drives the boundary, then reads the
/// after-image back: the return value is handed up, the caller-side graph
/// adopts the post-call graph, and the record's target adopts the terminal
/// target's state. Staging is removed on every exit path.
pub(crate) fn forward_external(delegate: &mut Delegate, record: &mut Invocation) -> Result<Value> {
    if let Some(process) = delegate.process_mut() {
        process.launcher_pid = Some(std::process::id());
    }

    let staging;
    let report;
    {
        let boundary = delegate
            .as_boundary()
            .expect("forward_external called on an in-process delegate");
        staging = Staging::new(boundary.process().configured_staging_root())?;
        let before = BeforeImage::new(delegate.clone(), record.clone());
        image::write_before(staging.before_path(), &before)?;
        report = boundary.run(&staging)?;
    }

    match image::read_after(staging.after_path()) {
        // A failing user method still leaves a complete after-image even
        // though the helper exits non-zero; re-raise it caller-side.
        Ok(AfterImage {
            outcome: Outcome::MethodFailed(err),
            ..
        }) => Err(err.into()),
        Ok(AfterImage {
            delegate: graph,
            record: after_record,
            outcome: Outcome::Returned(value),
            ..
        }) => {
            if !report.success() {
                return Err(report.into_failure());
            }
            *delegate = graph;
            record.target.adopt(after_record.target());
            Ok(value)
        }
        Err(read_err) => {
            if !report.success() {
                Err(report.into_failure())
            } else {
                Err(read_err)
            }
        }
    }
}

/// How a helper launch ended: its exit status plus whatever standard error
/// was captured (empty when the streams were inherited).
#[derive(Debug)]
pub(crate) struct ExitReport {
    status: ExitStatus,
    stderr: String,
}

impl ExitReport {
    pub(crate) fn success(&self) -> bool {
        self.status.success()
    }

    fn into_failure(self) -> Error {
        Error::HelperExitNonZero {
            status: self.status.to_string(),
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Run the helper command. Non-zero exit is reported, not raised; the
/// driver decides after consulting the after-image.
pub(crate) fn run_helper(
    argv: &[String],
    interactive: bool,
    hook: Option<&DebugHook>,
) -> Result<ExitReport> {
    spawn(argv, interactive, hook)
}

/// Run an auxiliary command (`setfacl`, `scp`, remote `mkdir`/`rm`).
/// Any failure is a transport failure.
pub(crate) fn run_aux(
    argv: &[String],
    interactive: bool,
    hook: Option<&DebugHook>,
) -> Result<()> {
    let report = spawn(argv, interactive, hook)?;
    if report.success() {
        Ok(())
    } else {
        Err(Error::transport(
            argv.join(" "),
            format!("{}: {}", report.status, report.stderr.trim()),
        ))
    }
}

fn spawn(argv: &[String], interactive: bool, hook: Option<&DebugHook>) -> Result<ExitReport> {
    let rendered = argv.join(" ");
    if let Some(hook) = hook {
        let _bracket = CommandEnv::set(&rendered);
        hook.run()?;
    }

    log::debug!("executing `{}`", rendered);
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);

    if interactive {
        let status = command
            .status()
            .map_err(|e| Error::transport(argv[0].clone(), e))?;
        Ok(ExitReport {
            status,
            stderr: String::new(),
        })
    } else {
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::transport(argv[0].clone(), e))?;
        if !output.stdout.is_empty() {
            log::debug!("`{}` stdout: {}", argv[0], String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            log::debug!("`{}` stderr: {}", argv[0], String::from_utf8_lossy(&output.stderr));
        }
        Ok(ExitReport {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Generates the builder methods the sudo/ssh/Slurm/Docker delegates
/// forward to their embedded [`ProcessDelegate`].
#[macro_export]
#[doc(hidden)]
macro_rules! process_builders {
    ($ty:ty) => {
        impl $ty {
            /// Set the next link in the chain.
            pub fn subdelegate(mut self, subdelegate: impl Into<$crate::Delegate>) -> Self {
                self.process = self.process.subdelegate(subdelegate);
                self
            }

            /// Attach subprocesses to the caller's terminal.
            pub fn interactive(mut self, interactive: bool) -> Self {
                self.process = self.process.interactive(interactive);
                self
            }

            /// Run a [`DebugHook`](crate::DebugHook) before the nested step
            /// and before each spawned command.
            pub fn debug_pre_hook(mut self, hook: $crate::DebugHook) -> Self {
                self.process = self.process.debug_pre_hook(hook);
                self
            }

            /// Use this helper executable instead of searching `$PATH`.
            pub fn helper_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
                self.process = self.process.helper_path(path);
                self
            }
        }
    };
}

fn search_path(paths: &OsStr, name: &str) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_command_line_uses_configured_helper_verbatim() {
        let d = ProcessDelegate::new().helper_path("/opt/bin/delegate-function-run");
        let argv = d
            .base_helper_argv(Path::new("/s/a.before.json"), Path::new("/s/a.after.json"))
            .unwrap();
        assert_eq!(
            &argv[..5],
            &[
                "/opt/bin/delegate-function-run".to_string(),
                "--delegate-before".into(),
                "/s/a.before.json".into(),
                "--delegate-after".into(),
                "/s/a.after.json".into(),
            ]
        );
        assert_eq!(argv[5], "--log-level");
    }

    #[test]
    fn path_search_honors_executable_bit() {
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join(HELPER_NAME);
        fs::write(&plain, b"#!/bin/sh\n").unwrap();
        let joined = env::join_paths([dir.path()]).unwrap();
        assert_eq!(search_path(&joined, HELPER_NAME), None);

        let mut mode = fs::metadata(&plain).unwrap().permissions();
        mode.set_mode(0o755);
        fs::set_permissions(&plain, mode).unwrap();
        assert_eq!(search_path(&joined, HELPER_NAME), Some(plain));
    }
}
