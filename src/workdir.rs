use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::delegate::{Delegate, DelegateCore};
use crate::record::Invocation;
use crate::{Error, Result, Value};

/// Runs the nested step inside a fresh temporary directory.
///
/// The directory becomes the process working directory for the dynamic
/// extent of the nested step and is removed afterwards, whether the step
/// succeeded or failed. The working directory is process-wide state, so a
/// chain using this link must not share its process with concurrent
/// invocations (chains are single-invocation anyway).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkDirDelegate {
    pub(crate) core: DelegateCore,
}

impl WorkDirDelegate {
    /// Create a working-directory link.
    pub fn new() -> Self {
        Self::default()
    }
}

crate::core_builders!(WorkDirDelegate);

impl From<WorkDirDelegate> for Delegate {
    fn from(d: WorkDirDelegate) -> Self {
        Delegate::WorkDir(d)
    }
}

/// Restores the previous working directory on drop, so an error in the
/// nested step cannot leave the process stranded in a dying directory.
struct RestoreCwd {
    previous: PathBuf,
}

impl Drop for RestoreCwd {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.previous) {
            log::error!(
                "could not return to {}: {}",
                self.previous.display(),
                err
            );
        }
    }
}

pub(crate) fn forward(delegate: &mut Delegate, record: &mut Invocation) -> Result<Value> {
    let scratch = tempfile::tempdir().map_err(|e| Error::transport_io("mkdtemp", e))?;
    let previous = env::current_dir().map_err(|e| Error::transport_io("getcwd", e))?;
    env::set_current_dir(scratch.path()).map_err(|e| Error::transport_io("chdir", e))?;
    log::debug!("working directory moved to {}", scratch.path().display());

    let _restore = RestoreCwd { previous };
    // This link's context is a place on disk; the hook runs there, like
    // the nested step.
    delegate.run_debug_pre_hook()?;
    delegate.step(record)
    // _restore returns to the previous directory, then `scratch` removes
    // the temporary one.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{testing, DebugHook, HookCall, DEBUG_ENABLED_VAR};
    use crate::probe;
    use crate::{DirectDelegate, Kwargs, TargetObject};
    use serde_json::json;
    use std::fs;

    // One test, not several: the working directory is process-wide and
    // the test harness runs tests on parallel threads.
    #[test]
    fn fresh_directory_for_the_nested_step() {
        probe::register_builtins();
        let before = env::current_dir().unwrap();

        let mut chain: Delegate = WorkDirDelegate::new()
            .subdelegate(DirectDelegate::new())
            .into();
        let mut probe_obj = probe::probe();
        chain
            .invoke(&mut probe_obj, "record_cwd", Vec::new(), Kwargs::new())
            .unwrap();

        let seen = PathBuf::from(probe_obj.attr("cwd").unwrap().as_str().unwrap());
        assert_ne!(seen, before, "nested step saw the caller's directory");
        assert!(!seen.exists(), "temporary directory survived the call");
        assert_eq!(env::current_dir().unwrap(), before);

        // The pre-hook runs where the nested step runs, not in the
        // caller's directory.
        let capture = tempfile::tempdir().unwrap();
        let hook_cwd_file = capture.path().join("hook-cwd");
        let hook = DebugHook::Call(HookCall {
            target: TargetObject::new("shell")
                .with_attr("program", json!("sh"))
                .with_attr(
                    "args",
                    json!(["-c", format!("pwd -P > {}", hook_cwd_file.display())]),
                ),
            method: "run".into(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
        });
        let mut chain: Delegate = WorkDirDelegate::new()
            .debug_pre_hook(hook)
            .subdelegate(DirectDelegate::new())
            .into();
        let mut probe_obj = probe::probe();
        {
            let _env = testing::debug_env_lock();
            env::set_var(DEBUG_ENABLED_VAR, "yes");
            chain
                .invoke(&mut probe_obj, "record_cwd", Vec::new(), Kwargs::new())
                .unwrap();
            env::remove_var(DEBUG_ENABLED_VAR);
        }
        let hook_cwd = fs::read_to_string(&hook_cwd_file).unwrap();
        let step_cwd = probe_obj.attr("cwd").unwrap().as_str().unwrap();
        assert_eq!(hook_cwd.trim(), step_cwd);
        assert_ne!(hook_cwd.trim(), before.to_str().unwrap());

        // Failure in the nested step still restores and cleans up.
        let mut chain: Delegate = WorkDirDelegate::new().into();
        let err = chain
            .invoke(&mut probe_obj, "fail", vec![json!("nope")], Kwargs::new())
            .unwrap_err();
        assert!(matches!(err, Error::UserMethod(_)));
        assert_eq!(env::current_dir().unwrap(), before);
    }
}
