use std::env;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::{Args, Error, Kwargs, Result, TargetObject};

/// Environment switch that must be `yes` for any debug pre-hook to run.
pub const DEBUG_ENABLED_VAR: &str = "DELEGATE_FUNCTION_DEBUG_ENABLED";

/// Holds the command a process delegate is about to execute while its debug
/// pre-hook runs.
pub const COMMAND_VAR: &str = "DELEGATE_FUNCTION_COMMAND";

/// Whether debug pre-hooks are armed in this process.
///
/// Hooks execute arbitrary code at every chain link, so they are disabled
/// unless [`DEBUG_ENABLED_VAR`] is set to the string `yes`. A configured
/// hook that is not armed is skipped with a warning.
pub fn debug_enabled() -> bool {
    env::var(DEBUG_ENABLED_VAR).map(|v| v == "yes").unwrap_or(false)
}

/// A user-supplied action run before a delegate's nested step.
///
/// Process delegates additionally run the hook before every auxiliary
/// command they spawn, with [`COMMAND_VAR`] set to the command about to be
/// executed for the hook's dynamic extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugHook {
    /// Drop into an interactive `bash` in the delegate's context.
    Shell,
    /// Invoke a method on a hook-owned target object.
    Call(HookCall),
}

/// The invocation form of a [`DebugHook`]: same shape as a delegate
/// invocation, aimed at a hook-owned object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCall {
    /// Object the hook method runs on.
    pub target: TargetObject,
    /// Method name, resolved through the method registry.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Args,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl DebugHook {
    /// Run the hook if debug execution is armed.
    ///
    /// A failing hook aborts the invocation with the hook's own failure.
    /// A debug shell that exits non-zero is only reported; quitting the
    /// shell is not an error.
    pub(crate) fn run(&self) -> Result<()> {
        if !debug_enabled() {
            log::warn!(
                "debug pre-hook configured but not armed; set {}=yes to allow it \
                 (beware the security consequences)",
                DEBUG_ENABLED_VAR
            );
            return Ok(());
        }
        match self {
            DebugHook::Shell => {
                log::debug!("debug pre-hook: interactive shell");
                let status = Command::new("bash")
                    .status()
                    .map_err(|e| Error::transport("bash", e))?;
                if !status.success() {
                    log::warn!("debug shell exited with {}", status);
                }
            }
            DebugHook::Call(call) => {
                log::debug!(
                    "debug pre-hook: {}.{}",
                    call.target.type_name(),
                    call.method
                );
                let mut target = call.target.clone();
                target.call(&call.method, &call.args, &call.kwargs)?;
            }
        }
        Ok(())
    }
}

/// Sets [`COMMAND_VAR`] for the duration of a debug pre-hook call and
/// removes it on drop. Process-wide state with a strict acquire/release
/// bracket around one hook run.
pub(crate) struct CommandEnv {
    _priv: (),
}

impl CommandEnv {
    pub(crate) fn set(command: &str) -> Self {
        env::set_var(COMMAND_VAR, command);
        Self { _priv: () }
    }
}

impl Drop for CommandEnv {
    fn drop(&mut self) {
        env::remove_var(COMMAND_VAR);
    }
}
