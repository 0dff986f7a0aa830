//! Built-in target types.
//!
//! These exist for the same reason the helper executable registers them
//! unconditionally: a target type is only usable across a boundary if the
//! far side knows it too, and types defined in a caller's test module
//! never get installed over there. `counter` and `probe` are the types the
//! integration tests invoke; `shell` doubles as a debug-hook target.

use std::ffi::CStr;
use std::process::Command;

use serde_json::json;

use crate::error::UserMethodError;
use crate::target::{register_type, TargetObject};
use crate::{Args, Kwargs, Value};

/// Register the built-in types in this process. Idempotent; call it in any
/// process that invokes or resumes chains over built-in targets.
pub fn register_builtins() {
    register_type("counter", &[("set_value", counter_set_value), ("value", counter_value)]);
    register_type(
        "probe",
        &[
            ("hello", probe_hello),
            ("pid_and_host", probe_pid_and_host),
            ("record_cwd", probe_record_cwd),
            ("fail", probe_fail),
        ],
    );
    register_type("shell", &[("run", shell_run)]);
}

/// A `counter` target with the given starting value.
pub fn counter(value: i64) -> TargetObject {
    TargetObject::new("counter").with_attr("value", json!(value))
}

/// A `probe` target.
pub fn probe() -> TargetObject {
    TargetObject::new("probe")
}

fn counter_set_value(
    target: &mut TargetObject,
    args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let value = args
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| UserMethodError::new("value-error", "set_value takes one integer"))?;
    target.set_attr("value", json!(value));
    Ok(Value::Null)
}

fn counter_value(
    target: &mut TargetObject,
    _args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    Ok(target.attr("value").cloned().unwrap_or(Value::Null))
}

fn probe_hello(
    _target: &mut TargetObject,
    _args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let pid = std::process::id();
    println!("hello world. I'm in process {} running on {}", pid, hostname());
    Ok(json!(pid))
}

/// Returns `[pid, hostname]` and records both as attributes, so callers
/// can also observe where the method really ran through the mutated state
/// that flows back.
fn probe_pid_and_host(
    target: &mut TargetObject,
    _args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let pid = std::process::id();
    let host = hostname();
    target.set_attr("pid", json!(pid));
    target.set_attr("host", json!(host.clone()));
    Ok(json!([pid, host]))
}

fn probe_record_cwd(
    target: &mut TargetObject,
    _args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let cwd = std::env::current_dir()
        .map_err(|e| UserMethodError::new("os-error", e.to_string()))?;
    target.set_attr("cwd", json!(cwd.display().to_string()));
    Ok(json!(cwd.display().to_string()))
}

fn probe_fail(
    _target: &mut TargetObject,
    args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let message = args
        .first()
        .and_then(Value::as_str)
        .unwrap_or("probe.fail was invoked");
    Err(UserMethodError::new("probe-failure", message))
}

fn shell_run(
    target: &mut TargetObject,
    _args: &Args,
    _kwargs: &Kwargs,
) -> Result<Value, UserMethodError> {
    let program = target
        .attr("program")
        .and_then(Value::as_str)
        .unwrap_or("bash")
        .to_string();
    let extra: Vec<String> = target
        .attr("args")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    log::debug!("shell target executing `{} {}`", program, extra.join(" "));
    let status = Command::new(&program)
        .args(&extra)
        .status()
        .map_err(|e| UserMethodError::new("os-error", format!("{}: {}", program, e)))?;
    if status.success() {
        Ok(Value::Null)
    } else {
        Err(UserMethodError::new(
            "command-failed",
            format!("{} exited with {}", program, status),
        ))
    }
}

/// Best-effort local host name.
pub(crate) fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown".into();
    }
    buf[buf.len() - 1] = 0;
    CStr::from_bytes_until_nul(&buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into())
}
