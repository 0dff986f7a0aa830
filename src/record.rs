use serde::{Deserialize, Serialize};

use crate::{Args, Kwargs, Result, TargetObject, Value};

/// The invocation a chain carries: target object, method name, positional
/// arguments, and keyword arguments.
///
/// The record travels outward through the chain unchanged; only the
/// terminal link touches it, by running the method against the target. The
/// return value travels back separately in the after-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub(crate) target: TargetObject,
    pub(crate) method: String,
    pub(crate) args: Args,
    pub(crate) kwargs: Kwargs,
}

impl Invocation {
    pub(crate) fn new(
        target: TargetObject,
        method: impl Into<String>,
        args: Args,
        kwargs: Kwargs,
    ) -> Self {
        Self {
            target,
            method: method.into(),
            args,
            kwargs,
        }
    }

    /// The target object in this record's execution context.
    pub fn target(&self) -> &TargetObject {
        &self.target
    }

    /// The method to be invoked.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Run the method locally. Terminal step of every chain.
    pub(crate) fn call_target(&mut self) -> Result<Value> {
        log::debug!(
            "invoking {}.{} locally in process {}",
            self.target.type_name(),
            self.method,
            std::process::id()
        );
        let value = self.target.call(&self.method, &self.args, &self.kwargs)?;
        Ok(value)
    }
}
