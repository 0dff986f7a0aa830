use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::UserMethodError;
use crate::{Args, Kwargs, Value};

/// Signature of a registered method.
///
/// Methods receive the object they were invoked on, the positional
/// arguments, and the keyword arguments, and either return a value or fail
/// with a [`UserMethodError`].
pub type MethodFn = fn(&mut TargetObject, &Args, &Kwargs) -> Result<Value, UserMethodError>;

/// The object a delegate chain invokes a method on.
///
/// Method code cannot cross a process boundary, so a target is a named bag
/// of attributes: a `type_name` that both sides of every boundary resolve
/// through the [method registry](register_type), and an attribute map whose
/// state survives serialization. After a successful invocation the caller's
/// target holds exactly the attribute state the method left behind in the
/// terminal execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetObject {
    type_name: String,
    #[serde(default)]
    attrs: Kwargs,
}

impl TargetObject {
    /// Create a target of the given registered type with no attributes.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attrs: Kwargs::new(),
        }
    }

    /// Set an attribute, builder-style.
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// The registered type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Read an attribute.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Write an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    /// The full attribute map.
    pub fn attrs(&self) -> &Kwargs {
        &self.attrs
    }

    /// Copy `other`'s attribute state onto this object, keeping the
    /// caller's handle intact.
    pub(crate) fn adopt(&mut self, other: &TargetObject) {
        self.attrs = other.attrs.clone();
    }

    /// Resolve and run a method on this object.
    ///
    /// The method operates on a scratch copy of the attributes; they are
    /// committed only if it succeeds, so a failing method leaves the object
    /// in its pre-call state.
    pub(crate) fn call(
        &mut self,
        method: &str,
        args: &Args,
        kwargs: &Kwargs,
    ) -> Result<Value, UserMethodError> {
        let f = lookup_method(&self.type_name, method).ok_or_else(|| {
            UserMethodError::new(
                "method-not-found",
                format!("no method `{}` on type `{}`", method, self.type_name),
            )
        })?;
        let mut scratch = self.clone();
        let value = f(&mut scratch, args, kwargs)?;
        self.attrs = scratch.attrs;
        Ok(value)
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, HashMap<&'static str, MethodFn>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register (or re-register) a target type and its methods.
///
/// Registration is process-local. Any process that deserializes a target —
/// in particular the helper executable — must register the same types
/// before invoking; the shipped helper registers the
/// [built-in types](crate::probe::register_builtins) on startup.
pub fn register_type(type_name: impl Into<String>, methods: &[(&'static str, MethodFn)]) {
    let mut registry = REGISTRY.write().expect("method registry poisoned");
    registry.insert(type_name.into(), methods.iter().copied().collect());
}

fn lookup_method(type_name: &str, method: &str) -> Option<MethodFn> {
    let registry = REGISTRY.read().expect("method registry poisoned");
    registry.get(type_name)?.get(method).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bump(target: &mut TargetObject, args: &Args, _kwargs: &Kwargs) -> Result<Value, UserMethodError> {
        let by = args.first().and_then(Value::as_i64).unwrap_or(1);
        let old = target.attr("n").and_then(Value::as_i64).unwrap_or(0);
        target.set_attr("n", json!(old + by));
        Ok(json!(old + by))
    }

    fn explode(target: &mut TargetObject, _args: &Args, _kwargs: &Kwargs) -> Result<Value, UserMethodError> {
        target.set_attr("n", json!(999));
        Err(UserMethodError::new("boom", "exploded after mutating"))
    }

    #[test]
    fn dispatch_and_commit() {
        register_type("bumper", &[("bump", bump), ("explode", explode)]);
        let mut t = TargetObject::new("bumper").with_attr("n", json!(4));
        let v = t.call("bump", &vec![json!(3)], &Kwargs::new()).unwrap();
        assert_eq!(v, json!(7));
        assert_eq!(t.attr("n"), Some(&json!(7)));
    }

    #[test]
    fn failing_method_rolls_back() {
        register_type("bumper", &[("bump", bump), ("explode", explode)]);
        let mut t = TargetObject::new("bumper").with_attr("n", json!(4));
        let err = t.call("explode", &Args::new(), &Kwargs::new()).unwrap_err();
        assert_eq!(err.kind, "boom");
        assert_eq!(t.attr("n"), Some(&json!(4)));
    }

    #[test]
    fn unknown_method() {
        register_type("bumper", &[("bump", bump), ("explode", explode)]);
        let mut t = TargetObject::new("bumper");
        let err = t.call("vanish", &Args::new(), &Kwargs::new()).unwrap_err();
        assert_eq!(err.kind, "method-not-found");
        assert!(err.message.contains("vanish"));
    }
}
