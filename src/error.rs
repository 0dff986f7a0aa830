use std::io;

use serde::{Deserialize, Serialize};

use crate::Value;

/// Errors that occur while building or invoking a delegate chain.
///
/// Construction problems surface when the chain is built; everything else
/// surfaces at the outermost [`invoke`](crate::Delegate::invoke) call.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or incomplete delegate configuration.
    #[error("invalid delegate configuration: {0}")]
    Construction(String),

    /// The delegate graph could not be serialized, or an image could not be
    /// deserialized.
    #[error("delegate serialization failed: {0}")]
    Serialization(String),

    /// The helper executable could not be located.
    #[error("cannot find `{0}` in $PATH")]
    HelperNotFound(String),

    /// The helper process exited non-zero without leaving a usable
    /// after-image.
    #[error("delegate helper failed ({status}): {stderr}")]
    HelperExitNonZero {
        /// Rendered exit status (code or signal).
        status: String,
        /// Captured standard error, empty when the streams were inherited.
        stderr: String,
    },

    /// An auxiliary command (`sudo`, `ssh`, `scp`, `setfacl`, remote
    /// `mkdir`/`rm`, the container runtime) failed, or staging I/O failed.
    #[error("`{command}` failed: {detail}")]
    Transport {
        /// The command or operation that failed.
        command: String,
        /// Exit status and any captured diagnostic.
        detail: String,
    },

    /// The user's method failed in the terminal execution context.
    #[error(transparent)]
    UserMethod(#[from] UserMethodError),
}

impl Error {
    pub(crate) fn transport(command: impl Into<String>, detail: impl ToString) -> Self {
        Error::Transport {
            command: command.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn transport_io(command: impl Into<String>, err: io::Error) -> Self {
        Error::transport(command, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// A failure raised by the user's method, captured in the terminal execution
/// context and re-materialized in the caller.
///
/// `kind` names the failure class, `message` is human-readable, and
/// `payload` carries optional structured detail. The whole struct crosses
/// process boundaries inside the after-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UserMethodError {
    /// Failure class, e.g. `"value-error"` or `"method-not-found"`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl UserMethodError {
    /// Create a new failure with the given class and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_sanity() {
        let e = Error::Construction("unknown delegate kind `foo`".into());
        assert!(format!("{}", e).contains("foo"));

        let e = Error::HelperExitNonZero {
            status: "exit status: 3".into(),
            stderr: "boom".into(),
        };
        assert!(format!("{}", e).contains("exit status: 3"));
        assert!(format!("{}", e).contains("boom"));

        let e = Error::transport("setfacl", "exit status: 1");
        assert!(format!("{}", e).starts_with("`setfacl`"));
    }

    #[test]
    fn user_method_error_round_trips() {
        let e = UserMethodError::new("value-error", "no such thing")
            .with_payload(serde_json::json!({"have": 3}));
        let json = serde_json::to_string(&e).unwrap();
        let back: UserMethodError = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
        assert_eq!(format!("{}", back), "value-error: no such thing");
    }
}
