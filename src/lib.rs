//! Execute a method call in some *other* execution context (**only works
//! on unix**).
//!
//! This crate runs `target.method(args, kwargs)` somewhere else — a child
//! process, another user via `sudo`, a remote host over `ssh`, a Slurm
//! allocation, a Docker container — and hands back the return value and
//! the mutated target state as if the call had happened locally. Contexts
//! compose: "over ssh, then as another user, then inside a container" is a
//! chain of three links, each of which wraps the next.
//!
//! # Delegates and chains
//!
//! A [`Delegate`] is one link: it either transforms the execution context
//! and forwards the invocation to its subdelegate, or — if it has none —
//! performs the call itself. A chain is built from a [`DelegateChain`]
//! recipe (or declaratively, with [`chain_from_yaml`]) and invoked through
//! its outermost link:
//!
//! ```no_run
//! use delegate_function::{DelegateChain, DirectDelegate, ProcessDelegate};
//! use delegate_function::probe;
//!
//! probe::register_builtins();
//! let mut chain = DelegateChain::new()
//!     .link(ProcessDelegate::new())
//!     .link(DirectDelegate::new())
//!     .build()?;
//!
//! let mut counter = probe::counter(0);
//! chain.invoke(
//!     &mut counter,
//!     "set_value",
//!     vec![serde_json::json!(7)],
//!     delegate_function::Kwargs::new(),
//! )?;
//! assert_eq!(counter.attr("value"), Some(&serde_json::json!(7)));
//! # Ok::<(), delegate_function::Error>(())
//! ```
//!
//! # Crossing a process boundary
//!
//! Process-crossing links serialize the remaining chain — terminal target
//! included — to a *before-image* file, start the `delegate-function-run`
//! helper (optionally behind `sudo`, `ssh`, `salloc srun`, or `docker
//! run`), and read return value and mutated state back from an
//! *after-image*. The helper resumes the chain with its *delegated step*
//! rather than its forward step, so a link never re-crosses its own
//! boundary; nested process links simply produce nested helpers.
//!
//! Because method code cannot be serialized, a target is a [`TargetObject`]:
//! a registered type name plus an attribute map. Every process that touches
//! a chain — callers and helpers alike — must register the same types, see
//! [`register_type`].
//!
//! # Targets of method calls must serialize
//!
//! The whole remaining chain, the invocation, and the target cross each
//! boundary in one image, produced and consumed by the same build of this
//! crate. There is no cross-version format.
//!
//! # Debug pre-hooks
//!
//! Every link can carry a [`DebugHook`] that runs before the nested step
//! and before each command a process link spawns (with
//! [`COMMAND_VAR`] naming the command about to run). Hooks execute
//! arbitrary code, so they stay disarmed unless [`DEBUG_ENABLED_VAR`] is
//! set to `yes`.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links,
    rust_2018_idioms,
    unreachable_pub
)]

#[cfg(not(unix))]
compile_error!("This crate can only be used on unix");

/// Attribute, argument, and return values. A self-describing value model
/// is what lets arbitrary argument and state data cross process
/// boundaries.
pub type Value = serde_json::Value;

/// Positional arguments of an invocation.
pub type Args = Vec<Value>;

/// Keyword arguments of an invocation, and the attribute map of a
/// [`TargetObject`].
pub type Kwargs = serde_json::Map<String, Value>;

mod error;
pub use error::{Error, UserMethodError};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

mod target;
pub use target::{register_type, MethodFn, TargetObject};

mod record;
pub use record::Invocation;

mod hook;
pub use hook::{debug_enabled, DebugHook, HookCall, COMMAND_VAR, DEBUG_ENABLED_VAR};

mod delegate;
pub use delegate::{Delegate, DirectDelegate};

mod workdir;
pub use workdir::WorkDirDelegate;

mod staging;

mod image;

mod process;
pub use process::{ProcessDelegate, HELPER_NAME};

mod sudo;
pub use sudo::SudoDelegate;

mod ssh;
pub use ssh::SshDelegate;

mod slurm;
pub use slurm::SlurmDelegate;

mod docker;
pub use docker::DockerDelegate;

mod chain;
pub use chain::DelegateChain;

mod config;
pub use config::{chain_from_file, chain_from_yaml};

pub mod helper;

pub mod probe;
