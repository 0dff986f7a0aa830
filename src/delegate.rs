use serde::{Deserialize, Serialize};

use crate::hook::DebugHook;
use crate::record::Invocation;
use crate::{Args, Kwargs, Result, TargetObject, Value};

/// State shared by every delegate kind: the link below it, an optional
/// debug pre-hook, and the interactive flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct DelegateCore {
    #[serde(default)]
    pub(crate) subdelegate: Option<Box<Delegate>>,
    #[serde(default)]
    pub(crate) debug_pre_hook: Option<DebugHook>,
    #[serde(default)]
    pub(crate) interactive: bool,
}

/// One link in a delegate chain.
///
/// A delegate either transforms the execution context and forwards the
/// invocation to its subdelegate, or — when it has no subdelegate — runs
/// the method itself. The enum closes the set of link kinds, so a whole
/// chain (including the target object riding in its invocation record)
/// serializes with serde and can be handed to a helper process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delegate {
    /// Runs the method in-process. Terminal link of every chain.
    Direct(DirectDelegate),
    /// Runs the nested step inside a fresh temporary working directory.
    WorkDir(crate::workdir::WorkDirDelegate),
    /// Crosses into a local child process.
    Process(crate::process::ProcessDelegate),
    /// Crosses to another user via `sudo`.
    Sudo(crate::sudo::SudoDelegate),
    /// Crosses to a remote host via `ssh`/`scp`.
    Ssh(crate::ssh::SshDelegate),
    /// Crosses into a Slurm allocation via `salloc srun`.
    Slurm(crate::slurm::SlurmDelegate),
    /// Crosses into a Docker container.
    Docker(crate::docker::DockerDelegate),
}

impl Delegate {
    /// Execute `target.method(args, kwargs)` through this chain.
    ///
    /// On success, returns the method's return value and overwrites
    /// `target`'s attribute state with the state the method left behind in
    /// the terminal execution context. On failure, `target` is untouched.
    pub fn invoke(
        &mut self,
        target: &mut TargetObject,
        method: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<Value> {
        let mut record = Invocation::new(target.clone(), method, args, kwargs);
        let value = self.forward(&mut record)?;
        target.adopt(record.target());
        Ok(value)
    }

    /// What this link does to cross its boundary. Process-crossing links
    /// run the external-process protocol; in-process links run the debug
    /// pre-hook and continue with [`step`](Self::step).
    pub(crate) fn forward(&mut self, record: &mut Invocation) -> Result<Value> {
        match self {
            Delegate::Direct(_) => {
                self.run_debug_pre_hook()?;
                self.step(record)
            }
            Delegate::WorkDir(_) => crate::workdir::forward(self, record),
            _ => crate::process::forward_external(self, record),
        }
    }

    /// Continue on this side of the boundary: forward to the subdelegate,
    /// or run the method here. The helper process calls this — never
    /// `forward` — on the delegate it deserializes, which is what keeps a
    /// process delegate from re-entering its own protocol.
    pub(crate) fn step(&mut self, record: &mut Invocation) -> Result<Value> {
        match self.core_mut().subdelegate.as_deref_mut() {
            Some(sub) => {
                log::debug!("delegating to {}", sub.kind_name());
                sub.forward(record)
            }
            None => record.call_target(),
        }
    }

    pub(crate) fn run_debug_pre_hook(&self) -> Result<()> {
        if let Some(hook) = &self.core().debug_pre_hook {
            hook.run()?;
        }
        Ok(())
    }

    // The boundary delegates keep their shared state inside their
    // embedded ProcessDelegate, so the core lives one level deeper there.
    pub(crate) fn core(&self) -> &DelegateCore {
        match self {
            Delegate::Direct(d) => &d.core,
            Delegate::WorkDir(d) => &d.core,
            Delegate::Process(d) => &d.core,
            Delegate::Sudo(d) => &d.process.core,
            Delegate::Ssh(d) => &d.process.core,
            Delegate::Slurm(d) => &d.process.core,
            Delegate::Docker(d) => &d.process.core,
        }
    }

    pub(crate) fn core_mut(&mut self) -> &mut DelegateCore {
        match self {
            Delegate::Direct(d) => &mut d.core,
            Delegate::WorkDir(d) => &mut d.core,
            Delegate::Process(d) => &mut d.core,
            Delegate::Sudo(d) => &mut d.process.core,
            Delegate::Ssh(d) => &mut d.process.core,
            Delegate::Slurm(d) => &mut d.process.core,
            Delegate::Docker(d) => &mut d.process.core,
        }
    }

    /// A short name for the link kind, used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Delegate::Direct(_) => "direct",
            Delegate::WorkDir(_) => "workdir",
            Delegate::Process(_) => "process",
            Delegate::Sudo(_) => "sudo",
            Delegate::Ssh(_) => "ssh",
            Delegate::Slurm(_) => "slurm",
            Delegate::Docker(_) => "docker",
        }
    }

    /// The next link in the chain, if any.
    pub fn subdelegate(&self) -> Option<&Delegate> {
        self.core().subdelegate.as_deref()
    }

    /// Whether spawned subprocesses attach to the caller's terminal.
    pub fn interactive(&self) -> bool {
        self.core().interactive
    }

    /// Mark this link and every link below it interactive.
    pub fn make_interactive(&mut self) {
        self.core_mut().interactive = true;
        if let Some(sub) = self.core_mut().subdelegate.as_deref_mut() {
            sub.make_interactive();
        }
    }
}

/// The terminal link: performs the method call in-process.
///
/// Every chain ends in one of these, explicitly or implicitly — any
/// delegate without a subdelegate runs the method itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectDelegate {
    pub(crate) core: DelegateCore,
}

impl DirectDelegate {
    /// Create a terminal link.
    pub fn new() -> Self {
        Self::default()
    }
}

crate::core_builders!(DirectDelegate);

impl From<DirectDelegate> for Delegate {
    fn from(d: DirectDelegate) -> Self {
        Delegate::Direct(d)
    }
}

/// Generates the builder methods every delegate kind shares.
#[macro_export]
#[doc(hidden)]
macro_rules! core_builders {
    ($ty:ty) => {
        impl $ty {
            /// Set the next link in the chain.
            pub fn subdelegate(mut self, subdelegate: impl Into<$crate::Delegate>) -> Self {
                self.core.subdelegate = Some(Box::new(subdelegate.into()));
                self
            }

            /// Attach subprocesses to the caller's terminal.
            pub fn interactive(mut self, interactive: bool) -> Self {
                self.core.interactive = interactive;
                self
            }

            /// Run a [`DebugHook`](crate::DebugHook) before the nested step
            /// and before each spawned command.
            pub fn debug_pre_hook(mut self, hook: $crate::DebugHook) -> Self {
                self.core.debug_pre_hook = Some(hook);
                self
            }
        }
    };
}
