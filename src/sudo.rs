use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::delegate::Delegate;
use crate::process::{run_aux, run_helper, Boundary, ExitReport, ProcessDelegate};
use crate::staging::Staging;
use crate::Result;

/// Crosses to another user with `sudo`.
///
/// Two things to know about `sudo` here: it strips most of the environment
/// by default, and the target user must be able to reach the staging
/// files. The second is handled by granting ACL entries (`setfacl -R -m
/// u:<user>:rwX`) on the staging root before the helper starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SudoDelegate {
    pub(crate) process: ProcessDelegate,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    sudo_args: Vec<String>,
}

impl SudoDelegate {
    /// Create a sudo link targeting root (no `-u`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the helper as this user (`sudo -u <user>`).
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Extra arguments inserted right after `sudo`.
    pub fn sudo_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sudo_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Stage images under this directory instead of a private temporary
    /// one.
    pub fn staging_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.process = self.process.staging_root(root);
        self
    }

    fn acl_argv(&self, user: &str, root: &Path) -> Vec<String> {
        vec![
            "setfacl".into(),
            "-R".into(),
            "-m".into(),
            format!("u:{}:rwX", user),
            root.display().to_string(),
        ]
    }
}

crate::process_builders!(SudoDelegate);

impl From<SudoDelegate> for Delegate {
    fn from(d: SudoDelegate) -> Self {
        Delegate::Sudo(d)
    }
}

impl Boundary for SudoDelegate {
    fn process(&self) -> &ProcessDelegate {
        &self.process
    }

    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        let mut argv = vec!["sudo".to_string()];
        argv.extend(self.sudo_args.iter().cloned());
        if let Some(user) = &self.user {
            argv.push("-u".into());
            argv.push(user.clone());
        }
        argv.extend(self.process.base_helper_argv(before, after)?);
        Ok(argv)
    }

    fn run(&self, staging: &Staging) -> Result<ExitReport> {
        let core = &self.process.core;
        let hook = core.debug_pre_hook.as_ref();
        if let Some(user) = &self.user {
            run_aux(&self.acl_argv(user, staging.root()), core.interactive, hook)?;
        }
        let argv = self.helper_argv(staging.before_path(), staging.after_path())?;
        run_helper(&argv, core.interactive, hook)
    }
}
