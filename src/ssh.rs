use std::borrow::Cow;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delegate::Delegate;
use crate::process::{run_aux, run_helper, Boundary, ExitReport, ProcessDelegate};
use crate::staging::Staging;
use crate::Result;

/// Crosses to a remote host over `ssh`, staging images with `scp`.
///
/// Authentication must be password-less; if reaching the host requires
/// typing a password, set up keypair authentication first. Each invocation
/// stages its images in a freshly named directory under `/tmp` on the
/// remote side and removes it afterwards.
///
/// Every word of the command executed remotely passes through the remote
/// login shell, so each one is escaped the way a POSIX shell undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshDelegate {
    pub(crate) process: ProcessDelegate,
    user: String,
    host: String,
    #[serde(default)]
    ssh_options: Vec<String>,
}

impl SshDelegate {
    /// Create a remote-shell link executing as `user@host`.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            process: ProcessDelegate::new(),
            user: user.into(),
            host: host.into(),
            ssh_options: Vec::new(),
        }
    }

    /// Extra options passed to every `ssh` invocation (not to `scp`).
    pub fn ssh_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ssh_options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Stage the local image files under this directory instead of a
    /// private temporary one.
    pub fn staging_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.process = self.process.staging_root(root);
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `ssh [options] -t|-T user@host`
    fn ssh_argv(&self) -> Vec<String> {
        let mut argv = vec!["ssh".to_string()];
        argv.extend(self.ssh_options.iter().cloned());
        argv.push(if self.process.core.interactive { "-t" } else { "-T" }.into());
        argv.push(self.destination());
        argv
    }

    /// Run `words` on the remote host, escaping each word once for the
    /// remote login shell.
    fn remote_argv(&self, words: &[String]) -> Vec<String> {
        let mut argv = self.ssh_argv();
        argv.extend(
            words
                .iter()
                .map(|w| shell_escape::unix::escape(Cow::Borrowed(w.as_str())).into_owned()),
        );
        argv
    }

    fn upload_argv(&self, local_before: &Path, stage: &RemoteStage) -> Vec<String> {
        vec![
            "scp".into(),
            local_before.display().to_string(),
            format!("{}:{}", self.destination(), stage.before),
        ]
    }

    fn download_argv(&self, stage: &RemoteStage, local_after: &Path) -> Vec<String> {
        vec![
            "scp".into(),
            format!("{}:{}", self.destination(), stage.after),
            local_after.display().to_string(),
        ]
    }
}

crate::process_builders!(SshDelegate);

impl From<SshDelegate> for Delegate {
    fn from(d: SshDelegate) -> Self {
        Delegate::Ssh(d)
    }
}

/// The per-invocation remote staging directory and image paths, named by a
/// fresh execution id so concurrent invocations from different callers
/// cannot collide.
#[derive(Debug)]
struct RemoteStage {
    dir: String,
    before: String,
    after: String,
}

impl RemoteStage {
    fn new(local_before: &Path, local_after: &Path) -> Self {
        let dir = format!("/tmp/{}", Uuid::new_v4());
        let file_in_dir = |local: &Path| {
            let name = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image.json".into());
            format!("{}/{}", dir, name)
        };
        let before = file_in_dir(local_before);
        let after = file_in_dir(local_after);
        Self { dir, before, after }
    }
}

impl Boundary for SshDelegate {
    fn process(&self) -> &ProcessDelegate {
        &self.process
    }

    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        Ok(self.remote_argv(&self.process.base_helper_argv(before, after)?))
    }

    fn run(&self, staging: &Staging) -> Result<ExitReport> {
        let stage = RemoteStage::new(staging.before_path(), staging.after_path());
        let core = &self.process.core;
        let hook = core.debug_pre_hook.as_ref();

        let run = || -> Result<ExitReport> {
            run_aux(
                &self.remote_argv(&["mkdir".into(), "-p".into(), stage.dir.clone()]),
                core.interactive,
                hook,
            )?;
            run_aux(
                &self.upload_argv(staging.before_path(), &stage),
                core.interactive,
                hook,
            )?;
            let report = run_helper(
                &self.helper_argv(Path::new(&stage.before), Path::new(&stage.after))?,
                core.interactive,
                hook,
            )?;
            // A failing user method still writes an after-image; copy it
            // back if it exists, but never let a missing file shadow the
            // helper's own failure.
            match run_aux(
                &self.download_argv(&stage, staging.after_path()),
                core.interactive,
                hook,
            ) {
                Ok(()) => Ok(report),
                Err(_) if !report.success() => Ok(report),
                Err(err) => Err(err),
            }
        };

        let result = run();
        let cleanup = run_aux(
            &self.remote_argv(&["rm".into(), "-rf".into(), stage.dir.clone()]),
            core.interactive,
            hook,
        );

        match (result, cleanup) {
            (Err(err), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    log::warn!("remote staging cleanup failed: {}", cleanup_err);
                }
                Err(err)
            }
            (Ok(report), Err(cleanup_err)) if report.success() => Err(cleanup_err),
            (Ok(report), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    log::warn!("remote staging cleanup failed: {}", cleanup_err);
                }
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delegate() -> SshDelegate {
        SshDelegate::new("test_fiddler", "ssh-host")
            .ssh_options(["-o", "StrictHostKeyChecking=no"])
            .helper_path("/opt/bin/delegate-function-run")
    }

    #[test]
    fn tty_flag_follows_interactive_mode() {
        assert!(delegate().ssh_argv().contains(&"-T".to_string()));
        let interactive = delegate().interactive(true);
        let argv = interactive.ssh_argv();
        assert!(argv.contains(&"-t".to_string()));
        assert!(!argv.contains(&"-T".to_string()));
    }

    #[test]
    fn remote_command_uses_remote_paths() {
        let d = delegate();
        let argv = d
            .helper_argv(
                Path::new("/tmp/id/x.before.json"),
                Path::new("/tmp/id/x.after.json"),
            )
            .unwrap();
        assert_eq!(
            &argv[..5],
            &[
                "ssh".to_string(),
                "-o".into(),
                "StrictHostKeyChecking=no".into(),
                "-T".into(),
                "test_fiddler@ssh-host".into(),
            ]
        );
        assert!(argv.contains(&"/tmp/id/x.before.json".to_string()));
        assert!(argv.contains(&"/tmp/id/x.after.json".to_string()));
    }

    #[test]
    fn remote_stage_keeps_file_names() {
        let stage = RemoteStage::new(
            Path::new("/local/delegate-abc.before.json"),
            Path::new("/local/delegate-abc.after.json"),
        );
        assert!(stage.dir.starts_with("/tmp/"));
        assert_eq!(
            stage.before,
            format!("{}/delegate-abc.before.json", stage.dir)
        );
        assert_eq!(stage.after, format!("{}/delegate-abc.after.json", stage.dir));
    }

    #[test]
    fn copy_commands_address_the_destination() {
        let d = delegate();
        let stage = RemoteStage {
            dir: "/tmp/id".into(),
            before: "/tmp/id/b.before.json".into(),
            after: "/tmp/id/b.after.json".into(),
        };
        assert_eq!(
            d.upload_argv(Path::new("/local/b.before.json"), &stage),
            vec![
                "scp".to_string(),
                "/local/b.before.json".into(),
                "test_fiddler@ssh-host:/tmp/id/b.before.json".into(),
            ]
        );
        assert_eq!(
            d.download_argv(&stage, Path::new("/local/b.after.json")),
            vec![
                "scp".to_string(),
                "test_fiddler@ssh-host:/tmp/id/b.after.json".into(),
                "/local/b.after.json".into(),
            ]
        );
    }
}
