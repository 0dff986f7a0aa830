use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delegate::Delegate;
use crate::process::{Boundary, ProcessDelegate};
use crate::Result;

/// Crosses into a Slurm allocation with `salloc srun`.
///
/// Slurm workers see the submitter's filesystem only where it is shared,
/// so the staging root is mandatory and must point into that shared
/// filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlurmDelegate {
    pub(crate) process: ProcessDelegate,
}

impl SlurmDelegate {
    /// Create a batch-scheduler link staging under `staging_root`, which
    /// must be shared between the submitting host and the cluster.
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            process: ProcessDelegate::new().staging_root(staging_root),
        }
    }
}

crate::process_builders!(SlurmDelegate);

impl From<SlurmDelegate> for Delegate {
    fn from(d: SlurmDelegate) -> Self {
        Delegate::Slurm(d)
    }
}

impl Boundary for SlurmDelegate {
    fn process(&self) -> &ProcessDelegate {
        &self.process
    }

    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        let mut argv = vec![
            "salloc".to_string(),
            "srun".into(),
            "--export=ALL".into(),
        ];
        if self.process.core.interactive {
            argv.push("--pty".into());
        }
        argv.extend(self.process.base_helper_argv(before, after)?);
        Ok(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn allocates_then_runs_with_exported_environment() {
        let d = SlurmDelegate::new("/scratch").helper_path("/opt/bin/delegate-function-run");
        let argv = d
            .helper_argv(
                Path::new("/scratch/x.before.json"),
                Path::new("/scratch/x.after.json"),
            )
            .unwrap();
        assert_eq!(
            &argv[..4],
            &[
                "salloc".to_string(),
                "srun".into(),
                "--export=ALL".into(),
                "/opt/bin/delegate-function-run".into(),
            ]
        );
    }

    #[test]
    fn interactive_requests_a_pty() {
        let d = SlurmDelegate::new("/scratch")
            .helper_path("/opt/bin/delegate-function-run")
            .interactive(true);
        let argv = d
            .helper_argv(Path::new("/s/b.json"), Path::new("/s/a.json"))
            .unwrap();
        assert_eq!(argv[3], "--pty");
    }

    #[test]
    fn staging_root_is_recorded() {
        let d = SlurmDelegate::new("/scratch");
        assert_eq!(
            d.process.configured_staging_root(),
            Some(Path::new("/scratch"))
        );
    }
}
