use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delegate::Delegate;
use crate::process::{Boundary, ProcessDelegate};
use crate::Result;

/// Crosses into a container started by `docker run` (or another runtime
/// with the same CLI, e.g. `podman`).
///
/// The image paths handed to the helper are the caller's own paths, so the
/// staging root must be reachable at the same location inside and outside
/// the container; arranging that mount is the caller's job, via
/// [`runtime_args`](DockerDelegate::runtime_args).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerDelegate {
    pub(crate) process: ProcessDelegate,
    image: String,
    #[serde(default = "default_runtime")]
    runtime: String,
    #[serde(default)]
    runtime_args: Vec<String>,
}

fn default_runtime() -> String {
    "docker".into()
}

impl DockerDelegate {
    /// Create a container link running `image`, staging under
    /// `staging_root`, which must be visible at the same path on both
    /// sides of the container boundary.
    pub fn new(image: impl Into<String>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            process: ProcessDelegate::new().staging_root(staging_root),
            image: image.into(),
            runtime: default_runtime(),
            runtime_args: Vec::new(),
        }
    }

    /// Use another container runtime binary in place of `docker`.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Extra arguments for `<runtime> run`: mounts, entrypoint overrides,
    /// and the like.
    pub fn runtime_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The configured image identifier.
    pub fn image(&self) -> &str {
        &self.image
    }
}

crate::process_builders!(DockerDelegate);

impl From<DockerDelegate> for Delegate {
    fn from(d: DockerDelegate) -> Self {
        Delegate::Docker(d)
    }
}

impl Boundary for DockerDelegate {
    fn process(&self) -> &ProcessDelegate {
        &self.process
    }

    fn helper_argv(&self, before: &Path, after: &Path) -> Result<Vec<String>> {
        let mut argv = vec![
            self.runtime.clone(),
            "run".into(),
            "--workdir".into(),
            "/tmp".into(),
        ];
        if self.process.core.interactive {
            argv.push("-it".into());
        }
        argv.extend(self.runtime_args.iter().cloned());
        argv.push(self.image.clone());
        argv.extend(self.process.base_helper_argv(before, after)?);
        Ok(argv)
    }
}
