use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::chain::DelegateChain;
use crate::delegate::Delegate;
use crate::hook::{DebugHook, HookCall};
use crate::{
    Args, DirectDelegate, DockerDelegate, Error, Kwargs, ProcessDelegate, Result, SlurmDelegate,
    SshDelegate, SudoDelegate, TargetObject, WorkDirDelegate,
};

// Documents can splice other documents in; runaway recursion is a
// configuration mistake, not a use case.
const MAX_INCLUDE_DEPTH: usize = 8;

/// Build a chain recipe from a YAML document.
///
/// The document has a `version` and a `sequence` of links, outermost
/// first; each link's `type` selects a delegate kind and the remaining
/// keys configure it. A string value starting with `$` is replaced by the
/// named environment variable at parse time.
///
/// ```no_run
/// let recipe = delegate_function::chain_from_yaml(r#"
/// version: 0.1
/// sequence:
///   - type: ssh
///     user: test_fiddler
///     host: ssh-host
///     ssh_options: ["-o", "StrictHostKeyChecking=no"]
///   - type: direct
/// "#)?;
/// let chain = recipe.build()?;
/// # Ok::<(), delegate_function::Error>(())
/// ```
pub fn chain_from_yaml(document: &str) -> Result<DelegateChain> {
    load_str(document, 0)
}

/// Build a chain recipe from a YAML document on disk.
///
/// `config`-kind links name their included documents relative to the
/// process working directory, like any other relative path.
pub fn chain_from_file(path: impl AsRef<Path>) -> Result<DelegateChain> {
    load_file(path.as_ref(), 0)
}

fn load_file(path: &Path, depth: usize) -> Result<DelegateChain> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Construction(format!("cannot read chain document {}: {}", path.display(), e))
    })?;
    load_str(&text, depth)
}

fn load_str(document: &str, depth: usize) -> Result<DelegateChain> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(Error::Construction(format!(
            "chain documents nested more than {} deep",
            MAX_INCLUDE_DEPTH
        )));
    }

    let mut raw: serde_yaml::Value = serde_yaml::from_str(document)
        .map_err(|e| Error::Construction(format!("malformed chain document: {}", e)))?;
    substitute_env(&mut raw)?;
    let doc: ChainDocument = serde_yaml::from_value(raw)
        .map_err(|e| Error::Construction(format!("invalid chain document: {}", e)))?;
    log::debug!("loading chain document version {}", doc.version);

    let mut chain = DelegateChain::new();
    for link in doc.sequence {
        match link {
            LinkSpec::Config { path } => {
                for inner in load_file(&path, depth + 1)?.into_links() {
                    chain.push(inner);
                }
            }
            other => chain.push(other.into_delegate()?),
        }
    }
    Ok(chain)
}

/// Replace `$NAME` string scalars throughout the document. Only whole
/// values that look like a variable reference are touched.
fn substitute_env(value: &mut serde_yaml::Value) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                if !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    *s = env::var(name).map_err(|_| {
                        Error::Construction(format!(
                            "environment variable `{}` referenced by the chain document is not set",
                            name
                        ))
                    })?;
                }
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                substitute_env(item)?;
            }
        }
        serde_yaml::Value::Mapping(mapping) => {
            for (_, item) in mapping.iter_mut() {
                substitute_env(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChainDocument {
    version: f64,
    sequence: Vec<LinkSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum LinkSpec {
    Direct,
    Workdir,
    Process {
        staging_root: Option<PathBuf>,
        helper_path: Option<PathBuf>,
        debug_pre_hook: Option<HookSpec>,
        #[serde(default)]
        interactive: bool,
    },
    Sudo {
        user: Option<String>,
        #[serde(default)]
        sudo_args: Vec<String>,
        staging_root: Option<PathBuf>,
        helper_path: Option<PathBuf>,
        debug_pre_hook: Option<HookSpec>,
        #[serde(default)]
        interactive: bool,
    },
    Ssh {
        user: String,
        host: String,
        #[serde(default)]
        ssh_options: Vec<String>,
        staging_root: Option<PathBuf>,
        helper_path: Option<PathBuf>,
        debug_pre_hook: Option<HookSpec>,
        #[serde(default)]
        interactive: bool,
    },
    Slurm {
        staging_root: PathBuf,
        helper_path: Option<PathBuf>,
        debug_pre_hook: Option<HookSpec>,
        #[serde(default)]
        interactive: bool,
    },
    Docker {
        image: String,
        staging_root: PathBuf,
        runtime: Option<String>,
        #[serde(default)]
        runtime_args: Vec<String>,
        helper_path: Option<PathBuf>,
        debug_pre_hook: Option<HookSpec>,
        #[serde(default)]
        interactive: bool,
    },
    Config {
        path: PathBuf,
    },
}

impl LinkSpec {
    fn into_delegate(self) -> Result<Delegate> {
        Ok(match self {
            LinkSpec::Direct => DirectDelegate::new().into(),
            LinkSpec::Workdir => WorkDirDelegate::new().into(),
            LinkSpec::Process {
                staging_root,
                helper_path,
                debug_pre_hook,
                interactive,
            } => {
                let mut d = ProcessDelegate::new().interactive(interactive);
                if let Some(root) = staging_root {
                    d = d.staging_root(root);
                }
                if let Some(path) = helper_path {
                    d = d.helper_path(path);
                }
                if let Some(hook) = debug_pre_hook {
                    d = d.debug_pre_hook(hook.into_hook()?);
                }
                d.into()
            }
            LinkSpec::Sudo {
                user,
                sudo_args,
                staging_root,
                helper_path,
                debug_pre_hook,
                interactive,
            } => {
                let mut d = SudoDelegate::new()
                    .sudo_args(sudo_args)
                    .interactive(interactive);
                if let Some(user) = user {
                    d = d.user(user);
                }
                if let Some(root) = staging_root {
                    d = d.staging_root(root);
                }
                if let Some(path) = helper_path {
                    d = d.helper_path(path);
                }
                if let Some(hook) = debug_pre_hook {
                    d = d.debug_pre_hook(hook.into_hook()?);
                }
                d.into()
            }
            LinkSpec::Ssh {
                user,
                host,
                ssh_options,
                staging_root,
                helper_path,
                debug_pre_hook,
                interactive,
            } => {
                let mut d = SshDelegate::new(user, host)
                    .ssh_options(ssh_options)
                    .interactive(interactive);
                if let Some(root) = staging_root {
                    d = d.staging_root(root);
                }
                if let Some(path) = helper_path {
                    d = d.helper_path(path);
                }
                if let Some(hook) = debug_pre_hook {
                    d = d.debug_pre_hook(hook.into_hook()?);
                }
                d.into()
            }
            LinkSpec::Slurm {
                staging_root,
                helper_path,
                debug_pre_hook,
                interactive,
            } => {
                let mut d = SlurmDelegate::new(staging_root).interactive(interactive);
                if let Some(path) = helper_path {
                    d = d.helper_path(path);
                }
                if let Some(hook) = debug_pre_hook {
                    d = d.debug_pre_hook(hook.into_hook()?);
                }
                d.into()
            }
            LinkSpec::Docker {
                image,
                staging_root,
                runtime,
                runtime_args,
                helper_path,
                debug_pre_hook,
                interactive,
            } => {
                let mut d = DockerDelegate::new(image, staging_root)
                    .runtime_args(runtime_args)
                    .interactive(interactive);
                if let Some(runtime) = runtime {
                    d = d.runtime(runtime);
                }
                if let Some(path) = helper_path {
                    d = d.helper_path(path);
                }
                if let Some(hook) = debug_pre_hook {
                    d = d.debug_pre_hook(hook.into_hook()?);
                }
                d.into()
            }
            LinkSpec::Config { .. } => {
                return Err(Error::Construction(
                    "config links are spliced by the loader".into(),
                ))
            }
        })
    }
}

/// `debug_pre_hook` accepts the keyword `SHELL` or a full hook call.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HookSpec {
    Keyword(String),
    Call {
        target: TargetObject,
        method: String,
        #[serde(default)]
        args: Args,
        #[serde(default)]
        kwargs: Kwargs,
    },
}

impl HookSpec {
    fn into_hook(self) -> Result<DebugHook> {
        match self {
            HookSpec::Keyword(word) if word == "SHELL" => Ok(DebugHook::Shell),
            HookSpec::Keyword(word) => Err(Error::Construction(format!(
                "unknown debug_pre_hook keyword `{}` (expected `SHELL` or a hook call)",
                word
            ))),
            HookSpec::Call {
                target,
                method,
                args,
                kwargs,
            } => Ok(DebugHook::Call(HookCall {
                target,
                method,
                args,
                kwargs,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_kind_parses() {
        let recipe = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: ssh
    user: test_fiddler
    host: ssh-host
    ssh_options: ["-o", "StrictHostKeyChecking=no"]
  - type: sudo
    user: cfiddle
  - type: slurm
    staging_root: /scratch
  - type: docker
    image: cfiddle-slurm:21.08.6.1
    staging_root: /scratch
    runtime_args: ["--entrypoint", "/usr/local/bin/docker-entrypoint.sh"]
  - type: workdir
  - type: process
    helper_path: /opt/bin/delegate-function-run
  - type: direct
"#,
        )
        .unwrap();
        assert_eq!(recipe.len(), 7);
        let chain = recipe.build().unwrap();
        assert_eq!(chain.kind_name(), "ssh");
    }

    #[test]
    fn helper_path_is_used_verbatim() {
        let chain = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: process
    helper_path: /opt/bin/delegate-function-run
  - type: direct
"#,
        )
        .unwrap()
        .build()
        .unwrap();
        match &chain {
            Delegate::Process(p) => assert_eq!(
                p.configured_helper_path(),
                Some(Path::new("/opt/bin/delegate-function-run"))
            ),
            other => panic!("expected a process link, got {}", other.kind_name()),
        }
    }

    #[test]
    fn unknown_kind_is_a_construction_error() {
        let err = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: foo
"#,
        )
        .unwrap_err();
        match err {
            Error::Construction(message) => assert!(message.contains("foo")),
            other => panic!("expected a construction error, got {}", other),
        }
    }

    #[test]
    fn missing_slurm_staging_root_is_rejected() {
        let err = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: slurm
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }

    #[test]
    fn environment_references_resolve_at_parse_time() {
        env::set_var("DELEGATE_TEST_IMAGE", "cfiddle-slurm:21.08.6.1");
        let chain = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: docker
    image: $DELEGATE_TEST_IMAGE
    staging_root: /scratch
"#,
        )
        .unwrap()
        .build()
        .unwrap();
        env::remove_var("DELEGATE_TEST_IMAGE");
        match &chain {
            Delegate::Docker(d) => assert_eq!(d.image(), "cfiddle-slurm:21.08.6.1"),
            other => panic!("expected a docker link, got {}", other.kind_name()),
        }
    }

    #[test]
    fn unset_environment_reference_is_rejected() {
        let err = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: docker
    image: $DELEGATE_TEST_UNSET_IMAGE
    staging_root: /scratch
"#,
        )
        .unwrap_err();
        match err {
            Error::Construction(message) => {
                assert!(message.contains("DELEGATE_TEST_UNSET_IMAGE"))
            }
            other => panic!("expected a construction error, got {}", other),
        }
    }

    #[test]
    fn shell_hook_keyword() {
        let recipe = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: process
    debug_pre_hook: SHELL
"#,
        )
        .unwrap();
        let chain = recipe.build().unwrap();
        assert_eq!(chain.core().debug_pre_hook, Some(DebugHook::Shell));
    }

    #[test]
    fn full_hook_call() {
        let recipe = chain_from_yaml(
            r#"
version: 0.1
sequence:
  - type: process
    debug_pre_hook:
      target:
        type_name: shell
        attrs:
          program: bash
      method: run
"#,
        )
        .unwrap();
        let chain = recipe.build().unwrap();
        match &chain.core().debug_pre_hook {
            Some(DebugHook::Call(call)) => {
                assert_eq!(call.target.type_name(), "shell");
                assert_eq!(call.method, "run");
            }
            other => panic!("expected a call hook, got {:?}", other),
        }
    }

    #[test]
    fn config_links_splice_other_documents() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("trivial.yml");
        fs::write(
            &inner,
            "version: 0.1\nsequence:\n  - type: direct\n  - type: direct\n",
        )
        .unwrap();

        let recipe = chain_from_yaml(&format!(
            "version: 0.1\nsequence:\n  - type: workdir\n  - type: config\n    path: {}\n",
            inner.display()
        ))
        .unwrap();
        assert_eq!(recipe.len(), 3);
    }

    #[test]
    fn missing_version_is_rejected() {
        let err = chain_from_yaml("sequence:\n  - type: direct\n").unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }
}
