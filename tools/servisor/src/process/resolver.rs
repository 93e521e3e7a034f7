// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::SupervisorError;
use crate::helpers::is_executable;
use crate::updater::Updater;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolving the executable is retried at most once, after a single update cycle.
const MAX_RESOLUTION_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolutionMode {
    /// The executable is about to be launched. A miss is fatal.
    Run,

    /// Pure service control operation. A miss is tolerated.
    Control,
}

/// Turns the configured executable reference into an absolute path of an existing executable.
pub(crate) struct ExecutableResolver<'a> {
    context: &'a RuntimeContext,
    config: &'a ServiceConfig,
    updater: Option<&'a dyn Updater>,
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn search_path(exec: &Path) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(exec))
        .find(|candidate| is_executable(candidate))
        .map(absolute)
}

impl<'a> ExecutableResolver<'a> {
    pub(crate) fn new(
        context: &'a RuntimeContext,
        config: &'a ServiceConfig,
        updater: Option<&'a dyn Updater>,
    ) -> Self {
        ExecutableResolver {
            context,
            config,
            updater,
        }
    }

    /// Single pass over the search order: next to servisor, the working directory, then the search path.
    pub(crate) fn locate(&self) -> Option<PathBuf> {
        let exec = Path::new(self.config.exec.trim());
        if exec.is_absolute() {
            return is_executable(exec).then(|| exec.to_path_buf());
        }

        let relative_to = [Some(self.context.executable_dir()), self.config.working_dir()];
        for dir in relative_to.into_iter().flatten() {
            let candidate = dir.join(exec);
            if is_executable(&candidate) {
                return Some(absolute(candidate));
            }
        }

        // bare command names get looked up on the search path, anything else is taken as given
        if exec.components().count() == 1 {
            search_path(exec)
        } else {
            is_executable(exec).then(|| absolute(exec.to_path_buf()))
        }
    }

    /// Returns whether the update cycle has installed anything.
    async fn try_update(&self) -> bool {
        let Some(updater) = self.updater else {
            debug!("no updater available to provide the missing executable");
            return false;
        };

        info!(
            "attempting to obtain '{}' via an update (current version: {}, arch: {})",
            self.config.exec,
            updater.current_version().as_deref().unwrap_or("unknown"),
            updater.arch()
        );
        match updater.do_update().await {
            Ok(updated) => updated,
            Err(source) => {
                warn!("{}", SupervisorError::UpdateCheckFailed { source });
                false
            }
        }
    }

    pub(crate) async fn resolve(&self, mode: ResolutionMode) -> Result<PathBuf, SupervisorError> {
        for attempt in 1..=MAX_RESOLUTION_ATTEMPTS {
            if let Some(path) = self.locate() {
                debug!("resolved '{}' to {}", self.config.exec, path.display());
                return Ok(path);
            }

            if mode == ResolutionMode::Control {
                warn!("could not find '{}'. continuing regardless", self.config.exec);
                return Ok(PathBuf::from(&self.config.exec));
            }

            if attempt == MAX_RESOLUTION_ATTEMPTS || !self.try_update().await {
                break;
            }
        }

        Err(SupervisorError::ExecutableNotFound {
            executable: self.config.exec.clone(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::helpers::make_executable;
    use crate::updater::mock::{MockResult, MockUpdater};
    use std::fs;

    struct Setup {
        _dir: tempfile::TempDir,
        context: RuntimeContext,
        config: ServiceConfig,
        servisor_dir: PathBuf,
        working_dir: PathBuf,
    }

    fn setup(exec: &str) -> anyhow::Result<Setup> {
        let dir = tempfile::tempdir()?;
        let servisor_dir = dir.path().join("bin");
        let working_dir = dir.path().join("work");
        fs::create_dir_all(&servisor_dir)?;
        fs::create_dir_all(&working_dir)?;

        Ok(Setup {
            context: RuntimeContext::new(servisor_dir.join("servisor"), dir.path().join("servisor.json")),
            config: ServiceConfig {
                name: "test".to_string(),
                exec: exec.to_string(),
                dir: working_dir.clone(),
                ..Default::default()
            },
            servisor_dir,
            working_dir,
            _dir: dir,
        })
    }

    fn install(path: &Path) -> anyhow::Result<()> {
        fs::write(path, "#!/bin/sh\nexit 0\n")?;
        make_executable(path)?;
        Ok(())
    }

    #[test]
    fn search_order() -> anyhow::Result<()> {
        let setup = setup("my-node")?;
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, None);
        assert!(resolver.locate().is_none());

        install(&setup.working_dir.join("my-node"))?;
        assert_eq!(resolver.locate(), Some(setup.working_dir.join("my-node")));

        // the binary next to servisor takes precedence
        install(&setup.servisor_dir.join("my-node"))?;
        assert_eq!(resolver.locate(), Some(setup.servisor_dir.join("my-node")));
        Ok(())
    }

    #[test]
    fn non_executable_files_are_skipped() -> anyhow::Result<()> {
        let setup = setup("my-node")?;
        fs::write(setup.servisor_dir.join("my-node"), "not executable")?;
        install(&setup.working_dir.join("my-node"))?;

        let resolver = ExecutableResolver::new(&setup.context, &setup.config, None);
        assert_eq!(resolver.locate(), Some(setup.working_dir.join("my-node")));
        Ok(())
    }

    #[test]
    fn command_names_use_search_path() -> anyhow::Result<()> {
        let setup = setup("sh")?;
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, None);

        let resolved = resolver.locate();
        assert!(resolved.as_deref().is_some_and(Path::is_absolute));

        let setup = self::setup("/bin/sh")?;
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, None);
        assert_eq!(resolver.locate(), Some(PathBuf::from("/bin/sh")));
        Ok(())
    }

    #[tokio::test]
    async fn control_mode_tolerates_missing_executable() -> anyhow::Result<()> {
        let setup = setup("my-node")?;
        let updater = MockUpdater::new(MockResult::Updated);
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, Some(&updater));

        let resolved = resolver.resolve(ResolutionMode::Control).await?;
        assert_eq!(resolved, PathBuf::from("my-node"));
        assert_eq!(updater.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_executable_without_updater() -> anyhow::Result<()> {
        let setup = setup("my-node")?;
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, None);

        let res = resolver.resolve(ResolutionMode::Run).await;
        assert!(matches!(res, Err(SupervisorError::ExecutableNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn single_update_provides_missing_executable() -> anyhow::Result<()> {
        let setup = setup("my-node")?;
        let updater = MockUpdater::new(MockResult::Updated)
            .staging(setup.working_dir.join("my-node"), "#!/bin/sh\nexit 0\n");
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, Some(&updater));

        let resolved = resolver.resolve(ResolutionMode::Run).await?;
        assert_eq!(resolved, setup.working_dir.join("my-node"));
        assert_eq!(updater.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn update_is_attempted_exactly_once() -> anyhow::Result<()> {
        let setup = setup("my-node")?;

        // claims success, but never stages anything
        let updater = MockUpdater::new(MockResult::Updated);
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, Some(&updater));
        let res = resolver.resolve(ResolutionMode::Run).await;
        assert!(matches!(res, Err(SupervisorError::ExecutableNotFound { .. })));
        assert_eq!(updater.calls(), 1);

        let updater = MockUpdater::new(MockResult::Failed);
        let resolver = ExecutableResolver::new(&setup.context, &setup.config, Some(&updater));
        let res = resolver.resolve(ResolutionMode::Run).await;
        assert!(matches!(res, Err(SupervisorError::ExecutableNotFound { .. })));
        assert_eq!(updater.calls(), 1);
        Ok(())
    }
}
