use crate::config::RepositorySettings;
use crate::console::{Console, Tone};
use crate::error::{Result, SourceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Leaves a fresh clone of `repo.branch` in `repo.local_dir`
    async fn fetch(&self, name: &str, repo: &RepositorySettings) -> Result<(), SourceError>;
}

/// Clones every repository, replacing existing local copies.
/// Must run before any unit mounts the directories.
pub async fn clone_repositories(
    fetcher: &dyn SourceFetcher,
    console: &dyn Console,
    repositories: &BTreeMap<String, RepositorySettings>,
) -> Result<()> {
    for (name, repo) in repositories {
        info!("📥 Fetching {} into {:?}", name, repo.local_dir);
        fetcher.fetch(name, repo).await?;
        console.emit(
            Tone::Source,
            &format!("{} successfully cloned from branch {}.", repo.url, repo.branch),
        );
    }
    Ok(())
}

/// Fetches with the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `dir` with an empty, world-writable directory
pub async fn prepare_dir(dir: &Path) -> Result<(), SourceError> {
    let prepare = |source| SourceError::Prepare {
        path: dir.display().to_string(),
        source,
    };

    if tokio::fs::try_exists(dir).await.map_err(prepare)? {
        debug!("Removing existing checkout {:?}", dir);
        tokio::fs::remove_dir_all(dir).await.map_err(prepare)?;
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o777);
    builder.create(dir).await.map_err(prepare)
}

#[async_trait]
impl SourceFetcher for GitCli {
    async fn fetch(&self, name: &str, repo: &RepositorySettings) -> Result<(), SourceError> {
        prepare_dir(&repo.local_dir).await?;

        debug!("Cloning {} ({}) from {}", name, repo.branch, repo.url);
        let output = AsyncCommand::new(&self.binary)
            .arg("clone")
            .arg("--branch")
            .arg(&repo.branch)
            .arg("--single-branch")
            .arg(&repo.url)
            .arg(&repo.local_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(SourceError::Spawn)?;

        if !output.status.success() {
            return Err(SourceError::CloneFailed {
                url: repo.url.clone(),
                branch: repo.branch.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("✅ Cloned {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingFetcher {
        fetched: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl SourceFetcher for RecordingFetcher {
        async fn fetch(&self, name: &str, repo: &RepositorySettings) -> Result<(), SourceError> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(SourceError::CloneFailed {
                    url: repo.url.clone(),
                    branch: repo.branch.clone(),
                    stderr: "Repository not found.".to_string(),
                });
            }
            self.fetched.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn repositories() -> BTreeMap<String, RepositorySettings> {
        ["sso", "feedback_ui"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    RepositorySettings {
                        url: format!("git@example.com:{}.git", name),
                        branch: "master".to_string(),
                        local_dir: PathBuf::from(name),
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn every_repository_is_fetched_and_announced() {
        let fetcher = RecordingFetcher::default();
        let console = MemoryConsole::new();

        clone_repositories(&fetcher, &console, &repositories())
            .await
            .unwrap();

        assert_eq!(*fetcher.fetched.lock().unwrap(), vec!["feedback_ui", "sso"]);
        assert!(console.lines().contains(&(
            Tone::Source,
            "git@example.com:sso.git successfully cloned from branch master.".to_string()
        )));
    }

    #[tokio::test]
    async fn first_clone_failure_stops_fetching() {
        let fetcher = RecordingFetcher {
            fail_on: Some("feedback_ui".to_string()),
            ..Default::default()
        };
        let console = MemoryConsole::new();

        let err = clone_repositories(&fetcher, &console, &repositories())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Source);
        assert!(fetcher.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_checkout_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sso");
        std::fs::create_dir_all(dir.join("stale")).unwrap();
        std::fs::write(dir.join("stale/file.txt"), "old").unwrap();

        prepare_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }
}
