use crate::console::Console;
use crate::engine::ContainerEngine;
use crate::error::{DeployError, Result};
use crate::types::{BuildRequest, LogRecord};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Tag given to an image built for a container
pub fn image_tag(container_name: &str) -> String {
    format!("{}_image", container_name)
}

/// Renders a pull record the way it is shown to the user
pub fn format_pull_record(record: &LogRecord) -> Option<String> {
    let status = record.status.as_deref()?;
    Some(match record.progress.as_deref() {
        Some(progress) if !progress.is_empty() => format!("[{}] Progress: {}", status, progress),
        _ => format!("[{}]", status),
    })
}

/// Yields usable image references: pulled ahead of time or built from a recipe
#[derive(Clone)]
pub struct ImageResolver {
    engine: Arc<dyn ContainerEngine>,
    console: Arc<dyn Console>,
    recipes_dir: PathBuf,
}

impl ImageResolver {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        console: Arc<dyn Console>,
        recipes_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            console,
            recipes_dir: recipes_dir.into(),
        }
    }

    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }

    /// Pulls every distinct registry reference once, in first-seen order.
    /// A failed pull stops the step.
    pub async fn prepare_images<'r, I>(&self, references: I) -> Result<()>
    where
        I: IntoIterator<Item = &'r str>,
    {
        let mut seen = BTreeSet::new();
        for reference in references {
            if !seen.insert(reference) {
                continue;
            }

            info!("⬇️  Preparing image: {}", reference);
            let mut log = self.engine.pull_image(reference).await?;
            while let Some(record) = log.next().await {
                if let Some(line) = format_pull_record(&record?) {
                    self.console.progress(&line);
                }
            }
        }
        Ok(())
    }

    /// Builds `<container_name>_image` from the named recipe and returns the tag.
    ///
    /// Every failure, whatever its cause, is reported as an invalid recipe.
    pub async fn build_image_from_dockerfile(
        &self,
        container_name: &str,
        recipe_name: &str,
    ) -> Result<String> {
        let tag = image_tag(container_name);
        info!("🔨 Building {} from recipe {}", tag, recipe_name);

        match self.build(&tag, recipe_name).await {
            Ok(()) => {
                info!("✅ Image built: {}", tag);
                Ok(tag)
            }
            Err(e) => {
                debug!("Build of {} from {} failed: {}", tag, recipe_name, e);
                Err(DeployError::InvalidBuildRecipe {
                    recipe: recipe_name.to_string(),
                })
            }
        }
    }

    async fn build(&self, tag: &str, recipe_name: &str) -> Result<()> {
        let path = self.recipes_dir.join(recipe_name);
        let recipe = tokio::fs::read_to_string(&path).await?;

        let request = BuildRequest {
            tag: tag.to_string(),
            recipe_name: recipe_name.to_string(),
            recipe,
            no_cache: true,
            remove_intermediate: true,
        };

        let mut log = self.engine.build_image(&request).await?;
        while let Some(record) = log.next().await {
            if let Some(line) = record?.stream {
                self.console.plain(line.trim_end());
            }
        }
        Ok(())
    }
}
