//! Scaffolding and project creation.

use serde::Serialize;
use std::sync::Arc;

use code_play_core::traits::RecordStore;
use code_play_core::types::{FileNode, ProjectRecord};
use code_play_core::{Error, Result};

use crate::catalog::TemplateCatalog;
use crate::instantiate::Instantiator;
use crate::tree::read_tree;

/// Maximum project name length, in characters.
pub const MAX_PROJECT_NAME_LEN: usize = 100;

// =============================================================================
// Scaffolder
// =============================================================================

/// Instantiates templates into throwaway workspaces and reads them back.
///
/// Holds no state between calls.
pub struct Scaffolder {
    catalog: TemplateCatalog,
    instantiator: Arc<dyn Instantiator>,
}

impl Scaffolder {
    pub fn new(catalog: TemplateCatalog, instantiator: Arc<dyn Instantiator>) -> Self {
        Self {
            catalog,
            instantiator,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Instantiate `template_id` and return its file tree.
    ///
    /// The temporary workspace is removed on every exit path, including the
    /// returned future being dropped.
    pub async fn scaffold(&self, template_id: &str) -> Result<Vec<FileNode>> {
        let template = self.catalog.resolve(template_id)?;

        let workspace = tempfile::Builder::new()
            .prefix("code-play-")
            .tempdir()
            .map_err(|e| Error::internal(format!("Failed to create workspace: {}", e)))?;
        let target = workspace.path().join("project");

        let result = async {
            self.instantiator.instantiate(template, &target).await?;
            read_tree(&target).await
        }
        .await;

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "Failed to remove scaffolding workspace");
        }

        match &result {
            Ok(files) => {
                tracing::info!(template = %template, top_level_entries = files.len(), "Template scaffolded")
            }
            Err(e) => tracing::warn!(template = %template, error = %e, "Scaffolding failed"),
        }
        result
    }
}

// =============================================================================
// Project Creation
// =============================================================================

/// A persisted project and its initial files.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProject {
    pub project: ProjectRecord,
    pub files: Vec<FileNode>,
}

/// Creates projects: persist the record, scaffold, and undo the record if
/// scaffolding fails.
pub struct ProjectCreator {
    records: Arc<dyn RecordStore>,
    scaffolder: Arc<Scaffolder>,
}

impl ProjectCreator {
    pub fn new(records: Arc<dyn RecordStore>, scaffolder: Arc<Scaffolder>) -> Self {
        Self {
            records,
            scaffolder,
        }
    }

    pub fn scaffolder(&self) -> &Scaffolder {
        &self.scaffolder
    }

    pub async fn create_project(
        &self,
        owner_id: &str,
        name: &str,
        template_id: &str,
    ) -> Result<CreatedProject> {
        let name = name.trim();
        let len = name.chars().count();
        if len == 0 || len > MAX_PROJECT_NAME_LEN {
            return Err(Error::invalid_request(format!(
                "project name must be 1 to {} characters",
                MAX_PROJECT_NAME_LEN
            )));
        }
        self.scaffolder.catalog().resolve(template_id)?;

        let project = ProjectRecord::new(owner_id, name, template_id);
        self.records.insert_project(&project).await?;
        tracing::info!(project_id = %project.id, owner_id = %owner_id, template = %template_id, "Project created");

        match self.scaffolder.scaffold(template_id).await {
            Ok(files) => Ok(CreatedProject { project, files }),
            Err(e) => {
                match self.records.delete_project(&project.id).await {
                    Ok(_) => {
                        tracing::info!(project_id = %project.id, "Project rolled back after scaffolding failure")
                    }
                    Err(rollback) => tracing::error!(
                        project_id = %project.id,
                        error = %rollback,
                        "Failed to roll back project record"
                    ),
                }
                Err(e)
            }
        }
    }
}
