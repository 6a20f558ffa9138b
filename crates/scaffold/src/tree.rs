//! Reads a workspace back into an in-memory file tree.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use tokio::fs;

use code_play_core::types::FileNode;
use code_play_core::{Error, Result};

/// Entries skipped at any depth: dependency caches, VCS metadata, build output.
pub const EXCLUDED_NAMES: &[&str] = &["node_modules", ".git", "dist"];

/// Read every file under `root`. Paths are relative to `root`, `/`-separated.
///
/// File content is decoded as UTF-8, replacing invalid sequences. Entries
/// that are neither files nor directories (e.g. symlinks) are skipped.
pub async fn read_tree(root: &Path) -> Result<Vec<FileNode>> {
    read_dir_recursive(root.to_path_buf(), String::new()).await
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::internal(format!("Failed to read {}: {}", path.display(), err))
}

fn read_dir_recursive(dir: PathBuf, base: String) -> BoxFuture<'static, Result<Vec<FileNode>>> {
    async move {
        let mut entries = fs::read_dir(&dir).await.map_err(|e| io_error(&dir, e))?;
        let mut nodes = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if EXCLUDED_NAMES.contains(&name.as_str()) {
                continue;
            }

            let path = if base.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", base, name)
            };
            let entry_path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_error(&entry_path, e))?;

            if file_type.is_dir() {
                let children = read_dir_recursive(entry_path, path.clone()).await?;
                nodes.push(FileNode::directory(name, path, children));
            } else if file_type.is_file() {
                let bytes = fs::read(&entry_path)
                    .await
                    .map_err(|e| io_error(&entry_path, e))?;
                let content = String::from_utf8_lossy(&bytes).into_owned();
                nodes.push(FileNode::file(name, path, content));
            }
        }

        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }
    .boxed()
}
