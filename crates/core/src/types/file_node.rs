//! In-memory file tree produced by project scaffolding.

use serde::{Deserialize, Serialize};

/// Kind of a [`FileNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// A file or directory, with a slash-separated path relative to the workspace root.
///
/// Files carry `content`, directories carry `children` sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(name: impl Into<String>, path: impl Into<String>, content: String) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: FileKind::File,
            content: Some(content),
            children: None,
        }
    }

    pub fn directory(
        name: impl Into<String>,
        path: impl Into<String>,
        children: Vec<FileNode>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: FileKind::Directory,
            content: None,
            children: Some(children),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Depth-first visit of this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a FileNode)) {
        visit(self);
        if let Some(children) = &self.children {
            for child in children {
                child.walk(visit);
            }
        }
    }
}

/// Collect every path in a forest, depth-first.
pub fn collect_paths(nodes: &[FileNode]) -> Vec<&str> {
    let mut paths = Vec::new();
    for node in nodes {
        node.walk(&mut |n| paths.push(n.path.as_str()));
    }
    paths
}
