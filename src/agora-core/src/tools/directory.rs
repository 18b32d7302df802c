use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{Tool, string_arg};
use crate::error::ToolError;

const TOOL_NAME: &str = "list_directory";

#[derive(Debug, Serialize)]
struct DirEntry {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    size_bytes: u64,
}

/// Lists a sub-directory of a fixed sandbox root.
///
/// Paths with `..` components, absolute paths and anything that resolves
/// (through symlinks) outside the root are refused.
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn denied(message: impl Into<String>) -> ToolError {
        ToolError::PermissionDenied(message.into())
    }

    /// Resolve `requested` inside the sandbox, or explain why not.
    async fn resolve(&self, requested: &str) -> Result<Option<PathBuf>, ToolError> {
        let relative = Path::new(requested);
        for component in relative.components() {
            match component {
                Component::ParentDir => {
                    return Err(Self::denied(format!(
                        "path traversal attempt in '{}'",
                        requested
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Self::denied(format!(
                        "absolute paths are not allowed: '{}'",
                        requested
                    )));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| ToolError::Execution {
                tool: TOOL_NAME.to_string(),
                message: format!("sandbox root unavailable: {}", e),
            })?;

        let full = match tokio::fs::canonicalize(root.join(relative)).await {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        if !full.starts_with(&root) {
            return Err(Self::denied(format!(
                "'{}' resolves outside the sandbox",
                requested
            )));
        }
        Ok(Some(full))
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "List the files and folders in a sub-directory of the sandbox."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory_path": {
                    "type": "string",
                    "description": "Path relative to the sandbox root"
                }
            },
            "required": ["directory_path"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let requested = string_arg(TOOL_NAME, &args, "directory_path")?;
        let failed = |e: std::io::Error| ToolError::Execution {
            tool: TOOL_NAME.to_string(),
            message: e.to_string(),
        };

        let Some(path) = self.resolve(&requested).await? else {
            return Ok(format!("Directory '{}' does not exist.", requested));
        };
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map_err(failed)?
            .is_dir();
        if !is_dir {
            return Ok(format!("'{}' is not a directory.", requested));
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await.map_err(failed)?;
        while let Some(entry) = reader.next_entry().await.map_err(failed)? {
            let metadata = entry.metadata().await.map_err(failed)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if metadata.is_dir() { "directory" } else { "file" },
                size_bytes: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty.", requested));
        }
        serde_json::to_string_pretty(&entries).map_err(|e| ToolError::Execution {
            tool: TOOL_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("project_alpha")).unwrap();
        std::fs::write(dir.path().join("project_alpha/README.md"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("project_alpha/src")).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_lists_entries_sorted() {
        let dir = sandbox();
        let tool = ListDirectoryTool::new(dir.path());
        let out = tool
            .invoke(json!({"directory_path": "project_alpha"}))
            .await
            .unwrap();
        let listed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(listed[0]["name"], "README.md");
        assert_eq!(listed[0]["type"], "file");
        assert_eq!(listed[0]["size_bytes"], 5);
        assert_eq!(listed[1]["name"], "src");
        assert_eq!(listed[1]["type"], "directory");
    }

    #[tokio::test]
    async fn test_rejects_traversal_and_absolute_paths() {
        let dir = sandbox();
        let tool = ListDirectoryTool::new(dir.path());
        let err = tool.invoke(json!({"directory_path": "../"})).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
        let err = tool.invoke(json!({"directory_path": "/etc"})).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_missing_and_empty_directories_are_messages() {
        let dir = sandbox();
        let tool = ListDirectoryTool::new(dir.path());
        let missing = tool.invoke(json!({"directory_path": "nope"})).await.unwrap();
        assert!(missing.contains("does not exist"));
        let empty = tool.invoke(json!({"directory_path": "empty"})).await.unwrap();
        assert!(empty.contains("is empty"));
    }

    #[tokio::test]
    async fn test_file_path_is_not_a_directory() {
        let dir = sandbox();
        let tool = ListDirectoryTool::new(dir.path());
        let out = tool
            .invoke(json!({"directory_path": "project_alpha/README.md"}))
            .await
            .unwrap();
        assert_eq!(out, "'project_alpha/README.md' is not a directory.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_denied() {
        let dir = sandbox();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        let tool = ListDirectoryTool::new(dir.path());
        let err = tool.invoke(json!({"directory_path": "escape"})).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }
}
