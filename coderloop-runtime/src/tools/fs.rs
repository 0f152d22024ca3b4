//! Filesystem tools: write_file, read_file, list_files, describe_workspace

use super::{ParamKind, ParamSpec, ToolArgs, ToolHandler, ToolOutput, ToolRegistry, ToolSpec};
use crate::error::{self, Error, Result};
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_MAX_RESULTS: u64 = 200;
const DEFAULT_MAX_LINES: u64 = 200;

/// `*` stays within one path segment; `**/` crosses directories
const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn register(registry: &mut ToolRegistry, workspace: Arc<Workspace>) -> Result<()> {
    registry.register(
        ToolSpec::new(
            "write_file",
            "Create a file inside the project workspace. Refuses to replace an existing file unless overwrite is true.",
        )
        .param(ParamSpec::required("path", ParamKind::String, "Path relative to the workspace root"))
        .param(ParamSpec::required("content", ParamKind::String, "Complete file contents"))
        .param(ParamSpec::optional("overwrite", ParamKind::Boolean, "Replace the file if it exists (default false)"))
        .param(ParamSpec::optional("description", ParamKind::String, "Short note on what the file is for")),
        WriteFile(workspace.clone()),
    )?;
    registry.register(
        ToolSpec::new("read_file", "Read a file inside the project workspace")
            .param(ParamSpec::required("path", ParamKind::String, "Path relative to the workspace root")),
        ReadFile(workspace.clone()),
    )?;
    registry.register(
        ToolSpec::new("list_files", "List files under a directory of the project workspace, sorted")
            .param(ParamSpec::optional("path", ParamKind::String, "Directory to list (default: workspace root)"))
            .param(ParamSpec::optional(
                "pattern",
                ParamKind::String,
                "Optional glob on the workspace-relative path, such as 'src/*.py' or '**/*.md'",
            ))
            .param(ParamSpec::optional("max_results", ParamKind::Integer, "Maximum number of files to return (default 200)")),
        ListFiles(workspace.clone()),
    )?;
    registry.register(
        ToolSpec::new("describe_workspace", "Get a condensed tree of the current project")
            .param(ParamSpec::optional("max_lines", ParamKind::Integer, "Cap on the number of lines (default 200)")),
        DescribeWorkspace(workspace),
    )?;
    Ok(())
}

struct WriteFile(Arc<Workspace>);

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let raw = args.str("path")?;
        let content = args.str("content")?;
        let overwrite = args.bool_or("overwrite", false);

        let path = self.0.resolve(raw)?;
        let rel = self.0.relative(&path);

        if path.is_dir() {
            return Err(Error::invalid_argument(format!("'{}' is a directory", rel)));
        }
        if path.exists() && !overwrite {
            return Err(error::file_exists(rel));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| error::io_failed(rel.clone(), e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| error::io_failed(rel.clone(), e))?;

        let bytes = content.len();
        tracing::debug!(path = %rel, bytes, "wrote file");

        let mut message = format!("wrote {} bytes to {}", bytes, rel);
        if let Some(description) = args.opt_str("description") {
            message.push_str(&format!(" ({})", description));
        }
        Ok(ToolOutput::new(message, json!({ "path": rel, "bytes": bytes })))
    }
}

struct ReadFile(Arc<Workspace>);

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let path = self.0.resolve(args.str("path")?)?;
        let rel = self.0.relative(&path);

        if !path.exists() {
            return Err(error::file_not_found(rel));
        }
        if path.is_dir() {
            return Err(Error::invalid_argument(format!("'{}' is a directory", rel)));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| error::io_failed(rel.clone(), e))?;

        Ok(ToolOutput::new(
            format!("read {} bytes from {}", content.len(), rel),
            json!({ "path": rel, "content": content }),
        ))
    }
}

struct ListFiles(Arc<Workspace>);

#[async_trait]
impl ToolHandler for ListFiles {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let dir = self.0.resolve(args.opt_str("path").unwrap_or("."))?;
        let max_results = args.u64_or("max_results", DEFAULT_MAX_RESULTS)? as usize;
        let pattern = args
            .opt_str("pattern")
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| Error::invalid_argument(format!("invalid pattern '{}': {}", p, e)))
            })
            .transpose()?;
        let rel_dir = self.0.relative(&dir);

        if !dir.exists() {
            return Err(error::file_not_found(rel_dir));
        }
        if !dir.is_dir() {
            return Err(Error::invalid_argument(format!("'{}' is not a directory", rel_dir)));
        }

        let mut files = Vec::new();
        collect_files(&dir, &mut files).map_err(|e| error::io_failed(rel_dir.clone(), e))?;
        let mut files: Vec<String> = files.iter().map(|p| self.0.relative(p)).collect();
        if let Some(pattern) = &pattern {
            files.retain(|f| pattern.matches_with(f, GLOB_OPTIONS));
        }
        files.sort();

        let total = files.len();
        let truncated = total > max_results;
        files.truncate(max_results);

        Ok(ToolOutput::new(
            format!("{} of {} files under {}", files.len(), total, rel_dir),
            json!({ "files": files, "total": total, "truncated": truncated }),
        ))
    }
}

struct DescribeWorkspace(Arc<Workspace>);

#[async_trait]
impl ToolHandler for DescribeWorkspace {
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let max_lines = args.u64_or("max_lines", DEFAULT_MAX_LINES)? as usize;

        let mut lines = Vec::new();
        tree_lines(self.0.root(), 0, &mut lines).map_err(|e| error::io_failed(".", e))?;

        let total = lines.len();
        let truncated = total > max_lines;
        lines.truncate(max_lines);
        if truncated {
            lines.push(format!("... ({} more)", total - max_lines));
        }
        if total == 0 {
            lines.push("(empty)".to_string());
        }

        Ok(ToolOutput::new(
            format!("{} entries in workspace", total),
            json!({ "tree": lines.join("\n"), "entries": total, "truncated": truncated }),
        ))
    }
}

/// Sorted directory entries, symlinks included as plain entries
fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for path in sorted_entries(dir)? {
        let file_type = std::fs::symlink_metadata(&path)?.file_type();
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn tree_lines(dir: &Path, depth: usize, out: &mut Vec<String>) -> std::io::Result<()> {
    for path in sorted_entries(dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let indent = "  ".repeat(depth);
        if std::fs::symlink_metadata(&path)?.file_type().is_dir() {
            out.push(format!("{}{}/", indent, name));
            tree_lines(&path, depth + 1, out)?;
        } else {
            out.push(format!("{}{}", indent, name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolCall;
    use crate::tools::ToolResult;
    use coderloop_error::ErrorKind;
    use serde_json::Value;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Workspace>, ToolRegistry) {
        let dir = TempDir::new().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        let mut registry = ToolRegistry::new();
        register(&mut registry, ws.clone()).unwrap();
        (dir, ws, registry)
    }

    async fn call(registry: &ToolRegistry, name: &str, args: Value) -> ToolResult {
        registry
            .execute(&ToolCall::new("call_1", name, args.to_string()))
            .await
    }

    fn data(result: &ToolResult) -> &Value {
        match result {
            ToolResult::Success { data, .. } => data,
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, ws, registry) = setup();
        let result = call(&registry, "write_file", json!({"path": "src/hello.txt", "content": "hi"})).await;
        assert_eq!(data(&result)["bytes"], 2);
        assert_eq!(std::fs::read_to_string(ws.root().join("src/hello.txt")).unwrap(), "hi");

        let result = call(&registry, "read_file", json!({"path": "src/hello.txt"})).await;
        assert_eq!(data(&result)["content"], "hi");
    }

    #[tokio::test]
    async fn test_write_refuses_overwrite_by_default() {
        let (_dir, ws, registry) = setup();
        std::fs::write(ws.root().join("a.txt"), "old").unwrap();

        let result = call(&registry, "write_file", json!({"path": "a.txt", "content": "new"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::FileExists));
        assert_eq!(std::fs::read_to_string(ws.root().join("a.txt")).unwrap(), "old");

        let result = call(
            &registry,
            "write_file",
            json!({"path": "a.txt", "content": "new", "overwrite": true}),
        )
        .await;
        assert!(!result.is_error());
        assert_eq!(std::fs::read_to_string(ws.root().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_write_outside_workspace() {
        let (dir, _ws, registry) = setup();
        let result = call(&registry, "write_file", json!({"path": "../escape.txt", "content": "x"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::SandboxViolation));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_through_dangling_symlink() {
        let outer = TempDir::new().unwrap();
        let ws = Arc::new(Workspace::new(outer.path().join("ws")).unwrap());
        let mut registry = ToolRegistry::new();
        register(&mut registry, ws.clone()).unwrap();

        let target = outer.path().join("pwned.txt");
        std::os::unix::fs::symlink(&target, ws.root().join("link")).unwrap();

        let result = call(&registry, "write_file", json!({"path": "link", "content": "x"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::SandboxViolation));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() {
        let (_dir, ws, registry) = setup();
        let result = call(&registry, "read_file", json!({"path": "nope.txt"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::FileNotFound));

        std::fs::create_dir(ws.root().join("src")).unwrap();
        let result = call(&registry, "read_file", json!({"path": "src"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArgument));
    }

    #[tokio::test]
    async fn test_list_files_sorted_and_truncated() {
        let (_dir, ws, registry) = setup();
        std::fs::create_dir_all(ws.root().join("src")).unwrap();
        for name in ["b.txt", "a.txt", "src/main.py"] {
            std::fs::write(ws.root().join(name), "").unwrap();
        }

        let result = call(&registry, "list_files", json!({})).await;
        assert_eq!(data(&result)["files"], json!(["a.txt", "b.txt", "src/main.py"]));
        assert_eq!(data(&result)["truncated"], false);

        let result = call(&registry, "list_files", json!({"max_results": 2})).await;
        assert_eq!(data(&result)["files"], json!(["a.txt", "b.txt"]));
        assert_eq!(data(&result)["truncated"], true);
        assert_eq!(data(&result)["total"], 3);

        let result = call(&registry, "list_files", json!({"path": "src"})).await;
        assert_eq!(data(&result)["files"], json!(["src/main.py"]));
    }

    #[tokio::test]
    async fn test_list_files_pattern() {
        let (_dir, ws, registry) = setup();
        std::fs::create_dir_all(ws.root().join("src/pkg")).unwrap();
        for name in ["README.md", "setup.py", "src/main.py", "src/pkg/util.py", "src/notes.md"] {
            std::fs::write(ws.root().join(name), "").unwrap();
        }

        let result = call(&registry, "list_files", json!({"pattern": "src/*.py"})).await;
        assert_eq!(data(&result)["files"], json!(["src/main.py"]));

        let result = call(&registry, "list_files", json!({"pattern": "**/*.py"})).await;
        assert_eq!(data(&result)["files"], json!(["setup.py", "src/main.py", "src/pkg/util.py"]));
        assert_eq!(data(&result)["total"], 3);

        let result = call(&registry, "list_files", json!({"path": "src", "pattern": "**/*.md"})).await;
        assert_eq!(data(&result)["files"], json!(["src/notes.md"]));

        let result = call(&registry, "list_files", json!({"pattern": "src/[.py"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArgument));
    }

    #[tokio::test]
    async fn test_describe_workspace() {
        let (_dir, ws, registry) = setup();
        std::fs::create_dir_all(ws.root().join("src")).unwrap();
        std::fs::write(ws.root().join("src/main.py"), "").unwrap();
        std::fs::write(ws.root().join("README.md"), "").unwrap();

        let result = call(&registry, "describe_workspace", json!({})).await;
        assert_eq!(data(&result)["tree"], "README.md\nsrc/\n  main.py");

        let result = call(&registry, "describe_workspace", json!({"max_lines": 1})).await;
        assert_eq!(data(&result)["tree"], "README.md\n... (2 more)");
        assert_eq!(data(&result)["truncated"], true);
    }

    #[tokio::test]
    async fn test_describe_empty_workspace() {
        let (_dir, _ws, registry) = setup();
        let result = call(&registry, "describe_workspace", json!({})).await;
        assert_eq!(data(&result)["tree"], "(empty)");
    }
}
