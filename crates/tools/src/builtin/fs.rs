//! Filesystem tools. Every path goes through workspace containment before
//! it is touched.

use serde_json::Value;

use pl_domain::convo::ToolSpec;
use pl_domain::error::{Error, Result};

use crate::containment::contain;
use crate::context::ToolCtx;
use crate::registry::ToolHandler;

const MAX_READ_BYTES: u64 = 512 * 1024;

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ToolFailed(format!("missing '{key}'")))
}

// ── read_file ──────────────────────────────────────────────────────

pub fn read_file_spec() -> ToolSpec {
    ToolSpec {
        name: "read_file".into(),
        description: "Read a text file from the workspace.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" }
            },
            "required": ["path"]
        }),
    }
}

pub struct ReadFileTool;

#[async_trait::async_trait]
impl ToolHandler for ReadFileTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let path = contain(&ctx.workspace_root, str_arg(args, "path")?)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::ToolFailed(format!("cannot stat: {e}")))?;
        if meta.len() > MAX_READ_BYTES {
            return Err(Error::ToolFailed(format!(
                "file is {} bytes; read limit is {MAX_READ_BYTES}",
                meta.len()
            )));
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::ToolFailed(format!("cannot read: {e}")))
    }
}

// ── write_file ─────────────────────────────────────────────────────

pub fn write_file_spec() -> ToolSpec {
    ToolSpec {
        name: "write_file".into(),
        description: "Write a text file inside the workspace, creating parent directories.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        }),
    }
}

pub struct WriteFileTool;

#[async_trait::async_trait]
impl ToolHandler for WriteFileTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let path = contain(&ctx.workspace_root, str_arg(args, "path")?)?;
        let content = str_arg(args, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::ToolFailed(format!("cannot create parents: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::ToolFailed(format!("cannot write: {e}")))?;

        Ok(format!("wrote {} bytes", content.len()))
    }
}

// ── list_dir ───────────────────────────────────────────────────────

pub fn list_dir_spec() -> ToolSpec {
    ToolSpec {
        name: "list_dir".into(),
        description: "List a workspace directory.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root (default: the root)" }
            }
        }),
    }
}

pub struct ListDirTool;

#[async_trait::async_trait]
impl ToolHandler for ListDirTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = contain(&ctx.workspace_root, raw)?;

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| Error::ToolFailed(format!("cannot list: {e}")))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::ToolFailed(format!("cannot list: {e}")))?
        {
            let kind = if entry.path().is_dir() { "dir" } else { "file" };
            names.push(format!("{kind}\t{}", entry.file_name().to_string_lossy()));
        }
        names.sort();

        if names.is_empty() {
            Ok("(empty)".into())
        } else {
            Ok(names.join("\n"))
        }
    }
}
