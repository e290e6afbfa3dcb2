//! Long-term memory tools, backed by the [`MemoryStore`] interface.
//!
//! `memory_save` is also what the compaction memory-flush turn calls to
//! persist durable facts before old history is dropped.

use serde_json::Value;

use pl_domain::convo::ToolSpec;
use pl_domain::error::{Error, Result};

use crate::context::ToolCtx;
use crate::registry::ToolHandler;

pub fn memory_save_spec() -> ToolSpec {
    ToolSpec {
        name: "memory_save".into(),
        description: "Save a durable fact to long-term memory.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Short stable identifier (e.g. 'user.timezone')" },
                "value": { "type": "string", "description": "The fact to remember" }
            },
            "required": ["key", "value"]
        }),
    }
}

pub struct MemorySaveTool;

#[async_trait::async_trait]
impl ToolHandler for MemorySaveTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let key = args
            .get("key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolFailed("missing 'key'".into()))?;
        let value = args
            .get("value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolFailed("missing 'value'".into()))?;

        ctx.memory.save_fact(key, value).await?;
        Ok(format!("saved '{key}'"))
    }
}

pub fn memory_search_spec() -> ToolSpec {
    ToolSpec {
        name: "memory_search".into(),
        description: "Search long-term memory for relevant facts.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": ["query"]
        }),
    }
}

pub struct MemorySearchTool;

#[async_trait::async_trait]
impl ToolHandler for MemorySearchTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolFailed("missing 'query'".into()))?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .clamp(1, 25) as usize;

        let hits = ctx.memory.search(query, limit).await?;
        if hits.is_empty() {
            return Ok("no matches".into());
        }
        Ok(hits
            .iter()
            .map(|h| format!("[{:.2}] {}: {}", h.score, h.key, h.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
