//! Job scheduling tool, backed by the [`Scheduler`] interface. Jobs fire
//! as agent turns on the `cron` lane targeting the named chat.

use serde_json::Value;

use pl_domain::convo::ToolSpec;
use pl_domain::error::{Error, Result};
use pl_domain::schedule::JobSpec;

use crate::context::ToolCtx;
use crate::registry::ToolHandler;

pub fn schedule_job_spec() -> ToolSpec {
    ToolSpec {
        name: "schedule_job".into(),
        description: "Schedule a recurring prompt (cron syntax) delivered to this chat.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "cron": { "type": "string", "description": "Cron expression, e.g. '0 9 * * 1-5'" },
                "prompt": { "type": "string", "description": "What to do when the job fires" }
            },
            "required": ["cron", "prompt"]
        }),
    }
}

pub struct ScheduleJobTool;

#[async_trait::async_trait]
impl ToolHandler for ScheduleJobTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let cron = args
            .get("cron")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolFailed("missing 'cron'".into()))?;
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolFailed("missing 'prompt'".into()))?;

        // session_key = channel:chat:branch
        let mut parts = ctx.session_key.splitn(3, ':');
        let (channel_id, chat_id) = match (parts.next(), parts.next()) {
            (Some(ch), Some(chat)) => (ch.to_string(), chat.to_string()),
            _ => {
                return Err(Error::ToolFailed(format!(
                    "malformed session key '{}'",
                    ctx.session_key
                )))
            }
        };

        let id = ctx
            .scheduler
            .register_job(
                cron,
                JobSpec {
                    channel_id,
                    chat_id,
                    prompt: prompt.to_string(),
                },
            )
            .await?;
        Ok(format!("scheduled job {id} ({cron})"))
    }
}
