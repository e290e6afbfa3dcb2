//! Shell execution tool.
//!
//! Stateful by contract: working directory and extra environment persist
//! per session across calls, so the model can `cd` once via `workdir` and
//! keep operating there. The executor serializes stateful calls; this
//! handler only has to keep the per-session state table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use pl_domain::cancel::CancelToken;
use pl_domain::convo::ToolSpec;
use pl_domain::error::{Error, Result};

use crate::containment::contain;
use crate::context::ToolCtx;
use crate::registry::ToolHandler;

const MAX_OUTPUT_CHARS: usize = 32_000;

pub fn exec_spec() -> ToolSpec {
    ToolSpec {
        name: "exec".into(),
        description: "Run a shell command inside the workspace. Working directory and \
                      extra environment persist across calls in this conversation."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "workdir": { "type": "string", "description": "Working directory (workspace-relative); persists" },
                "env": { "type": "object", "description": "Extra environment variables; persist" }
            },
            "required": ["command"]
        }),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExecArgs {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
}

/// Per-session shell state.
#[derive(Debug, Clone, Default)]
struct ShellState {
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
}

pub struct ExecTool {
    state: Mutex<HashMap<String, ShellState>>,
}

impl ExecTool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variables that rewrite loader or interpreter behavior.
fn is_dangerous_env_var(name: &str) -> bool {
    const BLOCKED: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "DYLD_INSERT_LIBRARIES",
        "DYLD_LIBRARY_PATH",
        "PATH",
        "HOME",
        "SHELL",
        "PYTHONPATH",
        "PYTHONSTARTUP",
        "NODE_OPTIONS",
        "BASH_ENV",
        "ENV",
        "IFS",
    ];
    let upper = name.to_ascii_uppercase();
    BLOCKED.contains(&upper.as_str())
}

async fn poll_cancelled(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[async_trait::async_trait]
impl ToolHandler for ExecTool {
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String> {
        let args: ExecArgs = serde_json::from_value(args.clone())
            .map_err(|e| Error::ToolFailed(format!("bad arguments: {e}")))?;

        // Resolve and persist session state updates.
        let (cwd, env) = {
            let mut table = self.state.lock();
            let state = table.entry(ctx.session_key.clone()).or_default();

            if let Some(ref wd) = args.workdir {
                let resolved = contain(&ctx.workspace_root, wd)?;
                state.cwd = Some(resolved);
            }
            if let Some(ref extra) = args.env {
                for (key, value) in extra {
                    if is_dangerous_env_var(key) {
                        return Err(Error::ToolDenied(format!(
                            "environment variable '{key}' is blocked by policy"
                        )));
                    }
                    state.env.insert(key.clone(), value.clone());
                }
            }

            let cwd = match &state.cwd {
                Some(c) => c.clone(),
                None => ctx
                    .workspace_root
                    .canonicalize()
                    .map_err(|e| Error::ToolFailed(format!("workspace unavailable: {e}")))?,
            };
            (cwd, state.env.clone())
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&cwd)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::ToolFailed(format!("failed to spawn: {e}")))?;

        // Dropping the output future on cancellation kills the child
        // (kill_on_drop).
        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| Error::ToolFailed(format!("wait failed: {e}")))?
            }
            _ = poll_cancelled(&ctx.cancel) => {
                return Err(Error::ToolFailed("command cancelled".into()));
            }
        };

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str("[stderr]\n");
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if combined.len() > MAX_OUTPUT_CHARS {
            let mut cut = MAX_OUTPUT_CHARS;
            while cut > 0 && !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            combined.truncate(cut);
            combined.push_str("\n[output truncated]");
        }

        let code = output.status.code().unwrap_or(-1);
        if code == 0 {
            Ok(combined)
        } else {
            Ok(format!("exit code {code}\n{combined}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_domain::config::CallerRole;
    use serde_json::json;
    use std::sync::Arc;

    struct NullMemory;

    #[async_trait::async_trait]
    impl pl_domain::memory::MemoryStore for NullMemory {
        async fn save_fact(&self, _k: &str, _v: &str) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _q: &str,
            _k: usize,
        ) -> Result<Vec<pl_domain::memory::MemoryHit>> {
            Ok(vec![])
        }
        async fn daily_log(&self, _d: chrono::NaiveDate, _c: &str) -> Result<()> {
            Ok(())
        }
        fn epoch(&self) -> u64 {
            0
        }
    }

    struct NullScheduler;

    #[async_trait::async_trait]
    impl pl_domain::schedule::Scheduler for NullScheduler {
        async fn register_job(
            &self,
            _cron: &str,
            _spec: pl_domain::schedule::JobSpec,
        ) -> Result<String> {
            Ok("j".into())
        }
        async fn list(&self) -> Result<Vec<pl_domain::schedule::JobInfo>> {
            Ok(vec![])
        }
        async fn remove(&self, _id: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn ctx(workspace: &std::path::Path) -> ToolCtx {
        ToolCtx {
            session_key: "t:c:main".into(),
            caller_id: "alice".into(),
            caller_role: CallerRole::Member,
            workspace_root: workspace.into(),
            cancel: CancelToken::new(),
            memory: Arc::new(NullMemory),
            scheduler: Arc::new(NullScheduler),
        }
    }

    #[tokio::test]
    async fn runs_and_captures_output() {
        let ws = tempfile::tempdir().unwrap();
        let tool = ExecTool::new();
        let out = tool
            .handle(&json!({"command": "printf hello"}), &ctx(ws.path()))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_reported_not_errored() {
        let ws = tempfile::tempdir().unwrap();
        let tool = ExecTool::new();
        let out = tool
            .handle(&json!({"command": "exit 3"}), &ctx(ws.path()))
            .await
            .unwrap();
        assert!(out.starts_with("exit code 3"));
    }

    #[tokio::test]
    async fn workdir_persists_across_calls() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();
        let tool = ExecTool::new();
        let c = ctx(ws.path());

        tool.handle(&json!({"command": "true", "workdir": "sub"}), &c)
            .await
            .unwrap();
        let pwd = tool.handle(&json!({"command": "pwd"}), &c).await.unwrap();
        assert!(pwd.trim_end().ends_with("sub"));
    }

    #[tokio::test]
    async fn env_persists_and_dangerous_env_blocked() {
        let ws = tempfile::tempdir().unwrap();
        let tool = ExecTool::new();
        let c = ctx(ws.path());

        tool.handle(
            &json!({"command": "true", "env": {"GREETING": "bonjour"}}),
            &c,
        )
        .await
        .unwrap();
        let out = tool
            .handle(&json!({"command": "printf \"$GREETING\""}), &c)
            .await
            .unwrap();
        assert_eq!(out, "bonjour");

        let err = tool
            .handle(
                &json!({"command": "true", "env": {"LD_PRELOAD": "/tmp/evil.so"}}),
                &c,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolDenied(_)));
    }

    #[tokio::test]
    async fn workdir_outside_workspace_denied() {
        let ws = tempfile::tempdir().unwrap();
        let tool = ExecTool::new();
        let err = tool
            .handle(&json!({"command": "true", "workdir": "/"}), &ctx(ws.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolDenied(_)));
    }
}
