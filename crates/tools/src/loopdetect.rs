//! Tool-call loop detection.
//!
//! A ring of recent `(tool, args-hash)` signatures is kept per run. Three
//! detectors fire: straight repeats, A-B ping-pong, and known polling
//! tools re-issued with identical arguments. Escalation: a steering note
//! at the warning threshold, a sterner one at critical, run termination at
//! the circuit-breaker.

use std::collections::VecDeque;

use pl_domain::config::LoopConfig;
use pl_domain::convo::ToolCall;
use pl_domain::trace::TraceEvent;

const RING_CAPACITY: usize = 64;

/// What the runner should do about the latest call pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    Clear,
    /// Inject a steering observation into the next model call.
    Warning { message: String },
    Critical { message: String },
    /// Terminate the run with a surfaced failure.
    Break { message: String },
}

pub struct LoopDetector {
    config: LoopConfig,
    ring: VecDeque<String>,
    run_id: String,
}

impl LoopDetector {
    pub fn new(config: LoopConfig, run_id: impl Into<String>) -> Self {
        Self {
            config,
            ring: VecDeque::with_capacity(RING_CAPACITY),
            run_id: run_id.into(),
        }
    }

    /// Record a call and evaluate the detectors.
    pub fn observe(&mut self, call: &ToolCall) -> LoopVerdict {
        let signature = call.args_fingerprint();
        if self.ring.len() == RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(signature);

        let repeat = self.trailing_pattern_len(1);
        let pingpong = self.trailing_pattern_len(2);
        // A polling tool repeating with identical args trips at half the
        // normal thresholds: external state it keeps re-reading is not
        // going to change because it asked again.
        let poll_factor = if self.config.known_poll_tools.contains(&call.tool_name) {
            2
        } else {
            1
        };

        let count = repeat.max(pingpong) as u32 * poll_factor;
        let pattern = if pingpong > repeat {
            self.pattern_names(2)
        } else {
            self.pattern_names(1)
        };

        let verdict = if count >= self.config.break_after {
            LoopVerdict::Break {
                message: format!(
                    "tool-call loop: [{pattern}] repeated past the circuit-breaker \
                     threshold; terminating the run"
                ),
            }
        } else if count >= self.config.critical_after {
            LoopVerdict::Critical {
                message: format!(
                    "you have repeated [{pattern}] {count} times with identical \
                     arguments. This is not converging — stop, state what you \
                     learned, and change approach"
                ),
            }
        } else if count >= self.config.warn_after {
            LoopVerdict::Warning {
                message: format!(
                    "you have repeated [{pattern}] {count} times — consider a \
                     different approach"
                ),
            }
        } else {
            LoopVerdict::Clear
        };

        if !matches!(verdict, LoopVerdict::Clear) {
            let severity = match &verdict {
                LoopVerdict::Warning { .. } => "warning",
                LoopVerdict::Critical { .. } => "critical",
                LoopVerdict::Break { .. } => "break",
                LoopVerdict::Clear => unreachable!(),
            };
            TraceEvent::LoopDetected {
                run_id: self.run_id.clone(),
                pattern: pattern.clone(),
                count,
                severity: severity.into(),
            }
            .emit();
        }

        verdict
    }

    /// Length (in whole pattern repetitions) of the trailing run of a
    /// repeating pattern of `k` signatures. A ping-pong (k=2) needs at
    /// least two distinct signatures to count.
    fn trailing_pattern_len(&self, k: usize) -> usize {
        if self.ring.len() < k * 2 {
            return if k == 1 { self.ring.len() } else { 0 };
        }
        let items: Vec<&String> = self.ring.iter().collect();
        let n = items.len();
        let pattern = &items[n - k..];

        if k == 2 && pattern[0] == pattern[1] {
            return 0; // that's a plain repeat, not a ping-pong
        }

        let mut repetitions = 1;
        let mut idx = n as isize - (2 * k) as isize;
        while idx >= 0 {
            let window = &items[idx as usize..idx as usize + k];
            if window != pattern {
                break;
            }
            repetitions += 1;
            idx -= k as isize;
        }
        repetitions * k
    }

    fn pattern_names(&self, k: usize) -> String {
        let names: Vec<String> = self
            .ring
            .iter()
            .rev()
            .take(k)
            .map(|sig| sig.split(':').next().unwrap_or("unknown").to_string())
            .collect();
        names.into_iter().rev().collect::<Vec<_>>().join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: "c".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopConfig::default(), "run1")
    }

    #[test]
    fn varied_calls_stay_clear() {
        let mut d = detector();
        for i in 0..30 {
            let verdict = d.observe(&call("read_file", json!({ "path": format!("/f{i}") })));
            assert_eq!(verdict, LoopVerdict::Clear);
        }
    }

    #[test]
    fn repeat_escalates_warning_critical_break() {
        let mut d = detector();
        let c = call("read_file", json!({"path": "/same"}));

        let mut verdicts = Vec::new();
        for _ in 0..25 {
            verdicts.push(d.observe(&c));
        }
        assert!(matches!(verdicts[7], LoopVerdict::Warning { .. })); // 8th call
        assert!(matches!(verdicts[14], LoopVerdict::Critical { .. })); // 15th
        assert!(matches!(verdicts[24], LoopVerdict::Break { .. })); // 25th
    }

    #[test]
    fn ping_pong_detected() {
        let mut d = detector();
        let a = call("read_file", json!({"path": "/a"}));
        let b = call("write_file", json!({"path": "/b", "content": "x"}));

        let mut last = LoopVerdict::Clear;
        for _ in 0..8 {
            d.observe(&a);
            last = d.observe(&b);
        }
        // 16 alternating calls ≥ warning threshold.
        match &last {
            LoopVerdict::Warning { message } | LoopVerdict::Critical { message } => {
                assert!(message.contains("read_file"));
                assert!(message.contains("write_file"));
            }
            other => panic!("expected warning/critical, got {other:?}"),
        }
    }

    #[test]
    fn known_poll_tool_trips_early() {
        let mut d = detector();
        let c = call("list_dir", json!({"path": "/w"}));
        let mut first_warning_at = None;
        for i in 1..=10 {
            if !matches!(d.observe(&c), LoopVerdict::Clear) {
                first_warning_at = Some(i);
                break;
            }
        }
        // Poll factor 2: warns at 4 identical calls instead of 8.
        assert_eq!(first_warning_at, Some(4));
    }

    #[test]
    fn different_args_reset_the_run() {
        let mut d = detector();
        for _ in 0..7 {
            d.observe(&call("read_file", json!({"path": "/same"})));
        }
        // A different call breaks the chain before the warning threshold.
        assert_eq!(
            d.observe(&call("read_file", json!({"path": "/other"}))),
            LoopVerdict::Clear
        );
        assert_eq!(
            d.observe(&call("read_file", json!({"path": "/same"}))),
            LoopVerdict::Clear
        );
    }
}
