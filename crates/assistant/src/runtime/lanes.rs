//! Lane-based concurrency manager.
//!
//! A lane is a named bounded-concurrency queue: `session:<key>` lanes are
//! capacity 1 (serializing a session's runs), `global`, `cron` and
//! `subagent` carry configured bounds, and unknown lanes materialize on
//! demand with the fallback bound. A task enqueued under capacity starts
//! immediately; otherwise it waits in the lane's queue ordered by
//! ascending priority and is pumped when an active task finishes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use pl_domain::config::LanesConfig;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Lane {
    max_concurrent: usize,
    active: usize,
    /// Waiting tasks, kept sorted by ascending priority.
    queue: Vec<(i32, Task)>,
    closed: bool,
}

pub struct LaneManager {
    config: LanesConfig,
    lanes: Mutex<HashMap<String, Lane>>,
}

impl LaneManager {
    pub fn new(config: LanesConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            lanes: Mutex::new(HashMap::new()),
        })
    }

    /// Run `task` on `lane` as soon as capacity allows. Lower `priority`
    /// values run first among queued tasks.
    pub fn enqueue<F>(self: &Arc<Self>, lane: &str, priority: i32, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task: Task = Box::pin(task);
        let start_now = {
            let mut lanes = self.lanes.lock();
            let entry = lanes.entry(lane.to_owned()).or_insert_with(|| Lane {
                max_concurrent: self.config.limit_for(lane),
                active: 0,
                queue: Vec::new(),
                closed: false,
            });

            if entry.closed {
                tracing::warn!(lane, "task rejected: lane closed");
                return;
            }

            if entry.active < entry.max_concurrent {
                entry.active += 1;
                Some(task)
            } else {
                let pos = entry
                    .queue
                    .iter()
                    .position(|(p, _)| *p > priority)
                    .unwrap_or(entry.queue.len());
                entry.queue.insert(pos, (priority, task));
                None
            }
        };

        if let Some(task) = start_now {
            self.spawn_task(lane.to_owned(), task);
        }
    }

    fn spawn_task(self: &Arc<Self>, lane: String, task: Task) {
        let manager = self.clone();
        tokio::spawn(async move {
            task.await;
            manager.finish(&lane);
        });
    }

    /// Release one slot and pump the next queued task, if any.
    fn finish(self: &Arc<Self>, lane: &str) {
        let next = {
            let mut lanes = self.lanes.lock();
            let Some(entry) = lanes.get_mut(lane) else {
                return;
            };
            entry.active = entry.active.saturating_sub(1);
            if entry.closed || entry.queue.is_empty() {
                None
            } else {
                entry.active += 1;
                Some(entry.queue.remove(0).1)
            }
        };

        if let Some(task) = next {
            self.spawn_task(lane.to_owned(), task);
        }
    }

    pub fn active_count(&self, lane: &str) -> usize {
        self.lanes.lock().get(lane).map(|l| l.active).unwrap_or(0)
    }

    pub fn queued_count(&self, lane: &str) -> usize {
        self.lanes
            .lock()
            .get(lane)
            .map(|l| l.queue.len())
            .unwrap_or(0)
    }

    /// Close every lane: queued tasks are discarded, active ones finish.
    pub fn close_all(&self) {
        let mut lanes = self.lanes.lock();
        for (name, lane) in lanes.iter_mut() {
            lane.closed = true;
            if !lane.queue.is_empty() {
                tracing::info!(lane = %name, dropped = lane.queue.len(), "lane closed");
            }
            lane.queue.clear();
        }
    }
}
