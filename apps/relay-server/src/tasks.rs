use std::{borrow::Cow, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use relay_core::CorrelationRegistry;
use relay_events::StreamHub;

#[derive(Debug)]
pub struct TaskHandle {
    name: Cow<'static, str>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: impl Into<Cow<'static, str>>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<TaskHandle>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskHandle) {
        trace!(task = task.name(), "task registered");
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Waits up to `grace` for each task, then aborts it.
    pub async fn shutdown_with_grace(self, grace: Duration) {
        for TaskHandle { name, mut handle } in self.tasks {
            if grace.is_zero() {
                handle.abort();
                let _ = handle.await;
                continue;
            }
            let sleeper = tokio::time::sleep(grace);
            tokio::pin!(sleeper);
            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        debug!(task = %name, ?err, "task exited with error");
                    }
                }
                _ = &mut sleeper => {
                    handle.abort();
                    if let Err(err) = handle.await {
                        debug!(task = %name, ?err, "task join after abort failed");
                    }
                }
            }
        }
    }
}

/// Periodically drops pending requests older than `ttl` and streams nobody
/// listens to any more.
pub(crate) fn spawn_correlation_sweeper(
    registry: Arc<CorrelationRegistry>,
    hub: StreamHub,
    ttl: Duration,
    every: Duration,
) -> TaskHandle {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.sweep_expired(ttl);
            let pruned = hub.prune();
            if pruned > 0 {
                debug!(pruned, "idle streams pruned");
            }
        }
    });
    TaskHandle::new("correlation.sweeper", handle)
}
