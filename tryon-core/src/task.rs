//! Tracked background tasks keyed by frame sequence.
//!
//! Each upload exchange runs in its own tokio task. The set keeps the
//! `JoinHandle`s so a single exchange can be aborted when its job times
//! out, and every outstanding exchange can be aborted when the session
//! stops.

use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinHandle;

pub struct SequencedTask {
    sequence: u64,
    handle: JoinHandle<()>,
}

impl SequencedTask {
    /// Spawn `fut` on the runtime, tagged with `sequence`.
    pub fn spawn<Fut>(sequence: u64, fut: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            sequence,
            handle: tokio::spawn(fut),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Default)]
pub struct TaskSet {
    tasks: HashMap<u64, SequencedTask>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task for `sequence`, first dropping finished entries.
    pub fn spawn<Fut>(&mut self, sequence: u64, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.prune();
        let task = SequencedTask::spawn(sequence, fut);
        if let Some(previous) = self.tasks.insert(task.sequence(), task) {
            previous.abort();
        }
    }

    /// Abort the task for `sequence`. Returns `false` if none was running.
    pub fn abort(&mut self, sequence: u64) -> bool {
        match self.tasks.remove(&sequence) {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }

    /// Abort everything still running. Returns how many were aborted.
    pub fn abort_all(&mut self) -> usize {
        let mut aborted = 0;
        for (_, task) in self.tasks.drain() {
            if !task.is_finished() {
                aborted += 1;
            }
            task.abort();
        }
        aborted
    }

    /// Number of tasks that have not finished yet.
    pub fn running(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }

    fn prune(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn abort_stops_pending_task() {
        let mut set = TaskSet::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<u64>(1);
        set.spawn(1, async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = tx.send(1).await;
        });

        assert_eq!(set.running(), 1);
        assert!(set.abort(1));
        // The sender is dropped with the aborted future.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn finished_tasks_are_pruned() {
        let mut set = TaskSet::new();
        set.spawn(1, async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(set.running(), 0);

        set.spawn(2, std::future::pending());
        assert_eq!(set.running(), 1);
        assert_eq!(set.abort_all(), 1);
        assert!(!set.abort(1));
    }
}
