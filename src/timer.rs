//! Delayed follow-up writes of the prompt/payload handshake.
//!
//! Every task belongs to the connection that was live when it was scheduled.
//! Tearing the connection down cancels the whole queue, so a task can never
//! fire against a later connection.

use crate::types::{Birthday, Color};
use embassy_time::{Duration, Instant};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedTask {
    SendTime,
    SendColor(Color),
    SendBirthday(Birthday),
    RefreshBirthdays,
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    due: Instant,
    task: TimedTask,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<ScheduledTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, task: TimedTask) {
        let due = now + delay;
        debug!("Scheduling {:?} in {}ms", task, delay.as_millis());
        self.tasks.push(ScheduledTask { due, task });
    }

    /// Drops every outstanding task.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.tasks.len();
        self.tasks.clear();
        if cancelled > 0 {
            debug!("Cancelled {} pending timed tasks", cancelled);
        }
        cancelled
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|scheduled| scheduled.due).min()
    }

    /// Removes and returns the tasks due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimedTask> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .tasks
            .drain(..)
            .partition(|scheduled| scheduled.due <= now);
        self.tasks = pending;

        due.sort_by_key(|scheduled| scheduled.due);
        due.into_iter().map(|scheduled| scheduled.task).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_fire_in_deadline_order() {
        let start = Instant::from_millis(1_000);
        let mut queue = TaskQueue::new();
        queue.schedule(start, Duration::from_millis(400), TimedTask::RefreshBirthdays);
        queue.schedule(start, Duration::from_millis(200), TimedTask::SendTime);

        assert_eq!(queue.next_deadline(), Some(Instant::from_millis(1_200)));
        assert!(queue.take_due(Instant::from_millis(1_100)).is_empty());
        assert_eq!(queue.take_due(Instant::from_millis(1_200)), vec![TimedTask::SendTime]);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.take_due(Instant::from_millis(5_000)),
            vec![TimedTask::RefreshBirthdays]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_all_invalidates_queue() {
        let start = Instant::from_millis(0);
        let mut queue = TaskQueue::new();
        queue.schedule(start, Duration::from_millis(200), TimedTask::SendTime);

        assert_eq!(queue.cancel_all(), 1);
        assert_eq!(queue.next_deadline(), None);
        assert!(queue.take_due(Instant::from_millis(1_000)).is_empty());

        queue.schedule(start, Duration::from_millis(200), TimedTask::RefreshBirthdays);
        assert_eq!(
            queue.take_due(Instant::from_millis(1_000)),
            vec![TimedTask::RefreshBirthdays]
        );
    }
}
