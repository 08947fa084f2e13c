use crate::types::{AgentKind, Task};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct QueuedTask {
    priority: u32,
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the lowest priority number, then the
        // earliest submission, must compare greatest.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending tasks ordered by ascending priority number, FIFO within a priority.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task and returns its submission sequence number.
    pub fn push(&mut self, task: Task) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedTask {
            priority: task.priority,
            seq,
            task,
        });
        seq
    }

    /// Puts a popped task back under its original sequence number.
    pub fn requeue(&mut self, task: Task, seq: u64) {
        self.heap.push(QueuedTask {
            priority: task.priority,
            seq,
            task,
        });
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|q| q.task)
    }

    /// Pops the most urgent task whose agent kind `available` accepts,
    /// together with its sequence number.
    ///
    /// Tasks skipped on the way keep their original position.
    pub fn pop_runnable<F>(&mut self, mut available: F) -> Option<(Task, u64)>
    where
        F: FnMut(AgentKind) -> bool,
    {
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            if available(entry.task.agent_kind()) {
                found = Some((entry.task, entry.seq));
                break;
            }
            skipped.push(entry);
        }
        self.heap.extend(skipped);
        found
    }

    pub fn remove(&mut self, task_id: &str) -> Option<Task> {
        let mut removed = None;
        self.heap.retain(|q| {
            if removed.is_none() && q.task.id == task_id {
                removed = Some(q.task.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.heap.iter().any(|q| q.task.id == task_id)
    }

    /// Removes every pending task, most urgent first.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(self.heap.len());
        while let Some(task) = self.pop() {
            tasks.push(task);
        }
        tasks
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
