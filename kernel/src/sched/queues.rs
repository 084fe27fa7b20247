// SPDX-License-Identifier: MPL-2.0

//! Ready queues and the sleep queue.
//!
//! 32 FIFO ready bands indexed by priority level; the head of the highest
//! non-empty band runs. The sleep queue is a single list ordered by resume
//! time; the timer tick wakes expired entries from the head.

// On hosted builds the host OS dispatches and only the bookkeeping entry
// points are reached.
#![allow(dead_code)]

use crate::config::{THREAD_PRIORITY_LEVELS, THREAD_PRIORITY_MAX, THREAD_PRIORITY_MIN};
use crate::prelude::*;
use crate::thread::ThreadCb;

/// Map a priority (−16…+15) to its ready-band index. Higher priorities get
/// higher bands.
pub fn priority_to_level(priority: i32) -> usize {
    (priority.clamp(THREAD_PRIORITY_MIN, THREAD_PRIORITY_MAX) - THREAD_PRIORITY_MIN) as usize
}

pub(crate) struct RunQueues {
    bands: [VecDeque<Arc<ThreadCb>>; THREAD_PRIORITY_LEVELS],
}

impl RunQueues {
    pub(crate) fn new() -> Self {
        RunQueues {
            bands: array_init::array_init(|_| VecDeque::new()),
        }
    }

    /// Append to the tail of the thread's band.
    pub(crate) fn enqueue(&mut self, thread: Arc<ThreadCb>) {
        let level = priority_to_level(thread.priority());
        self.bands[level].push_back(thread);
    }

    /// Pop the head of the highest non-empty band.
    pub(crate) fn pick_next(&mut self) -> Option<Arc<ThreadCb>> {
        self.bands
            .iter_mut()
            .rev()
            .find_map(|band| band.pop_front())
    }

    /// The highest level with a thread ready, if any.
    pub(crate) fn highest_ready_level(&self) -> Option<usize> {
        self.bands
            .iter()
            .enumerate()
            .rev()
            .find(|(_, band)| !band.is_empty())
            .map(|(level, _)| level)
    }

    /// Whether a running thread at `level` must yield the CPU: true when a
    /// thread of equal or higher priority is ready.
    pub(crate) fn should_preempt(&self, level: usize) -> bool {
        match self.highest_ready_level() {
            Some(ready) => ready >= level,
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bands.iter().map(|band| band.len()).sum()
    }
}

pub(crate) struct SleepEntry {
    pub(crate) resume_time: TimeValNanos,
    pub(crate) thread: Arc<ThreadCb>,
}

/// Time-ordered queue of sleeping threads. Entries with equal resume times
/// keep FIFO order.
pub(crate) struct SleepQueue {
    entries: VecDeque<SleepEntry>,
}

impl SleepQueue {
    pub(crate) const fn new() -> Self {
        SleepQueue {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn insert(&mut self, thread: Arc<ThreadCb>, resume_time: TimeValNanos) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.resume_time > resume_time)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            SleepEntry {
                resume_time,
                thread,
            },
        );
    }

    pub(crate) fn remove(&mut self, thread: &Arc<ThreadCb>) {
        self.entries.retain(|e| !Arc::ptr_eq(&e.thread, thread));
    }

    /// Pop every entry whose deadline has passed.
    pub(crate) fn expire(&mut self, now: TimeValNanos) -> Vec<Arc<ThreadCb>> {
        let mut expired = Vec::new();
        while let Some(head) = self.entries.front() {
            if head.resume_time > now {
                break;
            }
            expired.push(self.entries.pop_front().unwrap().thread);
        }
        expired
    }

    pub(crate) fn resume_times(&self) -> Vec<TimeValNanos> {
        self.entries.iter().map(|e| e.resume_time).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

lazy_static! {
    pub(crate) static ref RUN_QUEUES: SpinLock<RunQueues> = SpinLock::new(RunQueues::new());
}

pub(crate) static SLEEP_QUEUE: SpinLock<SleepQueue> = SpinLock::new(SleepQueue::new());

pub(crate) fn run_queue_enqueue(thread: Arc<ThreadCb>) {
    RUN_QUEUES.lock_irq_disabled().enqueue(thread);
}

pub(crate) fn sleep_queue_insert(thread: &Arc<ThreadCb>, resume_time: TimeValNanos) {
    SLEEP_QUEUE
        .lock_irq_disabled()
        .insert(thread.clone(), resume_time);
}

pub(crate) fn sleep_queue_remove(thread: &Arc<ThreadCb>) {
    SLEEP_QUEUE.lock_irq_disabled().remove(thread);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread;

    fn ready(queues: &mut RunQueues, priority: i32) -> Arc<ThreadCb> {
        let t = thread::test_thread(priority);
        queues.enqueue(t.clone());
        t
    }

    #[test]
    fn highest_band_runs_first() {
        let mut queues = RunQueues::new();
        let low = ready(&mut queues, -5);
        let high = ready(&mut queues, 10);
        let normal = ready(&mut queues, 0);

        assert!(Arc::ptr_eq(&queues.pick_next().unwrap(), &high));
        assert!(Arc::ptr_eq(&queues.pick_next().unwrap(), &normal));
        assert!(Arc::ptr_eq(&queues.pick_next().unwrap(), &low));
        assert!(queues.pick_next().is_none());
        assert_eq!(queues.len(), 0);
    }

    #[test]
    fn same_band_is_fifo() {
        let mut queues = RunQueues::new();
        let first = ready(&mut queues, 3);
        let second = ready(&mut queues, 3);
        assert!(Arc::ptr_eq(&queues.pick_next().unwrap(), &first));
        assert!(Arc::ptr_eq(&queues.pick_next().unwrap(), &second));
    }

    #[test]
    fn preemption_needs_equal_or_higher_band() {
        let mut queues = RunQueues::new();
        ready(&mut queues, 0);
        assert!(queues.should_preempt(priority_to_level(0)));
        assert!(queues.should_preempt(priority_to_level(-3)));
        assert!(!queues.should_preempt(priority_to_level(5)));
    }

    #[test]
    fn sleep_queue_is_ordered_and_fifo_on_ties() {
        let mut queue = SleepQueue::new();
        let t1 = thread::test_thread(0);
        let t2 = thread::test_thread(0);
        let t3 = thread::test_thread(0);
        queue.insert(t1.clone(), TimeValNanos::from_millis(30));
        queue.insert(t2.clone(), TimeValNanos::from_millis(10));
        queue.insert(t3.clone(), TimeValNanos::from_millis(30));

        let times = queue.resume_times();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));

        let expired = queue.expire(TimeValNanos::from_millis(30));
        assert_eq!(expired.len(), 3);
        assert!(Arc::ptr_eq(&expired[0], &t2));
        // Equal deadlines keep insertion order.
        assert!(Arc::ptr_eq(&expired[1], &t1));
        assert!(Arc::ptr_eq(&expired[2], &t3));
    }

    #[test]
    fn expire_leaves_future_entries() {
        let mut queue = SleepQueue::new();
        let t = thread::test_thread(0);
        queue.insert(t.clone(), TimeValNanos::from_secs(100));
        assert!(queue.expire(TimeValNanos::from_secs(1)).is_empty());
        assert_eq!(queue.len(), 1);
        queue.remove(&t);
        assert_eq!(queue.len(), 0);
    }
}
