//! Single-threaded task queue driving feed completions.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send>;

/// FIFO queue of tasks run one at a time by whoever drives the loop.
///
/// Tasks may schedule further tasks; those run after everything already
/// queued.
#[derive(Clone)]
pub struct EventLoop {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Queue a task.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.sender.send(Box::new(task));
    }

    /// Run the oldest queued task. Returns false if the queue was empty.
    pub fn run_one(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Run tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
