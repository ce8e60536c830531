//! Work posted from any thread to run on the consumer thread.

use crossbeam::channel::{self, Receiver, Sender};

use crate::world::World;

type Task = Box<dyn FnOnce(&World) + Send>;

/// Queue drained by the consumer thread once per frame.
pub struct MainThreadQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// A cloneable handle for posting tasks.
    pub fn handle(&self) -> MainThreadHandle {
        MainThreadHandle {
            tx: self.tx.clone(),
        }
    }

    /// Tasks waiting to run.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Run the tasks queued so far. Tasks they post wait for the next call.
    pub fn run_pending(&self, world: &World) -> usize {
        let count = self.rx.len();
        let mut ran = 0;
        for _ in 0..count {
            let Ok(task) = self.rx.try_recv() else {
                break;
            };
            task(world);
            ran += 1;
        }
        ran
    }
}

/// Posts closures to the consumer thread.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: Sender<Task>,
}

impl MainThreadHandle {
    /// Queue `task`. Returns false if the queue is gone.
    pub fn post(&self, task: impl FnOnce(&World) + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}
