//! The fixed worker pool behind every dispatch.
//!
//! Workers park on their channel between jobs; all in-draw synchronization
//! is spin-based and lives with the bin queue. The dispatching thread
//! blocks until every worker reports back, which is what makes lending
//! borrowed resource views to the workers sound.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::blit::BlitTask;
use crate::clear::ClearTask;
use crate::vertex::DrawTask;

pub(crate) enum Job {
    Draw(Arc<DrawTask>),
    Clear(Arc<ClearTask>),
    Blit(Arc<BlitTask>),
}

impl Job {
    fn run(&self, thread_id: usize) {
        match self {
            Job::Draw(task) => task.run(thread_id),
            Job::Clear(task) => task.run(thread_id),
            Job::Blit(task) => task.run(thread_id),
        }
    }
}

enum Command {
    Run(Job),
    Shutdown,
}

#[derive(Default)]
struct DoneSignal {
    finished: Mutex<usize>,
    condvar: Condvar,
}

impl DoneSignal {
    fn notify(&self) {
        *self.finished.lock() += 1;
        self.condvar.notify_one();
    }

    fn wait_for(&self, count: usize) {
        let mut finished = self.finished.lock();
        while *finished < count {
            self.condvar.wait(&mut finished);
        }
        *finished = 0;
    }
}

pub(crate) struct WorkerPool {
    senders: Vec<Sender<Command>>,
    handles: Vec<JoinHandle<()>>,
    done: Arc<DoneSignal>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let done = Arc::new(DoneSignal::default());

        let mut senders = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let (tx, rx) = mpsc::channel::<Command>();
            let done = done.clone();

            let handle = std::thread::Builder::new()
                .name(format!("soft-render-{thread_id}"))
                .spawn(move || {
                    while let Ok(Command::Run(job)) = rx.recv() {
                        job.run(thread_id);
                        done.notify();
                    }
                })
                .expect("failed to spawn render worker");

            senders.push(tx);
            handles.push(handle);
        }

        Self {
            senders,
            handles,
            done,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.senders.len()
    }

    /// Hand `job` to every worker and block until all of them finish.
    pub fn dispatch(&self, job: impl Fn() -> Job) {
        for sender in &self.senders {
            sender.send(Command::Run(job())).ok();
        }
        self.done.wait_for(self.senders.len());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for sender in &self.senders {
            sender.send(Command::Shutdown).ok();
        }
        for handle in self.handles.drain(..) {
            handle.join().ok();
        }
    }
}
