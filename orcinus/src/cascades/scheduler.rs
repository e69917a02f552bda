//! Runs search tasks on a bounded number of worker threads.
//!
//! Tasks are deduplicated by [`JobKey`]: a task depending on a key that already exists waits
//! for that job instead of running it again, and a completed key satisfies later dependencies
//! immediately. A dependency on a job which (transitively) waits for the dependent task would
//! never complete, it's dropped and the dependent task resumes without it.
use std::collections::{HashMap, HashSet};
use std::mem::take;
use std::thread;
use std::time::Instant;

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::cascades::task::{JobKey, Task, TaskControl, TaskImpl};
use crate::cascades::CascadesOptimizer;
use crate::error::{OptResult, OptimizerError};

type JobId = usize;

enum Message {
    Run(JobId),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Queued,
    Running,
    /// Waiting for dependencies.
    Suspended,
    Completed,
}

struct Job {
    key: JobKey,
    task: Option<TaskImpl>,
    state: JobState,
    /// Number of unfinished dependencies.
    pending: usize,
    /// Jobs waiting for this one.
    waiters: Vec<JobId>,
    /// Whether the task runs again after its dependencies, or just completes.
    resume: bool,
}

struct JobTable {
    jobs: Vec<Job>,
    keys: HashMap<JobKey, JobId>,
    /// Jobs not completed yet.
    unfinished: usize,
    /// Jobs queued or running.
    active: usize,
    error: Option<anyhow::Error>,
    stopped: bool,
    workers: usize,
    sender: Sender<Message>,
}

impl JobTable {
    fn add(&mut self, task: TaskImpl, parent: Option<JobId>) {
        let key = task.key();
        if let Some(id) = self.keys.get(&key).copied() {
            let parent = match parent {
                Some(parent) => parent,
                None => return,
            };
            if self.jobs[id].state == JobState::Completed {
                return;
            }
            if self.is_waiting_for(id, parent) {
                trace!(
                    "Dropped cyclic dependency {:?} of {:?}",
                    key,
                    self.jobs[parent].key
                );
                return;
            }
            self.jobs[id].waiters.push(parent);
            self.jobs[parent].pending += 1;
            return;
        }

        let id = self.jobs.len();
        self.jobs.push(Job {
            key: key.clone(),
            task: Some(task),
            state: JobState::Queued,
            pending: 0,
            waiters: parent.into_iter().collect(),
            resume: false,
        });
        self.keys.insert(key, id);
        if let Some(parent) = parent {
            self.jobs[parent].pending += 1;
        }
        self.unfinished += 1;
        self.queue(id);
    }

    /// Whether `job` is `target`, or waits for `target` through a chain of waiters.
    fn is_waiting_for(&self, job: JobId, target: JobId) -> bool {
        let mut stack = vec![target];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == job {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.jobs[current].waiters.iter().copied());
            }
        }
        false
    }

    fn queue(&mut self, id: JobId) {
        self.jobs[id].state = JobState::Queued;
        self.active += 1;
        // Receiver lives as long as the scheduler.
        let _ = self.sender.send(Message::Run(id));
    }

    fn start(&mut self, id: JobId) -> Option<TaskImpl> {
        let job = self.jobs.get_mut(id)?;
        if job.state != JobState::Queued {
            return None;
        }
        job.state = JobState::Running;
        job.task.take()
    }

    fn finish(&mut self, id: JobId, control: TaskControl) {
        self.active -= 1;
        let (task, dependencies, resume) = match control {
            TaskControl::Yield { this, dependencies } => (Some(this), dependencies, true),
            TaskControl::Done { dependencies } => (None, dependencies, false),
        };
        {
            let job = &mut self.jobs[id];
            job.task = task;
            job.resume = resume;
            job.state = JobState::Suspended;
        }

        for dependency in dependencies {
            self.add(dependency, Some(id));
        }

        if self.jobs[id].pending == 0 {
            if resume {
                self.queue(id);
            } else {
                self.complete(id);
            }
        }

        if !self.stopped && self.active == 0 && self.unfinished > 0 {
            self.fail(anyhow!(
                "Search stalled with {} unfinished tasks",
                self.unfinished
            ));
        }
    }

    fn complete(&mut self, id: JobId) {
        let mut completed = vec![id];
        while let Some(id) = completed.pop() {
            let waiters = {
                let job = &mut self.jobs[id];
                job.state = JobState::Completed;
                job.task = None;
                take(&mut job.waiters)
            };
            self.unfinished -= 1;

            for waiter in waiters {
                let (ready, resume) = {
                    let job = &mut self.jobs[waiter];
                    job.pending -= 1;
                    (job.pending == 0, job.resume)
                };
                if ready {
                    if resume {
                        self.queue(waiter);
                    } else {
                        completed.push(waiter);
                    }
                }
            }
        }

        if self.unfinished == 0 {
            self.stop();
        }
    }

    fn fail(&mut self, error: anyhow::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.stop();
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            for _ in 0..self.workers {
                let _ = self.sender.send(Message::Stop);
            }
        }
    }
}

pub(super) struct Scheduler<'a> {
    optimizer: &'a CascadesOptimizer,
    deadline: Option<Instant>,
    workers: usize,
    table: Mutex<JobTable>,
    receiver: Receiver<Message>,
}

impl<'a> Scheduler<'a> {
    pub(super) fn new(optimizer: &'a CascadesOptimizer, deadline: Option<Instant>) -> Self {
        let workers = optimizer.context().config.parallelism.max(1);
        let (sender, receiver) = unbounded();
        Self {
            optimizer,
            deadline,
            workers,
            table: Mutex::new(JobTable {
                jobs: vec![],
                keys: HashMap::new(),
                unfinished: 0,
                active: 0,
                error: None,
                stopped: false,
                workers,
                sender,
            }),
            receiver,
        }
    }

    /// Runs `root` and everything it depends on.
    pub(super) fn run(self, root: TaskImpl) -> OptResult<()> {
        self.table.lock().add(root, None);

        thread::scope(|scope| {
            for _ in 1..self.workers {
                scope.spawn(|| self.work());
            }
            self.work();
        });

        let mut table = self.table.into_inner();
        debug!("Scheduler finished {} tasks", table.jobs.len());
        match table.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn work(&self) {
        while let Ok(message) = self.receiver.recv() {
            let id = match message {
                Message::Run(id) => id,
                Message::Stop => return,
            };

            let task = {
                let mut table = self.table.lock();
                if table.stopped {
                    continue;
                }
                table.start(id)
            };
            let task = match task {
                Some(task) => task,
                None => continue,
            };

            let result = match self.interrupted() {
                Some(reason) => Err(OptimizerError::Cancelled { reason }.into()),
                None => task.execute(self.optimizer),
            };

            let mut table = self.table.lock();
            match result {
                Ok(control) => table.finish(id, control),
                Err(error) => table.fail(error),
            }
        }
    }

    fn interrupted(&self) -> Option<String> {
        if self.optimizer.context().cancellation.is_cancelled() {
            return Some("cancellation requested".to_string());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("timeout reached".to_string()),
            _ => None,
        }
    }
}
