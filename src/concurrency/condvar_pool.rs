//! Mutex + condvar flavour of the task pool (§4.3), functionally identical
//! to [`super::futex_pool`] but built on `std::sync::{Mutex, Condvar}`
//! instead of a raw futex word. The worker that finishes last briefly takes
//! the mutex before signalling, closing the race where the app thread has
//! not yet reached its wait.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};

pub type Task = Box<dyn Fn() + Send + Sync>;

#[derive(PartialEq, Eq, Clone, Copy)]
enum Op {
    Idle,
    Run,
    Exit,
}

struct RunState {
    op: Op,
    next_task_idx: usize,
    done_cnt: usize,
    task_n: usize,
    tasks: Vec<Task>,
    done: bool,
}

struct Shared {
    state: Mutex<RunState>,
    worker_cv: Condvar,
    app_cv: Condvar,
}

pub struct CondvarTaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl CondvarTaskPool {
    pub fn create(worker_n: usize, affinities: &[core_affinity::CoreId]) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RunState {
                op: Op::Idle,
                next_task_idx: 0,
                done_cnt: 0,
                task_n: 0,
                tasks: Vec::new(),
                done: false,
            }),
            worker_cv: Condvar::new(),
            app_cv: Condvar::new(),
        });

        let workers = (0..worker_n)
            .map(|i| {
                let shared = shared.clone();
                let affinity = affinities.get(i).copied();
                std::thread::Builder::new()
                    .name(format!("confluence-condvar-worker-{i}"))
                    .spawn(move || worker_loop(shared, affinity))
                    .expect("spawn worker thread")
            })
            .collect();

        CondvarTaskPool { shared, workers }
    }

    /// Runs `tasks` to completion, waiting up to `timeout`. On success the
    /// internal mutex is momentarily re-locked by the signalling worker and
    /// then released before returning; on timeout it is released as well.
    pub fn run(&self, tasks: Vec<Task>, timeout: Duration) -> Result<()> {
        let task_n = tasks.len();
        if task_n == 0 {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            state.tasks = tasks;
            state.next_task_idx = 0;
            state.done_cnt = 0;
            state.task_n = task_n;
            state.done = false;
            state.op = Op::Run;
        }
        self.shared.worker_cv.notify_all();

        let state = self.shared.state.lock().unwrap();
        let (state, timeout_result) = self
            .shared
            .app_cv
            .wait_timeout_while(state, timeout, |s| !s.done)
            .unwrap();
        if timeout_result.timed_out() && !state.done {
            return Err(Error::Timeout(timeout));
        }
        Ok(())
    }
}

impl Drop for CondvarTaskPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.op = Op::Exit;
        }
        self.shared.worker_cv.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, affinity: Option<core_affinity::CoreId>) {
    if let Some(core) = affinity {
        core_affinity::set_for_current(core);
    }
    loop {
        let mut state = shared.state.lock().unwrap();
        loop {
            match state.op {
                Op::Exit => return,
                Op::Run if state.next_task_idx < state.task_n => break,
                _ => {
                    state = shared.worker_cv.wait(state).unwrap();
                }
            }
        }
        let idx = state.next_task_idx;
        state.next_task_idx += 1;
        let task_n = state.task_n;
        // The task closure itself is trusted not to reenter the pool; the
        // task array is immutable for the duration of this run, so reading
        // `tasks[idx]` while holding the lock only serializes execution
        // between workers, matching this flavour's documented tradeoff
        // against the futex version's lock-free claim step.
        let task_ptr: *const Task = &state.tasks[idx];
        drop(state);
        // SAFETY: `tasks` is not resized or dropped until the next `run`
        // call, which cannot happen until this run's `done` flag is set,
        // which cannot happen until every claimed index (including this
        // one) has finished executing.
        unsafe { (*task_ptr)() };

        let mut state = shared.state.lock().unwrap();
        state.done_cnt += 1;
        if state.done_cnt == task_n {
            state.done = true;
            drop(state);
            shared.app_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_task_runs_exactly_once() {
        let pool = CondvarTaskPool::create(4, &[]);
        let counter = Arc::new(AtomicUsize::new(0));
        let task_n = 41;
        let tasks: Vec<Task> = (0..task_n)
            .map(|_| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();
        pool.run(tasks, Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), task_n);
    }
}
