//! Futex-backed "run N independent tasks to completion" pool (§4.3).
//!
//! `workerN` worker threads park on one shared futex word. `run` stores the
//! task array, zeros the completion counters, flips the futex to the "run"
//! state and wakes every worker. Each worker atomically claims the next
//! task index via `fetch_add`; when the claimed index is in range it
//! executes the task and bumps `done_cnt`. The worker that observes
//! `done_cnt == task_n` is the one that wakes the app thread. Once a
//! worker's pool of claimable indices is drained it zeros its wait word and
//! parks again. `destroy` flips the op to "exit", wakes everyone, and joins.
//!
//! Raw futex syscalls are Linux-only; this module falls back to a
//! spin/yield wait on other platforms so the crate still builds there, at
//! the cost of the syscall-level parking this primitive is named for.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub type Task = Box<dyn Fn() + Send + Sync>;

const OP_IDLE: i32 = 0;
const OP_RUN: i32 = 1;
const OP_EXIT: i32 = 2;

struct Shared {
    thread_futex_var: AtomicI32,
    app_futex_var: AtomicI32,
    op: AtomicI32,
    next_task_idx: AtomicUsize,
    done_cnt: AtomicUsize,
    task_n: AtomicUsize,
    tasks: std::sync::Mutex<Vec<Task>>,
}

#[cfg(target_os = "linux")]
mod futex_sys {
    use std::sync::atomic::AtomicI32;

    pub fn wait(word: &AtomicI32, expected: i32, timeout: Option<std::time::Duration>) {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                ts_ptr,
                std::ptr::null::<i32>(),
                0i32,
            );
        }
    }

    pub fn wake_all(word: &AtomicI32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAKE,
                i32::MAX,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<i32>(),
                0i32,
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod futex_sys {
    use std::sync::atomic::{AtomicI32, Ordering};

    pub fn wait(word: &AtomicI32, expected: i32, timeout: Option<std::time::Duration>) {
        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        while word.load(Ordering::Acquire) == expected {
            if let Some(dl) = deadline {
                if std::time::Instant::now() >= dl {
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    pub fn wake_all(_word: &AtomicI32) {}
}

/// A pool of worker threads that run batches of independent tasks.
pub struct FutexTaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl FutexTaskPool {
    /// Spawns `worker_n` workers, optionally pinned to the given CPU
    /// affinities (one entry per worker, shorter lists leave the remainder
    /// unpinned).
    pub fn create(worker_n: usize, affinities: &[core_affinity::CoreId]) -> Self {
        let shared = Arc::new(Shared {
            thread_futex_var: AtomicI32::new(0),
            app_futex_var: AtomicI32::new(0),
            op: AtomicI32::new(OP_IDLE),
            next_task_idx: AtomicUsize::new(0),
            done_cnt: AtomicUsize::new(0),
            task_n: AtomicUsize::new(0),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let workers = (0..worker_n)
            .map(|i| {
                let shared = shared.clone();
                let affinity = affinities.get(i).copied();
                std::thread::Builder::new()
                    .name(format!("confluence-futex-worker-{i}"))
                    .spawn(move || worker_loop(shared, affinity))
                    .expect("spawn worker thread")
            })
            .collect();

        FutexTaskPool { shared, workers }
    }

    /// Runs `tasks` to completion, waiting up to `timeout`. Returns
    /// [`Error::Timeout`] if not every task finished in time; the cycle
    /// should be treated as aborted for this block in that case.
    pub fn run(&self, tasks: Vec<Task>, timeout: Duration) -> Result<()> {
        let task_n = tasks.len();
        if task_n == 0 {
            return Ok(());
        }
        *self.shared.tasks.lock().unwrap() = tasks;
        self.shared.done_cnt.store(0, Ordering::SeqCst);
        self.shared.next_task_idx.store(0, Ordering::SeqCst);
        self.shared.task_n.store(task_n, Ordering::SeqCst);
        self.shared.op.store(OP_RUN, Ordering::SeqCst);
        self.shared.thread_futex_var.store(1, Ordering::SeqCst);
        futex_sys::wake_all(&self.shared.thread_futex_var);

        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.done_cnt.load(Ordering::SeqCst) == task_n {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }
            futex_sys::wait(&self.shared.app_futex_var, 0, Some(remaining));
        }
    }
}

impl Drop for FutexTaskPool {
    fn drop(&mut self) {
        self.shared.op.store(OP_EXIT, Ordering::SeqCst);
        self.shared.thread_futex_var.store(1, Ordering::SeqCst);
        futex_sys::wake_all(&self.shared.thread_futex_var);
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
        futex_sys::wait(&shared.thread_futex_var, 0, None);
        if shared.thread_futex_var.load(Ordering::SeqCst) == 0 {
            continue;
        }
        match shared.op.load(Ordering::SeqCst) {
            OP_EXIT => return,
            OP_RUN => {
                let task_n = shared.task_n.load(Ordering::SeqCst);
                loop {
                    let idx = shared.next_task_idx.fetch_add(1, Ordering::SeqCst);
                    if idx >= task_n {
                        break;
                    }
                    {
                        let tasks = shared.tasks.lock().unwrap();
                        (tasks[idx])();
                    }
                    let done = shared.done_cnt.fetch_add(1, Ordering::SeqCst) + 1;
                    if done == task_n {
                        shared.app_futex_var.store(1, Ordering::SeqCst);
                        futex_sys::wake_all(&shared.app_futex_var);
                    }
                }
                shared.thread_futex_var.store(0, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn every_task_runs_exactly_once() {
        let pool = FutexTaskPool::create(4, &[]);
        let counter = Arc::new(StdAtomicUsize::new(0));
        let task_n = 37;
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
