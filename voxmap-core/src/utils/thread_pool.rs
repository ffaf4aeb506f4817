use std::thread;

/// A pool of threads that drains a queue of independent tasks.
///
/// Tasks are plain values pulled from a shared channel, so the closure
/// may borrow from the caller's stack; all borrows end when `run`
/// returns. Each invocation receives the id of the thread executing it.
pub struct ThreadPool {
    num_threads: usize,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0, "thread pool needs at least one thread");
        ThreadPool { num_threads }
    }

    /// Creates a pool with one thread per available CPU core.
    pub fn with_available_parallelism() -> Self {
        let num_threads = thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);
        ThreadPool::new(num_threads)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `task_fn` once per task, distributing the tasks across the
    /// pool. Returns the results in task order.
    pub fn run<A, R, F>(&self, tasks: Vec<A>, task_fn: F) -> Vec<R>
    where
        A: Send,
        R: Send,
        F: Fn(usize, A) -> R + Sync,
    {
        let num_tasks = tasks.len();
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        for entry in tasks.into_iter().enumerate() {
            // Receivers stay alive until the scope ends, so this cannot fail.
            let _ = task_tx.send(entry);
        }
        drop(task_tx);

        let mut indexed_results: Vec<(usize, R)> = thread::scope(|scope| {
            let task_fn = &task_fn;
            let workers: Vec<_> = (0..self.num_threads)
                .map(|thread_id| {
                    let task_rx = task_rx.clone();
                    scope.spawn(move || {
                        let mut results = Vec::new();
                        for (task_id, task) in task_rx.iter() {
                            results.push((task_id, task_fn(thread_id, task)));
                        }
                        results
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().expect("thread pool worker panicked"))
                .collect()
        });

        debug_assert_eq!(indexed_results.len(), num_tasks);
        indexed_results.sort_unstable_by_key(|(task_id, _)| *task_id);
        indexed_results.into_iter().map(|(_, result)| result).collect()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        ThreadPool::with_available_parallelism()
    }
}
