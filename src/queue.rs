//! Single-threaded task queue used as a worker's inbox.
//!
//! A worker owns a [`TaskLoop`] and its private state; everything else talks to
//! it by posting closures through a [`TaskQueue`]. Tasks run one at a time in
//! posting order with exclusive access to the state, so the state needs no lock.

use crossbeam_channel::{Receiver, Sender};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Task<S>),
    Quit,
}

/// Sending half of a worker inbox.
pub struct TaskQueue<S> {
    sender: Sender<Message<S>>,
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S: 'static> TaskQueue<S> {
    /// Post a task. Returns false once the loop has exited.
    pub fn post(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.sender.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Ask the loop to exit after running every task posted before this call.
    pub fn quit(&self) -> bool {
        self.sender.send(Message::Quit).is_ok()
    }
}

/// Receiving half, driven by the owning worker thread.
pub struct TaskLoop<S> {
    receiver: Receiver<Message<S>>,
}

/// Create a connected queue/loop pair.
pub fn task_queue<S>() -> (TaskQueue<S>, TaskLoop<S>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (TaskQueue { sender }, TaskLoop { receiver })
}

impl<S> TaskLoop<S> {
    /// Run tasks against `state` until a quit request arrives or every queue
    /// handle is dropped. Returns the number of tasks executed.
    pub fn run(self, state: &mut S) -> usize {
        let mut executed = 0;
        while let Ok(message) = self.receiver.recv() {
            match message {
                Message::Run(task) => {
                    task(state);
                    executed += 1;
                }
                Message::Quit => break,
            }
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_order() {
        let (queue, looper) = task_queue::<Vec<u32>>();
        for i in 0..5 {
            assert!(queue.post(move |log: &mut Vec<u32>| log.push(i)));
        }
        queue.quit();
        let mut log = Vec::new();
        assert_eq!(looper.run(&mut log), 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_tasks_after_quit_are_skipped() {
        let (queue, looper) = task_queue::<Vec<u32>>();
        queue.post(|log: &mut Vec<u32>| log.push(1));
        queue.quit();
        queue.post(|log: &mut Vec<u32>| log.push(2));
        let mut log = Vec::new();
        looper.run(&mut log);
        assert_eq!(log, vec![1]);
    }

    #[test]
    fn test_post_fails_after_loop_exits() {
        let (queue, looper) = task_queue::<u32>();
        queue.quit();
        let mut state = 0;
        looper.run(&mut state);
        assert!(!queue.post(|s: &mut u32| *s += 1));
    }

    #[test]
    fn test_runs_on_worker_thread() {
        let (queue, looper) = task_queue::<Option<std::thread::ThreadId>>();
        let worker = std::thread::spawn(move || {
            let mut seen = None;
            looper.run(&mut seen);
            (seen, std::thread::current().id())
        });
        queue.post(|seen: &mut Option<std::thread::ThreadId>| {
            *seen = Some(std::thread::current().id())
        });
        queue.quit();
        let (seen, worker_id) = worker.join().unwrap();
        assert_eq!(seen, Some(worker_id));
    }
}
