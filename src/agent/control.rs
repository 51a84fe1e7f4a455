use crate::agent::error::Error;
use std::collections::VecDeque;
use std::mem;
use std::sync::Mutex;

type Task = Box<dyn FnOnce() -> Result<(), Error> + Send>;

/// Task queue of the control thread.
///
/// Probe callbacks run on traced threads and must not fail the traced call, so work (and
/// errors) that belongs to the control thread is posted here and executed on its next idle turn.
#[derive(Default)]
pub struct ControlLoop {
    tasks: Mutex<VecDeque<Task>>,
}

impl ControlLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, task: impl FnOnce() -> Result<(), Error> + Send + 'static) {
        self.tasks.lock().unwrap().push_back(Box::new(task));
    }

    /// Re-raise an error on the next idle turn.
    pub fn defer_error(&self, err: Error) {
        self.post(move || Err(err));
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run tasks queued before this call. Tasks posted meanwhile wait for the next turn.
    pub fn run_idle(&self) -> Vec<Error> {
        let tasks = mem::take(&mut *self.tasks.lock().unwrap());
        tasks.into_iter().filter_map(|task| task().err()).collect()
    }
}
