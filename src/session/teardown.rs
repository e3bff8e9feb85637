//! Ordered, run-once cleanup
//!
//! Every setup stage registers how to undo itself. Running the teardown
//! undoes the stages in reverse order; steps are consumed as they run, so a
//! second run (from another failure path or from `Drop`) does nothing.

use parking_lot::Mutex;
use tracing::debug;

type Step = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct Teardown {
    steps: Mutex<Vec<(&'static str, Step)>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&self, stage: &'static str, step: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.steps.lock().push((stage, Box::new(step)));
    }

    /// Run pending steps last-in first-out. Returns how many ran.
    pub fn run(&self) -> usize {
        let steps = std::mem::take(&mut *self.steps.lock());
        let count = steps.len();
        for (stage, step) in steps.into_iter().rev() {
            debug!(stage, "tearing down");
            step();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.steps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().is_empty()
    }
}
