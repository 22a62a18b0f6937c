//! Ordered job list with a cursor

use serde::{Deserialize, Serialize};

use crate::deploy::job::Job;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    jobs: Vec<Job>,
    cursor: usize,
}

impl Queue {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs, cursor: 0 }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Index of the job to run next; equals `len()` once finished
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Job at the cursor, `None` when finished
    pub fn current(&self) -> Option<&Job> {
        self.jobs.get(self.cursor)
    }

    pub fn get(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.jobs.len()
    }

    /// Move past the current job. Never beyond `len()`.
    pub fn advance(&mut self) {
        if self.cursor < self.jobs.len() {
            self.cursor += 1;
        }
    }

    /// Move the cursor back to an earlier position
    pub fn rewind_to(&mut self, index: usize) {
        if index < self.cursor {
            self.cursor = index;
        }
    }
}
