//! Persistence boundary: keyed CRUD traits the core depends on but does
//! not implement. [`MemoryStore`] backs tests and embedders that keep
//! everything in process.

use rustc_hash::FxHashMap;

use crate::model::{FormDefinition, Submission};

/// Keyed storage for parsed form definitions
pub trait FormRepository {
    /// Fetch a form by id
    fn get_form(&self, form_id: &str) -> Option<FormDefinition>;
    /// Store (or replace) a form
    fn put_form(&mut self, form: FormDefinition);
}

/// Keyed storage for in-progress and finalized records
pub trait SubmissionRepository {
    /// Fetch a submission by id
    fn get_submission(&self, submission_id: &str) -> Option<Submission>;
    /// Store (or replace) a submission
    fn put_submission(&mut self, submission: Submission);
    /// Discard a submission; returns whether it existed
    fn delete_submission(&mut self, submission_id: &str) -> bool;
}

/// In-memory implementation of both repositories
#[derive(Debug, Default)]
pub struct MemoryStore {
    forms: FxHashMap<String, FormDefinition>,
    submissions: FxHashMap<String, Submission>,
}

impl MemoryStore {
    /// An empty store
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl FormRepository for MemoryStore {
    fn get_form(&self, form_id: &str) -> Option<FormDefinition> {
        self.forms.get(form_id).cloned()
    }

    fn put_form(&mut self, form: FormDefinition) {
        self.forms.insert(form.id.clone(), form);
    }
}

impl SubmissionRepository for MemoryStore {
    fn get_submission(&self, submission_id: &str) -> Option<Submission> {
        self.submissions.get(submission_id).cloned()
    }

    fn put_submission(&mut self, submission: Submission) {
        self.submissions.insert(submission.id.clone(), submission);
    }

    fn delete_submission(&mut self, submission_id: &str) -> bool {
        self.submissions.remove(submission_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submissions_round_trip_and_delete() {
        let mut store = MemoryStore::new();
        let submission = Submission::new("f1", "<data/>");
        let id = submission.id.clone();
        store.put_submission(submission);
        assert!(store.get_submission(&id).is_some());
        assert!(store.delete_submission(&id));
        assert!(!store.delete_submission(&id));
        assert!(store.get_submission(&id).is_none());
    }
}
