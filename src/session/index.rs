//! Arena owning every job definition of a session.

use std::collections::HashMap;

use certlane_model::JobDefinition;

/// What happened to a definition offered to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Insertion {
    Added,
    /// Same name and checksum already present.
    Duplicate,
    /// Same name, different definition. The index is unchanged.
    Conflict { existing_checksum: String },
}

/// Definitions in insertion (catalog) order, looked up by name or checksum.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobIndex {
    jobs: Vec<JobDefinition>,
    by_name: HashMap<String, usize>,
    by_checksum: HashMap<String, usize>,
}

impl JobIndex {
    pub(crate) fn insert(&mut self, job: JobDefinition) -> Insertion {
        if let Some(&idx) = self.by_name.get(job.name()) {
            let existing = &self.jobs[idx];
            if existing.checksum() == job.checksum() {
                return Insertion::Duplicate;
            }
            return Insertion::Conflict {
                existing_checksum: existing.checksum().to_string(),
            };
        }
        let idx = self.jobs.len();
        self.by_name.insert(job.name().to_string(), idx);
        self.by_checksum
            .entry(job.checksum().to_string())
            .or_insert(idx);
        self.jobs.push(job);
        Insertion::Added
    }

    pub(crate) fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.by_name.get(name).map(|&idx| &self.jobs[idx])
    }

    pub(crate) fn get_by_checksum(&self, checksum: &str) -> Option<&JobDefinition> {
        self.by_checksum.get(checksum).map(|&idx| &self.jobs[idx])
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Remove the named jobs, keeping the order of the rest.
    pub(crate) fn remove(&mut self, names: &[String]) {
        self.jobs.retain(|job| !names.iter().any(|n| n == job.name()));
        self.by_name.clear();
        self.by_checksum.clear();
        for (idx, job) in self.jobs.iter().enumerate() {
            self.by_name.insert(job.name().to_string(), idx);
            self.by_checksum
                .entry(job.checksum().to_string())
                .or_insert(idx);
        }
    }
}
