//! Job providers
//!
//! A provider supplies job definitions and whitelists. Providers are held by
//! a [`ProviderRegistry`] built by the caller and passed to whatever needs
//! them; there is no process-wide registry.
//!
//! On-disk layout of a provider directory:
//! ```text
//! <base>/jobs/*.txt, *.txt.in        catalog files
//! <base>/data/whitelists/*.whitelist whitelists
//! <base>/scripts/                    prepended to PATH for jobs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use certlane_model::{load_catalog_file, CatalogError, JobDefinition};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::qualifier::{QualifierError, WhiteList};

/// Provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider directory {path} does not exist")]
    NotFound { path: PathBuf },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Qualifier(#[from] QualifierError),

    #[error("cannot list provider files: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Source of jobs and whitelists.
pub trait Provider {
    fn name(&self) -> &str;

    /// Every job, in file-name order then file order.
    fn load_jobs(&self) -> Result<Vec<JobDefinition>, ProviderError>;

    /// Whitelists sorted by name.
    fn load_whitelists(&self) -> Result<Vec<WhiteList>, ProviderError>;

    /// Directory exported to jobs as `CERTLANE_SHARE`.
    fn share_dir(&self) -> Option<&Path> {
        None
    }

    /// Directory prepended to `PATH` for jobs.
    fn extra_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Provider backed by a directory.
#[derive(Debug, Clone)]
pub struct FsProvider {
    name: String,
    base_dir: PathBuf,
}

impl FsProvider {
    /// Named after the directory.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let base_dir = base_dir.into();
        if !base_dir.is_dir() {
            return Err(ProviderError::NotFound { path: base_dir });
        }
        let name = base_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| base_dir.display().to_string());
        Ok(Self { name, base_dir })
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.base_dir.join("jobs")
    }

    pub fn whitelists_dir(&self) -> PathBuf {
        self.base_dir.join("data").join("whitelists")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.base_dir.join("scripts")
    }

    /// Files directly inside `dir` accepted by `keep`, in file-name order.
    /// A missing directory has no files.
    fn files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, ProviderError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if keep(&entry.file_name().to_string_lossy()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

impl Provider for FsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_jobs(&self) -> Result<Vec<JobDefinition>, ProviderError> {
        let mut jobs = Vec::new();
        let files = Self::files(&self.jobs_dir(), |name| {
            name.ends_with(".txt") || name.ends_with(".txt.in")
        })?;
        for path in files {
            let loaded = load_catalog_file(&path)?;
            debug!(provider = %self.name, file = %path.display(), jobs = loaded.len(), "loaded jobs");
            jobs.extend(loaded);
        }
        Ok(jobs)
    }

    fn load_whitelists(&self) -> Result<Vec<WhiteList>, ProviderError> {
        let files = Self::files(&self.whitelists_dir(), |name| name.ends_with(".whitelist"))?;
        let mut lists = files
            .iter()
            .map(|path| WhiteList::from_file(path))
            .collect::<Result<Vec<_>, _>>()?;
        lists.sort_by(|a, b| a.name().cmp(&b.name()));
        Ok(lists)
    }

    fn share_dir(&self) -> Option<&Path> {
        Some(&self.base_dir)
    }

    fn extra_path(&self) -> Option<PathBuf> {
        let scripts = self.scripts_dir();
        fs::metadata(&scripts)
            .map(|m| m.is_dir())
            .unwrap_or(false)
            .then_some(scripts)
    }
}

/// Provider holding definitions in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    name: String,
    jobs: Vec<JobDefinition>,
    whitelists: Vec<WhiteList>,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_jobs(mut self, jobs: Vec<JobDefinition>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_whitelists(mut self, whitelists: Vec<WhiteList>) -> Self {
        self.whitelists = whitelists;
        self
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_jobs(&self) -> Result<Vec<JobDefinition>, ProviderError> {
        Ok(self.jobs.clone())
    }

    fn load_whitelists(&self) -> Result<Vec<WhiteList>, ProviderError> {
        Ok(self.whitelists.clone())
    }
}

/// The providers used by one process or session.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: impl Provider + 'static) {
        debug!(provider = %provider.name(), "provider registered");
        self.providers.push(Box::new(provider));
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Jobs of every provider, in registration order.
    pub fn load_jobs(&self) -> Result<Vec<JobDefinition>, ProviderError> {
        let mut jobs = Vec::new();
        for provider in &self.providers {
            jobs.extend(provider.load_jobs()?);
        }
        Ok(jobs)
    }

    pub fn load_whitelists(&self) -> Result<Vec<WhiteList>, ProviderError> {
        let mut lists = Vec::new();
        for provider in &self.providers {
            lists.extend(provider.load_whitelists()?);
        }
        Ok(lists)
    }

    /// Whitelist called `name` from the first provider that has one.
    pub fn find_whitelist(&self, name: &str) -> Result<Option<WhiteList>, ProviderError> {
        Ok(self
            .load_whitelists()?
            .into_iter()
            .find(|wl| wl.name() == Some(name)))
    }

    /// `scripts/` directories of every provider.
    pub fn extra_path(&self) -> Vec<PathBuf> {
        self.providers.iter().filter_map(|p| p.extra_path()).collect()
    }

    /// Share directory of the first provider that has one.
    pub fn share_dir(&self) -> Option<PathBuf> {
        self.providers
            .iter()
            .find_map(|p| p.share_dir().map(Path::to_path_buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::JobQualifier;
    use tempfile::TempDir;

    fn provider_dir() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let jobs = tmp.path().join("jobs");
        let lists = tmp.path().join("data").join("whitelists");
        fs::create_dir_all(&jobs).unwrap();
        fs::create_dir_all(&lists).unwrap();
        fs::create_dir_all(tmp.path().join("scripts")).unwrap();
        fs::write(jobs.join("b.txt"), "name: b/one\ncommand: true\n").unwrap();
        fs::write(
            jobs.join("a.txt.in"),
            "name: a/one\ncommand: true\n\nname: a/two\ncommand: true\n",
        )
        .unwrap();
        fs::write(jobs.join("notes.md"), "name: ignored\n").unwrap();
        fs::write(lists.join("smoke.whitelist"), "a/.*\n").unwrap();
        fs::write(lists.join("default.whitelist"), "b/one\n").unwrap();
        tmp
    }

    #[test]
    fn test_fs_provider_jobs_in_file_name_order() {
        let tmp = provider_dir();
        let provider = FsProvider::open(tmp.path()).unwrap();
        let names: Vec<String> = provider
            .load_jobs()
            .unwrap()
            .iter()
            .map(|j| j.name().to_string())
            .collect();
        assert_eq!(names, vec!["a/one", "a/two", "b/one"]);
    }

    #[test]
    fn test_fs_provider_whitelists() {
        let tmp = provider_dir();
        let provider = FsProvider::open(tmp.path()).unwrap();
        let lists = provider.load_whitelists().unwrap();
        let names: Vec<Option<&str>> = lists.iter().map(|w| w.name()).collect();
        assert_eq!(names, vec![Some("default"), Some("smoke")]);
        assert!(lists[1].designates("a/two"));
        assert_eq!(provider.extra_path(), Some(tmp.path().join("scripts")));
        assert_eq!(provider.share_dir(), Some(tmp.path()));
    }

    #[test]
    fn test_missing_provider_dir() {
        let err = FsProvider::open("/nonexistent/provider").unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[test]
    fn test_empty_provider_dir() {
        let tmp = TempDir::new().unwrap();
        let provider = FsProvider::open(tmp.path()).unwrap();
        assert!(provider.load_jobs().unwrap().is_empty());
        assert!(provider.load_whitelists().unwrap().is_empty());
        assert!(provider.extra_path().is_none());
    }

    #[test]
    fn test_registry_combines_providers() {
        let tmp = provider_dir();
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        registry.add(FsProvider::open(tmp.path()).unwrap());
        registry.add(MemoryProvider::new("memory").with_jobs(vec![JobDefinition::builder(
            "mem/one",
        )
        .command("true")
        .build()
        .unwrap()]));

        assert_eq!(registry.load_jobs().unwrap().len(), 4);
        assert_eq!(registry.extra_path().len(), 1);
        assert!(registry.find_whitelist("smoke").unwrap().is_some());
        assert!(registry.find_whitelist("nope").unwrap().is_none());
        assert_eq!(registry.names()[1], "memory");
    }
}
