use crate::error::{StorageError, StorageResult};
use crate::persist::store::DEFAULT_TREE_NAME;
use prometheus::Opts;
use std::time::Duration;

/// Default number of most recent buckets a counter keeps
pub const DEFAULT_RETENTION: usize = 2;

/// Default interval between periodic flushes
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Options shared by the storage coordinator and, as defaults, every counter
/// it declares.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Number of most recent buckets retained on flush
    pub retention: usize,
    /// Whether the periodic flush task is started on initialization
    pub autosave: bool,
    /// Interval of the periodic flush task
    pub autosave_interval: Duration,
    /// Name of the tree holding the persisted metrics
    pub tree_name: String,
    /// Variable label names applied to counters that do not override them
    pub variable_labels: Vec<String>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            autosave: true,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            tree_name: DEFAULT_TREE_NAME.to_string(),
            variable_labels: Vec::new(),
        }
    }
}

impl StorageOptions {
    pub fn keep_records(mut self, n: usize) -> Self {
        self.retention = n;
        self
    }

    pub fn autosave(mut self, enable: bool, interval: Duration) -> Self {
        self.autosave = enable;
        self.autosave_interval = interval;
        self
    }

    pub fn tree_name(mut self, name: impl Into<String>) -> Self {
        self.tree_name = name.into();
        self
    }

    /// Careful: every counter declared afterwards inherits these labels
    /// unless it overrides them.
    pub fn variable_labels<S: AsRef<str>>(mut self, labels: &[S]) -> Self {
        self.variable_labels = labels.iter().map(|l| l.as_ref().to_string()).collect();
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        validate_retention(self.retention)?;
        validate_labels(&self.variable_labels)?;
        if self.tree_name.is_empty() {
            return Err(StorageError::InvalidOption(
                "invalid empty tree name".to_string(),
            ));
        }
        if self.autosave && self.autosave_interval.is_zero() {
            return Err(StorageError::InvalidOption(
                "autosave interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Declaration of one persisted counter.
#[derive(Debug, Clone)]
pub struct CounterSpec {
    pub opts: Opts,
    pub retention: Option<usize>,
    pub variable_labels: Option<Vec<String>>,
}

impl CounterSpec {
    pub fn new(name: &str, help: &str) -> Self {
        Self::from_opts(Opts::new(name, help))
    }

    pub fn from_opts(opts: Opts) -> Self {
        Self {
            opts,
            retention: None,
            variable_labels: None,
        }
    }

    pub fn keep_records(mut self, n: usize) -> Self {
        self.retention = Some(n);
        self
    }

    pub fn variable_labels<S: AsRef<str>>(mut self, labels: &[S]) -> Self {
        self.variable_labels = Some(labels.iter().map(|l| l.as_ref().to_string()).collect());
        self
    }

    /// Stable store key derived from namespace, subsystem and name
    pub fn metric_id(&self) -> String {
        format!(
            "{}::{}::{}",
            self.opts.namespace, self.opts.subsystem, self.opts.name
        )
    }

    /// Merge this declaration over the coordinator defaults
    pub(crate) fn resolve(&self, defaults: &StorageOptions) -> StorageResult<CounterOptions> {
        let resolved = CounterOptions {
            retention: self.retention.unwrap_or(defaults.retention),
            variable_labels: self
                .variable_labels
                .clone()
                .unwrap_or_else(|| defaults.variable_labels.clone()),
        };
        validate_retention(resolved.retention)?;
        validate_labels(&resolved.variable_labels)?;
        Ok(resolved)
    }
}

/// Options fixed for a counter's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct CounterOptions {
    pub retention: usize,
    pub variable_labels: Vec<String>,
}

fn validate_retention(n: usize) -> StorageResult<()> {
    if n == 0 {
        return Err(StorageError::InvalidOption(
            "retention must keep at least one bucket".to_string(),
        ));
    }
    Ok(())
}

fn validate_labels(labels: &[String]) -> StorageResult<()> {
    if labels.iter().any(|l| l.is_empty()) {
        return Err(StorageError::InvalidOption("invalid empty label".to_string()));
    }
    if labels.iter().any(|l| l == super::counter::BUCKET_LABEL) {
        return Err(StorageError::InvalidOption(format!(
            "label name {} is reserved",
            super::counter::BUCKET_LABEL
        )));
    }
    Ok(())
}
