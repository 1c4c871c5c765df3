//! Configuration types for kubestep
//!
//! Build them programmatically. Only [`SuiteConfig::from_env`] reads
//! anything from outside the process.
//!
//! # Example
//!
//! ```
//! use kubestep::config::{RetryPolicy, SuiteConfig};
//! use std::time::Duration;
//!
//! let suite = SuiteConfig::new("tests/definitions")
//!     .retry(RetryPolicy::default().backoff(Duration::from_millis(500)))
//!     .match_timeout(Duration::from_secs(10));
//!
//! assert_eq!(suite.retry.max_retries, 1);
//! ```

use crate::client::ResourceRef;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`SuiteConfig::definitions`]
pub const ENV_DEFINITIONS: &str = "KUBESTEP_DEFINITIONS";

/// Environment variable overriding [`SuiteConfig::match_timeout`], in seconds
pub const ENV_MATCH_TIMEOUT: &str = "KUBESTEP_MATCH_TIMEOUT_SECS";

/// Environment variable selecting `OpenShift` projects for namespace bootstrap
pub const ENV_USE_PROJECTS: &str = "KUBESTEP_USE_PROJECTS";

/// Recovery policy for [`ensure_resource`](crate::reconcile::ensure_resource)
///
/// The defaults reproduce the behaviour the scenarios were written against:
/// one retry, three seconds apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before retrying after an unclassified failure
    pub backoff: Duration,

    /// Recovery attempts per call; 0 disables local recovery
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(3),
            max_retries: 1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the fixed backoff
    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry cap
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True when at least one recovery attempt is allowed
    #[must_use]
    pub fn allows_retry(&self) -> bool {
        self.max_retries > 0
    }
}

/// Settings for a scenario suite
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Directory holding `{apiVersion}_{kind}_{name}.yaml` definitions
    pub definitions: PathBuf,

    /// Policy for "exists" steps
    pub retry: RetryPolicy,

    /// How long "eventually matches" steps poll
    pub match_timeout: Duration,

    /// Poll interval for "eventually matches" steps
    pub match_interval: Duration,

    /// Resource type created when bootstrapping a namespace
    pub namespace_resource: ResourceRef,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            definitions: PathBuf::from("tests/definitions"),
            retry: RetryPolicy::default(),
            match_timeout: Duration::from_secs(30),
            match_interval: Duration::from_millis(250),
            namespace_resource: ResourceRef::new("v1", "Namespace"),
        }
    }
}

impl SuiteConfig {
    /// Create a config reading definitions from `definitions`
    pub fn new(definitions: impl Into<PathBuf>) -> Self {
        Self {
            definitions: definitions.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden from `KUBESTEP_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DEFINITIONS).filter(|d| !d.is_empty()) {
            config.definitions = PathBuf::from(dir);
        }

        if let Some(secs) = lookup(ENV_MATCH_TIMEOUT).and_then(|s| s.trim().parse::<u64>().ok()) {
            config.match_timeout = Duration::from_secs(secs);
        }

        if lookup(ENV_USE_PROJECTS).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
            config = config.use_projects();
        }

        config
    }

    /// Set the definitions directory
    #[must_use]
    pub fn definitions(mut self, dir: impl Into<PathBuf>) -> Self {
        self.definitions = dir.into();
        self
    }

    /// Set the reconcile policy
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the eventual-match timeout
    #[must_use]
    pub fn match_timeout(mut self, timeout: Duration) -> Self {
        self.match_timeout = timeout;
        self
    }

    /// Set the eventual-match poll interval
    #[must_use]
    pub fn match_interval(mut self, interval: Duration) -> Self {
        self.match_interval = interval;
        self
    }

    /// Bootstrap namespaces as `OpenShift` projects
    #[must_use]
    pub fn use_projects(mut self) -> Self {
        self.namespace_resource = ResourceRef::new("project.openshift.io/v1", "Project");
        self
    }
}
