//! Controller configuration
//!
//! Credentials, service endpoints and the timing knobs of the monitor
//! scheduler, read once from the environment at startup.

use std::time::Duration;

use crate::scheduler::SchedulerOptions;
use crate::service::monitor::{DEFAULT_POLLING_INTERVAL, DEFAULT_STATUS_TIMEOUT};
use crate::service::signer::DEFAULT_SIGNATURE_TTL;
use crate::service::submission::SubmissionOptions;

/// Controller configuration
#[derive(Clone)]
pub struct Config {
    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// Postgres URL of the checkpoint store; in-memory store when unset
    pub database_url: Option<String>,

    pub storage_account_name: String,
    pub storage_account_key: String,

    /// Blob service endpoint (e.g. "https://acct.blob.core.windows.net")
    pub storage_endpoint: String,

    pub batch_account_name: String,
    pub batch_account_key: String,
    pub batch_account_url: String,

    /// Wait between two status queries of the same job
    pub polling_interval: Duration,

    pub scheduler_tick: Duration,
    pub max_concurrent_activations: usize,

    /// Bound on one job status query
    pub status_timeout: Duration,

    /// How long a claimed monitor stays invisible to other ticks
    pub activation_lease: Duration,

    /// Lifetime of the URLs handed to tasks
    pub signature_ttl: Duration,

    /// Longest a task is expected to run; signatures must outlive it
    pub max_task_runtime: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BATCH_STORAGE_ACCOUNT_NAME, BATCH_STORAGE_ACCOUNT_KEY (required)
    /// - BATCH_STORAGE_ENDPOINT (optional, default: https://{account}.blob.core.windows.net)
    /// - BATCH_ACCOUNT_NAME, BATCH_ACCOUNT_KEY, BATCH_ACCOUNT_URL (required)
    /// - DATABASE_URL (optional)
    /// - SLUICE_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - BATCH_MONITOR_POLLING_TIME_IN_MINUTES (optional, default: 5)
    /// - SLUICE_SCHEDULER_TICK_SECS (optional, default: 10)
    /// - SLUICE_MAX_CONCURRENT_ACTIVATIONS (optional, default: 8)
    /// - SLUICE_STATUS_TIMEOUT_SECS (optional, default: 30)
    /// - SLUICE_ACTIVATION_LEASE_SECS (optional, default: 120)
    /// - SLUICE_SIGNATURE_TTL_SECS (optional, default: 3600)
    /// - SLUICE_MAX_TASK_RUNTIME_SECS (optional, default: 3000)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };
        let seconds = |key: &str, default: u64| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds", key)),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let storage_account_name = required("BATCH_STORAGE_ACCOUNT_NAME")?;
        let storage_endpoint = lookup("BATCH_STORAGE_ENDPOINT")
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", storage_account_name));

        let polling_minutes = match lookup("BATCH_MONITOR_POLLING_TIME_IN_MINUTES") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                anyhow::anyhow!("BATCH_MONITOR_POLLING_TIME_IN_MINUTES must be a whole number of minutes")
            })?,
            None => DEFAULT_POLLING_INTERVAL.as_secs() / 60,
        };

        let max_concurrent_activations = match lookup("SLUICE_MAX_CONCURRENT_ACTIVATIONS") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("SLUICE_MAX_CONCURRENT_ACTIVATIONS must be a positive number")
            })?,
            None => 8,
        };

        Ok(Self {
            bind_addr: lookup("SLUICE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            storage_account_key: required("BATCH_STORAGE_ACCOUNT_KEY")?,
            storage_account_name,
            storage_endpoint,
            batch_account_name: required("BATCH_ACCOUNT_NAME")?,
            batch_account_key: required("BATCH_ACCOUNT_KEY")?,
            batch_account_url: required("BATCH_ACCOUNT_URL")?,
            polling_interval: Duration::from_secs(polling_minutes * 60),
            scheduler_tick: seconds("SLUICE_SCHEDULER_TICK_SECS", 10)?,
            max_concurrent_activations,
            status_timeout: seconds("SLUICE_STATUS_TIMEOUT_SECS", DEFAULT_STATUS_TIMEOUT.as_secs())?,
            activation_lease: seconds("SLUICE_ACTIVATION_LEASE_SECS", 120)?,
            signature_ttl: seconds("SLUICE_SIGNATURE_TTL_SECS", DEFAULT_SIGNATURE_TTL.as_secs())?,
            max_task_runtime: seconds("SLUICE_MAX_TASK_RUNTIME_SECS", 3000)?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("storage endpoint", &self.storage_endpoint),
            ("batch account url", &self.batch_account_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.polling_interval.is_zero() {
            anyhow::bail!("polling interval must be greater than 0");
        }

        if self.scheduler_tick.is_zero() {
            anyhow::bail!("scheduler tick must be greater than 0");
        }

        if self.max_concurrent_activations == 0 {
            anyhow::bail!("max concurrent activations must be greater than 0");
        }

        if self.status_timeout.is_zero() {
            anyhow::bail!("status timeout must be greater than 0");
        }

        if self.activation_lease <= self.status_timeout {
            anyhow::bail!("activation lease must be longer than the status timeout");
        }

        if self.signature_ttl <= self.max_task_runtime {
            anyhow::bail!(
                "signature ttl ({:?}) must exceed the maximum task runtime ({:?})",
                self.signature_ttl,
                self.max_task_runtime
            );
        }

        Ok(())
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            tick_interval: self.scheduler_tick,
            max_concurrent_activations: self.max_concurrent_activations,
            lease: self.activation_lease,
        }
    }

    pub fn submission_options(&self) -> SubmissionOptions {
        SubmissionOptions {
            signature_ttl: self.signature_ttl,
            ..SubmissionOptions::default()
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("storage_account_name", &self.storage_account_name)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("batch_account_name", &self.batch_account_name)
            .field("batch_account_url", &self.batch_account_url)
            .field("polling_interval", &self.polling_interval)
            .field("scheduler_tick", &self.scheduler_tick)
            .field("max_concurrent_activations", &self.max_concurrent_activations)
            .field("status_timeout", &self.status_timeout)
            .field("activation_lease", &self.activation_lease)
            .field("signature_ttl", &self.signature_ttl)
            .field("max_task_runtime", &self.max_task_runtime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut vars: HashMap<String, String> = [
            ("BATCH_STORAGE_ACCOUNT_NAME", "store"),
            ("BATCH_STORAGE_ACCOUNT_KEY", "a2V5"),
            ("BATCH_ACCOUNT_NAME", "batch"),
            ("BATCH_ACCOUNT_KEY", "a2V5"),
            ("BATCH_ACCOUNT_URL", "https://batch.westeurope.batch.azure.com"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(env(&[])).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database_url, None);
        assert_eq!(config.storage_endpoint, "https://store.blob.core.windows.net");
        assert_eq!(config.polling_interval, Duration::from_secs(300));
        assert_eq!(config.scheduler_tick, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_activations, 8);
        assert_eq!(config.signature_ttl, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(env(&[
            ("BATCH_MONITOR_POLLING_TIME_IN_MINUTES", "1"),
            ("BATCH_STORAGE_ENDPOINT", "http://127.0.0.1:10000/devstore"),
            ("DATABASE_URL", "postgres://localhost/sluice"),
        ]))
        .unwrap();

        assert_eq!(config.polling_interval, Duration::from_secs(60));
        assert_eq!(config.storage_endpoint, "http://127.0.0.1:10000/devstore");
        assert!(config.database_url.is_some());
    }

    #[test]
    fn test_missing_credentials() {
        let lookup = env(&[]);
        let err = Config::from_lookup(|key| {
            if key == "BATCH_ACCOUNT_KEY" {
                None
            } else {
                lookup(key)
            }
        })
        .unwrap_err();

        assert!(err.to_string().contains("BATCH_ACCOUNT_KEY"));
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        assert!(Config::from_lookup(env(&[("SLUICE_SCHEDULER_TICK_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(env(&[("BATCH_MONITOR_POLLING_TIME_IN_MINUTES", "-1")])).is_err());
    }

    #[test]
    fn test_signatures_must_outlive_tasks() {
        let mut config = Config::from_lookup(env(&[])).unwrap();

        config.max_task_runtime = config.signature_ttl;
        assert!(config.validate().is_err());

        config.max_task_runtime = config.signature_ttl - Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::from_lookup(env(&[])).unwrap();

        config.polling_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.polling_interval = Duration::from_secs(60);

        config.batch_account_url = "batch.example".to_string();
        assert!(config.validate().is_err());
        config.batch_account_url = "https://batch.example".to_string();

        config.activation_lease = config.status_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = Config::from_lookup(env(&[])).unwrap();
        assert!(!format!("{:?}", config).contains("a2V5"));
    }
}
