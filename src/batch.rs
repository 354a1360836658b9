//! # Batch Files
//!
//! YAML description of a run: worker count plus a list of actions with
//! their templates, retry settings and callback names. This is the CLI's
//! input format; library users build [`Action`]s directly.
//!
//! ```yaml
//! workers: 5
//! actions:
//!   - name: fetch_items
//!     url: "https://api.test/v1/${region}/items"
//!     params:
//!       region: eu
//!       page: "1"
//!     retry_limit: 3
//!     on_success: [to_json, pages, save_json, log]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::action::Action;
use crate::callback::{create_callback, Outcome};
use crate::error::QueueError;
use crate::retry::{RetryLimit, RetryPolicy};

fn default_workers() -> usize {
    crate::runner::DEFAULT_WORKER_COUNT
}

fn default_method() -> String {
    "GET".to_string()
}

/// Top-level batch file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSpec {
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub actions: Vec<ActionSpec>,
}

/// One action entry in a batch file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// URL template with `${name}` placeholders resolved from `params`
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Optional JSON request body
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts after the first: 0 = none, -1 = unlimited
    #[serde(default)]
    pub retry_limit: i64,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub backoff_factor: Option<f64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    /// Override the retryable status set (default 500/502/503/504)
    #[serde(default)]
    pub retry_statuses: Option<Vec<u16>>,
    /// Callback names; omitted lists default to `[log]`
    #[serde(default)]
    pub on_success: Option<Vec<String>>,
    #[serde(default)]
    pub on_fail: Option<Vec<String>>,
    #[serde(default)]
    pub on_retry: Option<Vec<String>>,
}

impl ActionSpec {
    fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        policy.limit = RetryLimit::from_i64(self.retry_limit);
        if let Some(ms) = self.backoff_ms {
            policy = policy.with_initial_backoff(Duration::from_millis(ms));
        }
        if let Some(factor) = self.backoff_factor {
            policy = policy.with_backoff_factor(factor);
        }
        if let Some(ms) = self.max_backoff_ms {
            policy = policy.with_max_backoff(Duration::from_millis(ms));
        }
        if let Some(statuses) = &self.retry_statuses {
            policy = policy.with_retry_statuses(statuses.clone());
        }
        policy
    }

    fn into_action(self, out_dir: &Path) -> Result<Action, QueueError> {
        let policy = self.retry_policy();
        let mut builder = Action::builder(&self.name, &self.method, &self.url)
            .params(self.params.clone())
            .policy(policy);

        for (name, value) in &self.query {
            builder = builder.query(name, value);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = self.body {
            builder = builder.json_body(body);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let default_log = || vec!["log".to_string()];
        let outcomes = [
            (Outcome::Success, self.on_success.unwrap_or_else(default_log)),
            (Outcome::Fail, self.on_fail.unwrap_or_else(default_log)),
            (Outcome::Retry, self.on_retry.unwrap_or_else(default_log)),
        ];
        for (outcome, names) in outcomes {
            for name in names {
                builder = builder.on(outcome, create_callback(&name, out_dir)?);
            }
        }

        builder.build()
    }
}

impl BatchSpec {
    pub fn from_str(raw: &str) -> Result<Self, QueueError> {
        let spec: BatchSpec = serde_yaml::from_str(raw)?;
        spec.check()?;
        Ok(spec)
    }

    pub fn from_path(path: &Path) -> Result<Self, QueueError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.actions.is_empty() {
            return Err(QueueError::Batch("batch has no actions".to_string()));
        }
        // Names become result file names, so collisions lose data
        let mut seen = BTreeSet::new();
        for action in &self.actions {
            if !seen.insert(action.name.as_str()) {
                return Err(QueueError::Batch(format!(
                    "duplicate action name '{}'",
                    action.name
                )));
            }
        }
        Ok(())
    }

    /// Build every action, resolving templates and callback names.
    pub fn into_actions(self, out_dir: &Path) -> Result<Vec<Action>, QueueError> {
        self.actions
            .into_iter()
            .map(|spec| spec.into_action(out_dir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
workers: 5
actions:
  - name: fetch_eu
    url: "https://api.test/v1/${region}/items"
    params:
      region: eu
    retry_limit: 3
    backoff_ms: 100
    on_success: [to_json, log]
  - name: ping
    method: head
    url: "https://api.test/health"
"#;

    #[test]
    fn parses_sample_batch() {
        let spec = BatchSpec::from_str(SAMPLE).unwrap();
        assert_eq!(spec.workers, 5);
        assert_eq!(spec.actions.len(), 2);
        assert_eq!(spec.actions[0].retry_limit, 3);
    }

    #[test]
    fn into_actions_resolves_templates() {
        let spec = BatchSpec::from_str(SAMPLE).unwrap();
        let actions = spec.into_actions(Path::new("/tmp/out")).unwrap();
        assert_eq!(actions[0].url, "https://api.test/v1/eu/items");
        assert_eq!(actions[1].method, "HEAD");
    }

    #[test]
    fn omitted_callbacks_default_to_log() {
        let spec = BatchSpec::from_str(SAMPLE).unwrap();
        let actions = spec.into_actions(Path::new("/tmp/out")).unwrap();
        assert_eq!(actions[1].callbacks.for_outcome(Outcome::Success).len(), 1);
        assert_eq!(actions[1].callbacks.for_outcome(Outcome::Fail).len(), 1);
    }

    #[test]
    fn explicit_empty_callback_list_stays_empty() {
        let raw = r#"
actions:
  - name: quiet
    url: "https://api.test/x"
    on_success: []
    on_fail: []
    on_retry: []
"#;
        let actions = BatchSpec::from_str(raw)
            .unwrap()
            .into_actions(Path::new("/tmp/out"))
            .unwrap();
        assert!(actions[0].callbacks.is_empty());
    }

    #[test]
    fn unlimited_retry_sentinel() {
        let raw = r#"
actions:
  - name: stubborn
    url: "https://api.test/x"
    retry_limit: -1
"#;
        let spec = BatchSpec::from_str(raw).unwrap();
        assert_eq!(spec.actions[0].retry_policy().limit, RetryLimit::Unlimited);
    }

    #[test]
    fn backoff_cap_carries_into_policy() {
        let raw = r#"
actions:
  - name: capped
    url: "https://api.test/x"
    retry_limit: -1
    backoff_ms: 100
    max_backoff_ms: 3000
"#;
        let spec = BatchSpec::from_str(raw).unwrap();
        let policy = spec.actions[0].retry_policy();
        assert_eq!(policy.max_backoff, Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(1000), Duration::from_secs(3));
    }

    #[test]
    fn rejects_duplicate_names() {
        let raw = r#"
actions:
  - name: twin
    url: "https://api.test/a"
  - name: twin
    url: "https://api.test/b"
"#;
        let err = BatchSpec::from_str(raw).unwrap_err();
        assert!(err.to_string().contains("twin"));
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(BatchSpec::from_str("actions: []").is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        let raw = r#"
actions:
  - name: typo
    url: "https://api.test/a"
    retry_limt: 2
"#;
        assert!(BatchSpec::from_str(raw).is_err());
    }

    #[test]
    fn rejects_unknown_callback_name() {
        let raw = r#"
actions:
  - name: bad
    url: "https://api.test/a"
    on_success: [frobnicate]
"#;
        let err = BatchSpec::from_str(raw)
            .unwrap()
            .into_actions(Path::new("/tmp/out"))
            .unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }
}
