//! Command mesh (Salt) client
//!
//! All fleet-wide requests use `--out=json --static --no-color` and are parsed
//! tolerantly: the master often prints banners or warnings around the JSON
//! document, and a single failing minion makes it exit non-zero while the
//! other minions' answers are still perfectly usable.

use crate::config::MeshConfig;
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{io_to_error, truncate, CommandExecutor, CommandSpec};
use crate::retry::{retry, JitterStrategy, RetryConfig};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-minion answers keyed by minion id
pub type MeshResponse = BTreeMap<String, Value>;

/// A structured remote execution request: one module function plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshCall {
    pub function: String,
    pub args: Vec<String>,
}

impl MeshCall {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `test.ping`
    pub fn ping() -> Self {
        Self::new("test.ping")
    }

    /// `file.read <path>`
    pub fn file_read(path: &Path) -> Self {
        Self::new("file.read").arg(path.to_string_lossy())
    }

    /// `cmd.run <script>`; every interpolated value must already be quoted
    pub fn cmd_run(script: impl Into<String>) -> Self {
        Self::new("cmd.run").arg(script)
    }
}

/// Parse mesh output into a JSON object.
///
/// Strict parse first; otherwise the last well-formed top-level object in the
/// text, with surrounding banner text discarded. `None` means the output holds
/// no structured data.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }

    let mut last = None;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => {
                last = Some(map);
                pos = start + stream.byte_offset();
            }
            _ => pos = start + 1,
        }
    }
    last
}

/// How many minions must answer before the fleet counts as ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub expected: usize,
    pub require_all: bool,
}

impl ReadinessPolicy {
    pub fn from_config(config: &MeshConfig) -> Self {
        Self {
            expected: config.expected_minions,
            require_all: config.require_all,
        }
    }

    /// "at least N" when require-all is set, else "at least one"
    pub fn satisfied(&self, responders: usize) -> bool {
        if self.require_all {
            responders >= self.expected
        } else {
            responders >= 1
        }
    }
}

pub struct MeshClient {
    config: MeshConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl MeshClient {
    pub fn new(config: MeshConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn salt_spec(&self, target: &str, call: &MeshCall, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.config.salt_bin)
            .arg(target)
            .arg(&call.function)
            .args(call.args.iter().cloned())
            .args(["--out=json", "--static", "--no-color"])
            .timeout(timeout)
    }

    /// One request; unparseable output is a transient failure
    async fn request(&self, spec: &CommandSpec) -> DarksiteResult<MeshResponse> {
        let output = self
            .executor
            .execute(spec)
            .await
            .map_err(|e| io_to_error(spec, e))?;

        match extract_json_object(&String::from_utf8_lossy(&output.stdout)) {
            Some(map) => {
                if !output.success() {
                    debug!(
                        command = %spec,
                        rc = ?output.exit_code,
                        "mesh exited non-zero, keeping the answers it returned"
                    );
                }
                Ok(map.into_iter().collect())
            }
            None => Err(DarksiteError::TemporaryFailure {
                details: format!(
                    "no structured data from '{}' (rc={:?}): {}",
                    spec,
                    output.exit_code,
                    truncate(&output.combined_text(), 300)
                ),
            }),
        }
    }

    /// Run `call` on every minion matching `target`.
    ///
    /// Retries up to `retries` extra times on transient failures (unparseable
    /// output, timeouts, spawn errors), then gives up with an empty map and a
    /// warning. Never fails the caller.
    pub async fn broadcast_exec(&self, target: &str, call: &MeshCall, retries: u32) -> MeshResponse {
        let spec = self.salt_spec(target, call, self.config.call_timeout);
        let retry_config = RetryConfig::fixed(
            &format!("mesh {} on {}", call.function, target),
            retries.saturating_add(1),
            self.config.call_retry_delay,
        )
        .with_retryable(DarksiteError::is_transient);

        let spec = &spec;
        match retry(&retry_config, |_| async move { self.request(spec).await }.boxed()).await {
            Ok(response) => {
                debug!(
                    target = %target,
                    function = %call.function,
                    minions = response.len(),
                    "mesh call answered"
                );
                response
            }
            Err(e) => {
                warn!("mesh call failed target={}: {}", target, e);
                MeshResponse::new()
            }
        }
    }

    /// Poll `test.ping` until the readiness policy is met.
    ///
    /// Returns the responder count; exhausting the retries is a hard failure.
    pub async fn wait_until_ready(&self, policy: ReadinessPolicy) -> DarksiteResult<usize> {
        info!(
            expected = policy.expected,
            require_all = policy.require_all,
            "Waiting for command mesh minions"
        );

        let spec = self.salt_spec(&self.config.target, &MeshCall::ping(), self.config.ping_timeout);
        let mut retry_config = RetryConfig::fixed(
            "mesh readiness",
            self.config.ping_retries,
            self.config.ping_interval,
        );
        if self.config.jitter {
            retry_config =
                retry_config.with_jitter(JitterStrategy::ProportionalRange { min: 0.8, max: 1.2 });
        }

        let last_seen = AtomicUsize::new(0);
        let (spec, seen) = (&spec, &last_seen);
        let result = retry(&retry_config, |attempt| {
            async move {
                let up = match self.request(spec).await {
                    Ok(response) => response.values().filter(|v| **v == Value::Bool(true)).count(),
                    Err(e) => {
                        debug!("readiness probe {} failed: {}", attempt, e);
                        0
                    }
                };
                seen.store(up, Ordering::Relaxed);
                if policy.satisfied(up) {
                    Ok(up)
                } else {
                    Err(DarksiteError::TemporaryFailure {
                        details: format!("{} of {} minions answered", up, policy.expected),
                    })
                }
            }
            .boxed()
        })
        .await;

        match result {
            Ok(up) => {
                info!(responders = up, expected = policy.expected, "Command mesh is up");
                Ok(up)
            }
            Err(_) => Err(DarksiteError::FleetNotReady {
                responders: last_seen.load(Ordering::Relaxed),
                expected: policy.expected,
                attempts: retry_config.max_attempts,
            }),
        }
    }

    /// Best-effort `salt-call --local mine.update`
    pub async fn refresh_facts(&self) -> bool {
        let spec = CommandSpec::new(&self.config.salt_call_bin)
            .args(["--local", "mine.update"])
            .timeout(self.config.call_timeout);
        match self.executor.execute(&spec).await {
            Ok(output) if output.success() => {
                info!("Refreshed mesh facts");
                true
            }
            Ok(output) => {
                warn!(
                    "fact refresh exited with {:?}: {}",
                    output.exit_code,
                    truncate(&output.combined_text(), 300)
                );
                false
            }
            Err(e) => {
                warn!("fact refresh failed: {}", e);
                false
            }
        }
    }
}

/// Non-empty, trimmed string answers keyed by lowercased minion id
pub fn text_answers(response: &MeshResponse) -> BTreeMap<String, String> {
    response
        .iter()
        .filter_map(|(minion, value)| match value {
            Value::String(text) if !text.trim().is_empty() => {
                Some((minion.to_ascii_lowercase(), text.trim().to_string()))
            }
            _ => None,
        })
        .collect()
}
