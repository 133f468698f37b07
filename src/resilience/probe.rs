//! HTTP key-probe workload.
//!
//! The probe targets deployments that expose a tiny key/value endpoint on
//! the instance itself: `GET /set?key=…` stores a value inside the
//! replicated payload, `GET /get` reads it back. A random key written to
//! the primary must survive every takeover.
//!
//! The instance's address is discovered through the root instance's
//! connection parameters; after a takeover the workload waits for that
//! parameter to change before probing the promoted clone.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::client::ClientError;

use super::{ParameterWatcher, Workload, WorkloadFuture};

/// Port the probe endpoint listens on inside the instance.
pub const DEFAULT_PROBE_PORT: u16 = 10080;

const DEFAULT_PUSH_ATTEMPTS: u32 = 60;
const DEFAULT_FETCH_ATTEMPTS: u32 = 10;
const DEFAULT_ATTEMPT_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the probe base URL, bracketing IPv6 literals.
pub(super) fn probe_base(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("http://[{address}]:{port}")
    } else {
        format!("http://{address}:{port}")
    }
}

/// Errors raised by the key probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Raised when the root instance does not publish the address parameter.
    #[error("root instance did not publish connection parameter {key}")]
    MissingParameter {
        /// Connection parameter the probe looked for.
        key: String,
    },
    /// Raised when verification runs before a primary address was recorded.
    #[error("no primary address recorded; the push stage must run first")]
    NoPrimaryRecorded,
    /// Raised when the primary never accepts the payload.
    #[error("probe endpoint rejected the payload after {attempts} attempts")]
    PushExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// Raised when the promoted clone never answers the read-back.
    #[error("probe endpoint did not answer after {attempts} attempts")]
    FetchExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// Raised when locating the primary through the orchestrator fails.
    #[error("remote call failed: {0}")]
    Client(#[from] ClientError),
}

/// Workload that writes a random key to the primary over HTTP and reads it
/// back from each promoted clone.
#[derive(Clone, Debug)]
pub struct KeyProbeWorkload {
    http: reqwest::Client,
    address_key: String,
    service_port: u16,
    push_attempts: u32,
    fetch_attempts: u32,
    attempt_interval: Duration,
    primary_address: Option<String>,
}

impl KeyProbeWorkload {
    /// Creates a probe locating the service through the connection parameter
    /// named `address_key` (typically `ipv6`).
    #[must_use]
    pub fn new(address_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            address_key: address_key.into(),
            service_port: DEFAULT_PROBE_PORT,
            push_attempts: DEFAULT_PUSH_ATTEMPTS,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            attempt_interval: DEFAULT_ATTEMPT_INTERVAL,
            primary_address: None,
        }
    }

    /// Overrides the port the probe endpoint listens on.
    #[must_use]
    pub const fn with_service_port(mut self, port: u16) -> Self {
        self.service_port = port;
        self
    }

    /// Overrides the pause between probe attempts.
    ///
    /// This is primarily used by tests to keep probe scenarios fast.
    #[must_use]
    pub const fn with_attempt_interval(mut self, interval: Duration) -> Self {
        self.attempt_interval = interval;
        self
    }

    async fn push_key(&self, address: &str, key: &str) -> Result<(), ProbeError> {
        let url = format!(
            "{}/set?key={key}",
            probe_base(address, self.service_port)
        );
        for attempt in 1..=self.push_attempts {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    tracing::info!(
                        status = response.status().as_u16(),
                        attempt,
                        "probe endpoint refused the key, sleeping",
                    );
                }
                Err(err) => {
                    tracing::info!(%err, attempt, "probe endpoint unreachable, sleeping");
                }
            }
            sleep(self.attempt_interval).await;
        }
        Err(ProbeError::PushExhausted {
            attempts: self.push_attempts,
        })
    }

    async fn fetch_key(&self, address: &str) -> Result<String, ProbeError> {
        let url = format!("{}/get", probe_base(address, self.service_port));
        for attempt in 1..=self.fetch_attempts {
            match self.http.get(&url).send().await {
                Ok(response) => match response.text().await {
                    Ok(body) => return Ok(body.trim().to_owned()),
                    Err(err) => {
                        tracing::error!(%err, attempt, "probe answer unreadable, sleeping");
                    }
                },
                Err(err) => {
                    tracing::error!(%err, attempt, "promoted clone does not answer, sleeping");
                }
            }
            sleep(self.attempt_interval).await;
        }
        Err(ProbeError::FetchExhausted {
            attempts: self.fetch_attempts,
        })
    }
}

impl Workload for KeyProbeWorkload {
    type Payload = String;
    type Error = ProbeError;

    fn generate(&mut self) -> Self::Payload {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn push_to_primary<'a>(
        &'a mut self,
        watcher: &'a dyn ParameterWatcher,
        payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let address = watcher
                .connection_parameter(&self.address_key)
                .await?
                .ok_or_else(|| ProbeError::MissingParameter {
                    key: self.address_key.clone(),
                })?;
            tracing::info!(address = %address, "pushing payload to primary");
            self.push_key(&address, payload).await?;
            self.primary_address = Some(address);
            Ok(())
        })
    }

    fn verify_on_new_primary<'a>(
        &'a mut self,
        watcher: &'a dyn ParameterWatcher,
        payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let old_address = self
                .primary_address
                .clone()
                .ok_or(ProbeError::NoPrimaryRecorded)?;
            let address = watcher
                .wait_for_changed_parameter(&self.address_key, &old_address)
                .await?;
            let found = self.fetch_key(&address).await?;
            self.primary_address = Some(address);
            let intact = found == *payload;
            if !intact {
                tracing::error!(expected = %payload, found = %found, "payload mismatch");
            }
            Ok(intact)
        })
    }
}
