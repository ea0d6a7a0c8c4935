//! Bounded polling against cluster state
//!
//! [`WaitTimer`] refreshes an entity once, then alternates between testing a
//! predicate and refreshing on each probe tick until the predicate holds,
//! the predicate errors, a refresh fails, or the maximum wait elapses.
//!
//! # Example
//!
//! ```ignore
//! let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
//! timer
//!     .test_expectation(&mut pod, |p| Ok::<_, String>(p.is_running()))
//!     .await?;
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::debug;

/// Something whose status can be re-read from its source of truth
#[async_trait]
pub trait Refreshable: Send {
    type Error: fmt::Display + Send;

    async fn update_status(&mut self) -> Result<(), Self::Error>;

    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Human-readable state used in timeout errors
    fn state_description(&self) -> String {
        "unknown".to_string()
    }
}

/// Timeout details: what was awaited, what it last looked like, and how long
#[derive(Debug, Clone, PartialEq)]
pub struct WaitError {
    /// Resource reference (e.g. "Pod/server-x7k2")
    pub resource: String,
    /// Description of the last observed state
    pub last_state: String,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The configured bound
    pub timeout: Duration,
}

impl WaitError {
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            elapsed,
            timeout,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time limit exceeded waiting for {} (last state: {}, waited {:?} of {:?})",
            self.resource, self.last_state, self.elapsed, self.timeout
        )
    }
}

impl std::error::Error for WaitError {}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WaitTimerError {
    /// The maximum wait elapsed before the expectation held
    #[error("{0}")]
    TimeExceeded(WaitError),

    #[error("could not update status for {kind} ({name}): {message}")]
    Refresh {
        kind: String,
        name: String,
        message: String,
    },

    #[error("expectation failed for {kind} ({name}): {message}")]
    Expectation {
        kind: String,
        name: String,
        message: String,
    },
}

impl WaitTimerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeExceeded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimer {
    pub maximum: Duration,
    pub probe_interval: Duration,
}

impl WaitTimer {
    pub fn new(maximum: Duration, probe_interval: Duration) -> Self {
        Self {
            maximum,
            probe_interval,
        }
    }

    /// Wait until `expectation` returns `Ok(true)` for the freshly refreshed
    /// `target`.
    pub async fn test_expectation<R, F, E>(
        &self,
        target: &mut R,
        mut expectation: F,
    ) -> Result<(), WaitTimerError>
    where
        R: Refreshable + ?Sized,
        F: FnMut(&R) -> Result<bool, E>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let deadline = sleep(self.maximum);
        tokio::pin!(deadline);

        let mut ticker = interval_at(start + self.probe_interval, self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        refresh(target).await?;

        loop {
            match expectation(target) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    return Err(WaitTimerError::Expectation {
                        kind: target.kind().to_string(),
                        name: target.name().to_string(),
                        message: e.to_string(),
                    })
                }
            }

            tokio::select! {
                biased;
                () = &mut deadline => {
                    let err = WaitError::new(
                        format!("{}/{}", target.kind(), target.name()),
                        self.maximum,
                        start.elapsed(),
                    )
                    .with_state(target.state_description());
                    return Err(WaitTimerError::TimeExceeded(err));
                }
                _ = ticker.tick() => {
                    refresh(target).await?;
                    debug!(
                        kind = %target.kind(),
                        name = %target.name(),
                        state = %target.state_description(),
                        elapsed = ?start.elapsed(),
                        "Probed resource status"
                    );
                }
            }
        }
    }
}

async fn refresh<R: Refreshable + ?Sized>(target: &mut R) -> Result<(), WaitTimerError> {
    target
        .update_status()
        .await
        .map_err(|e| WaitTimerError::Refresh {
            kind: target.kind().to_string(),
            name: target.name().to_string(),
            message: e.to_string(),
        })
}

/// State descriptions for typed Kubernetes resources
pub trait ResourceState {
    fn state_description(&self) -> String;
}

impl ResourceState for k8s_openapi::api::core::v1::Pod {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let phase = status
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");

        let Some(statuses) = status.and_then(|s| s.container_statuses.as_ref()) else {
            return format!("phase={phase}, no container status");
        };

        let ready = statuses.iter().filter(|c| c.ready).count();
        let waiting: Vec<&str> = statuses
            .iter()
            .filter_map(|c| {
                c.state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref())
            })
            .collect();

        if waiting.is_empty() {
            format!("phase={phase}, containers {ready}/{} ready", statuses.len())
        } else {
            format!(
                "phase={phase}, containers {ready}/{} ready, waiting: {}",
                statuses.len(),
                waiting.join(", ")
            )
        }
    }
}

impl ResourceState for k8s_openapi::api::batch::v1::Job {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let active = status.and_then(|s| s.active).unwrap_or(0);
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);
        let complete = status.and_then(|s| s.completion_time.as_ref()).is_some();

        format!(
            "active={active}, succeeded={succeeded}, failed={failed}{}",
            if complete { ", complete" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        refreshes: u32,
        fail_on: Option<u32>,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                refreshes: 0,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Refreshable for Counter {
        type Error = String;

        async fn update_status(&mut self) -> Result<(), String> {
            self.refreshes += 1;
            if self.fail_on == Some(self.refreshes) {
                return Err("connection reset".to_string());
            }
            Ok(())
        }

        fn kind(&self) -> &str {
            "Pod"
        }

        fn name(&self) -> &str {
            "server-0"
        }

        fn state_description(&self) -> String {
            format!("refreshed {} times", self.refreshes)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_bounded() {
        let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
        let mut target = Counter::new();

        let start = Instant::now();
        let err = timer
            .test_expectation(&mut target, |_| Ok::<_, String>(false))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout(), "{err}");
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(61), "{elapsed:?}");
        assert!(target.refreshes >= 60);

        let WaitTimerError::TimeExceeded(details) = err else {
            unreachable!()
        };
        assert_eq!(details.resource, "Pod/server-0");
        assert!(details.last_state.starts_with("refreshed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_probe_interval_still_bounded() {
        let timer = WaitTimer::new(Duration::from_secs(15), Duration::from_secs(10));
        let mut target = Counter::new();

        let start = Instant::now();
        let err = timer
            .test_expectation(&mut target, |_| Ok::<_, String>(false))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed <= Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_sees_fresh_state() {
        let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
        let mut target = Counter::new();
        let mut seen = Vec::new();

        timer
            .test_expectation(&mut target, |t| {
                seen.push(t.refreshes);
                Ok::<_, String>(t.refreshes == 4)
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_aborts() {
        let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
        let mut target = Counter::new();
        target.fail_on = Some(3);

        let start = Instant::now();
        let err = timer
            .test_expectation(&mut target, |_| Ok::<_, String>(false))
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(
            err,
            WaitTimerError::Refresh {
                kind: "Pod".into(),
                name: "server-0".into(),
                message: "connection reset".into(),
            }
        );
        assert!(err.to_string().contains("Pod (server-0)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_refresh_failure() {
        let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
        let mut target = Counter::new();
        target.fail_on = Some(1);

        let err = timer
            .test_expectation(&mut target, |_| Ok::<_, String>(true))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitTimerError::Refresh { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expectation_error_propagates() {
        let timer = WaitTimer::new(Duration::from_secs(60), Duration::from_secs(1));
        let mut target = Counter::new();

        let err = timer
            .test_expectation(&mut target, |t| {
                if t.refreshes == 2 {
                    Err("[1] Pods for the Job failed".to_string())
                } else {
                    Ok(false)
                }
            })
            .await
            .unwrap_err();

        assert!(!err.is_timeout());
        assert!(err.to_string().contains("[1] Pods for the Job failed"));
    }

    #[test]
    fn test_wait_error_display() {
        let err = WaitError::new("Pod/myapp", Duration::from_secs(60), Duration::from_secs(60))
            .with_state("phase=Pending, waiting: ImagePullBackOff");

        let output = err.to_string();
        assert!(output.contains("Pod/myapp"));
        assert!(output.contains("ImagePullBackOff"));
        assert!(output.contains("60s"));
    }

    #[test]
    fn test_pod_state_description() {
        use k8s_openapi::api::core::v1::{
            ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus,
        };

        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "main".to_string(),
                    ready: false,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("ContainerCreating".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let state = pod.state_description();
        assert_eq!(
            state,
            "phase=Pending, containers 0/1 ready, waiting: ContainerCreating"
        );
        assert_eq!(Pod::default().state_description(), "phase=Unknown, no container status");
    }

    #[test]
    fn test_job_state_description() {
        use k8s_openapi::api::batch::v1::{Job, JobStatus};

        let job = Job {
            status: Some(JobStatus {
                active: Some(1),
                failed: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(job.state_description(), "active=1, succeeded=0, failed=2");
    }
}
