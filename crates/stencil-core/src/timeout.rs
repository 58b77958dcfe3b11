//
// timeout.rs
//
// Deadline-bound execution scopes for externally triggered operations.
//

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::EngineError;

/// Operation classes, each with its own configured deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Parsing,
    Filesystem,
    Validation,
    Generic,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Parsing => "parsing",
            OperationKind::Filesystem => "filesystem",
            OperationKind::Validation => "validation",
            OperationKind::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Per-class deadlines plus the filesystem admission cap.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub parsing: Duration,
    pub filesystem: Duration,
    pub validation: Duration,
    pub generic: Duration,
    /// Maximum concurrent in-flight filesystem-class operations.
    pub max_concurrent_filesystem: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            parsing: Duration::from_secs(10),
            filesystem: Duration::from_secs(2),
            validation: Duration::from_secs(15),
            generic: Duration::from_secs(5),
            max_concurrent_filesystem: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn duration_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Parsing => self.parsing,
            OperationKind::Filesystem => self.filesystem,
            OperationKind::Validation => self.validation,
            OperationKind::Generic => self.generic,
        }
    }
}

/// Wraps futures in a deadline for their operation class.
///
/// Filesystem-class operations additionally pass through an admission
/// semaphore capping concurrent in-flight work; the admission wait happens
/// before the deadline starts, so a queued operation still gets its full
/// time budget once admitted.
#[derive(Debug)]
pub struct OperationGuard {
    config: TimeoutConfig,
    filesystem_permits: Arc<Semaphore>,
}

impl OperationGuard {
    pub fn new(config: TimeoutConfig) -> Self {
        let filesystem_permits = Arc::new(Semaphore::new(config.max_concurrent_filesystem));
        Self {
            config,
            filesystem_permits,
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Run `fut` under the deadline configured for `kind`.
    ///
    /// Deadline expiry surfaces as `EngineError::Timeout`, which is distinct
    /// from caller-initiated cancellation.
    pub async fn run<F, T>(&self, kind: OperationKind, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = T>,
    {
        let _permit = if kind == OperationKind::Filesystem {
            let permit = self
                .filesystem_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            Some(permit)
        } else {
            None
        };

        match tokio::time::timeout(self.config.duration_for(kind), fut).await {
            Ok(value) => Ok(value),
            Err(_) => {
                log::warn!("{kind} operation exceeded its deadline");
                Err(EngineError::Timeout { operation: kind })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_operation_within_deadline_succeeds() {
        let guard = OperationGuard::new(TimeoutConfig::default());
        let result = guard
            .run(OperationKind::Generic, async { 7usize })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_past_deadline_times_out() {
        let guard = OperationGuard::new(TimeoutConfig::default());
        let result = guard
            .run(OperationKind::Filesystem, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;
        match result {
            Err(EngineError::Timeout { operation }) => {
                assert_eq!(operation, OperationKind::Filesystem);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_filesystem_admission_cap_limits_concurrency() {
        let config = TimeoutConfig {
            max_concurrent_filesystem: 2,
            ..TimeoutConfig::default()
        };
        let guard = Arc::new(OperationGuard::new(config));
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let guard = guard.clone();
            let peak = peak.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .run(OperationKind::Filesystem, async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "admission throttle exceeded: peak {}",
            peak.load(Ordering::SeqCst)
        );
    }
}
