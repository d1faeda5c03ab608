// Bounded-duration capability probes.
//
// Some environment evaluations need an asynchronous measurement (a timing
// benchmark, a deferred capability query). Each probe runs under its own
// timeout; an overrun or failed probe is "no data" - its factor is simply
// absent from the returned map, never an error. The caller merges the
// completed map into the session as one atomic assignment so an in-flight
// evaluation never observes a partial update.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SentinelError;
use crate::scoring::SuspicionFactor;

/// One asynchronous capability probe. Implementations live with the signal
/// collectors; the engine only schedules them and consumes their factors.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Stable probe name, used for logging and as the factor key.
    fn name(&self) -> &str;

    /// Run the probe. `Ok(None)` means the probed capability is absent
    /// ("not applicable"); `Err` means the probe itself failed. Both leave
    /// the factor out of the map.
    async fn run(&self) -> anyhow::Result<Option<SuspicionFactor>>;
}

/// Run every probe under `timeout`, collecting the factors that resolved.
pub async fn run_probes(
    probes: &[Box<dyn CapabilityProbe>],
    timeout: Duration,
) -> BTreeMap<String, SuspicionFactor> {
    let mut factors = BTreeMap::new();

    for probe in probes {
        match tokio::time::timeout(timeout, probe.run()).await {
            Err(_) => {
                let err = SentinelError::ProbeTimeout {
                    probe: probe.name().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                debug!(error = %err, "treating as no data");
            }
            Ok(Err(e)) => {
                warn!(probe = probe.name(), error = %e, "probe failed, factor excluded");
            }
            Ok(Ok(None)) => {
                debug!(probe = probe.name(), "probe reports not applicable");
            }
            Ok(Ok(Some(factor))) => {
                factors.insert(factor.name.clone(), factor);
            }
        }
    }

    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct FixedProbe {
        name: &'static str,
        score: f64,
    }

    #[async_trait]
    impl CapabilityProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> anyhow::Result<Option<SuspicionFactor>> {
            Ok(Some(SuspicionFactor::new(self.name, self.score)))
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl CapabilityProbe for HangingProbe {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn run(&self) -> anyhow::Result<Option<SuspicionFactor>> {
            // Never resolves
            std::future::pending().await
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl CapabilityProbe for FailingProbe {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self) -> anyhow::Result<Option<SuspicionFactor>> {
            anyhow::bail!("backend unavailable")
        }
    }

    #[tokio::test]
    async fn test_resolved_probes_collected() {
        let probes: Vec<Box<dyn CapabilityProbe>> = vec![
            Box::new(FixedProbe { name: "a", score: 0.3 }),
            Box::new(FixedProbe { name: "b", score: 0.9 }),
        ];
        let factors = run_probes(&probes, Duration::from_millis(100)).await;
        assert_eq!(factors.len(), 2);
        assert_eq!(factors["b"].score, 0.9);
    }

    #[tokio::test]
    async fn test_hanging_probe_is_no_data_and_bounded() {
        let probes: Vec<Box<dyn CapabilityProbe>> = vec![
            Box::new(HangingProbe),
            Box::new(FixedProbe { name: "ok", score: 0.5 }),
        ];

        let start = Instant::now();
        let factors = run_probes(&probes, Duration::from_millis(50)).await;

        assert_eq!(factors.len(), 1);
        assert!(factors.contains_key("ok"));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_failing_probe_excluded_without_error() {
        let probes: Vec<Box<dyn CapabilityProbe>> = vec![Box::new(FailingProbe)];
        let factors = run_probes(&probes, Duration::from_millis(50)).await;
        assert!(factors.is_empty());
    }
}
