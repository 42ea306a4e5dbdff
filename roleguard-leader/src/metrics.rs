//! Leadership gauge exported in the Prometheus text format.

use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use roleguard_core::MemberIdentity;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::{LeaderError, LeaderResult};

pub const IS_LEADER_METRIC: &str = "is_leader";

/// Publishes whether the local member is the active leader.
///
/// The gauge is only registered on the first [`set_leading`] call, so a
/// freshly started process exports no leadership value until its first
/// transition. Gauges are atomic; scrapes and writes may run concurrently.
///
/// [`set_leading`]: MetricsReporter::set_leading
pub struct MetricsReporter {
    registry: Registry,
    is_leader: Gauge,
    registered: AtomicBool,
}

impl MetricsReporter {
    /// Binds the gauge's static labels to the member identity.
    pub fn new(identity: &MemberIdentity) -> LeaderResult<Self> {
        let opts = Opts::new(
            IS_LEADER_METRIC,
            "Set to 1 if current instance is leader and 0 if otherwise",
        )
        .const_label("pod_name", identity.resource_name())
        .const_label("member_id", identity.member_id())
        .const_label("election_group", identity.election_group())
        .const_label("namespace", identity.namespace());

        let registry = Registry::new();
        register_process_collector(&registry)?;

        Ok(Self {
            registry,
            is_leader: Gauge::with_opts(opts)?,
            registered: AtomicBool::new(false),
        })
    }

    /// The value is stored before the first registration, so no scrape
    /// sees the gauge with a value other than the one last set.
    pub fn set_leading(&self, leading: bool) {
        self.is_leader.set(if leading { 1.0 } else { 0.0 });
        if !self.registered.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.registry.register(Box::new(self.is_leader.clone())) {
                warn!(error = %e, "Failed to register leadership gauge");
            }
        }
    }

    /// Current gauge value, `None` before the first transition.
    pub fn value(&self) -> Option<f64> {
        self.registered
            .load(Ordering::Acquire)
            .then(|| self.is_leader.get())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered metric in the text exposition format.
    pub fn encode(&self) -> LeaderResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| LeaderError::Metrics {
            reason: e.to_string(),
        })
    }
}

#[cfg(target_os = "linux")]
fn register_process_collector(registry: &Registry) -> LeaderResult<()> {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    registry.register(Box::new(collector))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn register_process_collector(_registry: &Registry) -> LeaderResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> MemberIdentity {
        MemberIdentity::new("m1", "payments", "prod", "payments-0").unwrap()
    }

    #[test]
    fn test_gauge_unset_until_first_transition() {
        let reporter = MetricsReporter::new(&identity()).unwrap();

        assert_eq!(reporter.value(), None);
        assert!(!reporter.encode().unwrap().contains(IS_LEADER_METRIC));

        reporter.set_leading(true);
        assert_eq!(reporter.value(), Some(1.0));

        reporter.set_leading(false);
        assert_eq!(reporter.value(), Some(0.0));
    }

    #[test]
    fn test_encoded_gauge_carries_static_labels() {
        let reporter = MetricsReporter::new(&identity()).unwrap();
        reporter.set_leading(true);

        let text = reporter.encode().unwrap();
        let line = text
            .lines()
            .find(|line| line.starts_with("is_leader{"))
            .expect("is_leader sample missing");

        assert!(line.contains(r#"member_id="m1""#));
        assert!(line.contains(r#"election_group="payments""#));
        assert!(line.contains(r#"namespace="prod""#));
        assert!(line.contains(r#"pod_name="payments-0""#));
        assert!(line.ends_with(" 1"));
    }

    #[test]
    fn test_concurrent_scrape_never_sees_unset_leader_gauge() {
        use std::sync::Arc;

        for _ in 0..50 {
            let reporter = Arc::new(MetricsReporter::new(&identity()).unwrap());
            let done = Arc::new(AtomicBool::new(false));

            let scraper = {
                let reporter = Arc::clone(&reporter);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut samples = Vec::new();
                    while !done.load(Ordering::Acquire) {
                        let text = reporter.encode().unwrap();
                        samples.extend(
                            text.lines()
                                .filter(|line| line.starts_with("is_leader{"))
                                .map(str::to_string),
                        );
                    }
                    samples
                })
            };

            reporter.set_leading(true);
            done.store(true, Ordering::Release);

            let samples = scraper.join().unwrap();
            assert!(
                samples.iter().all(|line| line.ends_with(" 1")),
                "scrape exported a stale value: {samples:?}"
            );
        }
    }

    #[test]
    fn test_reporters_do_not_share_state() {
        let first = MetricsReporter::new(&identity()).unwrap();
        let second = MetricsReporter::new(&identity()).unwrap();

        first.set_leading(true);
        assert_eq!(second.value(), None);
    }
}
