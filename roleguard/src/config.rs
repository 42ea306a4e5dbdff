//! Process configuration, read once from flags and the environment.

use clap::{Parser, ValueEnum};
use roleguard_core::{ElectionConfig, ElectionTimings, MemberIdentity};
use std::net::SocketAddr;
use std::time::Duration;

use roleguard_leader::LeaderResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Lease-based leader election for a group of pods.
///
/// The elected member's pod is labelled `alpha.k8s.io/role-active=true`,
/// every other member's pod `false`. Leadership is also exported as the
/// `is_leader` gauge on the metrics endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "roleguard")]
#[command(version)]
pub struct Config {
    /// Identity of this member in the election
    #[arg(long, env = "MEMBER_ID")]
    pub member_id: String,

    /// Name of the election group, also the name of the lease
    #[arg(long, env = "ELECTION_GROUP")]
    pub election_group: String,

    /// Pod that carries this member's role label
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// Namespace of the pod and the lease
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// Lease duration in seconds
    #[arg(long, env = "LEASE_DURATION", default_value_t = 15)]
    pub lease_duration: u64,

    /// Renew deadline in seconds
    #[arg(long, env = "RENEWAL_DEADLINE", default_value_t = 10)]
    pub renewal_deadline: u64,

    /// Retry period in seconds
    #[arg(long, env = "RETRY_PERIOD", default_value_t = 5)]
    pub retry_period: u64,

    /// Listen address of the metrics endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8088")]
    pub metrics_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn timings(&self) -> ElectionTimings {
        ElectionTimings::new()
            .with_lease_duration(Duration::from_secs(self.lease_duration))
            .with_renew_deadline(Duration::from_secs(self.renewal_deadline))
            .with_retry_period(Duration::from_secs(self.retry_period))
    }

    /// Validated election configuration.
    pub fn election_config(&self) -> LeaderResult<ElectionConfig> {
        let identity = MemberIdentity::new(
            self.member_id.as_str(),
            self.election_group.as_str(),
            self.namespace.as_str(),
            self.pod_name.as_str(),
        )?;
        Ok(ElectionConfig::new(identity, self.timings())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "roleguard",
        "--member-id",
        "m1",
        "--election-group",
        "payments",
        "--pod-name",
        "payments-0",
        "--namespace",
        "prod",
    ];

    fn parse(extra: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();

        assert_eq!(config.timings(), ElectionTimings::default());
        assert_eq!(config.metrics_addr, "0.0.0.0:8088".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);

        let election = config.election_config().unwrap();
        assert_eq!(election.identity.member_id(), "m1");
        assert_eq!(election.identity.resource_ref().name, "payments-0");
        assert_eq!(election.identity.lease_ref().name, "payments");
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--lease-duration",
            "30",
            "--renewal-deadline",
            "20",
            "--retry-period",
            "2",
            "--metrics-addr",
            "127.0.0.1:9000",
            "--log-format",
            "text",
        ])
        .unwrap();

        assert_eq!(config.timings().lease_duration, Duration::from_secs(30));
        assert_eq!(config.timings().retry_period, Duration::from_secs(2));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.election_config().is_ok());
    }

    #[test]
    fn test_invalid_timings_are_fatal() {
        let config = parse(&["--renewal-deadline", "20"]).unwrap();
        let err = config.election_config().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_member_id_is_fatal() {
        let mut config = parse(&[]).unwrap();
        config.member_id = "  ".to_string();
        assert!(config.election_config().unwrap_err().is_fatal());
    }

    #[test]
    fn test_rejects_unparseable_metrics_addr() {
        assert!(parse(&["--metrics-addr", "not-an-address"]).is_err());
    }
}
