pub mod cluster;
pub mod fault_injection;
pub mod store;

pub use cluster::{pod_name, ElectionCluster, ELECTION_GROUP, NAMESPACE};
pub use fault_injection::{
    create_test_scenarios, ElectionTestHarness, ExpectedOutcome, FaultType, Target, TestResult,
    TestScenario,
};
pub use store::{Isolation, MemberLeaseStore};
