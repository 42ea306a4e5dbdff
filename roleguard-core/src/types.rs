use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, RoleguardError};

/// Label key carrying the role of a member on its resource.
pub const ROLE_LABEL_KEY: &str = "alpha.k8s.io/role-active";

/// Immutable identity of the local member.
///
/// Established once at process start and threaded by reference into every
/// component. All lease and label operations are scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberIdentity {
    member_id: String,
    election_group: String,
    namespace: String,
    resource_name: String,
}

impl MemberIdentity {
    /// Builds an identity, rejecting empty fields.
    pub fn new(
        member_id: impl Into<String>,
        election_group: impl Into<String>,
        namespace: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            member_id: member_id.into(),
            election_group: election_group.into(),
            namespace: namespace.into(),
            resource_name: resource_name.into(),
        };

        for (field, value) in [
            ("member id", &identity.member_id),
            ("election group", &identity.election_group),
            ("namespace", &identity.namespace),
            ("resource name", &identity.resource_name),
        ] {
            if value.trim().is_empty() {
                return Err(RoleguardError::config(format!("{field} must not be empty")));
            }
        }

        Ok(identity)
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn election_group(&self) -> &str {
        &self.election_group
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// The lease contended for by every member of the election group.
    pub fn lease_ref(&self) -> LeaseRef {
        LeaseRef::new(&self.namespace, &self.election_group)
    }

    /// The resource whose role label this member owns.
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.namespace, &self.resource_name)
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            self.member_id, self.namespace, self.election_group
        )
    }
}

/// Namespaced reference to the resource that carries a member's role label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Namespaced reference to the lease of an election group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseRef {
    pub namespace: String,
    pub name: String,
}

impl LeaseRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LeaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Election state of the local member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ElectionState {
    /// No lease callback received yet
    #[default]
    Unknown,

    /// This member holds the lease
    Leader,

    /// Another member holds the lease, or this member lost it
    Follower,
}

impl ElectionState {
    pub fn is_leader(self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Leader => "leader",
            Self::Follower => "follower",
        };
        f.write_str(name)
    }
}

/// Role published on the member's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    /// Value written under [`ROLE_LABEL_KEY`].
    pub fn label_value(self) -> &'static str {
        match self {
            Self::Leader => "true",
            Self::Follower => "false",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader => f.write_str("leader"),
            Self::Follower => f.write_str("follower"),
        }
    }
}
