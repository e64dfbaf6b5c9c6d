use crate::config::Config;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One member of the cluster as seen by the membership provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: String,

    /// Holds policy data and receives rollouts
    pub data_node: bool,

    /// Currently reachable from the local node
    pub reachable: bool,
}

impl ClusterMember {
    pub fn data(id: impl Into<String>) -> Self {
        ClusterMember {
            id: id.into(),
            data_node: true,
            reachable: true,
        }
    }
}

/// Source of truth for who is in the cluster and who is master
pub trait ClusterMembership: Send + Sync {
    fn local_node_id(&self) -> String;

    fn members(&self) -> Vec<ClusterMember>;

    /// Externally designated master, if the cluster has one
    fn master_node_id(&self) -> Option<String>;
}

/// Membership fixed by configuration, adjustable at runtime
pub struct StaticMembership {
    local: String,
    members: RwLock<Vec<ClusterMember>>,
    master: RwLock<Option<String>>,
}

impl StaticMembership {
    /// The local node is always a member, added as a data node if missing
    pub fn new(local: impl Into<String>, mut members: Vec<ClusterMember>, master: Option<String>) -> Self {
        let local = local.into();
        if !members.iter().any(|m| m.id == local) {
            members.push(ClusterMember::data(local.clone()));
        }
        members.sort_by(|a, b| a.id.cmp(&b.id));

        StaticMembership {
            local,
            members: RwLock::new(members),
            master: RwLock::new(master),
        }
    }

    pub fn single_node(local: impl Into<String>) -> Self {
        Self::new(local, Vec::new(), None)
    }

    pub fn from_config(config: &Config) -> Self {
        let members = config
            .cluster
            .nodes
            .iter()
            .map(|n| ClusterMember {
                id: n.id.clone(),
                data_node: n.data_node,
                reachable: true,
            })
            .collect();
        Self::new(config.node.node_id.clone(), members, config.cluster.master.clone())
    }

    pub fn set_reachable(&self, node_id: &str, reachable: bool) {
        let mut members = self.members.write();
        if let Some(member) = members.iter_mut().find(|m| m.id == node_id) {
            member.reachable = reachable;
        }
    }

    pub fn set_master(&self, master: Option<String>) {
        *self.master.write() = master;
    }
}

impl ClusterMembership for StaticMembership {
    fn local_node_id(&self) -> String {
        self.local.clone()
    }

    fn members(&self) -> Vec<ClusterMember> {
        self.members.read().clone()
    }

    fn master_node_id(&self) -> Option<String> {
        self.master.read().clone()
    }
}
