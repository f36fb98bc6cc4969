use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::Error;

/// Role is fixed when the node is provisioned and never changes afterwards.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Control,
    Worker,
    Operator,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            NodeRole::Control => "control",
            NodeRole::Worker => "worker",
            NodeRole::Operator => "operator",
        };
        write!(f, "{}", name)
    }
}

/// A provisioned compute node. The address is public for the operator and
/// private for control/workers; it is immutable after creation.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    pub address: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct NetworkSpec {
    pub vpc_cidr: String,
    pub public_subnet_cidr: String,
    pub private_subnet_cidr: String,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        NetworkSpec {
            vpc_cidr: "10.0.0.0/16".into(),
            public_subnet_cidr: "10.0.1.0/24".into(),
            private_subnet_cidr: "10.0.2.0/24".into(),
        }
    }
}

/// Ports opened to all sources: remote access and the cluster API.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct IngressSpec {
    pub ssh_port: u16,
    pub api_port: u16,
}

impl Default for IngressSpec {
    fn default() -> Self {
        IngressSpec {
            ssh_port: 22,
            api_port: 6443,
        }
    }
}

/// The declared node counts and placement inputs. One control node and one
/// operator node are implied; only the worker count varies.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Topology {
    pub region: String,
    pub instance_class: String,
    pub image: String,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub ingress: IngressSpec,
    pub public_key: String,
    pub workers: u32,
}

/// Bounded retry policy applied wherever the pipeline has to wait on a node:
/// operator reachability, join-token publication, member readiness.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy {
            attempts: 30,
            interval_secs: 10,
        }
    }
}

impl ReadinessPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_artifact_dir() -> String {
    "/opt/bootman".into()
}

/// Root of the configuration file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClusterConfig {
    pub name: String,
    pub topology: Topology,
    pub ssh: crate::transport::SshConfig,
    pub installer: crate::orchestrate::InstallerSpec,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    #[serde(default)]
    pub provider: crate::provision::ProviderSpec,
    /// Directory on the operator node that receives the staged artifacts
    /// (inventory, config, access credential).
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<ClusterConfig, Error> {
        let raw = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects a declaration before any stage acts on it.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidTopology("cluster name is empty".into()));
        }
        if self.topology.workers == 0 {
            return Err(Error::InvalidTopology(
                "at least one worker node is required".into(),
            ));
        }
        if self.topology.public_key.trim().is_empty() {
            return Err(Error::InvalidTopology("public key is empty".into()));
        }
        for (label, cidr) in [
            ("vpc_cidr", &self.topology.network.vpc_cidr),
            ("public_subnet_cidr", &self.topology.network.public_subnet_cidr),
            ("private_subnet_cidr", &self.topology.network.private_subnet_cidr),
        ] {
            if !cidr.contains('/') {
                return Err(Error::InvalidTopology(format!(
                    "{} is not in CIDR notation: {}",
                    label, cidr
                )));
            }
        }
        if self.installer.sha256.trim().is_empty() {
            return Err(Error::InvalidTopology(
                "installer checksum is empty".into(),
            ));
        }
        Ok(())
    }
}

/// The address + secret token pair a worker needs to join the cluster.
/// Produced exactly once per cluster by the control stage; cluster-lifetime
/// scoped, never reused across distinct clusters.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct JoinMaterial {
    pub server_url: String,
    pub token: String,
}

impl JoinMaterial {
    pub fn is_complete(&self) -> bool {
        !self.server_url.trim().is_empty() && !self.token.trim().is_empty()
    }
}

/// What the provisioner hands to the rest of the pipeline: the full node set
/// with resolved addresses.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct ProvisionOutputs {
    pub nodes: Vec<Node>,
}

impl ProvisionOutputs {
    pub fn operator(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Operator)
    }

    pub fn control(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Control)
    }

    pub fn workers(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.role == NodeRole::Worker)
            .collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.address.clone()).collect()
    }
}

/// Progress marker for a deployment run. Every completed step is recorded as
/// one of these in the run report; `determine_stage` reads the last one back.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Stage {
    RunStarted,
    Provisioned(ProvisionOutputs),
    OperatorPrepared(String),
    CommonApplied,
    ControlConfigured(String),
    WorkersJoined(u32),
    MembersReady(u32),
    CreationFailed(String),
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let message: String = match self {
            Stage::RunStarted => "RunStarted".into(),
            Stage::Provisioned(_) => "Provisioned".into(),
            Stage::OperatorPrepared(_) => "OperatorPrepared".into(),
            Stage::CommonApplied => "CommonApplied".into(),
            Stage::ControlConfigured(_) => "ControlConfigured".into(),
            Stage::WorkersJoined(_) => "WorkersJoined".into(),
            Stage::MembersReady(_) => "MembersReady".into(),
            Stage::CreationFailed(_) => "CreationFailed".into(),
        };
        write!(f, "{}", message)
    }
}

impl Stage {
    pub fn message(&self) -> String {
        match self {
            Stage::RunStarted => "Deployment run started".to_string(),
            Stage::Provisioned(outputs) => {
                format!("Provisioned {} nodes", outputs.nodes.len())
            }
            Stage::OperatorPrepared(address) => {
                format!("Operator node {} prepared", address)
            }
            Stage::CommonApplied => "Common stage applied to all nodes".to_string(),
            Stage::ControlConfigured(server_url) => {
                format!("Control plane at {} published join material", server_url)
            }
            Stage::WorkersJoined(count) => format!("{} workers joined", count),
            Stage::MembersReady(count) => format!("{} members ready", count),
            Stage::CreationFailed(reason) => {
                format!("Deployment run failed: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outputs() -> ProvisionOutputs {
        ProvisionOutputs {
            nodes: vec![
                Node {
                    name: "demo-control-1".into(),
                    role: NodeRole::Control,
                    address: "10.0.2.10".into(),
                },
                Node {
                    name: "demo-worker-1".into(),
                    role: NodeRole::Worker,
                    address: "10.0.2.11".into(),
                },
                Node {
                    name: "demo-worker-2".into(),
                    role: NodeRole::Worker,
                    address: "10.0.2.12".into(),
                },
                Node {
                    name: "demo-operator-1".into(),
                    role: NodeRole::Operator,
                    address: "10.0.1.10".into(),
                },
            ],
        }
    }

    #[test]
    fn outputs_select_by_role() {
        let outputs = sample_outputs();
        assert_eq!(outputs.control().unwrap().address, "10.0.2.10");
        assert_eq!(outputs.operator().unwrap().address, "10.0.1.10");
        assert_eq!(outputs.workers().len(), 2);
    }

    #[test]
    fn join_material_requires_both_values() {
        let complete = JoinMaterial {
            server_url: "https://10.0.2.10:6443".into(),
            token: "K10abc::node:xyz".into(),
        };
        assert!(complete.is_complete());

        let empty_token = JoinMaterial {
            server_url: "https://10.0.2.10:6443".into(),
            token: "   ".into(),
        };
        assert!(!empty_token.is_complete());

        let empty_url = JoinMaterial {
            server_url: String::new(),
            token: "K10abc".into(),
        };
        assert!(!empty_url.is_complete());
    }

    #[test]
    fn stage_display_names_are_stable() {
        assert_eq!(format!("{}", Stage::CommonApplied), "CommonApplied");
        assert_eq!(
            format!("{}", Stage::CreationFailed("boom".into())),
            "CreationFailed"
        );
        assert_eq!(format!("{}", Stage::WorkersJoined(2)), "WorkersJoined");
    }

    #[test]
    fn the_shipped_declaration_parses_and_validates() {
        let raw = include_str!("../demos/cluster.json");
        let config: ClusterConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.topology.workers, 2);
        assert_eq!(config.topology.ingress.api_port, 6443);
    }

    #[test]
    fn zero_worker_topologies_are_rejected() {
        let raw = include_str!("../demos/cluster.json");
        let mut config: ClusterConfig = serde_json::from_str(raw).unwrap();
        config.topology.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn malformed_cidrs_are_rejected() {
        let raw = include_str!("../demos/cluster.json");
        let mut config: ClusterConfig = serde_json::from_str(raw).unwrap();
        config.topology.network.private_subnet_cidr = "10.0.2.0".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }
}
