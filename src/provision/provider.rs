use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::plan::ResourceSpec;
use crate::chain::Error;
use crate::cluster::NodeRole;

#[derive(Clone, Debug, PartialEq)]
pub struct CreatedResource {
    pub id: String,
    pub address: Option<String>,
}

/// The cloud side of provisioning. One generic creation chokepoint; the
/// engine owns ordering, state diffing, and output extraction.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create(&self, resource: &ResourceSpec) -> Result<CreatedResource, Error>;
}

/// Provider selection in the config file.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderSpec {
    /// Deterministic address pool: derives instance addresses from the
    /// declared subnet CIDRs, or uses explicitly reserved addresses so that
    /// pre-provisioned hosts can be adopted as-is.
    StaticPool {
        #[serde(default)]
        operator: Option<String>,
        #[serde(default)]
        control: Option<String>,
        #[serde(default)]
        workers: Vec<String>,
    },
}

impl Default for ProviderSpec {
    fn default() -> Self {
        ProviderSpec::StaticPool {
            operator: None,
            control: None,
            workers: Vec::new(),
        }
    }
}

impl ProviderSpec {
    pub fn build(&self) -> StaticPool {
        match self {
            ProviderSpec::StaticPool {
                operator,
                control,
                workers,
            } => StaticPool::new(operator.clone(), control.clone(), workers.clone()),
        }
    }
}

/// Every identifier and address is a pure function of the resource itself,
/// so a rerun, or a run resumed in a fresh process, derives the same
/// assignment for the same resource. Nothing is remembered between calls.
pub struct StaticPool {
    reserved_operator: Option<String>,
    reserved_control: Option<String>,
    reserved_workers: Vec<String>,
}

impl StaticPool {
    pub fn new(
        operator: Option<String>,
        control: Option<String>,
        workers: Vec<String>,
    ) -> StaticPool {
        StaticPool {
            reserved_operator: operator,
            reserved_control: control,
            reserved_workers: workers,
        }
    }

    fn address_for(&self, name: &str, role: NodeRole, subnet_cidr: &str) -> Result<String, Error> {
        let ordinal = instance_ordinal(name)?;
        let reserved = match role {
            NodeRole::Operator => self.reserved_operator.clone(),
            NodeRole::Control => self.reserved_control.clone(),
            NodeRole::Worker => self.reserved_workers.get(ordinal as usize - 1).cloned(),
        };
        if let Some(address) = reserved {
            return Ok(address);
        }

        let base = subnet_base(subnet_cidr)?;
        // Hosts below .10 stay free for gateways and the like. The control
        // node takes .10 of its subnet and workers count up from .11.
        let host = match role {
            NodeRole::Control | NodeRole::Operator => 9 + ordinal,
            NodeRole::Worker => 10 + ordinal,
        };
        if host > u32::from(u8::MAX) {
            return Err(Error::UnableToProvision(format!(
                "address pool exhausted in {}",
                subnet_cidr
            )));
        }
        Ok(format!("{}.{}.{}.{}", base[0], base[1], base[2], host))
    }
}

/// Instance names carry a one-based per-role ordinal suffix; address
/// derivation keys off it.
fn instance_ordinal(name: &str) -> Result<u32, Error> {
    name.rsplit_once('-')
        .and_then(|(_, tail)| tail.parse::<u32>().ok())
        .filter(|ordinal| *ordinal >= 1)
        .ok_or_else(|| Error::UnableToProvision(format!("instance name has no ordinal: {}", name)))
}

fn resource_id(prefix: &str, name: &str) -> String {
    format!("{}-{}", prefix, name)
}

fn unaddressed(prefix: &str, name: &str) -> CreatedResource {
    CreatedResource {
        id: resource_id(prefix, name),
        address: None,
    }
}

fn subnet_base(cidr: &str) -> Result<[u8; 4], Error> {
    let (address, _prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::InvalidTopology(format!("not CIDR notation: {}", cidr)))?;
    let base: Ipv4Addr = address
        .parse()
        .map_err(|_| Error::InvalidTopology(format!("malformed address in {}", cidr)))?;
    Ok(base.octets())
}

#[async_trait]
impl ComputeProvider for StaticPool {
    async fn create(&self, resource: &ResourceSpec) -> Result<CreatedResource, Error> {
        let created = match resource {
            ResourceSpec::Network { name, .. } => unaddressed("net", name),
            ResourceSpec::Subnet { name, .. } => unaddressed("subnet", name),
            ResourceSpec::InternetGateway { name } => unaddressed("igw", name),
            ResourceSpec::RouteTable { name, .. } => unaddressed("rtb", name),
            ResourceSpec::ElasticIp { name } => unaddressed("eip", name),
            ResourceSpec::NatGateway { name, .. } => unaddressed("nat", name),
            ResourceSpec::IngressRules { name, .. } => unaddressed("sg", name),
            ResourceSpec::KeyPair { name, .. } => unaddressed("key", name),
            ResourceSpec::Instance {
                name,
                role,
                subnet_cidr,
                ..
            } => CreatedResource {
                id: resource_id("i", name),
                address: Some(self.address_for(name, *role, subnet_cidr)?),
            },
        };

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, role: NodeRole, cidr: &str) -> ResourceSpec {
        ResourceSpec::Instance {
            name: name.into(),
            role,
            instance_class: "t3.small".into(),
            image: "ami-test".into(),
            subnet: "demo-private".into(),
            subnet_cidr: cidr.into(),
            public: false,
        }
    }

    #[tokio::test]
    async fn addresses_follow_role_and_ordinal() {
        let pool = StaticPool::new(None, None, Vec::new());
        let control = pool
            .create(&instance("demo-control-1", NodeRole::Control, "10.0.2.0/24"))
            .await
            .unwrap();
        let first = pool
            .create(&instance("demo-worker-1", NodeRole::Worker, "10.0.2.0/24"))
            .await
            .unwrap();
        let second = pool
            .create(&instance("demo-worker-2", NodeRole::Worker, "10.0.2.0/24"))
            .await
            .unwrap();
        assert_eq!(control.address.as_deref(), Some("10.0.2.10"));
        assert_eq!(first.address.as_deref(), Some("10.0.2.11"));
        assert_eq!(second.address.as_deref(), Some("10.0.2.12"));
    }

    #[tokio::test]
    async fn a_fresh_pool_derives_the_same_addresses() {
        let spec = instance("demo-worker-2", NodeRole::Worker, "10.0.2.0/24");
        let first = StaticPool::new(None, None, Vec::new())
            .create(&spec)
            .await
            .unwrap();
        let second = StaticPool::new(None, None, Vec::new())
            .create(&spec)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.address.as_deref(), Some("10.0.2.12"));
    }

    #[tokio::test]
    async fn subnets_allocate_independently() {
        let pool = StaticPool::new(None, None, Vec::new());
        let private = pool
            .create(&instance("demo-control-1", NodeRole::Control, "10.0.2.0/24"))
            .await
            .unwrap();
        let public = pool
            .create(&instance("demo-operator-1", NodeRole::Operator, "10.0.1.0/24"))
            .await
            .unwrap();
        assert_eq!(private.address.as_deref(), Some("10.0.2.10"));
        assert_eq!(public.address.as_deref(), Some("10.0.1.10"));
    }

    #[tokio::test]
    async fn reserved_addresses_win_over_derivation() {
        let pool = StaticPool::new(
            Some("52.10.0.5".into()),
            Some("192.168.7.2".into()),
            vec!["192.168.7.3".into()],
        );
        let control = pool
            .create(&instance("demo-control-1", NodeRole::Control, "10.0.2.0/24"))
            .await
            .unwrap();
        let worker_one = pool
            .create(&instance("demo-worker-1", NodeRole::Worker, "10.0.2.0/24"))
            .await
            .unwrap();
        let worker_two = pool
            .create(&instance("demo-worker-2", NodeRole::Worker, "10.0.2.0/24"))
            .await
            .unwrap();
        let operator = pool
            .create(&instance("demo-operator-1", NodeRole::Operator, "10.0.1.0/24"))
            .await
            .unwrap();

        assert_eq!(control.address.as_deref(), Some("192.168.7.2"));
        assert_eq!(worker_one.address.as_deref(), Some("192.168.7.3"));
        // No reservation for the second worker, fall back to derivation.
        assert_eq!(worker_two.address.as_deref(), Some("10.0.2.12"));
        assert_eq!(operator.address.as_deref(), Some("52.10.0.5"));
    }

    #[tokio::test]
    async fn names_without_ordinals_are_rejected() {
        let pool = StaticPool::new(None, None, Vec::new());
        let result = pool
            .create(&instance("demo-control", NodeRole::Control, "10.0.2.0/24"))
            .await;
        assert!(matches!(result, Err(Error::UnableToProvision(_))));
    }

    #[tokio::test]
    async fn the_pool_has_a_ceiling() {
        let pool = StaticPool::new(None, None, Vec::new());
        let result = pool
            .create(&instance("demo-worker-246", NodeRole::Worker, "10.0.2.0/24"))
            .await;
        assert!(matches!(result, Err(Error::UnableToProvision(_))));
    }

    #[tokio::test]
    async fn malformed_cidr_is_rejected() {
        let pool = StaticPool::new(None, None, Vec::new());
        let result = pool
            .create(&instance("demo-control-1", NodeRole::Control, "10.0.2.0"))
            .await;
        assert!(matches!(result, Err(Error::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn non_instance_resources_get_ids_without_addresses() {
        let pool = StaticPool::new(None, None, Vec::new());
        let network = pool
            .create(&ResourceSpec::Network {
                name: "demo-net".into(),
                cidr: "10.0.0.0/16".into(),
            })
            .await
            .unwrap();
        let nat = pool
            .create(&ResourceSpec::NatGateway {
                name: "demo-nat".into(),
                subnet: "demo-public".into(),
                elastic_ip: "demo-nat-eip".into(),
            })
            .await
            .unwrap();
        assert!(network.id.starts_with("net-"));
        assert!(network.address.is_none());
        assert!(nat.id.starts_with("nat-"));
        assert!(nat.address.is_none());
    }
}
