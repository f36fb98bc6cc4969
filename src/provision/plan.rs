use serde::{Deserialize, Serialize};

use crate::cluster::{NodeRole, Topology};

/// One declared resource. The planner expands a topology into an ordered
/// list of these; order is creation order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Network {
        name: String,
        cidr: String,
    },
    Subnet {
        name: String,
        cidr: String,
        public: bool,
    },
    InternetGateway {
        name: String,
    },
    /// A route table together with its subnet association: every table here
    /// serves exactly one subnet and carries one default route.
    RouteTable {
        name: String,
        subnet: String,
        destination: String,
        target: String,
    },
    ElasticIp {
        name: String,
    },
    NatGateway {
        name: String,
        subnet: String,
        elastic_ip: String,
    },
    IngressRules {
        name: String,
        ports: Vec<u16>,
        source: String,
    },
    KeyPair {
        name: String,
        public_key: String,
    },
    Instance {
        name: String,
        role: NodeRole,
        instance_class: String,
        image: String,
        subnet: String,
        subnet_cidr: String,
        public: bool,
    },
}

impl ResourceSpec {
    pub fn name(&self) -> &str {
        match self {
            ResourceSpec::Network { name, .. } => name,
            ResourceSpec::Subnet { name, .. } => name,
            ResourceSpec::InternetGateway { name } => name,
            ResourceSpec::RouteTable { name, .. } => name,
            ResourceSpec::ElasticIp { name } => name,
            ResourceSpec::NatGateway { name, .. } => name,
            ResourceSpec::IngressRules { name, .. } => name,
            ResourceSpec::KeyPair { name, .. } => name,
            ResourceSpec::Instance { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceSpec::Network { .. } => "network",
            ResourceSpec::Subnet { .. } => "subnet",
            ResourceSpec::InternetGateway { .. } => "internet-gateway",
            ResourceSpec::RouteTable { .. } => "route-table",
            ResourceSpec::ElasticIp { .. } => "elastic-ip",
            ResourceSpec::NatGateway { .. } => "nat-gateway",
            ResourceSpec::IngressRules { .. } => "ingress-rules",
            ResourceSpec::KeyPair { .. } => "key-pair",
            ResourceSpec::Instance { .. } => "instance",
        }
    }
}

/// Expands the declared topology into creation order: network, subnets, the
/// egress path (internet gateway, route tables, NAT), ingress rules, key
/// pair, then instances (control, workers, operator). Control and workers
/// land in the private subnet, the operator in the public one. Pure and
/// deterministic: the same topology always yields the same plan.
pub fn build_plan(cluster: &str, topology: &Topology) -> Vec<ResourceSpec> {
    let network = &topology.network;
    let public_subnet = format!("{}-public", cluster);
    let private_subnet = format!("{}-private", cluster);
    let igw = format!("{}-igw", cluster);
    let eip = format!("{}-nat-eip", cluster);
    let nat = format!("{}-nat", cluster);

    let mut plan = vec![
        ResourceSpec::Network {
            name: format!("{}-net", cluster),
            cidr: network.vpc_cidr.clone(),
        },
        ResourceSpec::Subnet {
            name: public_subnet.clone(),
            cidr: network.public_subnet_cidr.clone(),
            public: true,
        },
        ResourceSpec::Subnet {
            name: private_subnet.clone(),
            cidr: network.private_subnet_cidr.clone(),
            public: false,
        },
        ResourceSpec::InternetGateway { name: igw.clone() },
        ResourceSpec::RouteTable {
            name: format!("{}-public-rt", cluster),
            subnet: public_subnet.clone(),
            destination: "0.0.0.0/0".into(),
            target: igw,
        },
        // Private nodes have no public address but still pull the installer,
        // so their default route leads out through the NAT.
        ResourceSpec::ElasticIp { name: eip.clone() },
        ResourceSpec::NatGateway {
            name: nat.clone(),
            subnet: public_subnet.clone(),
            elastic_ip: eip,
        },
        ResourceSpec::RouteTable {
            name: format!("{}-private-rt", cluster),
            subnet: private_subnet.clone(),
            destination: "0.0.0.0/0".into(),
            target: nat,
        },
        ResourceSpec::IngressRules {
            name: format!("{}-ingress", cluster),
            ports: vec![topology.ingress.ssh_port, topology.ingress.api_port],
            source: "0.0.0.0/0".into(),
        },
        ResourceSpec::KeyPair {
            name: format!("{}-keypair", cluster),
            public_key: topology.public_key.clone(),
        },
    ];

    plan.push(instance(
        format!("{}-control-1", cluster),
        NodeRole::Control,
        topology,
        &private_subnet,
        &network.private_subnet_cidr,
        false,
    ));
    for index in 1..=topology.workers {
        plan.push(instance(
            format!("{}-worker-{}", cluster, index),
            NodeRole::Worker,
            topology,
            &private_subnet,
            &network.private_subnet_cidr,
            false,
        ));
    }
    plan.push(instance(
        format!("{}-operator-1", cluster),
        NodeRole::Operator,
        topology,
        &public_subnet,
        &network.public_subnet_cidr,
        true,
    ));

    plan
}

fn instance(
    name: String,
    role: NodeRole,
    topology: &Topology,
    subnet: &str,
    subnet_cidr: &str,
    public: bool,
) -> ResourceSpec {
    ResourceSpec::Instance {
        name,
        role,
        instance_class: topology.instance_class.clone(),
        image: topology.image.clone(),
        subnet: subnet.to_string(),
        subnet_cidr: subnet_cidr.to_string(),
        public,
    }
}
