pub mod plan;
pub mod provider;
pub mod state;

pub use plan::{build_plan, ResourceSpec};
pub use provider::{ComputeProvider, CreatedResource, ProviderSpec, StaticPool};
pub use state::{ProvisionState, ResourceRecord};

use std::path::PathBuf;

use tracing::info;

use crate::chain::Error;
use crate::cluster::{Node, ProvisionOutputs, Topology};

/// Drives a resource plan to convergence against the recorded state.
///
/// Resources already present in the state file are left alone; everything
/// else is created through the provider and recorded immediately, so a run
/// that dies halfway picks up where it stopped on the next invocation.
pub struct Provisioner<'a> {
    provider: &'a dyn ComputeProvider,
    state_path: PathBuf,
}

impl<'a> Provisioner<'a> {
    pub fn new(provider: &'a dyn ComputeProvider, state_path: PathBuf) -> Provisioner<'a> {
        Provisioner {
            provider,
            state_path,
        }
    }

    pub async fn apply(
        &self,
        cluster: &str,
        topology: &Topology,
    ) -> Result<ProvisionOutputs, Error> {
        let plan = build_plan(cluster, topology);
        let mut state = ProvisionState::load(&self.state_path)?;

        let mut created = 0;
        let mut reused = 0;
        for resource in &plan {
            if state.find(resource.name()).is_some() {
                reused += 1;
                continue;
            }
            info!("Creating {} {}", resource.kind(), resource.name());
            let outcome = self.provider.create(resource).await?;
            state.record(ResourceRecord {
                name: resource.name().to_string(),
                kind: resource.kind().to_string(),
                id: outcome.id,
                address: outcome.address,
                created_at: state::timestamp(),
            });
            // Persist per resource so an interrupted run resumes instead of
            // creating duplicates.
            state.save(&self.state_path)?;
            created += 1;
        }
        info!(
            "Provisioning converged: {} created, {} reused",
            created, reused
        );

        outputs_from(&plan, &state)
    }
}

fn outputs_from(plan: &[ResourceSpec], state: &ProvisionState) -> Result<ProvisionOutputs, Error> {
    let mut nodes = Vec::new();
    for resource in plan {
        if let ResourceSpec::Instance { name, role, .. } = resource {
            let record = state
                .find(name)
                .ok_or_else(|| Error::UnableToProvision(format!("no record for {}", name)))?;
            let address = record
                .address
                .clone()
                .ok_or_else(|| Error::UnableToProvision(format!("{} has no address", name)))?;
            nodes.push(Node {
                name: name.clone(),
                role: *role,
                address,
            });
        }
    }
    Ok(ProvisionOutputs { nodes })
}
