use tracing::info;

use super::install::InstallerSpec;
use super::run_checked;
use crate::chain::Error;
use crate::cluster::{JoinMaterial, Node};
use crate::transport::RemoteShell;

/// Joins each worker to the cluster, one at a time. Refuses to dispatch at
/// all when the join material is missing or empty: a join attempted with a
/// bad token leaves a node in a state this tool does not repair.
pub struct WorkerStage<'a> {
    shell: &'a dyn RemoteShell,
    workers: Vec<&'a Node>,
    installer: &'a InstallerSpec,
    join: Option<JoinMaterial>,
}

impl<'a> WorkerStage<'a> {
    pub fn new(
        shell: &'a dyn RemoteShell,
        workers: Vec<&'a Node>,
        installer: &'a InstallerSpec,
        join: Option<JoinMaterial>,
    ) -> WorkerStage<'a> {
        WorkerStage {
            shell,
            workers,
            installer,
            join,
        }
    }

    pub async fn run(&mut self) -> Result<u32, Error> {
        let join = match self.join.clone() {
            Some(join) if join.is_complete() => join,
            _ => return Err(Error::MissingJoinMaterial),
        };

        let mut joined = 0;
        for node in &self.workers {
            info!("Joining {} to the cluster", node.name);
            for step in self.installer.staging_steps() {
                run_checked(self.shell, &node.address, &step).await?;
            }
            run_checked(
                self.shell,
                &node.address,
                &self.installer.agent_command(&join),
            )
            .await?;
            joined += 1;
        }
        Ok(joined)
    }
}
