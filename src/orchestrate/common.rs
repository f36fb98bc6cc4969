use tracing::info;

use super::run_checked;
use crate::chain::Error;
use crate::inventory::Inventory;
use crate::transport::RemoteShell;

const BASELINE: &str = "sudo DEBIAN_FRONTEND=noninteractive apt-get update -q && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -q curl ca-certificates";

/// Brings every inventory host to the shared baseline the installer needs.
/// Package installs are idempotent, so re-running against an already
/// configured node is harmless.
pub struct CommonStage<'a> {
    shell: &'a dyn RemoteShell,
    inventory: &'a Inventory,
}

impl<'a> CommonStage<'a> {
    pub fn new(shell: &'a dyn RemoteShell, inventory: &'a Inventory) -> CommonStage<'a> {
        CommonStage { shell, inventory }
    }

    pub async fn run(&mut self) -> Result<(), Error> {
        for node in self.inventory.hosts() {
            info!("Applying baseline packages to {}", node.name);
            run_checked(self.shell, &node.address, BASELINE).await?;
        }
        Ok(())
    }
}
