use tracing::{debug, info};

use super::install::{InstallerSpec, KUBECONFIG_PATH, TOKEN_PATH};
use super::run_checked;
use crate::chain::Error;
use crate::cluster::{JoinMaterial, Node, ReadinessPolicy};
use crate::transport::RemoteShell;

/// Installs the control plane on the control node and reads back the join
/// material every worker needs. Produces the material exactly once per run;
/// nothing here persists the token anywhere off the node.
pub struct ControlStage<'a> {
    shell: &'a dyn RemoteShell,
    node: &'a Node,
    installer: &'a InstallerSpec,
    readiness: &'a ReadinessPolicy,
    api_port: u16,
}

impl<'a> ControlStage<'a> {
    pub fn new(
        shell: &'a dyn RemoteShell,
        node: &'a Node,
        installer: &'a InstallerSpec,
        readiness: &'a ReadinessPolicy,
        api_port: u16,
    ) -> ControlStage<'a> {
        ControlStage {
            shell,
            node,
            installer,
            readiness,
            api_port,
        }
    }

    pub async fn run(&mut self) -> Result<JoinMaterial, Error> {
        info!("Installing control plane on {}", self.node.name);
        for step in self.installer.staging_steps() {
            run_checked(self.shell, &self.node.address, &step).await?;
        }
        run_checked(
            self.shell,
            &self.node.address,
            &self.installer.server_command(),
        )
        .await?;
        // The kubeconfig starts out root-only; the verify stage and any
        // later operator session read it over plain SSH.
        run_checked(
            self.shell,
            &self.node.address,
            &format!("sudo chmod 644 {}", KUBECONFIG_PATH),
        )
        .await?;

        let token = self.read_token().await?;
        let address = self.advertised_address().await?;

        let join = JoinMaterial {
            server_url: format!("https://{}:{}", address, self.api_port),
            token,
        };
        info!("Control plane up, join material captured");
        Ok(join)
    }

    /// The server writes the token only after the control plane is actually
    /// up, so this polls within the readiness budget instead of assuming the
    /// install command returning means ready.
    async fn read_token(&self) -> Result<String, Error> {
        let script = format!("sudo cat {}", TOKEN_PATH);
        for attempt in 1..=self.readiness.attempts {
            match self.shell.exec(&self.node.address, &script).await {
                Ok(output) => {
                    let token = output.stdout.trim();
                    if output.success() && !token.is_empty() {
                        return Ok(token.to_string());
                    }
                    debug!("Join token not present yet, attempt {}", attempt);
                }
                Err(Error::UnableToConnect { .. }) => {
                    debug!("Control node unreachable, attempt {}", attempt);
                }
                Err(e) => return Err(e),
            };
            if attempt < self.readiness.attempts {
                tokio::time::sleep(self.readiness.interval()).await;
            }
        }
        Err(Error::ResourceNotReady)
    }

    /// The address workers dial is the node's own primary address, not the
    /// one this process happens to reach it at.
    async fn advertised_address(&self) -> Result<String, Error> {
        let output = run_checked(
            self.shell,
            &self.node.address,
            "hostname -I | awk '{print $1}'",
        )
        .await?;
        let address = output.stdout.trim().to_string();
        if address.is_empty() {
            return Err(Error::RemoteTaskFailed {
                node: self.node.name.clone(),
                command: "hostname -I".into(),
                code: 0,
                stderr: "node reported no primary address".into(),
            });
        }
        Ok(address)
    }
}
