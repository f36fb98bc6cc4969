use tracing::{debug, info};

use crate::chain::Error;
use crate::cluster::{Node, ReadinessPolicy};
use crate::transport::RemoteShell;

const LIST_NODES: &str = "sudo k3s kubectl get nodes --no-headers";

/// Confirms membership after the join stage: every expected member
/// registered against the control plane and reporting Ready, within the
/// readiness budget.
pub struct VerifyStage<'a> {
    shell: &'a dyn RemoteShell,
    control: &'a Node,
    expected: u32,
    readiness: &'a ReadinessPolicy,
}

impl<'a> VerifyStage<'a> {
    pub fn new(
        shell: &'a dyn RemoteShell,
        control: &'a Node,
        expected: u32,
        readiness: &'a ReadinessPolicy,
    ) -> VerifyStage<'a> {
        VerifyStage {
            shell,
            control,
            expected,
            readiness,
        }
    }

    pub async fn run(&mut self) -> Result<u32, Error> {
        for attempt in 1..=self.readiness.attempts {
            match self.shell.exec(&self.control.address, LIST_NODES).await {
                Ok(output) if output.success() => {
                    let (total, ready) = count_members(&output.stdout);
                    if total == self.expected && ready == total {
                        info!("All {} members are Ready", ready);
                        return Ok(ready);
                    }
                    debug!(
                        "{}/{} members ready ({} registered), attempt {}",
                        ready, self.expected, total, attempt
                    );
                }
                Ok(_) => debug!("Member listing unavailable, attempt {}", attempt),
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
}

/// Counts rows of `kubectl get nodes --no-headers` output. The status column
/// must be exactly `Ready`; `NotReady` and compound states such as
/// `Ready,SchedulingDisabled` do not count.
fn count_members(listing: &str) -> (u32, u32) {
    let mut total = 0;
    let mut ready = 0;
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        if fields.next().is_none() {
            continue;
        }
        total += 1;
        if fields.next() == Some("Ready") {
            ready += 1;
        }
    }
    (total, ready)
}
