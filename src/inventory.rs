use crate::cluster::{Node, ProvisionOutputs};

/// Role-group → host mapping handed to the orchestration step. Built fresh
/// from provisioning outputs on every run and passed by value; the rendered
/// file is regenerated, never patched in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Inventory {
    groups: Vec<InventoryGroup>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InventoryGroup {
    pub name: String,
    pub hosts: Vec<Node>,
}

impl Inventory {
    /// The operator node is the dispatch point, not a configured host, so it
    /// does not appear here.
    pub fn from_outputs(outputs: &ProvisionOutputs) -> Inventory {
        let control: Vec<Node> = outputs.control().cloned().into_iter().collect();
        let workers: Vec<Node> = outputs.workers().into_iter().cloned().collect();
        Inventory {
            groups: vec![
                InventoryGroup {
                    name: "control".into(),
                    hosts: control,
                },
                InventoryGroup {
                    name: "workers".into(),
                    hosts: workers,
                },
            ],
        }
    }

    pub fn hosts(&self) -> Vec<&Node> {
        self.groups.iter().flat_map(|g| g.hosts.iter()).collect()
    }

    pub fn group(&self, name: &str) -> Option<&InventoryGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Line-oriented text: `<name> ansible_host=<address>` under bracketed
    /// group headers. Rendering is deterministic, so re-rendering the same
    /// mapping yields a byte-identical file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&group.name);
            out.push_str("]\n");
            for host in &group.hosts {
                out.push_str(&host.name);
                out.push_str(" ansible_host=");
                out.push_str(&host.address);
                out.push('\n');
            }
        }
        out
    }
}
