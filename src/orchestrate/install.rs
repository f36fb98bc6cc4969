use serde::{Deserialize, Serialize};

use crate::cluster::JoinMaterial;

/// Where the installer lands on every node before it runs.
pub const INSTALL_PATH: &str = "/tmp/k3s-install.sh";
/// Written by the server install once the control plane is up.
pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
/// Admin kubeconfig produced by the server install.
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
/// Environment variable the agent install reads the join token from. The
/// token is a secret; failure reporting masks this variable's value.
pub const TOKEN_ENV: &str = "K3S_TOKEN";

/// Pinned installer artifact. Every node downloads the same script, verifies
/// it against the declared checksum, and only then executes it, so an
/// upstream script that drifted aborts the stage instead of running.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstallerSpec {
    pub url: String,
    pub version: String,
    pub sha256: String,
}

impl InstallerSpec {
    /// Download, verify, mark executable. Runs ahead of the role-specific
    /// install command on every node.
    pub fn staging_steps(&self) -> Vec<String> {
        vec![
            format!("curl -fsSL -o {} {}", INSTALL_PATH, self.url),
            format!("echo '{}  {}' | sha256sum -c -", self.sha256, INSTALL_PATH),
            format!("chmod +x {}", INSTALL_PATH),
        ]
    }

    pub fn server_command(&self) -> String {
        format!(
            "sudo INSTALL_K3S_VERSION={} {} server",
            self.version, INSTALL_PATH
        )
    }

    pub fn agent_command(&self, join: &JoinMaterial) -> String {
        format!(
            "sudo K3S_URL={} {}={} INSTALL_K3S_VERSION={} {} agent",
            join.server_url, TOKEN_ENV, join.token, self.version, INSTALL_PATH
        )
    }
}
