#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bootman::chain::Error;
use bootman::cluster::{ClusterConfig, ReadinessPolicy, Topology};
use bootman::orchestrate::InstallerSpec;
use bootman::transport::{ExecOutput, RemoteShell, SshConfig};

#[derive(Clone, Debug)]
pub enum RecordedOp {
    Exec {
        address: String,
        script: String,
        jump: Option<String>,
    },
    Push {
        address: String,
        remote_path: String,
        bytes: usize,
        jump: Option<String>,
    },
}

struct Rule {
    pattern: String,
    responses: VecDeque<ExecOutput>,
}

/// Scripted stand-in for the SSH transport. Matches incoming scripts against
/// substring patterns and replays canned outputs; every operation is recorded
/// in order, and the log is shared with jump-scoped clones.
#[derive(Clone)]
pub struct FakeShell {
    log: Arc<Mutex<Vec<RecordedOp>>>,
    rules: Arc<Mutex<Vec<Rule>>>,
    jump: Option<String>,
}

pub fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        timed_out: false,
    }
}

pub fn fail(code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
        timed_out: false,
    }
}

impl FakeShell {
    pub fn new() -> FakeShell {
        FakeShell {
            log: Arc::new(Mutex::new(Vec::new())),
            rules: Arc::new(Mutex::new(Vec::new())),
            jump: None,
        }
    }

    /// Scripts containing `pattern` always produce `output`.
    pub fn respond(&self, pattern: &str, output: ExecOutput) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: VecDeque::from(vec![output]),
        });
    }

    /// Scripts containing `pattern` produce the outputs in order; the final
    /// one repeats once the rest are consumed.
    pub fn respond_sequence(&self, pattern: &str, outputs: Vec<ExecOutput>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: VecDeque::from(outputs),
        });
    }

    pub fn ops(&self) -> Vec<RecordedOp> {
        self.log.lock().unwrap().clone()
    }

    pub fn exec_scripts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Exec { script, .. } => Some(script),
                RecordedOp::Push { .. } => None,
            })
            .collect()
    }

    pub fn pushed_paths(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Push { remote_path, .. } => Some(remote_path),
                RecordedOp::Exec { .. } => None,
            })
            .collect()
    }

    fn response_for(&self, script: &str) -> ExecOutput {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if script.contains(&rule.pattern) {
                return if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap_or_else(|| ok(""))
                } else {
                    rule.responses.front().cloned().unwrap_or_else(|| ok(""))
                };
            }
        }
        ok("")
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, address: &str, script: &str) -> Result<ExecOutput, Error> {
        self.log.lock().unwrap().push(RecordedOp::Exec {
            address: address.to_string(),
            script: script.to_string(),
            jump: self.jump.clone(),
        });
        Ok(self.response_for(script))
    }

    async fn push(&self, address: &str, content: &[u8], remote_path: &str) -> Result<(), Error> {
        self.log.lock().unwrap().push(RecordedOp::Push {
            address: address.to_string(),
            remote_path: remote_path.to_string(),
            bytes: content.len(),
            jump: self.jump.clone(),
        });
        Ok(())
    }

    fn with_jump(&self, address: &str) -> Box<dyn RemoteShell> {
        let mut scoped = self.clone();
        scoped.jump = Some(address.to_string());
        Box::new(scoped)
    }
}

pub fn sample_config(workers: u32, key_path: &Path) -> ClusterConfig {
    ClusterConfig {
        name: "demo".into(),
        topology: Topology {
            region: "ap-southeast-1".into(),
            instance_class: "t3.small".into(),
            image: "ami-003c463c8207b4dfa".into(),
            network: Default::default(),
            ingress: Default::default(),
            public_key: "ssh-ed25519 AAAATESTKEY demo".into(),
            workers,
        },
        ssh: SshConfig {
            user: "ubuntu".into(),
            key_path: key_path.to_path_buf(),
            connect_timeout_secs: 5,
            command_timeout_secs: 30,
            jump_via_operator: false,
        },
        installer: InstallerSpec {
            url: "https://get.k3s.io".into(),
            version: "v1.29.2+k3s1".into(),
            sha256: "deadbeef".into(),
        },
        readiness: ReadinessPolicy {
            attempts: 3,
            interval_secs: 0,
        },
        provider: Default::default(),
        artifact_dir: "/opt/bootman".into(),
    }
}
