use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::offset::Utc;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::cluster::{ClusterConfig, Node, ProvisionOutputs, ReadinessPolicy, Stage};
use crate::inventory::Inventory;
use crate::orchestrate::{run_checked, CommonStage, ControlStage, VerifyStage, WorkerStage};
use crate::provision::{ComputeProvider, Provisioner};
use crate::transport::RemoteShell;

#[derive(Debug, Error)]
pub enum Error {
    #[error("InvalidTopology: {0}")]
    InvalidTopology(String),
    #[error("UnableToProvision: {0}")]
    UnableToProvision(String),
    #[error("UnableToConnect: {node}: {reason}")]
    UnableToConnect { node: String, reason: String },
    #[error("RemoteTaskFailed: {command} on {node} exited {code}: {stderr}")]
    RemoteTaskFailed {
        node: String,
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("MissingJoinMaterial")]
    MissingJoinMaterial,
    #[error("OrderingViolation: {0}")]
    OrderingViolation(String),
    #[error("ResourceNotReady")]
    ResourceNotReady,
    #[error("UnknownStage: {0}")]
    UnknownStage(String),
    #[error("UnableToSerializeObject: {0}")]
    UnableToSerializeObject(#[from] serde_json::Error),
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct RunCondition {
    #[serde(rename = "type")]
    pub type__: String,
    pub message: String,
    pub status: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,
}

/// The on-disk record of a deployment run. Fields fill in as stages
/// complete; `conditions` keeps the full history in order. The join token is
/// deliberately never written here.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RunReport {
    pub cluster: String,
    pub outputs: Option<ProvisionOutputs>,
    pub operator: Option<String>,
    pub control_plane: Option<String>,
    pub joined_workers: Option<u32>,
    pub ready_members: Option<u32>,
    #[serde(default)]
    pub conditions: Vec<RunCondition>,
}

impl RunReport {
    pub fn load(path: &Path) -> Result<RunReport, Error> {
        if !path.exists() {
            return Ok(RunReport::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let report: RunReport = serde_json::from_str(&raw)?;
        Ok(report)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

pub fn update_status(path: &Path, cluster: &str, stage: &Stage) -> Result<RunReport, Error> {
    info!("Updating Status");
    let mut report = RunReport::load(path)?;
    if report.cluster.is_empty() {
        report.cluster = cluster.to_string();
    }

    let datetime: DateTime<Utc> = SystemTime::now().into();
    let mut condition_entry = RunCondition {
        type__: format!("{}", stage),
        message: stage.message(),
        status: "True".into(),
        last_transition_time: format!("{}", datetime.format("%d/%m/%Y %T")),
    };

    match stage {
        Stage::CreationFailed(_) => {
            condition_entry.status = "False".into();
        }
        Stage::Provisioned(outputs) => {
            report.outputs = Some(outputs.clone());
        }
        Stage::OperatorPrepared(address) => {
            report.operator = Some(address.clone());
        }
        Stage::ControlConfigured(server_url) => {
            report.control_plane = Some(server_url.clone());
        }
        Stage::WorkersJoined(count) => {
            report.joined_workers = Some(*count);
        }
        Stage::MembersReady(count) => {
            report.ready_members = Some(*count);
        }
        _ => {}
    };

    report.conditions.push(condition_entry);
    report.save(path)?;
    Ok(report)
}

pub fn determine_stage(report: &RunReport) -> Result<Stage, Error> {
    let last = match report.conditions.last() {
        Some(last) => last,
        None => return Ok(Stage::RunStarted),
    };
    match last.type__.as_str() {
        "RunStarted" => Ok(Stage::RunStarted),
        "Provisioned" => match report.outputs.clone() {
            Some(outputs) => Ok(Stage::Provisioned(outputs)),
            None => Err(Error::UnknownStage(
                "Provisioned condition with no recorded outputs".into(),
            )),
        },
        "OperatorPrepared" => match report.operator.clone() {
            Some(address) => Ok(Stage::OperatorPrepared(address)),
            None => Err(Error::UnknownStage(
                "OperatorPrepared condition with no recorded address".into(),
            )),
        },
        "CommonApplied" => Ok(Stage::CommonApplied),
        "ControlConfigured" => match report.control_plane.clone() {
            Some(server_url) => Ok(Stage::ControlConfigured(server_url)),
            None => Err(Error::UnknownStage(
                "ControlConfigured condition with no recorded server".into(),
            )),
        },
        "WorkersJoined" => Ok(Stage::WorkersJoined(report.joined_workers.unwrap_or(0))),
        "MembersReady" => Ok(Stage::MembersReady(report.ready_members.unwrap_or(0))),
        "CreationFailed" => Ok(Stage::CreationFailed(last.message.clone())),
        other => Err(Error::UnknownStage(format!(
            "Unable to determine condition type: {}",
            other
        ))),
    }
}

/// The three invocable links of the deployment chain. Each one declares the
/// link that must have completed before it may run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChainStage {
    Provision,
    PrepareOperator,
    Configure,
}

impl ChainStage {
    pub fn requires(&self) -> Option<ChainStage> {
        match self {
            ChainStage::Provision => None,
            ChainStage::PrepareOperator => Some(ChainStage::Provision),
            ChainStage::Configure => Some(ChainStage::PrepareOperator),
        }
    }
}

impl std::fmt::Display for ChainStage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ChainStage::Provision => "provision",
            ChainStage::PrepareOperator => "prepare",
            ChainStage::Configure => "configure",
        };
        write!(f, "{}", name)
    }
}

impl RunReport {
    fn completed(&self, stage: ChainStage) -> bool {
        match stage {
            ChainStage::Provision => self.outputs.is_some(),
            ChainStage::PrepareOperator => self.operator.is_some(),
            ChainStage::Configure => self.ready_members.is_some(),
        }
    }
}

pub fn enforce_ordering(report: &RunReport, stage: ChainStage) -> Result<(), Error> {
    if let Some(required) = stage.requires() {
        if !report.completed(required) {
            return Err(Error::OrderingViolation(format!(
                "{} requires {} to have completed first",
                stage, required
            )));
        }
    }
    Ok(())
}

/// Where a chain invocation keeps its working files: the provisioning state
/// and the run report.
#[derive(Clone, Debug)]
pub struct ChainPaths {
    pub state: PathBuf,
    pub report: PathBuf,
}

pub async fn run_provision(
    config: &ClusterConfig,
    provider: &dyn ComputeProvider,
    paths: &ChainPaths,
) -> Result<ProvisionOutputs, Error> {
    let report = RunReport::load(&paths.report)?;
    enforce_ordering(&report, ChainStage::Provision)?;
    if report.conditions.is_empty() {
        update_status(&paths.report, &config.name, &Stage::RunStarted)?;
    }

    info!("Provisioning cluster {}", config.name);
    let provisioner = Provisioner::new(provider, paths.state.clone());
    let outputs = match provisioner.apply(&config.name, &config.topology).await {
        Ok(outputs) => outputs,
        Err(e) => {
            record_failure(&paths.report, &config.name, &e);
            return Err(e);
        }
    };
    update_status(
        &paths.report,
        &config.name,
        &Stage::Provisioned(outputs.clone()),
    )?;
    Ok(outputs)
}

/// Failure anywhere in the link, the ordering gate included, lands in the
/// report as a failed condition before it propagates.
pub async fn run_prepare(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    paths: &ChainPaths,
) -> Result<String, Error> {
    match prepare_link(config, shell, paths).await {
        Ok(address) => {
            update_status(
                &paths.report,
                &config.name,
                &Stage::OperatorPrepared(address.clone()),
            )?;
            Ok(address)
        }
        Err(e) => {
            record_failure(&paths.report, &config.name, &e);
            Err(e)
        }
    }
}

async fn prepare_link(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    paths: &ChainPaths,
) -> Result<String, Error> {
    let report = RunReport::load(&paths.report)?;
    enforce_ordering(&report, ChainStage::PrepareOperator)?;
    let outputs = match report.outputs.clone() {
        Some(outputs) => outputs,
        None => {
            return Err(Error::UnknownStage(
                "report has no provisioned outputs".into(),
            ))
        }
    };
    let operator = match outputs.operator() {
        Some(node) => node.clone(),
        None => {
            return Err(Error::InvalidTopology(
                "no operator node in provisioned outputs".into(),
            ))
        }
    };

    info!("Preparing operator node {}", operator.name);
    prepare_operator(config, shell, &outputs, &operator).await?;
    Ok(operator.address)
}

/// Stages the run artifacts on the operator node: the rendered inventory,
/// the cluster declaration, and the access credential the node uses to reach
/// the private members.
async fn prepare_operator(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    outputs: &ProvisionOutputs,
    operator: &Node,
) -> Result<(), Error> {
    wait_for_reachable(shell, operator, &config.readiness).await?;

    let dir = config.artifact_dir.trim_end_matches('/');
    run_checked(
        shell,
        &operator.address,
        &format!("sudo mkdir -p {} && sudo chown \"$(whoami)\" {}", dir, dir),
    )
    .await?;

    let inventory = Inventory::from_outputs(outputs);
    shell
        .push(
            &operator.address,
            inventory.render().as_bytes(),
            &format!("{}/inventory.ini", dir),
        )
        .await?;

    let declaration = serde_json::to_vec_pretty(config)?;
    shell
        .push(
            &operator.address,
            &declaration,
            &format!("{}/cluster.json", dir),
        )
        .await?;

    let key = std::fs::read(&config.ssh.key_path)?;
    let key_path = format!("{}/access.key", dir);
    shell.push(&operator.address, &key, &key_path).await?;
    run_checked(
        shell,
        &operator.address,
        &format!("chmod 600 {}", key_path),
    )
    .await?;

    Ok(())
}

/// Fresh instances accept connections noticeably later than they exist, so
/// the first contact polls within the readiness budget.
async fn wait_for_reachable(
    shell: &dyn RemoteShell,
    node: &Node,
    readiness: &ReadinessPolicy,
) -> Result<(), Error> {
    for attempt in 1..=readiness.attempts {
        match shell.exec(&node.address, "echo ready").await {
            Ok(output) if output.success() => return Ok(()),
            Ok(_) => debug!("{} responded abnormally, attempt {}", node.name, attempt),
            Err(Error::UnableToConnect { .. }) => {
                debug!("{} not reachable yet, attempt {}", node.name, attempt);
            }
            Err(e) => return Err(e),
        };
        if attempt < readiness.attempts {
            tokio::time::sleep(readiness.interval()).await;
        }
    }
    Err(Error::ResourceNotReady)
}

pub async fn run_configure(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    paths: &ChainPaths,
) -> Result<u32, Error> {
    match configure_link(config, shell, paths).await {
        Ok(ready) => Ok(ready),
        Err(e) => {
            record_failure(&paths.report, &config.name, &e);
            Err(e)
        }
    }
}

async fn configure_link(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    paths: &ChainPaths,
) -> Result<u32, Error> {
    let report = RunReport::load(&paths.report)?;
    enforce_ordering(&report, ChainStage::Configure)?;
    let outputs = match report.outputs.clone() {
        Some(outputs) => outputs,
        None => {
            return Err(Error::UnknownStage(
                "report has no provisioned outputs".into(),
            ))
        }
    };
    let operator = match outputs.operator() {
        Some(node) => node.address.clone(),
        None => {
            return Err(Error::InvalidTopology(
                "no operator node in provisioned outputs".into(),
            ))
        }
    };

    // Built fresh from the recorded outputs on every run; nothing edits an
    // inventory in place.
    let inventory = Inventory::from_outputs(&outputs);

    let scoped;
    let shell: &dyn RemoteShell = if config.ssh.jump_via_operator {
        scoped = shell.with_jump(&operator);
        scoped.as_ref()
    } else {
        shell
    };

    configure_members(config, shell, &inventory, paths).await
}

/// The four configuration stages in their only legal order. Each stage's
/// typed output feeds the next one directly, so a worker join cannot start
/// before the control stage has produced complete join material.
async fn configure_members(
    config: &ClusterConfig,
    shell: &dyn RemoteShell,
    inventory: &Inventory,
    paths: &ChainPaths,
) -> Result<u32, Error> {
    let control = match inventory.group("control").and_then(|g| g.hosts.first()) {
        Some(node) => node.clone(),
        None => {
            return Err(Error::InvalidTopology(
                "inventory has no control node".into(),
            ))
        }
    };
    let workers: Vec<&Node> = inventory
        .group("workers")
        .map(|group| group.hosts.iter().collect())
        .unwrap_or_default();

    let mut common = CommonStage::new(shell, inventory);
    common.run().await?;
    update_status(&paths.report, &config.name, &Stage::CommonApplied)?;

    let mut control_stage = ControlStage::new(
        shell,
        &control,
        &config.installer,
        &config.readiness,
        config.topology.ingress.api_port,
    );
    let join = control_stage.run().await?;
    update_status(
        &paths.report,
        &config.name,
        &Stage::ControlConfigured(join.server_url.clone()),
    )?;

    let mut worker_stage = WorkerStage::new(shell, workers, &config.installer, Some(join));
    let joined = worker_stage.run().await?;
    update_status(&paths.report, &config.name, &Stage::WorkersJoined(joined))?;

    let expected = inventory.hosts().len() as u32;
    let mut verify_stage = VerifyStage::new(shell, &control, expected, &config.readiness);
    let ready = verify_stage.run().await?;
    update_status(&paths.report, &config.name, &Stage::MembersReady(ready))?;

    info!("Bootstrap Complete!");
    Ok(ready)
}

/// All three links back to back, as the CI pipeline runs them.
pub async fn run_chain(
    config: &ClusterConfig,
    provider: &dyn ComputeProvider,
    shell: &dyn RemoteShell,
    paths: &ChainPaths,
) -> Result<u32, Error> {
    run_provision(config, provider, paths).await?;
    run_prepare(config, shell, paths).await?;
    run_configure(config, shell, paths).await
}

fn record_failure(path: &Path, cluster: &str, error: &Error) {
    let reason = format!("{}", error);
    if let Err(e) = update_status(path, cluster, &Stage::CreationFailed(reason)) {
        error!("Unable to record failure condition: {:?}", e);
    };
}
