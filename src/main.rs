use std::path::PathBuf;

use clap::{Args, Parser};

use bootman::chain::{self, ChainPaths, RunReport};
use bootman::cluster::ClusterConfig;
use bootman::transport::SshShell;

#[derive(Parser)]
#[command(name = "bootman")]
#[command(bin_name = "bootman")]
enum BootmanCli {
    Provision(StageArgs),
    Prepare(StageArgs),
    Configure(StageArgs),
    Run(StageArgs),
    Status(ReportArgs),
}

#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct StageArgs {
    #[arg(short, long)]
    config: PathBuf,
    #[arg(short, long, default_value = "bootman.state.json")]
    state: PathBuf,
    #[arg(short, long, default_value = "bootman.report.json")]
    report: PathBuf,
}

impl StageArgs {
    fn paths(&self) -> ChainPaths {
        ChainPaths {
            state: self.state.clone(),
            report: self.report.clone(),
        }
    }
}

#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct ReportArgs {
    #[arg(short, long, default_value = "bootman.report.json")]
    report: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    match BootmanCli::parse() {
        BootmanCli::Provision(args) => {
            let config = ClusterConfig::load(&args.config)?;
            let provider = config.provider.build();
            chain::run_provision(&config, &provider, &args.paths()).await?;
        }
        BootmanCli::Prepare(args) => {
            let config = ClusterConfig::load(&args.config)?;
            let shell = SshShell::new(config.ssh.clone(), config.topology.ingress.ssh_port);
            chain::run_prepare(&config, &shell, &args.paths()).await?;
        }
        BootmanCli::Configure(args) => {
            let config = ClusterConfig::load(&args.config)?;
            let shell = SshShell::new(config.ssh.clone(), config.topology.ingress.ssh_port);
            chain::run_configure(&config, &shell, &args.paths()).await?;
        }
        BootmanCli::Run(args) => {
            let config = ClusterConfig::load(&args.config)?;
            let provider = config.provider.build();
            let shell = SshShell::new(config.ssh.clone(), config.topology.ingress.ssh_port);
            chain::run_chain(&config, &provider, &shell, &args.paths()).await?;
        }
        BootmanCli::Status(args) => {
            let report = RunReport::load(&args.report)?;
            let stage = chain::determine_stage(&report)?;
            println!("{}: {}", stage, stage.message());
        }
    };

    Ok(())
}
