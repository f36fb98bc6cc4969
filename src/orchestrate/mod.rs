mod common;
mod control;
mod install;
mod utils;
mod verify;
mod worker;

pub use common::CommonStage;
pub use control::ControlStage;
pub use install::{InstallerSpec, INSTALL_PATH, KUBECONFIG_PATH, TOKEN_PATH};
pub use utils::run_checked;
pub use verify::VerifyStage;
pub use worker::WorkerStage;
