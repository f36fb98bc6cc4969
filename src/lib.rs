pub mod chain;
pub mod cluster;
pub mod inventory;
pub mod orchestrate;
pub mod provision;
pub mod transport;
