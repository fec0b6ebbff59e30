mod error;
pub use error::{Error, Outcome, Result, SoftFailure};

pub mod config;
pub mod ini;
pub mod naming;
pub mod profile;

pub mod marker;
pub mod selection;
pub mod store;

pub mod command;
pub mod terminal;

pub mod aws_gateway;
pub mod gateway;

pub mod orchestrator;
pub mod scheduler;

pub mod cmd;

#[cfg(test)]
pub(crate) mod testing;
