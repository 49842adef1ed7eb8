pub mod attestation;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod transport;
pub mod workflow;

#[cfg(test)]
mod mock;
