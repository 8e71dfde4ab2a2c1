use std::path::PathBuf;

use alloy_primitives::Address;
use serde_json::Value;

/// Errors surfaced by the storage backends and the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("contract {address} on chain {chain_id} is already being verified")]
    AlreadyBeingVerified { chain_id: u64, address: Address },
    #[error(
        "contract {address} on chain {chain_id} is already stored at equal or better \
         quality; a partial match is not stored over it"
    )]
    PartialAlreadyExists { chain_id: u64, address: Address },
    #[error("match for {address} on chain {chain_id} carries no storable status")]
    UnknownMatchStatus { chain_id: u64, address: Address },
}

/// Errors surfaced by compiler provisioning and execution.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("platform is not supported for native {family} binaries")]
    UnsupportedPlatform { family: &'static str },
    #[error("no published release at {url}")]
    ReleaseNotFound { url: String },
    #[error("download of {url} failed after {attempts} attempts: {reason}")]
    DownloadFailed {
        url: String,
        attempts: usize,
        reason: String,
    },
    #[error("compiler at {path} failed its version probe (expected {expected})")]
    ValidationFailed { path: PathBuf, expected: String },
    #[error("no scripted-engine runner available: {0}")]
    EngineUnavailable(String),
    #[error("compiler reported {} error(s)", errors.len())]
    CompilerError { errors: Vec<Value> },
    #[error("compiler output exceeded the {limit}-byte ceiling")]
    OutputTooLarge { limit: usize },
    #[error("compiler produced invalid output: {0}")]
    InvalidOutput(String),
}
