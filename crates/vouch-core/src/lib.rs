#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! The vouch engine: compiler provisioning, the filesystem repository, the
//! relational backend, and the verification coordinator tying them together.
//! The HTTP surface, the bytecode matcher, and the chain RPC client are
//! external collaborators; this crate consumes their results.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod provision;
pub mod relational;
pub mod repository;

pub use config::{default_compiler_dir, VouchConfig, COMPILER_DIR_ENV};
pub use coordinator::{
    ChainApi, CreatorTx, NoChain, PrewarmSummary, VerificationCoordinator, VerificationOutcome,
};
pub use error::{ProvisionError, VerificationError};
pub use provision::{
    JsWorkerPool, Platform, SolcProvisioner, VyperProvisioner, MAX_COMPILER_OUTPUT,
};
pub use relational::RelationalStore;
pub use repository::{
    contract_dir, generate_absolute_file_path, sanitize_source_path, IpfsMirror, Page,
    RepositoryStore, RetrievedFile,
};
