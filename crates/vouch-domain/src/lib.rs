#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod code;
pub mod model;
pub mod records;

pub use code::{checksum_address, CodeDigest};
pub use model::{
    CompiledContract, Create2Args, DeploymentContext, Language, Match, MatchLevel, MatchQuality,
    RepositoryTag, Transformation, TransformationKind, TransformationValues, VerdictError,
    VerificationStatus,
};
pub use records::{
    CodeRecord, CompiledContractRecord, ContractDeploymentRecord, ContractRecord,
    VerifiedContractRecord,
};
