//! Typed rows for the relational backend, one struct per table.
//!
//! The SQL that reads and writes these lives entirely in the engine's
//! relational module; everything else passes records around by value.

use serde_json::Value;

/// Row in `code`: an immutable, content-addressed byte blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRecord {
    /// sha256 of `code`, primary key.
    pub code_hash: Vec<u8>,
    /// keccak256 of `code`, kept for external indexing compatibility.
    pub code_hash_keccak: Vec<u8>,
    pub code: Vec<u8>,
}

/// Row in `contracts`: a unique (creation, runtime) bytecode pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractRecord {
    pub id: i64,
    pub creation_code_hash: Vec<u8>,
    pub runtime_code_hash: Vec<u8>,
}

/// Row in `contract_deployments`: one on-chain occurrence of a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractDeploymentRecord {
    pub id: i64,
    pub chain_id: u64,
    pub address: Vec<u8>,
    pub transaction_hash: Vec<u8>,
    pub block_number: Option<i64>,
    pub transaction_index: Option<i64>,
    pub deployer: Option<Vec<u8>>,
    pub contract_id: i64,
}

/// Row in `compiled_contracts`: one deduplicated compilation result.
#[derive(Clone, Debug)]
pub struct CompiledContractRecord {
    pub id: i64,
    pub compiler: String,
    pub version: String,
    pub language: String,
    pub name: String,
    pub fully_qualified_name: String,
    pub compilation_artifacts: Value,
    pub sources: Value,
    pub compiler_settings: Value,
    pub creation_code_hash: Vec<u8>,
    pub runtime_code_hash: Vec<u8>,
    pub creation_code_artifacts: Value,
    pub runtime_code_artifacts: Value,
}

/// Row in `verified_contracts`: the append-only deployment × compilation
/// join carrying the match verdict.
#[derive(Clone, Debug)]
pub struct VerifiedContractRecord {
    pub id: i64,
    pub compilation_id: i64,
    pub contract_id: i64,
    pub creation_match: bool,
    pub runtime_match: bool,
    pub creation_transformations: Value,
    pub creation_values: Value,
    pub runtime_transformations: Value,
    pub runtime_values: Value,
}
