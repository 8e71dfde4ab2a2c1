//! Verdicts, transformations, and the compiled-contract input consumed by
//! the storage backends.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How closely one bytecode axis (runtime or creation) matched.
///
/// `ExtraFileInputBug` is a sentinel for a known class of false mismatch
/// caused by extraneous compiler inputs; it is reported back to the caller
/// and never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchLevel {
    Partial,
    Perfect,
    ExtraFileInputBug,
}

impl MatchLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Perfect => "perfect",
            Self::ExtraFileInputBug => "extra-file-input-bug",
        }
    }
}

impl TryFrom<&str> for MatchLevel {
    type Error = VerdictError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "partial" => Ok(Self::Partial),
            "perfect" => Ok(Self::Perfect),
            "extra-file-input-bug" => Ok(Self::ExtraFileInputBug),
            other => Err(VerdictError::UnknownMatchStatus(other.to_string())),
        }
    }
}

/// Storage quality of a verified contract in the filesystem repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchQuality {
    Full,
    Partial,
}

impl MatchQuality {
    /// Directory segment under `contracts/` for this quality.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Full => "full_match",
            Self::Partial => "partial_match",
        }
    }
}

/// Outcome reported to the caller after a store operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Full,
    Partial,
    ExtraFileInputBug,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerdictError {
    #[error("unknown match status '{0}'")]
    UnknownMatchStatus(String),
}

/// A recorded masking operation explaining why recompiled and on-chain
/// bytecode differ despite being the same contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformationKind {
    Library,
    Immutable,
    CallProtection,
    Auxdata,
    ConstructorArguments,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    #[serde(rename = "type")]
    pub kind: TransformationKind,
    pub offset: usize,
    /// Placeholder or slot identifier, when the kind carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Transformation {
    #[must_use]
    pub fn new(kind: TransformationKind, offset: usize, id: Option<String>) -> Self {
        Self { kind, offset, id }
    }
}

/// Concrete values substituted by the transformations of one axis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationValues {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub immutables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cbor_auxdata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_protection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_arguments: Option<String>,
}

impl TransformationValues {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
            && self.immutables.is_empty()
            && self.cbor_auxdata.is_empty()
            && self.call_protection.is_none()
            && self.constructor_arguments.is_none()
    }
}

/// CREATE2 deployment arguments, when the contract was deployed through a
/// deterministic deployer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Create2Args {
    pub deployer_address: Address,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_args: Option<Value>,
}

/// On-chain context of the deployment transaction, when known.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<u64>,
}

/// The externally computed comparison between recompiled and on-chain
/// bytecode for one deployment. The engine never re-derives any of this; it
/// only decides how to persist it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub address: Address,
    pub chain_id: u64,
    pub runtime_match: Option<MatchLevel>,
    pub creation_match: Option<MatchLevel>,
    #[serde(default)]
    pub runtime_transformations: Vec<Transformation>,
    #[serde(default)]
    pub runtime_transformation_values: TransformationValues,
    #[serde(default)]
    pub creation_transformations: Vec<Transformation>,
    #[serde(default)]
    pub creation_transformation_values: TransformationValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_map: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_references: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_encoded_constructor_arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create2_args: Option<Create2Args>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onchain_runtime_bytecode: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onchain_creation_bytecode: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentContext>,
}

impl Match {
    /// Storage quality derived from the two axes, or `None` when neither
    /// axis reached at least a partial match.
    #[must_use]
    pub fn quality(&self) -> Option<MatchQuality> {
        let axes = [self.runtime_match, self.creation_match];
        if axes.contains(&Some(MatchLevel::Perfect)) {
            Some(MatchQuality::Full)
        } else if axes.contains(&Some(MatchLevel::Partial)) {
            Some(MatchQuality::Partial)
        } else {
            None
        }
    }

    /// Whether either axis carries the extra-file-input-bug sentinel.
    #[must_use]
    pub fn is_extra_file_input_bug(&self) -> bool {
        self.runtime_match == Some(MatchLevel::ExtraFileInputBug)
            || self.creation_match == Some(MatchLevel::ExtraFileInputBug)
    }
}

/// Source language of a compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    Solidity,
    Vyper,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solidity => "solidity",
            Self::Vyper => "vyper",
        }
    }
}

/// One compilation result handed to the engine by the external matcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledContract {
    /// Compiler family, e.g. `solc`.
    pub compiler: String,
    pub version: String,
    pub language: Language,
    pub name: String,
    /// Source path of the compiled unit within `sources`.
    pub compiled_path: String,
    pub sources: BTreeMap<String, String>,
    /// The compiler's metadata output, persisted verbatim as
    /// `metadata.json`.
    pub metadata: Value,
    pub compiler_settings: Value,
    pub compilation_artifacts: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_bytecode: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_bytecode: Option<Bytes>,
    pub creation_code_artifacts: Value,
    pub runtime_code_artifacts: Value,
}

impl CompiledContract {
    #[must_use]
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.compiled_path, self.name)
    }
}

/// Manifest rewritten on every repository write; downstream consumers use it
/// as a cheap "has anything changed" signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryTag {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub repository_version: String,
}
