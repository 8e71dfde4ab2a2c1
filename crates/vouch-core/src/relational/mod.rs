//! Relational backend: content-deduplicated tables with "better match"
//! reconciliation across repeated verification attempts.
//!
//! All SQL text lives in this module. Rows are never deleted; repeated
//! verifications only decide whether one more `verified_contracts` row is
//! worth inserting. Upserts rely on unique constraints (`INSERT OR IGNORE`)
//! instead of multi-statement transactions; a crash mid-sequence can leave
//! orphaned code/contract rows, which are idempotently reusable.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use vouch_domain::{
    CodeDigest, CodeRecord, CompiledContract, CompiledContractRecord, ContractDeploymentRecord,
    ContractRecord, Match, MatchLevel, Transformation, TransformationKind, VerifiedContractRecord,
};

use crate::config::VouchConfig;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS code (
    code_hash        BLOB PRIMARY KEY,
    code_hash_keccak BLOB NOT NULL,
    code             BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS contracts (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    creation_code_hash BLOB NOT NULL REFERENCES code(code_hash),
    runtime_code_hash  BLOB NOT NULL REFERENCES code(code_hash),
    UNIQUE (creation_code_hash, runtime_code_hash)
);
CREATE TABLE IF NOT EXISTS contract_deployments (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id          INTEGER NOT NULL,
    address           BLOB NOT NULL,
    transaction_hash  BLOB NOT NULL,
    block_number      INTEGER,
    transaction_index INTEGER,
    deployer          BLOB,
    contract_id       INTEGER NOT NULL REFERENCES contracts(id),
    UNIQUE (chain_id, address, transaction_hash)
);
CREATE TABLE IF NOT EXISTS compiled_contracts (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    compiler                TEXT NOT NULL,
    version                 TEXT NOT NULL,
    language                TEXT NOT NULL,
    name                    TEXT NOT NULL,
    fully_qualified_name    TEXT NOT NULL,
    compilation_artifacts   TEXT NOT NULL,
    sources                 TEXT NOT NULL,
    compiler_settings       TEXT NOT NULL,
    creation_code_hash      BLOB NOT NULL REFERENCES code(code_hash),
    runtime_code_hash       BLOB NOT NULL REFERENCES code(code_hash),
    creation_code_artifacts TEXT NOT NULL,
    runtime_code_artifacts  TEXT NOT NULL,
    UNIQUE (compiler, language, creation_code_hash, runtime_code_hash)
);
CREATE TABLE IF NOT EXISTS verified_contracts (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    compilation_id           INTEGER NOT NULL REFERENCES compiled_contracts(id),
    contract_id              INTEGER NOT NULL REFERENCES contracts(id),
    creation_match           INTEGER NOT NULL,
    runtime_match            INTEGER NOT NULL,
    creation_transformations TEXT NOT NULL,
    creation_values          TEXT NOT NULL,
    runtime_transformations  TEXT NOT NULL,
    runtime_values           TEXT NOT NULL
);
";

enum PoolState {
    Uninit,
    Ready(Connection),
    Degraded,
}

/// SQL-backed store. The connection is acquired lazily on first use; if that
/// acquisition fails the store logs once and degrades to a no-op for the
/// rest of the process lifetime.
pub struct RelationalStore {
    path: PathBuf,
    state: Mutex<PoolState>,
}

impl RelationalStore {
    #[must_use]
    pub fn new(config: &VouchConfig) -> Self {
        Self {
            path: config.database_path.clone(),
            state: Mutex::new(PoolState::Uninit),
        }
    }

    /// Persist a verification result, merging with whatever is already
    /// recorded for the same on-chain bytecode pair. Returns whether a new
    /// verified-contract row was written.
    ///
    /// A deployment without a creator transaction, or with either bytecode
    /// side missing, is skipped: the relational schema requires the
    /// deployment transaction and the reconciliation comparison needs all
    /// four bytecodes.
    pub fn store_match(&self, contract: &CompiledContract, verified: &Match) -> Result<bool> {
        let Some(tx_hash) = verified.creator_tx_hash else {
            warn!(chain_id = verified.chain_id, address = %verified.address,
                "no creator transaction; skipping relational storage");
            return Ok(false);
        };
        let (Some(onchain_creation), Some(onchain_runtime)) = (
            verified.onchain_creation_bytecode.as_ref(),
            verified.onchain_runtime_bytecode.as_ref(),
        ) else {
            warn!(chain_id = verified.chain_id, address = %verified.address,
                "on-chain bytecode missing; skipping relational storage");
            return Ok(false);
        };
        let (Some(recompiled_creation), Some(recompiled_runtime)) = (
            contract.creation_bytecode.as_ref(),
            contract.runtime_bytecode.as_ref(),
        ) else {
            warn!(chain_id = verified.chain_id, address = %verified.address,
                "recompiled bytecode missing; skipping relational storage");
            return Ok(false);
        };

        self.with_conn(|conn| {
            // Dependency order: code -> contract -> deployment -> compiled
            // contract -> verified contract.
            let onchain_creation_hash = upsert_code(conn, onchain_creation)?;
            let onchain_runtime_hash = upsert_code(conn, onchain_runtime)?;
            let recompiled_creation_hash = upsert_code(conn, recompiled_creation)?;
            let recompiled_runtime_hash = upsert_code(conn, recompiled_runtime)?;
            let contract_id =
                upsert_contract(conn, &onchain_creation_hash, &onchain_runtime_hash)?;

            let existing = existing_verified(conn, contract_id)?;
            if !existing.is_empty() {
                let runtime_better = axis_improved(
                    existing.iter().map(|row| {
                        (row.runtime_match, parse_transformations(&row.runtime_transformations))
                    }),
                    verified.runtime_match,
                );
                let creation_better = axis_improved(
                    existing.iter().map(|row| {
                        (
                            row.creation_match,
                            parse_transformations(&row.creation_transformations),
                        )
                    }),
                    verified.creation_match,
                );
                if !runtime_better && !creation_better {
                    debug!(contract_id, "no axis improves on the stored verification; discarding");
                    return Ok(false);
                }
            }

            upsert_deployment(conn, verified, contract_id, tx_hash.as_slice())?;
            let compilation_id = upsert_compiled_contract(
                conn,
                contract,
                &recompiled_creation_hash,
                &recompiled_runtime_hash,
            )?;
            // The same reconciliation running twice must not produce a
            // logically duplicate row.
            if existing.iter().any(|row| row.compilation_id == compilation_id) {
                debug!(contract_id, compilation_id,
                    "compilation already recorded for this bytecode pair");
                return Ok(false);
            }
            insert_verified(conn, compilation_id, contract_id, verified)?;
            debug!(contract_id, compilation_id, "recorded verified contract");
            Ok(true)
        })
        .map(|written| written.unwrap_or(false))
    }

    /// Verified rows recorded for an on-chain bytecode pair, if any.
    pub fn verified_for_bytecode_pair(
        &self,
        onchain_creation: &[u8],
        onchain_runtime: &[u8],
    ) -> Result<Vec<VerifiedContractRecord>> {
        let creation_hash = CodeDigest::of(onchain_creation).sha256.to_vec();
        let runtime_hash = CodeDigest::of(onchain_runtime).sha256.to_vec();
        match self.find_contract(&creation_hash, &runtime_hash)? {
            Some(contract) => {
                let rows =
                    self.with_conn(|conn| existing_verified(conn, contract.id))?;
                Ok(rows.unwrap_or_default())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Code blob by primary content hash.
    pub fn find_code(&self, code_hash: &[u8]) -> Result<Option<CodeRecord>> {
        let row = self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT code_hash, code_hash_keccak, code FROM code WHERE code_hash = ?1",
                    params![code_hash],
                    |row| {
                        Ok(CodeRecord {
                            code_hash: row.get(0)?,
                            code_hash_keccak: row.get(1)?,
                            code: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })?;
        Ok(row.flatten())
    }

    /// Contract row by its (creation, runtime) hash pair.
    pub fn find_contract(
        &self,
        creation_hash: &[u8],
        runtime_hash: &[u8],
    ) -> Result<Option<ContractRecord>> {
        let row = self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, creation_code_hash, runtime_code_hash FROM contracts \
                     WHERE creation_code_hash = ?1 AND runtime_code_hash = ?2",
                    params![creation_hash, runtime_hash],
                    |row| {
                        Ok(ContractRecord {
                            id: row.get(0)?,
                            creation_code_hash: row.get(1)?,
                            runtime_code_hash: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })?;
        Ok(row.flatten())
    }

    /// Deployment row by its unique (chain, address, transaction) triple.
    pub fn find_deployment(
        &self,
        chain_id: u64,
        address: &[u8],
        transaction_hash: &[u8],
    ) -> Result<Option<ContractDeploymentRecord>> {
        let row = self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, chain_id, address, transaction_hash, block_number, \
                            transaction_index, deployer, contract_id \
                     FROM contract_deployments \
                     WHERE chain_id = ?1 AND address = ?2 AND transaction_hash = ?3",
                    params![
                        i64::try_from(chain_id).unwrap_or(i64::MAX),
                        address,
                        transaction_hash
                    ],
                    |row| {
                        Ok(ContractDeploymentRecord {
                            id: row.get(0)?,
                            chain_id: u64::try_from(row.get::<_, i64>(1)?).unwrap_or_default(),
                            address: row.get(2)?,
                            transaction_hash: row.get(3)?,
                            block_number: row.get(4)?,
                            transaction_index: row.get(5)?,
                            deployer: row.get(6)?,
                            contract_id: row.get(7)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })?;
        Ok(row.flatten())
    }

    /// Compilation row by id.
    pub fn find_compilation(&self, id: i64) -> Result<Option<CompiledContractRecord>> {
        let row = self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, compiler, version, language, name, fully_qualified_name, \
                            compilation_artifacts, sources, compiler_settings, \
                            creation_code_hash, runtime_code_hash, \
                            creation_code_artifacts, runtime_code_artifacts \
                     FROM compiled_contracts WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(CompiledContractRecord {
                            id: row.get(0)?,
                            compiler: row.get(1)?,
                            version: row.get(2)?,
                            language: row.get(3)?,
                            name: row.get(4)?,
                            fully_qualified_name: row.get(5)?,
                            compilation_artifacts: parse_json_column(row.get(6)?),
                            sources: parse_json_column(row.get(7)?),
                            compiler_settings: parse_json_column(row.get(8)?),
                            creation_code_hash: row.get(9)?,
                            runtime_code_hash: row.get(10)?,
                            creation_code_artifacts: parse_json_column(row.get(11)?),
                            runtime_code_artifacts: parse_json_column(row.get(12)?),
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })?;
        Ok(row.flatten())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<Option<T>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("relational store lock poisoned"))?;
        if matches!(*state, PoolState::Uninit) {
            match open_database(&self.path) {
                Ok(conn) => *state = PoolState::Ready(conn),
                Err(err) => {
                    warn!(path = %self.path.display(), %err,
                        "relational backend unavailable; degrading to a no-op");
                    *state = PoolState::Degraded;
                }
            }
        }
        match &mut *state {
            PoolState::Ready(conn) => f(conn).map(Some),
            PoolState::Degraded => Ok(None),
            PoolState::Uninit => unreachable!("pool state initialized above"),
        }
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> i64 {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(count)
        })
        .expect("count query")
        .unwrap_or(-1)
    }
}

fn open_database(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(10))
        .context("failed to set database busy timeout")?;
    conn.execute_batch(SCHEMA)
        .context("failed to initialize relational schema")?;
    Ok(conn)
}

/// Insert-or-ignore a code blob keyed by its content hash; returns the
/// primary key.
fn upsert_code(conn: &Connection, code: &[u8]) -> Result<Vec<u8>> {
    let digest = CodeDigest::of(code);
    conn.execute(
        "INSERT OR IGNORE INTO code(code_hash, code_hash_keccak, code) VALUES (?1, ?2, ?3)",
        params![digest.sha256.to_vec(), digest.keccak256.to_vec(), code],
    )?;
    Ok(digest.sha256.to_vec())
}

fn upsert_contract(conn: &Connection, creation_hash: &[u8], runtime_hash: &[u8]) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO contracts(creation_code_hash, runtime_code_hash) VALUES (?1, ?2)",
        params![creation_hash, runtime_hash],
    )?;
    let id = conn.query_row(
        "SELECT id FROM contracts WHERE creation_code_hash = ?1 AND runtime_code_hash = ?2",
        params![creation_hash, runtime_hash],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn upsert_deployment(
    conn: &Connection,
    verified: &Match,
    contract_id: i64,
    tx_hash: &[u8],
) -> Result<i64> {
    let deployment = verified.deployment.clone().unwrap_or_default();
    conn.execute(
        "INSERT OR IGNORE INTO contract_deployments \
         (chain_id, address, transaction_hash, block_number, transaction_index, deployer, contract_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            i64::try_from(verified.chain_id).unwrap_or(i64::MAX),
            verified.address.as_slice(),
            tx_hash,
            deployment.block_number.map(|n| i64::try_from(n).unwrap_or(i64::MAX)),
            deployment
                .transaction_index
                .map(|n| i64::try_from(n).unwrap_or(i64::MAX)),
            deployment.deployer.map(|addr| addr.as_slice().to_vec()),
            contract_id,
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM contract_deployments \
         WHERE chain_id = ?1 AND address = ?2 AND transaction_hash = ?3",
        params![
            i64::try_from(verified.chain_id).unwrap_or(i64::MAX),
            verified.address.as_slice(),
            tx_hash,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn upsert_compiled_contract(
    conn: &Connection,
    contract: &CompiledContract,
    creation_hash: &[u8],
    runtime_hash: &[u8],
) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO compiled_contracts \
         (compiler, version, language, name, fully_qualified_name, compilation_artifacts, \
          sources, compiler_settings, creation_code_hash, runtime_code_hash, \
          creation_code_artifacts, runtime_code_artifacts) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            contract.compiler,
            contract.version,
            contract.language.as_str(),
            contract.name,
            contract.fully_qualified_name(),
            contract.compilation_artifacts.to_string(),
            serde_json::to_string(&contract.sources)?,
            contract.compiler_settings.to_string(),
            creation_hash,
            runtime_hash,
            contract.creation_code_artifacts.to_string(),
            contract.runtime_code_artifacts.to_string(),
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM compiled_contracts \
         WHERE compiler = ?1 AND language = ?2 AND creation_code_hash = ?3 AND runtime_code_hash = ?4",
        params![
            contract.compiler,
            contract.language.as_str(),
            creation_hash,
            runtime_hash,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_verified(
    conn: &Connection,
    compilation_id: i64,
    contract_id: i64,
    verified: &Match,
) -> Result<()> {
    conn.execute(
        "INSERT INTO verified_contracts \
         (compilation_id, contract_id, creation_match, runtime_match, \
          creation_transformations, creation_values, runtime_transformations, runtime_values) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            compilation_id,
            contract_id,
            axis_matched(verified.creation_match),
            axis_matched(verified.runtime_match),
            serde_json::to_string(&verified.creation_transformations)?,
            serde_json::to_string(&verified.creation_transformation_values)?,
            serde_json::to_string(&verified.runtime_transformations)?,
            serde_json::to_string(&verified.runtime_transformation_values)?,
        ],
    )?;
    Ok(())
}

fn existing_verified(conn: &Connection, contract_id: i64) -> Result<Vec<VerifiedContractRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, compilation_id, creation_match, runtime_match, \
                creation_transformations, creation_values, runtime_transformations, runtime_values \
         FROM verified_contracts WHERE contract_id = ?1",
    )?;
    let mut rows = stmt.query(params![contract_id])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(VerifiedContractRecord {
            id: row.get(0)?,
            compilation_id: row.get(1)?,
            contract_id,
            creation_match: row.get::<_, i64>(2)? != 0,
            runtime_match: row.get::<_, i64>(3)? != 0,
            creation_transformations: parse_json_column(row.get::<_, String>(4)?),
            creation_values: parse_json_column(row.get::<_, String>(5)?),
            runtime_transformations: parse_json_column(row.get::<_, String>(6)?),
            runtime_values: parse_json_column(row.get::<_, String>(7)?),
        });
    }
    Ok(records)
}

fn parse_json_column(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
}

fn parse_transformations(value: &serde_json::Value) -> Vec<Transformation> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn axis_matched(level: Option<MatchLevel>) -> bool {
    matches!(level, Some(MatchLevel::Perfect | MatchLevel::Partial))
}

/// One axis improves when an existing row only matched by masking auxdata
/// and the new match needed no masking at all, or when an existing row
/// failed the axis outright and the new result matches.
fn axis_improved(
    existing: impl Iterator<Item = (bool, Vec<Transformation>)>,
    new_level: Option<MatchLevel>,
) -> bool {
    let new_matched = axis_matched(new_level);
    let new_perfect = new_level == Some(MatchLevel::Perfect);
    let mut any_auxdata = false;
    let mut any_unmatched = false;
    for (matched, transformations) in existing {
        if !matched {
            any_unmatched = true;
        }
        if transformations
            .iter()
            .any(|t| t.kind == TransformationKind::Auxdata)
        {
            any_auxdata = true;
        }
    }
    (any_auxdata && new_perfect) || (any_unmatched && new_matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use serde_json::json;
    use std::collections::BTreeMap;
    use vouch_domain::{Language, TransformationValues};

    fn test_store(temp: &tempfile::TempDir) -> RelationalStore {
        RelationalStore::new(&test_config(temp))
    }

    fn test_config(temp: &tempfile::TempDir) -> VouchConfig {
        VouchConfig {
            repository_root: temp.path().join("repo"),
            repository_version: env!("CARGO_PKG_VERSION").to_string(),
            database_path: temp.path().join("repo").join("vouch.sqlite"),
            compiler_dir: temp.path().join("compilers"),
            solc_base_url: url::Url::parse("http://127.0.0.1:9/").expect("url"),
            vyper_base_url: url::Url::parse("http://127.0.0.1:9/").expect("url"),
            ipfs_api: None,
        }
    }

    fn sample_contract(runtime_bytecode: &[u8]) -> CompiledContract {
        let mut sources = BTreeMap::new();
        sources.insert("Token.sol".to_string(), "contract Token {}\n".to_string());
        CompiledContract {
            compiler: "solc".to_string(),
            version: "0.8.17+commit.8df45f5f".to_string(),
            language: Language::Solidity,
            name: "Token".to_string(),
            compiled_path: "Token.sol".to_string(),
            sources,
            metadata: json!({}),
            compiler_settings: json!({}),
            compilation_artifacts: json!({ "abi": [] }),
            creation_bytecode: Some(vec![0x60, 0x01].into()),
            runtime_bytecode: Some(runtime_bytecode.to_vec().into()),
            creation_code_artifacts: json!({}),
            runtime_code_artifacts: json!({}),
        }
    }

    fn sample_match(runtime: Option<MatchLevel>) -> Match {
        Match {
            address: "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"
                .parse()
                .expect("address"),
            chain_id: 1,
            runtime_match: runtime,
            creation_match: Some(MatchLevel::Partial),
            runtime_transformations: Vec::new(),
            runtime_transformation_values: TransformationValues::default(),
            creation_transformations: Vec::new(),
            creation_transformation_values: TransformationValues::default(),
            library_map: None,
            immutable_references: None,
            abi_encoded_constructor_arguments: None,
            creator_tx_hash: Some(B256::repeat_byte(0xab)),
            create2_args: None,
            onchain_runtime_bytecode: Some(vec![0xfe, 0x01].into()),
            onchain_creation_bytecode: Some(vec![0xfe, 0x02].into()),
            deployment: None,
        }
    }

    #[test]
    fn code_rows_deduplicate_by_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        store
            .with_conn(|conn| {
                let first = upsert_code(conn, b"same bytes")?;
                let second = upsert_code(conn, b"same bytes")?;
                let third = upsert_code(conn, b"other bytes")?;
                assert_eq!(first, second);
                assert_ne!(first, third);
                Ok(())
            })
            .expect("with_conn")
            .expect("connection available");
        assert_eq!(store.count_rows("code"), 2);
    }

    #[test]
    fn first_sight_populates_every_table_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let written = store
            .store_match(&sample_contract(&[0x60, 0x02]), &sample_match(Some(MatchLevel::Partial)))
            .expect("store");
        assert!(written);
        assert_eq!(store.count_rows("code"), 4);
        assert_eq!(store.count_rows("contracts"), 1);
        assert_eq!(store.count_rows("contract_deployments"), 1);
        assert_eq!(store.count_rows("compiled_contracts"), 1);
        assert_eq!(store.count_rows("verified_contracts"), 1);
    }

    #[test]
    fn missing_creator_transaction_disqualifies_relational_storage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let mut verified = sample_match(Some(MatchLevel::Partial));
        verified.creator_tx_hash = None;
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &verified)
            .expect("skipped, not failed");
        assert_eq!(store.count_rows("verified_contracts"), 0);
        assert_eq!(store.count_rows("code"), 0);
    }

    #[test]
    fn false_to_true_runtime_match_is_recorded_as_better() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        // First sight: runtime did not match, only creation (partial).
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &sample_match(None))
            .expect("first");
        assert_eq!(store.count_rows("verified_contracts"), 1);
        // Second sight with a different compilation whose runtime matches.
        store
            .store_match(
                &sample_contract(&[0x60, 0x03]),
                &sample_match(Some(MatchLevel::Partial)),
            )
            .expect("second");
        assert_eq!(store.count_rows("verified_contracts"), 2);
    }

    #[test]
    fn unimproved_repeat_sight_is_discarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &sample_match(None))
            .expect("first");
        // Still no runtime match: nothing improves, nothing is written.
        let written = store
            .store_match(&sample_contract(&[0x60, 0x03]), &sample_match(None))
            .expect("second");
        assert!(!written);
        assert_eq!(store.count_rows("verified_contracts"), 1);
        assert_eq!(store.count_rows("compiled_contracts"), 1);
    }

    #[test]
    fn auxdata_masked_match_improves_only_to_perfect() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let mut first = sample_match(Some(MatchLevel::Partial));
        first.runtime_transformations = vec![Transformation::new(
            TransformationKind::Auxdata,
            1234,
            Some("1".to_string()),
        )];
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &first)
            .expect("first");

        // A second partial (still masked) is not better.
        store
            .store_match(&sample_contract(&[0x60, 0x03]), &sample_match(Some(MatchLevel::Partial)))
            .expect("second");
        assert_eq!(store.count_rows("verified_contracts"), 1);

        // A perfect runtime match needed no auxdata masking: quality gain.
        store
            .store_match(
                &sample_contract(&[0x60, 0x04]),
                &sample_match(Some(MatchLevel::Perfect)),
            )
            .expect("third");
        assert_eq!(store.count_rows("verified_contracts"), 2);
    }

    #[test]
    fn duplicate_compilation_guard_prevents_double_insert() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &sample_match(None))
            .expect("first");
        // Same compilation again, with an axis that would count as better:
        // the compiled-contract id is already associated with the pair.
        store
            .store_match(
                &sample_contract(&[0x60, 0x02]),
                &sample_match(Some(MatchLevel::Perfect)),
            )
            .expect("repeat");
        assert_eq!(store.count_rows("verified_contracts"), 1);
    }

    #[test]
    fn verified_rows_are_queryable_by_bytecode_pair() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let verified = sample_match(Some(MatchLevel::Partial));
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &verified)
            .expect("store");
        let rows = store
            .verified_for_bytecode_pair(&[0xfe, 0x02], &[0xfe, 0x01])
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].runtime_match);
        let absent = store
            .verified_for_bytecode_pair(&[0x00], &[0x00])
            .expect("query");
        assert!(absent.is_empty());
    }

    #[test]
    fn typed_rows_read_back_what_store_match_wrote() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let verified = sample_match(Some(MatchLevel::Partial));
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &verified)
            .expect("store");

        let onchain_runtime_hash = CodeDigest::of(&[0xfe, 0x01]).sha256.to_vec();
        let code = store
            .find_code(&onchain_runtime_hash)
            .expect("query")
            .expect("code row");
        assert_eq!(code.code, vec![0xfe, 0x01]);
        assert_eq!(
            code.code_hash_keccak,
            CodeDigest::of(&[0xfe, 0x01]).keccak256.to_vec()
        );

        let creation_hash = CodeDigest::of(&[0xfe, 0x02]).sha256.to_vec();
        let contract = store
            .find_contract(&creation_hash, &onchain_runtime_hash)
            .expect("query")
            .expect("contract row");

        let deployment = store
            .find_deployment(
                verified.chain_id,
                verified.address.as_slice(),
                verified.creator_tx_hash.expect("tx hash").as_slice(),
            )
            .expect("query")
            .expect("deployment row");
        assert_eq!(deployment.contract_id, contract.id);
        assert_eq!(deployment.chain_id, 1);

        let rows = store
            .verified_for_bytecode_pair(&[0xfe, 0x02], &[0xfe, 0x01])
            .expect("query");
        let compilation = store
            .find_compilation(rows[0].compilation_id)
            .expect("query")
            .expect("compilation row");
        assert_eq!(compilation.compiler, "solc");
        assert_eq!(compilation.fully_qualified_name, "Token.sol:Token");
    }

    #[test]
    fn unavailable_database_degrades_to_a_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Make the database path unusable: its parent is a regular file.
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("blocker file");
        let mut config = test_config(&temp);
        config.database_path = blocker.join("vouch.sqlite");
        let store = RelationalStore::new(&config);
        // Both calls succeed without writing anything, and without retrying
        // initialization after the first failure.
        store
            .store_match(&sample_contract(&[0x60, 0x02]), &sample_match(None))
            .expect("degraded no-op");
        store
            .store_match(&sample_contract(&[0x60, 0x03]), &sample_match(None))
            .expect("still a no-op");
        assert!(matches!(
            *store.state.lock().expect("lock"),
            PoolState::Degraded
        ));
    }
}
