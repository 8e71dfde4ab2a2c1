//! Filesystem repository: a human-browsable tree of verified contracts, one
//! directory per (match quality, chain, address), with an optional IPFS
//! mirror.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use anyhow::{Context, Result};
use tracing::{debug, info};
use vouch_domain::{
    CompiledContract, Match, MatchQuality, RepositoryTag, VerificationStatus,
};

use crate::config::VouchConfig;
use crate::error::VerificationError;

mod mirror;
mod paths;

pub use mirror::IpfsMirror;
pub use paths::{contract_dir, generate_absolute_file_path, sanitize_source_path};

const MANIFEST_FILENAME: &str = "manifest.json";
const SOURCES_DIR: &str = "sources";

/// One file read back out of the repository tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievedFile {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

/// Pagination for address listings.
#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
    pub descending: bool,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 200,
            descending: false,
        }
    }
}

pub struct RepositoryStore {
    root: PathBuf,
    repository_version: String,
    mirror: Option<IpfsMirror>,
}

impl RepositoryStore {
    pub fn new(config: &VouchConfig) -> Result<Self> {
        fs::create_dir_all(&config.repository_root).with_context(|| {
            format!("failed to create {}", config.repository_root.display())
        })?;
        let mirror = config
            .ipfs_api
            .clone()
            .map(IpfsMirror::new)
            .transpose()?;
        Ok(Self {
            root: config.repository_root.clone(),
            repository_version: config.repository_version.clone(),
            mirror,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a verified contract into the tree.
    ///
    /// A perfect match on either axis stores under `full_match` and removes
    /// any previous `partial_match` directory first (promotion). A partial
    /// match refuses to overwrite an existing partial match. A verdict with
    /// no storable status raises `UnknownMatchStatus`, except the
    /// extra-file-input-bug sentinel, which is reported back unmodified.
    pub async fn store_match(
        &self,
        contract: &CompiledContract,
        verified: &Match,
    ) -> Result<VerificationStatus> {
        if verified.is_extra_file_input_bug() {
            debug!(chain_id = verified.chain_id, address = %verified.address,
                "extra-file-input-bug verdict is not stored");
            return Ok(VerificationStatus::ExtraFileInputBug);
        }
        let quality = verified
            .quality()
            .ok_or(VerificationError::UnknownMatchStatus {
                chain_id: verified.chain_id,
                address: verified.address,
            })?;
        match quality {
            MatchQuality::Full => {
                self.delete_partial_if_exists(verified.chain_id, &verified.address)?;
            }
            MatchQuality::Partial => {
                // A second partial never overwrites the first, and a
                // deployment already stored as full is never re-represented
                // as partial.
                if self.is_stored(MatchQuality::Partial, verified.chain_id, &verified.address)
                    || self.is_stored(MatchQuality::Full, verified.chain_id, &verified.address)
                {
                    return Err(VerificationError::PartialAlreadyExists {
                        chain_id: verified.chain_id,
                        address: verified.address,
                    }
                    .into());
                }
            }
        }

        let dir = contract_dir(&self.root, quality, verified.chain_id, &verified.address);
        self.write_sources(&dir, contract)?;
        write_json(&dir.join("metadata.json"), &contract.metadata)?;
        self.write_verdict_files(&dir, verified)?;
        self.write_tag()?;
        info!(chain_id = verified.chain_id, address = %verified.address,
            quality = quality.dir_name(), "stored verified contract");

        if let Some(mirror) = &self.mirror {
            mirror.mirror_dir(&self.root, &dir).await?;
        }

        Ok(match quality {
            MatchQuality::Full => VerificationStatus::Full,
            MatchQuality::Partial => VerificationStatus::Partial,
        })
    }

    fn write_sources(&self, dir: &Path, contract: &CompiledContract) -> Result<()> {
        let sources_dir = dir.join(SOURCES_DIR);
        fs::create_dir_all(&sources_dir)
            .with_context(|| format!("failed to create {}", sources_dir.display()))?;
        let mut translations = BTreeMap::new();
        for (original, content) in &contract.sources {
            let sanitized = sanitize_source_path(original);
            if sanitized.as_str() != original {
                translations.insert(original.clone(), sanitized.to_string());
            }
            let dest = sources_dir.join(sanitized.as_str());
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&dest, content)
                .with_context(|| format!("failed to write {}", dest.display()))?;
        }
        // Only persisted when sanitization actually changed something.
        if !translations.is_empty() {
            write_json(
                &dir.join("path-translation.json"),
                &serde_json::to_value(&translations)?,
            )?;
        }
        Ok(())
    }

    fn write_verdict_files(&self, dir: &Path, verified: &Match) -> Result<()> {
        if let Some(args) = &verified.abi_encoded_constructor_arguments {
            write_text(&dir.join("constructor-args.txt"), args)?;
        }
        if let Some(hash) = &verified.creator_tx_hash {
            write_text(&dir.join("creator-tx-hash.txt"), &hash.to_string())?;
        }
        if let Some(create2) = &verified.create2_args {
            write_json(&dir.join("create2-args.json"), &serde_json::to_value(create2)?)?;
        }
        if let Some(libraries) = &verified.library_map {
            write_json(&dir.join("library-map.json"), &serde_json::to_value(libraries)?)?;
        }
        if let Some(immutables) = &verified.immutable_references {
            write_json(&dir.join("immutable-references.json"), immutables)?;
        }
        Ok(())
    }

    /// Remove a partial-match directory; a no-op when absent.
    pub fn delete_partial_if_exists(&self, chain_id: u64, address: &Address) -> Result<()> {
        let dir = contract_dir(&self.root, MatchQuality::Partial, chain_id, address);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(chain_id, %address, "removed partial match on promotion");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", dir.display()))
            }
        }
    }

    fn is_stored(&self, quality: MatchQuality, chain_id: u64, address: &Address) -> bool {
        contract_dir(&self.root, quality, chain_id, address)
            .join("metadata.json")
            .exists()
    }

    /// All files stored for a contract at the given quality.
    pub fn fetch_all_files(
        &self,
        quality: MatchQuality,
        chain_id: u64,
        address: &Address,
    ) -> Result<Vec<RetrievedFile>> {
        let dir = contract_dir(&self.root, quality, chain_id, address);
        let mut files = Vec::new();
        if !dir.exists() {
            return Ok(files);
        }
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current)
                .with_context(|| format!("failed to read {}", current.display()))?
            {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                files.push(RetrievedFile {
                    name: entry.file_name().to_string_lossy().to_string(),
                    path: path.clone(),
                    content,
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Files at the best available quality: full preferred, partial as the
    /// fallback.
    pub fn fetch_any_files(
        &self,
        chain_id: u64,
        address: &Address,
    ) -> Result<Option<(MatchQuality, Vec<RetrievedFile>)>> {
        for quality in [MatchQuality::Full, MatchQuality::Partial] {
            if self.is_stored(quality, chain_id, address) {
                let files = self.fetch_all_files(quality, chain_id, address)?;
                return Ok(Some((quality, files)));
            }
        }
        Ok(None)
    }

    /// Verified addresses for a chain at one quality, paginated and sorted
    /// by checksummed address.
    pub fn list_verified_addresses(
        &self,
        chain_id: u64,
        quality: MatchQuality,
        page: Page,
    ) -> Result<Vec<String>> {
        let dir = self
            .root
            .join("contracts")
            .join(quality.dir_name())
            .join(chain_id.to_string());
        let mut addresses = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(addresses),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", dir.display()))
            }
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                addresses.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        addresses.sort();
        if page.descending {
            addresses.reverse();
        }
        Ok(addresses
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    /// Rewrite the repository manifest; consumers watch it as a cheap
    /// change signal.
    fn write_tag(&self) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let tag = RepositoryTag {
            timestamp: u64::try_from(timestamp).unwrap_or(u64::MAX),
            repository_version: self.repository_version.clone(),
        };
        write_json(
            &self.root.join(MANIFEST_FILENAME),
            &serde_json::to_value(&tag)?,
        )
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    write_text(path, &rendered)
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vouch_domain::{Language, MatchLevel, TransformationValues};

    fn test_store(temp: &tempfile::TempDir) -> RepositoryStore {
        RepositoryStore::new(&test_config(temp)).expect("store")
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

    fn sample_contract() -> CompiledContract {
        let mut sources = BTreeMap::new();
        sources.insert(
            "contracts/Token.sol".to_string(),
            "pragma solidity ^0.8.17;\ncontract Token {}\n".to_string(),
        );
        CompiledContract {
            compiler: "solc".to_string(),
            version: "0.8.17+commit.8df45f5f".to_string(),
            language: Language::Solidity,
            name: "Token".to_string(),
            compiled_path: "contracts/Token.sol".to_string(),
            sources,
            metadata: json!({ "compiler": { "version": "0.8.17+commit.8df45f5f" } }),
            compiler_settings: json!({ "optimizer": { "enabled": false } }),
            compilation_artifacts: json!({ "abi": [] }),
            creation_bytecode: Some(vec![0x60, 0x80, 0x60, 0x40].into()),
            runtime_bytecode: Some(vec![0x60, 0x80].into()),
            creation_code_artifacts: json!({}),
            runtime_code_artifacts: json!({}),
        }
    }

    fn sample_match(runtime: Option<MatchLevel>, creation: Option<MatchLevel>) -> Match {
        Match {
            address: "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"
                .parse()
                .expect("address"),
            chain_id: 11_155_111,
            runtime_match: runtime,
            creation_match: creation,
            runtime_transformations: Vec::new(),
            runtime_transformation_values: TransformationValues::default(),
            creation_transformations: Vec::new(),
            creation_transformation_values: TransformationValues::default(),
            library_map: None,
            immutable_references: None,
            abi_encoded_constructor_arguments: None,
            creator_tx_hash: None,
            create2_args: None,
            onchain_runtime_bytecode: None,
            onchain_creation_bytecode: None,
            deployment: None,
        }
    }

    #[tokio::test]
    async fn partial_then_full_promotes_and_removes_partial() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let contract = sample_contract();
        let verified = sample_match(Some(MatchLevel::Partial), None);

        let status = store
            .store_match(&contract, &verified)
            .await
            .expect("store partial");
        assert_eq!(status, VerificationStatus::Partial);
        let partial_dir = contract_dir(
            store.root(),
            MatchQuality::Partial,
            verified.chain_id,
            &verified.address,
        );
        assert!(partial_dir.join("metadata.json").exists());

        let perfect = sample_match(Some(MatchLevel::Perfect), Some(MatchLevel::Perfect));
        let status = store
            .store_match(&contract, &perfect)
            .await
            .expect("store full");
        assert_eq!(status, VerificationStatus::Full);
        assert!(!partial_dir.exists(), "partial dir must be promoted away");
        let full_dir = contract_dir(
            store.root(),
            MatchQuality::Full,
            verified.chain_id,
            &verified.address,
        );
        assert!(full_dir.join("metadata.json").exists());
        assert!(full_dir
            .join("sources")
            .join("contracts/Token.sol")
            .exists());
    }

    #[tokio::test]
    async fn second_partial_is_rejected_without_touching_the_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let contract = sample_contract();
        let verified = sample_match(Some(MatchLevel::Partial), None);

        store
            .store_match(&contract, &verified)
            .await
            .expect("first partial");
        let metadata_path = contract_dir(
            store.root(),
            MatchQuality::Partial,
            verified.chain_id,
            &verified.address,
        )
        .join("metadata.json");
        let before = fs::read_to_string(&metadata_path).expect("read metadata");

        let err = store
            .store_match(&contract, &verified)
            .await
            .expect_err("second partial must fail");
        assert!(matches!(
            err.downcast_ref::<VerificationError>(),
            Some(VerificationError::PartialAlreadyExists { .. })
        ));
        let after = fs::read_to_string(&metadata_path).expect("read metadata");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn partial_never_downgrades_an_existing_full_match() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let contract = sample_contract();
        let full = sample_match(Some(MatchLevel::Perfect), None);
        store.store_match(&contract, &full).await.expect("full");

        let partial = sample_match(Some(MatchLevel::Partial), None);
        let err = store
            .store_match(&contract, &partial)
            .await
            .expect_err("partial over full is rejected");
        assert!(matches!(
            err.downcast_ref::<VerificationError>(),
            Some(VerificationError::PartialAlreadyExists { .. })
        ));
        assert!(!contract_dir(
            store.root(),
            MatchQuality::Partial,
            partial.chain_id,
            &partial.address
        )
        .exists());
    }

    #[tokio::test]
    async fn no_match_status_is_a_contract_violation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let err = store
            .store_match(&sample_contract(), &sample_match(None, None))
            .await
            .expect_err("unknown status");
        assert!(matches!(
            err.downcast_ref::<VerificationError>(),
            Some(VerificationError::UnknownMatchStatus { .. })
        ));
    }

    #[tokio::test]
    async fn sentinel_verdict_is_returned_not_stored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let verified = sample_match(Some(MatchLevel::ExtraFileInputBug), None);
        let status = store
            .store_match(&sample_contract(), &verified)
            .await
            .expect("sentinel passes through");
        assert_eq!(status, VerificationStatus::ExtraFileInputBug);
        assert!(!contract_dir(
            store.root(),
            MatchQuality::Partial,
            verified.chain_id,
            &verified.address
        )
        .exists());
    }

    #[tokio::test]
    async fn sanitized_sources_get_a_translation_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let mut contract = sample_contract();
        contract.sources.insert(
            "../escape/Evil.sol".to_string(),
            "contract Evil {}\n".to_string(),
        );
        let verified = sample_match(Some(MatchLevel::Perfect), None);
        store
            .store_match(&contract, &verified)
            .await
            .expect("store");
        let dir = contract_dir(
            store.root(),
            MatchQuality::Full,
            verified.chain_id,
            &verified.address,
        );
        assert!(dir.join("sources/escape/Evil.sol").exists());
        let translation =
            fs::read_to_string(dir.join("path-translation.json")).expect("translation");
        assert!(translation.contains("../escape/Evil.sol"));
    }

    #[tokio::test]
    async fn clean_sources_write_no_translation_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let verified = sample_match(Some(MatchLevel::Perfect), None);
        store
            .store_match(&sample_contract(), &verified)
            .await
            .expect("store");
        let dir = contract_dir(
            store.root(),
            MatchQuality::Full,
            verified.chain_id,
            &verified.address,
        );
        assert!(!dir.join("path-translation.json").exists());
    }

    #[tokio::test]
    async fn manifest_tag_is_rewritten_on_every_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let verified = sample_match(Some(MatchLevel::Perfect), None);
        store
            .store_match(&sample_contract(), &verified)
            .await
            .expect("store");
        let manifest = fs::read_to_string(store.root().join(MANIFEST_FILENAME)).expect("manifest");
        let tag: RepositoryTag = serde_json::from_str(&manifest).expect("tag parses");
        assert!(tag.timestamp > 0);
        assert_eq!(tag.repository_version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn fetch_any_prefers_full_over_partial() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let contract = sample_contract();
        let partial = sample_match(Some(MatchLevel::Partial), None);
        store
            .store_match(&contract, &partial)
            .await
            .expect("partial");
        let (quality, files) = store
            .fetch_any_files(partial.chain_id, &partial.address)
            .expect("fetch")
            .expect("present");
        assert_eq!(quality, MatchQuality::Partial);
        assert!(files.iter().any(|file| file.name == "metadata.json"));

        let full = sample_match(Some(MatchLevel::Perfect), None);
        store.store_match(&contract, &full).await.expect("full");
        let (quality, _) = store
            .fetch_any_files(full.chain_id, &full.address)
            .expect("fetch")
            .expect("present");
        assert_eq!(quality, MatchQuality::Full);
    }

    #[tokio::test]
    async fn address_listing_paginates_and_sorts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let contract = sample_contract();
        let addresses = [
            "0x00000000219ab540356cbb839cbe05303d7705fa",
            "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359",
            "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984",
        ];
        for raw in addresses {
            let mut verified = sample_match(Some(MatchLevel::Perfect), None);
            verified.address = raw.parse().expect("address");
            store
                .store_match(&contract, &verified)
                .await
                .expect("store");
        }
        let ascending = store
            .list_verified_addresses(11_155_111, MatchQuality::Full, Page::default())
            .expect("list");
        assert_eq!(ascending.len(), 3);
        let mut sorted = ascending.clone();
        sorted.sort();
        assert_eq!(ascending, sorted);

        let second_page = store
            .list_verified_addresses(
                11_155_111,
                MatchQuality::Full,
                Page {
                    offset: 2,
                    limit: 5,
                    descending: false,
                },
            )
            .expect("list");
        assert_eq!(second_page.len(), 1);

        let descending = store
            .list_verified_addresses(
                11_155_111,
                MatchQuality::Full,
                Page {
                    offset: 0,
                    limit: 1,
                    descending: true,
                },
            )
            .expect("list");
        assert_eq!(descending.first(), ascending.last());
    }

    #[tokio::test]
    async fn delete_partial_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = test_store(&temp);
        let address: Address = "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"
            .parse()
            .expect("address");
        store
            .delete_partial_if_exists(1, &address)
            .expect("absent dir is a no-op");
        store
            .delete_partial_if_exists(1, &address)
            .expect("still a no-op");
    }
}
