//! Content addressing for bytecode and source blobs.

use alloy_primitives::{keccak256, Address, B256};
use sha2::{Digest, Sha256};

/// Digest pair identifying an immutable byte blob.
///
/// The sha256 digest is the primary key everywhere in this repository; the
/// keccak256 digest is kept alongside for compatibility with the external
/// EVM indexing convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodeDigest {
    pub sha256: [u8; 32],
    pub keccak256: B256,
}

impl CodeDigest {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            sha256: Sha256::digest(bytes).into(),
            keccak256: keccak256(bytes),
        }
    }

    #[must_use]
    pub fn sha_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

/// EIP-55 mixed-case rendering used for every filesystem path and listing.
#[must_use]
pub fn checksum_address(address: &Address) -> String {
    address.to_checksum(None)
}
