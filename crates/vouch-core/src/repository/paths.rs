//! Deterministic repository paths and source-path sanitization.

use std::path::PathBuf;

use alloy_primitives::Address;
use camino::Utf8PathBuf;
use vouch_domain::{checksum_address, MatchQuality};

/// Directory for one verified contract:
/// `<root>/contracts/{full_match|partial_match}/{chainId}/{checksummedAddress}`.
#[must_use]
pub fn contract_dir(
    root: &std::path::Path,
    quality: MatchQuality,
    chain_id: u64,
    address: &Address,
) -> PathBuf {
    root.join("contracts")
        .join(quality.dir_name())
        .join(chain_id.to_string())
        .join(checksum_address(address))
}

/// Pure, deterministic path for one file of a verified contract. With no
/// file name, the contract directory itself.
#[must_use]
pub fn generate_absolute_file_path(
    root: &std::path::Path,
    quality: MatchQuality,
    chain_id: u64,
    address: &Address,
    file_name: Option<&str>,
) -> PathBuf {
    let dir = contract_dir(root, quality, chain_id, address);
    match file_name {
        Some(name) => dir.join(name),
        None => dir,
    }
}

/// Make an untrusted source name safe to use under the contract's `sources/`
/// directory: separators normalized, absolute roots and drive letters forced
/// relative, traversal and no-op segments stripped. Idempotent.
#[must_use]
pub fn sanitize_source_path(raw: &str) -> Utf8PathBuf {
    let normalized = raw.replace('\\', "/");
    let trimmed = strip_drive_letter(&normalized);
    let segments: Vec<&str> = trimmed
        .split('/')
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .collect();
    if segments.is_empty() {
        Utf8PathBuf::from("_")
    } else {
        Utf8PathBuf::from(segments.join("/"))
    }
}

fn strip_drive_letter(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn addr() -> Address {
        "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"
            .parse()
            .expect("address")
    }

    #[test]
    fn paths_are_deterministic() {
        let root = Path::new("/repo");
        let a = generate_absolute_file_path(
            root,
            MatchQuality::Full,
            1,
            &addr(),
            Some("metadata.json"),
        );
        let b = generate_absolute_file_path(
            root,
            MatchQuality::Full,
            1,
            &addr(),
            Some("metadata.json"),
        );
        assert_eq!(a, b);
        assert_eq!(
            a,
            PathBuf::from(
                "/repo/contracts/full_match/1/0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359/metadata.json"
            )
        );
    }

    #[test]
    fn traversal_segments_are_stripped() {
        assert_eq!(
            sanitize_source_path("../../etc/passwd").as_str(),
            "etc/passwd"
        );
        assert_eq!(
            sanitize_source_path("contracts/../../Token.sol").as_str(),
            "contracts/Token.sol"
        );
    }

    #[test]
    fn absolute_roots_and_drive_letters_become_relative() {
        assert_eq!(
            sanitize_source_path("/home/dev/Token.sol").as_str(),
            "home/dev/Token.sol"
        );
        assert_eq!(
            sanitize_source_path("C:\\work\\Token.sol").as_str(),
            "work/Token.sol"
        );
    }

    #[test]
    fn sanitization_is_idempotent() {
        for raw in [
            "../a/./b//c.sol",
            "C:\\x\\..\\y.sol",
            "plain/Token.sol",
            "....//strange",
        ] {
            let once = sanitize_source_path(raw);
            let twice = sanitize_source_path(once.as_str());
            assert_eq!(once, twice, "sanitizing {raw} twice changed the result");
            assert!(
                !once.as_str().split('/').any(|segment| segment == ".."),
                "traversal survived in {once}"
            );
        }
    }

    #[test]
    fn fully_stripped_paths_get_a_placeholder() {
        assert_eq!(sanitize_source_path("../..").as_str(), "_");
        assert_eq!(sanitize_source_path("").as_str(), "_");
    }
}
