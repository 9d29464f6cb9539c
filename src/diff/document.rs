//! Match document: externally computed function/block correspondence.
//!
//! The document names the two compared binaries `source` and `target`. A
//! session views it from one of those roles; the other role is its peer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Largest block span accepted, in bytes. Coloring walks a block item by item
/// on the host's main thread.
pub const MAX_BLOCK_SPAN: u64 = 0x10_0000;

/// Errors loading a match document.
#[derive(Error, Debug)]
pub enum MatchDocumentError {
    #[error("Failed to read match document {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed match document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Function match {function:#x}: {role} block {start:#x}..{end:#x} ends before it starts")]
    InvertedBlock {
        function: u64,
        role: Role,
        start: u64,
        end: u64,
    },

    #[error("Function match {function:#x}: {role} block {start:#x}..{end:#x} spans more than {max:#x} bytes")]
    OversizedBlock {
        function: u64,
        role: Role,
        start: u64,
        end: u64,
        max: u64,
    },

    #[error("Function match {function:#x}: unidentified {role} blocks {first:#x} and {second:#x} overlap")]
    OverlappingBlocks {
        function: u64,
        role: Role,
        first: u64,
        second: u64,
    },
}

/// Which side of the comparison a session is looking from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Target,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Source => Role::Target,
            Role::Target => Role::Source,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// Image-relative half-open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

/// One matched block on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMatchPair {
    pub source: u64,
    pub source_end: u64,
    pub target: u64,
    pub target_end: u64,
}

impl BlockMatchPair {
    pub fn block(&self, role: Role) -> Block {
        match role {
            Role::Source => Block {
                start: self.source,
                end: self.source_end,
            },
            Role::Target => Block {
                start: self.target,
                end: self.target_end,
            },
        }
    }
}

/// Blocks with no counterpart on the other side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnidentifiedBlocks {
    #[serde(default)]
    pub sources: Vec<Block>,
    #[serde(default)]
    pub targets: Vec<Block>,
}

impl UnidentifiedBlocks {
    pub fn for_role(&self, role: Role) -> &[Block] {
        match role {
            Role::Source => &self.sources,
            Role::Target => &self.targets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMatch {
    /// Image-relative function address in the source binary.
    pub source: u64,
    /// Image-relative function address in the target binary.
    pub target: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default)]
    pub matches: Vec<BlockMatchPair>,
    #[serde(default)]
    pub unidentified_blocks: UnidentifiedBlocks,
}

impl FunctionMatch {
    pub fn address(&self, role: Role) -> u64 {
        match role {
            Role::Source => self.source,
            Role::Target => self.target,
        }
    }

    pub fn name(&self, role: Role) -> Option<&str> {
        match role {
            Role::Source => self.source_name.as_deref(),
            Role::Target => self.target_name.as_deref(),
        }
    }

    /// Matched blocks across both sides: each pair contributes one per side.
    pub fn matched_block_count(&self) -> usize {
        self.matches.len() * 2
    }

    pub fn unidentified_count(&self, role: Role) -> usize {
        self.unidentified_blocks.for_role(role).len()
    }

    fn validate(&self) -> Result<(), MatchDocumentError> {
        for role in [Role::Source, Role::Target] {
            for pair in &self.matches {
                self.check_block(role, pair.block(role))?;
            }

            let mut blocks = self.unidentified_blocks.for_role(role).to_vec();
            for block in &blocks {
                self.check_block(role, *block)?;
            }
            blocks.sort_by_key(|b| (b.start, b.end));
            for pair in blocks.windows(2) {
                if pair[1].start < pair[0].end {
                    return Err(MatchDocumentError::OverlappingBlocks {
                        function: self.address(role),
                        role,
                        first: pair[0].start,
                        second: pair[1].start,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_block(&self, role: Role, block: Block) -> Result<(), MatchDocumentError> {
        if block.end < block.start {
            return Err(MatchDocumentError::InvertedBlock {
                function: self.address(role),
                role,
                start: block.start,
                end: block.end,
            });
        }
        if block.end - block.start > MAX_BLOCK_SPAN {
            return Err(MatchDocumentError::OversizedBlock {
                function: self.address(role),
                role,
                start: block.start,
                end: block.end,
                max: MAX_BLOCK_SPAN,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDocument {
    #[serde(
        default,
        alias = "source_content_hash",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_md5: Option<String>,
    #[serde(
        default,
        alias = "target_content_hash",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_md5: Option<String>,
    pub function_matches: Vec<FunctionMatch>,
}

impl MatchDocument {
    /// Parse and validate a document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MatchDocumentError> {
        let document: MatchDocument = serde_json::from_slice(bytes)?;
        document.validate()?;
        Ok(document)
    }

    pub fn load(path: &Path) -> Result<Self, MatchDocumentError> {
        let bytes = std::fs::read(path).map_err(|source| MatchDocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&bytes)
    }

    pub fn validate(&self) -> Result<(), MatchDocumentError> {
        self.function_matches
            .iter()
            .try_for_each(FunctionMatch::validate)
    }

    pub fn content_hash(&self, role: Role) -> Option<&str> {
        match role {
            Role::Source => self.source_md5.as_deref(),
            Role::Target => self.target_md5.as_deref(),
        }
    }

    /// The role a session with `content_hash` plays in this document.
    pub fn role_of(&self, content_hash: &str) -> Option<Role> {
        [Role::Source, Role::Target].into_iter().find(|role| {
            self.content_hash(*role)
                .is_some_and(|hash| hash.eq_ignore_ascii_case(content_hash))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MatchDocument, MatchDocumentError, Role, MAX_BLOCK_SPAN};

    const DOCUMENT: &str = r#"{
        "source_md5": "AAAA",
        "target_content_hash": "bbbb",
        "function_matches": [{
            "source": 4198400, "target": 4202496,
            "source_name": "main", "target_name": "foo",
            "matches": [
                {"source": 4096, "source_end": 4112, "target": 8192, "target_end": 8208},
                {"source": 4112, "source_end": 4128, "target": 8208, "target_end": 8224}
            ],
            "unidentified_blocks": {"sources": [{"start": 4128, "end": 4144}], "targets": []}
        }]
    }"#;

    #[test]
    fn parses_both_roles() {
        let document = MatchDocument::from_json(DOCUMENT.as_bytes()).expect("document");
        let fm = &document.function_matches[0];

        assert_eq!(fm.address(Role::Source), 0x401000);
        assert_eq!(fm.address(Role::Target), 0x402000);
        assert_eq!(fm.name(Role::Target), Some("foo"));
        assert_eq!(fm.matches[1].block(Role::Target).start, 8208);
        assert_eq!(fm.matched_block_count(), 4);
        assert_eq!(fm.unidentified_count(Role::Source), 1);
        assert_eq!(fm.unidentified_count(Role::Target), 0);
    }

    #[test]
    fn role_is_resolved_from_content_hash() {
        let document = MatchDocument::from_json(DOCUMENT.as_bytes()).expect("document");
        assert_eq!(document.role_of("aaaa"), Some(Role::Source));
        assert_eq!(document.role_of("BBBB"), Some(Role::Target));
        assert_eq!(document.role_of("cccc"), None);
        assert_eq!(Role::Source.peer(), Role::Target);
    }

    #[test]
    fn optional_sections_default_to_empty() {
        let document = MatchDocument::from_json(
            br#"{"function_matches": [{"source": 1, "target": 2}]}"#,
        )
        .expect("document");
        let fm = &document.function_matches[0];
        assert_eq!(fm.matched_block_count(), 0);
        assert_eq!(fm.unidentified_count(Role::Target), 0);
        assert_eq!(fm.name(Role::Source), None);
    }

    #[test]
    fn missing_fields_fail_at_load() {
        let err = MatchDocument::from_json(br#"{"function_matches": [{"source": 1}]}"#)
            .unwrap_err();
        assert!(matches!(err, MatchDocumentError::Parse(_)));

        let err = MatchDocument::from_json(br#"{"matches": []}"#).unwrap_err();
        assert!(matches!(err, MatchDocumentError::Parse(_)));
    }

    #[test]
    fn inverted_block_is_rejected() {
        let err = MatchDocument::from_json(
            br#"{"function_matches": [{"source": 1, "target": 2,
                "matches": [{"source": 32, "source_end": 16, "target": 0, "target_end": 4}]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MatchDocumentError::InvertedBlock {
                role: Role::Source,
                start: 32,
                end: 16,
                ..
            }
        ));
    }

    #[test]
    fn oversized_block_is_rejected() {
        let err = MatchDocument::from_json(
            br#"{"function_matches": [{"source": 1, "target": 2,
                "unidentified_blocks": {"sources": [],
                    "targets": [{"start": 0, "end": 1099511627776}]}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MatchDocumentError::OversizedBlock {
                role: Role::Target,
                start: 0,
                end: 0x100_0000_0000,
                ..
            }
        ));

        let at_limit = format!(
            r#"{{"function_matches": [{{"source": 1, "target": 2,
                "matches": [{{"source": 0, "source_end": {MAX_BLOCK_SPAN}, "target": 0, "target_end": 4}}]}}]}}"#
        );
        assert!(MatchDocument::from_json(at_limit.as_bytes()).is_ok());
    }

    #[test]
    fn overlapping_unidentified_blocks_are_rejected() {
        let err = MatchDocument::from_json(
            br#"{"function_matches": [{"source": 1, "target": 2,
                "unidentified_blocks": {"targets": [{"start": 16, "end": 32}, {"start": 0, "end": 20}]}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MatchDocumentError::OverlappingBlocks {
                role: Role::Target,
                first: 0,
                second: 16,
                ..
            }
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = MatchDocument::load(std::path::Path::new("/nonexistent/matches.json"))
            .unwrap_err();
        assert!(matches!(err, MatchDocumentError::Io { .. }));
    }
}
