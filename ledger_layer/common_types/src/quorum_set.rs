//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The recursive quorum-set structure each validator advertises.
//!
//! A quorum set is a threshold over members, each member either a node or a
//! nested quorum set. Nesting is owned by value and bounded in depth; any
//! sharing across validators happens by hash through the node registry, not
//! structurally.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::{
    hashing::{ConsensusHasher, QUORUM_SET_DOMAIN},
    NodeId,
    QuorumSetHash,
};

pub const MAX_QUORUM_SET_DEPTH: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum QuorumSetError {
    #[error("Invalid quorum set threshold {threshold} over {members} member(s)")]
    InvalidThreshold { threshold: u32, members: usize },
    #[error("Quorum set exceeds the maximum nesting depth of {MAX_QUORUM_SET_DEPTH}")]
    TooDeep,
    #[error("Malformed quorum set encoding: {details}")]
    MalformedEncoding { details: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuorumSetMember {
    Node(NodeId),
    Inner(QuorumSet),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSet {
    threshold: u32,
    members: Vec<QuorumSetMember>,
}

impl QuorumSet {
    const MEMBER_TAG_NODE: u8 = 0;
    const MEMBER_TAG_INNER: u8 = 1;

    pub fn new(threshold: u32, members: Vec<QuorumSetMember>) -> Result<Self, QuorumSetError> {
        let qset = Self { threshold, members };
        qset.validate()?;
        Ok(qset)
    }

    /// The quorum set of a node that trusts only itself.
    pub fn singleton(node_id: NodeId) -> Self {
        Self {
            threshold: 1,
            members: vec![QuorumSetMember::Node(node_id)],
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn members(&self) -> &[QuorumSetMember] {
        &self.members
    }

    /// Validates threshold bounds and nesting depth recursively. Must be
    /// called on any quorum set that did not come through [`Self::new`]
    /// (deserialized configuration, decoded peer payloads).
    pub fn validate(&self) -> Result<(), QuorumSetError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), QuorumSetError> {
        if depth > MAX_QUORUM_SET_DEPTH {
            return Err(QuorumSetError::TooDeep);
        }
        if self.threshold == 0 || self.threshold as usize > self.members.len() {
            return Err(QuorumSetError::InvalidThreshold {
                threshold: self.threshold,
                members: self.members.len(),
            });
        }
        for member in &self.members {
            if let QuorumSetMember::Inner(inner) = member {
                inner.validate_at(depth + 1)?;
            }
        }
        Ok(())
    }

    /// All node ids reachable anywhere in the tree.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        let mut ids = BTreeSet::new();
        self.collect_node_ids(&mut ids);
        ids
    }

    fn collect_node_ids(&self, ids: &mut BTreeSet<NodeId>) {
        for member in &self.members {
            match member {
                QuorumSetMember::Node(id) => {
                    ids.insert(*id);
                },
                QuorumSetMember::Inner(inner) => inner.collect_node_ids(ids),
            }
        }
    }

    /// Canonical length-prefixed encoding: threshold, member count, then one
    /// tagged entry per member. Bit-exact by construction, so the digest is a
    /// stable identity across implementations.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.members.len() * 33);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.threshold.to_be_bytes());
        out.extend_from_slice(&(self.members.len() as u32).to_be_bytes());
        for member in &self.members {
            match member {
                QuorumSetMember::Node(id) => {
                    out.push(Self::MEMBER_TAG_NODE);
                    out.extend_from_slice(id.as_bytes());
                },
                QuorumSetMember::Inner(inner) => {
                    out.push(Self::MEMBER_TAG_INNER);
                    inner.encode_into(out);
                },
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QuorumSetError> {
        let mut cursor = 0usize;
        let qset = Self::decode_at(bytes, &mut cursor, 1)?;
        if cursor != bytes.len() {
            return Err(QuorumSetError::MalformedEncoding {
                details: format!("{} trailing byte(s)", bytes.len() - cursor),
            });
        }
        qset.validate()?;
        Ok(qset)
    }

    fn decode_at(bytes: &[u8], cursor: &mut usize, depth: usize) -> Result<Self, QuorumSetError> {
        if depth > MAX_QUORUM_SET_DEPTH {
            return Err(QuorumSetError::TooDeep);
        }
        let threshold = read_u32(bytes, cursor)?;
        let count = read_u32(bytes, cursor)? as usize;
        let mut members = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let tag = read_u8(bytes, cursor)?;
            match tag {
                Self::MEMBER_TAG_NODE => {
                    let id = read_node_id(bytes, cursor)?;
                    members.push(QuorumSetMember::Node(id));
                },
                Self::MEMBER_TAG_INNER => {
                    members.push(QuorumSetMember::Inner(Self::decode_at(bytes, cursor, depth + 1)?));
                },
                other => {
                    return Err(QuorumSetError::MalformedEncoding {
                        details: format!("unknown member tag {}", other),
                    })
                },
            }
        }
        Ok(Self { threshold, members })
    }

    pub fn hash(&self) -> QuorumSetHash {
        ConsensusHasher::new(QUORUM_SET_DOMAIN)
            .chain(&self.canonical_bytes())
            .finalize()
            .into()
    }
}

impl Display for QuorumSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} of ", self.threshold)?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match member {
                QuorumSetMember::Node(id) => write!(f, "{}", id)?,
                QuorumSetMember::Inner(inner) => write!(f, "{}", inner)?,
            }
        }
        write!(f, ")")
    }
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8, QuorumSetError> {
    let b = *bytes.get(*cursor).ok_or_else(|| QuorumSetError::MalformedEncoding {
        details: "unexpected end of input".to_string(),
    })?;
    *cursor += 1;
    Ok(b)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, QuorumSetError> {
    let end = cursor.checked_add(4).filter(|end| *end <= bytes.len()).ok_or_else(|| {
        QuorumSetError::MalformedEncoding {
            details: "unexpected end of input".to_string(),
        }
    })?;
    let value = u32::from_be_bytes(bytes[*cursor..end].try_into().expect("length checked"));
    *cursor = end;
    Ok(value)
}

fn read_node_id(bytes: &[u8], cursor: &mut usize) -> Result<NodeId, QuorumSetError> {
    let end = cursor.checked_add(32).filter(|end| *end <= bytes.len()).ok_or_else(|| {
        QuorumSetError::MalformedEncoding {
            details: "unexpected end of input".to_string(),
        }
    })?;
    let id = NodeId::try_from(&bytes[*cursor..end]).expect("length checked");
    *cursor = end;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeId {
        NodeId::new([n; 32])
    }

    fn flat(threshold: u32, nodes: &[u8]) -> QuorumSet {
        QuorumSet::new(threshold, nodes.iter().map(|n| QuorumSetMember::Node(node(*n))).collect()).unwrap()
    }

    #[test]
    fn rejects_zero_threshold() {
        let err = QuorumSet::new(0, vec![QuorumSetMember::Node(node(1))]).unwrap_err();
        assert!(matches!(err, QuorumSetError::InvalidThreshold { threshold: 0, members: 1 }));
    }

    #[test]
    fn rejects_threshold_above_member_count() {
        let err = QuorumSet::new(3, vec![QuorumSetMember::Node(node(1)), QuorumSetMember::Node(node(2))]).unwrap_err();
        assert!(matches!(err, QuorumSetError::InvalidThreshold { threshold: 3, members: 2 }));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut qset = QuorumSet::singleton(node(1));
        for _ in 0..MAX_QUORUM_SET_DEPTH {
            qset = QuorumSet {
                threshold: 1,
                members: vec![QuorumSetMember::Inner(qset)],
            };
        }
        assert!(matches!(qset.validate(), Err(QuorumSetError::TooDeep)));
    }

    #[test]
    fn canonical_round_trip_with_nesting() {
        let qset = QuorumSet::new(2, vec![
            QuorumSetMember::Node(node(1)),
            QuorumSetMember::Inner(flat(1, &[2, 3])),
            QuorumSetMember::Node(node(4)),
        ])
        .unwrap();
        let decoded = QuorumSet::decode(&qset.canonical_bytes()).unwrap();
        assert_eq!(decoded, qset);
        assert_eq!(decoded.hash(), qset.hash());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = flat(1, &[1]).canonical_bytes();
        bytes.push(0);
        assert!(QuorumSet::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_invalid_threshold() {
        let qset = QuorumSet {
            threshold: 5,
            members: vec![QuorumSetMember::Node(node(1))],
        };
        assert!(QuorumSet::decode(&qset.canonical_bytes()).is_err());
    }

    #[test]
    fn hash_distinguishes_structure() {
        // (1 of A, B) is not the same trust statement as (1 of (1 of A, B))
        let a = flat(1, &[1, 2]);
        let b = QuorumSet::new(1, vec![QuorumSetMember::Inner(flat(1, &[1, 2]))]).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn node_ids_are_transitive() {
        let qset = QuorumSet::new(1, vec![
            QuorumSetMember::Node(node(1)),
            QuorumSetMember::Inner(flat(1, &[2, 3])),
        ])
        .unwrap();
        let ids = qset.node_ids();
        assert_eq!(ids, [node(1), node(2), node(3)].into_iter().collect());
    }

    #[test]
    fn config_json_round_trip() {
        let json = serde_json::json!({
            "threshold": 2,
            "members": [
                hex::encode([1u8; 32]),
                { "threshold": 1, "members": [hex::encode([2u8; 32]), hex::encode([3u8; 32])] },
            ],
        });
        let qset: QuorumSet = serde_json::from_value(json).unwrap();
        qset.validate().unwrap();
        assert_eq!(qset.threshold(), 2);
        assert_eq!(qset.members().len(), 2);
    }
}
