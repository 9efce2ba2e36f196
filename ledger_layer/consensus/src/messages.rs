//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Consensus statements and their canonical wire format.
//!
//! The encoding is bit-exact: signatures are produced over the canonical
//! bytes, so two implementations that disagree on a single byte cannot
//! validate each other. All integers are big-endian; optional ballots are a
//! one-byte presence flag followed by the ballot layout.

use std::fmt::{Display, Formatter};

use meridian_common_types::{
    hashing::statement_signing_domain,
    keys::verify_signature,
    Ballot,
    FixedHash,
    LedgerValue,
    NodeId,
    NodeKeypair,
    NodeSignature,
    QuorumSetHash,
    SlotIndex,
    ValueHash,
};

#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("Statement truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("Unknown statement kind {0}")]
    UnknownKind(u8),
    #[error("Unknown presence flag {0}")]
    UnknownPresenceFlag(u8),
    #[error("{len} trailing byte(s) after statement")]
    TrailingBytes { len: usize },
    #[error("Ballot value hash does not match the carried value")]
    ValueHashMismatch,
    #[error("Statement signature is invalid")]
    BadSignature,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementKind {
    Prepare,
    Confirm,
    Externalize,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [StatementKind::Prepare, StatementKind::Confirm, StatementKind::Externalize];

    pub const fn as_u8(self) -> u8 {
        match self {
            StatementKind::Prepare => 0,
            StatementKind::Confirm => 1,
            StatementKind::Externalize => 2,
        }
    }

    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StatementKind::Prepare),
            1 => Some(StatementKind::Confirm),
            2 => Some(StatementKind::Externalize),
            _ => None,
        }
    }
}

impl Display for StatementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementKind::Prepare => write!(f, "PREPARE"),
            StatementKind::Confirm => write!(f, "CONFIRM"),
            StatementKind::Externalize => write!(f, "EXTERNALIZE"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PrepareExtras {
    /// Highest ballot this node has previously prepared, if any.
    pub prepared: Option<Ballot>,
    /// Ballot abandoned when an incompatible bump was adopted.
    pub aborted: Option<Ballot>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfirmExtras {
    pub prepared_counter: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExternalizeExtras {
    pub commit_counter_low: u32,
    pub commit_counter_high: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatementPayload {
    Prepare(PrepareExtras),
    Confirm(ConfirmExtras),
    Externalize(ExternalizeExtras),
}

impl StatementPayload {
    pub const fn kind(&self) -> StatementKind {
        match self {
            StatementPayload::Prepare(_) => StatementKind::Prepare,
            StatementPayload::Confirm(_) => StatementKind::Confirm,
            StatementPayload::Externalize(_) => StatementKind::Externalize,
        }
    }
}

/// An unsigned statement produced by the slot state machine, waiting for the
/// local signer to stamp identity and quorum-set reference onto it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementDraft {
    pub slot_index: SlotIndex,
    pub ballot: Ballot,
    pub value: LedgerValue,
    pub payload: StatementPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub slot_index: SlotIndex,
    pub from: NodeId,
    pub qset_hash: QuorumSetHash,
    pub ballot: Ballot,
    pub value: LedgerValue,
    pub payload: StatementPayload,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        self.payload.kind()
    }

    /// Canonical statement bytes, the exact content signatures commit to.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.slot_index.as_u64().to_be_bytes());
        out.extend_from_slice(self.from.as_bytes());
        out.extend_from_slice(self.qset_hash.as_bytes());
        out.push(self.kind().as_u8());
        encode_ballot(&mut out, &self.ballot);
        out.extend_from_slice(&self.value.canonical_bytes());
        match &self.payload {
            StatementPayload::Prepare(extras) => {
                encode_optional_ballot(&mut out, extras.prepared.as_ref());
                encode_optional_ballot(&mut out, extras.aborted.as_ref());
            },
            StatementPayload::Confirm(extras) => {
                out.extend_from_slice(&extras.prepared_counter.to_be_bytes());
            },
            StatementPayload::Externalize(extras) => {
                out.extend_from_slice(&extras.commit_counter_low.to_be_bytes());
                out.extend_from_slice(&extras.commit_counter_high.to_be_bytes());
            },
        }
        out
    }

    fn signing_payload(&self, signing_domain: &FixedHash) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32 + 256);
        payload.extend_from_slice(signing_domain.as_slice());
        payload.extend_from_slice(&self.canonical_bytes());
        payload
    }

    pub fn sign(self, keypair: &NodeKeypair, signing_domain: &FixedHash) -> SignedStatement {
        let signature = keypair.sign(&self.signing_payload(signing_domain));
        SignedStatement {
            statement: self,
            signature,
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} from {} ballot {}",
            self.kind(),
            self.slot_index,
            self.from,
            self.ballot
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedStatement {
    pub statement: Statement,
    pub signature: NodeSignature,
}

impl SignedStatement {
    /// Checks internal hash consistency and the Ed25519 signature against
    /// the sender's NodeId.
    pub fn verify(&self, signing_domain: &FixedHash) -> Result<(), StatementError> {
        if self.statement.ballot.value_hash != self.statement.value.hash() {
            return Err(StatementError::ValueHashMismatch);
        }
        verify_signature(
            &self.statement.from,
            &self.statement.signing_payload(signing_domain),
            &self.signature,
        )
        .map_err(|_| StatementError::BadSignature)
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = self.statement.canonical_bytes();
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, StatementError> {
        let mut cursor = 0usize;
        let slot_index = SlotIndex(read_u64(bytes, &mut cursor)?);
        let from = NodeId::new(read_array::<32>(bytes, &mut cursor)?);
        let qset_hash = QuorumSetHash::from(read_array::<32>(bytes, &mut cursor)?);
        let kind_byte = read_array::<1>(bytes, &mut cursor)?[0];
        let kind = StatementKind::from_u8(kind_byte).ok_or(StatementError::UnknownKind(kind_byte))?;
        let ballot = read_ballot(bytes, &mut cursor)?;
        let value_bytes = read_slice(bytes, &mut cursor, LedgerValue::ENCODED_LEN)?;
        let value = LedgerValue::decode(value_bytes).map_err(|_| StatementError::Truncated { offset: cursor })?;
        let payload = match kind {
            StatementKind::Prepare => StatementPayload::Prepare(PrepareExtras {
                prepared: read_optional_ballot(bytes, &mut cursor)?,
                aborted: read_optional_ballot(bytes, &mut cursor)?,
            }),
            StatementKind::Confirm => StatementPayload::Confirm(ConfirmExtras {
                prepared_counter: read_u32(bytes, &mut cursor)?,
            }),
            StatementKind::Externalize => StatementPayload::Externalize(ExternalizeExtras {
                commit_counter_low: read_u32(bytes, &mut cursor)?,
                commit_counter_high: read_u32(bytes, &mut cursor)?,
            }),
        };
        let signature = NodeSignature::from_bytes(read_array::<64>(bytes, &mut cursor)?);
        if cursor != bytes.len() {
            return Err(StatementError::TrailingBytes {
                len: bytes.len() - cursor,
            });
        }
        Ok(Self {
            statement: Statement {
                slot_index,
                from,
                qset_hash,
                ballot,
                value,
                payload,
            },
            signature,
        })
    }
}

impl Display for SignedStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.statement, f)
    }
}

/// Precomputed signing domain for a network. See
/// [`statement_signing_domain`].
pub fn signing_domain(network_passphrase: &str) -> FixedHash {
    statement_signing_domain(network_passphrase)
}

fn encode_ballot(out: &mut Vec<u8>, ballot: &Ballot) {
    out.extend_from_slice(&ballot.counter.to_be_bytes());
    out.extend_from_slice(ballot.value_hash.as_bytes());
}

fn encode_optional_ballot(out: &mut Vec<u8>, ballot: Option<&Ballot>) {
    match ballot {
        Some(ballot) => {
            out.push(1);
            encode_ballot(out, ballot);
        },
        None => out.push(0),
    }
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], StatementError> {
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(StatementError::Truncated { offset: *cursor })?;
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_array<const N: usize>(bytes: &[u8], cursor: &mut usize) -> Result<[u8; N], StatementError> {
    Ok(read_slice(bytes, cursor, N)?.try_into().expect("length checked"))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, StatementError> {
    Ok(u32::from_be_bytes(read_array::<4>(bytes, cursor)?))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, StatementError> {
    Ok(u64::from_be_bytes(read_array::<8>(bytes, cursor)?))
}

fn read_ballot(bytes: &[u8], cursor: &mut usize) -> Result<Ballot, StatementError> {
    let counter = read_u32(bytes, cursor)?;
    let value_hash = ValueHash::from(read_array::<32>(bytes, cursor)?);
    Ok(Ballot::new(counter, value_hash))
}

fn read_optional_ballot(bytes: &[u8], cursor: &mut usize) -> Result<Option<Ballot>, StatementError> {
    match read_array::<1>(bytes, cursor)?[0] {
        0 => Ok(None),
        1 => Ok(Some(read_ballot(bytes, cursor)?)),
        other => Err(StatementError::UnknownPresenceFlag(other)),
    }
}

#[cfg(test)]
mod tests {
    use meridian_common_types::{LedgerHash, NodeSeed, TxSetHash};

    use super::*;

    const PASSPHRASE: &str = "meridian test net";

    fn keypair(n: u8) -> NodeKeypair {
        NodeKeypair::from_seed(&NodeSeed::new([n; 32]))
    }

    fn value() -> LedgerValue {
        LedgerValue::new(LedgerHash::from([1; 32]), TxSetHash::from([2; 32]), 1_700)
    }

    fn statement(keypair: &NodeKeypair, payload: StatementPayload) -> Statement {
        let value = value();
        Statement {
            slot_index: SlotIndex(7),
            from: keypair.node_id(),
            qset_hash: QuorumSetHash::from([9; 32]),
            ballot: Ballot::new(3, value.hash()),
            value,
            payload,
        }
    }

    #[test]
    fn wire_round_trip_all_kinds() {
        let keypair = keypair(1);
        let domain = signing_domain(PASSPHRASE);
        let payloads = [
            StatementPayload::Prepare(PrepareExtras {
                prepared: Some(Ballot::new(2, value().hash())),
                aborted: None,
            }),
            StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }),
            StatementPayload::Externalize(ExternalizeExtras {
                commit_counter_low: 3,
                commit_counter_high: 3,
            }),
        ];
        for payload in payloads {
            let signed = statement(&keypair, payload).sign(&keypair, &domain);
            let decoded = SignedStatement::from_wire_bytes(&signed.to_wire_bytes()).unwrap();
            assert_eq!(decoded, signed);
            decoded.verify(&domain).unwrap();
        }
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let keypair = keypair(1);
        let domain = signing_domain(PASSPHRASE);
        let mut signed = statement(&keypair, StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }))
            .sign(&keypair, &domain);
        signed.statement.slot_index = SlotIndex(8);
        assert!(matches!(signed.verify(&domain), Err(StatementError::BadSignature)));
    }

    #[test]
    fn verify_rejects_wrong_network() {
        let keypair = keypair(1);
        let signed = statement(&keypair, StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }))
            .sign(&keypair, &signing_domain(PASSPHRASE));
        assert!(signed.verify(&signing_domain("another network")).is_err());
    }

    #[test]
    fn verify_rejects_value_hash_mismatch() {
        let keypair = keypair(1);
        let domain = signing_domain(PASSPHRASE);
        let mut stmt = statement(&keypair, StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }));
        stmt.ballot = Ballot::new(3, ValueHash::from([0xee; 32]));
        let signed = stmt.sign(&keypair, &domain);
        assert!(matches!(signed.verify(&domain), Err(StatementError::ValueHashMismatch)));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let keypair = keypair(1);
        let domain = signing_domain(PASSPHRASE);
        let signed = statement(&keypair, StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }))
            .sign(&keypair, &domain);
        let mut bytes = signed.to_wire_bytes();
        bytes[8 + 32 + 32] = 9;
        assert!(matches!(
            SignedStatement::from_wire_bytes(&bytes),
            Err(StatementError::UnknownKind(9))
        ));
    }

    #[test]
    fn decode_rejects_truncation_and_trailing() {
        let keypair = keypair(1);
        let domain = signing_domain(PASSPHRASE);
        let signed = statement(&keypair, StatementPayload::Confirm(ConfirmExtras { prepared_counter: 3 }))
            .sign(&keypair, &domain);
        let bytes = signed.to_wire_bytes();
        assert!(SignedStatement::from_wire_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes;
        extended.push(0);
        assert!(matches!(
            SignedStatement::from_wire_bytes(&extended),
            Err(StatementError::TrailingBytes { len: 1 })
        ));
    }
}
