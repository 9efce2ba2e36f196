//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Ed25519 node identity. A node's [`NodeId`] is its verifying key; the
//! 256-bit seed that derives it is the only secret a validator holds.

use std::fmt::{Display, Formatter};

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid node seed: {details}")]
    InvalidSeed { details: String },
    #[error("Node id is not a valid Ed25519 public key")]
    InvalidPublicKey,
    #[error("Signature verification failed")]
    BadSignature,
}

/// 256-bit private seed from which the node keypair is derived.
#[derive(Clone)]
pub struct NodeSeed([u8; 32]);

impl NodeSeed {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|e| KeyError::InvalidSeed { details: e.to_string() })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| KeyError::InvalidSeed {
            details: format!("expected 32 bytes, got {}", v.len()),
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for NodeSeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Never log seed material
        write!(f, "NodeSeed(..)")
    }
}

#[derive(Clone)]
pub struct NodeKeypair {
    signing: SigningKey,
    node_id: NodeId,
}

impl NodeKeypair {
    pub fn from_seed(seed: &NodeSeed) -> Self {
        let signing = SigningKey::from_bytes(&seed.0);
        let node_id = NodeId::new(signing.verifying_key().to_bytes());
        Self { signing, node_id }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn sign(&self, message: &[u8]) -> NodeSignature {
        NodeSignature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeKeypair({})", self.node_id)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct NodeSignature([u8; 64]);

impl NodeSignature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub const fn into_array(self) -> [u8; 64] {
        self.0
    }

    pub const fn byte_size() -> usize {
        64
    }
}

impl Display for NodeSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NodeSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeSignature({})", self)
    }
}

/// Verifies `signature` over `message` against the public key embedded in
/// `node_id`.
pub fn verify_signature(node_id: &NodeId, message: &[u8], signature: &NodeSignature) -> Result<(), KeyError> {
    let key_bytes: [u8; 32] = node_id
        .as_bytes()
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    let verifying = VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidPublicKey)?;
    let signature = DalekSignature::from_bytes(&signature.0);
    verifying.verify(message, &signature).map_err(|_| KeyError::BadSignature)
}
