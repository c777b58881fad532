use borsh::BorshSerialize;
use ed25519_dalek::{Signature, Signer, SigningKey};
use sha2::{Digest, Sha512_256};

use super::{validate_address, SuggestedParams};
use crate::error::ChainError;

/// Hard protocol ceiling on members of one atomic transaction group
pub const MAX_GROUP_SIZE: usize = 16;

const GROUP_DOMAIN_PREFIX: &[u8] = b"TG";

/// A single asset-transfer transaction.
///
/// `clawback_from` switches the transfer into revocation mode: the signing
/// authority moves `amount` out of that wallet instead of its own, used when
/// collecting payment for in-economy purchases.
#[derive(Debug, Clone, BorshSerialize)]
pub struct AssetTransfer {
    pub sender: String,
    pub receiver: String,
    pub asset_id: u64,
    pub amount: u64,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: String,
    pub group: Option<[u8; 32]>,
    pub clawback_from: Option<String>,
    pub note: Option<Vec<u8>>,
}

#[derive(Debug, BorshSerialize)]
struct SignedTransfer {
    signature: [u8; 64],
    txn: AssetTransfer,
}

const VALIDITY_WINDOW: u64 = 1000;

impl AssetTransfer {
    pub fn new(
        params: &SuggestedParams,
        sender: &str,
        receiver: &str,
        asset_id: u64,
        amount: u64,
    ) -> Result<Self, ChainError> {
        validate_address(sender)?;
        validate_address(receiver)?;
        if amount == 0 {
            return Err(ChainError::InvalidAmount(amount));
        }

        Ok(Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            asset_id,
            amount,
            fee: params.effective_fee(),
            first_valid: params.last_round,
            last_valid: params.last_round + VALIDITY_WINDOW,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash.clone(),
            group: None,
            clawback_from: None,
            note: None,
        })
    }

    pub fn with_clawback(mut self, source: &str) -> Result<Self, ChainError> {
        validate_address(source)?;
        self.clawback_from = Some(source.to_string());
        Ok(self)
    }

    fn encode(&self) -> Result<Vec<u8>, ChainError> {
        borsh::to_vec(self).map_err(|e| ChainError::Encode(e.to_string()))
    }
}

/// Compute the group id over the members (with any prior group assignment
/// cleared) and stamp it onto every member. The id binds the members
/// together: the node commits all of them or none.
pub fn assign_group_id(txns: &mut [AssetTransfer]) -> Result<[u8; 32], ChainError> {
    if txns.is_empty() || txns.len() > MAX_GROUP_SIZE {
        return Err(ChainError::Encode(format!(
            "group must have 1..={} members, got {}",
            MAX_GROUP_SIZE,
            txns.len()
        )));
    }

    let mut hasher = Sha512_256::new();
    hasher.update(GROUP_DOMAIN_PREFIX);
    for txn in txns.iter() {
        let mut ungrouped = txn.clone();
        ungrouped.group = None;
        hasher.update(ungrouped.encode()?);
    }

    let group_id: [u8; 32] = hasher.finalize().into();
    for txn in txns.iter_mut() {
        txn.group = Some(group_id);
    }
    Ok(group_id)
}

/// The single account whose key signs every settlement transfer
pub struct SigningAuthority {
    address: String,
    key: SigningKey,
}

impl SigningAuthority {
    pub fn from_seed(seed: [u8; 32], address: String) -> Result<Self, ChainError> {
        validate_address(&address)?;
        Ok(Self {
            address,
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign each member and concatenate the signed encodings into one
    /// submit-ready blob.
    pub fn sign_all(&self, txns: &[AssetTransfer]) -> Result<Vec<u8>, ChainError> {
        let mut blob = Vec::new();
        for txn in txns {
            let bytes = txn.encode()?;
            let signature: Signature = self.key.sign(&bytes);
            let signed = SignedTransfer {
                signature: signature.to_bytes(),
                txn: txn.clone(),
            };
            let encoded = borsh::to_vec(&signed).map_err(|e| ChainError::Encode(e.to_string()))?;
            blob.extend_from_slice(&encoded);
        }
        Ok(blob)
    }
}
