//! Owner signature verification.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::debug;

use warden_core::{Result, WardenError};

/// Checks that `signature` over `message` was produced by `address`.
pub trait SignatureVerifier: Send + Sync {
    /// Protocol chain family this verifier handles (`solana`, `evm`).
    fn chain(&self) -> &str;

    /// `Ok(false)` means a well-formed signature that does not verify.
    fn verify(&self, address: &str, message: &str, signature: &str) -> Result<bool>;
}

/// Ed25519 over the raw UTF-8 message, as Solana wallets sign it.
///
/// The address is a base58 public key. The signature may be base58, base64
/// or hex; the first decoding that yields 64 bytes is used.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn public_key(address: &str) -> Result<VerifyingKey> {
        let bytes = bs58::decode(address.trim())
            .into_vec()
            .map_err(|e| WardenError::InvalidSignature(format!("bad public key: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WardenError::InvalidSignature("public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| WardenError::InvalidSignature(format!("bad public key: {e}")))
    }

    fn signature(raw: &str) -> Result<Signature> {
        let raw = raw.trim();
        let hex_body = raw.strip_prefix("0x").unwrap_or(raw);
        let candidates = [
            bs58::decode(raw).into_vec().ok(),
            STANDARD.decode(raw).ok(),
            URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')).ok(),
            hex::decode(hex_body).ok(),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|bytes| <[u8; 64]>::try_from(bytes).ok())
            .map(|bytes| Signature::from_bytes(&bytes))
            .ok_or_else(|| WardenError::InvalidSignature("signature must decode to 64 bytes".into()))
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn chain(&self) -> &str {
        "solana"
    }

    fn verify(&self, address: &str, message: &str, signature: &str) -> Result<bool> {
        let key = Self::public_key(address)?;
        let signature = Self::signature(signature)?;
        let ok = key.verify(message.as_bytes(), &signature).is_ok();
        debug!(address, ok, "ed25519 signature checked");
        Ok(ok)
    }
}

/// EIP-191 `personal_sign` over secp256k1, as EVM wallets sign it.
///
/// The signature is 65 bytes of hex (`r || s || v`, `v` as 0/1 or 27/28).
/// The signer is recovered from it and compared with the address
/// case-insensitively.
#[derive(Debug, Default, Clone, Copy)]
pub struct Eip191Verifier;

impl Eip191Verifier {
    /// Keccak-256 of the message behind the `personal_sign` prefix.
    pub fn message_hash(message: &str) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
        hasher.update(message.as_bytes());
        hasher.finalize().into()
    }

    /// `0x`-prefixed lowercase address of a public key.
    pub fn address_of(key: &EcdsaVerifyingKey) -> String {
        let point = key.to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        format!("0x{}", hex::encode(&digest[12..]))
    }

    fn recover(message: &str, signature: &str) -> Result<EcdsaVerifyingKey> {
        let raw = signature.trim();
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
            .map_err(|e| WardenError::InvalidSignature(format!("signature is not hex: {e}")))?;
        if bytes.len() != 65 {
            return Err(WardenError::InvalidSignature("signature must decode to 65 bytes".into()));
        }
        let sig = EcdsaSignature::from_slice(&bytes[..64])
            .map_err(|e| WardenError::InvalidSignature(format!("bad signature: {e}")))?;
        let v = match bytes[64] {
            27 | 28 => bytes[64] - 27,
            0 | 1 => bytes[64],
            other => {
                return Err(WardenError::InvalidSignature(format!(
                    "recovery id must be 0/1 or 27/28, got {other}"
                )));
            }
        };
        let recovery_id = RecoveryId::from_byte(v)
            .ok_or_else(|| WardenError::InvalidSignature("bad recovery id".into()))?;
        EcdsaVerifyingKey::recover_from_prehash(&Self::message_hash(message), &sig, recovery_id)
            .map_err(|e| WardenError::InvalidSignature(format!("signer not recoverable: {e}")))
    }
}

impl SignatureVerifier for Eip191Verifier {
    fn chain(&self) -> &str {
        "evm"
    }

    fn verify(&self, address: &str, message: &str, signature: &str) -> Result<bool> {
        let recovered = Self::address_of(&Self::recover(message, signature)?);
        let ok = recovered.eq_ignore_ascii_case(address.trim());
        debug!(address, %recovered, ok, "eip-191 signature checked");
        Ok(ok)
    }
}

/// Verifiers keyed by protocol chain name.
#[derive(Clone)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn SignatureVerifier>>,
}

impl Default for VerifierRegistry {
    fn default() -> Self {
        Self::new()
            .with(Arc::new(Ed25519Verifier))
            .with(Arc::new(Eip191Verifier))
    }
}

impl VerifierRegistry {
    /// An empty registry. [`Default`] registers the built-in Ed25519 and
    /// EIP-191 verifiers.
    pub fn new() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    pub fn with(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.register(verifier);
        self
    }

    pub fn register(&mut self, verifier: Arc<dyn SignatureVerifier>) {
        self.verifiers.insert(verifier.chain().to_string(), verifier);
    }

    /// Verify or fail with `INVALID_SIGNATURE`. A chain without a registered
    /// verifier cannot be verified and is rejected.
    pub fn check(&self, chain: &str, address: &str, message: &str, signature: &str) -> Result<()> {
        let Some(verifier) = self.verifiers.get(chain) else {
            return Err(WardenError::InvalidSignature(format!(
                "no signature verifier for chain '{chain}'"
            )));
        };
        match verifier.verify(address, message, signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(WardenError::InvalidSignature(
                "signature does not match message".into(),
            )),
            Err(WardenError::InvalidSignature(reason)) => Err(WardenError::InvalidSignature(reason)),
            Err(e) => Err(WardenError::InvalidSignature(e.to_string())),
        }
    }
}
