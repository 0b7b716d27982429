// auth-gateway/src/signature/recovery.rs
//! Ethereum signature recovery for signature blobs of unknown encoding.
//!
//! Wallet clients disagree on how a `personal_sign` result is delivered, and the blob
//! carries no tag saying which encoding it uses. [`recover`] therefore runs a fixed
//! cascade of strategies and stops at the first one that yields an address:
//!
//! 1. [`RecoveryStage::Standard`]: 65-byte `r‖s‖v` hex with `v ∈ {27, 28}` over the
//!    EIP-191 hash of the message.
//! 2. [`RecoveryStage::NormalizedRecoveryId`]: same, but `v ∈ {0, 1}` is shifted by 27.
//! 3. [`RecoveryStage::EmbeddedJson`]: the hex decodes to bytes holding a `{...}` span.
//!    A `signature` / `response.signature` field inside it is tried first, then the 65
//!    bytes directly in front of the span (WebAuthn-style wrapping).
//! 4. [`RecoveryStage::RawHash`]: the 65 bytes are tried against digests that skip the
//!    EIP-191 prefix convention (`eth_sign`-style clients).
//! 5. [`RecoveryStage::JsonString`]: the blob is not hex but a JSON document (or JSON
//!    string) that wraps the real signature.
//!
//! Each stage is a pure function returning `Option`; a failure only moves the cascade on.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde_json::Value;
use sha3::{Digest, Keccak256};

use common::models::WalletAddress;

/// Length of an `r‖s‖v` signature
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Standard,
    NormalizedRecoveryId,
    EmbeddedJson,
    RawHash,
    JsonString,
}

impl RecoveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStage::Standard => "standard",
            RecoveryStage::NormalizedRecoveryId => "normalized_recovery_id",
            RecoveryStage::EmbeddedJson => "embedded_json",
            RecoveryStage::RawHash => "raw_hash",
            RecoveryStage::JsonString => "json_string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredSigner {
    pub address: WalletAddress,
    pub stage: RecoveryStage,
    /// Whether the recovered address equals the one the client claimed
    pub matches_claim: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered(RecoveredSigner),
    NotRecovered,
}

/// Inputs shared by every stage
struct Attempt<'a> {
    message: &'a str,
    blob: &'a str,
    digest: [u8; 32],
    decoded: Option<Vec<u8>>,
}

type StageFn = fn(&Attempt<'_>) -> Option<WalletAddress>;

const CASCADE: [(RecoveryStage, StageFn); 5] = [
    (RecoveryStage::Standard, standard_stage),
    (RecoveryStage::NormalizedRecoveryId, normalized_stage),
    (RecoveryStage::EmbeddedJson, embedded_json_stage),
    (RecoveryStage::RawHash, raw_hash_stage),
    (RecoveryStage::JsonString, json_string_stage),
];

/// Recover the signer of `message` from `blob`.
///
/// Never fails: every parse or curve error collapses into [`RecoveryOutcome::NotRecovered`].
/// Any 65-byte blob recovers to *some* key under the wrong digest, so every stage runs until
/// one yields the claimed address. Without a match the first recovered address is returned,
/// flagged through [`RecoveredSigner::matches_claim`]; the caller decides whether that is
/// acceptable.
pub fn recover(claimed: &str, message: &str, blob: &str) -> RecoveryOutcome {
    let attempt = Attempt {
        message,
        blob: blob.trim(),
        digest: personal_message_hash(message.as_bytes()),
        decoded: decode_hex(blob),
    };
    let claimed_address = claimed.parse::<WalletAddress>().ok();
    let mut first_mismatch = None;

    for (stage, run) in CASCADE {
        let Some(address) = run(&attempt) else {
            tracing::debug!("Signature recovery stage {} did not apply", stage.as_str());
            continue;
        };

        if claimed_address == Some(address) {
            tracing::debug!("Recovered {} via {} stage", address, stage.as_str());
            return RecoveryOutcome::Recovered(RecoveredSigner {
                address,
                stage,
                matches_claim: true,
            });
        }

        tracing::debug!("Stage {} recovered {}, not the claimed address", stage.as_str(), address);
        first_mismatch.get_or_insert(RecoveredSigner {
            address,
            stage,
            matches_claim: false,
        });
    }

    match first_mismatch {
        Some(signer) => {
            tracing::warn!(
                "Claimed address and recovered address mismatch: claimed {}, recovered {} (stage {})",
                claimed.trim().to_lowercase(),
                signer.address,
                signer.stage.as_str()
            );
            RecoveryOutcome::Recovered(signer)
        }
        None => RecoveryOutcome::NotRecovered,
    }
}

/// Whether the blob is in any encoding the cascade understands (hex or JSON).
pub fn is_recognised_encoding(blob: &str) -> bool {
    decode_hex(blob).is_some() || serde_json::from_str::<Value>(blob.trim()).is_ok()
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 `personal_sign` digest: `keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ message)`
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Ethereum address of a public key: the last 20 bytes of keccak256 over the uncompressed point.
pub fn address_from_key(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    WalletAddress::from_bytes(address)
}

/// Hex-decode a blob, tolerating whitespace and a `0x` prefix.
pub fn decode_hex(blob: &str) -> Option<Vec<u8>> {
    let blob = blob.trim();
    let digits = blob
        .strip_prefix("0x")
        .or_else(|| blob.strip_prefix("0X"))
        .unwrap_or(blob);

    if digits.is_empty() {
        return None;
    }
    hex::decode(digits).ok()
}

/// ecrecover with an Ethereum-style `v` of 27 or 28.
///
/// High-s signatures are folded to low-s with the recovery id flipped, so both halves of
/// the curve recover the same key as Ethereum's precompile would.
fn ecrecover(digest: &[u8; 32], sig: &[u8], v: u8) -> Option<WalletAddress> {
    if sig.len() != SIGNATURE_LEN {
        return None;
    }
    let parity = match v {
        27 => 0,
        28 => 1,
        _ => return None,
    };

    let signature = Signature::from_slice(&sig[..64]).ok()?;
    let recovery_id = RecoveryId::from_byte(parity)?;
    let (signature, recovery_id) = match signature.normalize_s() {
        Some(low) => (
            low,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        ),
        None => (signature, recovery_id),
    };

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id).ok()?;
    Some(address_from_key(&key))
}

fn recover_canonical(digest: &[u8; 32], sig: &[u8]) -> Option<WalletAddress> {
    let v = *sig.get(SIGNATURE_LEN - 1)?;
    ecrecover(digest, sig, v)
}

fn recover_normalized(digest: &[u8; 32], sig: &[u8]) -> Option<WalletAddress> {
    let v = *sig.get(SIGNATURE_LEN - 1)?;
    if v >= 27 {
        return None;
    }
    ecrecover(digest, sig, v + 27)
}

/// Canonical first, then normalized recovery id
fn recover_any_v(digest: &[u8; 32], sig: &[u8]) -> Option<WalletAddress> {
    recover_canonical(digest, sig).or_else(|| recover_normalized(digest, sig))
}

/// A hex signature nested in JSON: `signature` or `response.signature`
fn nested_signature(value: &Value) -> Option<&str> {
    value
        .get("signature")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("response")
                .and_then(|response| response.get("signature"))
                .and_then(Value::as_str)
        })
}

fn recover_nested(digest: &[u8; 32], value: &Value) -> Option<WalletAddress> {
    let nested = match value {
        Value::String(s) => s.as_str(),
        other => nested_signature(other)?,
    };
    let bytes = decode_hex(nested)?;
    recover_any_v(digest, &bytes)
}

/// Locate the first `{` from which the bytes up to the last `}` parse as JSON.
fn find_json_span(bytes: &[u8]) -> Option<(usize, Value)> {
    let end = bytes.iter().rposition(|b| *b == b'}')? + 1;

    bytes[..end]
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{')
        .find_map(|(start, _)| {
            serde_json::from_slice::<Value>(&bytes[start..end])
                .ok()
                .map(|value| (start, value))
        })
}

fn standard_stage(attempt: &Attempt<'_>) -> Option<WalletAddress> {
    recover_canonical(&attempt.digest, attempt.decoded.as_deref()?)
}

fn normalized_stage(attempt: &Attempt<'_>) -> Option<WalletAddress> {
    recover_normalized(&attempt.digest, attempt.decoded.as_deref()?)
}

fn embedded_json_stage(attempt: &Attempt<'_>) -> Option<WalletAddress> {
    let bytes = attempt.decoded.as_deref()?;
    let (start, value) = find_json_span(bytes)?;

    if let Some(address) = recover_nested(&attempt.digest, &value) {
        return Some(address);
    }

    // wallets that prepend the raw signature to their JSON envelope
    let preceding = bytes.get(start.checked_sub(SIGNATURE_LEN)?..start)?;
    recover_any_v(&attempt.digest, preceding)
}

fn raw_hash_stage(attempt: &Attempt<'_>) -> Option<WalletAddress> {
    let sig = attempt.decoded.as_deref()?;
    if sig.len() != SIGNATURE_LEN {
        return None;
    }

    let mut digests = vec![keccak256(attempt.message.as_bytes())];
    // a hex message is usually a payload the wallet signed as bytes
    if let Some(payload) = decode_hex(attempt.message) {
        digests.push(personal_message_hash(&payload));
        if payload.len() == 32 {
            let mut prehashed = [0u8; 32];
            prehashed.copy_from_slice(&payload);
            digests.push(prehashed);
        }
    }

    digests
        .iter()
        .find_map(|digest| recover_any_v(digest, sig))
}

fn json_string_stage(attempt: &Attempt<'_>) -> Option<WalletAddress> {
    if attempt.decoded.is_some() {
        return None;
    }
    let value: Value = serde_json::from_str(attempt.blob).ok()?;
    recover_nested(&attempt.digest, &value)
}
