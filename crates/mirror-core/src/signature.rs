//! Verifying a detached signature over a checksum manifest against a
//! [`SigningKeyset`].
//!
//! Keys are tried in list order. An issuer-key-id mismatch is the one
//! non-fatal failure: it means this particular key isn't the one that
//! produced the signature, so the verifier moves on. Any other failure
//! (a key that fails to decode, or a key whose id matches but whose
//! cryptographic verification fails) aborts the whole check immediately.

use mirror_schema::SigningKeyset;
use pgp::composed::{Deserializable, SignedPublicKey, StandaloneSignature};
use thiserror::Error;

/// Errors from [`verify`].
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signature bytes themselves could not be parsed as an OpenPGP
    /// detached signature packet.
    #[error("failed to decode detached signature: {0}")]
    InvalidSignature(String),

    /// An armored public key in the keyset could not be decoded.
    #[error("failed to decode signing key {key_id}: {source}")]
    InvalidKey {
        /// The key id of the key that failed to decode.
        key_id: String,
        /// The underlying decode error.
        source: String,
    },

    /// A key whose id matched the signature's issuer failed cryptographic
    /// verification.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// No key in the set verified the signature (including an empty
    /// keyset, which always fails this way).
    #[error("no signing key verified the manifest signature")]
    NoValidKey,
}

fn key_id_hex(public_key: &SignedPublicKey) -> String {
    hex::encode(public_key.key_id().as_ref())
}

/// Verify `signature_bytes` (a raw, binary detached OpenPGP signature)
/// over `manifest_bytes` against the armored public keys in `keyset`,
/// trying keys in order and skipping past issuer-id mismatches.
///
/// # Errors
///
/// Returns [`SignatureError::NoValidKey`] if the keyset is empty or is
/// exhausted without a match. Returns [`SignatureError::InvalidSignature`],
/// [`SignatureError::InvalidKey`], or [`SignatureError::VerificationFailed`]
/// for any failure other than an issuer mismatch, which aborts the whole
/// check rather than advancing to the next key.
pub fn verify(
    manifest_bytes: &[u8],
    signature_bytes: &[u8],
    keyset: &SigningKeyset,
) -> Result<(), SignatureError> {
    let (signature, _headers) = StandaloneSignature::from_bytes(signature_bytes)
        .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;

    let issuer = signature
        .signature
        .issuer()
        .into_iter()
        .next()
        .map(|id| hex::encode(id.as_ref()));

    for key in &keyset.keys {
        let public_key =
            match SignedPublicKey::from_armor_single(std::io::Cursor::new(key.ascii_armor.as_bytes()))
            {
                Ok((public_key, _headers)) => public_key,
                Err(err) => {
                    return Err(SignatureError::InvalidKey {
                        key_id: key.key_id.clone(),
                        source: err.to_string(),
                    });
                }
            };

        if let Some(issuer) = &issuer {
            let candidate_id = key_id_hex(&public_key);
            if !candidate_id.eq_ignore_ascii_case(issuer) && !key.key_id.eq_ignore_ascii_case(issuer)
            {
                // Issuer key id does not match this candidate -- try the
                // next key in the set rather than failing outright.
                continue;
            }
        }

        return signature
            .signature
            .verify(&public_key, manifest_bytes)
            .map_err(|err| SignatureError::VerificationFailed(err.to_string()));
    }

    Err(SignatureError::NoValidKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_signature_bytes_fail_to_decode_even_with_empty_keyset() {
        // Signature-bytes decoding happens before any key is consulted, so
        // this is reachable regardless of keyset contents -- including the
        // empty keyset, which never gets far enough to hit `NoValidKey`
        // without a genuinely decodable signature.
        let keyset = SigningKeyset::default();
        let err = verify(b"data", b"not-a-sig", &keyset).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidSignature(_)));
    }

    #[test]
    fn garbage_signature_bytes_fail_to_decode_with_nonempty_keyset() {
        let keyset = SigningKeyset {
            keys: vec![mirror_schema::GpgPublicKey {
                key_id: "ABC123".into(),
                ascii_armor: "not-armored-either".into(),
                source: String::new(),
                source_url: String::new(),
            }],
        };
        let err = verify(b"manifest bytes", b"not-a-sig", &keyset).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidSignature(_)));
    }
}
