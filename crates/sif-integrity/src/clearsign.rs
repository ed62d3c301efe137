//! OpenPGP clearsign envelopes over canonical messages.
//!
//! The clearsign scheme is the compatibility path: the signed text is the
//! canonical JSON message (or, for legacy signatures, a `SIFHASH:` digest
//! line), wrapped in an armored OpenPGP cleartext signature framework.

use pgp::cleartext::CleartextSignedMessage;
use pgp::composed::{SignedPublicKey, SignedSecretKey};
use pgp::types::KeyTrait;
use pgp::ArmorOptions;

use crate::{Error, Result};

/// Clearsigns `message` with `key`, returning the armored envelope and the
/// signing key's fingerprint.
///
/// The signature hash is SHA-256, which is also what gets recorded in the
/// signature descriptor.
pub(crate) fn sign_message(message: &str, key: &SignedSecretKey) -> Result<(Vec<u8>, Vec<u8>)> {
    let signed = CleartextSignedMessage::sign(message, key, String::new)?;
    let armored = signed.to_armored_string(ArmorOptions::default())?;
    Ok((armored.into_bytes(), key.fingerprint()))
}

/// Verifies the armored clearsign envelope in `data` against `keyring`.
///
/// Returns the signed text and the keyring entry that produced the
/// signature; [`Error::UnknownIssuer`] when no key matches.
pub(crate) fn verify_message<'k>(
    data: &[u8],
    keyring: &'k [SignedPublicKey],
) -> Result<(String, &'k SignedPublicKey)> {
    let armored = std::str::from_utf8(data).map_err(|_| Error::UnknownIssuer)?;
    let (message, _headers) = CleartextSignedMessage::from_string(armored)?;

    for key in keyring {
        if message.verify(key).is_ok() {
            return Ok((message.signed_text(), key));
        }
        // Signatures may also come from a signing subkey.
        for subkey in &key.public_subkeys {
            if message.verify(subkey).is_ok() {
                return Ok((message.signed_text(), key));
            }
        }
    }

    Err(Error::UnknownIssuer)
}

/// Formats the body of a legacy signature message.
pub(crate) fn legacy_message(digest_hex: &str) -> String {
    format!("SIFHASH:\n{digest_hex}")
}

/// Extracts the digest from a legacy `SIFHASH:` message body.
pub(crate) fn parse_legacy_message(text: &str) -> Result<Vec<u8>> {
    let rest = text
        .trim()
        .strip_prefix("SIFHASH:")
        .ok_or(Error::InvalidLegacyMessage)?;
    hex::decode(rest.trim()).map_err(|_| Error::InvalidLegacyMessage)
}
