//! Dead Simple Signing Envelope (DSSE) encoding and verification.
//!
//! Envelopes carry the canonical image metadata message with the fixed
//! payload type [`PAYLOAD_TYPE`].  Signers are pluggable; concrete Ed25519
//! implementations are provided, plus adapters over the `signature` crate
//! traits for ECDSA/RSA-style schemes.

use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use sif::HashType;

use crate::{Error, Result};

/// The payload media type of SIF metadata envelopes.
pub const PAYLOAD_TYPE: &str = "application/vnd.sylabs.sif-metadata+json";

/// The hash function a signer applies before producing a signature.
///
/// `None` is advertised by algorithms that sign the raw message, such as
/// Ed25519.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFunc {
    /// No pre-hashing.
    None,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashFunc {
    /// The descriptor hash type recording this function.  The descriptor
    /// can only express the closed hash enum, so hash-less signers are
    /// recorded as SHA-256, matching the per-object digests used in that
    /// case.
    pub fn hash_type(self) -> HashType {
        match self {
            HashFunc::None | HashFunc::Sha256 => HashType::Sha256,
            HashFunc::Sha384 => HashType::Sha384,
            HashFunc::Sha512 => HashType::Sha512,
        }
    }
}

/// Computes the DSSE key ID: hex SHA-256 over the public key bytes.
pub fn key_id(public_key: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key))
}

/// A DSSE message signer.
pub trait Signer {
    /// Signs the pre-authentication-encoded message.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// The encoded public key, used to derive the key ID.
    fn public_key(&self) -> Vec<u8>;

    /// The hash function this signer applies.
    fn hash_func(&self) -> HashFunc;

    /// The key ID recorded alongside each signature.
    fn key_id(&self) -> String {
        key_id(&self.public_key())
    }
}

/// A DSSE message verifier.
pub trait Verifier {
    /// Verifies `signature` over the pre-authentication-encoded message.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()>;

    /// The encoded public key, used to derive the key ID.
    fn public_key(&self) -> Vec<u8>;

    /// The key ID this verifier accepts.
    fn key_id(&self) -> String {
        key_id(&self.public_key())
    }
}

/// Ed25519 signer over a raw 32-byte secret key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Creates a signer from raw secret key bytes.
    pub fn new(secret: &[u8; 32]) -> Self {
        Ed25519Signer {
            key: SigningKey::from_bytes(secret),
        }
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }

    fn hash_func(&self) -> HashFunc {
        HashFunc::None
    }
}

/// Ed25519 verifier over a raw 32-byte public key.
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Creates a verifier from raw public key bytes.
    pub fn new(public: &[u8; 32]) -> Result<Self> {
        Ok(Ed25519Verifier {
            key: VerifyingKey::from_bytes(public).map_err(Error::Signature)?,
        })
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_slice(sig)?;
        self.key.verify(message, &sig)?;
        Ok(())
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }
}

/// Adapter turning any [`signature::Signer`] into a DSSE signer.
///
/// The wrapped scheme is expected to handle its own digesting;
/// `hash_func` only names the algorithm for envelope agreement and the
/// signature descriptor.
pub struct SignatureSigner<S, Sig> {
    signer: S,
    public_key: Vec<u8>,
    hash: HashFunc,
    _sig: PhantomData<Sig>,
}

impl<S, Sig> SignatureSigner<S, Sig> {
    /// Wraps `signer` with its encoded public key and hash function.
    pub fn new(signer: S, public_key: Vec<u8>, hash: HashFunc) -> Self {
        SignatureSigner {
            signer,
            public_key,
            hash,
            _sig: PhantomData,
        }
    }
}

impl<S, Sig> Signer for SignatureSigner<S, Sig>
where
    S: signature::Signer<Sig>,
    Sig: signature::SignatureEncoding,
{
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signer.try_sign(message)?.to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key.clone()
    }

    fn hash_func(&self) -> HashFunc {
        self.hash
    }
}

/// Adapter turning any [`signature::Verifier`] into a DSSE verifier.
pub struct SignatureVerifier<V, Sig> {
    verifier: V,
    public_key: Vec<u8>,
    _sig: PhantomData<Sig>,
}

impl<V, Sig> SignatureVerifier<V, Sig> {
    /// Wraps `verifier` with its encoded public key.
    pub fn new(verifier: V, public_key: Vec<u8>) -> Self {
        SignatureVerifier {
            verifier,
            public_key,
            _sig: PhantomData,
        }
    }
}

impl<V, Sig> Verifier for SignatureVerifier<V, Sig>
where
    V: signature::Verifier<Sig>,
    Sig: signature::SignatureEncoding + for<'a> TryFrom<&'a [u8], Error = signature::Error>,
{
    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()> {
        let sig = Sig::try_from(sig)?;
        self.verifier.verify(message, &sig)?;
        Ok(())
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EnvelopeSignature {
    pub keyid: String,
    pub sig: String,
}

/// DSSE v1 pre-authentication encoding.
fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Signs canonical messages into DSSE envelopes.
pub struct DsseEncoder {
    signers: Vec<Box<dyn Signer>>,
    hash: HashFunc,
}

impl DsseEncoder {
    /// Creates an encoder from one or more signers.
    ///
    /// All signers must agree on the hash function, since the signature
    /// descriptor can only record one value.
    pub fn new(signers: Vec<Box<dyn Signer>>) -> Result<Self> {
        let Some(first) = signers.first() else {
            return Err(Error::NoKeyMaterial);
        };
        let hash = first.hash_func();
        if signers.iter().any(|s| s.hash_func() != hash) {
            return Err(Error::MultipleHashAlgorithms);
        }
        Ok(DsseEncoder { signers, hash })
    }

    /// The hash type recorded in signature descriptors produced with this
    /// encoder.
    pub fn hash_type(&self) -> HashType {
        self.hash.hash_type()
    }

    /// The key ID of the first signer, recorded in the signature
    /// descriptor's entity field.
    pub(crate) fn primary_key_id(&self) -> Vec<u8> {
        Sha256::digest(self.signers[0].public_key()).to_vec()
    }

    /// Signs `message` into a JSON envelope.
    pub(crate) fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let pae = pae(PAYLOAD_TYPE, message);
        let mut signatures = Vec::with_capacity(self.signers.len());
        for signer in &self.signers {
            signatures.push(EnvelopeSignature {
                keyid: signer.key_id(),
                sig: BASE64.encode(signer.sign(&pae)?),
            });
        }
        Ok(serde_json::to_vec(&Envelope {
            payload_type: PAYLOAD_TYPE.into(),
            payload: BASE64.encode(message),
            signatures,
        })?)
    }
}

/// Verifies DSSE envelopes against a set of verifiers.
pub struct DsseDecoder {
    verifiers: Vec<Box<dyn Verifier>>,
    threshold: usize,
}

impl DsseDecoder {
    /// Creates a decoder accepting envelopes carrying at least one valid
    /// signature.
    pub fn new(verifiers: Vec<Box<dyn Verifier>>) -> Self {
        DsseDecoder {
            verifiers,
            threshold: 1,
        }
    }

    /// Requires at least `threshold` verifiers to accept an envelope.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Verifies `raw` and returns the decoded payload together with the
    /// public keys that accepted it.
    ///
    /// Signature verification runs against the envelope's own payload type
    /// first; the type is compared to [`PAYLOAD_TYPE`] only afterwards, so
    /// a validly re-signed envelope with a foreign type is reported as
    /// [`Error::UnexpectedPayloadType`].
    pub(crate) fn verify_message(&self, raw: &[u8]) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        let payload = BASE64
            .decode(&envelope.payload)
            .map_err(|_| Error::VerifyEnvelopeFailed)?;
        let pae = pae(&envelope.payload_type, &payload);

        let mut accepted = Vec::new();
        for verifier in &self.verifiers {
            let vkid = verifier.key_id();
            let ok = envelope.signatures.iter().any(|s| {
                if !s.keyid.is_empty() && s.keyid != vkid {
                    return false;
                }
                match BASE64.decode(&s.sig) {
                    Ok(sig) => verifier.verify(&pae, &sig).is_ok(),
                    Err(_) => false,
                }
            });
            if ok {
                accepted.push(verifier.public_key());
            }
        }

        if accepted.len() < self.threshold {
            return Err(Error::VerifyEnvelopeFailed);
        }
        if envelope.payload_type != PAYLOAD_TYPE {
            return Err(Error::UnexpectedPayloadType(envelope.payload_type));
        }
        Ok((payload, accepted))
    }
}

/// Returns true if `data` parses as a DSSE envelope with the SIF metadata
/// payload type.  The probe never consumes or mutates anything.
pub fn is_dsse_signature(data: &[u8]) -> bool {
    match serde_json::from_slice::<Envelope>(data) {
        Ok(e) => e.payload_type == PAYLOAD_TYPE,
        Err(_) => false,
    }
}
