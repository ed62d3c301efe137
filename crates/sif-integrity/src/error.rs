//! Error types for the sif-integrity library.

/// Result type alias for operations that may return a [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by signing and verification operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No keyring, verifier set or suppressing callback was supplied.
    #[error("key material not provided")]
    NoKeyMaterial,

    /// The requested group does not exist in the image.
    #[error("group {0} not found")]
    GroupNotFound(u32),

    /// No signature object references the requested group or object.
    #[error("no signature found for {} {id}", if *is_group { "object group" } else { "object" })]
    SignatureNotFound {
        /// The requested group or object ID.
        id: u32,
        /// Whether `id` is a group ID.
        is_group: bool,
    },

    /// A signature failed verification.
    #[error("signature object {id} not valid: {source}")]
    SignatureNotValid {
        /// ID of the signature object.
        id: u32,
        /// The underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// No key in the key material produced the signature.
    #[error("signature made by unknown entity")]
    UnknownIssuer,

    /// An object listed in a signed message is missing from the image.
    #[error("signed object not found in image")]
    SignedObjectNotFound,

    /// A requested object is not covered by the signature.
    #[error("object {0} not covered by signature")]
    ObjectNotSigned(u32),

    /// A covered payload hashes to a different value than the signed one.
    #[error("object digest does not match")]
    DigestMismatch,

    /// A covered descriptor's metadata differs from the signed values.
    #[error("object metadata does not match")]
    MetadataMismatch,

    /// The signed header does not describe this image.
    #[error("image header does not match")]
    HeaderMismatch,

    /// A DSSE envelope carries an unexpected payload type.
    #[error("unexpected DSSE payload type: {0}")]
    UnexpectedPayloadType(String),

    /// A DSSE envelope failed signature verification.
    #[error("DSSE envelope verification failed")]
    VerifyEnvelopeFailed,

    /// The signers composing one envelope use different hash algorithms.
    #[error("multiple hash algorithms specified")]
    MultipleHashAlgorithms,

    /// A legacy signature message does not carry a `SIFHASH:` digest.
    #[error("invalid legacy signature message")]
    InvalidLegacyMessage,

    /// Error from the underlying container.
    #[error(transparent)]
    Sif(#[from] sif::Error),

    /// OpenPGP error.
    #[error("OpenPGP error: {0}")]
    Pgp(#[from] pgp::errors::Error),

    /// Raw signature scheme error.
    #[error("signature error: {0}")]
    Signature(#[from] signature::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps `self` as the cause of an invalid signature object.
    pub(crate) fn not_valid(self, id: u32) -> Error {
        Error::SignatureNotValid {
            id,
            source: Box::new(self),
        }
    }

    /// Returns the root cause of a [`Error::SignatureNotValid`] chain.
    pub fn signature_cause(&self) -> &Error {
        match self {
            Error::SignatureNotValid { source, .. } => source.signature_cause(),
            other => other,
        }
    }
}
