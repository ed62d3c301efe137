//! Signing and verification of SIF image objects.
//!
//! Objects are signed at the granularity of object groups.  A signature
//! covers a canonical JSON message describing the group's descriptors and
//! payload digests, and is stored back into the image as an ungrouped
//! signature object linked to the group.  Two envelope schemes coexist:
//! OpenPGP clearsign for compatibility and DSSE for modern key material;
//! verification picks the codec per signature by probing for a DSSE
//! envelope.
//!
//! ```no_run
//! use sif::{Image, LoadOpts};
//! use sif_integrity::{Verifier, VerifierOpts};
//!
//! # fn main() -> sif_integrity::Result<()> {
//! # let keyring = vec![];
//! let image = Image::load_from_path("image.sif", LoadOpts::new())?;
//! let mut verifier = Verifier::new(&image, VerifierOpts::new().with_keyring(keyring))?;
//! verifier.verify()?;
//! # Ok(())
//! # }
//! ```

mod clearsign;
pub mod digest;
pub mod dsse;
pub mod error;
pub mod metadata;
pub mod sign;
pub mod verify;

pub use digest::ObjectDigest;
pub use error::{Error, Result};
pub use metadata::{HeaderMetadata, ImageMetadata, ObjectMetadata};
pub use sign::{Signer, SignerOpts};
pub use verify::{Verifier, VerifierOpts, VerifyCallback, VerifyResult};
