//! Verification orchestration: task planning, policies and aggregation.
//!
//! Three linking conventions coexist for historical reasons: group
//! signatures over a canonical message, legacy group signatures over
//! concatenated payloads, and legacy per-object signatures.  Each is a
//! variant of the [`VerifyTask`] trait with its own signature-selection
//! and verified-set logic.  The codec for a group signature is chosen per
//! signature object by a non-destructive DSSE probe on its payload.

use pgp::composed::SignedPublicKey;
use pgp::types::KeyTrait;
use sif::{ContainerStore, DataType, Descriptor, Image, Selector, ENTITY_LEN};

use crate::{
    clearsign,
    digest::Hasher,
    dsse::{self, DsseDecoder},
    metadata::ImageMetadata,
    Error, Result,
};

/// The outcome of verifying one signature object, delivered to the
/// verification callback.
pub struct VerifyResult {
    /// The signature object that was processed.
    pub signature: Descriptor,
    /// The descriptors covered and successfully verified.
    pub verified: Vec<Descriptor>,
    /// Fingerprint of the OpenPGP entity that signed, if clearsign.
    pub entity: Option<Vec<u8>>,
    /// Public keys that accepted the envelope, if DSSE.
    pub keys: Vec<Vec<u8>>,
    /// The verification error, if any.
    pub error: Option<Error>,
}

/// Callback invoked with each per-signature result.  Returning `true`
/// suppresses that signature's error.
pub type VerifyCallback<'a> = Box<dyn FnMut(&VerifyResult) -> bool + 'a>;

struct KeyMaterial<'k> {
    keyring: &'k [SignedPublicKey],
    dsse: &'k DsseDecoder,
}

struct Verified {
    descriptors: Vec<Descriptor>,
    entity: Option<Vec<u8>>,
    keys: Vec<Vec<u8>>,
}

trait VerifyTask<S: ContainerStore> {
    /// The signature objects this task must check.
    fn signatures(&self, image: &Image<S>) -> Result<Vec<Descriptor>>;

    /// Verifies one signature object.
    fn verify_signature(
        &self,
        image: &Image<S>,
        sig: &Descriptor,
        keys: &KeyMaterial<'_>,
    ) -> Result<Verified>;
}

/// Verifies a group signature whose body is the canonical message.
struct GroupVerifier {
    group_id: u32,
    objects: Vec<Descriptor>,
    /// Set when the caller selected explicit objects: the signature may
    /// cover a superset of the requested objects.
    subset: bool,
}

impl GroupVerifier {
    fn check_coverage<S: ContainerStore>(
        &self,
        image: &Image<S>,
        metadata: &ImageMetadata,
    ) -> Result<Vec<Descriptor>> {
        let signed = metadata.object_ids();
        let requested: Vec<u32> = self.objects.iter().map(Descriptor::id).collect();
        for id in &requested {
            if !signed.contains(id) {
                return Err(Error::ObjectNotSigned(*id));
            }
        }
        if self.subset {
            metadata.verify_objects(image, Some(requested.as_slice()))
        } else {
            metadata.verify_objects(image, None)
        }
    }
}

impl<S: ContainerStore> VerifyTask<S> for GroupVerifier {
    fn signatures(&self, image: &Image<S>) -> Result<Vec<Descriptor>> {
        let sigs = image.descriptors(
            &Selector::new()
                .with_data_type(DataType::Signature)
                .with_linked_group_id(self.group_id),
        )?;
        if sigs.is_empty() {
            return Err(Error::SignatureNotFound {
                id: self.group_id,
                is_group: true,
            });
        }
        Ok(sigs)
    }

    fn verify_signature(
        &self,
        image: &Image<S>,
        sig: &Descriptor,
        keys: &KeyMaterial<'_>,
    ) -> Result<Verified> {
        let data = image.data(sig).map_err(|e| Error::from(e).not_valid(sig.id()))?;

        let inner = (|| {
            if dsse::is_dsse_signature(&data) {
                let (payload, accepted) = keys.dsse.verify_message(&data)?;
                let metadata: ImageMetadata = serde_json::from_slice(&payload)?;
                let descriptors = self.check_coverage(image, &metadata)?;
                Ok(Verified {
                    descriptors,
                    entity: None,
                    keys: accepted,
                })
            } else {
                let (text, key) = clearsign::verify_message(&data, keys.keyring)?;
                let metadata: ImageMetadata = serde_json::from_slice(text.as_bytes())?;
                let descriptors = self.check_coverage(image, &metadata)?;
                Ok(Verified {
                    descriptors,
                    entity: Some(key.fingerprint()),
                    keys: Vec::new(),
                })
            }
        })();

        inner.map_err(|e: Error| e.not_valid(sig.id()))
    }
}

/// Verifies a legacy group signature over the concatenated payloads of a
/// whole group.
struct LegacyGroupVerifier {
    group_id: u32,
    objects: Vec<Descriptor>,
}

impl<S: ContainerStore> VerifyTask<S> for LegacyGroupVerifier {
    fn signatures(&self, image: &Image<S>) -> Result<Vec<Descriptor>> {
        let sigs = image.descriptors(
            &Selector::new()
                .with_data_type(DataType::Signature)
                .with_linked_group_id(self.group_id),
        )?;
        if sigs.is_empty() {
            return Err(Error::SignatureNotFound {
                id: self.group_id,
                is_group: true,
            });
        }
        Ok(sigs)
    }

    fn verify_signature(
        &self,
        image: &Image<S>,
        sig: &Descriptor,
        keys: &KeyMaterial<'_>,
    ) -> Result<Verified> {
        verify_legacy(image, sig, keys, &self.objects).map_err(|e| e.not_valid(sig.id()))
    }
}

/// Verifies a legacy per-object signature, linked by object ID.
struct LegacyObjectVerifier {
    descriptor: Descriptor,
}

impl<S: ContainerStore> VerifyTask<S> for LegacyObjectVerifier {
    fn signatures(&self, image: &Image<S>) -> Result<Vec<Descriptor>> {
        let sigs = image.descriptors(
            &Selector::new()
                .with_data_type(DataType::Signature)
                .with_linked_id(self.descriptor.id()),
        )?;
        if sigs.is_empty() {
            return Err(Error::SignatureNotFound {
                id: self.descriptor.id(),
                is_group: false,
            });
        }
        Ok(sigs)
    }

    fn verify_signature(
        &self,
        image: &Image<S>,
        sig: &Descriptor,
        keys: &KeyMaterial<'_>,
    ) -> Result<Verified> {
        verify_legacy(image, sig, keys, std::slice::from_ref(&self.descriptor))
            .map_err(|e| e.not_valid(sig.id()))
    }
}

/// Shared legacy verification: clearsigned `SIFHASH:` digest over the
/// concatenated payloads of `objects`.
fn verify_legacy<S: ContainerStore>(
    image: &Image<S>,
    sig: &Descriptor,
    keys: &KeyMaterial<'_>,
    objects: &[Descriptor],
) -> Result<Verified> {
    let (hash, _) = sig.signature_metadata()?;
    let data = image.data(sig)?;

    let (text, key) = clearsign::verify_message(&data, keys.keyring)?;
    let want = clearsign::parse_legacy_message(&text)?;

    let mut hasher = Hasher::new(hash);
    let mut sorted: Vec<&Descriptor> = objects.iter().collect();
    sorted.sort_by_key(|d| d.id());
    for d in &sorted {
        hasher.update_reader(image.reader(d)?)?;
    }
    if hasher.finalize() != want {
        return Err(Error::DigestMismatch);
    }

    Ok(Verified {
        descriptors: objects.to_vec(),
        entity: Some(key.fingerprint()),
        keys: Vec::new(),
    })
}

/// Options controlling verification.
#[derive(Default)]
pub struct VerifierOpts<'a> {
    keyring: Vec<SignedPublicKey>,
    dsse_verifiers: Vec<Box<dyn dsse::Verifier>>,
    dsse_threshold: usize,
    groups: Vec<u32>,
    objects: Vec<u32>,
    legacy: bool,
    legacy_all: bool,
    callback: Option<VerifyCallback<'a>>,
}

impl<'a> VerifierOpts<'a> {
    /// Creates the default option set: verify every object group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies OpenPGP public keys for clearsign verification.
    pub fn with_keyring(mut self, keyring: Vec<SignedPublicKey>) -> Self {
        self.keyring = keyring;
        self
    }

    /// Supplies DSSE verifiers.
    pub fn with_dsse_verifiers(mut self, verifiers: Vec<Box<dyn dsse::Verifier>>) -> Self {
        self.dsse_verifiers = verifiers;
        self
    }

    /// Requires at least `threshold` DSSE verifiers to accept an envelope.
    pub fn dsse_threshold(mut self, threshold: usize) -> Self {
        self.dsse_threshold = threshold;
        self
    }

    /// Verifies only the given object group.  May be applied repeatedly.
    pub fn group(mut self, group_id: u32) -> Self {
        self.groups.push(group_id);
        self
    }

    /// Verifies only the given object; the covering group signature may
    /// span a superset of the requested objects.
    pub fn object(mut self, id: u32) -> Self {
        self.objects.push(id);
        self
    }

    /// Verifies legacy signatures instead of canonical-message signatures.
    /// By default only the primary system partition is checked.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Verifies legacy signatures for all data objects.
    pub fn legacy_all(mut self) -> Self {
        self.legacy = true;
        self.legacy_all = true;
        self
    }

    /// Installs a per-signature result callback.  Returning `true`
    /// suppresses that signature's verification error.
    pub fn callback(mut self, cb: impl FnMut(&VerifyResult) -> bool + 'a) -> Self {
        self.callback = Some(Box::new(cb));
        self
    }
}

/// Verifies digital signatures over subsets of image objects.
pub struct Verifier<'a, S> {
    image: &'a Image<S>,
    keyring: Vec<SignedPublicKey>,
    dsse: DsseDecoder,
    has_dsse_verifiers: bool,
    tasks: Vec<Box<dyn VerifyTask<S>>>,
    callback: Option<VerifyCallback<'a>>,
}

impl<'a, S: ContainerStore> Verifier<'a, S> {
    /// Plans verification work over `image` according to `opts`.
    pub fn new(image: &'a Image<S>, opts: VerifierOpts<'a>) -> Result<Self> {
        if image.descriptor_count() == 0 {
            return Err(Error::Sif(sif::Error::NoObjects));
        }

        let mut tasks: Vec<Box<dyn VerifyTask<S>>> = Vec::new();

        if !opts.groups.is_empty() || !opts.objects.is_empty() {
            for group_id in &opts.groups {
                let objects = group_objects(image, *group_id)?;
                if opts.legacy {
                    tasks.push(Box::new(LegacyGroupVerifier {
                        group_id: *group_id,
                        objects,
                    }));
                } else {
                    tasks.push(Box::new(GroupVerifier {
                        group_id: *group_id,
                        objects,
                        subset: false,
                    }));
                }
            }
            for id in &opts.objects {
                let descriptor = image.descriptor(&Selector::new().with_id(*id))?;
                if opts.legacy {
                    tasks.push(Box::new(LegacyObjectVerifier { descriptor }));
                } else {
                    let group_id = descriptor.group_id();
                    if group_id == 0 {
                        return Err(Error::Sif(sif::Error::NoGroupsFound));
                    }
                    tasks.push(Box::new(GroupVerifier {
                        group_id,
                        objects: vec![descriptor],
                        subset: true,
                    }));
                }
            }
        } else if opts.legacy_all {
            for d in image.descriptors_iter() {
                if d.data_type() != DataType::Signature {
                    tasks.push(Box::new(LegacyObjectVerifier {
                        descriptor: d.clone(),
                    }));
                }
            }
        } else if opts.legacy {
            let descriptor = image.primary_partition()?;
            tasks.push(Box::new(LegacyObjectVerifier { descriptor }));
        } else {
            let groups = image.group_ids();
            if groups.is_empty() {
                return Err(Error::Sif(sif::Error::NoGroupsFound));
            }
            for group_id in groups {
                let objects = group_objects(image, group_id)?;
                tasks.push(Box::new(GroupVerifier {
                    group_id,
                    objects,
                    subset: false,
                }));
            }
        }

        let has_dsse_verifiers = !opts.dsse_verifiers.is_empty();
        let mut dsse = DsseDecoder::new(opts.dsse_verifiers);
        if opts.dsse_threshold > 0 {
            dsse = dsse.with_threshold(opts.dsse_threshold);
        }

        Ok(Verifier {
            image,
            keyring: opts.keyring,
            dsse,
            has_dsse_verifiers,
            tasks,
            callback: opts.callback,
        })
    }

    /// The union of signing entities over all planned tasks, from the
    /// signature descriptors' recorded entity fields.
    pub fn any_signed_by(&self) -> Result<Vec<[u8; ENTITY_LEN]>> {
        let mut out: Vec<[u8; ENTITY_LEN]> = Vec::new();
        for task in &self.tasks {
            for sig in task.signatures(self.image)? {
                let (_, entity) = sig.signature_metadata()?;
                if !out.contains(&entity) {
                    out.push(entity);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// The intersection of signing entities: only entities that signed
    /// every planned task.
    pub fn all_signed_by(&self) -> Result<Vec<[u8; ENTITY_LEN]>> {
        let mut common: Option<Vec<[u8; ENTITY_LEN]>> = None;
        for task in &self.tasks {
            let mut entities = Vec::new();
            for sig in task.signatures(self.image)? {
                let (_, entity) = sig.signature_metadata()?;
                entities.push(entity);
            }
            common = Some(match common {
                None => entities,
                Some(prev) => prev.into_iter().filter(|e| entities.contains(e)).collect(),
            });
        }
        let mut out = common.unwrap_or_default();
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Runs every planned task, delivering per-signature results to the
    /// callback, if any.
    ///
    /// Fails with [`Error::NoKeyMaterial`] unless a keyring, DSSE
    /// verifiers, or a callback (which may suppress errors) is present.
    pub fn verify(&mut self) -> Result<()> {
        if self.keyring.is_empty() && !self.has_dsse_verifiers && self.callback.is_none() {
            return Err(Error::NoKeyMaterial);
        }

        let image = self.image;
        let keys = KeyMaterial {
            keyring: &self.keyring,
            dsse: &self.dsse,
        };

        for task in &self.tasks {
            for sig in task.signatures(image)? {
                let result = match task.verify_signature(image, &sig, &keys) {
                    Ok(v) => VerifyResult {
                        signature: sig,
                        verified: v.descriptors,
                        entity: v.entity,
                        keys: v.keys,
                        error: None,
                    },
                    Err(e) => VerifyResult {
                        signature: sig,
                        verified: Vec::new(),
                        entity: None,
                        keys: Vec::new(),
                        error: Some(e),
                    },
                };

                let suppressed = match self.callback.as_mut() {
                    Some(cb) => cb(&result),
                    None => false,
                };
                if let Some(e) = result.error {
                    if !suppressed {
                        return Err(e);
                    }
                    log::debug!(
                        "verification error for signature {} suppressed by callback",
                        result.signature.id()
                    );
                }
            }
        }
        Ok(())
    }
}

fn group_objects<S: ContainerStore>(image: &Image<S>, group_id: u32) -> Result<Vec<Descriptor>> {
    if group_id == 0 {
        return Err(Error::Sif(sif::Error::InvalidGroupId));
    }
    let objects = image.descriptors(&Selector::new().with_group_id(group_id))?;
    if objects.is_empty() {
        return Err(Error::GroupNotFound(group_id));
    }
    Ok(objects)
}
