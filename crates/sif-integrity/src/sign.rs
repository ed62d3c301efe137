//! Signing orchestration: group/object selection and signature emission.

use pgp::composed::SignedSecretKey;
use sif::{
    AddOpts, ContainerStore, DataType, Descriptor, DescriptorInput, HashType, Image, Selector,
};

use crate::{
    clearsign,
    dsse::{self, DsseEncoder},
    metadata::ImageMetadata,
    Error, Result,
};

/// One signature to produce: a group and the descriptors it covers.
#[derive(Debug)]
struct SignTask {
    group_id: u32,
    descriptors: Vec<Descriptor>,
}

enum SignMethod {
    Clearsign(Box<SignedSecretKey>),
    Dsse(DsseEncoder),
}

/// Options controlling signature creation.
#[derive(Default)]
pub struct SignerOpts {
    entity: Option<Box<SignedSecretKey>>,
    signers: Vec<Box<dyn dsse::Signer>>,
    groups: Vec<u32>,
    objects: Vec<u32>,
    deterministic: bool,
    time: Option<i64>,
}

impl SignerOpts {
    /// Creates the default option set: sign every object group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signs with an OpenPGP entity, producing clearsign envelopes.
    pub fn with_entity(mut self, entity: SignedSecretKey) -> Self {
        self.entity = Some(Box::new(entity));
        self.signers.clear();
        self
    }

    /// Signs with DSSE signers, producing DSSE envelopes.
    pub fn with_signers(mut self, signers: Vec<Box<dyn dsse::Signer>>) -> Self {
        self.signers = signers;
        self.entity = None;
        self
    }

    /// Signs only the given object group.  May be applied repeatedly.
    pub fn group(mut self, group_id: u32) -> Self {
        self.groups.push(group_id);
        self
    }

    /// Signs only the given objects, grouped by their object groups.
    pub fn objects(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.objects.extend(ids);
        self
    }

    /// Zeroes time and identity fields in the produced signature objects.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Pins the modification time of the produced signature objects.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }
}

/// Signs subsets of image objects and stores the envelopes as signature
/// objects.
pub struct Signer<'a, S> {
    image: &'a mut Image<S>,
    method: SignMethod,
    tasks: Vec<SignTask>,
    deterministic: bool,
    time: Option<i64>,
}

impl<'a, S: ContainerStore> Signer<'a, S> {
    /// Plans signing work over `image` according to `opts`.
    ///
    /// Fails with [`Error::NoKeyMaterial`] when neither an entity nor DSSE
    /// signers are supplied, and with group/object lookup errors when the
    /// requested targets do not exist.
    pub fn new(image: &'a mut Image<S>, opts: SignerOpts) -> Result<Self> {
        let method = if let Some(entity) = opts.entity {
            SignMethod::Clearsign(entity)
        } else if !opts.signers.is_empty() {
            SignMethod::Dsse(DsseEncoder::new(opts.signers)?)
        } else {
            return Err(Error::NoKeyMaterial);
        };

        if image.descriptor_count() == 0 {
            return Err(Error::Sif(sif::Error::NoObjects));
        }

        let mut tasks = Vec::new();

        if !opts.objects.is_empty() {
            // Explicit objects, grouped by their object group.
            let mut by_group: Vec<(u32, Vec<Descriptor>)> = Vec::new();
            for id in opts.objects {
                let d = image.descriptor(&Selector::new().with_id(id))?;
                let group = d.group_id();
                if group == 0 {
                    return Err(Error::Sif(sif::Error::NoGroupsFound));
                }
                match by_group.iter_mut().find(|(g, _)| *g == group) {
                    Some((_, ds)) => ds.push(d),
                    None => by_group.push((group, vec![d])),
                }
            }
            for (group_id, mut descriptors) in by_group {
                descriptors.sort_by_key(Descriptor::id);
                descriptors.dedup_by_key(|d| d.id());
                tasks.push(SignTask {
                    group_id,
                    descriptors,
                });
            }
        } else {
            let groups = if opts.groups.is_empty() {
                image.group_ids()
            } else {
                opts.groups
            };
            if groups.is_empty() {
                return Err(Error::Sif(sif::Error::NoGroupsFound));
            }
            for group_id in groups {
                if group_id == 0 {
                    return Err(Error::Sif(sif::Error::InvalidGroupId));
                }
                let descriptors =
                    image.descriptors(&Selector::new().with_group_id(group_id))?;
                if descriptors.is_empty() {
                    return Err(Error::GroupNotFound(group_id));
                }
                tasks.push(SignTask {
                    group_id,
                    descriptors,
                });
            }
        }

        Ok(Signer {
            image,
            method,
            tasks,
            deterministic: opts.deterministic,
            time: opts.time,
        })
    }

    /// Produces one signature object per planned task.
    pub fn sign(&mut self) -> Result<()> {
        let hash = match &self.method {
            SignMethod::Clearsign(_) => HashType::Sha256,
            SignMethod::Dsse(encoder) => encoder.hash_type(),
        };

        for task in &self.tasks {
            let message = ImageMetadata::new(self.image, &task.descriptors, hash)?;
            let body = message.to_bytes()?;

            let (envelope, entity) = match &self.method {
                SignMethod::Clearsign(key) => {
                    let text = String::from_utf8(body).map_err(|e| {
                        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                    })?;
                    clearsign::sign_message(&text, key)?
                }
                SignMethod::Dsse(encoder) => {
                    (encoder.sign_message(&body)?, encoder.primary_key_id())
                }
            };

            let mut opts = AddOpts::new();
            if self.deterministic {
                opts = opts.deterministic();
            }
            if let Some(time) = self.time {
                opts = opts.with_time(time);
            }

            let input = DescriptorInput::new(DataType::Signature, &envelope[..])
                .no_group()
                .with_linked_group_id(task.group_id)
                .with_signature_metadata(hash, &entity)?;
            self.image.add_object(input, opts)?;

            log::debug!(
                "signed group {} covering {} objects",
                task.group_id,
                task.descriptors.len()
            );
        }
        Ok(())
    }
}
