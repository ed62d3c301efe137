//! The canonical signed message describing a set of image objects.
//!
//! Signatures cover this JSON document rather than raw image bytes, so that
//! identical semantics stay verifiable even when the physical layout
//! (object offsets) changes between tools.  Object offsets are deliberately
//! never part of the message.

use serde::{Deserialize, Serialize};
use sif::{ContainerStore, Descriptor, HashType, Image};
use uuid::Uuid;

use crate::{digest::ObjectDigest, Error, Result};

/// Image-level fields covered by a signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMetadata {
    /// Primary architecture name.
    #[serde(rename = "Arch")]
    pub arch: String,
    /// Container UUID.
    #[serde(rename = "ID")]
    pub id: Uuid,
}

/// Per-object fields covered by a signature.
///
/// Everything semantic is present; the object's physical offset is not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "GroupID")]
    pub group_id: u32,
    #[serde(rename = "Link")]
    pub link: u32,
    #[serde(rename = "DataType")]
    pub data_type: u32,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "SizeWithPadding")]
    pub size_with_padding: u64,
    #[serde(rename = "CreatedAt")]
    pub created_at: i64,
    #[serde(rename = "ModifiedAt")]
    pub modified_at: i64,
    #[serde(rename = "UID")]
    pub uid: i64,
    #[serde(rename = "GID")]
    pub gid: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Digest")]
    pub digest: ObjectDigest,
}

/// The canonical message: header fields plus one entry per covered object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(rename = "Header")]
    pub header: HeaderMetadata,
    #[serde(rename = "Objects")]
    pub objects: Vec<ObjectMetadata>,
}

impl ImageMetadata {
    /// Builds the message covering `descriptors`, hashing each payload with
    /// `hash`.
    pub fn new<S: ContainerStore>(
        image: &Image<S>,
        descriptors: &[Descriptor],
        hash: HashType,
    ) -> Result<Self> {
        let mut objects = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            objects.push(ObjectMetadata {
                id: d.id(),
                group_id: d.group_id(),
                link: d.link_raw(),
                data_type: d.data_type() as u32,
                size: d.size(),
                size_with_padding: d.size_with_padding(),
                created_at: d.created_at(),
                modified_at: d.modified_at(),
                uid: d.uid(),
                gid: d.gid(),
                name: d.name(),
                digest: ObjectDigest::compute(hash, image.reader(d)?)?,
            });
        }
        Ok(ImageMetadata {
            header: HeaderMetadata {
                arch: image.arch().as_str().into(),
                id: image.id(),
            },
            objects,
        })
    }

    /// Serializes the message to its canonical byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The IDs of the covered objects.
    pub fn object_ids(&self) -> Vec<u32> {
        self.objects.iter().map(|o| o.id).collect()
    }

    /// Verifies the listed objects against the current image state.
    ///
    /// When `only` is supplied, verification is limited to those object
    /// IDs (subset verification); otherwise every listed object must still
    /// be present and intact.  Returns the verified descriptors.
    pub fn verify_objects<S: ContainerStore>(
        &self,
        image: &Image<S>,
        only: Option<&[u32]>,
    ) -> Result<Vec<Descriptor>> {
        if self.header.arch != image.arch().as_str() || self.header.id != image.id() {
            return Err(Error::HeaderMismatch);
        }

        let mut verified = Vec::new();
        for om in &self.objects {
            if let Some(ids) = only {
                if !ids.contains(&om.id) {
                    continue;
                }
            }

            let d = image
                .descriptors_iter()
                .find(|d| d.id() == om.id)
                .ok_or(Error::SignedObjectNotFound)?;

            if om.group_id != d.group_id()
                || om.link != d.link_raw()
                || om.data_type != d.data_type() as u32
                || om.size != d.size()
                || om.size_with_padding != d.size_with_padding()
                || om.created_at != d.created_at()
                || om.modified_at != d.modified_at()
                || om.uid != d.uid()
                || om.gid != d.gid()
                || om.name != d.name()
            {
                return Err(Error::MetadataMismatch);
            }

            om.digest.verify(image.reader(d)?)?;
            verified.push(d.clone());
        }
        Ok(verified)
    }
}
