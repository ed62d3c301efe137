//! Public view of descriptor table entries.

use serde::de::DeserializeOwned;
use zerocopy::FromBytes;

use crate::{
    arch::Arch,
    format::{
        self, DataType, FormatType, FsType, HashType, LinkTarget, MessageType, PartType,
        RawCryptoMessage, RawDescriptor, RawPartition, RawSignature, ENTITY_LEN,
    },
    Error, Result,
};

/// Data types whose extra field holds a NUL-padded JSON document.
const JSON_EXTRA_TYPES: &[DataType] = &[
    DataType::GenericJson,
    DataType::Generic,
    DataType::Sbom,
    DataType::OciRootIndex,
    DataType::OciBlob,
];

/// One entry of the descriptor table, naming and locating a data object.
///
/// Descriptors are value snapshots: they stay valid after further mutations
/// of the image, but describe the object as it was when they were obtained.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub(crate) raw: RawDescriptor,
    pub(crate) dtype: DataType,
    pub(crate) index: usize,
}

impl Descriptor {
    /// Builds a view over a used raw slot, validating the data type.
    pub(crate) fn from_raw(raw: RawDescriptor, index: usize) -> Result<Self> {
        let dtype = DataType::try_from(raw.data_type.get())?;
        Ok(Descriptor { raw, dtype, index })
    }

    /// The kind of data held by this object.
    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// The object ID (strictly positive, unique within the image).
    pub fn id(&self) -> u32 {
        self.raw.id.get()
    }

    /// The object group number, or 0 if the object is ungrouped.
    pub fn group_id(&self) -> u32 {
        format::group_number(self.raw.group_id.get())
    }

    /// The object or group this descriptor links to, if any.
    pub fn link(&self) -> Option<LinkTarget> {
        format::link_target(self.raw.link.get())
    }

    /// The raw encoded link field, as stored on disk.
    pub fn link_raw(&self) -> u32 {
        self.raw.link.get()
    }

    /// Absolute offset of the payload within the image.
    pub fn offset(&self) -> u64 {
        self.raw.offset.get() as u64
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.raw.size.get() as u64
    }

    /// Payload size including trailing padding.
    pub fn size_with_padding(&self) -> u64 {
        self.raw.size_with_padding.get() as u64
    }

    /// Creation time, in seconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.raw.created_at.get()
    }

    /// Last-modification time, in seconds since the Unix epoch.
    pub fn modified_at(&self) -> i64 {
        self.raw.modified_at.get()
    }

    /// UID of the creating process.
    pub fn uid(&self) -> i64 {
        self.raw.uid.get()
    }

    /// GID of the creating process.
    pub fn gid(&self) -> i64 {
        self.raw.gid.get()
    }

    /// The object name, analogous to a file name.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(format::trim_field(&self.raw.name)).into_owned()
    }

    /// The filesystem type, partition type and architecture of a partition
    /// object.
    pub fn partition_metadata(&self) -> Result<(FsType, PartType, Arch)> {
        if self.dtype != DataType::Partition {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::Partition],
                got: self.dtype,
            });
        }
        let (raw, _) = RawPartition::read_from_prefix(&self.raw.extra)
            .map_err(|_| Error::FormatInvalid("short partition extra".into()))?;
        let fs = FsType::try_from(raw.fs_type.get())?;
        let part = PartType::try_from(raw.part_type.get())?;
        let name = String::from_utf8_lossy(format::trim_field(&raw.arch));
        let arch = Arch::from_name(&name).unwrap_or(Arch::Unknown);
        Ok((fs, part, arch))
    }

    /// The hash type and signing entity of a signature object.
    ///
    /// The entity field holds a 20-byte OpenPGP fingerprint or a 32-byte
    /// DSSE key ID, zero-padded to [`ENTITY_LEN`] bytes.
    pub fn signature_metadata(&self) -> Result<(HashType, [u8; ENTITY_LEN])> {
        if self.dtype != DataType::Signature {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::Signature],
                got: self.dtype,
            });
        }
        let (raw, _) = RawSignature::read_from_prefix(&self.raw.extra)
            .map_err(|_| Error::FormatInvalid("short signature extra".into()))?;
        let hash = HashType::try_from(raw.hash_type.get())?;
        Ok((hash, raw.entity))
    }

    /// The format and message type of a cryptographic message object.
    pub fn crypto_message_metadata(&self) -> Result<(FormatType, MessageType)> {
        if self.dtype != DataType::CryptoMessage {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::CryptoMessage],
                got: self.dtype,
            });
        }
        let (raw, _) = RawCryptoMessage::read_from_prefix(&self.raw.extra)
            .map_err(|_| Error::FormatInvalid("short crypto message extra".into()))?;
        Ok((
            FormatType::try_from(raw.format_type.get())?,
            MessageType::try_from(raw.message_type.get())?,
        ))
    }

    /// Deserializes the JSON metadata held in the extra field of a generic,
    /// JSON, SBOM or OCI object.
    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T> {
        self.json_extra_check()?;
        let body = format::trim_field(&self.raw.extra);
        Ok(serde_json::from_slice(body)?)
    }

    pub(crate) fn json_extra_check(&self) -> Result<()> {
        if !JSON_EXTRA_TYPES.contains(&self.dtype) {
            return Err(Error::UnexpectedDataType {
                want: JSON_EXTRA_TYPES,
                got: self.dtype,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use zerocopy::IntoBytes;

    use super::*;
    use crate::format::pad_field;

    fn raw_with(dtype: DataType, extra: &[u8]) -> RawDescriptor {
        let mut raw = RawDescriptor::zeroed();
        raw.data_type.set(dtype as u32);
        raw.used = 1;
        raw.id.set(1);
        raw.extra[..extra.len()].copy_from_slice(extra);
        raw
    }

    #[test]
    fn partition_extra_roundtrip() {
        let part = RawPartition {
            fs_type: (FsType::Squash as u32).into(),
            part_type: (PartType::PrimSys as u32).into(),
            arch: pad_field(b"arm64").unwrap(),
        };
        let raw = raw_with(DataType::Partition, part.as_bytes());
        let d = Descriptor::from_raw(raw, 0).unwrap();
        assert_eq!(
            d.partition_metadata().unwrap(),
            (FsType::Squash, PartType::PrimSys, Arch::Arm64)
        );
        assert!(matches!(
            d.signature_metadata(),
            Err(Error::UnexpectedDataType { .. })
        ));
    }

    #[test]
    fn signature_extra_roundtrip() {
        let mut entity = [0u8; ENTITY_LEN];
        entity[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let sig = RawSignature {
            hash_type: (HashType::Sha384 as u32).into(),
            entity,
        };
        let raw = raw_with(DataType::Signature, sig.as_bytes());
        let d = Descriptor::from_raw(raw, 0).unwrap();
        let (hash, got) = d.signature_metadata().unwrap();
        assert_eq!(hash, HashType::Sha384);
        assert_eq!(got, entity);
    }

    #[test]
    fn json_metadata() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Md {
            tag: String,
        }

        let body = serde_json::to_vec(&Md { tag: "x".into() }).unwrap();
        let raw = raw_with(DataType::OciBlob, &body);
        let d = Descriptor::from_raw(raw, 0).unwrap();
        assert_eq!(d.metadata::<Md>().unwrap(), Md { tag: "x".into() });

        let raw = raw_with(DataType::Partition, &[]);
        let d = Descriptor::from_raw(raw, 0).unwrap();
        assert!(matches!(
            d.metadata::<Md>(),
            Err(Error::UnexpectedDataType { .. })
        ));
    }
}
