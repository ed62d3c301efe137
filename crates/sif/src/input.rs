//! Descriptor inputs for object addition.

use std::io::Read;

use serde::Serialize;
use zerocopy::IntoBytes;

use crate::{
    arch::Arch,
    format::{
        pad_field, DataType, FormatType, FsType, HashType, MessageType, PartType,
        RawCryptoMessage, RawPartition, RawSignature, ENTITY_LEN, EXTRA_LEN, NAME_LEN,
        PARTITION_ARCH_LEN,
    },
    Error, Result,
};

/// Data types whose extra field may hold JSON metadata.
const JSON_EXTRA_TYPES: &[DataType] = &[
    DataType::GenericJson,
    DataType::Generic,
    DataType::Sbom,
    DataType::OciRootIndex,
    DataType::OciBlob,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GroupSpec {
    /// Ungrouped.
    None,
    /// Join the given group.
    Id(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkSpec {
    None,
    Object(u32),
    Group(u32),
}

/// Everything needed to add one data object to an image.
///
/// Built with [`DescriptorInput::new`] and the `with_*` methods; consumed
/// by [`Image::add_object`](crate::Image::add_object) or
/// [`CreateOpts::descriptors`](crate::CreateOpts::descriptors).
pub struct DescriptorInput<'a> {
    pub(crate) data_type: DataType,
    pub(crate) data: Box<dyn Read + 'a>,
    pub(crate) name: String,
    pub(crate) group: GroupSpec,
    pub(crate) link: LinkSpec,
    pub(crate) time: Option<i64>,
    pub(crate) store_size: Option<u64>,
    pub(crate) extra: [u8; EXTRA_LEN],
}

impl<'a> DescriptorInput<'a> {
    /// Creates an input of the given type whose payload is read from `data`.
    ///
    /// The object is ungrouped unless [`with_group_id`](Self::with_group_id)
    /// is applied.
    pub fn new(data_type: DataType, data: impl Read + 'a) -> Self {
        DescriptorInput {
            data_type,
            data: Box::new(data),
            name: String::new(),
            group: GroupSpec::None,
            link: LinkSpec::None,
            time: None,
            store_size: None,
            extra: [0u8; EXTRA_LEN],
        }
    }

    /// Sets the object name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Places the object in group `group_id`.
    pub fn with_group_id(mut self, group_id: u32) -> Self {
        self.group = GroupSpec::Id(group_id);
        self
    }

    /// Leaves the object ungrouped (the default).
    pub fn no_group(mut self) -> Self {
        self.group = GroupSpec::None;
        self
    }

    /// Links the object to the object with ID `id`.
    pub fn with_linked_id(mut self, id: u32) -> Self {
        self.link = LinkSpec::Object(id);
        self
    }

    /// Links the object to group `group_id`.
    pub fn with_linked_group_id(mut self, group_id: u32) -> Self {
        self.link = LinkSpec::Group(group_id);
        self
    }

    /// Pins the object creation and modification time.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Reserves `store_size` bytes for the payload, producing trailing zero
    /// padding when the payload is shorter.
    pub fn with_store_size(mut self, store_size: u64) -> Self {
        self.store_size = Some(store_size);
        self
    }

    /// Records partition metadata.  Valid only for partition inputs.
    pub fn with_partition_metadata(
        mut self,
        fs_type: FsType,
        part_type: PartType,
        arch: Arch,
    ) -> Result<Self> {
        if self.data_type != DataType::Partition {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::Partition],
                got: self.data_type,
            });
        }
        if arch == Arch::Unknown {
            return Err(Error::UnknownArchitecture(arch.as_str().into()));
        }
        let raw = RawPartition {
            fs_type: (fs_type as u32).into(),
            part_type: (part_type as u32).into(),
            arch: pad_field::<PARTITION_ARCH_LEN>(arch.as_str().as_bytes())
                .ok_or(Error::UnknownArchitecture(arch.as_str().into()))?,
        };
        self.extra = [0u8; EXTRA_LEN];
        self.extra[..std::mem::size_of::<RawPartition>()].copy_from_slice(raw.as_bytes());
        Ok(self)
    }

    /// Records signature metadata.  Valid only for signature inputs.
    ///
    /// `entity` is a 20-byte OpenPGP fingerprint or a 32-byte DSSE key ID.
    pub fn with_signature_metadata(mut self, hash_type: HashType, entity: &[u8]) -> Result<Self> {
        if self.data_type != DataType::Signature {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::Signature],
                got: self.data_type,
            });
        }
        let raw = RawSignature {
            hash_type: (hash_type as u32).into(),
            entity: pad_field::<ENTITY_LEN>(entity).ok_or(Error::MetadataTooLarge {
                len: entity.len(),
                limit: ENTITY_LEN,
            })?,
        };
        self.extra = [0u8; EXTRA_LEN];
        self.extra[..std::mem::size_of::<RawSignature>()].copy_from_slice(raw.as_bytes());
        Ok(self)
    }

    /// Records cryptographic message metadata.  Valid only for crypto
    /// message inputs.
    pub fn with_crypto_message_metadata(
        mut self,
        format_type: FormatType,
        message_type: MessageType,
    ) -> Result<Self> {
        if self.data_type != DataType::CryptoMessage {
            return Err(Error::UnexpectedDataType {
                want: &[DataType::CryptoMessage],
                got: self.data_type,
            });
        }
        let raw = RawCryptoMessage {
            format_type: (format_type as u32).into(),
            message_type: (message_type as u32).into(),
        };
        self.extra = [0u8; EXTRA_LEN];
        self.extra[..std::mem::size_of::<RawCryptoMessage>()].copy_from_slice(raw.as_bytes());
        Ok(self)
    }

    /// Records JSON metadata in the extra field.  Valid only for generic,
    /// JSON, SBOM and OCI inputs.
    pub fn with_metadata(mut self, metadata: &impl Serialize) -> Result<Self> {
        if !JSON_EXTRA_TYPES.contains(&self.data_type) {
            return Err(Error::UnexpectedDataType {
                want: JSON_EXTRA_TYPES,
                got: self.data_type,
            });
        }
        let body = serde_json::to_vec(metadata)?;
        self.extra = pad_field::<EXTRA_LEN>(&body).ok_or(Error::MetadataTooLarge {
            len: body.len(),
            limit: EXTRA_LEN,
        })?;
        Ok(self)
    }

    /// Validates fields that can only be checked at add time.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.len() > NAME_LEN {
            return Err(Error::NameTooLong {
                len: self.name.len(),
                limit: NAME_LEN,
            });
        }
        match self.group {
            GroupSpec::Id(0) => return Err(Error::InvalidGroupId),
            _ => {}
        }
        match self.link {
            LinkSpec::Object(0) => return Err(Error::InvalidObjectId),
            LinkSpec::Group(0) => return Err(Error::InvalidGroupId),
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for DescriptorInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorInput")
            .field("data_type", &self.data_type)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("link", &self.link)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_metadata_requires_partition_type() {
        let input = DescriptorInput::new(DataType::Generic, &b"x"[..]);
        assert!(matches!(
            input.with_partition_metadata(FsType::Raw, PartType::System, Arch::Amd64),
            Err(Error::UnexpectedDataType { .. })
        ));
    }

    #[test]
    fn unknown_arch_rejected() {
        let input = DescriptorInput::new(DataType::Partition, &b"x"[..]);
        assert!(matches!(
            input.with_partition_metadata(FsType::Raw, PartType::System, Arch::Unknown),
            Err(Error::UnknownArchitecture(_))
        ));
    }

    #[test]
    fn zero_ids_rejected_at_validation() {
        let input = DescriptorInput::new(DataType::Generic, &b"x"[..]).with_group_id(0);
        assert!(matches!(input.validate(), Err(Error::InvalidGroupId)));

        let input = DescriptorInput::new(DataType::Generic, &b"x"[..]).with_linked_id(0);
        assert!(matches!(input.validate(), Err(Error::InvalidObjectId)));
    }

    #[test]
    fn oversized_metadata_rejected() {
        let input = DescriptorInput::new(DataType::Generic, &b"x"[..]);
        let big = "y".repeat(EXTRA_LEN);
        assert!(matches!(
            input.with_metadata(&big),
            Err(Error::MetadataTooLarge { .. })
        ));
    }
}
