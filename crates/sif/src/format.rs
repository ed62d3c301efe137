//! SIF on-disk format definitions.
//!
//! This module defines the binary layout of the SIF global header and the
//! fixed-size descriptor table entries using safe zerocopy-based parsing.

// All of the structures are defined in terms of pure LE integer sizes with
// alignment 1, so the structs carry no implicit padding and the encoded form
// is exactly the in-memory form.  Conversion to enum values is handled
// separately via TryFrom so that decoding raw bytes is total.

use std::fmt;

use zerocopy::{
    little_endian::{I64, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

use crate::{Error, Result};

/// Width of the launch script region at the start of the image.
pub const LAUNCH_LEN: usize = 32;

/// Magic identifier, stored immediately after the launch script.
pub const MAGIC: [u8; 10] = *b"SIF_MAGIC\0";

/// Format version tag.
pub const VERSION: [u8; 3] = *b"02\0";

/// Width of the architecture code field.
pub const ARCH_LEN: usize = 3;

/// Width of the descriptor name field.
pub const NAME_LEN: usize = 128;

/// Width of the descriptor extra field.
pub const EXTRA_LEN: usize = 48;

/// Width of the arch string inside a partition extra field.
pub const PARTITION_ARCH_LEN: usize = 32;

/// Width of the entity field inside a signature extra field.  Large enough
/// for a 20-byte OpenPGP fingerprint or a 32-byte SHA-256 DSSE key ID.
pub const ENTITY_LEN: usize = 40;

/// Default number of descriptor table slots in a fresh image.
pub const DEFAULT_DESCRIPTOR_CAPACITY: usize = 48;

/// Default launch script, padded to [`LAUNCH_LEN`] with NULs on disk.
pub const DEFAULT_LAUNCH_SCRIPT: &str = "#!/usr/bin/env run-singularity\n";

/// Encoded size of the global header.
pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// Encoded size of one descriptor table slot.
pub const DESCRIPTOR_SIZE: usize = std::mem::size_of::<RawDescriptor>();

// Group and link fields share one u32 value space: values carrying the top
// nibble are group references, bare non-zero values are object IDs.  The
// bare mask is the "no group" sentinel (raw zero is accepted on read).
pub(crate) const GROUP_MASK: u32 = 0xf000_0000;
pub(crate) const UNUSED_GROUP: u32 = GROUP_MASK;

/// Returns the unmasked group number for a raw group field (0 = ungrouped).
pub(crate) fn group_number(raw: u32) -> u32 {
    if raw & GROUP_MASK == GROUP_MASK {
        raw & !GROUP_MASK
    } else {
        raw
    }
}

/// Returns the on-disk encoding of group number `n`.
pub(crate) fn group_raw(n: u32) -> u32 {
    GROUP_MASK | n
}

/// The target of a descriptor link field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkTarget {
    /// Link to the object with this ID.
    Object(u32),
    /// Link to the group with this number.
    Group(u32),
}

/// Decodes a raw link field (0 = unlinked).
pub(crate) fn link_target(raw: u32) -> Option<LinkTarget> {
    match raw {
        0 => None,
        v if v & GROUP_MASK == GROUP_MASK => Some(LinkTarget::Group(v & !GROUP_MASK)),
        v => Some(LinkTarget::Object(v)),
    }
}

/// Encodes a link target into its raw field value.
pub(crate) fn link_raw(target: Option<LinkTarget>) -> u32 {
    match target {
        None => 0,
        Some(LinkTarget::Object(id)) => id,
        Some(LinkTarget::Group(n)) => group_raw(n),
    }
}

/// SIF global header.
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub(crate) struct RawHeader {
    pub launch: [u8; LAUNCH_LEN],
    pub magic: [u8; 10],
    pub version: [u8; ARCH_LEN],
    pub arch: [u8; ARCH_LEN],
    pub id: [u8; 16],
    pub created_at: I64,
    pub modified_at: I64,
    pub descr_offset: I64,
    pub descr_size: I64,
    pub descr_count: I64,
    pub descr_capacity: I64,
    pub data_offset: I64,
    pub data_size: I64,
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeader")
            .field("arch", &self.arch)
            .field("id", &self.id)
            .field("created_at", &self.created_at.get())
            .field("modified_at", &self.modified_at.get())
            .field("descr_offset", &self.descr_offset.get())
            .field("descr_count", &self.descr_count.get())
            .field("descr_capacity", &self.descr_capacity.get())
            .field("data_offset", &self.data_offset.get())
            .field("data_size", &self.data_size.get())
            .finish_non_exhaustive()
    }
}

/// One descriptor table slot.
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub(crate) struct RawDescriptor {
    pub data_type: U32,
    pub used: u8,
    pub reserved: [u8; 3],
    pub id: U32,
    pub group_id: U32,
    pub link: U32,
    pub offset: I64,
    pub size: I64,
    pub size_with_padding: I64,
    pub created_at: I64,
    pub modified_at: I64,
    pub uid: I64,
    pub gid: I64,
    pub name: [u8; NAME_LEN],
    pub extra: [u8; EXTRA_LEN],
}

impl RawDescriptor {
    pub(crate) fn zeroed() -> Self {
        Self::new_zeroed()
    }
}

impl fmt::Debug for RawDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDescriptor")
            .field("data_type", &self.data_type.get())
            .field("used", &self.used)
            .field("id", &self.id.get())
            .field("group_id", &self.group_id.get())
            .field("link", &self.link.get())
            .field("offset", &self.offset.get())
            .field("size", &self.size.get())
            .field("size_with_padding", &self.size_with_padding.get())
            .finish_non_exhaustive()
    }
}

/// The kind of data held by a data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    /// Definition file used to build the image.
    Deffile = 0x4001,
    /// Environment variables.
    EnvVar = 0x4002,
    /// JSON label metadata.
    Labels = 0x4003,
    /// Filesystem partition.
    Partition = 0x4004,
    /// Signature envelope.
    Signature = 0x4005,
    /// Generic JSON document.
    GenericJson = 0x4006,
    /// Generic or raw data.
    Generic = 0x4007,
    /// Cryptographic message.
    CryptoMessage = 0x4008,
    /// Software bill of materials.
    Sbom = 0x4009,
    /// OCI root index.
    OciRootIndex = 0x400a,
    /// OCI blob.
    OciBlob = 0x400b,
}

impl TryFrom<u32> for DataType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0x4001 => DataType::Deffile,
            0x4002 => DataType::EnvVar,
            0x4003 => DataType::Labels,
            0x4004 => DataType::Partition,
            0x4005 => DataType::Signature,
            0x4006 => DataType::GenericJson,
            0x4007 => DataType::Generic,
            0x4008 => DataType::CryptoMessage,
            0x4009 => DataType::Sbom,
            0x400a => DataType::OciRootIndex,
            0x400b => DataType::OciBlob,
            v => return Err(Error::FormatInvalid(format!("unknown data type {v:#x}"))),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Deffile => "Def.FILE",
            DataType::EnvVar => "Env.Vars",
            DataType::Labels => "JSON.Labels",
            DataType::Partition => "FS",
            DataType::Signature => "Signature",
            DataType::GenericJson => "JSON.Generic",
            DataType::Generic => "Generic/Raw",
            DataType::CryptoMessage => "Cryptographic Message",
            DataType::Sbom => "SBOM",
            DataType::OciRootIndex => "OCI.RootIndex",
            DataType::OciBlob => "OCI.Blob",
        })
    }
}

/// The filesystem held by a partition object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FsType {
    /// SquashFS.
    Squash = 1,
    /// ext3.
    Ext3 = 2,
    /// Immutable object archive.
    ImmuObj = 3,
    /// Raw bytes.
    Raw = 4,
    /// Encrypted SquashFS.
    EncryptedSquash = 5,
}

impl TryFrom<u32> for FsType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => FsType::Squash,
            2 => FsType::Ext3,
            3 => FsType::ImmuObj,
            4 => FsType::Raw,
            5 => FsType::EncryptedSquash,
            v => return Err(Error::FormatInvalid(format!("unknown filesystem type {v}"))),
        })
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FsType::Squash => "Squashfs",
            FsType::Ext3 => "Ext3",
            FsType::ImmuObj => "Archive",
            FsType::Raw => "Raw",
            FsType::EncryptedSquash => "Encrypted squashfs",
        })
    }
}

/// The role of a partition object within the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PartType {
    /// Secondary system partition.
    System = 1,
    /// Primary system partition (the boot root filesystem).
    PrimSys = 2,
    /// Data partition.
    Data = 3,
    /// Overlay partition.
    Overlay = 4,
}

impl TryFrom<u32> for PartType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => PartType::System,
            2 => PartType::PrimSys,
            3 => PartType::Data,
            4 => PartType::Overlay,
            v => return Err(Error::FormatInvalid(format!("unknown partition type {v}"))),
        })
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartType::System => "System",
            PartType::PrimSys => "*System",
            PartType::Data => "Data",
            PartType::Overlay => "Overlay",
        })
    }
}

/// The hash algorithm recorded in a signature object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HashType {
    /// SHA-256.
    Sha256 = 1,
    /// SHA-384.
    Sha384 = 2,
    /// SHA-512.
    Sha512 = 3,
    /// BLAKE2s-256.
    Blake2s = 4,
    /// BLAKE2b-512.
    Blake2b = 5,
}

impl TryFrom<u32> for HashType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => HashType::Sha256,
            2 => HashType::Sha384,
            3 => HashType::Sha512,
            4 => HashType::Blake2s,
            5 => HashType::Blake2b,
            v => return Err(Error::FormatInvalid(format!("unknown hash type {v}"))),
        })
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashType::Sha256 => "SHA-256",
            HashType::Sha384 => "SHA-384",
            HashType::Sha512 => "SHA-512",
            HashType::Blake2s => "BLAKE2s",
            HashType::Blake2b => "BLAKE2b",
        })
    }
}

/// The format of a cryptographic message object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FormatType {
    /// OpenPGP.
    OpenPgp = 1,
    /// PEM.
    Pem = 2,
    /// PKCS#7.
    Pkcs7 = 3,
}

impl TryFrom<u32> for FormatType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => FormatType::OpenPgp,
            2 => FormatType::Pem,
            3 => FormatType::Pkcs7,
            v => return Err(Error::FormatInvalid(format!("unknown message format {v}"))),
        })
    }
}

/// The kind of a cryptographic message object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// Detached clear signature.
    ClearSignature = 0x100,
    /// RSA-OAEP encrypted message.
    RsaOaep = 0x200,
}

impl TryFrom<u32> for MessageType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0x100 => MessageType::ClearSignature,
            0x200 => MessageType::RsaOaep,
            v => return Err(Error::FormatInvalid(format!("unknown message type {v:#x}"))),
        })
    }
}

/// Partition extra field layout (40 of the 48 extra bytes).
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub(crate) struct RawPartition {
    pub fs_type: U32,
    pub part_type: U32,
    pub arch: [u8; PARTITION_ARCH_LEN],
}

/// Signature extra field layout (44 of the 48 extra bytes).
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub(crate) struct RawSignature {
    pub hash_type: U32,
    pub entity: [u8; ENTITY_LEN],
}

/// Cryptographic message extra field layout (8 of the 48 extra bytes).
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub(crate) struct RawCryptoMessage {
    pub format_type: U32,
    pub message_type: U32,
}

/// Copies `s` into a fixed NUL-padded field.
pub(crate) fn pad_field<const N: usize>(s: &[u8]) -> Option<[u8; N]> {
    if s.len() > N {
        return None;
    }
    let mut field = [0u8; N];
    field[..s.len()].copy_from_slice(s);
    Some(field)
}

/// Returns `field` with trailing NULs removed.
pub(crate) fn trim_field(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &field[..end]
}
