//! Read, create and modify Singularity Image Format (SIF) containers.
//!
//! A SIF file packages heterogeneous payloads (filesystem partitions, OCI
//! blobs, signatures, metadata documents) behind one fixed little-endian
//! header and descriptor table.  This crate implements the on-disk format,
//! the descriptor table engine and the mutation operations; signing and
//! verification live in the companion `sif-integrity` crate.
//!
//! ```no_run
//! use sif::{AddOpts, CreateOpts, DataType, DescriptorInput, Image, Selector};
//!
//! # fn main() -> sif::Result<()> {
//! let mut image = Image::create_at_path("image.sif", CreateOpts::new())?;
//! image.add_object(
//!     DescriptorInput::new(DataType::Generic, &b"hello"[..]).with_name("greeting"),
//!     AddOpts::new(),
//! )?;
//! let d = image.descriptor(&Selector::new().with_data_type(DataType::Generic))?;
//! let payload = image.data(&d)?;
//! # Ok(())
//! # }
//! ```

pub mod arch;
pub mod create;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod image;
pub mod input;
pub mod mutate;
pub mod select;
pub mod store;

pub use arch::Arch;
pub use create::CreateOpts;
pub use descriptor::Descriptor;
pub use error::{Error, Result};
pub use format::{
    DataType, FormatType, FsType, HashType, LinkTarget, MessageType, PartType,
    DEFAULT_DESCRIPTOR_CAPACITY, DEFAULT_LAUNCH_SCRIPT, DESCRIPTOR_SIZE, ENTITY_LEN, EXTRA_LEN,
    HEADER_SIZE, LAUNCH_LEN, NAME_LEN,
};
pub use image::{BufferImage, FileImage, Image, LoadOpts};
pub use input::DescriptorInput;
pub use mutate::{AddOpts, DeleteOpts, SetOpts};
pub use select::Selector;
pub use store::{Buffer, ContainerStore, ObjectReader};
