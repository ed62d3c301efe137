//! Mutation operations: object addition, deletion and descriptor updates.
//!
//! Every public operation leaves the structural invariants intact: the
//! header descriptor count matches the table, object IDs stay unique and
//! monotonic, links reference live targets, and at most one partition is
//! marked primary.

use serde::Serialize;
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    descriptor::Descriptor,
    format::{
        self, pad_field, DataType, PartType, RawDescriptor, RawPartition, EXTRA_LEN, NAME_LEN,
        UNUSED_GROUP,
    },
    image::now_unix,
    input::{DescriptorInput, GroupSpec, LinkSpec},
    store::ContainerStore,
    Arch, Error, Image, Result,
};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Options for [`Image::add_object`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AddOpts {
    pub(crate) deterministic: bool,
    pub(crate) time: Option<i64>,
}

impl AddOpts {
    /// Creates the default option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes time and identity fields not pinned elsewhere.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Pins the modification time recorded by the addition.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }
}

/// Options for [`Image::delete_object`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteOpts {
    pub(crate) zero: bool,
    pub(crate) compact: bool,
    pub(crate) deterministic: bool,
    pub(crate) time: Option<i64>,
}

impl DeleteOpts {
    /// Creates the default option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the freed payload bytes with zeros.
    pub fn zero(mut self, zero: bool) -> Self {
        self.zero = zero;
        self
    }

    /// Truncates the data area when the freed object occupies its trailing
    /// region.
    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Zeroes the recorded modification time.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Pins the recorded modification time.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }
}

/// Options for [`Image::set_prim_part`] and [`Image::set_metadata`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOpts {
    pub(crate) deterministic: bool,
    pub(crate) time: Option<i64>,
}

impl SetOpts {
    /// Creates the default option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes the recorded modification time.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Pins the recorded modification time.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }
}

fn resolve_time(time: Option<i64>, deterministic: bool) -> i64 {
    time.unwrap_or_else(|| if deterministic { 0 } else { now_unix() })
}

impl<S: ContainerStore> Image<S> {
    /// Adds a data object described by `input` to the image.
    ///
    /// The payload is appended to the data area, a descriptor slot is
    /// claimed, and the object receives the next monotonic ID.
    pub fn add_object(&mut self, mut input: DescriptorInput<'_>, opts: AddOpts) -> Result<()> {
        input.validate()?;
        self.writable_store()?;

        // A second primary partition must not appear.  Adding a primary
        // partition also records its architecture in the header.
        let mut new_arch = None;
        if input.data_type == DataType::Partition {
            let (part, arch) = partition_input_metadata(&input.extra)?;
            if part == PartType::PrimSys {
                if self.primary_partition().is_ok() {
                    return Err(Error::PrimaryPartitionExists);
                }
                new_arch = Some(arch);
            }
        }

        // Link targets must exist up front; load-time validation would
        // otherwise reject the file we are about to produce.
        match input.link {
            LinkSpec::None => {}
            LinkSpec::Object(id) => {
                self.position_of(id)?;
            }
            LinkSpec::Group(g) => {
                if !self.group_ids().contains(&g) {
                    return Err(Error::InvalidGroupId);
                }
            }
        }

        let index = self.free_slot()?;
        let name = pad_field::<NAME_LEN>(input.name.as_bytes()).ok_or(Error::NameTooLong {
            len: input.name.len(),
            limit: NAME_LEN,
        })?;

        let time = input.time.or(opts.time);
        let time = resolve_time(time, opts.deterministic);
        let (uid, gid) = if opts.deterministic {
            (0, 0)
        } else {
            (
                rustix::process::getuid().as_raw() as i64,
                rustix::process::getgid().as_raw() as i64,
            )
        };

        let offset = self.data_offset() + self.data_size();

        // Stream the payload to its final position.
        let mut written = 0u64;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match input.data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.writable_store()?.write_all_at(offset + written, &buf[..n])?;
            written += n as u64;
        }

        let store_size = match input.store_size {
            None => written,
            Some(s) if s < written => {
                return Err(Error::InvalidStoreSize {
                    store: s,
                    size: written,
                })
            }
            Some(s) => {
                // Trailing zero padding up to the reserved size.
                let mut pad = s - written;
                let zeros = vec![0u8; COPY_BUF_SIZE.min(pad as usize)];
                let mut at = offset + written;
                while pad > 0 {
                    let n = zeros.len().min(pad as usize);
                    self.writable_store()?.write_all_at(at, &zeros[..n])?;
                    at += n as u64;
                    pad -= n as u64;
                }
                s
            }
        };

        let id = self.max_id + 1;

        let mut raw = RawDescriptor::zeroed();
        raw.data_type.set(input.data_type as u32);
        raw.used = 1;
        raw.id.set(id);
        raw.group_id.set(match input.group {
            GroupSpec::None => UNUSED_GROUP,
            GroupSpec::Id(g) => format::group_raw(g),
        });
        raw.link.set(match input.link {
            LinkSpec::None => 0,
            LinkSpec::Object(target) => target,
            LinkSpec::Group(g) => format::group_raw(g),
        });
        raw.offset.set(offset as i64);
        raw.size.set(written as i64);
        raw.size_with_padding.set(store_size as i64);
        raw.created_at.set(time);
        raw.modified_at.set(time);
        raw.uid.set(uid);
        raw.gid.set(gid);
        raw.name = name;
        raw.extra = input.extra;

        self.persist_slot(index, raw)?;

        let descriptor = Descriptor::from_raw(raw, index)?;
        let pos = self
            .descriptors
            .iter()
            .position(|d| d.index > index)
            .unwrap_or(self.descriptors.len());
        self.descriptors.insert(pos, descriptor);
        self.max_id = id;

        self.header.descr_count.set(self.descriptors.len() as i64);
        self.header
            .data_size
            .set((offset + store_size) as i64 - self.header.data_offset.get());
        self.header.modified_at.set(time);
        if let Some(arch) = new_arch {
            self.header.arch = arch.code();
        }
        self.persist_header()?;

        log::debug!("added object {id} ({} bytes)", written);
        Ok(())
    }

    /// Deletes the data object with the given ID.
    ///
    /// The descriptor slot is zeroed and freed.  The payload bytes remain
    /// in the data area unless [`DeleteOpts::zero`] overwrites them or
    /// [`DeleteOpts::compact`] truncates a trailing object away.
    pub fn delete_object(&mut self, id: u32, opts: DeleteOpts) -> Result<()> {
        self.writable_store()?;
        let pos = self.position_of(id)?;
        let d = self.descriptors[pos].clone();
        let time = resolve_time(opts.time, opts.deterministic);

        if opts.zero && d.size() > 0 {
            let zeros = vec![0u8; COPY_BUF_SIZE.min(d.size() as usize)];
            let mut remaining = d.size();
            let mut at = d.offset();
            while remaining > 0 {
                let n = zeros.len().min(remaining as usize);
                self.writable_store()?.write_all_at(at, &zeros[..n])?;
                at += n as u64;
                remaining -= n as u64;
            }
        }

        if opts.compact
            && d.offset() + d.size_with_padding() == self.data_offset() + self.data_size()
        {
            let new_size = self.data_size() - d.size_with_padding();
            let end = self.data_offset() + new_size;
            self.writable_store()?.set_len(end)?;
            self.header.data_size.set(new_size as i64);
        }

        // Deleting the primary partition leaves the image without a
        // primary architecture.
        if matches!(d.partition_metadata(), Ok((_, PartType::PrimSys, _))) {
            self.header.arch = Arch::Unknown.code();
        }

        let index = d.index;
        self.descriptors.remove(pos);
        self.persist_slot(index, RawDescriptor::zeroed())?;

        self.header.descr_count.set(self.descriptors.len() as i64);
        self.header.modified_at.set(time);
        self.persist_header()?;

        log::debug!("deleted object {id}");
        Ok(())
    }

    /// Marks the partition with the given ID as the primary system
    /// partition, demoting any current primary to a plain system
    /// partition, and records its architecture in the header.
    pub fn set_prim_part(&mut self, id: u32, opts: SetOpts) -> Result<()> {
        self.writable_store()?;
        let pos = self.position_of(id)?;
        let (_, _, arch) = self.descriptors[pos].partition_metadata()?;
        let time = resolve_time(opts.time, opts.deterministic);

        // Demote the current primary, if it is a different object.
        if let Ok(current) = self.primary_partition() {
            if current.id() != id {
                let cur_pos = self.position_of(current.id())?;
                let mut raw = self.descriptors[cur_pos].raw;
                set_part_type(&mut raw, PartType::System)?;
                raw.modified_at.set(time);
                self.persist_slot(current.index, raw)?;
                self.descriptors[cur_pos] = Descriptor::from_raw(raw, current.index)?;
            }
        }

        let mut raw = self.descriptors[pos].raw;
        set_part_type(&mut raw, PartType::PrimSys)?;
        raw.modified_at.set(time);
        let index = self.descriptors[pos].index;
        self.persist_slot(index, raw)?;
        self.descriptors[pos] = Descriptor::from_raw(raw, index)?;

        self.header.arch = arch.code();
        self.header.modified_at.set(time);
        self.persist_header()?;
        Ok(())
    }

    /// Replaces the JSON metadata in the extra field of the object with the
    /// given ID.
    pub fn set_metadata(&mut self, id: u32, metadata: &impl Serialize, opts: SetOpts) -> Result<()> {
        self.writable_store()?;
        let pos = self.position_of(id)?;
        self.descriptors[pos].json_extra_check()?;
        let time = resolve_time(opts.time, opts.deterministic);

        let body = serde_json::to_vec(metadata)?;
        let extra = pad_field::<EXTRA_LEN>(&body).ok_or(Error::MetadataTooLarge {
            len: body.len(),
            limit: EXTRA_LEN,
        })?;

        let mut raw = self.descriptors[pos].raw;
        raw.extra = extra;
        raw.modified_at.set(time);
        let index = self.descriptors[pos].index;
        self.persist_slot(index, raw)?;
        self.descriptors[pos] = Descriptor::from_raw(raw, index)?;

        self.header.modified_at.set(time);
        self.persist_header()?;
        Ok(())
    }
}

/// Parses the partition type and architecture out of a partition input's
/// extra field, rejecting inputs whose metadata was never set.
fn partition_input_metadata(extra: &[u8; EXTRA_LEN]) -> Result<(PartType, Arch)> {
    let (raw, _) = RawPartition::read_from_prefix(extra)
        .map_err(|_| Error::FormatInvalid("short partition extra".into()))?;
    let part = PartType::try_from(raw.part_type.get())?;
    let name = String::from_utf8_lossy(crate::format::trim_field(&raw.arch));
    let arch = Arch::from_name(&name).unwrap_or(Arch::Unknown);
    Ok((part, arch))
}

/// Rewrites the partition type inside a partition descriptor's extra field.
fn set_part_type(raw: &mut RawDescriptor, part: PartType) -> Result<()> {
    let (mut partition, _) = RawPartition::read_from_prefix(&raw.extra)
        .map_err(|_| Error::FormatInvalid("short partition extra".into()))?;
    partition.part_type.set(part as u32);
    raw.extra[..std::mem::size_of::<RawPartition>()].copy_from_slice(partition.as_bytes());
    Ok(())
}
