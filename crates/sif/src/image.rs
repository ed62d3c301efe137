//! The container handle: lifecycle, validation and object access.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    arch::Arch,
    descriptor::Descriptor,
    format::{
        self, LinkTarget, PartType, RawDescriptor, RawHeader, DESCRIPTOR_SIZE, HEADER_SIZE,
        MAGIC, VERSION,
    },
    select::Selector,
    store::{Buffer, ContainerStore, ObjectReader},
    Error, Result,
};

/// Returns the current time in seconds since the Unix epoch.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Options for loading an existing container.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadOpts {
    pub(crate) writable: bool,
}

impl LoadOpts {
    /// Creates the default option set (read-only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the container for mutation.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }
}

/// A loaded SIF container over some backing store.
///
/// The handle is single-writer, multi-reader: mutation methods require
/// `&mut self`, while any number of [`ObjectReader`]s obtained from `&self`
/// may be read in parallel.
pub struct Image<S> {
    pub(crate) store: Option<S>,
    pub(crate) writable: bool,
    pub(crate) header: RawHeader,
    /// Used descriptors, ascending by slot index.
    pub(crate) descriptors: Vec<Descriptor>,
    /// Highest object ID ever observed or assigned; never lowered.
    pub(crate) max_id: u32,
}

/// A container backed by an in-memory [`Buffer`].
pub type BufferImage = Image<Buffer>;

/// A container backed by a file.
pub type FileImage = Image<File>;

impl Image<File> {
    /// Opens the container file at `path`.
    pub fn load_from_path(path: impl AsRef<Path>, opts: LoadOpts) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(opts.writable)
            .open(path)?;
        Self::load(file, opts)
    }
}

impl<S: ContainerStore> Image<S> {
    /// Loads a container from an arbitrary backing store, decoding the
    /// header and descriptor table and validating the structural
    /// invariants.
    pub fn load(store: S, opts: LoadOpts) -> Result<Self> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        store
            .read_exact_at(0, &mut header_bytes)
            .map_err(|_| Error::FormatInvalid("image shorter than header".into()))?;
        let header = RawHeader::read_from_bytes(&header_bytes)
            .map_err(|_| Error::FormatInvalid("header decode failed".into()))?;

        if header.magic != MAGIC {
            return Err(Error::FormatInvalid("bad magic".into()));
        }
        if header.version != VERSION {
            return Err(Error::FormatInvalid("unsupported version".into()));
        }

        let descr_offset = header.descr_offset.get();
        let descr_size = header.descr_size.get();
        let descr_count = header.descr_count.get();
        let capacity = header.descr_capacity.get();
        let data_offset = header.data_offset.get();
        let data_size = header.data_size.get();

        let table_size = capacity.checked_mul(DESCRIPTOR_SIZE as i64);
        let table_end = descr_offset.checked_add(descr_size);
        if descr_offset < HEADER_SIZE as i64
            || capacity < 0
            || table_size != Some(descr_size)
            || descr_count < 0
            || descr_count > capacity
            || !table_end.is_some_and(|end| end <= data_offset)
            || data_size < 0
        {
            return Err(Error::FormatInvalid("header geometry out of bounds".into()));
        }

        let data_end = data_offset
            .checked_add(data_size)
            .ok_or_else(|| Error::FormatInvalid("data area size overflow".into()))?;
        let store_len = store.len()? as i64;
        if store_len < data_end {
            return Err(Error::FormatInvalid(
                "image shorter than declared data area".into(),
            ));
        }

        let mut table = vec![0u8; descr_size as usize];
        store
            .read_exact_at(descr_offset as u64, &mut table)
            .map_err(|_| Error::FormatInvalid("image shorter than descriptor table".into()))?;

        let mut descriptors = Vec::new();
        let mut ids = HashSet::new();
        let mut max_id = 0u32;
        let mut prim_sys = 0usize;

        for (index, slot) in table.chunks_exact(DESCRIPTOR_SIZE).enumerate() {
            let raw = RawDescriptor::read_from_bytes(slot)
                .map_err(|_| Error::FormatInvalid("descriptor decode failed".into()))?;
            if raw.used == 0 {
                continue;
            }

            let d = Descriptor::from_raw(raw, index)?;
            let id = d.id();
            if id == 0 {
                return Err(Error::FormatInvalid(format!(
                    "descriptor in slot {index} has zero ID"
                )));
            }
            if !ids.insert(id) {
                return Err(Error::FormatInvalid(format!("duplicate object ID {id}")));
            }
            max_id = max_id.max(id);

            let offset = raw.offset.get();
            let size = raw.size.get();
            let store_size = raw.size_with_padding.get();
            let object_end = offset.checked_add(store_size);
            if size < 0
                || store_size < size
                || offset < data_offset
                || !object_end.is_some_and(|end| end <= data_end)
            {
                return Err(Error::FormatInvalid(format!(
                    "object {id} outside the data area"
                )));
            }

            if matches!(d.partition_metadata(), Ok((_, PartType::PrimSys, _))) {
                prim_sys += 1;
                if prim_sys > 1 {
                    return Err(Error::FormatInvalid(
                        "multiple primary system partitions".into(),
                    ));
                }
            }

            descriptors.push(d);
        }

        if descriptors.len() as i64 != descr_count {
            return Err(Error::FormatInvalid(format!(
                "descriptor count mismatch: header says {descr_count}, table has {}",
                descriptors.len()
            )));
        }

        let groups: HashSet<u32> = descriptors
            .iter()
            .map(Descriptor::group_id)
            .filter(|&g| g != 0)
            .collect();
        for d in &descriptors {
            match d.link() {
                None => {}
                Some(LinkTarget::Object(id)) if ids.contains(&id) => {}
                Some(LinkTarget::Group(g)) if groups.contains(&g) => {}
                Some(target) => {
                    return Err(Error::FormatInvalid(format!(
                        "object {} links to missing target {target:?}",
                        d.id()
                    )));
                }
            }
        }

        Ok(Image {
            store: Some(store),
            writable: opts.writable,
            header,
            descriptors,
            max_id,
        })
    }

    /// Flushes pending header and table changes and releases the store.
    ///
    /// A second call fails with [`Error::AlreadyUnloaded`].
    pub fn unload(&mut self) -> Result<()> {
        if self.writable {
            self.flush()?;
        }
        match self.store.take() {
            Some(_) => Ok(()),
            None => Err(Error::AlreadyUnloaded),
        }
    }

    /// Flushes pending changes and returns the backing store.
    pub fn into_store(mut self) -> Result<S> {
        if self.writable {
            self.flush()?;
        }
        self.store.take().ok_or(Error::AlreadyUnloaded)
    }

    /// Rewrites the header and the full descriptor table.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let capacity = self.header.descr_capacity.get() as usize;
        let descr_offset = self.header.descr_offset.get() as u64;
        let mut table = vec![0u8; capacity * DESCRIPTOR_SIZE];
        for d in &self.descriptors {
            let start = d.index * DESCRIPTOR_SIZE;
            table[start..start + DESCRIPTOR_SIZE].copy_from_slice(d.raw.as_bytes());
        }
        let header = self.header;
        let store = self.writable_store()?;
        store.write_all_at(0, header.as_bytes())?;
        store.write_all_at(descr_offset, &table)?;
        Ok(())
    }

    pub(crate) fn store_ref(&self) -> Result<&S> {
        self.store.as_ref().ok_or(Error::AlreadyUnloaded)
    }

    pub(crate) fn writable_store(&mut self) -> Result<&mut S> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.store.as_mut().ok_or(Error::AlreadyUnloaded)
    }

    pub(crate) fn slot_offset(&self, index: usize) -> u64 {
        self.header.descr_offset.get() as u64 + (index * DESCRIPTOR_SIZE) as u64
    }

    /// Writes one descriptor slot back to the store.
    pub(crate) fn persist_slot(&mut self, index: usize, raw: RawDescriptor) -> Result<()> {
        let offset = self.slot_offset(index);
        self.writable_store()?.write_all_at(offset, raw.as_bytes())?;
        Ok(())
    }

    /// Writes the header back to the store.
    pub(crate) fn persist_header(&mut self) -> Result<()> {
        let header = self.header;
        self.writable_store()?.write_all_at(0, header.as_bytes())?;
        Ok(())
    }

    /// Returns the lowest-index free descriptor slot.
    pub(crate) fn free_slot(&self) -> Result<usize> {
        let capacity = self.header.descr_capacity.get() as usize;
        let used: HashSet<usize> = self.descriptors.iter().map(|d| d.index).collect();
        (0..capacity)
            .find(|i| !used.contains(i))
            .ok_or(Error::CapacityExceeded)
    }

    /// The container UUID.
    pub fn id(&self) -> Uuid {
        Uuid::from_bytes(self.header.id)
    }

    /// The primary architecture of the image.
    pub fn arch(&self) -> Arch {
        Arch::from_code(&self.header.arch)
    }

    /// The launch script region, with trailing NULs removed.
    pub fn launch_script(&self) -> String {
        String::from_utf8_lossy(format::trim_field(&self.header.launch)).into_owned()
    }

    /// The format version string.
    pub fn version(&self) -> String {
        String::from_utf8_lossy(format::trim_field(&self.header.version)).into_owned()
    }

    /// Image creation time, in seconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.header.created_at.get()
    }

    /// Last-modification time, in seconds since the Unix epoch.
    pub fn modified_at(&self) -> i64 {
        self.header.modified_at.get()
    }

    /// Number of live descriptors.
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Number of descriptor table slots.
    pub fn descriptor_capacity(&self) -> usize {
        self.header.descr_capacity.get() as usize
    }

    /// Absolute offset of the descriptor table.
    pub fn descriptors_offset(&self) -> u64 {
        self.header.descr_offset.get() as u64
    }

    /// Size of the descriptor table region in bytes.
    pub fn descriptors_size(&self) -> u64 {
        self.header.descr_size.get() as u64
    }

    /// Absolute offset of the data area.
    pub fn data_offset(&self) -> u64 {
        self.header.data_offset.get() as u64
    }

    /// Used bytes in the data area.
    pub fn data_size(&self) -> u64 {
        self.header.data_size.get() as u64
    }

    /// Iterates over all used descriptors in table order.
    pub fn descriptors_iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    /// Returns all descriptors matched by `selector`, in table order.
    pub fn descriptors(&self, selector: &Selector) -> Result<Vec<Descriptor>> {
        selector.check()?;
        Ok(self
            .descriptors
            .iter()
            .filter(|d| selector.matches(d))
            .cloned()
            .collect())
    }

    /// Returns the unique descriptor matched by `selector`.
    pub fn descriptor(&self, selector: &Selector) -> Result<Descriptor> {
        selector.check()?;
        let mut it = self.descriptors.iter().filter(|d| selector.matches(d));
        let first = it.next().ok_or(Error::ObjectNotFound)?;
        if it.next().is_some() {
            return Err(Error::MultipleObjectsFound);
        }
        Ok(first.clone())
    }

    /// Returns the primary system partition descriptor.
    pub fn primary_partition(&self) -> Result<Descriptor> {
        self.descriptor(&Selector::new().with_partition_type(PartType::PrimSys))
    }

    /// Returns the sorted object group numbers present in the image.
    pub fn group_ids(&self) -> Vec<u32> {
        let mut groups: Vec<u32> = self
            .descriptors
            .iter()
            .map(Descriptor::group_id)
            .filter(|&g| g != 0)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// Returns a positioned reader over the payload of `descriptor`.
    pub fn reader(&self, descriptor: &Descriptor) -> Result<ObjectReader<'_, S>> {
        let store = self.store_ref()?;
        Ok(ObjectReader::new(
            store,
            descriptor.offset(),
            descriptor.size(),
        ))
    }

    /// Reads the full payload of `descriptor`.
    pub fn data(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let store = self.store_ref()?;
        let mut buf = vec![0u8; descriptor.size() as usize];
        store.read_exact_at(descriptor.offset(), &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn position_of(&self, id: u32) -> Result<usize> {
        if id == 0 {
            return Err(Error::InvalidObjectId);
        }
        self.descriptors
            .iter()
            .position(|d| d.id() == id)
            .ok_or(Error::ObjectNotFound)
    }
}

impl<S> Drop for Image<S> {
    fn drop(&mut self) {
        // Changes are persisted eagerly by each mutation; dropping without
        // an unload only skips the final table rewrite.
        if self.store.is_some() && self.writable {
            log::debug!("image dropped without unload");
        }
    }
}

impl<S> std::fmt::Debug for Image<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &Uuid::from_bytes(self.header.id))
            .field("descriptors", &self.descriptors.len())
            .field("writable", &self.writable)
            .field("loaded", &self.store.is_some())
            .finish()
    }
}
