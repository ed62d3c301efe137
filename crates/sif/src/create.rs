//! Container creation.

use std::fs::{File, OpenOptions};
use std::path::Path;

use uuid::Uuid;
use zerocopy::{FromZeros, IntoBytes};

use crate::{
    image::now_unix,
    input::DescriptorInput,
    format::{
        pad_field, RawHeader, DEFAULT_DESCRIPTOR_CAPACITY, DEFAULT_LAUNCH_SCRIPT,
        DESCRIPTOR_SIZE, HEADER_SIZE, LAUNCH_LEN, MAGIC, VERSION,
    },
    mutate::AddOpts,
    store::ContainerStore,
    Error, Image, Result,
};

/// Options for creating a fresh container.
pub struct CreateOpts<'a> {
    pub(crate) id: Option<Uuid>,
    pub(crate) time: Option<i64>,
    pub(crate) deterministic: bool,
    pub(crate) launch: String,
    pub(crate) capacity: usize,
    pub(crate) inputs: Vec<DescriptorInput<'a>>,
}

impl Default for CreateOpts<'_> {
    fn default() -> Self {
        CreateOpts {
            id: None,
            time: None,
            deterministic: false,
            launch: DEFAULT_LAUNCH_SCRIPT.into(),
            capacity: DEFAULT_DESCRIPTOR_CAPACITY,
            inputs: Vec::new(),
        }
    }
}

impl<'a> CreateOpts<'a> {
    /// Creates the default option set: random UUID, current time, default
    /// launch script, no initial objects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the container UUID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Pins the creation and modification time.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Zeroes all variable fields (UUID, times, uid, gid) so that identical
    /// inputs produce bit-identical images.  Explicit `with_id`/`with_time`
    /// values still apply.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Overrides the launch script region (at most [`LAUNCH_LEN`] bytes).
    pub fn with_launch_script(mut self, script: impl Into<String>) -> Self {
        self.launch = script.into();
        self
    }

    /// Sets the number of descriptor table slots.
    pub fn with_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Adds initial data objects, appended in order.
    pub fn with_descriptors(mut self, inputs: impl IntoIterator<Item = DescriptorInput<'a>>) -> Self {
        self.inputs.extend(inputs);
        self
    }
}

impl Image<File> {
    /// Creates a container file at `path`, truncating any existing file.
    pub fn create_at_path(path: impl AsRef<Path>, opts: CreateOpts) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::create(file, opts)
    }
}

impl<S: ContainerStore> Image<S> {
    /// Writes a fresh container into `store` and returns the writable
    /// handle.
    pub fn create(mut store: S, opts: CreateOpts) -> Result<Self> {
        let launch = pad_field::<LAUNCH_LEN>(opts.launch.as_bytes()).ok_or(
            Error::LaunchScriptTooLong {
                len: opts.launch.len(),
                limit: LAUNCH_LEN,
            },
        )?;

        let time = opts
            .time
            .unwrap_or_else(|| if opts.deterministic { 0 } else { now_unix() });
        let id = opts.id.unwrap_or_else(|| {
            if opts.deterministic {
                Uuid::nil()
            } else {
                Uuid::new_v4()
            }
        });

        let descr_size = opts.capacity * DESCRIPTOR_SIZE;
        let data_offset = HEADER_SIZE + descr_size;

        let mut header = RawHeader::new_zeroed();
        header.launch = launch;
        header.magic = MAGIC;
        header.version = VERSION;
        header.arch = crate::Arch::Unknown.code();
        header.id = *id.as_bytes();
        header.created_at.set(time);
        header.modified_at.set(time);
        header.descr_offset.set(HEADER_SIZE as i64);
        header.descr_size.set(descr_size as i64);
        header.descr_count.set(0);
        header.descr_capacity.set(opts.capacity as i64);
        header.data_offset.set(data_offset as i64);
        header.data_size.set(0);

        store.set_len(data_offset as u64)?;
        store.write_all_at(0, header.as_bytes())?;
        store.write_all_at(HEADER_SIZE as u64, &vec![0u8; descr_size])?;

        let mut image = Image {
            store: Some(store),
            writable: true,
            header,
            descriptors: Vec::new(),
            max_id: 0,
        };

        // Initial objects share the container timestamp unless they pin
        // their own.
        let mut add_opts = AddOpts::new().with_time(time);
        if opts.deterministic {
            add_opts = add_opts.deterministic();
        }
        for input in opts.inputs {
            image.add_object(input, add_opts)?;
        }

        Ok(image)
    }
}
