//! Library backing the `siftool` command-line tool.
//!
//! Each CLI command maps to one method on [`App`], writing human-readable
//! output to the configured writer.  Flag parsing lives in the binary; key
//! material is armored OpenPGP files on disk.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};

use sif::{
    AddOpts, Arch, CreateOpts, DataType, DeleteOpts, DescriptorInput, FsType, Image, LinkTarget,
    LoadOpts, PartType, Selector, SetOpts,
};
use sif_integrity::{Signer, SignerOpts, Verifier, VerifierOpts};

/// Specification of one object to add, shared by `create` and `add`.
#[derive(Debug)]
pub struct ObjectSpec {
    /// Data type of the object.
    pub data_type: DataType,
    /// Path to the payload file.
    pub path: PathBuf,
    /// Object name; defaults to the payload file name.
    pub name: Option<String>,
    /// Object group; omitted or `Some(0)` leaves the object ungrouped.
    pub group_id: Option<u32>,
    /// Object ID to link to.
    pub link_id: Option<u32>,
    /// Partition metadata, required for partition objects.
    pub partition: Option<(FsType, PartType, Arch)>,
}

impl ObjectSpec {
    fn into_input(self, payload: &[u8]) -> Result<DescriptorInput<'_>> {
        let mut input = DescriptorInput::new(self.data_type, payload);

        let name = match self.name {
            Some(name) => Some(name),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        };
        if let Some(name) = name {
            input = input.with_name(name);
        }
        input = match self.group_id {
            Some(0) => input.no_group(),
            Some(g) => input.with_group_id(g),
            None => input,
        };
        if let Some(id) = self.link_id {
            input = input.with_linked_id(id);
        }
        if let Some((fs, part, arch)) = self.partition {
            input = input.with_partition_metadata(fs, part, arch)?;
        }
        Ok(input)
    }
}

/// The siftool application: one method per CLI command.
pub struct App<W> {
    out: W,
}

impl App<io::Stdout> {
    /// Creates an app writing to stdout.
    pub fn new() -> Self {
        App { out: io::stdout() }
    }
}

impl Default for App<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> App<W> {
    /// Creates an app writing to `out`.
    pub fn with_output(out: W) -> Self {
        App { out }
    }

    /// `siftool new`: creates an empty image.
    pub fn new_image(&mut self, path: &Path) -> Result<()> {
        let mut image = Image::create_at_path(path, CreateOpts::new())
            .with_context(|| format!("creating {}", path.display()))?;
        image.unload()?;
        Ok(())
    }

    /// `siftool create`: creates an image holding the given objects.
    pub fn create(&mut self, path: &Path, specs: Vec<ObjectSpec>) -> Result<()> {
        let payloads: Vec<Vec<u8>> = specs
            .iter()
            .map(|s| std::fs::read(&s.path).with_context(|| format!("reading {}", s.path.display())))
            .collect::<Result<_>>()?;
        let mut inputs = Vec::with_capacity(specs.len());
        for (spec, payload) in specs.into_iter().zip(&payloads) {
            inputs.push(spec.into_input(payload)?);
        }
        let mut image = Image::create_at_path(path, CreateOpts::new().with_descriptors(inputs))
            .with_context(|| format!("creating {}", path.display()))?;
        image.unload()?;
        Ok(())
    }

    /// `siftool add`: adds one object to an existing image.
    pub fn add(&mut self, path: &Path, spec: ObjectSpec) -> Result<()> {
        let payload =
            std::fs::read(&spec.path).with_context(|| format!("reading {}", spec.path.display()))?;
        let mut image = Image::load_from_path(path, LoadOpts::new().writable())?;
        image.add_object(spec.into_input(&payload)?, AddOpts::new())?;
        image.unload()?;
        Ok(())
    }

    /// `siftool del`: deletes an object by ID.
    pub fn del(&mut self, path: &Path, id: u32) -> Result<()> {
        let mut image = Image::load_from_path(path, LoadOpts::new().writable())?;
        image.delete_object(id, DeleteOpts::new().compact(true))?;
        image.unload()?;
        Ok(())
    }

    /// `siftool setprimpart`: marks a partition as the primary system
    /// partition.
    pub fn setprimpart(&mut self, path: &Path, id: u32) -> Result<()> {
        let mut image = Image::load_from_path(path, LoadOpts::new().writable())?;
        image.set_prim_part(id, SetOpts::new())?;
        image.unload()?;
        Ok(())
    }

    /// `siftool header`: prints the global header.
    pub fn header(&mut self, path: &Path) -> Result<()> {
        let image = Image::load_from_path(path, LoadOpts::new())?;
        writeln!(self.out, "Launch:        {}", image.launch_script().trim_end())?;
        writeln!(self.out, "Version:       {}", image.version())?;
        writeln!(self.out, "Arch:          {}", image.arch())?;
        writeln!(self.out, "ID:            {}", image.id())?;
        writeln!(self.out, "Created at:    {}", image.created_at())?;
        writeln!(self.out, "Modified at:   {}", image.modified_at())?;
        writeln!(
            self.out,
            "Descriptors:   {} used, {} total, offset {}",
            image.descriptor_count(),
            image.descriptor_capacity(),
            image.descriptors_offset()
        )?;
        writeln!(
            self.out,
            "Data:          {} bytes, offset {}",
            image.data_size(),
            image.data_offset()
        )?;
        Ok(())
    }

    /// `siftool list`: prints the descriptor table.
    pub fn list(&mut self, path: &Path) -> Result<()> {
        let image = Image::load_from_path(path, LoadOpts::new())?;
        writeln!(self.out, "{:<4} {:<6} {:<8} {:<22} {:<10} NAME", "ID", "GROUP", "LINK", "TYPE", "SIZE")?;
        for d in image.descriptors_iter() {
            let group = match d.group_id() {
                0 => "NONE".to_string(),
                g => g.to_string(),
            };
            let link = match d.link() {
                None => "NONE".to_string(),
                Some(LinkTarget::Object(id)) => id.to_string(),
                Some(LinkTarget::Group(g)) => format!("{g} (G)"),
            };
            writeln!(
                self.out,
                "{:<4} {:<6} {:<8} {:<22} {:<10} {}",
                d.id(),
                group,
                link,
                d.data_type().to_string(),
                d.size(),
                d.name()
            )?;
        }
        Ok(())
    }

    /// `siftool info`: prints one descriptor in detail.
    pub fn info(&mut self, path: &Path, id: u32) -> Result<()> {
        let image = Image::load_from_path(path, LoadOpts::new())?;
        let d = image.descriptor(&Selector::new().with_id(id))?;

        writeln!(self.out, "ID:            {}", d.id())?;
        writeln!(self.out, "Type:          {}", d.data_type())?;
        writeln!(self.out, "Group:         {}", d.group_id())?;
        writeln!(self.out, "Offset:        {}", d.offset())?;
        writeln!(self.out, "Size:          {}", d.size())?;
        writeln!(self.out, "Store size:    {}", d.size_with_padding())?;
        writeln!(self.out, "Created at:    {}", d.created_at())?;
        writeln!(self.out, "Modified at:   {}", d.modified_at())?;
        writeln!(self.out, "UID/GID:       {}/{}", d.uid(), d.gid())?;
        writeln!(self.out, "Name:          {}", d.name())?;

        match d.data_type() {
            DataType::Partition => {
                let (fs, part, arch) = d.partition_metadata()?;
                writeln!(self.out, "Fs type:       {fs}")?;
                writeln!(self.out, "Part type:     {part}")?;
                writeln!(self.out, "Arch:          {arch}")?;
            }
            DataType::Signature => {
                let (hash, entity) = d.signature_metadata()?;
                let end = entity.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                writeln!(self.out, "Hash type:     {hash}")?;
                writeln!(self.out, "Entity:        {}", hex::encode(&entity[..end]))?;
            }
            DataType::CryptoMessage => {
                let (format, message) = d.crypto_message_metadata()?;
                writeln!(self.out, "Format:        {format:?}")?;
                writeln!(self.out, "Message:       {message:?}")?;
            }
            _ => {}
        }
        Ok(())
    }

    /// `siftool dump`: writes an object payload to the output.
    pub fn dump(&mut self, path: &Path, id: u32) -> Result<()> {
        let image = Image::load_from_path(path, LoadOpts::new())?;
        let d = image.descriptor(&Selector::new().with_id(id))?;
        let mut reader = image.reader(&d)?;
        io::copy(&mut reader, &mut self.out)?;
        Ok(())
    }

    /// `siftool sign`: signs object groups with an armored secret key.
    pub fn sign(&mut self, path: &Path, key_path: &Path, group: Option<u32>) -> Result<()> {
        let key = load_secret_key(key_path)?;
        let mut image = Image::load_from_path(path, LoadOpts::new().writable())?;

        let mut opts = SignerOpts::new().with_entity(key);
        if let Some(group) = group {
            opts = opts.group(group);
        }
        Signer::new(&mut image, opts)?.sign()?;
        image.unload()?;
        writeln!(self.out, "Signature added to {}", path.display())?;
        Ok(())
    }

    /// `siftool verify`: verifies signatures against armored public keys.
    pub fn verify(&mut self, path: &Path, key_paths: &[PathBuf], group: Option<u32>) -> Result<()> {
        let keyring = key_paths
            .iter()
            .map(|p| load_public_key(p))
            .collect::<Result<Vec<_>>>()?;
        let image = Image::load_from_path(path, LoadOpts::new())?;

        let mut opts = VerifierOpts::new().with_keyring(keyring);
        if let Some(group) = group {
            opts = opts.group(group);
        }
        let mut verifier = Verifier::new(&image, opts)?;
        verifier.verify()?;

        for entity in verifier.any_signed_by()? {
            let end = entity.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            writeln!(self.out, "Verified signature from {}", hex::encode(&entity[..end]))?;
        }
        Ok(())
    }

    /// `siftool keys add`: stores an armored public key in the keys
    /// directory.
    pub fn keys_add(&mut self, keys_dir: &Path, key_path: &Path) -> Result<()> {
        let key = load_public_key(key_path)?;
        let fingerprint = {
            use pgp::types::KeyTrait;
            hex::encode(key.fingerprint())
        };
        std::fs::create_dir_all(keys_dir)?;
        let dest = keys_dir.join(format!("{fingerprint}.asc"));
        std::fs::copy(key_path, &dest)
            .with_context(|| format!("storing key at {}", dest.display()))?;
        writeln!(self.out, "Added key {fingerprint}")?;
        Ok(())
    }

    /// `siftool keys list`: lists the stored public keys.
    pub fn keys_list(&mut self, keys_dir: &Path) -> Result<()> {
        if !keys_dir.exists() {
            return Ok(());
        }
        let mut names: Vec<String> = std::fs::read_dir(keys_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".asc"))
            .collect();
        names.sort();
        for name in names {
            writeln!(self.out, "{}", name.trim_end_matches(".asc"))?;
        }
        Ok(())
    }

    /// `siftool mount`: mounts the primary system partition with
    /// squashfuse.
    pub fn mount(&mut self, path: &Path, mountpoint: &Path) -> Result<()> {
        let image = Image::load_from_path(path, LoadOpts::new())?;
        let d = image.primary_partition()?;
        let (fs, _, _) = d.partition_metadata()?;
        if fs != FsType::Squash {
            bail!("mount supports only squashfs partitions, found {fs}");
        }
        let offset = d.offset();
        drop(image);

        let status = Command::new("squashfuse")
            .arg("-o")
            .arg(format!("offset={offset}"))
            .arg(path)
            .arg(mountpoint)
            .status()
            .context("launching squashfuse")?;
        if !status.success() {
            bail!("squashfuse failed with {status}");
        }
        Ok(())
    }

    /// `siftool unmount`: unmounts a previously mounted image.
    pub fn unmount(&mut self, mountpoint: &Path) -> Result<()> {
        let status = Command::new("fusermount")
            .arg("-u")
            .arg(mountpoint)
            .status()
            .context("launching fusermount")?;
        if !status.success() {
            bail!("fusermount failed with {status}");
        }
        Ok(())
    }
}

fn load_secret_key(path: &Path) -> Result<SignedSecretKey> {
    let mut armored = String::new();
    File::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .read_to_string(&mut armored)?;
    let (key, _) = SignedSecretKey::from_string(&armored)
        .with_context(|| format!("parsing secret key {}", path.display()))?;
    Ok(key)
}

fn load_public_key(path: &Path) -> Result<SignedPublicKey> {
    let mut armored = String::new();
    File::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .read_to_string(&mut armored)?;
    let (key, _) = SignedPublicKey::from_string(&armored)
        .with_context(|| format!("parsing public key {}", path.display()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_payload(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn generic_spec(path: PathBuf) -> ObjectSpec {
        ObjectSpec {
            data_type: DataType::Generic,
            path,
            name: None,
            group_id: None,
            link_id: None,
            partition: None,
        }
    }

    #[test]
    fn create_list_info_dump_del() {
        let dir = tempfile::tempdir().unwrap();
        let sif_path = dir.path().join("test.sif");
        let payload = write_payload(dir.path(), "payload.txt", b"hello world");

        let mut app = App::with_output(Vec::new());
        app.create(&sif_path, vec![generic_spec(payload)]).unwrap();

        app.out.clear();
        app.list(&sif_path).unwrap();
        let listing = String::from_utf8(app.out.clone()).unwrap();
        assert!(listing.contains("payload.txt"), "listing: {listing}");
        assert!(listing.contains("Generic/Raw"), "listing: {listing}");

        app.out.clear();
        app.info(&sif_path, 1).unwrap();
        let info = String::from_utf8(app.out.clone()).unwrap();
        assert!(info.contains("ID:            1"), "info: {info}");

        app.out.clear();
        app.dump(&sif_path, 1).unwrap();
        assert_eq!(app.out, b"hello world");

        app.out.clear();
        app.del(&sif_path, 1).unwrap();
        app.header(&sif_path).unwrap();
        let header = String::from_utf8(app.out.clone()).unwrap();
        assert!(header.contains("0 used"), "header: {header}");
    }

    #[test]
    fn add_appends_object() {
        let dir = tempfile::tempdir().unwrap();
        let sif_path = dir.path().join("test.sif");
        let payload = write_payload(dir.path(), "extra.bin", b"\x01\x02");

        let mut app = App::with_output(Vec::new());
        app.new_image(&sif_path).unwrap();
        app.add(&sif_path, generic_spec(payload)).unwrap();

        app.out.clear();
        app.list(&sif_path).unwrap();
        let listing = String::from_utf8(app.out.clone()).unwrap();
        assert!(listing.contains("extra.bin"), "listing: {listing}");
    }

    #[test]
    fn setprimpart_updates_header_arch() {
        let dir = tempfile::tempdir().unwrap();
        let sif_path = dir.path().join("test.sif");
        let payload = write_payload(dir.path(), "rootfs", b"\xfa\xce");

        let mut app = App::with_output(Vec::new());
        app.create(
            &sif_path,
            vec![ObjectSpec {
                data_type: DataType::Partition,
                path: payload,
                name: None,
                group_id: None,
                link_id: None,
                partition: Some((FsType::Raw, PartType::System, Arch::Arm64)),
            }],
        )
        .unwrap();
        app.setprimpart(&sif_path, 1).unwrap();

        app.out.clear();
        app.header(&sif_path).unwrap();
        let header = String::from_utf8(app.out.clone()).unwrap();
        assert!(header.contains("Arch:          arm64"), "header: {header}");
    }
}
