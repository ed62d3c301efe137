//! Command-line tool for inspecting and manipulating SIF images.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};

use sif::{Arch, DataType, FsType, PartType};
use siftool::{App, ObjectSpec};

/// siftool
#[derive(Debug, Parser)]
#[clap(name = "siftool", version)]
struct Cli {
    /// Directory holding trusted public keys
    #[clap(long, default_value = ".siftool-keys")]
    keys_dir: PathBuf,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DataTypeArg {
    Deffile,
    Envvar,
    Labels,
    Partition,
    Genericjson,
    Generic,
    Cryptomessage,
    Sbom,
    Ocirootindex,
    Ociblob,
}

impl From<DataTypeArg> for DataType {
    fn from(value: DataTypeArg) -> Self {
        match value {
            DataTypeArg::Deffile => DataType::Deffile,
            DataTypeArg::Envvar => DataType::EnvVar,
            DataTypeArg::Labels => DataType::Labels,
            DataTypeArg::Partition => DataType::Partition,
            DataTypeArg::Genericjson => DataType::GenericJson,
            DataTypeArg::Generic => DataType::Generic,
            DataTypeArg::Cryptomessage => DataType::CryptoMessage,
            DataTypeArg::Sbom => DataType::Sbom,
            DataTypeArg::Ocirootindex => DataType::OciRootIndex,
            DataTypeArg::Ociblob => DataType::OciBlob,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FsTypeArg {
    Squash,
    Ext3,
    Immuobj,
    Raw,
    Encryptedsquash,
}

impl From<FsTypeArg> for FsType {
    fn from(value: FsTypeArg) -> Self {
        match value {
            FsTypeArg::Squash => FsType::Squash,
            FsTypeArg::Ext3 => FsType::Ext3,
            FsTypeArg::Immuobj => FsType::ImmuObj,
            FsTypeArg::Raw => FsType::Raw,
            FsTypeArg::Encryptedsquash => FsType::EncryptedSquash,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PartTypeArg {
    System,
    Primsys,
    Data,
    Overlay,
}

impl From<PartTypeArg> for PartType {
    fn from(value: PartTypeArg) -> Self {
        match value {
            PartTypeArg::System => PartType::System,
            PartTypeArg::Primsys => PartType::PrimSys,
            PartTypeArg::Data => PartType::Data,
            PartTypeArg::Overlay => PartType::Overlay,
        }
    }
}

/// Object options shared by `create` and `add`.
#[derive(Debug, Parser)]
struct ObjectArgs {
    /// Payload file
    file: PathBuf,

    /// Data type of the object
    #[clap(long, value_enum, default_value_t = DataTypeArg::Generic)]
    datatype: DataTypeArg,

    /// Object name (defaults to the payload file name)
    #[clap(long)]
    name: Option<String>,

    /// Object group ID (0 leaves the object ungrouped)
    #[clap(long)]
    groupid: Option<u32>,

    /// Object ID to link to
    #[clap(long)]
    link: Option<u32>,

    /// Partition filesystem type
    #[clap(long, value_enum)]
    partfs: Option<FsTypeArg>,

    /// Partition type
    #[clap(long, value_enum)]
    parttype: Option<PartTypeArg>,

    /// Partition architecture (e.g. amd64)
    #[clap(long)]
    partarch: Option<String>,
}

impl ObjectArgs {
    fn into_spec(self) -> Result<ObjectSpec> {
        let partition = match (self.partfs, self.parttype, &self.partarch) {
            (None, None, None) => None,
            (Some(fs), Some(part), Some(arch)) => {
                let arch = Arch::from_name(arch)
                    .ok_or_else(|| anyhow::anyhow!("unknown architecture: {arch}"))?;
                Some((fs.into(), part.into(), arch))
            }
            _ => bail!("--partfs, --parttype and --partarch must be used together"),
        };
        Ok(ObjectSpec {
            data_type: self.datatype.into(),
            path: self.file,
            name: self.name,
            group_id: self.groupid,
            link_id: self.link,
            partition,
        })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new empty image
    New { sif: PathBuf },
    /// Create an image holding one or more objects
    Create {
        sif: PathBuf,
        #[clap(flatten)]
        object: ObjectArgs,
    },
    /// Add an object to an image
    Add {
        sif: PathBuf,
        #[clap(flatten)]
        object: ObjectArgs,
    },
    /// Delete an object from an image
    Del { sif: PathBuf, id: u32 },
    /// List the objects in an image
    List { sif: PathBuf },
    /// Dump an object payload to stdout
    Dump { sif: PathBuf, id: u32 },
    /// Print the image header
    Header { sif: PathBuf },
    /// Print detailed information about an object
    Info { sif: PathBuf, id: u32 },
    /// Mark a partition as the primary system partition
    Setprimpart { sif: PathBuf, id: u32 },
    /// Sign object groups with an armored OpenPGP secret key
    Sign {
        sif: PathBuf,
        /// Armored secret key file
        #[clap(long)]
        key: PathBuf,
        /// Sign only this object group
        #[clap(long)]
        groupid: Option<u32>,
    },
    /// Verify image signatures
    Verify {
        sif: PathBuf,
        /// Armored public key files; defaults to the keys directory
        #[clap(long)]
        key: Vec<PathBuf>,
        /// Verify only this object group
        #[clap(long)]
        groupid: Option<u32>,
    },
    /// Manage the trusted keys directory
    Keys {
        #[clap(subcommand)]
        cmd: KeysCommand,
    },
    /// Mount the primary system partition
    Mount { sif: PathBuf, mountpoint: PathBuf },
    /// Unmount a mounted image
    Unmount { mountpoint: PathBuf },
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    /// Add an armored public key to the keys directory
    Add { key: PathBuf },
    /// List keys in the keys directory
    List,
}

fn keyring_paths(keys_dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if keys_dir.is_dir() {
        for entry in std::fs::read_dir(keys_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "asc") {
                paths.push(path);
            }
        }
        paths.sort();
    }
    Ok(paths)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut app = App::new();

    match cli.cmd {
        Command::New { sif } => app.new_image(&sif),
        Command::Create { sif, object } => app.create(&sif, vec![object.into_spec()?]),
        Command::Add { sif, object } => app.add(&sif, object.into_spec()?),
        Command::Del { sif, id } => app.del(&sif, id),
        Command::List { sif } => app.list(&sif),
        Command::Dump { sif, id } => app.dump(&sif, id),
        Command::Header { sif } => app.header(&sif),
        Command::Info { sif, id } => app.info(&sif, id),
        Command::Setprimpart { sif, id } => app.setprimpart(&sif, id),
        Command::Sign { sif, key, groupid } => app.sign(&sif, &key, groupid),
        Command::Verify { sif, key, groupid } => {
            let keys = if key.is_empty() {
                keyring_paths(&cli.keys_dir)?
            } else {
                key
            };
            app.verify(&sif, &keys, groupid)
        }
        Command::Keys { cmd } => match cmd {
            KeysCommand::Add { key } => app.keys_add(&cli.keys_dir, &key),
            KeysCommand::List => app.keys_list(&cli.keys_dir),
        },
        Command::Mount { sif, mountpoint } => app.mount(&sif, &mountpoint),
        Command::Unmount { mountpoint } => app.unmount(&mountpoint),
    }
}
