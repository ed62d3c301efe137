//! Architecture tags and their on-disk codes.

use std::fmt;

use crate::format::ARCH_LEN;

/// CPU architecture of a system partition, from the closed set the header
/// can express.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    /// x86 (32-bit).
    I386,
    /// x86-64.
    Amd64,
    /// ARM (32-bit).
    Arm,
    /// AArch64.
    Arm64,
    /// PowerPC 64-bit big-endian.
    Ppc64,
    /// PowerPC 64-bit little-endian.
    Ppc64le,
    /// MIPS big-endian.
    Mips,
    /// MIPS little-endian.
    Mipsle,
    /// MIPS64 big-endian.
    Mips64,
    /// MIPS64 little-endian.
    Mips64le,
    /// IBM Z.
    S390x,
    /// Unknown or not applicable.
    Unknown,
}

impl Arch {
    /// The architecture name, e.g. `"amd64"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::I386 => "386",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Ppc64 => "ppc64",
            Arch::Ppc64le => "ppc64le",
            Arch::Mips => "mips",
            Arch::Mipsle => "mipsle",
            Arch::Mips64 => "mips64",
            Arch::Mips64le => "mips64le",
            Arch::S390x => "s390x",
            Arch::Unknown => "unknown",
        }
    }

    /// Parse an architecture name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "386" => Arch::I386,
            "amd64" => Arch::Amd64,
            "arm" => Arch::Arm,
            "arm64" => Arch::Arm64,
            "ppc64" => Arch::Ppc64,
            "ppc64le" => Arch::Ppc64le,
            "mips" => Arch::Mips,
            "mipsle" => Arch::Mipsle,
            "mips64" => Arch::Mips64,
            "mips64le" => Arch::Mips64le,
            "s390x" => Arch::S390x,
            "unknown" => Arch::Unknown,
            _ => return None,
        })
    }

    /// The two-digit header code for this architecture.
    pub(crate) fn code(&self) -> [u8; ARCH_LEN] {
        let code: &[u8; 2] = match self {
            Arch::I386 => b"01",
            Arch::Amd64 => b"02",
            Arch::Arm => b"03",
            Arch::Arm64 => b"04",
            Arch::Ppc64 => b"05",
            Arch::Ppc64le => b"06",
            Arch::Mips => b"07",
            Arch::Mipsle => b"08",
            Arch::Mips64 => b"09",
            Arch::Mips64le => b"10",
            Arch::S390x => b"11",
            Arch::Unknown => b"00",
        };
        [code[0], code[1], 0]
    }

    /// Decode a header code.  Unknown codes map to [`Arch::Unknown`].
    pub(crate) fn from_code(code: &[u8; ARCH_LEN]) -> Self {
        match &code[..2] {
            b"01" => Arch::I386,
            b"02" => Arch::Amd64,
            b"03" => Arch::Arm,
            b"04" => Arch::Arm64,
            b"05" => Arch::Ppc64,
            b"06" => Arch::Ppc64le,
            b"07" => Arch::Mips,
            b"08" => Arch::Mipsle,
            b"09" => Arch::Mips64,
            b"10" => Arch::Mips64le,
            b"11" => Arch::S390x,
            _ => Arch::Unknown,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
