//! Architecture normalization.
//!
//! Build tooling, OCI platforms and Kubernetes node labels all spell
//! architectures differently (`x86_64` vs `amd64`, `aarch64` vs `arm64`,
//! `armv7` vs `arm` + variant `v7`). [`Arch`] is the single normalized form
//! used as map key by the composer and as label value by the pod builder.

use crate::constants::DEFAULT_OS;
use crate::image::Platform;
use std::fmt;
use std::str::FromStr;

/// CPU architecture of a build target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    Amd64,
    Arm64,
    ArmV7,
    ArmV6,
    I386,
    Ppc64le,
    S390x,
    Riscv64,
    Loong64,
    /// Anything else, lower-cased and passed through unchanged.
    Other(String),
}

impl Arch {
    /// Normalizes an architecture string.
    ///
    /// Accepts OCI names (`amd64`, `arm/v7`), kernel names (`x86_64`,
    /// `aarch64`) and distro names (`armhf`, `armv7`). Never fails: unknown
    /// values become [`Arch::Other`].
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "amd64" | "x86_64" | "x86-64" => Self::Amd64,
            "arm64" | "aarch64" | "arm64/v8" => Self::Arm64,
            "arm" | "armv7" | "armv7l" | "arm/v7" => Self::ArmV7,
            "armhf" | "armv6" | "arm/v6" => Self::ArmV6,
            "386" | "i386" | "i686" | "x86" => Self::I386,
            "ppc64le" => Self::Ppc64le,
            "s390x" => Self::S390x,
            "riscv64" => Self::Riscv64,
            "loong64" | "loongarch64" => Self::Loong64,
            _ => Self::Other(s),
        }
    }

    /// Maps an OCI platform descriptor to an architecture, honoring the
    /// variant field for 32-bit ARM.
    pub fn from_platform(platform: &Platform) -> Self {
        match (platform.architecture.as_str(), platform.variant.as_deref()) {
            ("arm", Some("v6")) => Self::ArmV6,
            ("arm", Some(variant)) if variant != "v7" => {
                Self::Other(format!("arm/{}", variant))
            }
            (arch, _) => Self::parse(arch),
        }
    }

    /// Returns the normalized name (`amd64`, `arm64`, `arm/v7`, ...).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::ArmV7 => "arm/v7",
            Self::ArmV6 => "arm/v6",
            Self::I386 => "386",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::Loong64 => "loong64",
            Self::Other(s) => s,
        }
    }

    /// Returns the architecture as the OCI `architecture` field and the
    /// Kubernetes `kubernetes.io/arch` node label spell it (no variant).
    pub fn oci_arch(&self) -> &str {
        match self {
            Self::ArmV7 | Self::ArmV6 => "arm",
            Self::Other(s) => s.split('/').next().unwrap_or(s),
            other => other.as_str(),
        }
    }

    /// Returns the OCI platform variant, if the architecture has one.
    pub fn variant(&self) -> Option<&str> {
        match self {
            Self::ArmV7 => Some("v7"),
            Self::ArmV6 => Some("v6"),
            Self::Other(s) => s.split_once('/').map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns true for 64-bit ARM, which has its own node pools.
    pub fn is_arm64(&self) -> bool {
        matches!(self, Self::Arm64)
    }

    /// Returns the `linux/<arch>` platform for images built from scratch.
    pub fn platform(&self) -> Platform {
        Platform {
            architecture: self.oci_arch().to_string(),
            os: DEFAULT_OS.to_string(),
            os_version: None,
            os_features: None,
            variant: self.variant().map(String::from),
            features: None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for Arch {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_normalize() {
        assert_eq!(Arch::parse("x86_64"), Arch::Amd64);
        assert_eq!(Arch::parse("aarch64"), Arch::Arm64);
        assert_eq!(Arch::parse("ARM64"), Arch::Arm64);
        assert_eq!(Arch::parse("armv7"), Arch::ArmV7);
        assert_eq!(Arch::parse("armhf"), Arch::ArmV6);
        assert_eq!(Arch::parse("mips64"), Arch::Other("mips64".to_string()));
    }

    #[test]
    fn test_platform_round_trip() {
        for arch in [Arch::Amd64, Arch::Arm64, Arch::ArmV7, Arch::ArmV6, Arch::I386] {
            assert_eq!(Arch::from_platform(&arch.platform()), arch);
        }
    }

    #[test]
    fn test_arm_variant_split() {
        let p = Arch::ArmV7.platform();
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant.as_deref(), Some("v7"));
        assert_eq!(p.os, "linux");
    }
}
