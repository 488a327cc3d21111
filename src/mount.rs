//! gcsfuse mount descriptors.
//!
//! Build pods mount object-storage buckets read-only through `gcsfuse`.
//! A mount is described compactly as `bucket[/onlydir]:/mount/path`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A bucket mounted into the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsFuseMount {
    /// Bucket name.
    pub bucket: String,
    /// Absolute mount point inside the container.
    pub mount: String,
    /// Restricts the mount to one prefix of the bucket; empty for the whole bucket.
    pub only_dir: String,
}

impl GcsFuseMount {
    /// Parses `bucket[/onlydir]:/mount`.
    ///
    /// Only the first `:` and the first `/` before it are significant; the
    /// pieces are not validated further.
    pub fn parse(s: &str) -> Result<Self> {
        let (before, mount) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidMountSpec(s.to_string()))?;

        let (bucket, only_dir) = before.split_once('/').unwrap_or((before, ""));

        Ok(Self {
            bucket: bucket.to_string(),
            mount: mount.to_string(),
            only_dir: only_dir.to_string(),
        })
    }
}

impl FromStr for GcsFuseMount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dir_keeps_remaining_slashes() {
        let m = GcsFuseMount::parse("bucket/a/b:/mnt").unwrap();
        assert_eq!(m.bucket, "bucket");
        assert_eq!(m.only_dir, "a/b");
    }

    #[test]
    fn test_mount_keeps_remaining_colons() {
        let m = GcsFuseMount::parse("bucket:/mnt:ro").unwrap();
        assert_eq!(m.mount, "/mnt:ro");
    }
}
