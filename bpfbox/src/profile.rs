// bpfbox/src/profile.rs
//!
//! Profile identity and the Profile Table.
//!
//! A profile is bound to one on-disk executable, not to a path: its key is
//! the executable's device number in the high 32 bits and its inode number
//! in the low bits. Renaming or hard-linking the binary keeps the profile;
//! replacing the file with a new inode drops it.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BpfboxError, Result};
use crate::table::LruTable;

/// 64-bit profile identity. Zero means "unconfined".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ProfileKey(pub u64);

impl ProfileKey {
    /// The key carried by processes with no profile.
    pub const UNCONFINED: ProfileKey = ProfileKey(0);

    /// `(device << 32) | inode`, exactly as the kernel side computes it.
    #[inline]
    pub const fn from_identity(device: u32, inode: u64) -> Self {
        ProfileKey(inode | ((device as u64) << 32))
    }

    #[inline]
    pub const fn is_unconfined(self) -> bool {
        self.0 == 0
    }

    /// Encoded device number stored in the high half.
    #[inline]
    pub const fn device(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Inode number stored in the low half.
    #[inline]
    pub const fn inode(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for ProfileKey {
    fn from(raw: u64) -> Self {
        ProfileKey(raw)
    }
}

/// Encode a `(major, minor)` device pair the way the kernel's
/// `new_encode_dev` does, which is also what `stat(2)` reports as `st_dev`.
#[inline]
pub const fn encode_dev(major: u32, minor: u32) -> u32 {
    (minor & 0xff) | (major << 8) | ((minor & !0xff) << 12)
}

/// On-disk identity of an executable as seen at program load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutableIdentity {
    /// Device number in `new_encode_dev` form.
    pub device: u32,
    pub inode: u64,
}

impl ExecutableIdentity {
    pub const fn new(device: u32, inode: u64) -> Self {
        Self { device, inode }
    }

    /// Stat `path` and capture its device and inode numbers.
    pub fn from_path(path: &Path, follow_symlinks: bool) -> Result<Self> {
        let metadata = if follow_symlinks {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        }
        .map_err(|e| {
            BpfboxError::Policy(format!("cannot stat executable {}: {}", path.display(), e))
        })?;

        // st_dev already carries the new_encode_dev layout; anything wider
        // than 32 bits cannot be represented in the key.
        let device = u32::try_from(metadata.dev()).map_err(|_| {
            BpfboxError::Policy(format!(
                "device number {:#x} of {} does not fit a profile key",
                metadata.dev(),
                path.display()
            ))
        })?;

        Ok(Self::new(device, metadata.ino()))
    }

    pub const fn profile_key(&self) -> ProfileKey {
        ProfileKey::from_identity(self.device, self.inode)
    }
}

/// Compute the profile key the loader would assign to the file at `path`.
pub fn profile_key_for_path(path: &Path, follow_symlinks: bool) -> Result<ProfileKey> {
    Ok(ExecutableIdentity::from_path(path, follow_symlinks)?.profile_key())
}

/// Dispatch metadata for one profile. Written only by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub profile_key: ProfileKey,
    /// Slot of this profile's policy routine in the dispatch table.
    pub tail_call_index: u32,
}

/// Profiles keyed by executable identity.
pub type ProfileTable = LruTable<ProfileKey, ProfileRecord>;

pub fn new_profile_table(capacity: usize, shards: usize) -> ProfileTable {
    LruTable::new("profile", capacity, shards)
}
