// SPDX-License-Identifier: MPL-2.0

//! Mounted volumes.

use crate::prelude::*;
use crate::vfs::filesystem::{Filesystem, VolumeFlags};
use crate::vfs::inode::Inode;

pub type FsId = i32;

/// The root filesystem always mounts with this volume id.
pub const VOLID_ROOT: FsId = 1;
/// Regular mounts get ids from here; the range below is reserved for
/// special mounts.
pub const VOLID_FIRST_NORMAL: FsId = 100;

/// One mounted filesystem instance.
pub struct FsVolume {
    id: FsId,
    flags: SpinLock<VolumeFlags>,
    filesystem: Arc<dyn Filesystem>,
    device_path: String,
    /// Set by the filesystem right after it builds the root inode.
    root: SpinLock<Option<Arc<Inode>>>,
    /// The inode this volume is mounted on, once linked into the tree.
    mount_point: SpinLock<Option<Arc<Inode>>>,
}

impl FsVolume {
    pub fn new(id: FsId, filesystem: Arc<dyn Filesystem>, device_path: &str) -> Arc<FsVolume> {
        Arc::new(FsVolume {
            id,
            flags: SpinLock::new(VolumeFlags::empty()),
            filesystem,
            device_path: device_path.to_string(),
            root: SpinLock::new(None),
            mount_point: SpinLock::new(None),
        })
    }

    pub fn id(&self) -> FsId {
        self.id
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.filesystem
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn flags(&self) -> VolumeFlags {
        *self.flags.lock()
    }

    pub fn set_flags(&self, flags: VolumeFlags) {
        *self.flags.lock() = flags;
    }

    pub fn has_flag(&self, flag: VolumeFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn is_read_only(&self) -> bool {
        self.has_flag(VolumeFlags::IS_READONLY)
    }

    pub fn root(&self) -> Result<Arc<Inode>> {
        self.root
            .lock()
            .clone()
            .ok_or(Error::with_message(ErrorCode::BadState, "volume has no root"))
    }

    pub fn set_root(&self, root: Arc<Inode>) {
        *self.root.lock() = Some(root);
    }

    pub fn mount_point(&self) -> Option<Arc<Inode>> {
        self.mount_point.lock().clone()
    }

    pub(crate) fn set_mount_point(&self, mount_point: Option<Arc<Inode>>) {
        *self.mount_point.lock() = mount_point;
    }

    /// Detach the volume from the namespace, breaking the reference cycles
    /// between the volume, its root and its mount point.
    pub(crate) fn unlink_from_tree(&self) {
        if let Some(mount_point) = self.mount_point.lock().take() {
            mount_point.set_mount_root(None);
        }
        *self.root.lock() = None;
    }
}

impl Debug for FsVolume {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FsVolume")
            .field("id", &self.id)
            .field("device", &self.device_path)
            .field("flags", &self.flags())
            .finish()
    }
}
