// SPDX-License-Identifier: MPL-2.0

//! In-core inodes.

use crate::prelude::*;
use crate::time::{self, TimeValNanos};
use crate::vfs::filesystem::{FileMode, FileOps, FileStat, Filesystem};
use crate::vfs::volume::FsVolume;

pub type InodeNum = i64;

#[derive(Debug, Clone, Copy)]
pub struct InodeTimes {
    pub atime: TimeValNanos,
    pub mtime: TimeValNanos,
    pub ctime: TimeValNanos,
}

/// The per-mount identity of a filesystem object.
///
/// Holds the owning filesystem and volume, the file-ops vtable data
/// operations go through, and the "mounted-over" link that path resolution
/// follows when another volume's root covers this inode.
pub struct Inode {
    filesystem: Arc<dyn Filesystem>,
    volume: Arc<FsVolume>,
    file_ops: Arc<dyn FileOps>,
    number: InodeNum,
    mode: FileMode,
    times: SpinLock<InodeTimes>,
    /// Root of the volume mounted on top of this inode, if any.
    mount_root: SpinLock<Option<Arc<Inode>>>,
    /// Stamped when the inode cache parks this inode on its MRU list.
    last_use: SpinLock<TimeValNanos>,
    /// Filesystem-private payload.
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl Inode {
    pub fn new(
        filesystem: Arc<dyn Filesystem>,
        volume: Arc<FsVolume>,
        file_ops: Arc<dyn FileOps>,
        number: InodeNum,
        mode: FileMode,
    ) -> Arc<Inode> {
        Self::with_data_opt(filesystem, volume, file_ops, number, mode, None)
    }

    pub fn with_data(
        filesystem: Arc<dyn Filesystem>,
        volume: Arc<FsVolume>,
        file_ops: Arc<dyn FileOps>,
        number: InodeNum,
        mode: FileMode,
        data: Box<dyn Any + Send + Sync>,
    ) -> Arc<Inode> {
        Self::with_data_opt(filesystem, volume, file_ops, number, mode, Some(data))
    }

    fn with_data_opt(
        filesystem: Arc<dyn Filesystem>,
        volume: Arc<FsVolume>,
        file_ops: Arc<dyn FileOps>,
        number: InodeNum,
        mode: FileMode,
        data: Option<Box<dyn Any + Send + Sync>>,
    ) -> Arc<Inode> {
        let now = time::get_real_time();
        Arc::new(Inode {
            filesystem,
            volume,
            file_ops,
            number,
            mode,
            times: SpinLock::new(InodeTimes {
                atime: now,
                mtime: now,
                ctime: now,
            }),
            mount_root: SpinLock::new(None),
            last_use: SpinLock::new(TimeValNanos::zero()),
            data,
        })
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.filesystem
    }

    pub fn volume(&self) -> &Arc<FsVolume> {
        &self.volume
    }

    pub fn file_ops(&self) -> &Arc<dyn FileOps> {
        &self.file_ops
    }

    pub fn number(&self) -> InodeNum {
        self.number
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_directory(&self) -> bool {
        self.mode.is_directory()
    }

    pub fn times(&self) -> InodeTimes {
        *self.times.lock()
    }

    pub fn touch_atime(&self) {
        self.times.lock().atime = time::get_real_time();
    }

    pub fn touch_mtime(&self) {
        let now = time::get_real_time();
        let mut times = self.times.lock();
        times.mtime = now;
        times.atime = now;
    }

    /// The root inode mounted over this one, if a volume covers it.
    pub fn mount_root(&self) -> Option<Arc<Inode>> {
        self.mount_root.lock().clone()
    }

    pub(crate) fn set_mount_root(&self, root: Option<Arc<Inode>>) {
        *self.mount_root.lock() = root;
    }

    pub(crate) fn last_use(&self) -> TimeValNanos {
        *self.last_use.lock()
    }

    pub(crate) fn stamp_last_use(&self, now: TimeValNanos) {
        *self.last_use.lock() = now;
    }

    /// Borrow the filesystem-private payload.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref::<T>()
    }

    /// A stat record built from the in-core fields alone.
    pub fn default_stat(&self, size: i64) -> FileStat {
        let times = self.times();
        FileStat {
            volume: self.volume.id(),
            inode: self.number,
            mode: self.mode,
            size,
            link_count: 1,
            atime: times.atime,
            mtime: times.mtime,
            ctime: times.ctime,
        }
    }
}

impl Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("volume", &self.volume.id())
            .field("number", &self.number)
            .field("mode", &self.mode)
            .finish()
    }
}
