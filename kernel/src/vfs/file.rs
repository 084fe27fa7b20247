// SPDX-License-Identifier: MPL-2.0

//! Open-file state.

use crate::prelude::*;
use crate::vfs::filesystem::OpenFlags;
use crate::vfs::inode::Inode;

/// One open file or directory: the inode, the open flags and the current
/// position. Sits in the file-descriptor table behind a handle.
pub struct FileNode {
    inode: Arc<Inode>,
    flags: OpenFlags,
    position: SpinLock<i64>,
    /// Iteration index for open directories.
    dir_position: SpinLock<usize>,
    /// Driver-private per-open payload.
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl FileNode {
    pub fn new(inode: Arc<Inode>, flags: OpenFlags) -> Arc<FileNode> {
        Self::with_data_opt(inode, flags, None)
    }

    pub fn with_data(
        inode: Arc<Inode>,
        flags: OpenFlags,
        data: Box<dyn Any + Send + Sync>,
    ) -> Arc<FileNode> {
        Self::with_data_opt(inode, flags, Some(data))
    }

    fn with_data_opt(
        inode: Arc<Inode>,
        flags: OpenFlags,
        data: Option<Box<dyn Any + Send + Sync>>,
    ) -> Arc<FileNode> {
        Arc::new(FileNode {
            inode,
            flags,
            position: SpinLock::new(0),
            dir_position: SpinLock::new(0),
            data,
        })
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn open_flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_directory(&self) -> bool {
        self.inode.is_directory()
    }

    pub fn position(&self) -> i64 {
        *self.position.lock()
    }

    pub fn set_position(&self, position: i64) {
        *self.position.lock() = position;
    }

    pub(crate) fn advance_position(&self, delta: i64) {
        *self.position.lock() += delta;
    }

    pub fn dir_position(&self) -> usize {
        *self.dir_position.lock()
    }

    pub fn set_dir_position(&self, position: usize) {
        *self.dir_position.lock() = position;
    }

    /// Borrow the driver-private per-open payload.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref::<T>()
    }
}

impl Debug for FileNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileNode")
            .field("inode", &self.inode.number())
            .field("flags", &self.flags)
            .field("position", &self.position())
            .finish()
    }
}
