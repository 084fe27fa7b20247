// SPDX-License-Identifier: MPL-2.0

//! The filesystem and file-operation interfaces.
//!
//! A [`Filesystem`] implements per-volume lifecycle and namespace
//! operations; [`FileOps`] implements per-inode data operations. Device
//! drivers implement `FileOps` and are registered as inodes under `/dev`;
//! character devices leave the directory operations unimplemented.

use crate::config::OS_NAME_LENGTH;
use crate::prelude::*;
use crate::sched::wait::{WaitMode, WaitNode};
use crate::time::TimeValNanos;
use crate::vfs::file::FileNode;
use crate::vfs::inode::{Inode, InodeNum};
use crate::vfs::volume::{FsId, FsVolume};

bitflags! {
    /// Flags accepted by `mount`.
    pub struct MountFlags: u32 {
        const READ_ONLY = 0x0001;
    }
}

bitflags! {
    /// Flags describing a mounted volume, returned in `FsInfo::flags`.
    pub struct VolumeFlags: u32 {
        /// Mounted read-only or resides on read-only media.
        const IS_READONLY   = 0x0000_0001;
        /// Lives on removable media.
        const IS_REMOVABLE  = 0x0000_0002;
        /// Data written to the FS survives reboots.
        const IS_PERSISTENT = 0x0000_0004;
        /// Shared across machines (network FS).
        const IS_SHARED     = 0x0000_0008;
        /// Backed by a regular block device.
        const IS_BLOCKBASED = 0x0000_0010;
        /// Set by `probe` when the FS can mount the probed device.
        const CAN_MOUNT     = 0x0000_0020;
    }
}

bitflags! {
    /// Open flags.
    pub struct OpenFlags: u32 {
        const READ      = 0x0001;
        const WRITE     = 0x0002;
        const CREATE    = 0x0004;
        const TRUNCATE  = 0x0008;
        const APPEND    = 0x0010;
        const NONBLOCK  = 0x0020;
        const DIRECTORY = 0x0040;
    }
}

impl OpenFlags {
    pub fn read_write() -> OpenFlags {
        OpenFlags::READ | OpenFlags::WRITE
    }
}

/// File mode: a type field plus permission bits, laid out the POSIX way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

impl FileMode {
    const TYPE_MASK: u32 = 0o170000;
    const TYPE_DIRECTORY: u32 = 0o040000;
    const TYPE_CHAR_DEVICE: u32 = 0o020000;
    const TYPE_BLOCK_DEVICE: u32 = 0o060000;
    const TYPE_REGULAR: u32 = 0o100000;
    const TYPE_SYMLINK: u32 = 0o120000;

    pub const fn from_bits(bits: u32) -> FileMode {
        FileMode(bits)
    }

    pub const fn regular(permissions: u32) -> FileMode {
        FileMode(Self::TYPE_REGULAR | (permissions & 0o7777))
    }

    pub const fn directory(permissions: u32) -> FileMode {
        FileMode(Self::TYPE_DIRECTORY | (permissions & 0o7777))
    }

    pub const fn char_device(permissions: u32) -> FileMode {
        FileMode(Self::TYPE_CHAR_DEVICE | (permissions & 0o7777))
    }

    pub const fn block_device(permissions: u32) -> FileMode {
        FileMode(Self::TYPE_BLOCK_DEVICE | (permissions & 0o7777))
    }

    pub const fn symlink() -> FileMode {
        FileMode(Self::TYPE_SYMLINK | 0o777)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn permissions(self) -> u32 {
        self.0 & 0o7777
    }

    pub const fn is_directory(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::TYPE_DIRECTORY
    }

    pub const fn is_regular(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::TYPE_REGULAR
    }

    pub const fn is_symlink(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::TYPE_SYMLINK
    }

    pub const fn is_char_device(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::TYPE_CHAR_DEVICE
    }

    pub const fn is_block_device(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::TYPE_BLOCK_DEVICE
    }

    pub const fn is_device(self) -> bool {
        self.is_char_device() || self.is_block_device()
    }
}

/// Filesystem statistics, as reported by `read_fsstat`.
#[derive(Debug, Clone)]
pub struct FsInfo {
    pub dev: FsId,
    pub root_ino: InodeNum,
    pub flags: VolumeFlags,
    pub block_size: i32,
    pub io_size: i32,
    pub total_blocks: i64,
    pub free_blocks: i64,
    pub free_user_blocks: i64,
    /// −1 when inodes are allocated dynamically.
    pub total_inodes: i64,
    pub free_inodes: i64,
    pub device_path: String,
    pub mount_args: String,
    pub volume_name: String,
    pub driver_name: String,
}

impl FsInfo {
    pub fn new(driver_name: &str) -> FsInfo {
        let mut driver_name = String::from(driver_name);
        driver_name.truncate(OS_NAME_LENGTH - 1);
        FsInfo {
            dev: -1,
            root_ino: 0,
            flags: VolumeFlags::empty(),
            block_size: 0,
            io_size: 0,
            total_blocks: 0,
            free_blocks: 0,
            free_user_blocks: 0,
            total_inodes: -1,
            free_inodes: -1,
            device_path: String::new(),
            mount_args: String::new(),
            volume_name: String::new(),
            driver_name,
        }
    }
}

/// Stat record for one filesystem object.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub volume: FsId,
    pub inode: InodeNum,
    pub mode: FileMode,
    pub size: i64,
    pub link_count: u32,
    pub atime: TimeValNanos,
    pub mtime: TimeValNanos,
    pub ctime: TimeValNanos,
}

/// One directory entry, as produced by `read_directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeNum,
    pub name: String,
}

/// Field masks for `write_stat` / `write_fsstat`.
pub const WSTAT_MODE: u32 = 0x0001;
pub const WSTAT_SIZE: u32 = 0x0002;
pub const WSTAT_ATIME: u32 = 0x0004;
pub const WSTAT_MTIME: u32 = 0x0008;

/// Per-volume lifecycle and namespace operations.
pub trait Filesystem: Any + Send + Sync {
    /// The name the driver is registered under.
    fn name(&self) -> &str;

    /// Examine a device and report what a mount would produce.
    fn probe(&self, _device_path: &str) -> Result<FsInfo> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn mount(
        self: Arc<Self>,
        volume_id: FsId,
        device_path: &str,
        flags: MountFlags,
        args: &[u8],
    ) -> Result<Arc<FsVolume>>;

    fn unmount(&self, _volume: &Arc<FsVolume>) -> Result<()> {
        Ok(())
    }

    fn sync(&self, _volume: &Arc<FsVolume>) -> Result<()> {
        Ok(())
    }

    fn read_fsstat(&self, _volume: &Arc<FsVolume>) -> Result<FsInfo> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn write_fsstat(&self, _volume: &Arc<FsVolume>, _info: &FsInfo, _mask: u32) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    /// Resolve one path component inside `parent`.
    fn locate_inode(
        &self,
        volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
    ) -> Result<Arc<Inode>>;

    /// Materialize an inode by number. Called by the inode cache, at most
    /// once per live `(volume, inode)` key.
    fn load_inode(&self, _volume: &Arc<FsVolume>, _inode_num: InodeNum) -> Result<Arc<Inode>> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    /// Drop filesystem-side state for an inode leaving the cache.
    fn release_inode(&self, _inode: &Inode) {}

    fn create_file(
        &self,
        _volume: &Arc<FsVolume>,
        _parent: &Arc<Inode>,
        _name: &str,
        _flags: OpenFlags,
        _permissions: FileMode,
    ) -> Result<Arc<FileNode>> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn create_symlink(
        &self,
        _volume: &Arc<FsVolume>,
        _parent: &Arc<Inode>,
        _name: &str,
        _target: &str,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn create_directory(
        &self,
        _volume: &Arc<FsVolume>,
        _parent: &Arc<Inode>,
        _name: &str,
        _permissions: FileMode,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &self,
        _volume: &Arc<FsVolume>,
        _old_parent: &Arc<Inode>,
        _old_name: &str,
        _new_parent: &Arc<Inode>,
        _new_name: &str,
        _must_be_dir: bool,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn unlink(&self, _volume: &Arc<FsVolume>, _parent: &Arc<Inode>, _name: &str) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn remove_directory(
        &self,
        _volume: &Arc<FsVolume>,
        _parent: &Arc<Inode>,
        _name: &str,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }
}

/// Per-inode data operations, reached through the inode's vtable pointer.
pub trait FileOps: Any + Send + Sync {
    fn open_file(
        &self,
        _volume: &Arc<FsVolume>,
        inode: &Arc<Inode>,
        flags: OpenFlags,
    ) -> Result<Arc<FileNode>> {
        Ok(FileNode::new(inode.clone(), flags))
    }

    fn close_file(&self, _volume: &Arc<FsVolume>, _file: &FileNode) -> Result<()> {
        Ok(())
    }

    fn open_directory(&self, _volume: &Arc<FsVolume>, _inode: &Arc<Inode>) -> Result<Arc<FileNode>> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn close_directory(&self, _volume: &Arc<FsVolume>, _dir: &FileNode) -> Result<()> {
        Ok(())
    }

    fn read(&self, _file: &FileNode, _buffer: &mut [u8], _position: i64) -> Result<usize> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn write(&self, _file: &FileNode, _buffer: &[u8], _position: i64) -> Result<usize> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    /// Scatter read. The default gathers through `read` and stops at the
    /// first short segment.
    fn read_v(
        &self,
        file: &FileNode,
        buffers: &mut [&mut [u8]],
        position: i64,
    ) -> Result<usize> {
        let mut total = 0usize;
        let mut position = position;
        for buffer in buffers.iter_mut() {
            let read = self.read(file, buffer, position)?;
            total += read;
            position += read as i64;
            if read < buffer.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Gather write. The default scatters through `write` and stops at the
    /// first short segment.
    fn write_v(&self, file: &FileNode, buffers: &[&[u8]], position: i64) -> Result<usize> {
        let mut total = 0usize;
        let mut position = position;
        for buffer in buffers.iter() {
            let written = self.write(file, buffer, position)?;
            total += written;
            position += written as i64;
            if written < buffer.len() {
                break;
            }
        }
        Ok(total)
    }

    fn read_link(&self, _volume: &Arc<FsVolume>, _inode: &Arc<Inode>) -> Result<String> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn device_control(
        &self,
        _file: &FileNode,
        _request: i32,
        _in_data: &[u8],
        _out_data: &mut [u8],
    ) -> Result<usize> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    /// Produce the next entry of an open directory, advancing its position.
    fn read_directory(&self, _volume: &Arc<FsVolume>, _dir: &FileNode) -> Result<Option<DirEntry>> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn rewind_directory(&self, _volume: &Arc<FsVolume>, _dir: &FileNode) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn check_access(&self, _volume: &Arc<FsVolume>, _inode: &Arc<Inode>, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn read_stat(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<FileStat> {
        Ok(inode.default_stat(0))
    }

    fn write_stat(
        &self,
        _volume: &Arc<FsVolume>,
        _inode: &Arc<Inode>,
        _stat: &FileStat,
        _mask: u32,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn sync(&self, _file: &FileNode) -> Result<()> {
        Ok(())
    }

    /// Park a wait-group node on the device behind `file`.
    fn add_listener(
        &self,
        _file: &FileNode,
        _node: &Arc<WaitNode>,
        _mode: WaitMode,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }

    fn remove_listener(
        &self,
        _file: &FileNode,
        _node: &Arc<WaitNode>,
        _mode: WaitMode,
    ) -> Result<()> {
        Err(Error::new(ErrorCode::NotImplemented))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_modes_classify() {
        assert!(FileMode::directory(0o755).is_directory());
        assert!(FileMode::regular(0o644).is_regular());
        assert!(FileMode::char_device(0o666).is_device());
        assert!(FileMode::block_device(0o660).is_block_device());
        assert!(!FileMode::block_device(0o660).is_char_device());
        assert_eq!(FileMode::regular(0o644).permissions(), 0o644);
    }
}
