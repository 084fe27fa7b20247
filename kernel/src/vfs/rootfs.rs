// SPDX-License-Identifier: MPL-2.0

//! The in-memory root filesystem.
//!
//! Holds the `/` tree: synthetic directories, small in-memory files and the
//! device inodes drivers register under `/dev/...`. Directory inodes keep a
//! name → inode map in their private data; device registration creates
//! missing parent directories on demand.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::prelude::*;
use crate::vfs::file::FileNode;
use crate::vfs::file_io;
use crate::vfs::filesystem::{
    DirEntry, FileMode, FileOps, FileStat, Filesystem, FsInfo, MountFlags, OpenFlags,
};
use crate::vfs::inode::{Inode, InodeNum};
use crate::vfs::volume::{FsId, FsVolume};

/// Private payload of every rootfs inode.
struct RootNode {
    parent: SpinLock<Weak<Inode>>,
    children: SpinLock<BTreeMap<String, Arc<Inode>>>,
    /// File bytes, or the target path for symlinks.
    content: SpinLock<Vec<u8>>,
}

impl RootNode {
    fn new() -> RootNode {
        RootNode {
            parent: SpinLock::new(Weak::new()),
            children: SpinLock::new(BTreeMap::new()),
            content: SpinLock::new(Vec::new()),
        }
    }
}

fn node(inode: &Inode) -> Result<&RootNode> {
    inode
        .data::<RootNode>()
        .ok_or(Error::with_message(ErrorCode::InvalidArgument, "not a rootfs inode"))
}

fn set_parent(child: &Arc<Inode>, parent: &Arc<Inode>) {
    if let Ok(child_node) = node(child) {
        *child_node.parent.lock() = Arc::downgrade(parent);
    }
}

/// Directory operations.
struct RootDirOps;

impl FileOps for RootDirOps {
    fn open_file(
        &self,
        _volume: &Arc<FsVolume>,
        _inode: &Arc<Inode>,
        _flags: OpenFlags,
    ) -> Result<Arc<FileNode>> {
        Err(Error::new(ErrorCode::IsADirectory))
    }

    fn open_directory(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<Arc<FileNode>> {
        Ok(FileNode::new(inode.clone(), OpenFlags::READ))
    }

    fn read_directory(&self, _volume: &Arc<FsVolume>, dir: &FileNode) -> Result<Option<DirEntry>> {
        let dir_node = node(dir.inode())?;
        let position = dir.dir_position();

        let entry = if position == 0 {
            Some(DirEntry {
                inode: dir.inode().number(),
                name: ".".to_string(),
            })
        } else if position == 1 {
            let parent = dir_node.parent.lock().upgrade();
            Some(DirEntry {
                inode: parent.map_or(dir.inode().number(), |p| p.number()),
                name: "..".to_string(),
            })
        } else {
            let children = dir_node.children.lock();
            children.iter().nth(position - 2).map(|(name, inode)| DirEntry {
                inode: inode.number(),
                name: name.clone(),
            })
        };
        if entry.is_some() {
            dir.set_dir_position(position + 1);
        }
        Ok(entry)
    }

    fn rewind_directory(&self, _volume: &Arc<FsVolume>, dir: &FileNode) -> Result<()> {
        dir.set_dir_position(0);
        Ok(())
    }

    fn read_stat(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<FileStat> {
        let count = node(inode)?.children.lock().len();
        Ok(inode.default_stat(count as i64))
    }
}

/// Regular-file operations over the in-memory content.
struct RootFileOps;

impl FileOps for RootFileOps {
    fn open_file(
        &self,
        _volume: &Arc<FsVolume>,
        inode: &Arc<Inode>,
        flags: OpenFlags,
    ) -> Result<Arc<FileNode>> {
        if flags.contains(OpenFlags::TRUNCATE) {
            node(inode)?.content.lock().clear();
            inode.touch_mtime();
        }
        Ok(FileNode::new(inode.clone(), flags))
    }

    fn read(&self, file: &FileNode, buffer: &mut [u8], position: i64) -> Result<usize> {
        if position < 0 {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let content = node(file.inode())?.content.lock();
        let position = position as usize;
        if position >= content.len() {
            return Ok(0);
        }
        let count = buffer.len().min(content.len() - position);
        buffer[..count].copy_from_slice(&content[position..position + count]);
        Ok(count)
    }

    fn write(&self, file: &FileNode, buffer: &[u8], position: i64) -> Result<usize> {
        if position < 0 {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        if !file.open_flags().contains(OpenFlags::WRITE) {
            return Err(Error::new(ErrorCode::PermissionDenied));
        }
        let inode = file.inode();
        {
            let mut content = node(inode)?.content.lock();
            let end = position as usize + buffer.len();
            if content.len() < end {
                content.resize(end, 0);
            }
            content[position as usize..end].copy_from_slice(buffer);
        }
        inode.touch_mtime();
        Ok(buffer.len())
    }

    fn read_stat(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<FileStat> {
        let size = node(inode)?.content.lock().len() as i64;
        Ok(inode.default_stat(size))
    }
}

/// Symlink operations: the content is the target path.
struct RootSymlinkOps;

impl FileOps for RootSymlinkOps {
    fn read_link(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<String> {
        let content = node(inode)?.content.lock();
        String::from_utf8(content.clone())
            .map_err(|_| Error::with_message(ErrorCode::IoError, "symlink target not utf-8"))
    }

    fn read_stat(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<FileStat> {
        let size = node(inode)?.content.lock().len() as i64;
        Ok(inode.default_stat(size))
    }
}

pub struct RootFilesystem {
    next_inode: AtomicU32,
}

impl RootFilesystem {
    pub fn new() -> Arc<RootFilesystem> {
        Arc::new(RootFilesystem {
            next_inode: AtomicU32::new(1),
        })
    }

    fn alloc_ino(&self) -> InodeNum {
        self.next_inode.fetch_add(1, Ordering::Relaxed) as InodeNum
    }

    fn new_directory(
        self: &Arc<Self>,
        volume: &Arc<FsVolume>,
        permissions: FileMode,
    ) -> Arc<Inode> {
        Inode::with_data(
            self.clone() as Arc<dyn Filesystem>,
            volume.clone(),
            Arc::new(RootDirOps),
            self.alloc_ino(),
            permissions,
            Box::new(RootNode::new()),
        )
    }

    fn insert_child(
        &self,
        parent: &Arc<Inode>,
        name: &str,
        child: Arc<Inode>,
    ) -> Result<Arc<Inode>> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::with_message(ErrorCode::InvalidArgument, "bad name"));
        }
        if !parent.is_directory() {
            return Err(Error::new(ErrorCode::NotADirectory));
        }
        let parent_node = node(parent)?;
        let mut children = parent_node.children.lock();
        if children.contains_key(name) {
            return Err(Error::new(ErrorCode::AlreadyExists));
        }
        set_parent(&child, parent);
        children.insert(name.to_string(), child.clone());
        Ok(child)
    }
}

impl Filesystem for RootFilesystem {
    fn name(&self) -> &str {
        "rootfs"
    }

    fn mount(
        self: Arc<Self>,
        volume_id: FsId,
        device_path: &str,
        _flags: MountFlags,
        _args: &[u8],
    ) -> Result<Arc<FsVolume>> {
        let volume = FsVolume::new(volume_id, self.clone() as Arc<dyn Filesystem>, device_path);
        let root = self.new_directory(&volume, FileMode::directory(0o755));
        volume.set_root(root);
        Ok(volume)
    }

    fn read_fsstat(&self, volume: &Arc<FsVolume>) -> Result<FsInfo> {
        let mut info = FsInfo::new(self.name());
        info.dev = volume.id();
        info.root_ino = volume.root()?.number();
        info.flags = volume.flags();
        info.block_size = 1;
        info.io_size = 1;
        Ok(info)
    }

    fn locate_inode(
        &self,
        _volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
    ) -> Result<Arc<Inode>> {
        if !parent.is_directory() {
            return Err(Error::new(ErrorCode::NotADirectory));
        }
        let parent_node = node(parent)?;
        match name {
            "" | "." => Ok(parent.clone()),
            ".." => Ok(parent_node
                .parent
                .lock()
                .upgrade()
                .unwrap_or_else(|| parent.clone())),
            _ => parent_node
                .children
                .lock()
                .get(name)
                .cloned()
                .ok_or(Error::new(ErrorCode::NotFound)),
        }
    }

    fn create_file(
        &self,
        volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
        flags: OpenFlags,
        permissions: FileMode,
    ) -> Result<Arc<FileNode>> {
        let inode = Inode::with_data(
            volume.filesystem().clone(),
            volume.clone(),
            Arc::new(RootFileOps),
            self.alloc_ino(),
            FileMode::regular(permissions.permissions()),
            Box::new(RootNode::new()),
        );
        self.insert_child(parent, name, inode.clone())?;
        parent.touch_mtime();
        inode
            .file_ops()
            .open_file(volume, &inode, flags & !OpenFlags::CREATE)
    }

    fn create_symlink(
        &self,
        volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
        target: &str,
    ) -> Result<()> {
        let inode = Inode::with_data(
            volume.filesystem().clone(),
            volume.clone(),
            Arc::new(RootSymlinkOps),
            self.alloc_ino(),
            FileMode::symlink(),
            Box::new(RootNode::new()),
        );
        *node(&inode)?.content.lock() = target.as_bytes().to_vec();
        self.insert_child(parent, name, inode)?;
        Ok(())
    }

    fn create_directory(
        &self,
        volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
        permissions: FileMode,
    ) -> Result<()> {
        let child = Inode::with_data(
            volume.filesystem().clone(),
            volume.clone(),
            Arc::new(RootDirOps),
            self.alloc_ino(),
            FileMode::directory(permissions.permissions()),
            Box::new(RootNode::new()),
        );
        self.insert_child(parent, name, child)?;
        parent.touch_mtime();
        Ok(())
    }

    fn rename(
        &self,
        _volume: &Arc<FsVolume>,
        old_parent: &Arc<Inode>,
        old_name: &str,
        new_parent: &Arc<Inode>,
        new_name: &str,
        must_be_dir: bool,
    ) -> Result<()> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let old_node = node(old_parent)?;
        let new_node = node(new_parent)?;

        if Arc::ptr_eq(old_parent, new_parent) {
            let mut children = old_node.children.lock();
            let target = children
                .get(old_name)
                .cloned()
                .ok_or(Error::new(ErrorCode::NotFound))?;
            if must_be_dir && !target.is_directory() {
                return Err(Error::new(ErrorCode::NotADirectory));
            }
            if children.contains_key(new_name) {
                return Err(Error::new(ErrorCode::AlreadyExists));
            }
            children.remove(old_name);
            children.insert(new_name.to_string(), target);
            return Ok(());
        }

        // Sibling directories lock in address order so concurrent renames
        // cannot deadlock.
        let (mut old_children, mut new_children) =
            if (old_node as *const RootNode) < (new_node as *const RootNode) {
                let old_guard = old_node.children.lock();
                let new_guard = new_node.children.lock();
                (old_guard, new_guard)
            } else {
                let new_guard = new_node.children.lock();
                let old_guard = old_node.children.lock();
                (old_guard, new_guard)
            };
        let target = old_children
            .get(old_name)
            .cloned()
            .ok_or(Error::new(ErrorCode::NotFound))?;
        if must_be_dir && !target.is_directory() {
            return Err(Error::new(ErrorCode::NotADirectory));
        }
        if new_children.contains_key(new_name) {
            return Err(Error::new(ErrorCode::AlreadyExists));
        }
        old_children.remove(old_name);
        new_children.insert(new_name.to_string(), target.clone());
        drop(old_children);
        drop(new_children);
        set_parent(&target, new_parent);
        Ok(())
    }

    fn unlink(&self, _volume: &Arc<FsVolume>, parent: &Arc<Inode>, name: &str) -> Result<()> {
        let parent_node = node(parent)?;
        let mut children = parent_node.children.lock();
        let target = children.get(name).ok_or(Error::new(ErrorCode::NotFound))?;
        if target.is_directory() {
            return Err(Error::new(ErrorCode::IsADirectory));
        }
        children.remove(name);
        parent.touch_mtime();
        Ok(())
    }

    fn remove_directory(
        &self,
        _volume: &Arc<FsVolume>,
        parent: &Arc<Inode>,
        name: &str,
    ) -> Result<()> {
        let parent_node = node(parent)?;
        let mut children = parent_node.children.lock();
        let target = children.get(name).ok_or(Error::new(ErrorCode::NotFound))?;
        if !target.is_directory() {
            return Err(Error::new(ErrorCode::NotADirectory));
        }
        if !node(target)?.children.lock().is_empty() {
            return Err(Error::new(ErrorCode::NotEmpty));
        }
        children.remove(name);
        parent.touch_mtime();
        Ok(())
    }
}

trait AsRootfs {
    fn as_any_rootfs(&self) -> Option<&RootFilesystem>;
}

impl AsRootfs for Arc<dyn Filesystem> {
    fn as_any_rootfs(&self) -> Option<&RootFilesystem> {
        (&**self as &dyn Any).downcast_ref::<RootFilesystem>()
    }
}

// Device registration.

struct DeviceRegistration {
    path: String,
    inode: Arc<Inode>,
}

static DEVICE_REGISTRY: SpinLock<BTreeMap<i32, DeviceRegistration>> =
    SpinLock::new(BTreeMap::new());
static NEXT_DEVICE_HANDLE: AtomicI32 = AtomicI32::new(1);

fn split_device_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let trimmed = path.trim_start_matches('/');
    let mut components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
    let leaf = components
        .pop()
        .ok_or(Error::with_message(ErrorCode::InvalidArgument, "empty device path"))?;
    Ok((components, leaf))
}

/// Walk the root filesystem to the parent of `path`, creating missing
/// directories along the way.
fn prepare_parent(path: &str) -> Result<(Arc<Inode>, String)> {
    let root_volume = file_io::root_volume()?;
    let (components, leaf) = split_device_path(path)?;
    let mut current = root_volume.root()?;
    for component in components {
        let fs = current.filesystem().clone();
        match fs.locate_inode(current.volume(), &current, component) {
            Ok(next) => {
                if !next.is_directory() {
                    return Err(Error::new(ErrorCode::NotADirectory));
                }
                current = next;
            }
            Err(err) if err.code() == ErrorCode::NotFound => {
                fs.create_directory(
                    current.volume(),
                    &current,
                    component,
                    FileMode::directory(0o755),
                )?;
                current = fs.locate_inode(current.volume(), &current, component)?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok((current, leaf.to_string()))
}

/// Publish a device inode at `path` (e.g. `/dev/disk/sd0`), creating parent
/// directories on demand. Returns a registration handle.
pub fn register_device(path: &str, ops: Arc<dyn FileOps>, mode: FileMode) -> Result<i32> {
    file_io::ensure_init();
    let (parent, leaf) = prepare_parent(path)?;
    let root_volume = file_io::root_volume()?;
    let fs = root_volume.filesystem().clone();
    let rootfs = fs
        .as_any_rootfs()
        .ok_or(Error::new(ErrorCode::InvalidArgument))?;
    let inode = Inode::with_data(
        root_volume.filesystem().clone(),
        parent.volume().clone(),
        ops,
        rootfs.alloc_ino(),
        mode,
        Box::new(RootNode::new()),
    );
    rootfs.insert_child(&parent, &leaf, inode.clone())?;

    let handle = NEXT_DEVICE_HANDLE.fetch_add(1, Ordering::Relaxed);
    DEVICE_REGISTRY.lock().insert(
        handle,
        DeviceRegistration {
            path: path.to_string(),
            inode,
        },
    );
    info!("registered device {:?}", path);
    Ok(handle)
}

/// Move a registered device to `new_path`, creating parent directories on
/// demand.
pub fn rename_device(handle: i32, new_path: &str) -> Result<()> {
    let (old_path, inode) = {
        let registry = DEVICE_REGISTRY.lock();
        let registration = registry
            .get(&handle)
            .ok_or(Error::new(ErrorCode::NotFound))?;
        (registration.path.clone(), registration.inode.clone())
    };

    let root_volume = file_io::root_volume()?;
    let fs = root_volume.filesystem().clone();
    let rootfs = fs
        .as_any_rootfs()
        .ok_or(Error::new(ErrorCode::InvalidArgument))?;

    let (new_parent, new_leaf) = prepare_parent(new_path)?;
    rootfs.insert_child(&new_parent, &new_leaf, inode.clone())?;

    // Drop the old link only after the new one is in place.
    if let Ok((old_parent, old_leaf)) = prepare_parent(&old_path) {
        if let Ok(parent_node) = node(&old_parent) {
            parent_node.children.lock().remove(&old_leaf);
        }
    }

    let mut registry = DEVICE_REGISTRY.lock();
    if let Some(registration) = registry.get_mut(&handle) {
        registration.path = new_path.to_string();
    }
    Ok(())
}

/// Remove a registered device. Only permitted once nothing but the
/// registration itself (and the directory link) still references the inode.
pub fn remove_device(handle: i32) -> Result<()> {
    let inode = {
        let registry = DEVICE_REGISTRY.lock();
        let registration = registry
            .get(&handle)
            .ok_or(Error::new(ErrorCode::NotFound))?;
        registration.inode.clone()
    };
    // Registry + directory link + this local reference.
    if Arc::strong_count(&inode) > 3 {
        return Err(Error::with_message(ErrorCode::BusBusy, "device still in use"));
    }
    let path = {
        let registry = DEVICE_REGISTRY.lock();
        registry.get(&handle).map(|r| r.path.clone())
    }
    .ok_or(Error::new(ErrorCode::NotFound))?;

    let (parent, leaf) = prepare_parent(&path)?;
    if let Ok(parent_node) = node(&parent) {
        parent_node.children.lock().remove(&leaf);
    }
    DEVICE_REGISTRY.lock().remove(&handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDeviceOps;
    impl FileOps for NullDeviceOps {
        fn read(&self, _file: &FileNode, buffer: &mut [u8], _position: i64) -> Result<usize> {
            buffer.fill(0);
            Ok(buffer.len())
        }
    }

    #[test]
    fn device_registration_creates_parents() {
        let handle = register_device(
            "/dev/test/null0",
            Arc::new(NullDeviceOps),
            FileMode::char_device(0o666),
        )
        .unwrap();

        let fd = file_io::open("/dev/test/null0", OpenFlags::READ).unwrap();
        let mut buf = [1u8; 4];
        assert_eq!(file_io::read(fd, &mut buf).unwrap(), 4);
        assert_eq!(buf, [0u8; 4]);
        file_io::close(fd).unwrap();

        // The open file held a reference; now removal is allowed.
        remove_device(handle).unwrap();
        assert!(file_io::open("/dev/test/null0", OpenFlags::READ).is_err());
    }

    #[test]
    fn busy_devices_cannot_be_removed() {
        let handle = register_device(
            "/dev/test/busy0",
            Arc::new(NullDeviceOps),
            FileMode::char_device(0o666),
        )
        .unwrap();
        let fd = file_io::open("/dev/test/busy0", OpenFlags::READ).unwrap();
        let err = remove_device(handle).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BusBusy);
        file_io::close(fd).unwrap();
        remove_device(handle).unwrap();
    }

    #[test]
    fn renamed_devices_move_in_the_tree() {
        let handle = register_device(
            "/dev/test/move0",
            Arc::new(NullDeviceOps),
            FileMode::char_device(0o666),
        )
        .unwrap();
        rename_device(handle, "/dev/test/moved/here0").unwrap();
        assert!(file_io::open("/dev/test/move0", OpenFlags::READ).is_err());
        let fd = file_io::open("/dev/test/moved/here0", OpenFlags::READ).unwrap();
        file_io::close(fd).unwrap();
        remove_device(handle).unwrap();
    }
}
