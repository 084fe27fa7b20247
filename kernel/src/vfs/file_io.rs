// SPDX-License-Identifier: MPL-2.0

//! The file I/O surface: filesystem registry, mount table glue, path
//! resolution and the file-descriptor table.
//!
//! Paths resolve from `/` (absolute and relative alike; the kernel's working
//! directory is the root). The walk asks each filesystem to resolve one
//! component at a time; `..` at a volume root ascends through the volume's
//! mount point, and crossing a covered inode downward follows its
//! mounted-over link.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::prelude::*;
use crate::vfs::filesystem::{
    DirEntry, FileMode, FileStat, Filesystem, FsInfo, MountFlags, OpenFlags, VolumeFlags,
};
use crate::vfs::file::FileNode;
use crate::vfs::inode::Inode;
use crate::vfs::rootfs::RootFilesystem;
use crate::vfs::vfs_manager;
use crate::vfs::volume::{FsVolume, VOLID_FIRST_NORMAL, VOLID_ROOT};

enum FdSlot {
    Empty,
    /// Claimed while an open is in flight.
    Reserved,
    Open(Arc<FileNode>),
}

static FILESYSTEMS: SpinLock<BTreeMap<String, Arc<dyn Filesystem>>> =
    SpinLock::new(BTreeMap::new());
static FILE_TABLE: SpinLock<Vec<FdSlot>> = SpinLock::new(Vec::new());
static ROOT_VOLUME: SpinLock<Option<Arc<FsVolume>>> = SpinLock::new(None);
static NEXT_VOLUME_ID: AtomicI32 = AtomicI32::new(VOLID_FIRST_NORMAL);

static INIT: spin::Once<()> = spin::Once::new();

/// Bring up the VFS: mount the root filesystem and start the disk-cache
/// flusher. Idempotent; every entry point calls it.
pub fn ensure_init() {
    INIT.call_once(|| {
        crate::klog::register_default_categories();
        let rootfs = RootFilesystem::new();
        let volume = (rootfs.clone() as Arc<dyn Filesystem>)
            .mount(VOLID_ROOT, "", MountFlags::empty(), b"")
            .expect("root filesystem mount cannot fail");
        vfs_manager::register_volume(volume.clone())
            .expect("root volume id is free at boot");
        *ROOT_VOLUME.lock() = Some(volume);
        register_filesystem("rootfs", rootfs as Arc<dyn Filesystem>);
        // Unit tests drive the flusher pass explicitly so their dirty-count
        // accounting stays deterministic.
        #[cfg(not(test))]
        crate::vfs::block_cache::spawn_flusher();
    });
}

pub fn root_volume() -> Result<Arc<FsVolume>> {
    ensure_init();
    ROOT_VOLUME
        .lock()
        .clone()
        .ok_or(Error::with_message(ErrorCode::BadState, "vfs not initialized"))
}

/// Make a filesystem driver available to `mount` under `name`.
pub fn register_filesystem(name: &str, filesystem: Arc<dyn Filesystem>) {
    FILESYSTEMS.lock().insert(name.to_string(), filesystem);
}

pub fn find_filesystem(name: &str) -> Option<Arc<dyn Filesystem>> {
    FILESYSTEMS.lock().get(name).cloned()
}

// Path resolution.

/// Resolve one component inside `parent`.
fn locate_inode_by_name(parent: &Arc<Inode>, name: &str, cross_mount: bool) -> Result<Arc<Inode>> {
    let mut parent = parent.clone();
    if name == ".." {
        // `..` at a mount root ascends into the volume the mount covers.
        if let Ok(volume_root) = parent.volume().root() {
            if Arc::ptr_eq(&parent, &volume_root) {
                let global_root = root_volume()?.root()?;
                if Arc::ptr_eq(&parent, &global_root) {
                    return Ok(parent);
                }
                parent = parent
                    .volume()
                    .mount_point()
                    .ok_or(Error::with_message(ErrorCode::NotFound, "orphaned mount"))?;
            }
        }
    }
    let inode = parent
        .filesystem()
        .locate_inode(parent.volume(), &parent, name)?;
    if cross_mount {
        if let Some(covered) = inode.mount_root() {
            return Ok(covered);
        }
    }
    Ok(inode)
}

/// Walk `path` down to its final component. Returns the parent inode and
/// the (possibly empty) last name.
fn locate_parent_inode(path: &str) -> Result<(Arc<Inode>, &str)> {
    let mut current = root_volume()?.root()?;
    let mut rest = path.strip_prefix('/').unwrap_or(path);
    loop {
        match rest.find('/') {
            None => return Ok((current, rest)),
            Some(0) => rest = &rest[1..],
            Some(pos) => {
                let (name, tail) = rest.split_at(pos);
                current = locate_inode_by_name(&current, name, true)?;
                rest = &tail[1..];
            }
        }
    }
}

pub(crate) fn locate_inode_by_path(path: &str) -> Result<Arc<Inode>> {
    let (parent, name) = locate_parent_inode(path)?;
    locate_inode_by_name(&parent, name, true)
}

// Mounting.

/// Mount the filesystem registered as `fs_name` from `device_path` onto
/// `mount_path`.
pub fn mount(
    device_path: &str,
    mount_path: &str,
    fs_name: &str,
    flags: MountFlags,
    args: &[u8],
) -> Result<()> {
    ensure_init();
    let mount_point = locate_inode_by_path(mount_path)?;
    if !mount_point.is_directory() {
        return Err(Error::new(ErrorCode::NotADirectory));
    }
    if mount_point.mount_root().is_some() {
        return Err(Error::with_message(ErrorCode::BusBusy, "already mounted"));
    }
    let filesystem =
        find_filesystem(fs_name).ok_or(Error::with_message(ErrorCode::NotFound, "no such filesystem"))?;

    let volume_id = NEXT_VOLUME_ID.fetch_add(1, Ordering::Relaxed);
    let volume = filesystem.mount(volume_id, device_path, flags, args)?;
    if flags.contains(MountFlags::READ_ONLY) {
        volume.set_flags(volume.flags() | VolumeFlags::IS_READONLY);
    }
    vfs_manager::register_volume(volume.clone())?;
    volume.set_mount_point(Some(mount_point.clone()));
    mount_point.set_mount_root(Some(volume.root()?));
    info!("mounted {} ({}) on {}", device_path, fs_name, mount_path);
    Ok(())
}

/// Unmount the volume covering `mount_path`.
pub fn unmount(mount_path: &str) -> Result<()> {
    let covered_root = locate_inode_by_path(mount_path)?;
    let volume = covered_root.volume().clone();
    if volume.id() == VOLID_ROOT {
        return Err(Error::with_message(ErrorCode::InvalidArgument, "cannot unmount /"));
    }
    if !Arc::ptr_eq(&covered_root, &volume.root()?) {
        return Err(Error::with_message(ErrorCode::InvalidArgument, "not a mount point"));
    }
    volume.filesystem().sync(&volume)?;
    volume.filesystem().unmount(&volume)?;
    vfs_manager::unregister_volume(volume.id())?;
    volume.unlink_from_tree();
    Ok(())
}

/// Statistics of the volume behind `path`.
pub fn read_fsstat(path: &str) -> Result<FsInfo> {
    let inode = locate_inode_by_path(path)?;
    let volume = inode.volume();
    volume.filesystem().read_fsstat(volume)
}

// The file-descriptor table.

fn allocate_fd() -> i32 {
    let mut table = FILE_TABLE.lock();
    for (fd, slot) in table.iter_mut().enumerate() {
        if matches!(slot, FdSlot::Empty) {
            *slot = FdSlot::Reserved;
            return fd as i32;
        }
    }
    table.push(FdSlot::Reserved);
    (table.len() - 1) as i32
}

fn free_fd(fd: i32) {
    let mut table = FILE_TABLE.lock();
    if let Some(slot) = table.get_mut(fd as usize) {
        *slot = FdSlot::Empty;
    }
}

fn install_fd(fd: i32, file: Arc<FileNode>) {
    let mut table = FILE_TABLE.lock();
    if let Some(slot) = table.get_mut(fd as usize) {
        *slot = FdSlot::Open(file);
    }
}

fn get_file_node(fd: i32) -> Result<Arc<FileNode>> {
    if fd < 0 {
        return Err(Error::with_message(ErrorCode::InvalidArgument, "bad file handle"));
    }
    let table = FILE_TABLE.lock();
    match table.get(fd as usize) {
        Some(FdSlot::Open(file)) => Ok(file.clone()),
        _ => Err(Error::with_message(ErrorCode::InvalidArgument, "bad file handle")),
    }
}

fn get_file(fd: i32) -> Result<Arc<FileNode>> {
    let file = get_file_node(fd)?;
    if file.is_directory() {
        Err(Error::new(ErrorCode::IsADirectory))
    } else {
        Ok(file)
    }
}

fn get_directory(fd: i32) -> Result<Arc<FileNode>> {
    let file = get_file_node(fd)?;
    if file.is_directory() {
        Ok(file)
    } else {
        Err(Error::new(ErrorCode::NotADirectory))
    }
}

// Open files.

/// Open `path`, creating it when `CREATE` is set and the leaf is missing.
pub fn open(path: &str, flags: OpenFlags) -> Result<i32> {
    open_with_permissions(path, flags, FileMode::regular(0o666))
}

pub fn open_with_permissions(path: &str, flags: OpenFlags, permissions: FileMode) -> Result<i32> {
    ensure_init();
    let fd = allocate_fd();
    let result = open_inner(path, flags, permissions);
    match result {
        Ok(file) => {
            install_fd(fd, file);
            Ok(fd)
        }
        Err(err) => {
            free_fd(fd);
            Err(err)
        }
    }
}

fn open_inner(path: &str, flags: OpenFlags, permissions: FileMode) -> Result<Arc<FileNode>> {
    let (parent, name) = locate_parent_inode(path)?;
    match locate_inode_by_name(&parent, name, true) {
        Ok(inode) => {
            if flags.contains(OpenFlags::DIRECTORY) && !inode.is_directory() {
                return Err(Error::new(ErrorCode::NotADirectory));
            }
            if inode.is_directory() {
                inode.file_ops().open_directory(inode.volume(), &inode)
            } else {
                inode
                    .file_ops()
                    .open_file(inode.volume(), &inode, flags & !OpenFlags::CREATE)
            }
        }
        Err(err) if err.code() == ErrorCode::NotFound && flags.contains(OpenFlags::CREATE) => {
            if parent.volume().is_read_only() {
                return Err(Error::new(ErrorCode::ReadOnly));
            }
            parent
                .filesystem()
                .create_file(parent.volume(), &parent, name, flags, permissions)
        }
        Err(err) => Err(err),
    }
}

/// Close `fd`, telling the file's vtable.
pub fn close(fd: i32) -> Result<()> {
    let file = get_file_node(fd)?;
    free_fd(fd);
    let inode = file.inode();
    if file.is_directory() {
        inode.file_ops().close_directory(inode.volume(), &file)
    } else {
        inode.file_ops().close_file(inode.volume(), &file)
    }
}

/// Duplicate `old_fd`; with `Some(new_fd)` the target descriptor is closed
/// first and reused.
pub fn dupe(old_fd: i32, new_fd: Option<i32>) -> Result<i32> {
    let file = get_file_node(old_fd)?;
    match new_fd {
        None => {
            let fd = allocate_fd();
            install_fd(fd, file);
            Ok(fd)
        }
        Some(new_fd) => {
            if new_fd == old_fd || new_fd < 0 {
                return Err(Error::new(ErrorCode::InvalidArgument));
            }
            let _ = close(new_fd);
            {
                let mut table = FILE_TABLE.lock();
                let needed = new_fd as usize + 1;
                if table.len() < needed {
                    table.resize_with(needed, || FdSlot::Empty);
                }
                table[new_fd as usize] = FdSlot::Open(file);
            }
            Ok(new_fd)
        }
    }
}

// Reading and writing.

/// Read at the file position, advancing it.
pub fn read(fd: i32, buffer: &mut [u8]) -> Result<usize> {
    let file = get_file(fd)?;
    let inode = file.inode();
    let count = inode.file_ops().read(&file, buffer, file.position())?;
    file.advance_position(count as i64);
    Ok(count)
}

/// Write at the file position, advancing it.
pub fn write(fd: i32, buffer: &[u8]) -> Result<usize> {
    let file = get_file(fd)?;
    let inode = file.inode();
    let count = inode.file_ops().write(&file, buffer, file.position())?;
    file.advance_position(count as i64);
    Ok(count)
}

/// Read at an explicit offset; the file position is untouched.
pub fn read_pos(fd: i32, position: i64, buffer: &mut [u8]) -> Result<usize> {
    let file = get_file(fd)?;
    file.inode().file_ops().read(&file, buffer, position)
}

pub fn write_pos(fd: i32, position: i64, buffer: &[u8]) -> Result<usize> {
    let file = get_file(fd)?;
    file.inode().file_ops().write(&file, buffer, position)
}

/// Scatter read at the file position.
pub fn read_v(fd: i32, buffers: &mut [&mut [u8]]) -> Result<usize> {
    let file = get_file(fd)?;
    let count = file
        .inode()
        .file_ops()
        .read_v(&file, buffers, file.position())?;
    file.advance_position(count as i64);
    Ok(count)
}

/// Gather write at the file position.
pub fn write_v(fd: i32, buffers: &[&[u8]]) -> Result<usize> {
    let file = get_file(fd)?;
    let count = file
        .inode()
        .file_ops()
        .write_v(&file, buffers, file.position())?;
    file.advance_position(count as i64);
    Ok(count)
}

pub fn set_position(fd: i32, position: i64) -> Result<()> {
    if position < 0 {
        return Err(Error::new(ErrorCode::InvalidArgument));
    }
    get_file(fd)?.set_position(position);
    Ok(())
}

/// Driver pass-through control call.
pub fn device_control(
    fd: i32,
    request: i32,
    in_data: &[u8],
    out_data: &mut [u8],
) -> Result<usize> {
    let file = get_file(fd)?;
    file.inode()
        .file_ops()
        .device_control(&file, request, in_data, out_data)
}

// Directories and namespace operations.

pub fn read_directory(fd: i32) -> Result<Option<DirEntry>> {
    let dir = get_directory(fd)?;
    dir.inode().file_ops().read_directory(dir.inode().volume(), &dir)
}

pub fn rewind_directory(fd: i32) -> Result<()> {
    let dir = get_directory(fd)?;
    dir.inode()
        .file_ops()
        .rewind_directory(dir.inode().volume(), &dir)
}

pub fn create_directory(path: &str, permissions: FileMode) -> Result<()> {
    ensure_init();
    let (parent, name) = locate_parent_inode(path)?;
    if name.is_empty() {
        return Err(Error::new(ErrorCode::AlreadyExists));
    }
    if parent.volume().is_read_only() {
        return Err(Error::new(ErrorCode::ReadOnly));
    }
    parent
        .filesystem()
        .create_directory(parent.volume(), &parent, name, permissions)
}

pub fn create_symlink(path: &str, target: &str) -> Result<()> {
    ensure_init();
    let (parent, name) = locate_parent_inode(path)?;
    if name.is_empty() {
        return Err(Error::new(ErrorCode::AlreadyExists));
    }
    parent
        .filesystem()
        .create_symlink(parent.volume(), &parent, name, target)
}

pub fn read_link(path: &str) -> Result<String> {
    let (parent, name) = locate_parent_inode(path)?;
    // Do not cross: the link itself is wanted, not what covers it.
    let inode = locate_inode_by_name(&parent, name, false)?;
    if !inode.mode().is_symlink() {
        return Err(Error::new(ErrorCode::InvalidArgument));
    }
    inode.file_ops().read_link(inode.volume(), &inode)
}

/// Trailing slashes are dropped for POSIX conformance; if any were present
/// the operand must be a directory.
fn strip_trailing_slashes(path: &str) -> (&str, bool) {
    let stripped = path.trim_end_matches('/');
    if stripped.is_empty() {
        // "/" and "///" stay the root.
        ("/", path.len() > 1)
    } else {
        (stripped, stripped.len() != path.len())
    }
}

pub fn rename(old_path: &str, new_path: &str) -> Result<()> {
    ensure_init();
    let (old_path, old_had_slash) = strip_trailing_slashes(old_path);
    let (new_path, new_had_slash) = strip_trailing_slashes(new_path);
    let must_be_dir = old_had_slash || new_had_slash;

    let (old_parent, old_name) = locate_parent_inode(old_path)?;
    let (new_parent, new_name) = locate_parent_inode(new_path)?;
    if old_parent.volume().id() != new_parent.volume().id() {
        return Err(Error::new(ErrorCode::CrossDevice));
    }
    if old_parent.volume().is_read_only() {
        return Err(Error::new(ErrorCode::ReadOnly));
    }
    old_parent.filesystem().rename(
        old_parent.volume(),
        &old_parent,
        old_name,
        &new_parent,
        new_name,
        must_be_dir,
    )
}

pub fn unlink(path: &str) -> Result<()> {
    ensure_init();
    let (parent, name) = locate_parent_inode(path)?;
    if parent.volume().is_read_only() {
        return Err(Error::new(ErrorCode::ReadOnly));
    }
    parent.filesystem().unlink(parent.volume(), &parent, name)
}

pub fn remove_directory(path: &str) -> Result<()> {
    ensure_init();
    let (path, _) = strip_trailing_slashes(path);
    let (parent, name) = locate_parent_inode(path)?;
    if parent.volume().is_read_only() {
        return Err(Error::new(ErrorCode::ReadOnly));
    }
    parent
        .filesystem()
        .remove_directory(parent.volume(), &parent, name)
}

pub fn read_stat(path: &str) -> Result<FileStat> {
    let inode = locate_inode_by_path(path)?;
    inode.file_ops().read_stat(inode.volume(), &inode)
}

pub fn read_stat_fd(fd: i32) -> Result<FileStat> {
    let file = get_file_node(fd)?;
    file.inode().file_ops().read_stat(file.inode().volume(), file.inode())
}

pub fn sync(fd: i32) -> Result<()> {
    let file = get_file_node(fd)?;
    file.inode().file_ops().sync(&file)
}

// Wait-group support for file descriptors.

/// Adapter exposing an open file as a waitable through the file-ops
/// `add_listener` hook.
pub struct FileWaitable {
    file: Arc<FileNode>,
}

impl FileWaitable {
    pub fn from_fd(fd: i32) -> Result<Arc<FileWaitable>> {
        Ok(Arc::new(FileWaitable {
            file: get_file_node(fd)?,
        }))
    }
}

impl crate::sched::wait::WaitableObject for FileWaitable {
    fn add_listener(&self, node: &Arc<crate::sched::wait::WaitNode>, mode: crate::sched::wait::WaitMode) {
        let inode = self.file.inode();
        if let Err(err) = inode.file_ops().add_listener(&self.file, node, mode) {
            warn!("file listener registration failed: {}", err);
        }
    }

    fn remove_listener(
        &self,
        node: &Arc<crate::sched::wait::WaitNode>,
        mode: crate::sched::wait::WaitMode,
    ) {
        let inode = self.file.inode();
        let _ = inode.file_ops().remove_listener(&self.file, node, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trip() {
        ensure_init();
        create_directory("/tmp_rt", FileMode::directory(0o755)).ok();
        let fd = open(
            "/tmp_rt/data",
            OpenFlags::read_write() | OpenFlags::CREATE,
        )
        .unwrap();
        let payload = b"the quick brown fox";
        assert_eq!(write(fd, payload).unwrap(), payload.len());
        close(fd).unwrap();

        let fd = open("/tmp_rt/data", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 64];
        let read_back = read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..read_back], payload);
        // The position advanced; the next read sees EOF.
        assert_eq!(read(fd, &mut buf).unwrap(), 0);
        close(fd).unwrap();
        unlink("/tmp_rt/data").unwrap();
        remove_directory("/tmp_rt").unwrap();
    }

    #[test]
    fn positional_io_leaves_the_cursor_alone() {
        ensure_init();
        let fd = open(
            "/pos_io_probe",
            OpenFlags::read_write() | OpenFlags::CREATE,
        )
        .unwrap();
        write(fd, b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read_pos(fd, 2, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");
        assert_eq!(get_file(fd).unwrap().position(), 10);
        close(fd).unwrap();
        unlink("/pos_io_probe").unwrap();
    }

    #[test]
    fn vectored_io_round_trips() {
        ensure_init();
        let fd = open(
            "/vectored_probe",
            OpenFlags::read_write() | OpenFlags::CREATE,
        )
        .unwrap();
        assert_eq!(write_v(fd, &[&b"abc"[..], &b"defg"[..]]).unwrap(), 7);
        set_position(fd, 0).unwrap();
        let mut first = [0u8; 3];
        let mut second = [0u8; 4];
        let mut bufs: [&mut [u8]; 2] = [&mut first, &mut second];
        assert_eq!(read_v(fd, &mut bufs).unwrap(), 7);
        assert_eq!(&first, b"abc");
        assert_eq!(&second, b"defg");
        close(fd).unwrap();
        unlink("/vectored_probe").unwrap();
    }

    #[test]
    fn open_without_create_requires_existence() {
        ensure_init();
        let err = open("/never/made/this", OpenFlags::READ).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn dupe_shares_the_open_file() {
        ensure_init();
        let fd = open(
            "/dupe_probe",
            OpenFlags::read_write() | OpenFlags::CREATE,
        )
        .unwrap();
        write(fd, b"xy").unwrap();
        let dup = dupe(fd, None).unwrap();
        assert_ne!(fd, dup);
        // Shared position: the duplicate continues where the original left
        // off.
        write(dup, b"z").unwrap();
        set_position(fd, 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(read(fd, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"xyz");
        close(fd).unwrap();
        close(dup).unwrap();
        unlink("/dupe_probe").unwrap();
    }

    #[test]
    fn directories_list_their_entries() {
        ensure_init();
        create_directory("/listing", FileMode::directory(0o755)).unwrap();
        create_directory("/listing/sub", FileMode::directory(0o755)).unwrap();
        let fd = open("/listing/a", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        close(fd).unwrap();

        let dir = open("/listing", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
        let mut names = Vec::new();
        while let Some(entry) = read_directory(dir).unwrap() {
            names.push(entry.name);
        }
        assert_eq!(names, vec![".", "..", "a", "sub"]);

        rewind_directory(dir).unwrap();
        assert_eq!(read_directory(dir).unwrap().unwrap().name, ".");
        close(dir).unwrap();

        unlink("/listing/a").unwrap();
        remove_directory("/listing/sub").unwrap();
        remove_directory("/listing").unwrap();
    }

    #[test]
    fn rename_moves_files_between_directories() {
        ensure_init();
        create_directory("/ren_a", FileMode::directory(0o755)).unwrap();
        create_directory("/ren_b", FileMode::directory(0o755)).unwrap();
        let fd = open("/ren_a/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        write(fd, b"payload").unwrap();
        close(fd).unwrap();

        rename("/ren_a/f", "/ren_b/g").unwrap();
        assert!(open("/ren_a/f", OpenFlags::READ).is_err());
        let fd = open("/ren_b/g", OpenFlags::READ).unwrap();
        close(fd).unwrap();

        // A trailing slash restricts rename to directories.
        let err = rename("/ren_b/g/", "/ren_b/h").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotADirectory);

        unlink("/ren_b/g").unwrap();
        remove_directory("/ren_a").unwrap();
        remove_directory("/ren_b").unwrap();
    }

    #[test]
    fn symlinks_read_back_their_target() {
        ensure_init();
        create_symlink("/link_probe", "/somewhere/else").unwrap();
        assert_eq!(read_link("/link_probe").unwrap(), "/somewhere/else");
        unlink("/link_probe").unwrap();
    }

    #[test]
    fn stat_reports_size_and_mode() {
        ensure_init();
        let fd = open(
            "/stat_probe",
            OpenFlags::read_write() | OpenFlags::CREATE,
        )
        .unwrap();
        write(fd, b"12345").unwrap();
        close(fd).unwrap();
        let stat = read_stat("/stat_probe").unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.mode.is_regular());
        unlink("/stat_probe").unwrap();
    }

    #[test]
    fn mounting_covers_and_uncovering_restores() {
        ensure_init();
        // A second rootfs instance serves as the guest filesystem.
        register_filesystem("rootfs_guest", RootFilesystem::new() as Arc<dyn Filesystem>);
        create_directory("/mnt_probe", FileMode::directory(0o755)).unwrap();
        let fd = open(
            "/mnt_probe/original",
            OpenFlags::WRITE | OpenFlags::CREATE,
        )
        .unwrap();
        close(fd).unwrap();

        mount("", "/mnt_probe", "rootfs_guest", MountFlags::empty(), b"").unwrap();
        // The covered content is hidden...
        assert!(open("/mnt_probe/original", OpenFlags::READ).is_err());
        // ...and the guest volume is writable through the mount point.
        let fd = open(
            "/mnt_probe/guest_file",
            OpenFlags::WRITE | OpenFlags::CREATE,
        )
        .unwrap();
        close(fd).unwrap();
        // `..` at the mount root ascends into the parent volume.
        let dir = open("/mnt_probe/..", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
        close(dir).unwrap();

        unmount("/mnt_probe").unwrap();
        let fd = open("/mnt_probe/original", OpenFlags::READ).unwrap();
        close(fd).unwrap();
        unlink("/mnt_probe/original").unwrap();
        remove_directory("/mnt_probe").unwrap();
    }

    #[test]
    fn read_only_mounts_reject_mutation() {
        ensure_init();
        register_filesystem("rootfs_ro", RootFilesystem::new() as Arc<dyn Filesystem>);
        create_directory("/ro_probe", FileMode::directory(0o755)).unwrap();
        mount("", "/ro_probe", "rootfs_ro", MountFlags::READ_ONLY, b"").unwrap();
        let err = open("/ro_probe/new", OpenFlags::WRITE | OpenFlags::CREATE).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReadOnly);
        unmount("/ro_probe").unwrap();
        remove_directory("/ro_probe").unwrap();
    }
}
