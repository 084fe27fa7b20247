// SPDX-License-Identifier: MPL-2.0

//! The volume registry and the inode cache.
//!
//! Inodes are materialized only through `Filesystem::load_inode`, at most
//! once per live `(volume, inode)` key: the loader parks a `Pending`
//! sentinel in the map first, and concurrent lookups of the same key wait
//! on the load condvar. When the last outside reference to an inode drops,
//! the sweep parks it on an MRU list instead of releasing it; entries idle
//! longer than the configured threshold (or beyond the cache cap) are
//! discarded, telling the filesystem through `release_inode` first.

use crate::config::{INODE_CACHE_IDLE_SECS, MAX_INODE_CACHE_COUNT};
use crate::klog::{klog, KLogSeverity, LOG_CAT_VFS};
use crate::prelude::*;
use crate::sync::{ConditionVariable, Mutex, RecursionMode};
use crate::time::{self, TimeValNanos};
use crate::vfs::inode::{Inode, InodeNum};
use crate::vfs::volume::{FsId, FsVolume};

#[derive(Clone)]
enum CacheSlot {
    /// A load (or discard) is in flight; waiters queue on the condvar.
    Pending,
    Ready(Arc<Inode>),
}

struct VfsInner {
    volumes: BTreeMap<FsId, Arc<FsVolume>>,
    inodes: BTreeMap<(FsId, InodeNum), CacheSlot>,
    /// Keys of unreferenced cached inodes, oldest first.
    mru: VecDeque<(FsId, InodeNum)>,
}

struct VfsManager {
    lock: Mutex,
    load_cond: ConditionVariable,
    inner: SpinLock<VfsInner>,
}

lazy_static! {
    static ref VFS_MANAGER: VfsManager = VfsManager {
        lock: Mutex::new("inode_map_mutex", RecursionMode::RaiseError),
        load_cond: ConditionVariable::new("inode_map_condition"),
        inner: SpinLock::new(VfsInner {
            volumes: BTreeMap::new(),
            inodes: BTreeMap::new(),
            mru: VecDeque::new(),
        }),
    };
}

/// Make `volume` reachable by id. Fails if the id is taken.
pub fn register_volume(volume: Arc<FsVolume>) -> Result<()> {
    let manager = &*VFS_MANAGER;
    manager.lock.lock_uninterruptible()?;
    let result = {
        let mut inner = manager.inner.lock();
        if inner.volumes.contains_key(&volume.id()) {
            Err(Error::with_message(
                ErrorCode::AlreadyExists,
                "volume id already registered",
            ))
        } else {
            inner.volumes.insert(volume.id(), volume);
            Ok(())
        }
    };
    manager.lock.unlock()?;
    result
}

pub fn get_volume(volume_id: FsId) -> Option<Arc<FsVolume>> {
    VFS_MANAGER.inner.lock().volumes.get(&volume_id).cloned()
}

/// Drop a volume from the registry along with its cached inodes.
pub fn unregister_volume(volume_id: FsId) -> Result<()> {
    let manager = &*VFS_MANAGER;
    manager.lock.lock_uninterruptible()?;
    let removed = {
        let mut inner = manager.inner.lock();
        let removed = inner.volumes.remove(&volume_id);
        if removed.is_some() {
            inner.inodes.retain(|(vol, _), _| *vol != volume_id);
            inner.mru.retain(|(vol, _)| *vol != volume_id);
        }
        removed
    };
    manager.lock.unlock()?;
    removed
        .map(|_| ())
        .ok_or(Error::new(ErrorCode::NotFound))
}

/// Look up (or load) the inode `(volume_id, inode_num)`. With `cross_mount`
/// set, an inode covered by another volume resolves to that volume's root.
pub fn get_inode(volume_id: FsId, inode_num: InodeNum, cross_mount: bool) -> Result<Arc<Inode>> {
    let manager = &*VFS_MANAGER;
    let key = (volume_id, inode_num);
    loop {
        manager.lock.lock()?;

        enum Found {
            Hit(Arc<Inode>),
            Pending,
            Load(Arc<FsVolume>),
            NoVolume,
        }

        let found = {
            let mut inner = manager.inner.lock();
            match inner.inodes.get(&key) {
                Some(CacheSlot::Ready(inode)) => {
                    let inode = inode.clone();
                    // Referenced again: off the unused list.
                    inner.mru.retain(|k| *k != key);
                    Found::Hit(inode)
                }
                Some(CacheSlot::Pending) => Found::Pending,
                None => match inner.volumes.get(&volume_id) {
                    Some(volume) => {
                        let volume = volume.clone();
                        inner.inodes.insert(key, CacheSlot::Pending);
                        Found::Load(volume)
                    }
                    None => Found::NoVolume,
                },
            }
        };

        match found {
            Found::Hit(inode) => {
                manager.lock.unlock()?;
                return Ok(resolve_mount(inode, cross_mount));
            }
            Found::Pending => {
                // Wait for the in-flight load, then look again.
                if let Err(err) = manager.load_cond.wait(&manager.lock) {
                    let _ = manager.lock.unlock();
                    return Err(err);
                }
                manager.lock.unlock()?;
            }
            Found::NoVolume => {
                manager.lock.unlock()?;
                return Err(Error::with_message(ErrorCode::NotFound, "no such volume"));
            }
            Found::Load(volume) => {
                // Load with the cache mutex released; the sentinel keeps
                // other lookups of this key parked meanwhile.
                manager.lock.unlock()?;
                let loaded = volume.filesystem().clone().load_inode(&volume, inode_num);
                manager.lock.lock_uninterruptible()?;
                let result = {
                    let mut inner = manager.inner.lock();
                    match loaded {
                        Ok(inode) => {
                            inner.inodes.insert(key, CacheSlot::Ready(inode.clone()));
                            Ok(inode)
                        }
                        Err(err) => {
                            inner.inodes.remove(&key);
                            Err(err)
                        }
                    }
                };
                manager.load_cond.wake_all();
                manager.lock.unlock()?;
                return result.map(|inode| resolve_mount(inode, cross_mount));
            }
        }
    }
}

fn resolve_mount(inode: Arc<Inode>, cross_mount: bool) -> Arc<Inode> {
    if cross_mount {
        if let Some(root) = inode.mount_root() {
            return root;
        }
    }
    inode
}

/// Sweep the inode cache: park newly-unreferenced inodes on the MRU list,
/// discard entries idle past the threshold and enforce the cache cap.
/// Called periodically by the disk-cache flusher.
pub fn flush_inodes() {
    let manager = &*VFS_MANAGER;
    if manager.lock.lock_uninterruptible().is_err() {
        return;
    }
    let now = time::get_monotonic_time();

    {
        let mut inner = manager.inner.lock();
        // Adopt inodes whose last outside reference has gone away since the
        // previous sweep, and release entries that picked up new references.
        let VfsInner { inodes, mru, .. } = &mut *inner;
        mru.retain(|key| match inodes.get(key) {
            Some(CacheSlot::Ready(inode)) => Arc::strong_count(inode) == 1,
            _ => false,
        });
        for (key, slot) in inodes.iter() {
            if let CacheSlot::Ready(inode) = slot {
                if Arc::strong_count(inode) == 1 && !mru.contains(key) {
                    inode.stamp_last_use(now);
                    mru.push_back(*key);
                }
            }
        }
    }

    let idle_threshold = TimeValNanos::from_secs(INODE_CACHE_IDLE_SECS);
    loop {
        let victim = {
            let mut inner = manager.inner.lock();
            let evict = match inner.mru.front() {
                Some(key) => {
                    let over_cap = inner.mru.len() > MAX_INODE_CACHE_COUNT;
                    let stale = match inner.inodes.get(key) {
                        Some(CacheSlot::Ready(inode)) => now - inode.last_use() > idle_threshold,
                        _ => true,
                    };
                    (over_cap || stale).then(|| *key)
                }
                None => None,
            };
            match evict {
                Some(key) => {
                    inner.mru.pop_front();
                    match inner.inodes.insert(key, CacheSlot::Pending) {
                        Some(CacheSlot::Ready(inode)) => Some((key, inode)),
                        _ => {
                            inner.inodes.remove(&key);
                            None
                        }
                    }
                }
                None => break,
            }
        };

        if let Some((key, inode)) = victim {
            klog!(
                LOG_CAT_VFS,
                KLogSeverity::InfoHighVol,
                "inode cache: discarding {}:{}",
                key.0,
                key.1
            );
            // Tell the filesystem with the cache mutex released; the
            // sentinel keeps the key claimed until we are done.
            let _ = manager.lock.unlock();
            inode.filesystem().clone().release_inode(&inode);
            drop(inode);
            if manager.lock.lock_uninterruptible().is_err() {
                return;
            }
            let mut inner = manager.inner.lock();
            inner.inodes.remove(&key);
            manager.load_cond.wake_all();
        }
    }
    let _ = manager.lock.unlock();
}

/// Number of unreferenced inodes currently parked in the cache.
pub fn unused_inode_count() -> usize {
    VFS_MANAGER.inner.lock().mru.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::file::FileNode;
    use crate::vfs::filesystem::{
        FileMode, FileOps, Filesystem, MountFlags, OpenFlags,
    };
    use core::sync::atomic::{AtomicU32, Ordering};

    struct NullFileOps;
    impl FileOps for NullFileOps {}

    /// A filesystem that manufactures inodes on demand and counts loads and
    /// releases.
    struct CountingFs {
        loads: AtomicU32,
        releases: AtomicU32,
        load_delay: TimeValNanos,
    }

    impl CountingFs {
        fn mounted(volume_id: FsId, load_delay: TimeValNanos) -> (Arc<CountingFs>, Arc<FsVolume>) {
            let fs = Arc::new(CountingFs {
                loads: AtomicU32::new(0),
                releases: AtomicU32::new(0),
                load_delay,
            });
            let volume = fs
                .clone()
                .mount(volume_id, "", MountFlags::empty(), b"")
                .unwrap();
            register_volume(volume.clone()).unwrap();
            (fs, volume)
        }
    }

    impl Filesystem for CountingFs {
        fn name(&self) -> &str {
            "countingfs"
        }

        fn mount(
            self: Arc<Self>,
            volume_id: FsId,
            device_path: &str,
            _flags: MountFlags,
            _args: &[u8],
        ) -> Result<Arc<FsVolume>> {
            let volume = FsVolume::new(volume_id, self.clone() as Arc<dyn Filesystem>, device_path);
            let root = Inode::new(
                self as Arc<dyn Filesystem>,
                volume.clone(),
                Arc::new(NullFileOps),
                1,
                FileMode::directory(0o755),
            );
            volume.set_root(root);
            Ok(volume)
        }

        fn locate_inode(
            &self,
            _volume: &Arc<FsVolume>,
            _parent: &Arc<Inode>,
            _name: &str,
        ) -> Result<Arc<Inode>> {
            Err(Error::new(ErrorCode::NotFound))
        }

        fn load_inode(&self, volume: &Arc<FsVolume>, inode_num: InodeNum) -> Result<Arc<Inode>> {
            self.loads.fetch_add(1, Ordering::AcqRel);
            if !self.load_delay.is_zero() {
                crate::sched::snooze(self.load_delay);
            }
            Ok(Inode::new(
                volume.filesystem().clone(),
                volume.clone(),
                Arc::new(NullFileOps),
                inode_num,
                FileMode::regular(0o644),
            ))
        }

        fn release_inode(&self, _inode: &Inode) {
            self.releases.fetch_add(1, Ordering::AcqRel);
        }

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
    }

    #[test]
    fn loads_are_deduplicated_per_key() {
        let (fs, volume) = CountingFs::mounted(900, TimeValNanos::zero());
        let a = get_inode(900, 7, false).unwrap();
        let b = get_inode(900, 7, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fs.loads.load(Ordering::Acquire), 1);
        let _ = get_inode(900, 8, false).unwrap();
        assert_eq!(fs.loads.load(Ordering::Acquire), 2);
        drop(volume);
        unregister_volume(900).unwrap();
    }

    #[test]
    fn missing_volume_is_reported() {
        let err = get_inode(9999, 1, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn concurrent_lookups_share_one_load() {
        let (fs, _volume) = CountingFs::mounted(901, TimeValNanos::from_millis(60));
        let mut workers = Vec::new();
        for _ in 0..3 {
            workers.push(
                crate::thread::spawn_thread("inode_racer", 0, || {
                    get_inode(901, 5, false).unwrap();
                })
                .unwrap(),
            );
        }
        for worker in workers {
            crate::thread::wait_for_thread(worker).unwrap();
        }
        assert_eq!(fs.loads.load(Ordering::Acquire), 1);
        unregister_volume(901).unwrap();
    }

    #[test]
    fn idle_inodes_are_released_to_the_filesystem() {
        let (fs, _volume) = CountingFs::mounted(902, TimeValNanos::zero());
        {
            let _inode = get_inode(902, 3, false).unwrap();
            // Referenced: a sweep must not discard it.
            flush_inodes();
            assert_eq!(fs.releases.load(Ordering::Acquire), 0);
        }
        // First sweep parks it on the MRU list...
        flush_inodes();
        assert_eq!(fs.releases.load(Ordering::Acquire), 0);
        // ...and once it has idled past the threshold it is discarded.
        crate::sched::snooze(TimeValNanos::from_secs(INODE_CACHE_IDLE_SECS) + TimeValNanos::from_millis(200));
        flush_inodes();
        assert_eq!(fs.releases.load(Ordering::Acquire), 1);
        // A later lookup loads it afresh.
        let _ = get_inode(902, 3, false).unwrap();
        assert_eq!(fs.loads.load(Ordering::Acquire), 2);
        unregister_volume(902).unwrap();
    }
}
