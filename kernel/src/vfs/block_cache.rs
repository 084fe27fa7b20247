// SPDX-License-Identifier: MPL-2.0

//! The per-device write-back block cache.
//!
//! A fixed pool of 4 KiB cache-aligned buffers is shared by all registered
//! devices. Headers migrate between a free list and an MRU list; a buffer
//! additionally carries `DIRTY` and `FLUSHING` flags. One global mutex
//! guards the map and lists; buffer write-back I/O runs with it released,
//! with `FLUSHING` keeping the victim claimed. A buffer whose dirty data is
//! being written out has `DIRTY` cleared up front, so a write racing with
//! the flush simply re-dirties it and nothing is lost.
//!
//! The flusher thread wakes every 250 ms while anything is dirty (5 s when
//! idle), first sweeps the inode cache, then writes back a small batch of
//! dirty buffers belonging to one device.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::config::{BC_FLUSH_COUNT, BLOCK_CACHE_BUFFER_COUNT, BUFFER_BLOCK_SIZE};
use crate::klog::{klog, KLogSeverity, LOG_CAT_BLOCK_CACHE};
use crate::prelude::*;
use crate::sync::{ConditionVariable, Mutex, RecursionMode};
use crate::time::TimeValNanos;
use crate::vfs::file_io;
use crate::vfs::vfs_manager;

bitflags! {
    struct CacheFlags: u8 {
        const DIRTY    = 0x01;
        const FLUSHING = 0x02;
    }
}

struct CacheHeader {
    device: i32,
    buffer_number: i64,
    use_count: u32,
    flags: CacheFlags,
}

struct PoolInner {
    headers: Vec<CacheHeader>,
    free: Vec<usize>,
    /// Indices of in-use buffers, oldest first.
    mru: VecDeque<usize>,
    map: BTreeMap<(i32, i64), usize>,
    /// Registered devices and their block sizes.
    devices: BTreeMap<i32, usize>,
}

struct CachePool {
    /// The one global cache mutex; backing I/O runs with it released.
    mutex: Mutex,
    /// Signalled when a flush finishes or a pin is dropped, so threads
    /// hunting for a victim can retry.
    flush_cond: ConditionVariable,
    inner: SpinLock<PoolInner>,
    buffers: Vec<SpinLock<Box<[u8; BUFFER_BLOCK_SIZE]>>>,
    dirty_count: AtomicI32,
}

lazy_static! {
    static ref CACHE_POOL: CachePool = {
        let mut headers = Vec::with_capacity(BLOCK_CACHE_BUFFER_COUNT);
        let mut free = Vec::with_capacity(BLOCK_CACHE_BUFFER_COUNT);
        let mut buffers = Vec::with_capacity(BLOCK_CACHE_BUFFER_COUNT);
        for index in 0..BLOCK_CACHE_BUFFER_COUNT {
            headers.push(CacheHeader {
                device: -1,
                buffer_number: -1,
                use_count: 0,
                flags: CacheFlags::empty(),
            });
            free.push(index);
            buffers.push(SpinLock::new(Box::new([0u8; BUFFER_BLOCK_SIZE])));
        }
        CachePool {
            mutex: Mutex::new("bcache_mutex", RecursionMode::RaiseError),
            flush_cond: ConditionVariable::new("bcache_flush_cond"),
            inner: SpinLock::new(PoolInner {
                headers,
                free,
                mru: VecDeque::new(),
                map: BTreeMap::new(),
                devices: BTreeMap::new(),
            }),
            buffers,
            dirty_count: AtomicI32::new(0),
        }
    };
}

/// Number of dirty buffers across all devices.
pub fn dirty_block_count() -> i32 {
    CACHE_POOL.dirty_count.load(Ordering::Acquire)
}

fn set_dirty(pool: &CachePool, inner: &mut PoolInner, index: usize) {
    let header = &mut inner.headers[index];
    if !header.flags.contains(CacheFlags::DIRTY) {
        header.flags.insert(CacheFlags::DIRTY);
        pool.dirty_count.fetch_add(1, Ordering::AcqRel);
        klog!(
            LOG_CAT_BLOCK_CACHE,
            KLogSeverity::InfoHighVol,
            "buffer {} of device {} dirty",
            header.buffer_number,
            header.device
        );
    }
}

fn clear_dirty(pool: &CachePool, inner: &mut PoolInner, index: usize) {
    let header = &mut inner.headers[index];
    if header.flags.contains(CacheFlags::DIRTY) {
        header.flags.remove(CacheFlags::DIRTY);
        pool.dirty_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Write buffer `index` back to its device. Must be entered with the pool
/// mutex held; the mutex is released around the device write and reacquired
/// before returning.
fn flush_buffer_locked(pool: &CachePool, index: usize) -> Result<()> {
    let (device, buffer_number, snapshot) = {
        let mut inner = pool.inner.lock();
        let header = &inner.headers[index];
        if !header.flags.contains(CacheFlags::DIRTY)
            || header.flags.contains(CacheFlags::FLUSHING)
        {
            return Ok(());
        }
        let device = header.device;
        let buffer_number = header.buffer_number;
        clear_dirty(pool, &mut inner, index);
        inner.headers[index].flags.insert(CacheFlags::FLUSHING);
        let mut snapshot = vec![0u8; BUFFER_BLOCK_SIZE];
        snapshot.copy_from_slice(&pool.buffers[index].lock()[..]);
        (device, buffer_number, snapshot)
    };

    pool.mutex.unlock()?;
    let write_result = file_io::write_pos(
        device,
        buffer_number * BUFFER_BLOCK_SIZE as i64,
        &snapshot,
    );
    pool.mutex.lock_uninterruptible()?;

    {
        let mut inner = pool.inner.lock();
        inner.headers[index].flags.remove(CacheFlags::FLUSHING);
        if let Err(err) = &write_result {
            // Keep the data; it will be retried on the next pass.
            set_dirty(pool, &mut inner, index);
            error!(
                "block cache: flush of buffer {} on device {} failed: {}",
                buffer_number, device, err
            );
        }
    }
    pool.flush_cond.wake_all();
    write_result.map(|_| ())
}

/// A pinned cache block. Reads and writes go through the descriptor; the
/// pin is dropped (and victim hunters signalled) when it goes out of scope.
pub struct CacheBlockDesc {
    index: usize,
    offset: usize,
    block_size: usize,
}

impl CacheBlockDesc {
    /// Copy the cached block into `buffer`.
    pub fn read(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() > self.block_size {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let data = CACHE_POOL.buffers[self.index].lock();
        buffer.copy_from_slice(&data[self.offset..self.offset + buffer.len()]);
        Ok(())
    }

    /// Overwrite the cached block with `buffer`. The caller marks the block
    /// dirty separately (or uses [`CacheBlockDesc::mark_dirty`]).
    pub fn write(&self, buffer: &[u8]) -> Result<()> {
        if buffer.len() > self.block_size {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let mut data = CACHE_POOL.buffers[self.index].lock();
        data[self.offset..self.offset + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }

    /// Run `f` over the cached block bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = CACHE_POOL.buffers[self.index].lock();
        f(&mut data[self.offset..self.offset + self.block_size])
    }

    pub fn mark_dirty(&self) -> Result<()> {
        let pool = &*CACHE_POOL;
        pool.mutex.lock_uninterruptible()?;
        set_dirty(pool, &mut pool.inner.lock(), self.index);
        pool.mutex.unlock()
    }
}

impl Drop for CacheBlockDesc {
    fn drop(&mut self) {
        let pool = &*CACHE_POOL;
        if pool.mutex.lock_uninterruptible().is_err() {
            return;
        }
        let unpinned = {
            let mut inner = pool.inner.lock();
            let header = &mut inner.headers[self.index];
            header.use_count -= 1;
            header.use_count == 0
        };
        let _ = pool.mutex.unlock();
        if unpinned {
            pool.flush_cond.wake_all();
        }
    }
}

/// The cache view of one block device.
#[derive(Debug)]
pub struct BlockCache {
    device: i32,
    block_size: usize,
    block_count: i64,
    block_to_buffer_shift: u32,
    buffer_offset_mask: i64,
}

impl BlockCache {
    /// Attach the cache to `device` (an open descriptor of the block
    /// device). `block_size` must be one of 512, 1024, 2048 or 4096.
    pub fn new(device: i32, block_count: i64, block_size: usize) -> Result<BlockCache> {
        let shift = match block_size {
            512 => 3,
            1024 => 2,
            2048 => 1,
            4096 => 0,
            _ => {
                return Err(Error::with_message(
                    ErrorCode::InvalidArgument,
                    "unsupported block size",
                ))
            }
        };
        let pool = &*CACHE_POOL;
        pool.mutex.lock()?;
        let registered = {
            let mut inner = pool.inner.lock();
            if inner.devices.contains_key(&device) {
                Err(Error::with_message(
                    ErrorCode::AlreadyExists,
                    "device already has a cache",
                ))
            } else {
                inner.devices.insert(device, block_size);
                Ok(())
            }
        };
        pool.mutex.unlock()?;
        registered?;
        Ok(BlockCache {
            device,
            block_size,
            block_count,
            block_to_buffer_shift: shift,
            buffer_offset_mask: (1 << shift) - 1,
        })
    }

    pub fn device(&self) -> i32 {
        self.device
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pin the buffer holding `block_num`, loading it from the device when
    /// `do_load` is set and it is not resident.
    pub fn get_block(&self, block_num: i64, do_load: bool) -> Result<CacheBlockDesc> {
        if !(0..self.block_count).contains(&block_num) {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let buffer_number = block_num >> self.block_to_buffer_shift;
        let offset = ((block_num & self.buffer_offset_mask) as usize) * self.block_size;

        let pool = &*CACHE_POOL;
        pool.mutex.lock()?;
        let result = self.get_buffer_locked(pool, buffer_number, do_load);
        pool.mutex.unlock()?;
        result.map(|index| CacheBlockDesc {
            index,
            offset,
            block_size: self.block_size,
        })
    }

    /// Find or make resident the buffer for `buffer_number`, returning its
    /// pinned pool index. Entered and exited with the pool mutex held.
    fn get_buffer_locked(
        &self,
        pool: &CachePool,
        buffer_number: i64,
        do_load: bool,
    ) -> Result<usize> {
        for _ in 0..10 {
            enum Victim {
                Hit(usize),
                Free(usize),
                Clean(usize),
                Dirty(usize),
                None,
            }

            let victim = {
                let mut inner = pool.inner.lock();
                if let Some(&index) = inner.map.get(&(self.device, buffer_number)) {
                    inner.headers[index].use_count += 1;
                    Victim::Hit(index)
                } else if let Some(index) = inner.free.pop() {
                    Victim::Free(index)
                } else {
                    let candidate = inner
                        .mru
                        .iter()
                        .copied()
                        .find(|&index| {
                            let header = &inner.headers[index];
                            header.use_count == 0 && !header.flags.contains(CacheFlags::FLUSHING)
                        });
                    match candidate {
                        None => Victim::None,
                        Some(index) => {
                            if inner.headers[index].flags.contains(CacheFlags::DIRTY) {
                                Victim::Dirty(index)
                            } else {
                                // Reclaim now, before the lock drops.
                                let old_key = (
                                    inner.headers[index].device,
                                    inner.headers[index].buffer_number,
                                );
                                inner.mru.retain(|&i| i != index);
                                inner.map.remove(&old_key);
                                Victim::Clean(index)
                            }
                        }
                    }
                }
            };

            match victim {
                Victim::Hit(index) => return Ok(index),
                Victim::Free(index) | Victim::Clean(index) => {
                    return match self.load_buffer(pool, index, buffer_number, do_load) {
                        Ok(()) => {
                            let mut inner = pool.inner.lock();
                            let header = &mut inner.headers[index];
                            header.device = self.device;
                            header.buffer_number = buffer_number;
                            header.use_count = 1;
                            header.flags = CacheFlags::empty();
                            inner.mru.push_back(index);
                            inner.map.insert((self.device, buffer_number), index);
                            Ok(index)
                        }
                        Err(err) => {
                            pool.inner.lock().free.push(index);
                            pool.flush_cond.wake_all();
                            Err(err)
                        }
                    };
                }
                Victim::Dirty(index) => {
                    // Write it back, then take another look: the buffer may
                    // have been pinned or re-dirtied meanwhile.
                    flush_buffer_locked(pool, index)?;
                }
                Victim::None => {
                    // Everything is pinned or mid-flush; wait for a pin to
                    // drop or a flush to finish, then rescan.
                    let waited = pool
                        .flush_cond
                        .wait_timeout(&pool.mutex, TimeValNanos::from_millis(500));
                    if let Err(err) = waited {
                        if err.code() != ErrorCode::TimedOut {
                            return Err(err);
                        }
                    }
                }
            }
        }
        error!("block cache: all buffers stuck busy");
        Err(Error::with_message(ErrorCode::BusBusy, "block cache exhausted"))
    }

    /// Fill buffer `index` from the device. Runs with the pool mutex held;
    /// the buffer is not yet mapped, so no other thread can reach it.
    fn load_buffer(
        &self,
        pool: &CachePool,
        index: usize,
        buffer_number: i64,
        do_load: bool,
    ) -> Result<()> {
        if !do_load {
            return Ok(());
        }
        let mut staging = vec![0u8; BUFFER_BLOCK_SIZE];
        file_io::read_pos(
            self.device,
            buffer_number * BUFFER_BLOCK_SIZE as i64,
            &mut staging,
        )
        .map_err(|err| {
            error!(
                "block cache: read of buffer {} from device {} failed: {}",
                buffer_number, self.device, err
            );
            Error::new(ErrorCode::IoError)
        })?;
        pool.buffers[index].lock().copy_from_slice(&staging);
        Ok(())
    }

    /// Flag the buffer holding `block_num` dirty. Idempotent; the global
    /// dirty counter moves only on the clean-to-dirty edge.
    pub fn mark_block_dirty(&self, block_num: i64) -> Result<()> {
        let buffer_number = block_num >> self.block_to_buffer_shift;
        let pool = &*CACHE_POOL;
        pool.mutex.lock()?;
        let result = {
            let mut inner = pool.inner.lock();
            match inner.map.get(&(self.device, buffer_number)) {
                Some(&index) => {
                    set_dirty(pool, &mut inner, index);
                    Ok(())
                }
                None => Err(Error::new(ErrorCode::NotFound)),
            }
        };
        pool.mutex.unlock()?;
        result
    }

    /// Read `buffer.len() / block_size` blocks starting at `block_num`.
    pub fn cached_read(&self, block_num: i64, buffer: &mut [u8]) -> Result<()> {
        debug_assert!(buffer.len() % self.block_size == 0);
        for (i, chunk) in buffer.chunks_mut(self.block_size).enumerate() {
            let block = self.get_block(block_num + i as i64, true)?;
            block.read(chunk)?;
        }
        Ok(())
    }

    /// Write whole blocks through the cache, marking them dirty for the
    /// flusher to coalesce.
    pub fn cached_write(&self, block_num: i64, buffer: &[u8]) -> Result<()> {
        debug_assert!(buffer.len() % self.block_size == 0);
        for (i, chunk) in buffer.chunks(self.block_size).enumerate() {
            let block = self.get_block(block_num + i as i64, true)?;
            block.write(chunk)?;
            block.mark_dirty()?;
        }
        Ok(())
    }

    /// Write back every dirty buffer of this device.
    pub fn flush(&self) -> Result<()> {
        let pool = &*CACHE_POOL;
        pool.mutex.lock()?;
        let result = loop {
            let candidate = {
                let inner = pool.inner.lock();
                inner
                    .map
                    .iter()
                    .filter(|((device, _), _)| *device == self.device)
                    .map(|(_, &index)| index)
                    .find(|&index| {
                        let header = &inner.headers[index];
                        header.flags.contains(CacheFlags::DIRTY)
                            && !header.flags.contains(CacheFlags::FLUSHING)
                    })
            };
            match candidate {
                Some(index) => {
                    if let Err(err) = flush_buffer_locked(pool, index) {
                        break Err(err);
                    }
                }
                None => break Ok(()),
            }
        };
        pool.mutex.unlock()?;
        result
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("block cache: flush on detach failed: {}", err);
        }
        let pool = &*CACHE_POOL;
        if pool.mutex.lock_uninterruptible().is_err() {
            return;
        }
        {
            let mut inner = pool.inner.lock();
            let stale: Vec<(i64, usize)> = inner
                .map
                .iter()
                .filter(|((device, _), _)| *device == self.device)
                .map(|((_, buffer_number), &index)| (*buffer_number, index))
                .collect();
            for (buffer_number, index) in stale {
                if inner.headers[index].use_count == 0 {
                    inner.map.remove(&(self.device, buffer_number));
                    inner.mru.retain(|&i| i != index);
                    clear_dirty(pool, &mut inner, index);
                    inner.headers[index].device = -1;
                    inner.free.push(index);
                }
            }
            inner.devices.remove(&self.device);
        }
        let _ = pool.mutex.unlock();
        pool.flush_cond.wake_all();
    }
}

/// One flusher pass: write back up to [`BC_FLUSH_COUNT`] dirty buffers, all
/// belonging to the same device.
pub(crate) fn flush_some() {
    let pool = &*CACHE_POOL;
    if pool.dirty_count.load(Ordering::Acquire) == 0 {
        return;
    }
    if pool.mutex.lock_uninterruptible().is_err() {
        return;
    }
    let batch: Vec<usize> = {
        let inner = pool.inner.lock();
        let mut device = -1;
        let mut batch = Vec::new();
        for &index in inner.mru.iter() {
            if batch.len() >= BC_FLUSH_COUNT {
                break;
            }
            let header = &inner.headers[index];
            if !header.flags.contains(CacheFlags::DIRTY)
                || header.flags.contains(CacheFlags::FLUSHING)
            {
                continue;
            }
            if device == -1 {
                device = header.device;
            }
            if header.device == device {
                batch.push(index);
            }
        }
        batch
    };
    for index in batch {
        if flush_buffer_locked(pool, index).is_err() {
            break;
        }
    }
    let _ = pool.mutex.unlock();
}

static FLUSHER: spin::Once<()> = spin::Once::new();

/// Start the background disk-cache flusher thread. Idempotent.
#[cfg_attr(test, allow(dead_code))]
pub(crate) fn spawn_flusher() {
    FLUSHER.call_once(|| {
        let spawned = crate::thread::spawn_thread("disk_cache_flusher", 0, || loop {
            if dirty_block_count() > 0 {
                crate::sched::snooze(TimeValNanos::from_millis(250));
            } else {
                crate::sched::snooze(TimeValNanos::from_secs(5));
            }
            vfs_manager::flush_inodes();
            flush_some();
        });
        if let Err(err) = spawned {
            error!("failed to start disk_cache_flusher: {}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev;
    use crate::vfs::filesystem::OpenFlags;

    // The pool and its dirty counter are process-wide; cache tests take
    // this lock so their accounting does not interleave.
    fn test_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ram_device(path: &str, bytes: usize, sector_size: u32) -> i32 {
        dev::register_ram_disk(path, bytes, sector_size).unwrap();
        file_io::open(path, OpenFlags::read_write()).unwrap()
    }

    #[test]
    fn cached_writes_read_back_and_flush_to_disk() {
        let _guard = test_lock();
        let fd = ram_device("/dev/test_bc/ram0", 64 * 1024, 512);
        let cache = BlockCache::new(fd, 128, 512).unwrap();

        let x = [0x11u8; 512];
        let y = [0x22u8; 512];
        cache.cached_write(10, &x).unwrap();
        cache.cached_write(20, &y).unwrap();

        let mut back = [0u8; 512];
        cache.cached_read(10, &mut back).unwrap();
        assert_eq!(back, x);

        cache.flush().unwrap();
        // After the flush the bytes are on the device, at the linear block
        // address.
        let mut on_disk = [0u8; 512];
        assert_eq!(file_io::read_pos(fd, 10 * 512, &mut on_disk).unwrap(), 512);
        assert_eq!(on_disk, x);
        assert_eq!(file_io::read_pos(fd, 20 * 512, &mut on_disk).unwrap(), 512);
        assert_eq!(on_disk, y);

        drop(cache);
        file_io::close(fd).unwrap();
    }

    #[test]
    fn dirty_counter_tracks_dirty_buffers() {
        let _guard = test_lock();
        let fd = ram_device("/dev/test_bc/ram1", 64 * 1024, 512);
        let cache = BlockCache::new(fd, 128, 512).unwrap();

        let before = dirty_block_count();
        let data = [0x33u8; 512];
        cache.cached_write(0, &data).unwrap();
        assert_eq!(dirty_block_count(), before + 1);
        // Marking an already-dirty buffer must not double-count.
        cache.mark_block_dirty(0).unwrap();
        assert_eq!(dirty_block_count(), before + 1);
        // Blocks 1..8 share buffer 0 with block 0; block 8 is a new buffer.
        cache.cached_write(8, &data).unwrap();
        assert_eq!(dirty_block_count(), before + 2);

        cache.flush().unwrap();
        assert_eq!(dirty_block_count(), before);

        drop(cache);
        file_io::close(fd).unwrap();
    }

    #[test]
    fn eviction_flushes_dirty_victims_before_reuse() {
        let _guard = test_lock();
        // More buffers than the pool holds: every block lands in its own
        // buffer, forcing eviction (and write-back) of earlier ones.
        let buffers = BLOCK_CACHE_BUFFER_COUNT + 8;
        let fd = ram_device(
            "/dev/test_bc/ram2",
            buffers * BUFFER_BLOCK_SIZE,
            4096,
        );
        let cache = BlockCache::new(fd, buffers as i64, 4096).unwrap();

        for block in 0..buffers as i64 {
            let mut data = [0u8; BUFFER_BLOCK_SIZE];
            data.fill(block as u8);
            cache.cached_write(block, &data).unwrap();
        }
        // Reading everything back goes through disk for evicted blocks.
        for block in 0..buffers as i64 {
            let mut data = [0u8; BUFFER_BLOCK_SIZE];
            cache.cached_read(block, &mut data).unwrap();
            assert!(data.iter().all(|&b| b == block as u8), "block {}", block);
        }

        drop(cache);
        file_io::close(fd).unwrap();
    }

    #[test]
    fn pinned_buffers_are_never_reclaimed() {
        let _guard = test_lock();
        let fd = ram_device("/dev/test_bc/ram3", 256 * 1024, 4096);
        let cache = BlockCache::new(fd, 64, 4096).unwrap();

        let pinned = cache.get_block(0, true).unwrap();
        pinned.write(&[0x44u8; 4096]).unwrap();
        pinned.mark_dirty().unwrap();

        // Cycle the rest of the pool several times over.
        for round in 0..3 {
            for block in 1..40 {
                let desc = cache.get_block(block, true).unwrap();
                desc.with_data(|data| data.fill(round as u8));
                desc.mark_dirty().unwrap();
            }
        }

        let mut data = [0u8; 4096];
        pinned.read(&mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0x44));
        drop(pinned);

        cache.flush().unwrap();
        drop(cache);
        file_io::close(fd).unwrap();
    }

    #[test]
    fn background_flusher_writes_dirty_data_out() {
        let _guard = test_lock();
        let fd = ram_device("/dev/test_bc/ram4", 64 * 1024, 4096);
        let cache = BlockCache::new(fd, 16, 4096).unwrap();

        let data = [0x55u8; 4096];
        cache.cached_write(3, &data).unwrap();
        flush_some();

        let mut on_disk = [0u8; 4096];
        file_io::read_pos(fd, 3 * 4096, &mut on_disk).unwrap();
        assert_eq!(on_disk[..16], data[..16]);

        drop(cache);
        file_io::close(fd).unwrap();
    }

    #[test]
    fn double_registration_of_a_device_is_rejected() {
        let _guard = test_lock();
        let fd = ram_device("/dev/test_bc/ram5", 16 * 1024, 512);
        let cache = BlockCache::new(fd, 32, 512).unwrap();
        let err = BlockCache::new(fd, 32, 512).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        assert!(BlockCache::new(fd + 10_000, 32, 777).is_err());
        drop(cache);
        file_io::close(fd).unwrap();
    }
}
