// SPDX-License-Identifier: MPL-2.0

//! A RAM-backed block device.

use crate::prelude::*;
use crate::vfs::file::FileNode;
use crate::vfs::filesystem::{FileMode, FileOps, FileStat};
use crate::vfs::inode::Inode;
use crate::vfs::rootfs;
use crate::vfs::volume::FsVolume;

use super::{DeviceGeometry, DEVCTL_FLUSH_DEVICE, DEVCTL_GET_DEVICE_GEOMETRY};

/// A fixed-size in-memory disk exposing the block-device contract: byte
/// addressed reads and writes clamped at the medium size, plus the geometry
/// control call.
pub struct RamDisk {
    data: SpinLock<Vec<u8>>,
    bytes_per_sector: u32,
}

impl RamDisk {
    pub fn new(byte_size: usize, bytes_per_sector: u32) -> RamDisk {
        RamDisk {
            data: SpinLock::new(vec![0u8; byte_size]),
            bytes_per_sector,
        }
    }

    pub fn geometry(&self) -> DeviceGeometry {
        DeviceGeometry {
            sector_count: (self.data.lock().len() as u64) / self.bytes_per_sector as u64,
            bytes_per_sector: self.bytes_per_sector,
            read_only: false,
            removable: false,
        }
    }
}

impl FileOps for RamDisk {
    fn read(&self, _file: &FileNode, buffer: &mut [u8], position: i64) -> Result<usize> {
        if position < 0 {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let data = self.data.lock();
        let position = position as usize;
        if position >= data.len() {
            return Ok(0);
        }
        let count = buffer.len().min(data.len() - position);
        buffer[..count].copy_from_slice(&data[position..position + count]);
        Ok(count)
    }

    fn write(&self, _file: &FileNode, buffer: &[u8], position: i64) -> Result<usize> {
        if position < 0 {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        let mut data = self.data.lock();
        let position = position as usize;
        if position >= data.len() {
            return Err(Error::with_message(ErrorCode::InvalidArgument, "write past medium"));
        }
        let count = buffer.len().min(data.len() - position);
        data[position..position + count].copy_from_slice(&buffer[..count]);
        Ok(count)
    }

    fn device_control(
        &self,
        _file: &FileNode,
        request: i32,
        _in_data: &[u8],
        out_data: &mut [u8],
    ) -> Result<usize> {
        match request {
            DEVCTL_GET_DEVICE_GEOMETRY => self.geometry().encode(out_data),
            DEVCTL_FLUSH_DEVICE => Ok(0),
            _ => Err(Error::new(ErrorCode::NotImplemented)),
        }
    }

    fn read_stat(&self, _volume: &Arc<FsVolume>, inode: &Arc<Inode>) -> Result<FileStat> {
        Ok(inode.default_stat(self.data.lock().len() as i64))
    }
}

/// Create a RAM disk and register it under `path`. Returns the device
/// registration handle.
pub fn register_ram_disk(path: &str, byte_size: usize, bytes_per_sector: u32) -> Result<i32> {
    rootfs::register_device(
        path,
        Arc::new(RamDisk::new(byte_size, bytes_per_sector)),
        FileMode::block_device(0o660),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::file_io;
    use crate::vfs::filesystem::OpenFlags;

    #[test]
    fn reads_and_writes_are_clamped_to_the_medium() {
        register_ram_disk("/dev/test_rd/ram0", 1024, 512).unwrap();
        let fd = file_io::open("/dev/test_rd/ram0", OpenFlags::read_write()).unwrap();

        assert_eq!(file_io::write_pos(fd, 0, &[0xAA; 256]).unwrap(), 256);
        // A write straddling the end is cut short.
        assert_eq!(file_io::write_pos(fd, 1000, &[0xBB; 100]).unwrap(), 24);
        assert!(file_io::write_pos(fd, 2048, &[0xCC; 8]).is_err());

        let mut buf = [0u8; 256];
        assert_eq!(file_io::read_pos(fd, 0, &mut buf).unwrap(), 256);
        assert!(buf.iter().all(|&b| b == 0xAA));
        // Reads past the end report EOF.
        assert_eq!(file_io::read_pos(fd, 2048, &mut buf).unwrap(), 0);

        file_io::close(fd).unwrap();
    }

    #[test]
    fn partition_decode_over_a_ram_disk() {
        use crate::vfs::partitions::decode_disk_partitions;

        register_ram_disk("/dev/test_rd/ram1", 4096 * 512, 512).unwrap();
        let fd = file_io::open("/dev/test_rd/ram1", OpenFlags::read_write()).unwrap();

        // Lay down an MBR with a single primary partition.
        let mut sector = [0u8; 512];
        sector[0x1FE] = 0x55;
        sector[0x1FF] = 0xAA;
        sector[0x1BE + 4] = 0x0C;
        sector[0x1BE + 8..0x1BE + 12].copy_from_slice(&64u32.to_le_bytes());
        sector[0x1BE + 12..0x1BE + 16].copy_from_slice(&1024u32.to_le_bytes());
        file_io::write_pos(fd, 0, &sector).unwrap();

        let geometry = super::super::get_device_geometry(fd).unwrap();
        let mut read = |offset: i64, buffer: &mut [u8]| file_io::read_pos(fd, offset, buffer);
        let partitions = decode_disk_partitions(&geometry, &mut read).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].partition_type, 0x0C);
        assert_eq!(partitions[0].start, 64 * 512);
        assert_eq!(partitions[0].size, 1024 * 512);

        file_io::close(fd).unwrap();
    }
}
