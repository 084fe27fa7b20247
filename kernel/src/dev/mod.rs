// SPDX-License-Identifier: MPL-2.0

//! Device-driver support: the control-call contract block devices answer,
//! and a RAM-backed block device used for bring-up and tests.

mod ram_disk;

pub use ram_disk::{register_ram_disk, RamDisk};

use crate::prelude::*;
use crate::vfs::file_io;

/// Control request: fill the output buffer with an encoded
/// [`DeviceGeometry`].
pub const DEVCTL_GET_DEVICE_GEOMETRY: i32 = 0x0001;
/// Control request: flush driver-side write buffers.
pub const DEVCTL_FLUSH_DEVICE: i32 = 0x0002;

/// Geometry of a block device, as answered to
/// [`DEVCTL_GET_DEVICE_GEOMETRY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGeometry {
    pub sector_count: u64,
    pub bytes_per_sector: u32,
    pub read_only: bool,
    pub removable: bool,
}

impl DeviceGeometry {
    /// Encoded size in a device-control buffer.
    pub const ENCODED_SIZE: usize = 16;

    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.len() < Self::ENCODED_SIZE {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        buffer[0..8].copy_from_slice(&self.sector_count.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        buffer[12] = self.read_only as u8;
        buffer[13] = self.removable as u8;
        buffer[14] = 0;
        buffer[15] = 0;
        Ok(Self::ENCODED_SIZE)
    }

    pub fn decode(buffer: &[u8]) -> Result<DeviceGeometry> {
        if buffer.len() < Self::ENCODED_SIZE {
            return Err(Error::new(ErrorCode::InvalidArgument));
        }
        Ok(DeviceGeometry {
            sector_count: u64::from_le_bytes(buffer[0..8].try_into().unwrap_or([0; 8])),
            bytes_per_sector: u32::from_le_bytes(buffer[8..12].try_into().unwrap_or([0; 4])),
            read_only: buffer[12] != 0,
            removable: buffer[13] != 0,
        })
    }
}

/// Query the geometry of the block device behind `fd`.
pub fn get_device_geometry(fd: i32) -> Result<DeviceGeometry> {
    let mut buffer = [0u8; DeviceGeometry::ENCODED_SIZE];
    let written = file_io::device_control(fd, DEVCTL_GET_DEVICE_GEOMETRY, &[], &mut buffer)?;
    if written < DeviceGeometry::ENCODED_SIZE {
        return Err(Error::new(ErrorCode::IoError));
    }
    DeviceGeometry::decode(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_encoding_round_trips() {
        let geometry = DeviceGeometry {
            sector_count: 0x1234_5678_9ABC,
            bytes_per_sector: 4096,
            read_only: true,
            removable: false,
        };
        let mut buffer = [0u8; DeviceGeometry::ENCODED_SIZE];
        geometry.encode(&mut buffer).unwrap();
        assert_eq!(DeviceGeometry::decode(&buffer).unwrap(), geometry);
    }

    #[test]
    fn geometry_ioctl_reaches_the_driver() {
        register_ram_disk("/dev/test_geo/ram0", 32 * 1024, 512).unwrap();
        let fd = crate::vfs::file_io::open(
            "/dev/test_geo/ram0",
            crate::vfs::filesystem::OpenFlags::READ,
        )
        .unwrap();
        let geometry = get_device_geometry(fd).unwrap();
        assert_eq!(geometry.sector_count, 64);
        assert_eq!(geometry.bytes_per_sector, 512);
        crate::vfs::file_io::close(fd).unwrap();
    }
}
