// SPDX-License-Identifier: MPL-2.0

//! MBR partition-table decoding.
//!
//! Block-device drivers call [`decode_disk_partitions`] to decode a disk's
//! partition table: primary partitions and the logical partitions inside an
//! extended partition, if present. The extended entries themselves are not
//! returned. The table is validated; decoding fails on a bad signature,
//! more than one active or extended partition, partitions reaching outside
//! the disk, or overlapping partitions.

use static_assertions::const_assert_eq;

use crate::dev::DeviceGeometry;
use crate::prelude::*;

/// One decoded partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDesc {
    /// Offset in bytes.
    pub start: i64,
    /// Size in bytes.
    pub size: i64,
    /// Type as found in the partition table.
    pub partition_type: u8,
    /// Status as found in the partition table (bit 7 = active).
    pub status: u8,
}

/// Read callback handed to the decoder: `(byte offset, buffer) → bytes read`.
pub type DiskReadFn<'a> = dyn FnMut(i64, &mut [u8]) -> Result<usize> + 'a;

const MBR_SECTOR_SIZE: usize = 512;
const TABLE_OFFSET: usize = 0x1BE;
const RECORD_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 0x1FE;

// The four records and the signature tile the end of the sector exactly.
const_assert_eq!(TABLE_OFFSET + 4 * RECORD_SIZE, SIGNATURE_OFFSET);
const_assert_eq!(SIGNATURE_OFFSET + 2, MBR_SECTOR_SIZE);

/// Chain walks stop here; a corrupt extended chain must not loop forever.
const MAX_PARTITIONS: usize = 64;

#[derive(Debug, Clone, Copy)]
struct PartitionRecord {
    status: u8,
    partition_type: u8,
    start_lba: u32,
    size_sectors: u32,
}

impl PartitionRecord {
    fn parse(bytes: &[u8]) -> PartitionRecord {
        PartitionRecord {
            status: bytes[0],
            partition_type: bytes[4],
            start_lba: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            size_sectors: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }

    fn is_empty(&self) -> bool {
        self.partition_type == 0
    }
}

/// Decode the MBR and any nested extended partition tables of a disk.
///
/// `read` is called to fetch the primary table and each extended boot
/// record; partitions are reported with absolute byte offsets and sizes.
pub fn decode_disk_partitions(
    geometry: &DeviceGeometry,
    read: &mut DiskReadFn,
) -> Result<Vec<PartitionDesc>> {
    let sector_size = geometry.bytes_per_sector as i64;
    let disk_size = geometry.sector_count as i64 * sector_size;
    let mut partitions: Vec<PartitionDesc> = Vec::new();

    let mut table_pos: i64 = 0;
    let mut first_extended: i64 = 0;

    while partitions.len() < MAX_PARTITIONS {
        let mut buffer = [0u8; MBR_SECTOR_SIZE];
        if read(table_pos, &mut buffer)? != MBR_SECTOR_SIZE {
            return Err(Error::with_message(
                ErrorCode::IoError,
                "short read of partition table",
            ));
        }
        if buffer[SIGNATURE_OFFSET] != 0x55 || buffer[SIGNATURE_OFFSET + 1] != 0xAA {
            warn!("partition table at {} has a bad signature", table_pos);
            return Err(Error::with_message(
                ErrorCode::InvalidArgument,
                "invalid partition table signature",
            ));
        }

        let records: Vec<PartitionRecord> = (0..4)
            .map(|i| {
                let offset = TABLE_OFFSET + i * RECORD_SIZE;
                PartitionRecord::parse(&buffer[offset..offset + RECORD_SIZE])
            })
            .collect();

        let active = records.iter().filter(|r| r.status & 0x80 != 0).count();
        if active > 1 {
            return Err(Error::with_message(
                ErrorCode::InvalidArgument,
                "more than one active partition",
            ));
        }
        if records.iter().filter(|r| r.is_extended()).count() > 1 {
            return Err(Error::with_message(
                ErrorCode::InvalidArgument,
                "more than one extended partition",
            ));
        }

        let mut ext_start: i64 = 0;
        for record in &records {
            if record.is_empty() {
                continue;
            }
            if record.is_extended() {
                ext_start = record.start_lba as i64 * sector_size;
                continue;
            }
            let desc = PartitionDesc {
                start: record.start_lba as i64 * sector_size + table_pos,
                size: record.size_sectors as i64 * sector_size,
                partition_type: record.partition_type,
                status: record.status,
            };
            if desc.start + desc.size > disk_size {
                warn!(
                    "partition {} extends outside the disk",
                    partitions.len()
                );
                return Err(Error::with_message(
                    ErrorCode::InvalidArgument,
                    "partition extends outside the disk",
                ));
            }
            for (index, existing) in partitions.iter().enumerate() {
                if existing.start + existing.size > desc.start
                    && existing.start < desc.start + desc.size
                {
                    warn!(
                        "partition {} overlaps partition {}",
                        partitions.len(),
                        index
                    );
                    return Err(Error::with_message(
                        ErrorCode::InvalidArgument,
                        "overlapping partitions",
                    ));
                }
                if desc.status & 0x80 != 0 && existing.status & 0x80 != 0 {
                    return Err(Error::with_message(
                        ErrorCode::InvalidArgument,
                        "more than one active partition",
                    ));
                }
            }
            partitions.push(desc);
            if partitions.len() >= MAX_PARTITIONS {
                break;
            }
        }

        if ext_start == 0 {
            break;
        }
        table_pos = first_extended + ext_start;
        if first_extended == 0 {
            first_extended = ext_start;
        }
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECTOR: usize = 512;

    fn geometry(sector_count: u64) -> DeviceGeometry {
        DeviceGeometry {
            sector_count,
            bytes_per_sector: SECTOR as u32,
            read_only: false,
            removable: false,
        }
    }

    fn put_record(
        image: &mut [u8],
        table_at: usize,
        slot: usize,
        status: u8,
        partition_type: u8,
        start_lba: u32,
        size_sectors: u32,
    ) {
        let offset = table_at + TABLE_OFFSET + slot * RECORD_SIZE;
        image[offset] = status;
        image[offset + 4] = partition_type;
        image[offset + 8..offset + 12].copy_from_slice(&start_lba.to_le_bytes());
        image[offset + 12..offset + 16].copy_from_slice(&size_sectors.to_le_bytes());
    }

    fn sign(image: &mut [u8], table_at: usize) {
        image[table_at + SIGNATURE_OFFSET] = 0x55;
        image[table_at + SIGNATURE_OFFSET + 1] = 0xAA;
    }

    fn decode(image: &[u8], sectors: u64) -> Result<Vec<PartitionDesc>> {
        let mut read = |offset: i64, buffer: &mut [u8]| -> Result<usize> {
            let offset = offset as usize;
            buffer.copy_from_slice(&image[offset..offset + buffer.len()]);
            Ok(buffer.len())
        };
        decode_disk_partitions(&geometry(sectors), &mut read)
    }

    #[test]
    fn decodes_primaries_and_logicals() {
        let mut image = vec![0u8; 16384 * SECTOR];
        // Primary FAT32 partition and an extended partition holding one
        // logical Linux partition.
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x00, 0x0B, 2048, 2048);
        put_record(&mut image, 0, 1, 0x00, 0x05, 8192, 6144);
        let ebr = 8192 * SECTOR;
        sign(&mut image, ebr);
        put_record(&mut image, ebr, 0, 0x00, 0x83, 2048, 2048);

        let partitions = decode(&image, 16384).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].partition_type, 0x0B);
        assert_eq!(partitions[0].start, 2048 * SECTOR as i64);
        assert_eq!(partitions[0].size, 2048 * SECTOR as i64);
        assert_eq!(partitions[1].partition_type, 0x83);
        assert_eq!(partitions[1].start, (8192 + 2048) * SECTOR as i64);
        assert_eq!(partitions[1].size, 2048 * SECTOR as i64);
    }

    #[test]
    fn follows_chained_extended_records() {
        let mut image = vec![0u8; 32768 * SECTOR];
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x00, 0x0F, 8192, 24576);
        // First EBR: one logical plus a link to the next EBR (relative to
        // the extended partition start).
        let ebr1 = 8192 * SECTOR;
        sign(&mut image, ebr1);
        put_record(&mut image, ebr1, 0, 0x00, 0x83, 64, 1024);
        put_record(&mut image, ebr1, 1, 0x00, 0x05, 4096, 4096);
        let ebr2 = (8192 + 4096) * SECTOR;
        sign(&mut image, ebr2);
        put_record(&mut image, ebr2, 0, 0x00, 0x83, 64, 1024);

        let partitions = decode(&image, 32768).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].start, (8192 + 64) * SECTOR as i64);
        assert_eq!(partitions[1].start, (8192 + 4096 + 64) * SECTOR as i64);
    }

    #[test]
    fn rejects_bad_signature() {
        let image = vec![0u8; 64 * SECTOR];
        let err = decode(&image, 64).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn rejects_two_active_partitions() {
        let mut image = vec![0u8; 8192 * SECTOR];
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x80, 0x0B, 64, 512);
        put_record(&mut image, 0, 1, 0x80, 0x83, 1024, 512);
        assert!(decode(&image, 8192).is_err());
    }

    #[test]
    fn rejects_two_extended_partitions() {
        let mut image = vec![0u8; 8192 * SECTOR];
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x00, 0x05, 64, 512);
        put_record(&mut image, 0, 1, 0x00, 0x0F, 1024, 512);
        assert!(decode(&image, 8192).is_err());
    }

    #[test]
    fn rejects_partitions_outside_the_disk() {
        let mut image = vec![0u8; 1024 * SECTOR];
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x00, 0x83, 512, 1024);
        assert!(decode(&image, 1024).is_err());
    }

    #[test]
    fn rejects_overlapping_partitions() {
        let mut image = vec![0u8; 8192 * SECTOR];
        sign(&mut image, 0);
        put_record(&mut image, 0, 0, 0x00, 0x0B, 64, 1024);
        put_record(&mut image, 0, 1, 0x00, 0x83, 512, 1024);
        assert!(decode(&image, 8192).is_err());
    }

    proptest! {
        /// Whatever the decoder accepts is pairwise disjoint and inside the
        /// disk.
        #[test]
        fn accepted_tables_are_consistent(
            records in proptest::collection::vec((0u8..2, 1u8..=255, 1u32..8192, 1u32..8192), 1..4)
        ) {
            const SECTORS: u64 = 16384;
            let mut image = vec![0u8; SECTORS as usize * SECTOR];
            sign(&mut image, 0);
            for (slot, (active, ptype, lba, size)) in records.iter().enumerate() {
                put_record(
                    &mut image,
                    0,
                    slot,
                    if *active == 1 { 0x80 } else { 0 },
                    *ptype,
                    *lba,
                    *size,
                );
            }
            if let Ok(partitions) = decode(&image, SECTORS) {
                let disk_size = SECTORS as i64 * SECTOR as i64;
                for p in &partitions {
                    prop_assert!(p.start >= 0);
                    prop_assert!(p.start + p.size <= disk_size);
                }
                for (i, a) in partitions.iter().enumerate() {
                    for b in partitions.iter().skip(i + 1) {
                        prop_assert!(
                            a.start + a.size <= b.start || b.start + b.size <= a.start
                        );
                    }
                }
            }
        }
    }
}
