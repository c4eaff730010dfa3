//! FAT32 mount contract.
//!
//! Parsing an on-disk FAT32 volume is out of scope; this module only pins
//! down the shape a real implementation would plug into -- the BIOS
//! Parameter Block fields callers need to identify a volume, and a
//! [`Filesystem`] stub that reports itself honestly instead of silently
//! pretending to be a working filesystem.

use alloc::sync::Arc;

use super::{Filesystem, VfsNode};
use crate::error::KernelError;

/// Fields read from a FAT32 BIOS Parameter Block (offsets per the Microsoft
/// FAT spec), kept here so callers can identify a volume without this crate
/// needing to parse directory entries or the FAT itself.
#[derive(Debug, Clone, Copy)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub volume_label: [u8; 11],
}

impl BiosParameterBlock {
    /// Parse the fixed-offset fields out of a 512-byte boot sector. Returns
    /// `None` if the 0x55AA signature is missing.
    pub fn parse(sector: &[u8; 512]) -> Option<Self> {
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return None;
        }
        let u16_at = |o: usize| u16::from_le_bytes([sector[o], sector[o + 1]]);
        let u32_at = |o: usize| {
            u32::from_le_bytes([sector[o], sector[o + 1], sector[o + 2], sector[o + 3]])
        };
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&sector[71..82]);
        Some(Self {
            bytes_per_sector: u16_at(11),
            sectors_per_cluster: sector[13],
            reserved_sectors: u16_at(14),
            num_fats: sector[16],
            sectors_per_fat: u32_at(36),
            root_cluster: u32_at(44),
            volume_label,
        })
    }
}

/// Placeholder mount: reports the volume's BPB but every filesystem
/// operation fails with [`KernelError::NotImplemented`].
pub struct Fat32Fs {
    bpb: BiosParameterBlock,
}

impl Fat32Fs {
    pub fn new(bpb: BiosParameterBlock) -> Self {
        Self { bpb }
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }
}

impl Filesystem for Fat32Fs {
    fn root(&self) -> Arc<dyn VfsNode> {
        unimplemented!("FAT32 directory walking is not implemented")
    }

    fn name(&self) -> &str {
        "fat32"
    }

    fn is_readonly(&self) -> bool {
        true
    }

    fn sync(&self) -> Result<(), KernelError> {
        Err(KernelError::NotImplemented { feature: "fat32" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sector() -> [u8; 512] {
        let mut sector = [0u8; 512];
        sector[11] = 0x00;
        sector[12] = 0x02; // 512 bytes/sector
        sector[13] = 8; // sectors/cluster
        sector[14] = 32;
        sector[15] = 0; // 32 reserved sectors
        sector[16] = 2; // 2 FATs
        sector[36..40].copy_from_slice(&100u32.to_le_bytes());
        sector[44..48].copy_from_slice(&2u32.to_le_bytes());
        sector[71..82].copy_from_slice(b"NO NAME    ");
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn parses_bpb_fields() {
        let bpb = BiosParameterBlock::parse(&sample_sector()).unwrap();
        assert_eq!(bpb.bytes_per_sector, 512);
        assert_eq!(bpb.sectors_per_cluster, 8);
        assert_eq!(bpb.reserved_sectors, 32);
        assert_eq!(bpb.num_fats, 2);
        assert_eq!(bpb.sectors_per_fat, 100);
        assert_eq!(bpb.root_cluster, 2);
    }

    #[test]
    fn rejects_missing_signature() {
        let mut sector = sample_sector();
        sector[510] = 0;
        assert!(BiosParameterBlock::parse(&sector).is_none());
    }

    #[test]
    fn mount_reports_itself_unimplemented() {
        let fs = Fat32Fs::new(BiosParameterBlock::parse(&sample_sector()).unwrap());
        assert_eq!(fs.name(), "fat32");
        assert!(fs.is_readonly());
        assert!(fs.sync().is_err());
    }
}
