//! Flat binary images, their region table and the headered file format.
//!
//! Headered layout, all integers little-endian:
//!
//! ```text
//! magic "DFAS" | version u16 | region_count u16 | base u64 | entry u64
//! | region_count × { start u64, length u64, kind u8 } | payload
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::AsmError;
use crate::isa::RegionKind;
use crate::machine::{Bus, BusError};

pub const MAGIC: &[u8; 4] = b"DFAS";
pub const VERSION: u16 = 1;
const FIXED_HEADER: usize = 4 + 2 + 2 + 8 + 8;
const REGION_ENTRY: usize = 8 + 8 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: u64,
    pub length: u64,
    pub kind: RegionKind,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinaryImage {
    pub base: u64,
    pub bytes: Vec<u8>,
    pub regions: Vec<Region>,
    pub entry: Option<u64>,
}

impl BinaryImage {
    /// Untagged image from raw bytes; the caller supplies the load address.
    pub fn from_raw(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes, regions: Vec::new(), entry: None }
    }

    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr < self.end()
    }

    pub fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let off = addr.checked_sub(self.base)? as usize;
        self.bytes.get(off..off.checked_add(len)?)
    }

    pub fn region_at(&self, addr: u64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn to_raw(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Fails when the region table does not fit the header's 16-bit count.
    pub fn to_headered(&self) -> Result<Vec<u8>, AsmError> {
        let count = u16::try_from(self.regions.len()).map_err(|_| {
            AsmError::InvalidBinaryFormat(format!("{} regions exceed the header limit of {}", self.regions.len(), u16::MAX))
        })?;
        let mut out = Vec::with_capacity(FIXED_HEADER + self.regions.len() * REGION_ENTRY + self.bytes.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&self.base.to_le_bytes());
        out.extend_from_slice(&self.entry.unwrap_or(self.base).to_le_bytes());
        for r in &self.regions {
            out.extend_from_slice(&r.start.to_le_bytes());
            out.extend_from_slice(&r.length.to_le_bytes());
            out.push(match r.kind {
                RegionKind::Code => 0,
                RegionKind::Data => 1,
            });
        }
        out.extend_from_slice(&self.bytes);
        Ok(out)
    }

    pub fn is_headered(data: &[u8]) -> bool {
        data.starts_with(MAGIC)
    }

    pub fn from_headered(data: &[u8]) -> Result<Self, AsmError> {
        let bad = |m: &str| AsmError::InvalidBinaryFormat(m.to_string());
        if data.len() < FIXED_HEADER {
            return Err(bad("truncated header"));
        }
        if !Self::is_headered(data) {
            return Err(bad("bad magic"));
        }
        let u16_at = |o: usize| u16::from_le_bytes([data[o], data[o + 1]]);
        let u64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[o..o + 8]);
            u64::from_le_bytes(b)
        };
        let version = u16_at(4);
        if version != VERSION {
            return Err(AsmError::InvalidBinaryFormat(format!("unsupported version {version}")));
        }
        let count = u16_at(6) as usize;
        let base = u64_at(8);
        let entry = u64_at(16);
        let payload_at = FIXED_HEADER + count * REGION_ENTRY;
        if data.len() < payload_at {
            return Err(bad("truncated region table"));
        }
        let bytes = data[payload_at..].to_vec();
        let end = base
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| bad("payload wraps the address space"))?;
        let mut regions = Vec::with_capacity(count);
        for i in 0..count {
            let o = FIXED_HEADER + i * REGION_ENTRY;
            let (start, length) = (u64_at(o), u64_at(o + 8));
            let kind = match data[o + 16] {
                0 => RegionKind::Code,
                1 => RegionKind::Data,
                k => return Err(AsmError::InvalidBinaryFormat(format!("unknown region kind {k}"))),
            };
            if start < base || start.checked_add(length).map_or(true, |e| e > end) {
                return Err(AsmError::InvalidBinaryFormat(format!("region {start:#x}+{length:#x} lies outside the payload")));
            }
            regions.push(Region { start, length, kind });
        }
        Ok(Self { base, bytes, regions, entry: Some(entry) })
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    bytes: Vec<u8>,
    kind: RegionKind,
}

/// Sparse output buffer filled by the encoder's second pass.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    chunks: BTreeMap<u64, Chunk>,
    limit: Option<u64>,
}

impl ImageBuilder {
    /// `address_space_size` of 0 means unbounded.
    pub fn new(address_space_size: u64) -> Self {
        Self { chunks: BTreeMap::new(), limit: (address_space_size != 0).then_some(address_space_size) }
    }

    fn check_range(&self, addr: u64, len: usize) -> Result<u64, AsmError> {
        let end = addr.checked_add(len as u64).ok_or(AsmError::AddressOutOfRange { address: addr })?;
        match self.limit {
            Some(limit) if end > limit => Err(AsmError::AddressOutOfRange { address: addr.max(limit) }),
            _ => Ok(end),
        }
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8], kind: RegionKind) -> Result<(), AsmError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = self.check_range(addr, bytes.len())?;
        if let Some((&start, prev)) = self.chunks.range(..=addr).next_back() {
            if start + prev.bytes.len() as u64 > addr {
                return Err(AsmError::OverlappingOutput { address: addr });
            }
        }
        if let Some((&next, _)) = self.chunks.range(addr..).next() {
            if next < end {
                return Err(AsmError::OverlappingOutput { address: next });
            }
        }
        trace!(addr = format_args!("{addr:#x}"), len = bytes.len(), %kind, "emit");
        let append_to = self
            .chunks
            .range_mut(..addr)
            .next_back()
            .filter(|(s, c)| **s + c.bytes.len() as u64 == addr && c.kind == kind);
        match append_to {
            Some((_, c)) => c.bytes.extend_from_slice(bytes),
            None => {
                self.chunks.insert(addr, Chunk { bytes: bytes.to_vec(), kind });
            }
        }
        Ok(())
    }

    fn locate(&mut self, addr: u64) -> Option<&mut u8> {
        let (&start, chunk) = self.chunks.range_mut(..=addr).next_back()?;
        chunk.bytes.get_mut((addr - start) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Flattens the chunks; gaps are zero-filled and left untagged.
    pub fn finish(self, entry: Option<u64>) -> BinaryImage {
        let Some(&base) = self.chunks.keys().next() else {
            return BinaryImage { entry, ..BinaryImage::default() };
        };
        let mut bytes = Vec::new();
        let mut regions: Vec<Region> = Vec::new();
        for (start, chunk) in self.chunks {
            let off = (start - base) as usize;
            bytes.resize(off, 0);
            bytes.extend_from_slice(&chunk.bytes);
            let len = chunk.bytes.len() as u64;
            match regions.last_mut() {
                Some(r) if r.end() == start && r.kind == chunk.kind => r.length += len,
                _ => regions.push(Region { start, length: len, kind: chunk.kind }),
            }
        }
        BinaryImage { base, bytes, regions, entry }
    }
}

impl Bus for ImageBuilder {
    fn read_u8(&mut self, addr: u64) -> Result<u8, BusError> {
        Ok(self.locate(addr).map(|b| *b).unwrap_or(0))
    }

    fn write_u8(&mut self, addr: u64, val: u8) -> Result<(), BusError> {
        if let Some(b) = self.locate(addr) {
            *b = val;
            return Ok(());
        }
        self.write(addr, &[val], RegionKind::Data).map_err(|_| BusError::Unmapped { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_merges_adjacent_regions_and_fills_gaps() {
        let mut b = ImageBuilder::new(0x1000);
        b.write(0x10, &[1, 2], RegionKind::Code).unwrap();
        b.write(0x12, &[3, 4], RegionKind::Code).unwrap();
        b.write(0x18, &[9], RegionKind::Data).unwrap();
        let img = b.finish(Some(0x10));
        assert_eq!(img.base, 0x10);
        assert_eq!(img.bytes, vec![1, 2, 3, 4, 0, 0, 0, 0, 9]);
        assert_eq!(
            img.regions,
            vec![
                Region { start: 0x10, length: 4, kind: RegionKind::Code },
                Region { start: 0x18, length: 1, kind: RegionKind::Data },
            ]
        );
    }

    #[test]
    fn builder_rejects_overlap_and_out_of_range() {
        let mut b = ImageBuilder::new(0x100);
        b.write(0x10, &[1, 2, 3, 4], RegionKind::Code).unwrap();
        assert_eq!(b.write(0x12, &[0], RegionKind::Data), Err(AsmError::OverlappingOutput { address: 0x12 }));
        assert_eq!(b.write(0x0E, &[0, 0, 0], RegionKind::Data), Err(AsmError::OverlappingOutput { address: 0x10 }));
        assert!(matches!(b.write(0xFF, &[0, 0], RegionKind::Data), Err(AsmError::AddressOutOfRange { .. })));
    }

    #[test]
    fn headered_truncation_is_reported() {
        let img = BinaryImage {
            base: 0x20,
            bytes: vec![1, 2, 3],
            regions: vec![Region { start: 0x20, length: 3, kind: RegionKind::Code }],
            entry: Some(0x20),
        };
        let data = img.to_headered().unwrap();
        assert!(matches!(BinaryImage::from_headered(&data[..30]), Err(AsmError::InvalidBinaryFormat(_))));
        let mut bad = data.clone();
        bad[0] = b'X';
        assert!(matches!(BinaryImage::from_headered(&bad), Err(AsmError::InvalidBinaryFormat(_))));
        assert_eq!(BinaryImage::from_headered(&data).unwrap(), img);
    }

    #[test]
    fn region_count_must_fit_the_header() {
        let region = |i: u64| Region { start: i, length: 1, kind: if i % 2 == 0 { RegionKind::Code } else { RegionKind::Data } };
        let mut img = BinaryImage::from_raw(0, vec![0; 0x1_0000]);
        img.regions = (0..0xFFFF).map(region).collect();
        let data = img.to_headered().unwrap();
        assert_eq!(&data[6..8], &[0xFF, 0xFF]);
        assert_eq!(BinaryImage::from_headered(&data).unwrap().regions.len(), 0xFFFF);

        img.regions.push(region(0xFFFF));
        assert!(matches!(img.to_headered(), Err(AsmError::InvalidBinaryFormat(_))));
    }
}
