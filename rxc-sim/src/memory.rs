//! Simulated address space
//!
//! One segment per loaded image section plus a stack. Code and read-only
//! data are mapped read-only; everything outside a segment faults.

use crate::error::SimError;
use rxc_object::{Image, SectionKind};

/// Initial stack pointer of every call
pub const STACK_TOP: u64 = 0x7000_0000;
pub const STACK_SIZE: u64 = 0x10_0000;

#[derive(Debug, Clone)]
struct Segment {
    name: String,
    base: u64,
    bytes: Vec<u8>,
    writable: bool,
}

impl Segment {
    fn range(&self, addr: u64, len: u64) -> Option<std::ops::Range<usize>> {
        let start = addr.checked_sub(self.base)?;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len() as u64).then_some(start as usize..end as usize)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    segments: Vec<Segment>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every section of `image` and map a stack below `STACK_TOP`
    pub fn from_image(image: &Image) -> Self {
        let mut memory = Self::new();
        for sec in image.sections.iter().filter(|s| s.size > 0) {
            let mut bytes = sec.data.clone();
            bytes.resize(sec.size as usize, 0);
            let writable = matches!(sec.kind, SectionKind::Data | SectionKind::Bss);
            memory.map(&sec.name, sec.addr, bytes, writable);
        }
        memory.map("stack", STACK_TOP - STACK_SIZE, vec![0; STACK_SIZE as usize], true);
        memory
    }

    pub fn map(&mut self, name: &str, base: u64, bytes: Vec<u8>, writable: bool) {
        self.segments.push(Segment {
            name: name.to_string(),
            base,
            bytes,
            writable,
        });
    }

    /// Name of the segment holding `addr`
    pub fn segment_of(&self, addr: u64) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.range(addr, 1).is_some())
            .map(|s| s.name.as_str())
    }

    pub fn read(&self, addr: u64, len: u64) -> Result<&[u8], SimError> {
        self.segments
            .iter()
            .find_map(|s| s.range(addr, len).map(|r| &s.bytes[r]))
            .ok_or(SimError::MemoryFault {
                addr,
                size: len,
                access: "read",
            })
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), SimError> {
        let len = data.len() as u64;
        let fault = SimError::MemoryFault {
            addr,
            size: len,
            access: "write",
        };
        let seg = self
            .segments
            .iter_mut()
            .find(|s| s.range(addr, len).is_some())
            .ok_or(fault.clone())?;
        if !seg.writable {
            return Err(fault);
        }
        let range = seg.range(addr, len).ok_or(fault)?;
        seg.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Little-endian load of `size` (1, 2, 4 or 8) bytes, zero-extended
    pub fn load(&self, addr: u64, size: u64) -> Result<u64, SimError> {
        let bytes = self.read(addr, size)?;
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn store(&mut self, addr: u64, value: u64, size: u64) -> Result<(), SimError> {
        self.write(addr, &value.to_le_bytes()[..size as usize])
    }

    /// Bytes at `addr` for instruction fetch, up to `max` of them
    pub fn fetch(&self, addr: u64, max: u64) -> Result<&[u8], SimError> {
        self.segments
            .iter()
            .find_map(|s| {
                let start = addr.checked_sub(s.base)?;
                (start < s.bytes.len() as u64).then(|| {
                    let end = (start + max).min(s.bytes.len() as u64);
                    &s.bytes[start as usize..end as usize]
                })
            })
            .ok_or(SimError::MemoryFault {
                addr,
                size: max,
                access: "fetch",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segments_and_faults() {
        let mut memory = Memory::new();
        memory.map("rom", 0x1000, vec![1, 2, 3, 4], false);
        memory.map("ram", 0x2000, vec![0; 16], true);

        assert_eq!(memory.load(0x1000, 4).unwrap(), 0x0403_0201);
        assert_eq!(memory.segment_of(0x2008), Some("ram"));
        memory.store(0x2004, 0xDEAD_BEEF, 4).unwrap();
        assert_eq!(memory.load(0x2004, 2).unwrap(), 0xBEEF);

        assert!(matches!(
            memory.store(0x1000, 0, 1),
            Err(SimError::MemoryFault { access: "write", .. })
        ));
        assert!(memory.load(0x200E, 4).is_err());
        assert_eq!(memory.fetch(0x1002, 15).unwrap(), &[3, 4]);
    }
}
