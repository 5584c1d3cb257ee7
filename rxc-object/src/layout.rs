//! Memory layouts for linked images
//!
//! A layout is a list of regions; each output section is placed in the first
//! region that accepts its kind, after whatever that region already holds.
//! Layouts are loadable from JSON:
//!
//! ```json
//! { "regions": [ { "name": "rom", "origin": 4096, "length": 65536, "kinds": ["text", "rodata"] } ] }
//! ```

use crate::object::SectionKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    pub origin: u64,
    pub length: u64,
    pub kinds: Vec<SectionKind>,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.origin.saturating_add(self.length)
    }

    pub fn accepts(&self, kind: SectionKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLayout {
    pub regions: Vec<MemoryRegion>,
}

impl MemoryLayout {
    /// A single region holding every section kind
    pub fn flat(origin: u64, length: u64) -> Self {
        Self {
            regions: vec![MemoryRegion {
                name: "ram".to_string(),
                origin,
                length,
                kinds: SectionKind::ALL.to_vec(),
            }],
        }
    }

    /// First region accepting `kind`
    pub fn region_for(&self, kind: SectionKind) -> Option<usize> {
        self.regions.iter().position(|r| r.accepts(kind))
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_json() {
        let text = r#"{ "regions": [
            { "name": "rom", "origin": 4096, "length": 256, "kinds": ["text", "rodata"] },
            { "name": "ram", "origin": 65536, "length": 256, "kinds": ["data", "bss"] }
        ] }"#;
        let layout = MemoryLayout::from_json(text).unwrap();
        assert_eq!(layout.region_for(SectionKind::Rodata), Some(0));
        assert_eq!(layout.region_for(SectionKind::Bss), Some(1));
        assert_eq!(layout.regions[0].end(), 4096 + 256);
    }
}
