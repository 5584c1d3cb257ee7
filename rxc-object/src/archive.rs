//! Archives: ordered, named object members
//!
//! ```text
//! "!<rxar>\n" u32 nmembers { str name, u32 length, [object bytes] }
//! ```

use crate::binary::{Reader, Writer};
use crate::error::FormatError;
use crate::object::ObjectFile;

pub const ARCHIVE_MAGIC: &[u8; 8] = b"!<rxar>\n";

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveMember {
    pub name: String,
    pub object: ObjectFile,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Archive {
    pub members: Vec<ArchiveMember>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, object: ObjectFile) {
        self.members.push(ArchiveMember {
            name: name.to_string(),
            object,
        });
    }

    /// Index of the first member exporting `symbol`
    pub fn member_defining(&self, symbol: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.object.exported().any(|s| s.name == symbol))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new();
        w.bytes(ARCHIVE_MAGIC);
        w.count(self.members.len(), "archive members")?;
        for member in &self.members {
            let bytes = member.object.to_bytes()?;
            w.str(&member.name)?;
            w.count(bytes.len(), "bytes in archive member")?;
            w.bytes(&bytes);
        }
        Ok(w.finish())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        r.magic(ARCHIVE_MAGIC, "!<rxar>")?;
        let n = r.count(2 + 4)?;
        let mut archive = Archive::new();
        for _ in 0..n {
            let name = r.str()?;
            let len = r.u32()? as usize;
            let object = ObjectFile::from_bytes(r.take(len)?)?;
            archive.add(&name, object);
        }
        r.expect_end("archive")?;
        Ok(archive)
    }

    pub fn is_archive(data: &[u8]) -> bool {
        data.starts_with(ARCHIVE_MAGIC)
    }
}
