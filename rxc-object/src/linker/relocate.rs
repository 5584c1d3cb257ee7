//! Relocation application
//!
//! Runs once the symbol table and layout are frozen. Output sections are
//! independent, so they can be patched concurrently; results and the first
//! error are reported in output-section order regardless.

use crate::error::LinkError;
use crate::image::AppliedRelocation;
use crate::reloc::RelocKindInfo;
use log::trace;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct PendingRelocation {
    pub info: RelocKindInfo,
    /// Offset inside the output section
    pub offset: u64,
    /// Address of the patch site
    pub place: u64,
    pub symbol: String,
    pub symbol_addr: u64,
    pub addend: i64,
    pub input: String,
    pub input_offset: u64,
}

fn patch_section(data: &mut [u8], relocs: &[PendingRelocation]) -> Result<Vec<AppliedRelocation>, LinkError> {
    let mut applied = Vec::with_capacity(relocs.len());
    for r in relocs {
        let value = r.info.compute(r.symbol_addr, r.addend, r.place);
        let start = r.offset as usize;
        let Some(field) = data.get_mut(start..start + r.info.size as usize) else {
            return Err(LinkError::invalid(&r.input, format!("relocation at {:#x} outside its section", r.input_offset)));
        };
        if !(r.info.encode)(field, value) {
            return Err(LinkError::RelocationOverflow {
                symbol: r.symbol.clone(),
                kind: r.info.name,
                value,
                input: r.input.clone(),
                offset: r.input_offset,
            });
        }
        trace!("link: {} {} at {:#x} = {:#x}", r.info.name, r.symbol, r.place, value);
        applied.push(AppliedRelocation {
            place: r.place,
            kind: r.info.name,
            symbol: r.symbol.clone(),
            symbol_addr: r.symbol_addr,
            addend: r.addend,
            value,
        });
    }
    Ok(applied)
}

/// Patch every output section; `sections[i]` receives `pending[i]`
pub fn apply_relocations(
    sections: &mut [Vec<u8>],
    pending: &[Vec<PendingRelocation>],
    parallel: bool,
) -> Result<Vec<AppliedRelocation>, LinkError> {
    let results: Vec<Result<Vec<AppliedRelocation>, LinkError>> = if parallel {
        sections
            .par_iter_mut()
            .zip(pending.par_iter())
            .map(|(data, relocs)| patch_section(data, relocs))
            .collect()
    } else {
        sections
            .iter_mut()
            .zip(pending.iter())
            .map(|(data, relocs)| patch_section(data, relocs))
            .collect()
    };
    let mut applied = Vec::new();
    for result in results {
        applied.extend(result?);
    }
    Ok(applied)
}
