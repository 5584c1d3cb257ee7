//! Stack frame requests and layouts
//!
//! The backend describes what a function needs on the stack; the target
//! decides where everything lives relative to its frame base register.

use crate::minst::{FrameIndex, PReg};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameRequest {
    /// `(size, align)` of every frame slot, indexed by slot number
    pub slots: Vec<(u32, u32)>,
    /// Callee-saved registers the function writes
    pub saved: Vec<PReg>,
    /// Bytes of outgoing stack arguments
    pub outgoing: u32,
    pub has_calls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes the prologue reserves below the incoming stack pointer
    pub size: u64,
    /// Offset of every slot from `base`
    pub slot_offsets: Vec<i64>,
    pub base: PReg,
    /// Save slots of callee-saved registers, relative to `base`
    pub saved: Vec<(PReg, i64)>,
    /// Offset of the incoming stack argument area from `base`
    pub incoming_args: i64,
    pub has_calls: bool,
}

impl FrameLayout {
    /// Base-relative offset of a frame reference
    pub fn resolve(&self, index: FrameIndex, offset: i64) -> Option<i64> {
        match index {
            FrameIndex::Slot(s) => self.slot_offsets.get(s as usize).map(|o| o + offset),
            FrameIndex::IncomingArgs => Some(self.incoming_args + offset),
        }
    }
}

pub fn align_up(value: u64, align: u64) -> u64 {
    let align = align.max(1);
    value.div_ceil(align) * align
}
