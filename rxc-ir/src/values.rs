//! IR entity handles
//!
//! Values, instructions and blocks are `u32` handles into the arenas owned by
//! their `Function`. Handles are only meaningful for the function that
//! created them.

use crate::types::IrType;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity!(Value, "v");
entity!(Inst, "inst");
entity!(Block, "bb");

/// Where a value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueDef {
    /// Function parameter at the given position
    Param(u32),
    /// The n-th result of an instruction
    Result(Inst, u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
    pub ty: IrType,
    pub def: ValueDef,
}
