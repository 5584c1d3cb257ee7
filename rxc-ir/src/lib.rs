//! RXC Intermediate Representation
//!
//! Target-independent SSA form shared by every front-end and consumed by the
//! backend. Functions own arenas of values, instructions and blocks and refer
//! to them through `u32` handles.
//!
//! ## Architecture
//!
//! - `types` - Primitive type set (IrType)
//! - `values` - Entity handles (Value, Inst, Block)
//! - `ops` - Operation kinds and their evaluation rules
//! - `instructions` - Instruction kinds
//! - `function` - Function arenas and editing primitives
//! - `module` - Module, globals and linkage
//! - `builder` - Incremental, checking construction API
//! - `cfg` - CFG, dominator tree, dominance frontiers
//! - `verify` - Invariant checker
//! - `interp` - Reference interpreter
//! - `display` - Textual form

pub use self::builder::{FunctionBuilder, IrBuilder};
pub use self::cfg::{reverse_post_order, ControlFlowGraph, DominatorTree};
pub use self::display::InstDisplay;
pub use self::function::{BlockData, Function, Signature};
pub use self::instructions::{InstData, InstKind};
pub use self::interp::{InterpError, Interpreter};
pub use self::module::{DataItem, GlobalInit, GlobalVariable, Linkage, Module};
pub use self::ops::{BinaryOp, CastOp, FloatCC, IntCC, UnaryOp};
pub use self::types::IrType;
pub use self::values::{Block, Inst, Value, ValueData, ValueDef};
pub use self::verify::{verify_function, verify_module};

pub mod ops;

mod builder;
mod cfg;
mod display;
mod function;
mod instructions;
mod interp;
mod module;
mod types;
mod values;
mod verify;
