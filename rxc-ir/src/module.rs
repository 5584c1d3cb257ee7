//! IR Module and global variables

use crate::function::Function;
use crate::types::IrType;
use serde::{Deserialize, Serialize};

/// Symbol visibility of functions and globals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    /// Visible to other objects (global binding)
    External,
    /// Local to the object
    Internal,
    /// Global, but yields to any strong definition
    Weak,
}

/// One piece of a global's initial contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataItem {
    Bytes(Vec<u8>),
    Int { ty: IrType, value: i64 },
    Float { ty: IrType, bits: u64 },
    /// Address of a symbol plus addend; pointer sized
    SymbolAddr { symbol: String, addend: i64 },
    Zero(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalInit {
    /// Zero-initialized storage of the given size (bss)
    Zeroed(u64),
    Data(Vec<DataItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub linkage: Linkage,
    pub init: GlobalInit,
    pub align: u32,
    /// Read-only data
    pub constant: bool,
}

impl GlobalVariable {
    /// Size in bytes for a target with the given pointer width
    pub fn size(&self, pointer_bits: u32) -> u64 {
        match &self.init {
            GlobalInit::Zeroed(size) => *size,
            GlobalInit::Data(items) => items
                .iter()
                .map(|item| match item {
                    DataItem::Bytes(b) => b.len() as u64,
                    DataItem::Int { ty, .. } | DataItem::Float { ty, .. } => ty.bytes(pointer_bits) as u64,
                    DataItem::SymbolAddr { .. } => (pointer_bits / 8) as u64,
                    DataItem::Zero(n) => *n,
                })
                .sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalVariable>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn add_global(&mut self, global: GlobalVariable) {
        self.globals.push(global);
    }
}
