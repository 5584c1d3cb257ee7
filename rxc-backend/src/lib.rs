//! RXC - Backend
//!
//! Turns an IR module into a relocatable object file for one target:
//!
//! 1. optimize (`rxc-opt` pipeline for the requested level)
//! 2. legalize (`legalize`)
//! 3. select machine instructions over virtual registers (`isel`)
//! 4. allocate registers (`regalloc`)
//! 5. lay out the stack frame (`frame`)
//! 6. encode and emit the object (`emit`)
//!
//! Steps 3 to 6 work on one function at a time and share nothing but the
//! target description, so functions may be compiled in parallel. Results
//! are merged in module order, so the object does not depend on scheduling.

pub mod emit;
pub mod frame;
pub mod isel;
pub mod legalize;
pub mod mfunc;
pub mod regalloc;

pub use emit::{emit_object, encode_function, EncodedFunction};
pub use mfunc::{MachineBlock, MachineFunction};
pub use regalloc::AllocatorKind;

use log::{debug, info};
use rayon::prelude::*;
use rxc_common::Result;
use rxc_ir::{verify_module, Function, Module};
use rxc_object::ObjectFile;
use rxc_opt::PassManager;
use rxc_target::TargetDescription;

/// Options for compiling a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub opt_level: u8,
    pub allocator: AllocatorKind,
    /// Compile functions on the rayon thread pool
    pub parallel: bool,
    /// Verify the IR before and after legalization
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: 1,
            allocator: AllocatorKind::Irc,
            parallel: true,
            verify: true,
        }
    }
}

/// Optimized and legalized copy of `module`, ready for selection
pub fn prepare_module(module: &Module, target: &TargetDescription, options: &CompileOptions) -> Result<Module> {
    let mut module = module.clone();
    if options.verify {
        verify_module(&module)?;
    }
    let pipeline = PassManager::for_level(options.opt_level);
    let changed = pipeline.run(&mut module)?;
    debug!(
        "-O{} pipeline {:?} on '{}' (changed: {changed})",
        options.opt_level,
        pipeline.pass_names(),
        module.name
    );
    legalize::legalize_module(&mut module, target)?;
    if options.verify {
        verify_module(&module)?;
    }
    Ok(module)
}

/// Select, allocate and lay out one legalized function
pub fn lower_function(func: &Function, target: &TargetDescription, options: &CompileOptions) -> Result<MachineFunction> {
    let mut mf = isel::select_function(func, target)?;
    let stats = regalloc::allocate(&mut mf, target, options.allocator)?;
    let layout = frame::lower_frame(&mut mf, target)?;
    debug!(
        "lowered '{}': {} instructions, {} spilled, frame {} bytes",
        mf.name,
        mf.inst_count(),
        stats.spilled,
        layout.size
    );
    Ok(mf)
}

pub fn compile_function(func: &Function, target: &TargetDescription, options: &CompileOptions) -> Result<EncodedFunction> {
    let mf = lower_function(func, target, options)?;
    encode_function(&mf, target)
}

/// Compile `module` into an object file for `target`
pub fn compile_module(module: &Module, target: &TargetDescription, options: &CompileOptions) -> Result<ObjectFile> {
    let module = prepare_module(module, target, options)?;
    let functions: Vec<&Function> = module.functions.iter().filter(|f| !f.is_declaration()).collect();

    // collected in module order so the first failing function is reported
    let results: Vec<Result<EncodedFunction>> = if options.parallel && functions.len() > 1 {
        functions
            .par_iter()
            .map(|func| compile_function(func, target, options))
            .collect()
    } else {
        functions
            .iter()
            .map(|func| compile_function(func, target, options))
            .collect()
    };
    let encoded = results.into_iter().collect::<Result<Vec<_>>>()?;

    let obj = emit_object(&module, &encoded, target)?;
    info!(
        "compiled '{}' for {}: {} functions, {} bytes of code, {} relocations",
        module.name,
        target.name,
        encoded.len(),
        encoded.iter().map(|f| f.code.len()).sum::<usize>(),
        obj.relocations.len()
    );
    Ok(obj)
}

#[cfg(test)]
mod tests;
