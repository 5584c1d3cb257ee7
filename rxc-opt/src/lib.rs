//! RXC Optimizer
//!
//! IR-to-IR passes run by an explicit, ordered pass pipeline. Each pass
//! declares which passes must run before it; the manager rejects pipelines
//! that violate those declarations. Every pass iterates internally to its
//! own fixed point, so running a pass twice leaves the module unchanged.
//!
//! ## Passes
//!
//! - `mem2reg` - Promote scalar stack slots to SSA values
//! - `constfold` - Evaluate constant expressions and constant branches
//! - `instcombine` - Algebraic simplification
//! - `simplifycfg` - Unreachable block removal and block merging
//! - `dce` - Dead instruction removal

mod constfold;
mod dce;
mod instcombine;
mod mem2reg;
mod simplifycfg;

pub use constfold::ConstFold;
pub use dce::DeadCodeElimination;
pub use instcombine::InstCombine;
pub use mem2reg::Mem2Reg;
pub use simplifycfg::SimplifyCfg;

use log::{debug, info};
use rxc_common::{CompilerError, Result};
use rxc_ir::{verify_module, Function, Module};

/// An IR transformation
pub trait Pass: Send + Sync {
    /// Unique name, used in dependency declarations
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Passes that, when present in the same pipeline, must come earlier
    fn must_run_after(&self) -> &'static [&'static str] {
        &[]
    }

    /// Transform one function body. Returns whether anything changed.
    fn run_on_function(&self, func: &mut Function) -> bool;

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for func in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
            changed |= self.run_on_function(func);
        }
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run every pass once in order
    Once,
    /// Repeat the whole pipeline until nothing changes
    FixedPoint { max_iterations: usize },
}

pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    schedule: Schedule,
    verify_each: bool,
}

impl PassManager {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            passes: Vec::new(),
            schedule,
            verify_each: false,
        }
    }

    pub fn add(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// Run the verifier after every pass
    pub fn set_verify_each(&mut self, verify: bool) -> &mut Self {
        self.verify_each = verify;
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Standard pipeline for an optimization level
    pub fn for_level(opt_level: u8) -> Self {
        let mut pm = match opt_level {
            0 => return Self::new(Schedule::Once),
            1 => Self::new(Schedule::Once),
            _ => Self::new(Schedule::FixedPoint { max_iterations: 8 }),
        };
        if opt_level >= 2 {
            pm.add(Box::new(Mem2Reg));
        }
        pm.add(Box::new(ConstFold))
            .add(Box::new(InstCombine))
            .add(Box::new(SimplifyCfg))
            .add(Box::new(DeadCodeElimination));
        pm
    }

    /// Check that every declared dependency present in the pipeline comes
    /// before its dependent.
    pub fn validate(&self) -> Result<()> {
        for (i, pass) in self.passes.iter().enumerate() {
            for dep in pass.must_run_after() {
                if let Some(j) = self.passes.iter().position(|p| p.name() == *dep) {
                    if j > i {
                        return Err(CompilerError::PipelineOrder {
                            pass: pass.name().to_string(),
                            dependency: dep.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline. Returns whether the module changed.
    pub fn run(&self, module: &mut Module) -> Result<bool> {
        self.validate()?;
        let max_rounds = match self.schedule {
            Schedule::Once => 1,
            Schedule::FixedPoint { max_iterations } => max_iterations.max(1),
        };
        let mut any = false;
        for round in 0..max_rounds {
            let mut changed = false;
            for pass in &self.passes {
                let c = pass.run(module);
                debug!("pass '{}' round {}: {}", pass.name(), round, if c { "changed" } else { "no change" });
                if c && self.verify_each {
                    verify_module(module)?;
                }
                changed |= c;
            }
            any |= changed;
            if !changed {
                break;
            }
        }
        info!("optimized module '{}' with [{}]", module.name, self.pass_names().join(", "));
        Ok(any)
    }
}

#[cfg(test)]
mod tests;
