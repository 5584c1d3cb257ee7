//! Calling convention lowering
//!
//! Parameters are copied out of their argument registers (or loaded from
//! the incoming stack area) at the top of the entry block. Calls store
//! stack arguments, copy register arguments into place and read results
//! back from the result registers; every caller-saved register is
//! clobbered. Phi inputs are copied in front of the jump into the phi's
//! block, through fresh temporaries so the copies act in parallel.

use super::Selector;
use rxc_common::{CompilerError, Result};
use rxc_ir::{Block, Inst, InstKind, IrType};
use rxc_target::{ArgLoc, Emit, FrameIndex, Operand, PReg, Reg, RegClass};

impl Selector<'_> {
    fn result_regs(&self, types: &[IrType]) -> Result<Vec<PReg>> {
        self.target.abi.assign_rets(types).ok_or_else(|| {
            let list: Vec<String> = types.iter().map(|t| t.to_string()).collect();
            CompilerError::unsupported(self.target.name, format!("returning ({})", list.join(", ")))
        })
    }

    pub(super) fn lower_params(&mut self) -> Result<()> {
        let func = self.func;
        let target = self.target;
        let assignment = target.abi.assign_args(&func.signature.params, target.pointer_bits);
        let mut out = Vec::new();
        for (&param, &loc) in func.params().iter().zip(&assignment.locs) {
            if self.uses[param.index()] == 0 {
                continue;
            }
            let ty = func.value_type(param);
            let dst = self.reg(param);
            out.push(match loc {
                ArgLoc::Reg(preg) => (target.hooks.copy)(RegClass::for_type(ty), dst, Reg::Phys(preg)),
                ArgLoc::Stack(offset) => (target.hooks.load)(
                    ty,
                    dst,
                    Operand::Frame {
                        index: FrameIndex::IncomingArgs,
                        offset: offset as i64,
                    },
                ),
            });
        }
        let mut sink = self.sink(None);
        for inst in out {
            sink.push(inst);
        }
        Ok(())
    }

    pub(super) fn lower_call(&mut self, inst: Inst) -> Result<()> {
        let func = self.func;
        let target = self.target;
        let InstKind::Call { callee, args, rets } = func.kind(inst) else {
            return Ok(());
        };
        let types: Vec<IrType> = args.iter().map(|&a| func.value_type(a)).collect();
        let assignment = target.abi.assign_args(&types, target.pointer_bits);
        let ret_regs = self.result_regs(rets)?;
        let sp = Reg::Phys(target.abi.sp);

        let mut out = Vec::new();
        let mut arg_regs = Vec::new();
        for (i, (&arg, &loc)) in args.iter().zip(&assignment.locs).enumerate() {
            if let ArgLoc::Stack(offset) = loc {
                let src = self.reg(arg);
                out.push((target.hooks.store)(
                    types[i],
                    src,
                    Operand::Mem {
                        base: sp,
                        offset: offset as i64,
                    },
                ));
            }
        }
        for (i, (&arg, &loc)) in args.iter().zip(&assignment.locs).enumerate() {
            if let ArgLoc::Reg(preg) = loc {
                let src = self.reg(arg);
                out.push((target.hooks.copy)(RegClass::for_type(types[i]), Reg::Phys(preg), src));
                arg_regs.push(preg);
            }
        }
        let mut call = (target.hooks.call)(callee);
        call.implicit_uses = arg_regs;
        call.clobbers = target.abi.caller_saved.to_vec();
        out.push(call);
        for (&result, &preg) in func.results(inst).iter().zip(&ret_regs) {
            let dst = self.reg(result);
            out.push((target.hooks.copy)(RegClass::for_type(func.value_type(result)), dst, Reg::Phys(preg)));
        }

        self.mf.has_calls = true;
        self.mf.outgoing = self.mf.outgoing.max(assignment.stack_size);
        let loc = func.inst(inst).loc.clone();
        let mut sink = self.sink(loc);
        for inst in out {
            sink.push(inst);
        }
        Ok(())
    }

    pub(super) fn lower_return(&mut self, inst: Inst) -> Result<()> {
        let func = self.func;
        let target = self.target;
        let InstKind::Return { values } = func.kind(inst) else {
            return Ok(());
        };
        let ret_regs = self.result_regs(&func.signature.returns)?;
        let mut out = Vec::new();
        for (&value, &preg) in values.iter().zip(&ret_regs) {
            let src = self.reg(value);
            out.push((target.hooks.copy)(RegClass::for_type(func.value_type(value)), Reg::Phys(preg), src));
        }
        let mut ret = (target.hooks.ret)();
        ret.implicit_uses = ret_regs;
        out.push(ret);
        let loc = func.inst(inst).loc.clone();
        let mut sink = self.sink(loc);
        for inst in out {
            sink.push(inst);
        }
        Ok(())
    }

    pub(super) fn lower_jump(&mut self, inst: Inst, dest: Block) -> Result<()> {
        let func = self.func;
        let target = self.target;
        let Some(from) = func.inst(inst).block else {
            return Ok(());
        };
        let mut moves = Vec::new();
        for phi in func.phis(dest) {
            let InstKind::Phi { ty, incoming } = func.kind(phi) else { continue };
            let Some(&(_, value)) = incoming.iter().find(|(pred, _)| *pred == from) else {
                return Err(CompilerError::internal(format!(
                    "phi in '{}' has no input from {from}",
                    func.name
                )));
            };
            let Some(result) = func.result(phi) else { continue };
            moves.push((RegClass::for_type(*ty), self.reg(result), self.reg(value)));
        }

        let mut out = Vec::new();
        let mut staged = Vec::with_capacity(moves.len());
        for &(class, dst, src) in &moves {
            let temp = Reg::Virt(self.mf.new_vreg(class));
            out.push((target.hooks.copy)(class, temp, src));
            staged.push((class, dst, temp));
        }
        for (class, dst, temp) in staged {
            out.push((target.hooks.copy)(class, dst, temp));
        }
        out.push((target.hooks.jump)(self.block_of(dest)));

        let loc = func.inst(inst).loc.clone();
        let mut sink = self.sink(loc);
        for inst in out {
            sink.push(inst);
        }
        Ok(())
    }
}
