use super::*;
use crate::mfunc::MachineBlock;
use pretty_assertions::assert_eq;
use rxc_ir::Linkage;
use rxc_target::riscv32::opcodes::{ADD, ADDI, BNE, LW, SW};
use rxc_target::{FrameIndex, MachineInst, Operand};
use std::collections::BTreeSet;

const ZERO: Reg = Reg::Phys(PReg(0));
const A0: PReg = PReg(10);

fn v(n: u32) -> Reg {
    Reg::Virt(VReg(n))
}

fn function(blocks: Vec<Vec<MachineInst>>, vregs: u32) -> MachineFunction {
    let mut mf = MachineFunction::new("f", Linkage::External);
    for _ in 0..vregs {
        mf.new_vreg(RegClass::Gpr);
    }
    mf.blocks = blocks.into_iter().map(|insts| MachineBlock { insts }).collect();
    mf
}

fn ret(target: &TargetDescription) -> MachineInst {
    let mut ret = (target.hooks.ret)();
    ret.implicit_uses = vec![A0];
    ret
}

/// Forty values live at once: more than riscv32 has registers
fn pressure(target: &TargetDescription) -> MachineFunction {
    let n = 40;
    let mut insts = Vec::new();
    for i in 0..n {
        insts.push(MachineInst::new(ADDI).def(v(i)).use_reg(ZERO).imm(i as i64));
    }
    insts.push(MachineInst::new(ADD).def(v(n)).use_reg(v(0)).use_reg(v(1)));
    for i in 2..n {
        insts.push(MachineInst::new(ADD).def(v(n)).use_reg(v(n)).use_reg(v(i)));
    }
    insts.push((target.hooks.copy)(RegClass::Gpr, Reg::Phys(A0), v(n)));
    insts.push(ret(target));
    function(vec![insts], n + 1)
}

fn is_spill(inst: &MachineInst) -> bool {
    matches!(inst.operands.get(1), Some(Operand::Frame { index: FrameIndex::Slot(_), .. }))
}

#[test]
fn test_spilled_registers_go_through_their_slot() {
    let target = TargetDescription::riscv32();
    for kind in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
        let mut mf = pressure(&target);
        let (assignment, stats) = assign_registers(&mut mf, &target, kind).unwrap();
        assert!(stats.spilled > 0, "{kind}");
        assert!(stats.rounds > 1, "{kind}");
        assert_eq!(mf.slots.len(), stats.spill_slots.len());

        let insts = &mf.blocks[0].insts;
        for (i, inst) in insts.iter().enumerate() {
            if !is_spill(inst) {
                continue;
            }
            let temp = inst.reg(0).unwrap();
            if inst.opcode == LW {
                let user = insts[i..].iter().find(|n| !is_spill(n)).unwrap();
                assert!(user.uses().contains(&temp), "{kind}: reload of {temp} unused");
            } else {
                assert_eq!(inst.opcode, SW);
                let def = insts[..i].iter().rev().find(|n| !is_spill(n)).unwrap();
                assert!(def.defs().contains(&temp), "{kind}: store of {temp} not after its def");
            }
        }

        verify_allocation(&mf, &target, &assignment).unwrap();
        rewrite_registers(&mut mf, &assignment);
        for inst in &mf.blocks[0].insts {
            assert!(inst.uses().iter().chain(&inst.defs()).all(|r| r.as_phys().is_some()));
        }
    }
}

#[test]
fn test_copies_into_argument_registers_are_coalesced() {
    let target = TargetDescription::riscv32();
    let copy = target.hooks.copy;
    let mut mf = function(
        vec![vec![
            copy(RegClass::Gpr, v(0), Reg::Phys(A0)),
            MachineInst::new(ADDI).def(v(1)).use_reg(v(0)).imm(1),
            copy(RegClass::Gpr, Reg::Phys(A0), v(1)),
            ret(&target),
        ]],
        2,
    );
    let stats = allocate(&mut mf, &target, AllocatorKind::Irc).unwrap();
    assert_eq!(stats.rounds, 1);
    let insts = &mf.blocks[0].insts;
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].opcode, ADDI);
    assert_eq!(insts[0].reg(0), Some(Reg::Phys(A0)));
    assert_eq!(insts[0].reg(1), Some(Reg::Phys(A0)));
}

#[test]
fn test_values_live_across_calls_get_callee_saved_registers() {
    let target = TargetDescription::riscv32();
    for kind in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
        let mut call = (target.hooks.call)("g");
        call.clobbers = target.abi.caller_saved.to_vec();
        let mut mf = function(
            vec![vec![
                MachineInst::new(ADDI).def(v(0)).use_reg(ZERO).imm(7),
                call,
                (target.hooks.copy)(RegClass::Gpr, Reg::Phys(A0), v(0)),
                ret(&target),
            ]],
            1,
        );
        let (assignment, _) = assign_registers(&mut mf, &target, kind).unwrap();
        let reg = assignment[&VReg(0)];
        assert!(target.abi.is_callee_saved(reg), "{kind} gave {}", target.reg_name(reg));
    }
}

#[test]
fn test_empty_register_class_is_an_allocation_failure() {
    let mut target = TargetDescription::riscv32();
    target.allocatable_fpr = &[];
    let mut mf = MachineFunction::new("f", Linkage::External);
    let x = Reg::Virt(mf.new_vreg(RegClass::Fpr));
    mf.blocks = vec![MachineBlock {
        insts: vec![(target.hooks.copy)(RegClass::Fpr, x, Reg::Phys(PReg(42))), (target.hooks.ret)()],
    }];
    let err = allocate(&mut mf, &target, AllocatorKind::Irc).unwrap_err();
    assert_eq!(
        err,
        CompilerError::AllocationFailure {
            function: "f".to_string(),
            class: "fpr".to_string(),
        }
    );
}

#[test]
fn test_verifier_rejects_overlapping_registers() {
    let target = TargetDescription::riscv32();
    let mf = function(
        vec![vec![
            MachineInst::new(ADDI).def(v(0)).use_reg(ZERO).imm(1),
            MachineInst::new(ADDI).def(v(1)).use_reg(ZERO).imm(2),
            MachineInst::new(ADD).def(v(2)).use_reg(v(0)).use_reg(v(1)),
            (target.hooks.copy)(RegClass::Gpr, Reg::Phys(A0), v(2)),
            ret(&target),
        ]],
        3,
    );
    let good: Assignment = [(VReg(0), PReg(5)), (VReg(1), PReg(6)), (VReg(2), PReg(5))].into();
    verify_allocation(&mf, &target, &good).unwrap();
    let bad: Assignment = [(VReg(0), PReg(5)), (VReg(1), PReg(5)), (VReg(2), PReg(6))].into();
    assert!(matches!(
        verify_allocation(&mf, &target, &bad),
        Err(CompilerError::Internal { .. })
    ));
    let missing: Assignment = [(VReg(0), PReg(5))].into();
    assert!(verify_allocation(&mf, &target, &missing).is_err());
}

#[test]
fn test_liveness_and_intervals_across_a_loop() {
    let target = TargetDescription::riscv32();
    let mf = function(
        vec![
            vec![MachineInst::new(ADDI).def(v(0)).use_reg(ZERO).imm(0)],
            vec![
                MachineInst::new(ADDI).def(v(0)).use_reg(v(0)).imm(1),
                MachineInst::new(BNE)
                    .use_reg(v(0))
                    .use_reg(ZERO)
                    .block(1)
                    .flags(InstFlags::BRANCH),
            ],
            vec![(target.hooks.copy)(RegClass::Gpr, Reg::Phys(A0), v(0)), ret(&target)],
        ],
        1,
    );
    let live = Liveness::compute(&mf);
    assert_eq!(live.live_in[0], BTreeSet::from([ZERO]));
    assert_eq!(live.live_out[0], BTreeSet::from([ZERO, v(0)]));
    assert_eq!(live.live_out[1], BTreeSet::from([ZERO, v(0)]));
    assert_eq!(live.live_in[2], BTreeSet::from([v(0)]));

    assert_eq!(
        intervals(&mf, &live),
        vec![Interval {
            vreg: VReg(0),
            start: 1,
            end: 6,
        }]
    );
}

#[test]
fn test_allocator_names_parse() {
    assert_eq!("irc".parse::<AllocatorKind>(), Ok(AllocatorKind::Irc));
    assert_eq!("linear".parse::<AllocatorKind>(), Ok(AllocatorKind::LinearScan));
    assert!("greedy".parse::<AllocatorKind>().is_err());
    assert_eq!(AllocatorKind::default().to_string(), "irc");
}
