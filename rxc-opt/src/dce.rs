//! Dead code elimination: drops side-effect-free instructions whose results
//! are never used.

use crate::Pass;
use log::trace;
use rxc_ir::Function;

pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn description(&self) -> &'static str {
        "Removes instructions without side effects whose results are unused"
    }

    fn must_run_after(&self) -> &'static [&'static str] {
        &["instcombine", "constfold"]
    }

    fn run_on_function(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let uses = func.use_counts();
            let dead: Vec<_> = func
                .all_insts()
                .into_iter()
                .filter(|&i| {
                    !func.kind(i).has_side_effects() && func.results(i).iter().all(|r| uses[r.index()] == 0)
                })
                .collect();
            if dead.is_empty() {
                break;
            }
            for inst in dead {
                trace!("dce {}: removing {}", func.name, inst);
                func.remove_inst(inst);
            }
            changed = true;
        }
        changed
    }
}
