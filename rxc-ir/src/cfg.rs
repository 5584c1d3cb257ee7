//! Control-flow analyses
//!
//! Predecessor/successor maps, reverse post-order, dominator tree
//! (Cooper, Harvey & Kennedy, "A Simple, Fast Dominance Algorithm") and
//! dominance frontiers. All tables are indexed by block handle.

use crate::function::Function;
use crate::values::Block;

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    preds: Vec<Vec<Block>>,
    succs: Vec<Vec<Block>>,
}

impl ControlFlowGraph {
    pub fn compute(func: &Function) -> Self {
        let n = func.blocks().iter().map(|b| b.index() + 1).max().unwrap_or(0);
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for &block in func.blocks() {
            for succ in func.successors(block) {
                if succ.index() < n {
                    succs[block.index()].push(succ);
                    if !preds[succ.index()].contains(&block) {
                        preds[succ.index()].push(block);
                    }
                }
            }
        }
        Self { preds, succs }
    }

    pub fn preds(&self, block: Block) -> &[Block] {
        self.preds.get(block.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn succs(&self, block: Block) -> &[Block] {
        self.succs.get(block.index()).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Blocks reachable from the entry in reverse post-order
pub fn reverse_post_order(func: &Function) -> Vec<Block> {
    let Some(entry) = func.entry_block() else {
        return Vec::new();
    };
    let n = func.blocks().iter().map(|b| b.index() + 1).max().unwrap_or(0);
    let mut visited = vec![false; n];
    let mut post = Vec::new();
    // Iterative DFS: (block, index of next successor to visit)
    let mut stack = vec![(entry, 0usize)];
    visited[entry.index()] = true;
    while let Some((block, next)) = stack.pop() {
        let succs = func.successors(block);
        if next < succs.len() {
            stack.push((block, next + 1));
            let succ = succs[next];
            if succ.index() < n && !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        } else {
            post.push(block);
        }
    }
    post.reverse();
    post
}

#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator; the entry maps to itself, unreachable blocks to `None`
    idom: Vec<Option<Block>>,
    rpo: Vec<Block>,
    rpo_number: Vec<usize>,
}

impl DominatorTree {
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let rpo = reverse_post_order(func);
        let n = func.blocks().iter().map(|b| b.index() + 1).max().unwrap_or(0);
        let mut rpo_number = vec![usize::MAX; n];
        for (i, b) in rpo.iter().enumerate() {
            rpo_number[b.index()] = i;
        }
        let mut idom: Vec<Option<Block>> = vec![None; n];
        if let Some(&entry) = rpo.first() {
            idom[entry.index()] = Some(entry);
        }

        let intersect = |idom: &[Option<Block>], mut a: Block, mut b: Block| -> Block {
            while a != b {
                while rpo_number[a.index()] > rpo_number[b.index()] {
                    a = idom[a.index()].unwrap_or(a);
                }
                while rpo_number[b.index()] > rpo_number[a.index()] {
                    b = idom[b.index()].unwrap_or(b);
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &pred in cfg.preds(block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, pred, cur),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        Self { idom, rpo, rpo_number }
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.idom.get(block.index()).is_some_and(|d| d.is_some())
    }

    /// Immediate dominator, `None` for the entry and unreachable blocks
    pub fn idom(&self, block: Block) -> Option<Block> {
        match self.idom.get(block.index()).copied().flatten() {
            Some(d) if d != block => Some(d),
            _ => None,
        }
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }

    pub fn rpo(&self) -> &[Block] {
        &self.rpo
    }

    pub fn rpo_number(&self, block: Block) -> Option<usize> {
        self.rpo_number
            .get(block.index())
            .copied()
            .filter(|&n| n != usize::MAX)
    }

    /// Children in the dominator tree, in RPO order
    pub fn children(&self, block: Block) -> Vec<Block> {
        self.rpo
            .iter()
            .copied()
            .filter(|&b| self.idom(b) == Some(block))
            .collect()
    }

    /// Dominance frontier of every reachable block
    pub fn frontiers(&self, cfg: &ControlFlowGraph) -> Vec<Vec<Block>> {
        let mut df = vec![Vec::new(); self.idom.len()];
        for &block in &self.rpo {
            let preds: Vec<Block> = cfg
                .preds(block)
                .iter()
                .copied()
                .filter(|&p| self.is_reachable(p))
                .collect();
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = self.idom[block.index()] else { continue };
            for pred in preds {
                let mut runner = pred;
                while runner != idom {
                    if !df[runner.index()].contains(&block) {
                        df[runner.index()].push(block);
                    }
                    match self.idom(runner) {
                        Some(d) => runner = d,
                        None => break,
                    }
                }
            }
        }
        df
    }
}
