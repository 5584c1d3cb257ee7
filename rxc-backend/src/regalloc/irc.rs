//! Iterated register coalescing
//!
//! Graph colouring after George and Appel: simplify, conservative
//! coalescing (Briggs for virtual pairs, George against precolored nodes),
//! freeze, optimistic spilling and colour assignment. One graph is built per
//! register class; the target's allocatable registers of that class are the
//! precolored nodes and the only colours.

use super::liveness::{interferences, Liveness};
use super::{ClassAllocation, SpillCosts};
use crate::mfunc::MachineFunction;
use log::trace;
use rxc_target::{Reg, RegClass, TargetDescription, VReg};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Precolored,
    Initial,
    Simplify,
    Freeze,
    Spill,
    Coalesced,
    OnStack,
    Colored,
    Spilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Worklist,
    Active,
    Coalesced,
    Constrained,
    Frozen,
}

/// Node `i < k` is the `i`-th allocatable register, virtual registers follow
struct Graph {
    k: usize,
    vregs: Vec<VReg>,
    adj_set: HashSet<(usize, usize)>,
    adj_list: Vec<Vec<usize>>,
    degree: Vec<usize>,
    state: Vec<NodeState>,
    alias: Vec<usize>,
    color: Vec<Option<usize>>,
    moves: Vec<(usize, usize)>,
    move_state: Vec<MoveState>,
    move_list: Vec<Vec<usize>>,
    simplify: BTreeSet<usize>,
    freeze: BTreeSet<usize>,
    spill: BTreeSet<usize>,
    stack: Vec<usize>,
}

impl Graph {
    fn new(k: usize, vregs: Vec<VReg>) -> Self {
        let n = k + vregs.len();
        let mut state = vec![NodeState::Initial; n];
        let mut degree = vec![0; n];
        for i in 0..k {
            state[i] = NodeState::Precolored;
            degree[i] = usize::MAX / 2;
        }
        Self {
            k,
            vregs,
            adj_set: HashSet::new(),
            adj_list: vec![Vec::new(); n],
            degree,
            state,
            alias: (0..n).collect(),
            color: (0..n).map(|i| (i < k).then_some(i)).collect(),
            moves: Vec::new(),
            move_state: Vec::new(),
            move_list: vec![Vec::new(); n],
            simplify: BTreeSet::new(),
            freeze: BTreeSet::new(),
            spill: BTreeSet::new(),
            stack: Vec::new(),
        }
    }

    fn precolored(&self, n: usize) -> bool {
        n < self.k
    }

    fn add_edge(&mut self, u: usize, v: usize) {
        if u == v || self.adj_set.contains(&(u, v)) {
            return;
        }
        self.adj_set.insert((u, v));
        self.adj_set.insert((v, u));
        if !self.precolored(u) {
            self.adj_list[u].push(v);
            self.degree[u] += 1;
        }
        if !self.precolored(v) {
            self.adj_list[v].push(u);
            self.degree[v] += 1;
        }
    }

    fn add_move(&mut self, dst: usize, src: usize) {
        if dst == src || (self.precolored(dst) && self.precolored(src)) {
            return;
        }
        let m = self.moves.len();
        self.moves.push((dst, src));
        self.move_state.push(MoveState::Worklist);
        self.move_list[dst].push(m);
        self.move_list[src].push(m);
    }

    fn node_moves(&self, n: usize) -> Vec<usize> {
        self.move_list[n]
            .iter()
            .copied()
            .filter(|&m| matches!(self.move_state[m], MoveState::Active | MoveState::Worklist))
            .collect()
    }

    fn move_related(&self, n: usize) -> bool {
        !self.node_moves(n).is_empty()
    }

    fn adjacent(&self, n: usize) -> Vec<usize> {
        self.adj_list[n]
            .iter()
            .copied()
            .filter(|&m| !matches!(self.state[m], NodeState::OnStack | NodeState::Coalesced))
            .collect()
    }

    fn set_state(&mut self, n: usize, state: NodeState) {
        match self.state[n] {
            NodeState::Simplify => self.simplify.remove(&n),
            NodeState::Freeze => self.freeze.remove(&n),
            NodeState::Spill => self.spill.remove(&n),
            _ => false,
        };
        match state {
            NodeState::Simplify => self.simplify.insert(n),
            NodeState::Freeze => self.freeze.insert(n),
            NodeState::Spill => self.spill.insert(n),
            _ => false,
        };
        self.state[n] = state;
    }

    fn make_worklists(&mut self) {
        for n in self.k..self.state.len() {
            let state = if self.degree[n] >= self.k {
                NodeState::Spill
            } else if self.move_related(n) {
                NodeState::Freeze
            } else {
                NodeState::Simplify
            };
            self.set_state(n, state);
        }
    }

    fn enable_moves(&mut self, nodes: impl IntoIterator<Item = usize>) {
        for n in nodes {
            for m in self.node_moves(n) {
                if self.move_state[m] == MoveState::Active {
                    self.move_state[m] = MoveState::Worklist;
                }
            }
        }
    }

    fn decrement_degree(&mut self, m: usize) {
        if self.precolored(m) {
            return;
        }
        let d = self.degree[m];
        self.degree[m] -= 1;
        if d == self.k {
            let mut nodes = self.adjacent(m);
            nodes.push(m);
            self.enable_moves(nodes);
            if self.state[m] == NodeState::Spill {
                let next = if self.move_related(m) {
                    NodeState::Freeze
                } else {
                    NodeState::Simplify
                };
                self.set_state(m, next);
            }
        }
    }

    fn simplify_node(&mut self, n: usize) {
        self.set_state(n, NodeState::OnStack);
        self.stack.push(n);
        for m in self.adjacent(n) {
            self.decrement_degree(m);
        }
    }

    fn get_alias(&self, mut n: usize) -> usize {
        while self.state[n] == NodeState::Coalesced {
            n = self.alias[n];
        }
        n
    }

    fn add_worklist(&mut self, u: usize) {
        if !self.precolored(u) && !self.move_related(u) && self.degree[u] < self.k && self.state[u] == NodeState::Freeze {
            self.set_state(u, NodeState::Simplify);
        }
    }

    /// George's test for merging `r` into precolored `u`
    fn ok(&self, t: usize, r: usize) -> bool {
        self.degree[t] < self.k || self.precolored(t) || self.adj_set.contains(&(t, r))
    }

    /// Briggs' test
    fn conservative(&self, nodes: &BTreeSet<usize>) -> bool {
        nodes.iter().filter(|&&n| self.degree[n] >= self.k).count() < self.k
    }

    fn coalesce(&mut self, m: usize) {
        let (x, y) = self.moves[m];
        let (x, y) = (self.get_alias(x), self.get_alias(y));
        let (u, v) = if self.precolored(y) { (y, x) } else { (x, y) };
        if u == v {
            self.move_state[m] = MoveState::Coalesced;
            self.add_worklist(u);
        } else if self.precolored(v) || self.adj_set.contains(&(u, v)) {
            self.move_state[m] = MoveState::Constrained;
            self.add_worklist(u);
            self.add_worklist(v);
        } else if (self.precolored(u) && self.adjacent(v).iter().all(|&t| self.ok(t, u)))
            || (!self.precolored(u) && {
                let nodes: BTreeSet<usize> = self.adjacent(u).into_iter().chain(self.adjacent(v)).collect();
                self.conservative(&nodes)
            })
        {
            self.move_state[m] = MoveState::Coalesced;
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.move_state[m] = MoveState::Active;
        }
    }

    fn combine(&mut self, u: usize, v: usize) {
        self.set_state(v, NodeState::Coalesced);
        self.alias[v] = u;
        let moves = self.move_list[v].clone();
        self.move_list[u].extend(moves);
        self.enable_moves([v]);
        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }
        if self.degree[u] >= self.k && self.state[u] == NodeState::Freeze {
            self.set_state(u, NodeState::Spill);
        }
    }

    fn freeze_moves(&mut self, u: usize) {
        for m in self.node_moves(u) {
            let (x, y) = self.moves[m];
            let v = if self.get_alias(y) == self.get_alias(u) {
                self.get_alias(x)
            } else {
                self.get_alias(y)
            };
            self.move_state[m] = MoveState::Frozen;
            if self.state[v] == NodeState::Freeze && !self.move_related(v) && self.degree[v] < self.k {
                self.set_state(v, NodeState::Simplify);
            }
        }
    }

    fn freeze_node(&mut self, u: usize) {
        self.set_state(u, NodeState::Simplify);
        self.freeze_moves(u);
    }

    fn select_spill(&mut self, costs: &SpillCosts, temps: &[bool]) {
        let weight = |n: usize| {
            let vreg = self.vregs[n - self.k];
            costs.get(&vreg).copied().unwrap_or(0) as f64 / self.degree[n].max(1) as f64
        };
        let is_temp = |n: usize| temps.get(self.vregs[n - self.k].index()).copied().unwrap_or(false);
        let mut best: Option<usize> = None;
        for &n in &self.spill {
            let better = match best {
                None => true,
                Some(b) => match (is_temp(n), is_temp(b)) {
                    (false, true) => true,
                    (true, false) => false,
                    _ => weight(n) < weight(b),
                },
            };
            if better {
                best = Some(n);
            }
        }
        if let Some(m) = best {
            self.set_state(m, NodeState::Simplify);
            self.freeze_moves(m);
        }
    }

    fn assign_colors(&mut self) -> Vec<usize> {
        let mut spilled = Vec::new();
        while let Some(n) = self.stack.pop() {
            let mut free: Vec<bool> = vec![true; self.k];
            for &w in &self.adj_list[n] {
                let a = self.get_alias(w);
                if matches!(self.state[a], NodeState::Colored | NodeState::Precolored) {
                    if let Some(c) = self.color[a] {
                        free[c] = false;
                    }
                }
            }
            match free.iter().position(|&f| f) {
                Some(c) => {
                    self.state[n] = NodeState::Colored;
                    self.color[n] = Some(c);
                }
                None => {
                    self.state[n] = NodeState::Spilled;
                    spilled.push(n);
                }
            }
        }
        for n in self.k..self.state.len() {
            if self.state[n] == NodeState::Coalesced {
                let a = self.get_alias(n);
                self.color[n] = self.color[a];
            }
        }
        spilled
    }
}

/// Colour the virtual registers of one class
pub fn allocate_class(
    mf: &MachineFunction,
    target: &TargetDescription,
    liveness: &Liveness,
    class: RegClass,
    costs: &SpillCosts,
) -> ClassAllocation {
    let colors = target.allocatable(class);
    let vregs: Vec<VReg> = costs
        .keys()
        .copied()
        .filter(|&v| mf.vreg_class(v) == class)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut graph = Graph::new(colors.len(), vregs);

    let mut index: HashMap<Reg, usize> = HashMap::new();
    for (i, &p) in colors.iter().enumerate() {
        index.insert(Reg::Phys(p), i);
    }
    for (i, &v) in graph.vregs.iter().enumerate() {
        index.insert(Reg::Virt(v), colors.len() + i);
    }

    let mut edges = Vec::new();
    let mut copies = Vec::new();
    interferences(
        mf,
        liveness,
        |a, b| edges.push((a, b)),
        |dst, src| copies.push((dst, src)),
    );
    for (a, b) in edges {
        if let (Some(&u), Some(&v)) = (index.get(&a), index.get(&b)) {
            graph.add_edge(u, v);
        }
    }
    for (dst, src) in copies {
        if let (Some(&u), Some(&v)) = (index.get(&dst), index.get(&src)) {
            graph.add_move(u, v);
        }
    }

    graph.make_worklists();
    loop {
        if let Some(&n) = graph.simplify.first() {
            graph.simplify_node(n);
        } else if let Some(m) = (0..graph.moves.len()).find(|&m| graph.move_state[m] == MoveState::Worklist) {
            graph.coalesce(m);
        } else if let Some(&n) = graph.freeze.first() {
            graph.freeze_node(n);
        } else if !graph.spill.is_empty() {
            graph.select_spill(costs, &mf.spill_temps);
        } else {
            break;
        }
    }
    let spilled = graph.assign_colors();

    let mut out = ClassAllocation::default();
    for (i, &v) in graph.vregs.iter().enumerate() {
        let n = colors.len() + i;
        let root = graph.get_alias(n);
        if spilled.contains(&n) || spilled.contains(&root) {
            out.spilled.push(v);
        } else if let Some(c) = graph.color[n] {
            out.colors.insert(v, colors[c]);
        }
    }
    let coalesced = graph.move_state.iter().filter(|&&s| s == MoveState::Coalesced).count();
    trace!(
        "irc '{}' {}: {} nodes, {} coalesced copies, {} spilled",
        mf.name,
        class.name(),
        graph.vregs.len(),
        coalesced,
        out.spilled.len()
    );
    out
}
