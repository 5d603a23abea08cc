//! An ordered list of procs sharing a cycle clock, and the poly-voice
//! parallel execution built on top of it (§3, §4.7 "poly", §5).

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::concurrency::condvar_pool::{CondvarTaskPool, Task as CondvarTask};
use crate::concurrency::futex_pool::{FutexTaskPool, Task as FutexTask};
use crate::error::{Error, Result};
use crate::proc::{Proc, ProcId};
use crate::value::Value;

/// A named snapshot of variable values applicable to a network (§3
/// "holds presets"), consumed by `preset`/`xfade_ctl`/`poly`.
#[derive(Debug, Clone, Default)]
pub struct Preset {
    pub name: String,
    /// `(proc label, sfx_id, var label, vid) -> value`.
    pub values: Vec<((String, u32, String, u32), Value)>,
}

/// An ordered list of procs. For polyphonic networks it is further linked
/// via [`Network::poly_link`] into a list of voice networks.
pub struct Network {
    procs: Vec<Proc>,
    index_of: HashMap<ProcId, usize>,
    graph: DiGraph<ProcId, ()>,
    node_of: HashMap<ProcId, NodeIndex>,
    order: Vec<ProcId>,
    presets: Vec<Preset>,
    cycle_idx: u64,
    next_id: u32,
    poly_link: Vec<Network>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Network {
            procs: Vec::new(),
            index_of: HashMap::new(),
            graph: DiGraph::new(),
            node_of: HashMap::new(),
            order: Vec::new(),
            presets: Vec::new(),
            cycle_idx: 0,
            next_id: 0,
            poly_link: Vec::new(),
        }
    }

    pub fn alloc_proc_id(&mut self) -> ProcId {
        let id = ProcId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a proc to the network and calls its `create` callback
    /// (single-threaded, during build, §4.5).
    pub fn add_proc(&mut self, mut proc: Proc) -> Result<ProcId> {
        let id = proc.id;
        proc.create(self.cycle_idx)?;
        let node = self.graph.add_node(id);
        self.node_of.insert(id, node);
        self.index_of.insert(id, self.procs.len());
        self.procs.push(proc);
        self.order.clear();
        Ok(id)
    }

    /// Records a data dependency: `from` must `exec` before `to` in every
    /// cycle (§5 "exec ordering between procs follows the network's
    /// topological order").
    pub fn connect(&mut self, from: ProcId, to: ProcId) -> Result<()> {
        let a = *self.node_of.get(&from).ok_or(Error::InvalidId(format!("{from:?}")))?;
        let b = *self.node_of.get(&to).ok_or(Error::InvalidId(format!("{to:?}")))?;
        self.graph.add_edge(a, b, ());
        self.order.clear();
        Ok(())
    }

    pub fn proc(&self, id: ProcId) -> Option<&Proc> {
        self.index_of.get(&id).map(|&i| &self.procs[i])
    }

    pub fn proc_mut(&mut self, id: ProcId) -> Option<&mut Proc> {
        self.index_of.get(&id).map(|&i| &mut self.procs[i])
    }

    pub fn add_preset(&mut self, preset: Preset) {
        self.presets.push(preset);
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Applies a preset by writing each named value through the addressed
    /// proc's variable registry, triggering `notify` as an ordinary write
    /// would.
    pub fn apply_preset(&mut self, name: &str) -> Result<()> {
        let preset = self
            .preset(name)
            .cloned_for_apply()
            .ok_or_else(|| Error::ElementNotFound(format!("preset {name}")))?;
        for ((label, sfx_id, var_label, vid), value) in preset.values {
            if let Some(p) = self.procs.iter_mut().find(|p| p.label == label && p.sfx_id == sfx_id) {
                if let Some(var) = p.vars.get_mut(&var_label, sfx_id, vid) {
                    var.set(crate::variable::Channel::Any, value)?;
                }
            }
        }
        Ok(())
    }

    fn topo_order(&mut self) -> Result<&[ProcId]> {
        if self.order.is_empty() && !self.procs.is_empty() {
            let sorted = toposort(&self.graph, None)
                .map_err(|_| Error::InvalidState("proc graph has a cycle".into()))?;
            self.order = sorted.into_iter().map(|n| self.graph[n]).collect();
        }
        Ok(&self.order)
    }

    /// Runs one network cycle: `exec` in topological order. A proc
    /// returning [`Error::EndOfFile`] is marked finished and excluded from
    /// future cycles; once every proc has finished the whole network
    /// reports `EndOfFile` (§4.5, §7).
    pub fn exec_cycle(&mut self) -> Result<()> {
        self.cycle_idx += 1;
        let cycle_idx = self.cycle_idx;
        self.topo_order()?;
        let order = self.order.clone();
        let mut all_finished = true;
        for id in order {
            let idx = self.index_of[&id];
            if self.procs[idx].finished {
                continue;
            }
            all_finished = false;
            match self.procs[idx].exec(cycle_idx) {
                Ok(()) => {}
                Err(Error::EndOfFile) => {
                    self.procs[idx].finished = true;
                }
                Err(e) => {
                    let ctx = crate::error::ErrorContext::for_proc(
                        self.procs[idx].label.clone(),
                        self.procs[idx].sfx_id,
                    );
                    crate::error::log_recoverable(&ctx, &e);
                }
            }
        }
        if all_finished {
            return Err(Error::EndOfFile);
        }
        Ok(())
    }

    pub fn cycle_idx(&self) -> u64 {
        self.cycle_idx
    }

    /// Tears down every proc in reverse creation order (§3 lifecycle,
    /// §5 memory ownership).
    pub fn teardown(&mut self) {
        let cycle_idx = self.cycle_idx;
        for proc in self.procs.iter_mut().rev() {
            proc.destroy(cycle_idx);
        }
    }

    /// Links `voices` as this network's polyphonic subnets (`poly_link`,
    /// §3).
    pub fn poly_link(&mut self, voices: Vec<Network>) {
        self.poly_link = voices;
    }

    pub fn poly_voices(&self) -> &[Network] {
        &self.poly_link
    }

    pub fn poly_voices_mut(&mut self) -> &mut [Network] {
        &mut self.poly_link
    }
}

trait ClonedForApply {
    fn cloned_for_apply(self) -> Option<Preset>;
}

impl ClonedForApply for Option<&Preset> {
    fn cloned_for_apply(self) -> Option<Preset> {
        self.cloned()
    }
}

/// Flavour of worker pool backing parallel poly-voice execution (§4.6
/// "poly").
pub enum VoicePool {
    Futex(FutexTaskPool),
    Condvar(CondvarTaskPool),
}

impl VoicePool {
    pub fn new_futex(worker_n: usize) -> Self {
        VoicePool::Futex(FutexTaskPool::create(worker_n, &[]))
    }

    pub fn new_condvar(worker_n: usize) -> Self {
        VoicePool::Condvar(CondvarTaskPool::create(worker_n, &[]))
    }
}

/// Runs every voice's `exec_cycle` once. When `pool` is `None` the voices
/// run serially on the caller's thread; otherwise each voice's cycle is
/// submitted as one independent task. Worker `i` only ever touches voice
/// `i`'s procs and variables (§5 "isolated").
///
/// A per-voice `Err(Error::EndOfFile)` is swallowed here (an individual
/// voice finishing early is normal); the caller inspects
/// `Network::poly_voices()` afterward if it needs to know which voices are
/// done.
pub fn run_poly_voices(voices: &mut [Network], pool: Option<&VoicePool>, timeout: std::time::Duration) -> Result<()> {
    match pool {
        None => {
            for v in voices.iter_mut() {
                match v.exec_cycle() {
                    Ok(()) | Err(Error::EndOfFile) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
        Some(VoicePool::Futex(pool)) => {
            let tasks: Vec<FutexTask> = voices
                .iter_mut()
                .map(|v| {
                    // SAFETY: `run` blocks until every task has returned
                    // before this function returns, so the raw pointer
                    // never outlives the borrow of `voices` it is derived
                    // from.
                    let ptr: *mut Network = v;
                    let wrapped = SendPtr(ptr);
                    Box::new(move || {
                        let wrapped = wrapped;
                        let v = unsafe { &mut *wrapped.0 };
                        let _ = v.exec_cycle();
                    }) as FutexTask
                })
                .collect();
            pool.run(tasks, timeout)
        }
        Some(VoicePool::Condvar(pool)) => {
            let tasks: Vec<CondvarTask> = voices
                .iter_mut()
                .map(|v| {
                    let ptr: *mut Network = v;
                    let wrapped = SendPtr(ptr);
                    Box::new(move || {
                        let wrapped = wrapped;
                        let v = unsafe { &mut *wrapped.0 };
                        let _ = v.exec_cycle();
                    }) as CondvarTask
                })
                .collect();
            pool.run(tasks, timeout)
        }
    }
}

#[derive(Clone, Copy)]
struct SendPtr(*mut Network);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{ClassMembers, ProcCtx};

    struct CountingClass {
        limit: u32,
        count: u32,
    }

    impl ClassMembers for CountingClass {
        fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
            Ok(())
        }

        fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
            self.count += 1;
            if self.count >= self.limit {
                Err(Error::EndOfFile)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn exec_cycle_reports_end_of_file_once_all_procs_finish() {
        let mut net = Network::new();
        let id = net.alloc_proc_id();
        net.add_proc(Proc::new(id, "counter", 0, Box::new(CountingClass { limit: 3, count: 0 })))
            .unwrap();
        assert!(net.exec_cycle().is_ok());
        assert!(net.exec_cycle().is_ok());
        assert!(matches!(net.exec_cycle(), Err(Error::EndOfFile)));
    }

    #[test]
    fn topological_order_respects_connections() {
        let mut net = Network::new();
        let a = net.alloc_proc_id();
        let b = net.alloc_proc_id();
        net.add_proc(Proc::new(a, "a", 0, Box::new(CountingClass { limit: 100, count: 0 }))).unwrap();
        net.add_proc(Proc::new(b, "b", 0, Box::new(CountingClass { limit: 100, count: 0 }))).unwrap();
        net.connect(b, a).unwrap();
        let order = net.topo_order().unwrap().to_vec();
        let pos_a = order.iter().position(|&x| x == a).unwrap();
        let pos_b = order.iter().position(|&x| x == b).unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn poly_voices_run_serially_without_a_pool() {
        let mut voices: Vec<Network> = (0..3)
            .map(|_| {
                let mut v = Network::new();
                let id = v.alloc_proc_id();
                v.add_proc(Proc::new(id, "v", 0, Box::new(CountingClass { limit: 2, count: 0 }))).unwrap();
                v
            })
            .collect();
        run_poly_voices(&mut voices, None, std::time::Duration::from_secs(1)).unwrap();
        for v in &voices {
            assert_eq!(v.cycle_idx(), 1);
        }
    }
}
