//! Workgroup scheduling and barrier rendezvous.
//!
//! Invocations of a workgroup share the workgroup-space allocations and
//! are stepped one at a time. The runnable invocation with the lowest
//! (z, y, x) local id steps next, so execution is deterministic. An
//! invocation that reaches a barrier leaves the runnable set; once every
//! runnable invocation has arrived, the barrier is checked for uniformity
//! and released.

use crate::ast::FuncId;
use crate::error::Result;
use crate::invocation::{Invocation, State, UVec3};
use crate::memory::Memory;
use crate::types::AddressSpace;
use crate::bail_runtime_at;
use crate::executor::ExecCtx;
use std::collections::{BTreeMap, HashMap};

pub struct Workgroup {
    group_id: UVec3,
    invocations: Vec<Invocation>,
    /// Runnable invocations keyed by (z, y, x) local id.
    ready: BTreeMap<(u32, u32, u32), usize>,
    /// Invocations suspended at a barrier.
    waiting: Vec<usize>,
}

impl Workgroup {
    /// Allocates the workgroup-space variables and creates one invocation
    /// per point of the workgroup grid. Workgroup memory starts zeroed.
    pub fn new(
        ctx: &mut ExecCtx,
        entry: FuncId,
        group_id: UVec3,
        workgroup_size: UVec3,
        num_workgroups: UVec3,
    ) -> Result<Workgroup> {
        let module = ctx.module.clone();

        let mut shared = HashMap::new();
        for (id, g) in module.globals.iter() {
            if g.space != AddressSpace::Workgroup || !ctx.referenced.contains(&id) {
                continue;
            }
            let size = ctx.allocation_size(g.ty)?;
            let memory = Memory::new_shared(size);
            let view =
                ctx.views.create_root(memory, AddressSpace::Workgroup, g.ty, 0, size, g.source);
            shared.insert(id, view);
        }

        let mut invocations = Vec::new();
        let mut ready = BTreeMap::new();
        for z in 0..workgroup_size.z {
            for y in 0..workgroup_size.y {
                for x in 0..workgroup_size.x {
                    let local_id = UVec3::new(x, y, z);
                    let invocation = Invocation::new(
                        ctx,
                        entry,
                        group_id,
                        local_id,
                        workgroup_size,
                        num_workgroups,
                        &shared,
                    )?;
                    ready.insert((z, y, x), invocations.len());
                    invocations.push(invocation);
                }
            }
        }

        Ok(Workgroup { group_id, invocations, ready, waiting: Vec::new() })
    }

    pub fn group_id(&self) -> UVec3 {
        self.group_id
    }

    pub fn is_finished(&self) -> bool {
        self.ready.is_empty() && self.waiting.is_empty()
    }

    /// Performs one unit of work: steps the lowest runnable invocation,
    /// or releases a barrier once every runnable invocation has arrived
    /// at one.
    pub fn step(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        let Some((&key, &index)) = self.ready.iter().next() else {
            return self.release_barrier(ctx);
        };
        let invocation = &mut self.invocations[index];
        let local_id = invocation.local_id;
        ctx.current_invocation = Some((self.group_id, local_id));
        ctx.notify_pre_step(self.group_id, local_id);
        let result = invocation.step(ctx);
        ctx.notify_post_step(self.group_id, local_id);
        result?;
        match self.invocations[index].state() {
            State::Ready => {}
            State::Barrier => {
                self.ready.remove(&key);
                self.waiting.push(index);
            }
            State::Finished => {
                self.ready.remove(&key);
            }
        }
        Ok(())
    }

    /// Every runnable invocation is suspended. The barrier is uniform only
    /// if the whole workgroup arrived at the same call site; otherwise some
    /// invocations returned early or diverged, which has no defined
    /// behavior on a GPU.
    fn release_barrier(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        if self.waiting.is_empty() {
            return Ok(());
        }
        let module = ctx.module.clone();
        let first = self.invocations[self.waiting[0]]
            .barrier()
            .ok_or_else(|| crate::error::ExecError::RuntimeError(
                "waiting invocation lost its barrier".to_string(),
                None,
            ))?;
        let source = module.exprs[first].source;
        if self.waiting.len() != self.invocations.len() {
            bail_runtime_at!(
                source,
                "barrier was not reached by all invocations in the workgroup ({} of {} arrived)",
                self.waiting.len(),
                self.invocations.len()
            );
        }
        let at_first =
            self.waiting.iter().filter(|&&i| self.invocations[i].barrier() == Some(first)).count();
        if at_first != self.waiting.len() {
            bail_runtime_at!(
                source,
                "invocations arrived at different barriers ({} of {} at the first)",
                at_first,
                self.waiting.len()
            );
        }
        for index in std::mem::take(&mut self.waiting) {
            let invocation = &mut self.invocations[index];
            let local_id = invocation.local_id;
            ctx.current_invocation = Some((self.group_id, local_id));
            ctx.notify_barrier(self.group_id, local_id);
            invocation.clear_barrier(ctx)?;
            self.ready.insert((local_id.z, local_id.y, local_id.x), index);
        }
        Ok(())
    }

    /// The invocation at `local_id`, for the debugging API.
    pub fn invocation(&self, local_id: UVec3) -> Option<&Invocation> {
        self.invocations.iter().find(|inv| inv.local_id == local_id)
    }

    pub fn invocation_mut(&mut self, local_id: UVec3) -> Option<&mut Invocation> {
        self.invocations.iter_mut().find(|inv| inv.local_id == local_id)
    }
}
