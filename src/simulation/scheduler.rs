//! Phase scheduling.
//!
//! Grid writes are partitioned by spatial ownership instead of locks: particles are
//! binned into blocks of `BLOCK_SIZE x BLOCK_SIZE` cells (by the lower-left node of
//! their stencil) and blocks are coloured by `(bx mod 2) + 2 (by mod 2)`. A stencil
//! spans at most two neighbouring blocks per axis, so blocks of one colour never
//! write the same node and can run in parallel. Colours run one after another.

use rayon::prelude::*;
use tracing::{trace, trace_span, Span};

use crate::{
    background_grid::GridWindow, counters::PerformanceCounters, floating_type_mod::FT, kernels::STENCIL_WIDTH, V2,
};

pub const BLOCK_SIZE: usize = 4;

const NUM_COLOURS: usize = 4;

const _: () = assert!(STENCIL_WIDTH <= BLOCK_SIZE + 1);

/// The phases of a substep. Every phase completes on all workers before the next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Scatter,
    Solve,
    Gather,
    MaterialUpdate,
    Advect,
    CollisionResolve,
    TriggerEvaluate,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Scatter => "scatter",
            Phase::Solve => "solve",
            Phase::Gather => "gather",
            Phase::MaterialUpdate => "material-update",
            Phase::Advect => "advect",
            Phase::CollisionResolve => "collision-resolve",
            Phase::TriggerEvaluate => "trigger-evaluate",
        }
    }

    fn span(self) -> Span {
        match self {
            Phase::Scatter => trace_span!("scatter"),
            Phase::Solve => trace_span!("solve"),
            Phase::Gather => trace_span!("gather"),
            Phase::MaterialUpdate => trace_span!("material_update"),
            Phase::Advect => trace_span!("advect"),
            Phase::CollisionResolve => trace_span!("collision_resolve"),
            Phase::TriggerEvaluate => trace_span!("trigger_evaluate"),
        }
    }
}

pub struct Scheduler {
    pcounters: PerformanceCounters,

    /// particle indices per block, row-major over the grid window
    block_particles: Vec<Vec<usize>>,

    /// non-empty block indices of every colour
    colour_blocks: [Vec<usize>; NUM_COLOURS],

    /// particles whose stencil is not fully inside the window; processed serially
    serial_particles: Vec<usize>,
}

impl Scheduler {
    pub fn new(statistics_enabled: bool) -> Scheduler {
        Scheduler {
            pcounters: PerformanceCounters::new(statistics_enabled),
            block_particles: Vec::new(),
            colour_blocks: Default::default(),
            serial_particles: Vec::new(),
        }
    }

    pub fn pcounters(&self) -> &PerformanceCounters {
        &self.pcounters
    }

    pub fn pcounters_mut(&mut self) -> &mut PerformanceCounters {
        &mut self.pcounters
    }

    /// Runs one phase inside its tracing span and timer.
    pub fn run_phase<R>(&mut self, phase: Phase, f: impl FnOnce(&Scheduler) -> R) -> R {
        let span = phase.span();
        let _enter = span.enter();
        trace!("begin {}", phase.name());

        self.pcounters.begin(phase.name());
        let result = f(self);
        self.pcounters.end(phase.name());
        result
    }

    /// Bins the particles selected by `participates` into coloured blocks of `window`.
    pub fn partition(
        &mut self,
        window: &GridWindow,
        inv_dx: FT,
        positions: &[V2],
        participates: impl Fn(usize) -> bool,
    ) {
        let num_blocks_x = (window.dims.x + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let num_blocks_y = (window.dims.y + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let num_blocks = num_blocks_x * num_blocks_y;

        self.block_particles.resize_with(num_blocks, Vec::new);
        self.block_particles.truncate(num_blocks);
        for block in &mut self.block_particles {
            block.clear();
        }
        for colour in &mut self.colour_blocks {
            colour.clear();
        }
        self.serial_particles.clear();

        let last_base = window.dims.map(|d| d as i32 - STENCIL_WIDTH as i32);

        for (i, x) in positions.iter().enumerate() {
            if !participates(i) {
                continue;
            }
            let base = x.map(|c| (c * inv_dx - 0.5).floor() as i32) - window.origin_cell;
            if base.x < 0 || base.y < 0 || base.x > last_base.x || base.y > last_base.y {
                self.serial_particles.push(i);
                continue;
            }
            let bx = base.x as usize / BLOCK_SIZE;
            let by = base.y as usize / BLOCK_SIZE;
            self.block_particles[by * num_blocks_x + bx].push(i);
        }

        for by in 0..num_blocks_y {
            for bx in 0..num_blocks_x {
                let block = by * num_blocks_x + bx;
                if !self.block_particles[block].is_empty() {
                    self.colour_blocks[(bx % 2) + 2 * (by % 2)].push(block);
                }
            }
        }
    }

    /// Calls `f` for every block, colour by colour. Blocks of one colour run in parallel.
    pub fn for_each_block(&self, f: impl Fn(&[usize]) + Send + Sync) {
        for colour in &self.colour_blocks {
            colour.par_iter().for_each(|&block| f(&self.block_particles[block]));
        }
    }

    /// Particles that could not be assigned to a block.
    pub fn serial_particles(&self) -> &[usize] {
        &self.serial_particles
    }

    pub fn num_partitioned(&self) -> usize {
        self.block_particles.iter().map(|b| b.len()).sum::<usize>() + self.serial_particles.len()
    }
}
