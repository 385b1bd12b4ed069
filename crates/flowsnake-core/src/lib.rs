//! Core types and simulation loop for the Flow Snake particle chase.
//!
//! Thousands of nodes roam the normalized [0,1) plane, each chasing its
//! nearest eligible neighbor. On contact the chaser merges into a visible
//! parent chain and its target leaves the pool of chaseable nodes. When a
//! single active node remains, a timed explosion scatters everything and a
//! fresh epoch begins.

use flowsnake_index::{
    FrameGeometry, IndexError, RebuildStats, SearchOutcome, SlotGrid, TargetIndex,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Hard population ceiling; target indices must fit 14 bits in the packed
/// legacy layout, and stay below the `u16` slot sentinel here.
pub const MAX_NODES: usize = 16_384;

/// Sentinel for "no target resolved yet".
pub const NO_TARGET: u16 = u16::MAX;

/// Largest f32 strictly below 1.0. Position writes saturate to
/// `[0.0, COORD_MAX]`, keeping every node inside the normalized plane.
pub const COORD_MAX: f32 = 0.999_999_94;

/// Monotonic frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Frame(pub u64);

impl Frame {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Node position in normalized [0,1) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance, the metric the neighbor search ranks by.
    #[must_use]
    pub fn manhattan(self, other: Self) -> f32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    fn saturated(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, COORD_MAX),
            y: y.clamp(0.0, COORD_MAX),
        }
    }
}

/// Linear-congruential source of uniform floats in [0,1).
///
/// Matches the reference generator bit for bit: `seed = seed*214013 +
/// 2531011`, output = bits 16..31 scaled by 32767. Deterministic per seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcgRand {
    seed: u32,
}

impl LcgRand {
    pub const DEFAULT_SEED: u32 = 123_456_789;

    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Next uniform float in [0,1).
    pub fn next_unit(&mut self) -> f32 {
        self.seed = self.seed.wrapping_mul(214_013).wrapping_add(2_531_011);
        ((self.seed >> 16) & 0x7FFF) as f32 / 32_767.0
    }

    /// Next uniform float in [-1,1).
    pub fn next_signed(&mut self) -> f32 {
        self.next_unit() * 2.0 - 1.0
    }
}

impl Default for LcgRand {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

/// Errors surfaced while building a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Propagated spatial index configuration failure.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Static configuration for a Flow Snake run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnakeConfig {
    /// Fixed node population per epoch.
    pub node_count: usize,
    /// Working screen width in pixels (bin sizing only).
    pub screen_width: u32,
    /// Working screen height in pixels (bin sizing only).
    pub screen_height: u32,
    /// Chase speed of free nodes, plane units per second.
    pub seek_speed: f32,
    /// Fixed trailing gap kept by merged chain segments.
    pub tail_gap: f32,
    /// Contact distance at which a chaser chomps its target.
    pub contact_radius: f32,
    /// Per-axis sub-group count for the partial grid refresh.
    pub grid_splits: u32,
    /// Total bin slots shared across the backed window.
    pub slot_budget: usize,
    /// Explosion animation length in seconds.
    pub endgame_duration: f32,
    /// Peak scatter speed at the start of the explosion.
    pub endgame_max_speed: f32,
    /// Entries in the endgame velocity table (cycled by node index).
    pub endgame_table_len: usize,
    /// Frame summaries retained in memory; 0 disables the history.
    pub history_capacity: usize,
    /// Optional LCG seed for reproducible runs.
    pub rng_seed: Option<u32>,
}

impl Default for FlowSnakeConfig {
    fn default() -> Self {
        Self {
            node_count: 16_000,
            screen_width: 1_024,
            screen_height: 768,
            seek_speed: 0.15,
            tail_gap: 0.004,
            contact_radius: 0.003,
            grid_splits: 4,
            slot_budget: 8_192,
            endgame_duration: 5.0,
            endgame_max_speed: 0.25,
            endgame_table_len: 1_024,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl FlowSnakeConfig {
    fn validate(&self) -> Result<(), SimulationError> {
        if self.node_count == 0 || self.node_count > MAX_NODES {
            return Err(SimulationError::InvalidConfig(
                "node_count must be in 1..=16384",
            ));
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(SimulationError::InvalidConfig(
                "screen dimensions must be non-zero",
            ));
        }
        if self.seek_speed <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "seek_speed must be positive",
            ));
        }
        if self.tail_gap < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "tail_gap must be non-negative",
            ));
        }
        if self.contact_radius <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "contact_radius must be positive",
            ));
        }
        if self.grid_splits == 0 {
            return Err(SimulationError::InvalidConfig(
                "grid_splits must be non-zero",
            ));
        }
        if self.slot_budget == 0 {
            return Err(SimulationError::InvalidConfig(
                "slot_budget must be non-zero",
            ));
        }
        if self.endgame_duration <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "endgame_duration must be positive",
            ));
        }
        if self.endgame_max_speed < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "endgame_max_speed must be non-negative",
            ));
        }
        if self.endgame_table_len == 0 {
            return Err(SimulationError::InvalidConfig(
                "endgame_table_len must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured seed, drawing one from entropy if absent.
    fn seeded_rng(&self) -> LcgRand {
        match self.rng_seed {
            Some(seed) => LcgRand::new(seed),
            None => LcgRand::new(rand::random()),
        }
    }
}

/// Column-oriented node storage; each stage traverses one array linearly.
#[derive(Debug, Clone, Default)]
pub struct NodeColumns {
    positions: Vec<Position>,
    targets: Vec<u16>,
    has_parent: Vec<bool>,
    has_child: Vec<bool>,
}

impl NodeColumns {
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            positions: vec![Position::default(); len],
            targets: vec![NO_TARGET; len],
            has_parent: vec![false; len],
            has_child: vec![false; len],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    #[must_use]
    pub fn targets(&self) -> &[u16] {
        &self.targets
    }

    #[must_use]
    pub fn targets_mut(&mut self) -> &mut [u16] {
        &mut self.targets
    }

    #[must_use]
    pub fn has_parent(&self) -> &[bool] {
        &self.has_parent
    }

    #[must_use]
    pub fn has_child(&self) -> &[bool] {
        &self.has_child
    }
}

/// Events emitted by one `update` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEvents {
    pub frame: Frame,
    /// Committed merges this frame.
    pub chomps: usize,
    /// The active count reached 1 and the explosion began.
    pub endgame_started: bool,
    /// The explosion finished and a fresh epoch started.
    pub epoch_rolled: bool,
}

/// Aggregated per-frame statistics retained in the history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame: Frame,
    pub active: usize,
    pub merged: usize,
    pub chomps: usize,
}

/// Explosion state; its velocity table is a dedicated buffer rather than a
/// reinterpretation of the grid's slot storage.
#[derive(Debug, Clone)]
struct Endgame {
    velocities: Vec<(f32, f32)>,
    elapsed: f32,
}

/// Cubic smoothstep on [0,1].
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn is_valid_target(
    has_parent: &[bool],
    has_child: &[bool],
    targets: &[u16],
    candidate: u16,
    node: u16,
) -> bool {
    if candidate == node {
        return false;
    }
    if has_child[candidate as usize] {
        return false;
    }
    // Walk the parent chain upward from the candidate; meeting the querying
    // node means the chain would chase its own tail.
    let mut walk = candidate;
    let mut steps = 0usize;
    while has_parent[walk as usize] {
        walk = targets[walk as usize];
        debug_assert_ne!(walk, NO_TARGET, "merged node lost its attachment");
        if walk == node {
            return false;
        }
        steps += 1;
        if walk == NO_TARGET || steps > targets.len() {
            break;
        }
    }
    true
}

/// The whole simulation as one owned aggregate: node store, spatial grid,
/// random source, and epoch bookkeeping.
#[derive(Debug, Clone)]
pub struct SimulationState {
    config: FlowSnakeConfig,
    frame: Frame,
    epoch: u64,
    rng: LcgRand,
    nodes: NodeColumns,
    grid: SlotGrid,
    active_count: usize,
    endgame: Option<Endgame>,
    last_rebuild: RebuildStats,
    pair_scratch: Vec<(f32, f32)>,
    history: VecDeque<FrameSummary>,
}

impl SimulationState {
    /// Instantiate a simulation with randomized starting positions.
    pub fn new(config: FlowSnakeConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let grid = SlotGrid::new(config.slot_budget, config.grid_splits)?;
        let rng = config.seeded_rng();
        let node_count = config.node_count;
        let history_capacity = config.history_capacity;
        let mut sim = Self {
            config,
            frame: Frame::zero(),
            epoch: 0,
            rng,
            nodes: NodeColumns::with_len(node_count),
            grid,
            active_count: node_count,
            endgame: None,
            last_rebuild: RebuildStats::default(),
            pair_scratch: Vec::with_capacity(node_count),
            history: VecDeque::with_capacity(history_capacity),
        };
        sim.scatter_positions();
        Ok(sim)
    }

    /// Re-randomize every node position from the owned LCG.
    pub fn scatter_positions(&mut self) {
        for position in self.nodes.positions.iter_mut() {
            *position = Position::saturated(self.rng.next_unit(), self.rng.next_unit());
        }
    }

    /// Clears all merge state, starting a new epoch with every node seeking.
    /// Positions persist; the explosion already scattered them.
    pub fn reset_epoch(&mut self) {
        self.nodes.has_parent.fill(false);
        self.nodes.has_child.fill(false);
        self.active_count = self.nodes.len();
        self.epoch += 1;
    }

    /// Advance the simulation by one frame of `delta_seconds` elapsed time.
    /// The sole entry point the render loop calls; calling it twice
    /// simulates two steps.
    pub fn update(&mut self, delta_seconds: f32) -> FrameEvents {
        let delta = delta_seconds.max(0.0);
        let mut events = FrameEvents {
            frame: self.frame.next(),
            ..FrameEvents::default()
        };

        if self.endgame.is_some() {
            events.epoch_rolled = self.stage_endgame(delta);
        } else {
            self.stage_binning();
            self.stage_targeting();
            events.chomps = self.stage_motion(delta);
            if self.active_count == 1 {
                self.begin_endgame();
                events.endgame_started = true;
            }
        }

        self.frame = events.frame;
        self.record_summary(events.chomps);
        events
    }

    /// Update the working pixel dimensions used for bin sizing. Node
    /// positions stay normalized and are not rescaled. Idempotent.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.screen_width = width.max(1);
        self.config.screen_height = height.max(1);
    }

    fn stage_binning(&mut self) {
        self.pair_scratch.clear();
        self.pair_scratch
            .extend(self.nodes.positions.iter().map(|p| (p.x, p.y)));
        let geometry = FrameGeometry {
            screen_width: self.config.screen_width,
            screen_height: self.config.screen_height,
            active_count: self.active_count,
        };
        let chaseable = &self.nodes.has_child;
        if let Ok(stats) =
            self.grid
                .rebuild(&geometry, &self.pair_scratch, &|node| !chaseable[node])
        {
            self.last_rebuild = stats;
        }
    }

    fn stage_targeting(&mut self) {
        for node in 0..self.nodes.len() {
            if self.nodes.has_parent[node] {
                continue;
            }
            let outcome = {
                let has_parent = &self.nodes.has_parent;
                let has_child = &self.nodes.has_child;
                let targets = &self.nodes.targets;
                self.grid
                    .find_nearest(node, &self.pair_scratch, &mut |candidate| {
                        is_valid_target(
                            has_parent,
                            has_child,
                            targets,
                            candidate as u16,
                            node as u16,
                        )
                    })
            };
            match outcome {
                SearchOutcome::Found(target) => self.nodes.targets[node] = target,
                // Not memory-backed this frame; the stale target stands.
                SearchOutcome::OutsideWindow => {}
                SearchOutcome::NoCandidate => {
                    let previous = self.nodes.targets[node];
                    let previous_ok = previous != NO_TARGET
                        && is_valid_target(
                            &self.nodes.has_parent,
                            &self.nodes.has_child,
                            &self.nodes.targets,
                            previous,
                            node as u16,
                        );
                    if !previous_ok
                        && let Some(target) = self.exhaustive_nearest(node)
                    {
                        self.nodes.targets[node] = target;
                    }
                }
            }
        }
    }

    /// O(N) fallback guaranteeing a valid target unless every other node
    /// already carries a child.
    fn exhaustive_nearest(&self, node: usize) -> Option<u16> {
        let origin = self.nodes.positions[node];
        let mut best: Option<(u16, OrderedFloat<f32>)> = None;
        for candidate in 0..self.nodes.len() {
            if !is_valid_target(
                &self.nodes.has_parent,
                &self.nodes.has_child,
                &self.nodes.targets,
                candidate as u16,
                node as u16,
            ) {
                continue;
            }
            let dist = OrderedFloat(origin.manhattan(self.nodes.positions[candidate]));
            if best.is_none_or(|(_, d)| dist < d) {
                best = Some((candidate as u16, dist));
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    fn stage_motion(&mut self, delta: f32) -> usize {
        let mut chomps = 0;
        for node in 0..self.nodes.len() {
            let target = self.nodes.targets[node];
            if target == NO_TARGET {
                continue;
            }
            let target_pos = self.nodes.positions[target as usize];
            let pos = self.nodes.positions[node];
            let dx = target_pos.x - pos.x;
            let dy = target_pos.y - pos.y;
            let dist = (dx * dx + dy * dy).sqrt();

            if self.nodes.has_parent[node] {
                // Attached segments close to a fixed trailing gap behind
                // their attachment point.
                if dist > 0.0 {
                    let gap = self.config.tail_gap / dist;
                    self.nodes.positions[node] =
                        Position::saturated(target_pos.x - dx * gap, target_pos.y - dy * gap);
                }
                continue;
            }

            let mut remaining = dist;
            if dist > 0.0 {
                let step = (self.config.seek_speed * delta).min(dist);
                let scale = step / dist;
                self.nodes.positions[node] =
                    Position::saturated(pos.x + dx * scale, pos.y + dy * scale);
                remaining = dist - step;
            }
            if remaining <= self.config.contact_radius && self.chomp(node, target) {
                chomps += 1;
            }
        }
        chomps
    }

    /// Commit a merge if the target is still claimable. First writer wins;
    /// a losing chaser stays seeking and re-resolves next frame.
    fn chomp(&mut self, node: usize, target: u16) -> bool {
        if !is_valid_target(
            &self.nodes.has_parent,
            &self.nodes.has_child,
            &self.nodes.targets,
            target,
            node as u16,
        ) {
            return false;
        }
        self.nodes.has_parent[node] = true;
        self.nodes.has_child[target as usize] = true;
        self.active_count -= 1;
        true
    }

    fn begin_endgame(&mut self) {
        let speed = self.config.endgame_max_speed;
        let velocities = (0..self.config.endgame_table_len)
            .map(|_| (self.rng.next_signed() * speed, self.rng.next_signed() * speed))
            .collect();
        self.endgame = Some(Endgame {
            velocities,
            elapsed: 0.0,
        });
    }

    /// Advance the explosion; returns true when it expires and a new epoch
    /// begins.
    fn stage_endgame(&mut self, delta: f32) -> bool {
        let Some(endgame) = self.endgame.as_mut() else {
            return false;
        };
        endgame.elapsed += delta;
        let progress = endgame.elapsed / self.config.endgame_duration;
        let weight = 1.0 - smoothstep(progress);
        let table_len = endgame.velocities.len();
        for (node, position) in self.nodes.positions.iter_mut().enumerate() {
            let (vx, vy) = endgame.velocities[node % table_len];
            *position = Position::saturated(
                position.x + vx * weight * delta,
                position.y + vy * weight * delta,
            );
        }
        if endgame.elapsed >= self.config.endgame_duration {
            self.endgame = None;
            self.reset_epoch();
            return true;
        }
        false
    }

    fn record_summary(&mut self, chomps: usize) {
        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(FrameSummary {
            frame: self.frame,
            active: self.active_count,
            merged: self.nodes.len() - self.active_count,
            chomps,
        });
    }

    /// Read-only node positions for the render buffer.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.nodes.positions
    }

    /// Read-only access to the full node store.
    #[must_use]
    pub fn nodes(&self) -> &NodeColumns {
        &self.nodes
    }

    /// Mutable node store access for scenario setup and tooling.
    #[must_use]
    pub fn nodes_mut(&mut self) -> &mut NodeColumns {
        &mut self.nodes
    }

    /// Number of nodes still eligible as chase targets.
    #[must_use]
    pub const fn active_count(&self) -> usize {
        self.active_count
    }

    /// Whether the explosion animation is running.
    #[must_use]
    pub const fn endgame_active(&self) -> bool {
        self.endgame.is_some()
    }

    #[must_use]
    pub const fn frame(&self) -> Frame {
        self.frame
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn config(&self) -> &FlowSnakeConfig {
        &self.config
    }

    /// Spatial grid state as of the latest rebuild.
    #[must_use]
    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    /// Bookkeeping from the latest grid rebuild.
    #[must_use]
    pub const fn last_rebuild(&self) -> RebuildStats {
        self.last_rebuild
    }

    /// Iterate over retained frame summaries.
    pub fn history(&self) -> impl Iterator<Item = &FrameSummary> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(node_count: usize) -> FlowSnakeConfig {
        FlowSnakeConfig {
            node_count,
            grid_splits: 1,
            rng_seed: Some(7),
            ..FlowSnakeConfig::default()
        }
    }

    #[test]
    fn lcg_matches_reference_sequence() {
        let mut rng = LcgRand::default();
        let expected = [
            13_259.0 / 32_767.0,
            26_974.0 / 32_767.0,
            13_551.0 / 32_767.0,
            30_354.0 / 32_767.0,
        ];
        for value in expected {
            assert!((rng.next_unit() - value).abs() < 1e-7);
        }
    }

    #[test]
    fn lcg_is_reproducible_and_in_range() {
        let mut a = LcgRand::new(99);
        let mut b = LcgRand::new(99);
        for _ in 0..1_000 {
            let v = a.next_unit();
            assert_eq!(v, b.next_unit());
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let cases = [
            FlowSnakeConfig {
                node_count: 0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                node_count: MAX_NODES + 1,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                screen_width: 0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                seek_speed: 0.0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                contact_radius: -1.0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                grid_splits: 0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                endgame_duration: 0.0,
                ..FlowSnakeConfig::default()
            },
            FlowSnakeConfig {
                endgame_table_len: 0,
                ..FlowSnakeConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(
                    SimulationState::new(config),
                    Err(SimulationError::InvalidConfig(_))
                ),
                "expected rejection"
            );
        }
    }

    #[test]
    fn construction_scatters_seeded_positions() {
        let sim_a = SimulationState::new(small_config(32)).expect("sim");
        let sim_b = SimulationState::new(small_config(32)).expect("sim");
        assert_eq!(sim_a.positions(), sim_b.positions());
        assert!(
            sim_a
                .positions()
                .iter()
                .all(|p| (0.0..1.0).contains(&p.x) && (0.0..1.0).contains(&p.y))
        );
        assert_eq!(sim_a.active_count(), 32);
    }

    #[test]
    fn free_node_step_is_capped() {
        let mut sim = SimulationState::new(small_config(2)).expect("sim");
        {
            let nodes = sim.nodes_mut();
            nodes.positions_mut()[0] = Position::new(0.1, 0.5);
            nodes.positions_mut()[1] = Position::new(0.9, 0.5);
        }
        let speed = sim.config().seek_speed;
        sim.update(0.1);
        let moved = sim.positions()[0].x - 0.1;
        assert!((moved - speed * 0.1).abs() < 1e-5, "step should equal speed*dt");
    }

    #[test]
    fn chomp_commits_parent_child_link() {
        let mut sim = SimulationState::new(small_config(3)).expect("sim");
        {
            let nodes = sim.nodes_mut();
            nodes.positions_mut()[0] = Position::new(0.500, 0.5);
            nodes.positions_mut()[1] = Position::new(0.501, 0.5);
            nodes.positions_mut()[2] = Position::new(0.9, 0.9);
        }
        let before = sim.active_count();
        let events = sim.update(1.0 / 60.0);
        assert_eq!(events.chomps, 1);
        assert!(sim.nodes().has_parent()[0]);
        assert!(sim.nodes().has_child()[1]);
        assert_eq!(sim.active_count(), before - 1);
    }

    #[test]
    fn contested_target_goes_to_the_lower_index() {
        let mut sim = SimulationState::new(small_config(3)).expect("sim");
        {
            let nodes = sim.nodes_mut();
            nodes.positions_mut()[0] = Position::new(0.499, 0.5);
            nodes.positions_mut()[1] = Position::new(0.501, 0.5);
            nodes.positions_mut()[2] = Position::new(0.500, 0.5);
        }
        sim.update(1.0 / 60.0);
        let nodes = sim.nodes();
        assert!(nodes.has_child()[2], "node 2 should be claimed");
        assert!(nodes.has_parent()[0], "first chaser wins");
        assert!(
            !(nodes.has_parent()[0] && nodes.targets()[0] == 2 && nodes.has_parent()[1] && nodes.targets()[1] == 2),
            "a target is claimable by exactly one chaser"
        );
        assert_eq!(sim.active_count(), 2);
    }

    #[test]
    fn attached_segment_trails_at_fixed_gap() {
        let mut config = small_config(4);
        config.contact_radius = 0.05;
        let mut sim = SimulationState::new(config).expect("sim");
        {
            let nodes = sim.nodes_mut();
            nodes.positions_mut()[0] = Position::new(0.58, 0.5);
            nodes.positions_mut()[1] = Position::new(0.6, 0.5);
            nodes.positions_mut()[2] = Position::new(0.9, 0.5);
            nodes.positions_mut()[3] = Position::new(0.1, 0.1);
        }
        sim.update(1.0 / 60.0);
        assert!(sim.nodes().has_parent()[0]);
        assert_eq!(sim.nodes().targets()[0], 1);
        // Zero-delta step: seekers hold still while attached segments snap
        // to the trailing gap behind their anchor.
        sim.update(0.0);
        let gap = sim.config().tail_gap;
        let anchor = sim.positions()[1];
        let follower = sim.positions()[0];
        let dist = ((anchor.x - follower.x).powi(2) + (anchor.y - follower.y).powi(2)).sqrt();
        assert!((dist - gap).abs() < 1e-5, "trail gap {dist} != {gap}");
    }

    #[test]
    fn resize_keeps_bin_geometry_stable() {
        let mut sim = SimulationState::new(small_config(16)).expect("sim");
        sim.resize(800, 600);
        sim.update(1.0 / 60.0);
        let dims = sim.grid().interior_dims();
        for _ in 0..3 {
            sim.resize(800, 600);
        }
        sim.update(1.0 / 60.0);
        assert_eq!(sim.grid().interior_dims(), dims);
        assert_eq!(sim.config().screen_width, 800);
        assert_eq!(sim.config().screen_height, 600);
    }

    #[test]
    fn negative_delta_is_clamped() {
        let mut sim = SimulationState::new(small_config(4)).expect("sim");
        let before = sim.positions().to_vec();
        sim.update(-1.0);
        assert_eq!(sim.positions(), &before[..]);
    }

    #[test]
    fn smoothstep_is_monotone_on_unit_interval() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(1.0), 1.0);
        assert_eq!(smoothstep(2.0), 1.0);
        let mut last = 0.0;
        for i in 0..=20 {
            let v = smoothstep(i as f32 / 20.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn epoch_reset_clears_merge_state() {
        let mut sim = SimulationState::new(small_config(4)).expect("sim");
        {
            let nodes = sim.nodes_mut();
            nodes.positions_mut()[0] = Position::new(0.500, 0.5);
            nodes.positions_mut()[1] = Position::new(0.501, 0.5);
        }
        sim.update(1.0 / 60.0);
        assert!(sim.active_count() < 4);
        sim.reset_epoch();
        assert_eq!(sim.active_count(), 4);
        assert!(sim.nodes().has_parent().iter().all(|&flag| !flag));
        assert!(sim.nodes().has_child().iter().all(|&flag| !flag));
        assert_eq!(sim.epoch(), 1);
    }

    #[test]
    fn history_ring_is_bounded() {
        let mut config = small_config(4);
        config.history_capacity = 3;
        let mut sim = SimulationState::new(config).expect("sim");
        for _ in 0..10 {
            sim.update(1.0 / 60.0);
        }
        let summaries: Vec<_> = sim.history().collect();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries.last().expect("entry").frame, Frame(10));
    }
}
