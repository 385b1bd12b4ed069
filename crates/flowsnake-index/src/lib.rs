//! Spatial binning for chase-target queries.
//!
//! A [`SlotGrid`] tiles the normalized [0,1) plane with a uniform bin
//! lattice sized from the active population, but only materializes one
//! rectangular sub-group of that lattice per rebuild (the "memory-backed
//! window"). Rebuilds rotate round-robin through `splits * splits`
//! sub-groups, so a full grid refresh is amortized over `splits^2` frames.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel marking an empty bin slot. Doubles as the largest node index
/// plus one, so populations must stay below `u16::MAX`.
pub const EMPTY_SLOT: u16 = u16::MAX;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Pixel-space inputs the binner needs to size its lattice for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Working screen width in pixels.
    pub screen_width: u32,
    /// Working screen height in pixels.
    pub screen_height: u32,
    /// Number of nodes still eligible as chase targets.
    pub active_count: usize,
}

/// Bookkeeping from one rebuild pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStats {
    /// Nodes successfully placed into a bin slot.
    pub inserted: usize,
    /// Nodes dropped because their bin had no free slot left.
    pub dropped: usize,
    /// Nodes skipped because their bin lies outside the backed window.
    pub skipped_outside: usize,
    /// Number of bins materialized this pass.
    pub window_bins: usize,
    /// Slot capacity per bin this pass.
    pub slots_per_bin: usize,
}

/// Result of a windowed nearest-target search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Closest valid candidate by Manhattan distance.
    Found(u16),
    /// The querying node's bin is not memory-backed this frame; the caller
    /// keeps its previous target.
    OutsideWindow,
    /// The whole backed window held no valid candidate.
    NoCandidate,
}

/// Common behaviour exposed by chase-target indices.
pub trait TargetIndex {
    /// Rebuild the backed window from node positions, binning every node
    /// the `chaseable` predicate accepts.
    fn rebuild(
        &mut self,
        frame: &FrameGeometry,
        positions: &[(f32, f32)],
        chaseable: &dyn Fn(usize) -> bool,
    ) -> Result<RebuildStats, IndexError>;

    /// Locate the nearest candidate to `node` that `is_valid` accepts.
    fn find_nearest(
        &self,
        node: usize,
        positions: &[(f32, f32)],
        is_valid: &mut dyn FnMut(usize) -> bool,
    ) -> SearchOutcome;
}

/// Half-open bin range in lattice coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Window {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl Window {
    fn contains(&self, bx: i32, by: i32) -> bool {
        bx >= self.x0 && bx < self.x1 && by >= self.y0 && by < self.y1
    }

    fn bins(&self) -> usize {
        ((self.x1 - self.x0).max(0) as usize) * ((self.y1 - self.y0).max(0) as usize)
    }
}

/// Uniform bin lattice with a rotating memory-backed window.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    slot_budget: usize,
    splits: u32,
    cursor: u32,
    // Lattice geometry, refreshed on every rebuild.
    interior_x: i32,
    interior_y: i32,
    lattice_x: i32,
    lattice_y: i32,
    window: Window,
    slots_per_bin: usize,
    slots: Vec<u16>,
}

impl SlotGrid {
    /// Create a grid with a total slot budget shared by the backed bins and
    /// a `splits * splits` partial-update schedule.
    pub fn new(slot_budget: usize, splits: u32) -> Result<Self, IndexError> {
        if slot_budget == 0 {
            return Err(IndexError::InvalidConfig("slot_budget must be non-zero"));
        }
        if splits == 0 {
            return Err(IndexError::InvalidConfig("splits must be non-zero"));
        }
        Ok(Self {
            slot_budget,
            splits,
            cursor: 0,
            interior_x: 0,
            interior_y: 0,
            lattice_x: 0,
            lattice_y: 0,
            window: Window::default(),
            slots_per_bin: 0,
            slots: Vec::new(),
        })
    }

    /// Lattice bin holding a normalized position. The one-bin border ring
    /// shifts interior coordinates by one.
    fn lattice_bin(&self, x: f32, y: f32) -> (i32, i32) {
        let bx = ((x * self.interior_x as f32).floor() as i32).clamp(0, self.interior_x - 1);
        let by = ((y * self.interior_y as f32).floor() as i32).clamp(0, self.interior_y - 1);
        (bx + 1, by + 1)
    }

    fn slot_range(&self, bx: i32, by: i32) -> std::ops::Range<usize> {
        debug_assert!(self.window.contains(bx, by));
        let width = (self.window.x1 - self.window.x0) as usize;
        let local = (by - self.window.y0) as usize * width + (bx - self.window.x0) as usize;
        let start = local * self.slots_per_bin;
        start..start + self.slots_per_bin
    }

    /// Node indices currently stored in a backed bin, in insertion order.
    pub fn bin_nodes(&self, bx: i32, by: i32) -> &[u16] {
        if !self.window.contains(bx, by) {
            return &[];
        }
        let range = self.slot_range(bx, by);
        let slots = &self.slots[range];
        let filled = slots.iter().position(|&s| s == EMPTY_SLOT).unwrap_or(slots.len());
        &slots[..filled]
    }

    /// Whether a bin sits on the outer ring of the backed window. Boundary
    /// bins keep edge lookups correct but their own contents may be
    /// incomplete once the window rotates.
    pub fn is_boundary_bin(&self, bx: i32, by: i32) -> bool {
        self.window.contains(bx, by)
            && (bx == self.window.x0
                || bx == self.window.x1 - 1
                || by == self.window.y0
                || by == self.window.y1 - 1)
    }

    /// Backed-window extent as `(x0, y0, x1, y1)` in lattice coordinates.
    pub fn window_extent(&self) -> (i32, i32, i32, i32) {
        (self.window.x0, self.window.y0, self.window.x1, self.window.y1)
    }

    /// Interior bin counts per axis (border ring excluded).
    pub fn interior_dims(&self) -> (i32, i32) {
        (self.interior_x, self.interior_y)
    }

    /// Bin coordinates for a position, or `None` while outside the window.
    pub fn backed_bin(&self, x: f32, y: f32) -> Option<(i32, i32)> {
        if self.interior_x == 0 {
            return None;
        }
        let (bx, by) = self.lattice_bin(x, y);
        self.window.contains(bx, by).then_some((bx, by))
    }

    fn scan_square(
        &self,
        center: (i32, i32),
        radius: i32,
        origin: (f32, f32),
        node: usize,
        positions: &[(f32, f32)],
        is_valid: &mut dyn FnMut(usize) -> bool,
    ) -> Option<(u16, OrderedFloat<f32>)> {
        let x_lo = (center.0 - radius).max(self.window.x0);
        let x_hi = (center.0 + radius).min(self.window.x1 - 1);
        let y_lo = (center.1 - radius).max(self.window.y0);
        let y_hi = (center.1 + radius).min(self.window.y1 - 1);

        let mut best: Option<(u16, OrderedFloat<f32>)> = None;
        for by in y_lo..=y_hi {
            for bx in x_lo..=x_hi {
                for &slot in self.bin_nodes(bx, by) {
                    let candidate = slot as usize;
                    if candidate == node || !is_valid(candidate) {
                        continue;
                    }
                    let (cx, cy) = positions[candidate];
                    let dist =
                        OrderedFloat((cx - origin.0).abs() + (cy - origin.1).abs());
                    if best.is_none_or(|(_, d)| dist < d) {
                        best = Some((slot, dist));
                    }
                }
            }
        }
        best
    }
}

impl TargetIndex for SlotGrid {
    fn rebuild(
        &mut self,
        frame: &FrameGeometry,
        positions: &[(f32, f32)],
        chaseable: &dyn Fn(usize) -> bool,
    ) -> Result<RebuildStats, IndexError> {
        if frame.screen_width == 0 || frame.screen_height == 0 {
            return Err(IndexError::InvalidConfig(
                "screen dimensions must be non-zero",
            ));
        }
        if positions.len() >= EMPTY_SLOT as usize {
            return Err(IndexError::InvalidConfig(
                "node count must fit below the u16 slot sentinel",
            ));
        }

        // One bin per active node on average; flooring the per-axis count
        // keeps each bin at least as large as the estimate.
        let active = frame.active_count.max(1);
        let pixels = (frame.screen_width as f32) * (frame.screen_height as f32);
        let edge_px = (pixels / active as f32).sqrt();
        self.interior_x = ((frame.screen_width as f32 / edge_px).floor() as i32).max(1);
        self.interior_y = ((frame.screen_height as f32 / edge_px).floor() as i32).max(1);
        self.lattice_x = self.interior_x + 2;
        self.lattice_y = self.interior_y + 2;

        // Pick this frame's sub-group, then expand by one boundary ring.
        let splits = self.splits as i32;
        let group = self.cursor as i32;
        self.cursor = (self.cursor + 1) % (self.splits * self.splits);
        let group_w = (self.lattice_x as u32).div_ceil(splits as u32) as i32;
        let group_h = (self.lattice_y as u32).div_ceil(splits as u32) as i32;
        let sx = group % splits;
        let sy = group / splits;
        self.window = Window {
            x0: (sx * group_w - 1).max(0),
            y0: (sy * group_h - 1).max(0),
            x1: (((sx + 1) * group_w) + 1).min(self.lattice_x),
            y1: (((sy + 1) * group_h) + 1).min(self.lattice_y),
        };

        let window_bins = self.window.bins();
        self.slots_per_bin = (self.slot_budget / window_bins.max(1)).max(1);
        self.slots.clear();
        self.slots.resize(window_bins * self.slots_per_bin, EMPTY_SLOT);

        let mut stats = RebuildStats {
            window_bins,
            slots_per_bin: self.slots_per_bin,
            ..RebuildStats::default()
        };
        for (node, &(x, y)) in positions.iter().enumerate() {
            if !chaseable(node) {
                continue;
            }
            let (bx, by) = self.lattice_bin(x, y);
            if !self.window.contains(bx, by) {
                stats.skipped_outside += 1;
                continue;
            }
            let range = self.slot_range(bx, by);
            match self.slots[range].iter_mut().find(|s| **s == EMPTY_SLOT) {
                Some(slot) => {
                    *slot = node as u16;
                    stats.inserted += 1;
                }
                // Full bin: the node simply isn't chaseable via the grid
                // this cycle. Tolerated degradation, not an error.
                None => stats.dropped += 1,
            }
        }
        Ok(stats)
    }

    fn find_nearest(
        &self,
        node: usize,
        positions: &[(f32, f32)],
        is_valid: &mut dyn FnMut(usize) -> bool,
    ) -> SearchOutcome {
        let origin = positions[node];
        let Some(center) = self.backed_bin(origin.0, origin.1) else {
            return SearchOutcome::OutsideWindow;
        };

        let mut radius = 1;
        loop {
            if let Some((found, _)) =
                self.scan_square(center, radius, origin, node, positions, is_valid)
            {
                return SearchOutcome::Found(found);
            }
            // Stop once the clamped square covers the entire window.
            let covered = center.0 - radius <= self.window.x0
                && center.0 + radius >= self.window.x1 - 1
                && center.1 - radius <= self.window.y0
                && center.1 + radius >= self.window.y1 - 1;
            if covered {
                return SearchOutcome::NoCandidate;
            }
            radius += 1;
        }
    }
}
