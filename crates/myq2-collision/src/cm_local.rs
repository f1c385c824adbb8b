// cm_local.rs — runtime structures of a loaded collision world

use crate::cm_patch::PatchCollide;
use crate::cm_test::AreaPortals;
use crate::config::CmConfig;
use crate::polylib::Winding;
use crate::q_shared::{CPlane, Contents, SurfaceFlags, Vec3};
use parking_lot::Mutex;

// ============================================================
// Handles and constants
// ============================================================

/// Index of a sub-model, or one of the temp model handles.
pub type ClipHandle = i32;

pub const MAX_SUBMODELS: usize = 256;
pub const BOX_MODEL_HANDLE: ClipHandle = 255;
pub const CAPSULE_MODEL_HANDLE: ClipHandle = 254;

/// Keep 1/8 unit away from surfaces so the next trace starts outside.
pub const SURFACE_CLIP_EPSILON: f32 = 0.125;

/// Slack added to capsule radii when testing capsule-vs-capsule.
pub const RADIUS_EPSILON: f32 = 1.0;

/// Box leaf bounds used by the position test grow by this much.
pub const BOX_LEAF_EPSILON: f32 = 1.0;

// ============================================================
// Tree
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct CNode {
    pub plane: usize,
    /// Negative numbers are leafs: -(leafnum) - 1.
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CLeaf {
    pub cluster: i32,
    pub area: i32,
    pub first_leaf_brush: usize,
    pub num_leaf_brushes: usize,
    pub first_leaf_surface: usize,
    pub num_leaf_surfaces: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    /// Submodels don't reference the main tree.
    pub leaf: CLeaf,
}

// ============================================================
// Brushes and patches
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct CBrushSide {
    pub plane: usize,
    pub surface_flags: SurfaceFlags,
    pub shader_num: i32,
    /// The face polygon; empty when the side is fully clipped away.
    pub winding: Winding,
}

#[derive(Debug, Clone, Default)]
pub struct CBrush {
    pub shader_num: i32,
    pub contents: Contents,
    pub bounds: [Vec3; 2],
    pub first_side: usize,
    pub num_sides: usize,
    /// Unique edges of the side windings.
    pub edges: Vec<[Vec3; 2]>,
}

impl CBrush {
    pub fn side_range(&self) -> std::ops::Range<usize> {
        self.first_side..self.first_side + self.num_sides
    }
}

#[derive(Debug, Clone)]
pub struct CPatch {
    pub contents: Contents,
    pub surface_flags: SurfaceFlags,
    pub pc: PatchCollide,
}

/// Bounds last handed to `temp_box_model`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TempBox {
    pub mins: Vec3,
    pub maxs: Vec3,
}

// ============================================================
// The world
// ============================================================

/// A loaded map. Geometry is read-only; only the portal state behind
/// its lock and the temp box change after load.
#[derive(Debug, Default)]
pub struct ClipMap {
    pub name: String,
    pub checksum: u32,
    pub config: CmConfig,

    pub planes: Vec<CPlane>,
    pub nodes: Vec<CNode>,
    pub leafs: Vec<CLeaf>,
    pub leaf_brushes: Vec<usize>,
    pub leaf_surfaces: Vec<usize>,
    pub cmodels: Vec<CModel>,
    pub brushes: Vec<CBrush>,
    pub brush_sides: Vec<CBrushSide>,
    /// Indexed by draw surface; only patches collide.
    pub surfaces: Vec<Option<CPatch>>,

    pub num_clusters: usize,
    pub cluster_bytes: usize,
    pub visibility: Vec<u8>,
    pub vised: bool,

    pub num_areas: usize,
    pub portals: Mutex<AreaPortals>,

    pub entity_string: String,

    pub temp_box: TempBox,
}

impl ClipMap {
    /// The world used before any map is loaded: one empty leaf, one
    /// cluster, one area and an empty world model.
    pub fn empty() -> Self {
        Self {
            leafs: vec![CLeaf::default()],
            cmodels: vec![CModel::default()],
            num_clusters: 1,
            cluster_bytes: 1,
            num_areas: 1,
            portals: Mutex::new(AreaPortals::new(1)),
            ..Default::default()
        }
    }

    pub fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    pub fn num_inline_models(&self) -> usize {
        self.cmodels.len()
    }
}

// ============================================================
// Per-query dedupe
// ============================================================

/// Bitset marking brushes or patches already tested during one query.
#[derive(Debug, Clone, Default)]
pub struct VisitSet {
    bits: Vec<u64>,
}

impl VisitSet {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
        }
    }

    /// Returns true the first time `index` is seen.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index >> 6;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << (index & 63);
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }
}
