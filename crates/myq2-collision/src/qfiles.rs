// qfiles.rs — in-memory BSP lumps handed to the collision model
//
// The map-file reader parses the binary BSP and fills a `BspLumps`.
// Records keep the on-disk layout (signed indices, counts) so the loader
// can validate every reference before building the world.

use crate::q_shared::{Contents, SurfaceFlags, Vec3};

// ============================================================
// Limits
// ============================================================

pub const MAX_MAP_MODELS: usize = 0x400;
pub const MAX_MAP_BRUSHES: usize = 0x8000;
pub const MAX_MAP_ENTSTRING: usize = 0x40000;
pub const MAX_MAP_SHADERS: usize = 0x400;
pub const MAX_MAP_AREAS: usize = 0x100;
pub const MAX_MAP_PLANES: usize = 0x20000;
pub const MAX_MAP_NODES: usize = 0x20000;
pub const MAX_MAP_BRUSHSIDES: usize = 0x20000;
pub const MAX_MAP_LEAFS: usize = 0x20000;
pub const MAX_MAP_LEAFFACES: usize = 0x20000;
pub const MAX_MAP_LEAFBRUSHES: usize = 0x40000;
pub const MAX_MAP_DRAW_SURFS: usize = 0x20000;
pub const MAX_MAP_DRAW_VERTS: usize = 0x80000;
pub const MAX_MAP_VISIBILITY: usize = 0x200000;

pub const MAX_QPATH: usize = 64;

// ============================================================
// Lump records
// ============================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DShader {
    pub shader: String,
    pub surface_flags: SurfaceFlags,
    pub content_flags: Contents,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DPlane {
    pub normal: Vec3,
    pub dist: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DNode {
    pub plane_num: i32,
    /// Negative numbers are -(leafs + 1), not nodes.
    pub children: [i32; 2],
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DLeaf {
    pub cluster: i32,
    pub area: i32,
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
    pub first_leaf_surface: i32,
    pub num_leaf_surfaces: i32,
    pub first_leaf_brush: i32,
    pub num_leaf_brushes: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub first_surface: i32,
    pub num_surfaces: i32,
    pub first_brush: i32,
    pub num_brushes: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DBrushSide {
    pub plane_num: i32,
    pub shader_num: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DBrush {
    pub first_side: i32,
    pub num_sides: i32,
    pub shader_num: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MapSurfaceType {
    #[default]
    Bad,
    Planar,
    Patch,
    TriangleSoup,
    Flare,
}

impl MapSurfaceType {
    pub fn as_i32(self) -> i32 {
        match self {
            MapSurfaceType::Bad => 0,
            MapSurfaceType::Planar => 1,
            MapSurfaceType::Patch => 2,
            MapSurfaceType::TriangleSoup => 3,
            MapSurfaceType::Flare => 4,
        }
    }
}

/// The collision-relevant part of a draw surface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DSurface {
    pub shader_num: i32,
    pub surface_type: MapSurfaceType,
    pub first_vert: i32,
    pub num_verts: i32,
    pub patch_width: i32,
    pub patch_height: i32,
}

/// Uncompressed cluster visibility rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DVisibility {
    pub num_clusters: i32,
    pub cluster_bytes: i32,
    pub data: Vec<u8>,
}

/// Every lump the collision model reads.
#[derive(Debug, Clone, Default)]
pub struct BspLumps {
    pub entities: String,
    pub shaders: Vec<DShader>,
    pub planes: Vec<DPlane>,
    pub nodes: Vec<DNode>,
    pub leafs: Vec<DLeaf>,
    pub leaf_surfaces: Vec<i32>,
    pub leaf_brushes: Vec<i32>,
    pub models: Vec<DModel>,
    pub brushes: Vec<DBrush>,
    pub brush_sides: Vec<DBrushSide>,
    pub draw_verts: Vec<Vec3>,
    pub surfaces: Vec<DSurface>,
    pub visibility: Option<DVisibility>,
}

// ============================================================
// Canonical encoding, used for the map checksum
// ============================================================

/// Little-endian encoding of one record in the on-disk field order.
pub trait LumpRecord {
    fn write_le(&self, out: &mut Vec<u8>);
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl LumpRecord for DShader {
    fn write_le(&self, out: &mut Vec<u8>) {
        let mut name = [0u8; MAX_QPATH];
        let bytes = self.shader.as_bytes();
        let n = bytes.len().min(MAX_QPATH - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        out.extend_from_slice(&name);
        out.extend_from_slice(&self.surface_flags.bits().to_le_bytes());
        out.extend_from_slice(&self.content_flags.bits().to_le_bytes());
    }
}

impl LumpRecord for DPlane {
    fn write_le(&self, out: &mut Vec<u8>) {
        self.normal.iter().for_each(|&v| put_f32(out, v));
        put_f32(out, self.dist);
    }
}

impl LumpRecord for DNode {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, self.plane_num);
        self.children.iter().for_each(|&v| put_i32(out, v));
        self.mins.iter().for_each(|&v| put_i32(out, v));
        self.maxs.iter().for_each(|&v| put_i32(out, v));
    }
}

impl LumpRecord for DLeaf {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, self.cluster);
        put_i32(out, self.area);
        self.mins.iter().for_each(|&v| put_i32(out, v));
        self.maxs.iter().for_each(|&v| put_i32(out, v));
        put_i32(out, self.first_leaf_surface);
        put_i32(out, self.num_leaf_surfaces);
        put_i32(out, self.first_leaf_brush);
        put_i32(out, self.num_leaf_brushes);
    }
}

impl LumpRecord for DModel {
    fn write_le(&self, out: &mut Vec<u8>) {
        self.mins.iter().for_each(|&v| put_f32(out, v));
        self.maxs.iter().for_each(|&v| put_f32(out, v));
        put_i32(out, self.first_surface);
        put_i32(out, self.num_surfaces);
        put_i32(out, self.first_brush);
        put_i32(out, self.num_brushes);
    }
}

impl LumpRecord for DBrushSide {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, self.plane_num);
        put_i32(out, self.shader_num);
    }
}

impl LumpRecord for DBrush {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, self.first_side);
        put_i32(out, self.num_sides);
        put_i32(out, self.shader_num);
    }
}

impl LumpRecord for DSurface {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, self.shader_num);
        put_i32(out, self.surface_type.as_i32());
        put_i32(out, self.first_vert);
        put_i32(out, self.num_verts);
        put_i32(out, self.patch_width);
        put_i32(out, self.patch_height);
    }
}

impl LumpRecord for i32 {
    fn write_le(&self, out: &mut Vec<u8>) {
        put_i32(out, *self);
    }
}

impl LumpRecord for Vec3 {
    fn write_le(&self, out: &mut Vec<u8>) {
        self.iter().for_each(|&v| put_f32(out, v));
    }
}

pub fn lump_bytes<T: LumpRecord>(records: &[T]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        r.write_le(&mut out);
    }
    out
}
