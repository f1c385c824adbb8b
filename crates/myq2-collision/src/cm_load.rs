// cm_load.rs — building the collision world from BSP lumps
//
// Every index in the lumps is checked before it is stored, so the query
// code can index the world arrays without bounds worries. A failed load
// returns the error and leaves no partially built world behind.

use crate::cm_local::{
    CBrush, CBrushSide, CLeaf, CModel, CNode, CPatch, ClipHandle, ClipMap, TempBox,
    BOX_MODEL_HANDLE, CAPSULE_MODEL_HANDLE,
};
use crate::cm_patch::generate_patch_collide;
use crate::cm_test::AreaPortals;
use crate::config::CmConfig;
use crate::error::{check_limit, CmError, CmResult};
use crate::polylib::{base_winding_for_plane, chop_winding_in_place, winding_bounds, Winding, ON_EPSILON};
use crate::q_shared::{
    add_point_to_bounds, clear_bounds, vector_length_squared, vector_subtract, CPlane,
    SurfaceFlags, Vec3,
};
use crate::qfiles::*;
use log::info;
use md4::{Digest, Md4};
use parking_lot::Mutex;
use rayon::prelude::*;

/// Below this many patches, tessellating serially is faster.
pub const PARALLEL_LUMP_THRESHOLD: usize = 64;

pub const MAX_PATCH_VERTS: usize = 1024;

/// XOR of the four little-endian words of the MD4 digest.
pub fn com_block_checksum(data: &[u8]) -> u32 {
    let digest = Md4::digest(data);
    digest
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0, |acc, w| acc ^ w)
}

/// Checksum of the collision lumps. Two worlds built from equal lumps
/// always agree.
pub fn map_checksum(lumps: &BspLumps) -> u32 {
    let sums = [
        com_block_checksum(&lump_bytes(&lumps.shaders)),
        com_block_checksum(&lump_bytes(&lumps.leafs)),
        com_block_checksum(&lump_bytes(&lumps.leaf_brushes)),
        com_block_checksum(&lump_bytes(&lumps.leaf_surfaces)),
        com_block_checksum(&lump_bytes(&lumps.planes)),
        com_block_checksum(&lump_bytes(&lumps.brush_sides)),
        com_block_checksum(&lump_bytes(&lumps.brushes)),
        com_block_checksum(&lump_bytes(&lumps.models)),
        com_block_checksum(&lump_bytes(&lumps.nodes)),
        com_block_checksum(&lump_bytes(&lumps.surfaces)),
        com_block_checksum(&lump_bytes(&lumps.draw_verts)),
    ];
    let mut bytes = Vec::with_capacity(sums.len() * 4);
    for s in sums {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    com_block_checksum(&bytes)
}

/// `first..first + num` as a range inside `0..len`.
fn checked_range(lump: &'static str, what: &str, first: i32, num: i32, len: usize) -> CmResult<(usize, usize)> {
    if first < 0 || num < 0 || first as usize + num as usize > len {
        return Err(CmError::corrupt(
            lump,
            format!("{} range {}+{} outside 0..{}", what, first, num, len),
        ));
    }
    Ok((first as usize, num as usize))
}

fn checked_index(lump: &'static str, what: &str, index: i32, len: usize) -> CmResult<usize> {
    if index < 0 || index as usize >= len {
        return Err(CmError::corrupt(lump, format!("bad {} index {} (have {})", what, index, len)));
    }
    Ok(index as usize)
}

impl ClipMap {
    /// Builds a world from `lumps`.
    pub fn load(name: &str, lumps: &BspLumps, config: CmConfig) -> CmResult<ClipMap> {
        let mut cm = ClipMap {
            name: name.to_string(),
            config,
            ..Default::default()
        };

        cm.load_shaders_and_planes(lumps)?;
        cm.load_leafs(lumps)?;
        cm.load_leaf_brushes(lumps)?;
        cm.load_leaf_surfaces(lumps)?;
        cm.load_brush_sides(lumps)?;
        cm.load_brushes(lumps)?;
        cm.load_submodels(lumps)?;
        cm.load_nodes(lumps)?;
        cm.load_entity_string(lumps)?;
        cm.load_visibility(lumps)?;
        cm.load_patches(lumps)?;

        cm.portals = Mutex::new(AreaPortals::new(cm.num_areas));
        cm.checksum = map_checksum(lumps);

        info!(
            "loaded collision map \"{}\": {} brushes, {} patches, {} leafs, {} clusters, {} areas, checksum {:08x}",
            cm.name,
            cm.brushes.len(),
            cm.surfaces.iter().filter(|s| s.is_some()).count(),
            cm.leafs.len(),
            cm.num_clusters,
            cm.num_areas,
            cm.checksum
        );
        Ok(cm)
    }

    fn load_shaders_and_planes(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("shaders", lumps.shaders.len(), MAX_MAP_SHADERS)?;
        check_limit("planes", lumps.planes.len(), MAX_MAP_PLANES)?;
        if lumps.planes.is_empty() && !lumps.nodes.is_empty() {
            return Err(CmError::corrupt("LUMP_PLANES", "map with no planes"));
        }
        self.planes = lumps.planes.iter().map(|p| CPlane::new(p.normal, p.dist)).collect();
        Ok(())
    }

    fn load_leafs(&mut self, lumps: &BspLumps) -> CmResult<()> {
        if lumps.leafs.is_empty() {
            return Err(CmError::corrupt("LUMP_LEAFS", "map with no leafs"));
        }
        check_limit("leafs", lumps.leafs.len(), MAX_MAP_LEAFS)?;

        self.leafs.reserve(lumps.leafs.len());
        for (i, l) in lumps.leafs.iter().enumerate() {
            if l.cluster < -1 || l.area < -1 {
                return Err(CmError::corrupt(
                    "LUMP_LEAFS",
                    format!("leaf {} has cluster {} area {}", i, l.cluster, l.area),
                ));
            }
            let (first_leaf_brush, num_leaf_brushes) = checked_range(
                "LUMP_LEAFS",
                "leaf brush",
                l.first_leaf_brush,
                l.num_leaf_brushes,
                lumps.leaf_brushes.len(),
            )?;
            let (first_leaf_surface, num_leaf_surfaces) = checked_range(
                "LUMP_LEAFS",
                "leaf surface",
                l.first_leaf_surface,
                l.num_leaf_surfaces,
                lumps.leaf_surfaces.len(),
            )?;
            self.leafs.push(CLeaf {
                cluster: l.cluster,
                area: l.area,
                first_leaf_brush,
                num_leaf_brushes,
                first_leaf_surface,
                num_leaf_surfaces,
            });

            if l.cluster >= self.num_clusters as i32 {
                self.num_clusters = (l.cluster + 1) as usize;
            }
            if l.area >= self.num_areas as i32 {
                self.num_areas = (l.area + 1) as usize;
            }
        }
        check_limit("areas", self.num_areas, MAX_MAP_AREAS)?;
        Ok(())
    }

    fn load_leaf_brushes(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("leaf brushes", lumps.leaf_brushes.len(), MAX_MAP_LEAFBRUSHES)?;
        self.leaf_brushes = lumps
            .leaf_brushes
            .iter()
            .map(|&b| checked_index("LUMP_LEAFBRUSHES", "brush", b, lumps.brushes.len()))
            .collect::<CmResult<_>>()?;
        Ok(())
    }

    fn load_leaf_surfaces(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("leaf surfaces", lumps.leaf_surfaces.len(), MAX_MAP_LEAFFACES)?;
        self.leaf_surfaces = lumps
            .leaf_surfaces
            .iter()
            .map(|&s| checked_index("LUMP_LEAFSURFACES", "surface", s, lumps.surfaces.len()))
            .collect::<CmResult<_>>()?;
        Ok(())
    }

    fn load_brush_sides(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("brush sides", lumps.brush_sides.len(), MAX_MAP_BRUSHSIDES)?;
        self.brush_sides.reserve(lumps.brush_sides.len());
        for s in &lumps.brush_sides {
            let plane = checked_index("LUMP_BRUSHSIDES", "plane", s.plane_num, self.planes.len())?;
            let shader = checked_index("LUMP_BRUSHSIDES", "shader", s.shader_num, lumps.shaders.len())?;
            self.brush_sides.push(CBrushSide {
                plane,
                surface_flags: lumps.shaders[shader].surface_flags,
                shader_num: s.shader_num,
                winding: Winding::new(),
            });
        }
        Ok(())
    }

    fn load_brushes(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("brushes", lumps.brushes.len(), MAX_MAP_BRUSHES)?;
        self.brushes.reserve(lumps.brushes.len());
        for b in &lumps.brushes {
            let (first_side, num_sides) =
                checked_range("LUMP_BRUSHES", "side", b.first_side, b.num_sides, self.brush_sides.len())?;
            let shader = checked_index("LUMP_BRUSHES", "shader", b.shader_num, lumps.shaders.len())?;
            let mut brush = CBrush {
                shader_num: b.shader_num,
                contents: lumps.shaders[shader].content_flags,
                bounds: [[0.0; 3]; 2],
                first_side,
                num_sides,
                edges: Vec::new(),
            };
            self.build_brush_windings(&mut brush);
            self.brushes.push(brush);
        }
        Ok(())
    }

    /// Chops each side's plane by all the others, then derives the brush
    /// bounds and edge list from the resulting polygons.
    fn build_brush_windings(&mut self, brush: &mut CBrush) {
        let (mut mins, mut maxs) = clear_bounds();
        for i in brush.side_range() {
            let plane = self.planes[self.brush_sides[i].plane];
            let mut w = base_winding_for_plane(&plane.normal, plane.dist).unwrap_or_default();
            for j in brush.side_range() {
                if w.is_empty() {
                    break;
                }
                if j == i || self.brush_sides[j].plane == self.brush_sides[i].plane {
                    continue;
                }
                // keep the part behind the other side
                let other = self.planes[self.brush_sides[j].plane];
                let flipped = [-other.normal[0], -other.normal[1], -other.normal[2]];
                chop_winding_in_place(&mut w, &flipped, -other.dist, 0.0);
            }
            if !w.is_empty() {
                let (wmins, wmaxs) = winding_bounds(&w);
                add_point_to_bounds(&wmins, &mut mins, &mut maxs);
                add_point_to_bounds(&wmaxs, &mut mins, &mut maxs);
                for k in 0..w.len() {
                    add_edge(&mut brush.edges, w[k], w[(k + 1) % w.len()]);
                }
            }
            self.brush_sides[i].winding = w;
        }
        brush.bounds = [mins, maxs];
    }

    fn load_submodels(&mut self, lumps: &BspLumps) -> CmResult<()> {
        if lumps.models.is_empty() {
            return Err(CmError::corrupt("LUMP_MODELS", "map with no models"));
        }
        // handles above this are the temp models
        check_limit("models", lumps.models.len(), CAPSULE_MODEL_HANDLE as usize)?;

        for (i, m) in lumps.models.iter().enumerate() {
            let (first_brush, num_brushes) =
                checked_range("LUMP_MODELS", "brush", m.first_brush, m.num_brushes, self.brushes.len())?;
            let (first_surface, num_surfaces) =
                checked_range("LUMP_MODELS", "surface", m.first_surface, m.num_surfaces, lumps.surfaces.len())?;

            let mut out = CModel::default();
            for j in 0..3 {
                // spread the mins / maxs by a unit
                out.mins[j] = m.mins[j] - 1.0;
                out.maxs[j] = m.maxs[j] + 1.0;
            }

            if i > 0 {
                // make a "leaf" just to hold the model's brushes and surfaces
                out.leaf = CLeaf {
                    cluster: -1,
                    area: -1,
                    first_leaf_brush: self.leaf_brushes.len(),
                    num_leaf_brushes: num_brushes,
                    first_leaf_surface: self.leaf_surfaces.len(),
                    num_leaf_surfaces: num_surfaces,
                };
                self.leaf_brushes.extend(first_brush..first_brush + num_brushes);
                self.leaf_surfaces.extend(first_surface..first_surface + num_surfaces);
            }
            self.cmodels.push(out);
        }
        Ok(())
    }

    fn load_nodes(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("nodes", lumps.nodes.len(), MAX_MAP_NODES)?;
        self.nodes.reserve(lumps.nodes.len());
        for (i, n) in lumps.nodes.iter().enumerate() {
            let plane = checked_index("LUMP_NODES", "plane", n.plane_num, self.planes.len())?;
            for &child in &n.children {
                let ok = if child >= 0 {
                    // children must point down the tree
                    (child as usize) < lumps.nodes.len() && child as usize > i
                } else {
                    ((-1 - child) as usize) < self.leafs.len()
                };
                if !ok {
                    return Err(CmError::corrupt("LUMP_NODES", format!("node {} has bad child {}", i, child)));
                }
            }
            self.nodes.push(CNode {
                plane,
                children: n.children,
            });
        }
        Ok(())
    }

    fn load_entity_string(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("entity string", lumps.entities.len(), MAX_MAP_ENTSTRING)?;
        self.entity_string = lumps.entities.clone();
        Ok(())
    }

    fn load_visibility(&mut self, lumps: &BspLumps) -> CmResult<()> {
        let Some(vis) = &lumps.visibility else {
            self.cluster_bytes = (self.num_clusters + 7) >> 3;
            self.vised = false;
            return Ok(());
        };

        if vis.num_clusters < 0 || vis.cluster_bytes < 0 {
            return Err(CmError::corrupt("LUMP_VISIBILITY", "negative header"));
        }
        let num_clusters = vis.num_clusters as usize;
        let cluster_bytes = vis.cluster_bytes as usize;
        if num_clusters < self.num_clusters {
            return Err(CmError::corrupt(
                "LUMP_VISIBILITY",
                format!("{} clusters but leafs use {}", num_clusters, self.num_clusters),
            ));
        }
        if cluster_bytes < (num_clusters + 7) >> 3 {
            return Err(CmError::corrupt(
                "LUMP_VISIBILITY",
                format!("rows of {} bytes cannot hold {} clusters", cluster_bytes, num_clusters),
            ));
        }
        let size = num_clusters * cluster_bytes;
        check_limit("visibility", size, MAX_MAP_VISIBILITY)?;
        if vis.data.len() < size {
            return Err(CmError::corrupt(
                "LUMP_VISIBILITY",
                format!("{} bytes of rows, need {}", vis.data.len(), size),
            ));
        }

        self.num_clusters = num_clusters;
        self.cluster_bytes = cluster_bytes;
        self.visibility = vis.data[..size].to_vec();
        self.vised = true;
        Ok(())
    }

    fn load_patches(&mut self, lumps: &BspLumps) -> CmResult<()> {
        check_limit("surfaces", lumps.surfaces.len(), MAX_MAP_DRAW_SURFS)?;
        check_limit("draw verts", lumps.draw_verts.len(), MAX_MAP_DRAW_VERTS)?;

        let build = |index: usize| -> CmResult<Option<CPatch>> {
            let s = &lumps.surfaces[index];
            if s.surface_type != MapSurfaceType::Patch {
                return Ok(None); // ignore other surfaces
            }
            let shader = checked_index("LUMP_SURFACES", "shader", s.shader_num, lumps.shaders.len())?;
            let shader = &lumps.shaders[shader];
            if shader.surface_flags.contains(SurfaceFlags::NONSOLID) {
                return Ok(None);
            }
            let (first_vert, num_verts) =
                checked_range("LUMP_SURFACES", "vertex", s.first_vert, s.num_verts, lumps.draw_verts.len())?;
            if s.patch_width < 0 || s.patch_height < 0 {
                return Err(CmError::corrupt("LUMP_SURFACES", format!("patch {} has negative size", index)));
            }
            let (width, height) = (s.patch_width as usize, s.patch_height as usize);
            check_limit("patch verts", width * height, MAX_PATCH_VERTS)?;
            if width * height > num_verts {
                return Err(CmError::corrupt(
                    "LUMP_SURFACES",
                    format!("patch {} is {}x{} with {} verts", index, width, height, num_verts),
                ));
            }

            let points = &lumps.draw_verts[first_vert..first_vert + num_verts];
            let pc = generate_patch_collide(width, height, points)?;
            Ok(Some(CPatch {
                contents: shader.content_flags,
                surface_flags: shader.surface_flags,
                pc,
            }))
        };

        let num_patches = lumps
            .surfaces
            .iter()
            .filter(|s| s.surface_type == MapSurfaceType::Patch)
            .count();
        let surfaces: CmResult<Vec<Option<CPatch>>> = if num_patches >= PARALLEL_LUMP_THRESHOLD {
            (0..lumps.surfaces.len()).into_par_iter().map(build).collect()
        } else {
            (0..lumps.surfaces.len()).map(build).collect()
        };
        self.surfaces = surfaces?;
        Ok(())
    }

    // ============================================================
    // Model handles
    // ============================================================

    /// Handle of inline model `index`; 0 is the world.
    pub fn inline_model(&self, index: usize) -> ClipHandle {
        if index >= self.cmodels.len() {
            panic!("inline_model: bad number {}", index);
        }
        index as ClipHandle
    }

    pub(crate) fn clip_handle_to_model(&self, handle: ClipHandle) -> &CModel {
        if handle < 0 {
            panic!("clip_handle_to_model: bad handle {}", handle);
        }
        if (handle as usize) < self.cmodels.len() {
            return &self.cmodels[handle as usize];
        }
        panic!(
            "clip_handle_to_model: bad handle {} < {}",
            handle,
            self.cmodels.len()
        );
    }

    /// Bounds of a model; inline models are spread by one unit.
    pub fn model_bounds(&self, model: ClipHandle) -> (Vec3, Vec3) {
        if model == BOX_MODEL_HANDLE || model == CAPSULE_MODEL_HANDLE {
            return (self.temp_box.mins, self.temp_box.maxs);
        }
        let cmod = self.clip_handle_to_model(model);
        (cmod.mins, cmod.maxs)
    }

    /// Sets up a box (or capsule) model for one entity. The handle stays
    /// valid until the next call.
    pub fn temp_box_model(&mut self, mins: &Vec3, maxs: &Vec3, capsule: bool) -> ClipHandle {
        self.temp_box = TempBox {
            mins: *mins,
            maxs: *maxs,
        };
        if capsule {
            CAPSULE_MODEL_HANDLE
        } else {
            BOX_MODEL_HANDLE
        }
    }

    // ============================================================
    // Debug geometry
    // ============================================================

    /// Polygon of one side of `brushnum`, empty when clipped away.
    pub fn brush_side_winding(&self, brushnum: usize, side: usize) -> &[Vec3] {
        let b = &self.brushes[brushnum];
        if side >= b.num_sides {
            panic!("brush_side_winding: brush {} has no side {}", brushnum, side);
        }
        &self.brush_sides[b.first_side + side].winding
    }

    pub fn brush_edges(&self, brushnum: usize) -> &[[Vec3; 2]] {
        &self.brushes[brushnum].edges
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn num_areas(&self) -> usize {
        self.num_areas
    }

    pub fn entity_string(&self) -> &str {
        &self.entity_string
    }

    pub fn is_loaded(&self) -> bool {
        !self.name.is_empty()
    }
}

fn same_point(a: &Vec3, b: &Vec3) -> bool {
    vector_length_squared(&vector_subtract(a, b)) < ON_EPSILON * ON_EPSILON
}

/// Adds an undirected edge unless it is degenerate or already present.
fn add_edge(edges: &mut Vec<[Vec3; 2]>, p0: Vec3, p1: Vec3) {
    if same_point(&p0, &p1) {
        return;
    }
    let dup = edges.iter().any(|e| {
        (same_point(&e[0], &p0) && same_point(&e[1], &p1)) || (same_point(&e[0], &p1) && same_point(&e[1], &p0))
    });
    if !dup {
        edges.push([p0, p1]);
    }
}
