// test_maps.rs — small synthetic BSP worlds for the unit tests
//
// The world is a cube split at the midpoint along x, y, z in turn down
// to `depth`. Every leaf lists all brushes and patches whose bounds touch
// it, so a leaf may hold more than a real compiler would give it.

use crate::cm_local::ClipMap;
use crate::config::CmConfig;
use crate::q_shared::{add_point_to_bounds, clear_bounds, Contents, SurfaceFlags, Vec3};
use crate::qfiles::*;

type Side = (Vec3, f32);

struct TestBrush {
    sides: Vec<Side>,
    mins: Vec3,
    maxs: Vec3,
    contents: Contents,
}

struct TestPatch {
    width: usize,
    height: usize,
    points: Vec<Vec3>,
    contents: Contents,
    surface_flags: SurfaceFlags,
}

type VisFn = Box<dyn Fn(i32, i32) -> bool>;

pub(crate) struct TestMap {
    half: f32,
    depth: usize,
    brushes: Vec<TestBrush>,
    submodels: Vec<TestBrush>,
    patches: Vec<TestPatch>,
    area_split: Option<(usize, f32)>,
    vis: Option<VisFn>,
}

/// The six axial sides of a box, -x +x -y +y -z +z.
pub(crate) fn box_sides(mins: &Vec3, maxs: &Vec3) -> Vec<Side> {
    let mut sides = Vec::with_capacity(6);
    for axis in 0..3 {
        let mut n = [0.0f32; 3];
        n[axis] = -1.0;
        sides.push((n, -mins[axis]));
        n[axis] = 1.0;
        sides.push((n, maxs[axis]));
    }
    sides
}

impl TestMap {
    pub fn new() -> Self {
        Self {
            half: 4096.0,
            depth: 0,
            brushes: Vec::new(),
            submodels: Vec::new(),
            patches: Vec::new(),
            area_split: None,
            vis: None,
        }
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn brush(mut self, mins: Vec3, maxs: Vec3, contents: Contents) -> Self {
        self.brushes.push(TestBrush {
            sides: box_sides(&mins, &maxs),
            mins,
            maxs,
            contents,
        });
        self
    }

    /// A box with extra cutting planes; `mins`/`maxs` bound the result.
    pub fn convex(mut self, mins: Vec3, maxs: Vec3, extra: &[Side], contents: Contents) -> Self {
        let mut sides = box_sides(&mins, &maxs);
        sides.extend_from_slice(extra);
        self.brushes.push(TestBrush {
            sides,
            mins,
            maxs,
            contents,
        });
        self
    }

    /// An inline model made of one box brush, outside the world tree.
    pub fn submodel(mut self, mins: Vec3, maxs: Vec3, contents: Contents) -> Self {
        self.submodels.push(TestBrush {
            sides: box_sides(&mins, &maxs),
            mins,
            maxs,
            contents,
        });
        self
    }

    pub fn patch(mut self, width: usize, height: usize, points: Vec<Vec3>, surface_flags: SurfaceFlags) -> Self {
        self.patches.push(TestPatch {
            width,
            height,
            points,
            contents: Contents::SOLID,
            surface_flags,
        });
        self
    }

    /// Leafs whose center lies below `dist` on `axis` are area 0, the
    /// rest area 1.
    pub fn split_areas(mut self, axis: usize, dist: f32) -> Self {
        self.area_split = Some((axis, dist));
        self
    }

    /// Builds a vis lump over the leaf clusters.
    pub fn vis(mut self, f: impl Fn(i32, i32) -> bool + 'static) -> Self {
        self.vis = Some(Box::new(f));
        self
    }

    pub fn load(&self) -> ClipMap {
        ClipMap::load("maps/test.bsp", &self.lumps(), CmConfig::default()).unwrap()
    }

    pub fn lumps(&self) -> BspLumps {
        let mut lumps = BspLumps {
            entities: "{\n\"classname\" \"worldspawn\"\n}\n".to_string(),
            ..Default::default()
        };

        // brushes, world first
        for b in self.brushes.iter().chain(self.submodels.iter()) {
            let shader = lumps.shaders.len() as i32;
            lumps.shaders.push(DShader {
                shader: format!("textures/test/brush{}", shader),
                surface_flags: SurfaceFlags::empty(),
                content_flags: b.contents,
            });
            let first_side = lumps.brush_sides.len() as i32;
            for &(normal, dist) in &b.sides {
                lumps.brush_sides.push(DBrushSide {
                    plane_num: lumps.planes.len() as i32,
                    shader_num: shader,
                });
                lumps.planes.push(DPlane { normal, dist });
            }
            lumps.brushes.push(DBrush {
                first_side,
                num_sides: b.sides.len() as i32,
                shader_num: shader,
            });
        }

        // patches
        let mut patch_bounds = Vec::new();
        for p in &self.patches {
            let shader = lumps.shaders.len() as i32;
            lumps.shaders.push(DShader {
                shader: format!("textures/test/curve{}", shader),
                surface_flags: p.surface_flags,
                content_flags: p.contents,
            });
            lumps.surfaces.push(DSurface {
                shader_num: shader,
                surface_type: MapSurfaceType::Patch,
                first_vert: lumps.draw_verts.len() as i32,
                num_verts: p.points.len() as i32,
                patch_width: p.width as i32,
                patch_height: p.height as i32,
            });
            lumps.draw_verts.extend_from_slice(&p.points);
            let (mut mins, mut maxs) = clear_bounds();
            for v in &p.points {
                add_point_to_bounds(v, &mut mins, &mut maxs);
            }
            patch_bounds.push((mins, maxs));
        }

        // tree
        let mins = [-self.half; 3];
        let maxs = [self.half; 3];
        self.build_node(&mut lumps, &patch_bounds, mins, maxs, 0);

        // models
        lumps.models.push(DModel {
            mins,
            maxs,
            first_surface: 0,
            num_surfaces: self.patches.len() as i32,
            first_brush: 0,
            num_brushes: self.brushes.len() as i32,
        });
        for (i, s) in self.submodels.iter().enumerate() {
            lumps.models.push(DModel {
                mins: s.mins,
                maxs: s.maxs,
                first_surface: 0,
                num_surfaces: 0,
                first_brush: (self.brushes.len() + i) as i32,
                num_brushes: 1,
            });
        }

        if let Some(f) = &self.vis {
            let n = lumps.leafs.len();
            let row = (n + 7) >> 3;
            let mut data = vec![0u8; n * row];
            for a in 0..n {
                for b in 0..n {
                    if f(a as i32, b as i32) {
                        data[a * row + (b >> 3)] |= 1 << (b & 7);
                    }
                }
            }
            lumps.visibility = Some(DVisibility {
                num_clusters: n as i32,
                cluster_bytes: row as i32,
                data,
            });
        }

        lumps
    }

    fn build_node(&self, lumps: &mut BspLumps, patch_bounds: &[(Vec3, Vec3)], mins: Vec3, maxs: Vec3, depth: usize) -> i32 {
        if depth == self.depth {
            return self.build_leaf(lumps, patch_bounds, mins, maxs);
        }

        let axis = depth % 3;
        let dist = (mins[axis] + maxs[axis]) * 0.5;
        let mut normal = [0.0f32; 3];
        normal[axis] = 1.0;

        let nodenum = lumps.nodes.len();
        lumps.nodes.push(DNode {
            plane_num: lumps.planes.len() as i32,
            children: [0, 0],
            mins: mins.map(|v| v as i32),
            maxs: maxs.map(|v| v as i32),
        });
        lumps.planes.push(DPlane { normal, dist });

        let mut front_mins = mins;
        front_mins[axis] = dist;
        let mut back_maxs = maxs;
        back_maxs[axis] = dist;
        let front = self.build_node(lumps, patch_bounds, front_mins, maxs, depth + 1);
        let back = self.build_node(lumps, patch_bounds, mins, back_maxs, depth + 1);
        lumps.nodes[nodenum].children = [front, back];
        nodenum as i32
    }

    fn build_leaf(&self, lumps: &mut BspLumps, patch_bounds: &[(Vec3, Vec3)], mins: Vec3, maxs: Vec3) -> i32 {
        let touches = |bmins: &Vec3, bmaxs: &Vec3| (0..3).all(|i| bmins[i] <= maxs[i] && bmaxs[i] >= mins[i]);

        let leafnum = lumps.leafs.len();
        let first_leaf_brush = lumps.leaf_brushes.len() as i32;
        for (i, b) in self.brushes.iter().enumerate() {
            if touches(&b.mins, &b.maxs) {
                lumps.leaf_brushes.push(i as i32);
            }
        }
        let first_leaf_surface = lumps.leaf_surfaces.len() as i32;
        for (i, (pmins, pmaxs)) in patch_bounds.iter().enumerate() {
            if touches(pmins, pmaxs) {
                lumps.leaf_surfaces.push(i as i32);
            }
        }

        let area = match self.area_split {
            Some((axis, dist)) if (mins[axis] + maxs[axis]) * 0.5 >= dist => 1,
            _ => 0,
        };
        lumps.leafs.push(DLeaf {
            cluster: leafnum as i32,
            area,
            mins: mins.map(|v| v as i32),
            maxs: maxs.map(|v| v as i32),
            first_leaf_surface,
            num_leaf_surfaces: lumps.leaf_surfaces.len() as i32 - first_leaf_surface,
            first_leaf_brush,
            num_leaf_brushes: lumps.leaf_brushes.len() as i32 - first_leaf_brush,
        });
        -1 - leafnum as i32
    }
}
