// cm_trace.rs — box, capsule and bi-sphere sweeps through the world
//
// Every sweep is a Minkowski sum: the moving shape shrinks to a point and
// each brush plane moves out by the shape's support distance along the
// plane normal. Boxes use the corner picked by the plane's signbits,
// capsules the nearer end sphere, bi-spheres the radius at each end.

use crate::cm_local::{
    CBrush, CBrushSide, CLeaf, ClipHandle, ClipMap, VisitSet, BOX_LEAF_EPSILON, BOX_MODEL_HANDLE,
    CAPSULE_MODEL_HANDLE, RADIUS_EPSILON, SURFACE_CLIP_EPSILON,
};
use crate::q_shared::{
    bounds_intersect, create_rotation_matrix, dot_product, rotate_point, transpose_matrix,
    vector_add, vector_length_squared, vector_ma, vector_normalize, vector_scale, vector_subtract, CPlane,
    Contents, HitSource, Matrix3, SurfaceFlags, Trace, Vec3, PLANE_NON_AXIAL, VEC3_ORIGIN,
};

/// Capsule description: two spheres `offset` above and below the center.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SphereShape {
    pub radius: f32,
    pub halfheight: f32,
    pub offset: Vec3,
}

impl SphereShape {
    /// Largest vertical capsule fitting a symmetric box of half-size `half`.
    pub fn for_half_size(half: &Vec3) -> Self {
        let radius = if half[0] > half[2] { half[2] } else { half[0] };
        Self {
            radius,
            halfheight: half[2],
            offset: [0.0, 0.0, half[2] - radius],
        }
    }
}

/// The shape being swept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceShape {
    Aabb,
    Capsule(SphereShape),
    /// A sphere whose radius changes linearly along the sweep.
    BiSphere { start_radius: f32, end_radius: f32 },
}

/// A plane pushed out by the shape, with the shape's contact points.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlaneOffset {
    pub dist_start: f32,
    pub dist_end: f32,
    pub start: Vec3,
    pub end: Vec3,
}

/// State of one in-flight trace.
#[derive(Debug, Clone)]
pub(crate) struct TraceWork {
    pub start: Vec3,
    pub end: Vec3,
    /// Symmetric box around the shape center.
    pub size: [Vec3; 2],
    /// Box corner for each plane signbits value.
    pub offsets: [Vec3; 8],
    pub extents: Vec3,
    /// Bounds of the whole swept volume.
    pub bounds: [Vec3; 2],
    pub contents: Contents,
    pub is_point: bool,
    pub shape: TraceShape,
    pub trace: Trace,
    pub checked_brushes: VisitSet,
    pub checked_patches: VisitSet,
}

impl TraceWork {
    /// `start`/`end` are shape centers; `size` must be symmetric.
    pub(crate) fn new(start: Vec3, end: Vec3, size: [Vec3; 2], contents: Contents, shape: TraceShape) -> Self {
        let mut offsets = [[0.0f32; 3]; 8];
        for (signbits, corner) in offsets.iter_mut().enumerate() {
            for k in 0..3 {
                corner[k] = if signbits & (1 << k) != 0 { size[1][k] } else { size[0][k] };
            }
        }

        let mut bounds = [[0.0f32; 3]; 2];
        for i in 0..3 {
            let (lo, hi) = match shape {
                TraceShape::Aabb => (
                    start[i].min(end[i]) + size[0][i],
                    start[i].max(end[i]) + size[1][i],
                ),
                TraceShape::Capsule(s) => {
                    let r = s.offset[i].abs() + s.radius;
                    (start[i].min(end[i]) - r, start[i].max(end[i]) + r)
                }
                TraceShape::BiSphere {
                    start_radius,
                    end_radius,
                } => (
                    (start[i] - start_radius).min(end[i] - end_radius),
                    (start[i] + start_radius).max(end[i] + end_radius),
                ),
            };
            bounds[0][i] = lo;
            bounds[1][i] = hi;
        }

        let is_point = size[0] == [0.0; 3] && size[1] == [0.0; 3];
        Self {
            start,
            end,
            size,
            offsets,
            extents: if is_point { [0.0; 3] } else { size[1] },
            bounds,
            contents,
            is_point,
            shape,
            trace: Trace::default(),
            checked_brushes: VisitSet::default(),
            checked_patches: VisitSet::default(),
        }
    }

    /// Plane pushed out for a convex solid's own face.
    pub(crate) fn offset_surface_plane(&self, normal: &Vec3, dist: f32, signbits: u8) -> PlaneOffset {
        match self.shape {
            TraceShape::Aabb => {
                let d = dist - dot_product(&self.offsets[signbits as usize], normal);
                PlaneOffset {
                    dist_start: d,
                    dist_end: d,
                    start: self.start,
                    end: self.end,
                }
            }
            TraceShape::Capsule(ref s) => {
                // find the closest point on the capsule to the plane
                let t = dot_product(normal, &s.offset);
                let (start, end) = if t > 0.0 {
                    (vector_subtract(&self.start, &s.offset), vector_subtract(&self.end, &s.offset))
                } else {
                    (vector_add(&self.start, &s.offset), vector_add(&self.end, &s.offset))
                };
                PlaneOffset {
                    dist_start: dist + s.radius,
                    dist_end: dist + s.radius,
                    start,
                    end,
                }
            }
            TraceShape::BiSphere {
                start_radius,
                end_radius,
            } => PlaneOffset {
                dist_start: dist + start_radius,
                dist_end: dist + end_radius,
                start: self.start,
                end: self.end,
            },
        }
    }

    /// Patch border planes may be flipped; the box is centered so the
    /// absolute support distance is right either way.
    pub(crate) fn offset_border_plane(&self, normal: &Vec3, dist: f32, signbits: u8) -> PlaneOffset {
        match self.shape {
            TraceShape::Aabb => {
                let d = dist + dot_product(&self.offsets[signbits as usize], normal).abs();
                PlaneOffset {
                    dist_start: d,
                    dist_end: d,
                    start: self.start,
                    end: self.end,
                }
            }
            _ => self.offset_surface_plane(normal, dist, signbits),
        }
    }

    /// Equal fractions resolve to the lower source so the result does not
    /// depend on traversal order.
    fn improves(&self, fraction: f32, source: HitSource) -> bool {
        if self.trace.allsolid {
            return false;
        }
        fraction < self.trace.fraction
            || (fraction == self.trace.fraction && self.trace.hit.is_some_and(|h| source < h))
    }

    fn record_hit(
        &mut self,
        fraction: f32,
        plane: CPlane,
        surface_flags: SurfaceFlags,
        contents: Contents,
        source: HitSource,
    ) {
        if !self.improves(fraction, source) {
            return;
        }
        self.trace.fraction = fraction;
        self.trace.plane = plane;
        self.trace.surface_flags = surface_flags;
        self.trace.contents = contents;
        self.trace.hit = Some(source);
    }

    /// The start position overlaps a solid.
    fn record_solid(&mut self, contents: Contents, source: HitSource) {
        if self.trace.allsolid && self.trace.hit.is_some_and(|h| h < source) {
            return;
        }
        self.trace.startsolid = true;
        self.trace.allsolid = true;
        self.trace.fraction = 0.0;
        self.trace.contents = contents;
        self.trace.hit = Some(source);
    }
}

// ============================================================
// Synthetic box brush
// ============================================================

/// A six-sided brush built on the fly for temp box models.
pub(crate) struct BoxHull {
    pub planes: Vec<CPlane>,
    pub sides: Vec<CBrushSide>,
    pub brush: CBrush,
}

impl BoxHull {
    pub(crate) fn new(mins: &Vec3, maxs: &Vec3) -> Self {
        let mut planes = Vec::with_capacity(6);
        let mut sides = Vec::with_capacity(6);
        for axis in 0..3 {
            let mut normal = [0.0f32; 3];
            normal[axis] = 1.0;
            planes.push(CPlane::new(normal, maxs[axis]));
            normal[axis] = -1.0;
            planes.push(CPlane::new(normal, -mins[axis]));
        }
        for plane in 0..6 {
            sides.push(CBrushSide {
                plane,
                ..Default::default()
            });
        }
        let brush = CBrush {
            contents: Contents::BODY,
            bounds: [*mins, *maxs],
            first_side: 0,
            num_sides: 6,
            ..Default::default()
        };
        Self { planes, sides, brush }
    }
}

// ============================================================
// Brushes
// ============================================================

fn trace_through_brush(
    tw: &mut TraceWork,
    brush: &CBrush,
    sides: &[CBrushSide],
    planes: &[CPlane],
    source: HitSource,
) {
    if brush.num_sides == 0 {
        return;
    }

    let mut enter_frac = -1.0f32;
    let mut leave_frac = 1.0f32;
    let mut clip: Option<(usize, usize)> = None;
    let mut getout = false;
    let mut startout = false;

    // compare the trace against all planes of the brush; find the latest
    // time the trace crosses a plane towards the interior and the earliest
    // time the trace crosses a plane towards the exterior
    for side_idx in brush.side_range() {
        let side = &sides[side_idx];
        let plane = &planes[side.plane];
        let o = tw.offset_surface_plane(&plane.normal, plane.dist, plane.signbits);
        let d1 = dot_product(&o.start, &plane.normal) - o.dist_start;
        let d2 = dot_product(&o.end, &plane.normal) - o.dist_end;

        if d2 > 0.0 {
            getout = true; // endpoint is not in solid
        }
        if d1 > 0.0 {
            startout = true;
        }

        // if completely in front of face, no intersection with the entire brush
        if d1 > 0.0 && (d2 >= SURFACE_CLIP_EPSILON || d2 >= d1) {
            return;
        }
        // if it doesn't cross the plane, the plane isn't relevant
        if d1 <= 0.0 && d2 <= 0.0 {
            continue;
        }

        // crosses face
        if d1 > d2 {
            // enter
            let f = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);
            if f > enter_frac {
                enter_frac = f;
                clip = Some((side.plane, side_idx));
            }
        } else {
            // leave
            let f = ((d1 + SURFACE_CLIP_EPSILON) / (d1 - d2)).min(1.0);
            if f < leave_frac {
                leave_frac = f;
            }
        }
    }

    // all planes have been checked, and the trace was not
    // completely outside the brush
    if !startout {
        // original point was inside brush
        tw.trace.startsolid = true;
        if !getout {
            tw.record_solid(brush.contents, source);
        }
        return;
    }

    if enter_frac < leave_frac && enter_frac > -1.0 {
        if let Some((plane, side_idx)) = clip {
            tw.record_hit(
                enter_frac.max(0.0),
                planes[plane],
                sides[side_idx].surface_flags,
                brush.contents,
                source,
            );
        }
    }
}

fn test_box_in_brush(
    tw: &mut TraceWork,
    brush: &CBrush,
    sides: &[CBrushSide],
    planes: &[CPlane],
    source: HitSource,
) {
    if brush.num_sides == 0 {
        return;
    }
    if !bounds_intersect(&tw.bounds[0], &tw.bounds[1], &brush.bounds[0], &brush.bounds[1]) {
        return;
    }

    for side in &sides[brush.side_range()] {
        let plane = &planes[side.plane];
        let o = tw.offset_surface_plane(&plane.normal, plane.dist, plane.signbits);
        let d1 = dot_product(&o.start, &plane.normal) - o.dist_start;
        // if completely in front of face, no intersection
        if d1 > 0.0 {
            return;
        }
    }

    // inside this brush
    tw.record_solid(brush.contents, source);
}

// ============================================================
// Capsule vs capsule
// ============================================================

fn project_point_onto_vector(point: &Vec3, v_start: &Vec3, v_dir: &Vec3) -> Vec3 {
    let p_vec = vector_subtract(point, v_start);
    // project onto the directional vector for this segment
    vector_ma(v_start, dot_product(&p_vec, v_dir), v_dir)
}

/// Squared distance from `p` to the segment `lp1`..`lp2`.
fn distance_from_line_squared(p: &Vec3, lp1: &Vec3, lp2: &Vec3, dir: &Vec3) -> f32 {
    let proj = project_point_onto_vector(p, lp1, dir);
    let outside = (0..3).find(|&j| {
        (proj[j] > lp1[j] && proj[j] > lp2[j]) || (proj[j] < lp1[j] && proj[j] < lp2[j])
    });
    if let Some(j) = outside {
        let t = if (proj[j] - lp1[j]).abs() < (proj[j] - lp2[j]).abs() {
            vector_subtract(p, lp1)
        } else {
            vector_subtract(p, lp2)
        };
        return vector_length_squared(&t);
    }
    vector_length_squared(&vector_subtract(p, &proj))
}

fn record_body_hit(tw: &mut TraceWork, fraction: f32, normal: Vec3, intersection: &Vec3) {
    let plane = CPlane::new(normal, dot_product(&normal, intersection));
    tw.record_hit(fraction, plane, SurfaceFlags::empty(), Contents::BODY, HitSource::TempModel);
}

/// Sweeps the point `start`..`end` against a sphere at `origin`.
fn trace_through_sphere(tw: &mut TraceWork, origin: &Vec3, radius: f32, start: &Vec3, end: &Vec3) {
    // if inside the sphere
    let dir = vector_subtract(start, origin);
    if vector_length_squared(&dir) < radius * radius {
        tw.trace.startsolid = true;
        // test for allsolid
        let dir = vector_subtract(end, origin);
        if vector_length_squared(&dir) < radius * radius {
            tw.record_solid(Contents::BODY, HitSource::TempModel);
        }
        return;
    }

    let mut dir = vector_subtract(end, start);
    let length = vector_normalize(&mut dir);

    let l1 = distance_from_line_squared(origin, start, end, &dir);
    let l2 = vector_length_squared(&vector_subtract(end, origin));
    // if no intersection with the sphere and the end point is at least an epsilon away
    if l1 >= radius * radius && l2 > (radius + SURFACE_CLIP_EPSILON) * (radius + SURFACE_CLIP_EPSILON) {
        return;
    }

    // |origin - (start + t * dir)| = radius, dir is normalized so a = 1
    let v1 = vector_subtract(start, origin);
    let b = 2.0 * dot_product(&dir, &v1);
    let c = dot_product(&v1, &v1) - (radius + RADIUS_EPSILON) * (radius + RADIUS_EPSILON);
    let d = b * b - 4.0 * c;
    if d > 0.0 {
        let mut fraction = (-b - d.sqrt()) * 0.5;
        if fraction < 0.0 {
            fraction = 0.0;
        } else if length > 0.0 {
            fraction /= length;
        }
        if tw.improves(fraction, HitSource::TempModel) {
            let intersection = vector_ma(start, fraction, &vector_subtract(end, start));
            let scale = 1.0 / (radius + RADIUS_EPSILON);
            let normal = vector_scale(&vector_subtract(&intersection, origin), scale);
            record_body_hit(tw, fraction, normal, &intersection);
        }
    }
    // d == 0 slides along the sphere, d < 0 misses
}

/// Sweeps against an upright cylinder of `halfheight` around `origin`.
fn trace_through_vertical_cylinder(
    tw: &mut TraceWork,
    origin: &Vec3,
    radius: f32,
    halfheight: f32,
    start: &Vec3,
    end: &Vec3,
) {
    // 2d coordinates
    let start2d = [start[0], start[1], 0.0];
    let end2d = [end[0], end[1], 0.0];
    let org2d = [origin[0], origin[1], 0.0];

    // if between lower and upper cylinder bounds
    if start[2] <= origin[2] + halfheight && start[2] >= origin[2] - halfheight {
        // if inside the cylinder
        let dir = vector_subtract(&start2d, &org2d);
        if vector_length_squared(&dir) < radius * radius {
            tw.trace.startsolid = true;
            let dir = vector_subtract(&end2d, &org2d);
            if vector_length_squared(&dir) < radius * radius {
                tw.record_solid(Contents::BODY, HitSource::TempModel);
            }
            return;
        }
    }

    let mut dir = vector_subtract(&end2d, &start2d);
    let length = vector_normalize(&mut dir);

    let l1 = distance_from_line_squared(&org2d, &start2d, &end2d, &dir);
    let l2 = vector_length_squared(&vector_subtract(&end2d, &org2d));
    // if no intersection with the cylinder and the end point is at least an epsilon away
    if l1 >= radius * radius && l2 > (radius + SURFACE_CLIP_EPSILON) * (radius + SURFACE_CLIP_EPSILON) {
        return;
    }

    let v1 = vector_subtract(start, origin);
    // dir is normalized so we can use a = 1
    let b = 2.0 * (v1[0] * dir[0] + v1[1] * dir[1]);
    let c = v1[0] * v1[0] + v1[1] * v1[1] - (radius + RADIUS_EPSILON) * (radius + RADIUS_EPSILON);
    let d = b * b - 4.0 * c;
    if d > 0.0 {
        let mut fraction = (-b - d.sqrt()) * 0.5;
        if fraction < 0.0 {
            fraction = 0.0;
        } else if length > 0.0 {
            fraction /= length;
        }
        if tw.improves(fraction, HitSource::TempModel) {
            let intersection = vector_ma(start, fraction, &vector_subtract(end, start));
            // if the intersection is between the cylinder lower and upper bound
            if intersection[2] <= origin[2] + halfheight && intersection[2] >= origin[2] - halfheight {
                let scale = 1.0 / (radius + RADIUS_EPSILON);
                let mut normal = vector_subtract(&intersection, origin);
                normal[2] = 0.0;
                let normal = vector_scale(&normal, scale);
                record_body_hit(tw, fraction, normal, &intersection);
            }
        }
    }
}

/// Center, sphere radius and sphere offset of a capsule filling `mins`/`maxs`.
fn capsule_from_bounds(mins: &Vec3, maxs: &Vec3) -> (Vec3, SphereShape) {
    let mut center = [0.0f32; 3];
    let mut half = [0.0f32; 3];
    for i in 0..3 {
        center[i] = (mins[i] + maxs[i]) * 0.5;
        half[i] = maxs[i] - center[i];
    }
    (center, SphereShape::for_half_size(&half))
}

// ============================================================
// World traces
// ============================================================

/// How the caller wants the moving shape built.
#[derive(Debug, Clone, Copy)]
enum ShapeRequest {
    Box,
    /// Capsule filling the box, or an explicit (rotated) sphere setup.
    Capsule(Option<SphereShape>),
    BiSphere { start_radius: f32, end_radius: f32 },
}

impl ClipMap {
    fn trace_through_leaf(&self, tw: &mut TraceWork, leaf: &CLeaf) {
        // trace line against all brushes in the leaf
        for &brushnum in &self.leaf_brushes[leaf.first_leaf_brush..leaf.first_leaf_brush + leaf.num_leaf_brushes] {
            if !tw.checked_brushes.insert(brushnum) {
                continue; // already checked this brush in another leaf
            }
            let b = &self.brushes[brushnum];
            if !b.contents.intersects(tw.contents) {
                continue;
            }
            if !bounds_intersect(&tw.bounds[0], &tw.bounds[1], &b.bounds[0], &b.bounds[1]) {
                continue;
            }
            trace_through_brush(tw, b, &self.brush_sides, &self.planes, HitSource::Brush(brushnum));
            if tw.trace.allsolid {
                return;
            }
        }

        // trace line against all patches in the leaf
        if self.config.no_curves || (tw.is_point && !self.config.player_curve_clip) {
            return;
        }
        for &surfnum in &self.leaf_surfaces[leaf.first_leaf_surface..leaf.first_leaf_surface + leaf.num_leaf_surfaces] {
            let Some(patch) = &self.surfaces[surfnum] else {
                continue;
            };
            if !tw.checked_patches.insert(surfnum) {
                continue;
            }
            if !patch.contents.intersects(tw.contents) {
                continue;
            }
            if let Some(hit) = patch.pc.sweep(tw) {
                tw.record_hit(
                    hit.fraction,
                    CPlane::new(hit.normal, hit.dist),
                    patch.surface_flags,
                    patch.contents,
                    HitSource::Patch(surfnum),
                );
            }
        }
    }

    fn test_in_leaf(&self, tw: &mut TraceWork, leaf: &CLeaf) {
        // test box position against all brushes in the leaf
        for &brushnum in &self.leaf_brushes[leaf.first_leaf_brush..leaf.first_leaf_brush + leaf.num_leaf_brushes] {
            if !tw.checked_brushes.insert(brushnum) {
                continue;
            }
            let b = &self.brushes[brushnum];
            if !b.contents.intersects(tw.contents) {
                continue;
            }
            test_box_in_brush(tw, b, &self.brush_sides, &self.planes, HitSource::Brush(brushnum));
        }

        // test against all patches
        if self.config.no_curves {
            return;
        }
        for &surfnum in &self.leaf_surfaces[leaf.first_leaf_surface..leaf.first_leaf_surface + leaf.num_leaf_surfaces] {
            let Some(patch) = &self.surfaces[surfnum] else {
                continue;
            };
            if !tw.checked_patches.insert(surfnum) {
                continue;
            }
            if !patch.contents.intersects(tw.contents) {
                continue;
            }
            if patch.pc.position_test(tw) {
                tw.record_solid(patch.contents, HitSource::Patch(surfnum));
            }
        }
    }

    /// Tests the shape at `tw.start` against every leaf it touches.
    fn position_test(&self, tw: &mut TraceWork) {
        // identify the leafs we are touching
        let mut mins = vector_add(&tw.start, &tw.size[0]);
        let mut maxs = vector_add(&tw.start, &tw.size[1]);
        for i in 0..3 {
            mins[i] -= BOX_LEAF_EPSILON;
            maxs[i] += BOX_LEAF_EPSILON;
        }
        self.box_leafs_r(&mins, &maxs, self.root_node(), &mut |leafnum| {
            self.test_in_leaf(tw, &self.leafs[leafnum]);
        });
    }

    /// Walks the tree along `p1`..`p2`, entering every leaf the swept shape
    /// can touch, nearest first.
    fn trace_through_tree(&self, tw: &mut TraceWork, num: i32, p1f: f32, p2f: f32, p1: &Vec3, p2: &Vec3) {
        if tw.trace.fraction < p1f || tw.trace.allsolid {
            return; // already hit something nearer
        }

        // if < 0, we are in a leaf node
        if num < 0 {
            self.trace_through_leaf(tw, &self.leafs[(-1 - num) as usize]);
            return;
        }

        // find the point distances to the separating plane
        // and the offset for the size of the box
        let node = &self.nodes[num as usize];
        let plane = &self.planes[node.plane];

        let (t1, t2, offset) = if plane.plane_type < PLANE_NON_AXIAL {
            let t = plane.plane_type as usize;
            (p1[t] - plane.dist, p2[t] - plane.dist, tw.extents[t])
        } else {
            let offset = if tw.is_point {
                0.0
            } else {
                // an axial brush right behind a slanted bsp plane
                // will poke through when expanded, so go both ways
                2048.0
            };
            (
                dot_product(&plane.normal, p1) - plane.dist,
                dot_product(&plane.normal, p2) - plane.dist,
                offset,
            )
        };

        // see which sides we need to consider
        if t1 >= offset + 1.0 && t2 >= offset + 1.0 {
            self.trace_through_tree(tw, node.children[0], p1f, p2f, p1, p2);
            return;
        }
        if t1 < -offset - 1.0 && t2 < -offset - 1.0 {
            self.trace_through_tree(tw, node.children[1], p1f, p2f, p1, p2);
            return;
        }

        // put the crosspoint SURFACE_CLIP_EPSILON pixels on the near side
        let (side, frac, frac2) = if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            (
                1,
                (t1 - offset + SURFACE_CLIP_EPSILON) * idist,
                (t1 + offset + SURFACE_CLIP_EPSILON) * idist,
            )
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            (
                0,
                (t1 + offset + SURFACE_CLIP_EPSILON) * idist,
                (t1 - offset - SURFACE_CLIP_EPSILON) * idist,
            )
        } else {
            (0, 1.0, 0.0)
        };

        // move up to the node
        let frac = frac.clamp(0.0, 1.0);
        let midf = p1f + (p2f - p1f) * frac;
        let mid = vector_ma(p1, frac, &vector_subtract(p2, p1));
        self.trace_through_tree(tw, node.children[side], p1f, midf, p1, &mid);

        // go past the node
        let frac2 = frac2.clamp(0.0, 1.0);
        let midf = p1f + (p2f - p1f) * frac2;
        let mid = vector_ma(p1, frac2, &vector_subtract(p2, p1));
        self.trace_through_tree(tw, node.children[side ^ 1], midf, p2f, &mid, p2);
    }

    /// Sweeps a capsule against the temp capsule model.
    fn trace_capsule_through_capsule(&self, tw: &mut TraceWork, sphere: &SphereShape) {
        if !tw.contents.intersects(Contents::BODY) {
            return;
        }
        let mins = self.temp_box.mins;
        let maxs = self.temp_box.maxs;
        // test trace bounds vs. capsule bounds
        for i in 0..3 {
            if tw.bounds[0][i] > maxs[i] + RADIUS_EPSILON || tw.bounds[1][i] < mins[i] - RADIUS_EPSILON {
                return;
            }
        }

        // top origin and bottom origin of each sphere at start and end of trace
        let starttop = vector_add(&tw.start, &sphere.offset);
        let startbottom = vector_subtract(&tw.start, &sphere.offset);
        let endtop = vector_add(&tw.end, &sphere.offset);
        let endbottom = vector_subtract(&tw.end, &sphere.offset);

        // calculate top and bottom of the capsule spheres to collide with
        let (center, model) = capsule_from_bounds(&mins, &maxs);
        let offs = model.halfheight - model.radius;
        let top = [center[0], center[1], center[2] + offs];
        let bottom = [center[0], center[1], center[2] - offs];

        // expand radius of spheres
        let radius = model.radius + sphere.radius;

        // if there is horizontal movement
        if tw.start[0] != tw.end[0] || tw.start[1] != tw.end[1] {
            // height of the expanded cylinder is the height of both cylinders
            // minus the radius of both spheres
            let h = model.halfheight + sphere.halfheight - radius;
            if h > 0.0 {
                let (start, end) = (tw.start, tw.end);
                trace_through_vertical_cylinder(tw, &center, radius, h, &start, &end);
            }
        }

        // test for collision between the spheres
        trace_through_sphere(tw, &top, radius, &startbottom, &endbottom);
        trace_through_sphere(tw, &bottom, radius, &starttop, &endtop);
    }

    fn test_capsule_in_capsule(&self, tw: &mut TraceWork, sphere: &SphereShape) {
        if !tw.contents.intersects(Contents::BODY) {
            return;
        }
        let top = vector_add(&tw.start, &sphere.offset);
        let bottom = vector_subtract(&tw.start, &sphere.offset);

        let (center, model) = capsule_from_bounds(&self.temp_box.mins, &self.temp_box.maxs);
        let offs = model.halfheight - model.radius;
        let p1 = [center[0], center[1], center[2] + offs];
        let p2 = [center[0], center[1], center[2] - offs];
        let r = (sphere.radius + model.radius) * (sphere.radius + model.radius);

        // check if any of the spheres overlap
        let spheres_overlap = [(&p1, &top), (&p1, &bottom), (&p2, &top), (&p2, &bottom)]
            .iter()
            .any(|(a, b)| vector_length_squared(&vector_subtract(a, b)) < r);

        // if the axis segments share a height, compare the cylinders in 2d
        let cylinders_overlap = bottom[2] <= p1[2] && top[2] >= p2[2] && {
            let dx = top[0] - p1[0];
            let dy = top[1] - p1[1];
            dx * dx + dy * dy < r
        };

        if spheres_overlap || cylinders_overlap {
            tw.record_solid(Contents::BODY, HitSource::TempModel);
        }
    }

    /// Swaps roles: the capsule model sweeps against the moving box. The
    /// Minkowski sum of two centered shapes is the same either way.
    fn trace_box_through_capsule(&self, tw: &mut TraceWork, position_test: bool) {
        let (center, sphere) = capsule_from_bounds(&self.temp_box.mins, &self.temp_box.maxs);
        let start = vector_subtract(&tw.start, &center);
        let end = vector_subtract(&tw.end, &center);
        let half = sphere.halfheight;
        let size = [
            [-sphere.radius, -sphere.radius, -half],
            [sphere.radius, sphere.radius, half],
        ];
        let mut swapped = TraceWork::new(start, end, size, tw.contents, TraceShape::Capsule(sphere));
        let hull = BoxHull::new(&tw.size[0], &tw.size[1]);
        if hull.brush.contents.intersects(tw.contents) {
            if position_test {
                test_box_in_brush(&mut swapped, &hull.brush, &hull.sides, &hull.planes, HitSource::TempModel);
            } else {
                trace_through_brush(&mut swapped, &hull.brush, &hull.sides, &hull.planes, HitSource::TempModel);
            }
        }
        let mut result = swapped.trace;
        // back to model space
        result.plane.dist += dot_product(&result.plane.normal, &center);
        tw.trace = result;
    }

    fn trace_against_temp_box(&self, tw: &mut TraceWork, position_test: bool) {
        let hull = BoxHull::new(&self.temp_box.mins, &self.temp_box.maxs);
        if !hull.brush.contents.intersects(tw.contents) {
            return;
        }
        if position_test {
            test_box_in_brush(tw, &hull.brush, &hull.sides, &hull.planes, HitSource::TempModel);
        } else {
            trace_through_brush(tw, &hull.brush, &hull.sides, &hull.planes, HitSource::TempModel);
        }
    }

    /// The shared sweep behind every public trace. `start`/`end` are in
    /// model space.
    fn trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        request: ShapeRequest,
    ) -> Trace {
        // adjust so that mins and maxs are always symmetric, which
        // avoids some complications with plane expanding of rotated bmodels
        let mut size = [[0.0f32; 3]; 2];
        let mut tstart = [0.0f32; 3];
        let mut tend = [0.0f32; 3];
        for i in 0..3 {
            let offset = (mins[i] + maxs[i]) * 0.5;
            size[0][i] = mins[i] - offset;
            size[1][i] = maxs[i] - offset;
            tstart[i] = start[i] + offset;
            tend[i] = end[i] + offset;
        }

        let shape = match request {
            ShapeRequest::Box => TraceShape::Aabb,
            ShapeRequest::Capsule(Some(sphere)) => TraceShape::Capsule(sphere),
            ShapeRequest::Capsule(None) => TraceShape::Capsule(SphereShape::for_half_size(&size[1])),
            ShapeRequest::BiSphere {
                start_radius,
                end_radius,
            } => TraceShape::BiSphere {
                start_radius,
                end_radius,
            },
        };

        let mut tw = TraceWork::new(tstart, tend, size, brushmask, shape);
        tw.checked_brushes = VisitSet::new(self.brushes.len());
        tw.checked_patches = VisitSet::new(self.surfaces.len());

        let position_test = start == end;
        match (model, shape) {
            (CAPSULE_MODEL_HANDLE, TraceShape::Capsule(sphere)) => {
                if position_test {
                    self.test_capsule_in_capsule(&mut tw, &sphere);
                } else {
                    self.trace_capsule_through_capsule(&mut tw, &sphere);
                }
            }
            (CAPSULE_MODEL_HANDLE, TraceShape::Aabb) => {
                self.trace_box_through_capsule(&mut tw, position_test);
            }
            (BOX_MODEL_HANDLE, _) | (CAPSULE_MODEL_HANDLE, _) => {
                self.trace_against_temp_box(&mut tw, position_test);
            }
            (0, _) => {
                if position_test {
                    self.position_test(&mut tw);
                } else {
                    let (s, e) = (tw.start, tw.end);
                    self.trace_through_tree(&mut tw, self.root_node(), 0.0, 1.0, &s, &e);
                }
            }
            (_, _) => {
                let leaf = self.clip_handle_to_model(model).leaf;
                if position_test {
                    self.test_in_leaf(&mut tw, &leaf);
                } else {
                    self.trace_through_leaf(&mut tw, &leaf);
                }
            }
        }

        let mut result = tw.trace;
        // generate endpos from the original, unmodified start/end
        result.endpos = if result.fraction == 1.0 {
            *end
        } else {
            vector_ma(start, result.fraction, &vector_subtract(end, start))
        };
        result
    }

    /// Runs a trace in the frame of a model placed at `origin`/`angles`
    /// and brings the result back to world space.
    #[allow(clippy::too_many_arguments)]
    fn transformed_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
        request: ShapeRequest,
    ) -> Trace {
        // subtract origin offset
        let mut start_l = vector_subtract(start, origin);
        let mut end_l = vector_subtract(end, origin);

        // temp models are never rotated
        let rotation: Option<Matrix3> = if model != BOX_MODEL_HANDLE
            && model != CAPSULE_MODEL_HANDLE
            && (angles[0] != 0.0 || angles[1] != 0.0 || angles[2] != 0.0)
        {
            Some(create_rotation_matrix(angles))
        } else {
            None
        };

        let mut request = request;
        if let Some(matrix) = &rotation {
            // rotate the trace line instead of the bmodel; exact for
            // spheres, capsules tilt with the model
            start_l = rotate_point(&start_l, matrix);
            end_l = rotate_point(&end_l, matrix);
            if let ShapeRequest::Capsule(None) = request {
                let mut half = [0.0f32; 3];
                for i in 0..3 {
                    half[i] = (maxs[i] - mins[i]) * 0.5;
                }
                let mut sphere = SphereShape::for_half_size(&half);
                sphere.offset = rotate_point(&sphere.offset, matrix);
                request = ShapeRequest::Capsule(Some(sphere));
            }
            // the box offset rotates with the trace line; trace() adds the
            // unrotated offset back, so hand it R(c) - c
            let mut center = [0.0f32; 3];
            for i in 0..3 {
                center[i] = (mins[i] + maxs[i]) * 0.5;
            }
            if center != VEC3_ORIGIN {
                let shift = vector_subtract(&rotate_point(&center, matrix), &center);
                start_l = vector_add(&start_l, &shift);
                end_l = vector_add(&end_l, &shift);
            }
        }

        let mut trace = self.trace(&start_l, &end_l, mins, maxs, model, brushmask, request);

        if trace.fraction != 1.0 {
            if let Some(matrix) = &rotation {
                // rotation of bmodel collision plane
                let transpose = transpose_matrix(matrix);
                trace.plane.normal = rotate_point(&trace.plane.normal, &transpose);
            }
            trace.plane.dist += dot_product(&trace.plane.normal, origin);
            trace.plane = CPlane::new(trace.plane.normal, trace.plane.dist);
        }

        // re-calculate the end position of the trace because the trace.endpos
        // calculated by trace() could be rotated and have an offset
        trace.endpos = if trace.fraction == 1.0 {
            *end
        } else {
            vector_ma(start, trace.fraction, &vector_subtract(end, start))
        };
        trace
    }

    // ============================================================
    // Public traces
    // ============================================================

    /// Sweeps an axis-aligned box from `start` to `end`. Zero `mins`/`maxs`
    /// trace a point; `start == end` tests the position only.
    pub fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        self.trace(start, end, mins, maxs, model, brushmask, ShapeRequest::Box)
    }

    /// Sweeps the upright capsule that fills `mins`/`maxs`.
    pub fn capsule_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        self.trace(start, end, mins, maxs, model, brushmask, ShapeRequest::Capsule(None))
    }

    /// Sweeps a sphere whose radius goes from `start_radius` to `end_radius`.
    pub fn bisphere_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        start_radius: f32,
        end_radius: f32,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        let r = start_radius.max(end_radius);
        self.trace(
            start,
            end,
            &[-r, -r, -r],
            &[r, r, r],
            model,
            brushmask,
            ShapeRequest::BiSphere {
                start_radius,
                end_radius,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transformed_box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        self.transformed_trace(start, end, mins, maxs, model, brushmask, origin, angles, ShapeRequest::Box)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transformed_capsule_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        self.transformed_trace(
            start,
            end,
            mins,
            maxs,
            model,
            brushmask,
            origin,
            angles,
            ShapeRequest::Capsule(None),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transformed_bisphere_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        start_radius: f32,
        end_radius: f32,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        let r = start_radius.max(end_radius);
        self.transformed_trace(
            start,
            end,
            &[-r, -r, -r],
            &[r, r, r],
            model,
            brushmask,
            origin,
            angles,
            ShapeRequest::BiSphere {
                start_radius,
                end_radius,
            },
        )
    }
}
