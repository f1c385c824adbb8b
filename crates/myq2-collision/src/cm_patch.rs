// cm_patch.rs — curved surface collision
//
// A patch is a grid of quadratic Bezier control points. At load time the
// grid is subdivided until every segment is within SUBDIVIDE_DISTANCE of
// the curve, then each grid cell becomes one or two convex facets. A
// facet is its surface plane plus border planes shared with neighbouring
// cells, so adjacent facets clip against exactly the same plane and a
// point on a shared edge belongs to one side only.
//
// Facets are also bevelled with axial and edge planes so that swept boxes
// cannot slip through the seams between them.

use crate::cm_local::SURFACE_CLIP_EPSILON;
use crate::cm_trace::TraceWork;
use crate::error::{check_limit, CmError, CmResult};
use crate::polylib::{base_winding_for_plane, chop_winding_in_place, winding_bounds, Winding, MAX_MAP_BOUNDS};
use crate::q_shared::{
    add_point_to_bounds, bounds_intersect, clear_bounds, cross_product, dot_product, signbits_for_normal,
    vector_length, vector_ma, vector_negate, vector_normalize, vector_subtract, Vec3,
};
use log::{debug, warn};

pub const MAX_FACETS: usize = 1024;
pub const MAX_PATCH_PLANES: usize = 2048;
pub const MAX_GRID_SIZE: usize = 129;

/// Maximum distance between the curve and its flat approximation.
pub const SUBDIVIDE_DISTANCE: f32 = 16.0;
/// Triangle corners within this distance of a plane lie on it.
pub const PLANE_TRI_EPSILON: f32 = 0.1;
/// Grid edges this close together are treated as a wrapped seam.
pub const WRAP_POINT_EPSILON: f32 = 0.1;

const POINT_EPSILON: f32 = 0.1;
const NORMAL_EPSILON: f32 = 0.0001;
const DIST_EPSILON: f32 = 0.02;
const BEVEL_CHOP_EPSILON: f32 = 0.1;

/// More borders than this means the bevel code went wrong.
const MAX_FACET_BORDERS: usize = 4 + 6 + 16;

// ============================================================
// Collision data
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub signbits: u8,
}

impl PatchPlane {
    fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            signbits: signbits_for_normal(&normal),
        }
    }

    #[inline]
    fn distance(&self, p: &Vec3) -> f32 {
        dot_product(&self.normal, p) - self.dist
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacetBorder {
    pub plane: usize,
    /// The facet lies in front of this plane.
    pub inward: bool,
    pub no_adjust: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Facet {
    pub surface_plane: usize,
    pub borders: Vec<FacetBorder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchCollide {
    /// Grid bounds grown by one unit.
    pub bounds: [Vec3; 2],
    pub planes: Vec<PatchPlane>,
    pub facets: Vec<Facet>,
}

/// Closest facet impact found by a patch sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchHit {
    pub fraction: f32,
    pub normal: Vec3,
    pub dist: f32,
}

// ============================================================
// Grid
// ============================================================

/// Column-major point grid: `points[i][j]` is column i, row j.
#[derive(Debug, Clone)]
struct Grid {
    width: usize,
    height: usize,
    wrap_width: bool,
    wrap_height: bool,
    points: Vec<Vec<Vec3>>,
}

impl Grid {
    fn from_control_points(width: usize, height: usize, points: &[Vec3]) -> Self {
        let points = (0..width)
            .map(|i| (0..height).map(|j| points[j * width + i]).collect())
            .collect();
        Self {
            width,
            height,
            wrap_width: false,
            wrap_height: false,
            points,
        }
    }

    /// A grid wraps when its first and last columns coincide.
    fn set_wrap_width(&mut self) {
        let last = self.width - 1;
        self.wrap_width = (0..self.height).all(|j| {
            (0..3).all(|k| {
                let d = self.points[0][j][k] - self.points[last][j][k];
                (-WRAP_POINT_EPSILON..=WRAP_POINT_EPSILON).contains(&d)
            })
        });
    }

    /// Adds columns until the horizontal curves are within
    /// SUBDIVIDE_DISTANCE, and drops control columns that are already flat.
    fn subdivide_columns(&mut self) -> CmResult<()> {
        let mut i = 0;
        while i + 2 < self.width {
            // first see if we can collapse the approximating column away
            let flat = (0..self.height).all(|j| {
                !needs_subdivision(
                    &self.points[i][j],
                    &self.points[i + 1][j],
                    &self.points[i + 2][j],
                )
            });
            if flat {
                self.points.remove(i + 1);
                self.width -= 1;
                // go to the next curve segment
                i += 1;
                continue;
            }

            // we need to subdivide the curve
            check_limit("patch grid width", self.width + 2, MAX_GRID_SIZE)?;
            let mut out1 = Vec::with_capacity(self.height);
            let mut out2 = Vec::with_capacity(self.height);
            let mut out3 = Vec::with_capacity(self.height);
            for j in 0..self.height {
                let (a, b, c) = subdivide(
                    &self.points[i][j],
                    &self.points[i + 1][j],
                    &self.points[i + 2][j],
                );
                out1.push(a);
                out2.push(b);
                out3.push(c);
            }
            self.points[i + 1] = out1;
            self.points.insert(i + 2, out2);
            self.points.insert(i + 3, out3);
            self.width += 2;
            // the new approximating point at i+1 may need to be removed
            // or subdivided farther, so don't advance i
        }
        Ok(())
    }

    /// Removes columns whose points all match the next column's.
    fn remove_degenerate_columns(&mut self) {
        let mut i = 0;
        while i + 1 < self.width {
            let degenerate = (0..self.height)
                .all(|j| compare_points(&self.points[i][j], &self.points[i + 1][j]));
            if degenerate {
                self.points.remove(i + 1);
                self.width -= 1;
                // check against the next column
                continue;
            }
            i += 1;
        }
    }

    fn transpose(&mut self) {
        let mut points = vec![Vec::with_capacity(self.width); self.height];
        for (j, column) in points.iter_mut().enumerate() {
            for i in 0..self.width {
                column.push(self.points[i][j]);
            }
        }
        self.points = points;
        std::mem::swap(&mut self.width, &mut self.height);
        std::mem::swap(&mut self.wrap_width, &mut self.wrap_height);
    }
}

fn needs_subdivision(a: &Vec3, b: &Vec3, c: &Vec3) -> bool {
    let mut delta = [0.0f32; 3];
    for i in 0..3 {
        let lmid = 0.5 * (a[i] + c[i]);
        let cmid = 0.5 * (0.5 * (a[i] + b[i]) + 0.5 * (b[i] + c[i]));
        delta[i] = cmid - lmid;
    }
    vector_length(&delta) >= SUBDIVIDE_DISTANCE
}

/// Splits a quadratic curve at its midpoint into two control triples
/// `(a, out1, out2)` and `(out2, out3, c)`.
fn subdivide(a: &Vec3, b: &Vec3, c: &Vec3) -> (Vec3, Vec3, Vec3) {
    let mut out1 = [0.0f32; 3];
    let mut out2 = [0.0f32; 3];
    let mut out3 = [0.0f32; 3];
    for i in 0..3 {
        out1[i] = 0.5 * (a[i] + b[i]);
        out3[i] = 0.5 * (b[i] + c[i]);
        out2[i] = 0.5 * (out1[i] + out3[i]);
    }
    (out1, out2, out3)
}

fn compare_points(a: &Vec3, b: &Vec3) -> bool {
    (0..3).all(|i| (a[i] - b[i]).abs() <= POINT_EPSILON)
}

// ============================================================
// Facet construction
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeSide {
    Front,
    Back,
    On,
}

/// Which part of a grid cell a facet covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellPart {
    Quad,
    Tri0,
    Tri1,
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Top,
    Right,
    Bottom,
    Left,
    Diagonal0,
    Diagonal1,
}

/// Border candidate while a facet is being built; `None` planes are
/// resolved or the facet is rejected.
#[derive(Debug, Clone, Copy)]
struct PendingBorder {
    plane: Option<usize>,
    inward: bool,
    no_adjust: bool,
}

/// Planes per grid cell: `[triangle 0, triangle 1]`, `None` if degenerate.
type GridPlanes = Vec<Vec<[Option<usize>; 2]>>;

struct PatchBuilder {
    planes: Vec<PatchPlane>,
    facets: Vec<Facet>,
}

impl PatchBuilder {
    fn new() -> Self {
        Self {
            planes: Vec::new(),
            facets: Vec::new(),
        }
    }

    fn add_plane(&mut self, normal: Vec3, dist: f32) -> CmResult<usize> {
        check_limit("patch planes", self.planes.len() + 1, MAX_PATCH_PLANES)?;
        self.planes.push(PatchPlane::new(normal, dist));
        Ok(self.planes.len() - 1)
    }

    /// Plane through three points, reusing an existing plane that all
    /// three points lie on.
    fn find_plane(&mut self, p1: &Vec3, p2: &Vec3, p3: &Vec3) -> CmResult<Option<usize>> {
        let Some((normal, dist)) = plane_from_points(p1, p2, p3) else {
            return Ok(None);
        };

        // see if the points are close enough to an existing plane
        for (i, plane) in self.planes.iter().enumerate() {
            if dot_product(&normal, &plane.normal) < 0.0 {
                continue; // allow backwards planes?
            }
            let on = [p1, p2, p3].iter().all(|p| {
                let d = plane.distance(p);
                (-PLANE_TRI_EPSILON..=PLANE_TRI_EPSILON).contains(&d)
            });
            if on {
                return Ok(Some(i));
            }
        }

        self.add_plane(normal, dist).map(Some)
    }

    /// Exact plane lookup used for bevels. Returns the plane index and
    /// whether the stored plane faces the other way.
    fn find_plane_exact(&mut self, normal: &Vec3, dist: f32) -> CmResult<(usize, bool)> {
        for (i, plane) in self.planes.iter().enumerate() {
            if let Some(flipped) = plane_equal(plane, normal, dist) {
                return Ok((i, flipped));
            }
        }
        Ok((self.add_plane(*normal, dist)?, false))
    }

    fn point_on_plane_side(&self, p: &Vec3, plane: Option<usize>) -> EdgeSide {
        let Some(plane) = plane else {
            return EdgeSide::On;
        };
        let d = self.planes[plane].distance(p);
        if d > PLANE_TRI_EPSILON {
            EdgeSide::Front
        } else if d < -PLANE_TRI_EPSILON {
            EdgeSide::Back
        } else {
            EdgeSide::On
        }
    }

    fn grid_plane(&self, grid_planes: &GridPlanes, i: usize, j: usize, tri: usize) -> Option<usize> {
        let p = grid_planes[i][j][tri].or(grid_planes[i][j][1 - tri]);
        if p.is_none() {
            // should never happen
            warn!("grid_plane: unresolvable");
        }
        p
    }

    /// Plane perpendicular to the surface along one edge of a cell.
    fn edge_plane(
        &mut self,
        grid: &Grid,
        grid_planes: &GridPlanes,
        i: usize,
        j: usize,
        edge: Edge,
    ) -> CmResult<Option<usize>> {
        let pts = &grid.points;
        let (p1, p2, tri, reversed) = match edge {
            Edge::Top => (pts[i][j], pts[i + 1][j], 0, false),
            Edge::Bottom => (pts[i][j + 1], pts[i + 1][j + 1], 1, true),
            Edge::Left => (pts[i][j], pts[i][j + 1], 1, true),
            Edge::Right => (pts[i + 1][j], pts[i + 1][j + 1], 0, false),
            Edge::Diagonal0 => (pts[i + 1][j + 1], pts[i][j], 0, false),
            Edge::Diagonal1 => (pts[i][j], pts[i + 1][j + 1], 1, false),
        };
        let Some(p) = self.grid_plane(grid_planes, i, j, tri) else {
            return Ok(None);
        };
        let up = vector_ma(&p1, 4.0, &self.planes[p].normal);
        if reversed {
            self.find_plane(&p2, &p1, &up)
        } else {
            self.find_plane(&p1, &p2, &up)
        }
    }

    /// Flags each border as facing into the facet or away from it.
    fn set_border_inward(&self, borders: &mut [PendingBorder], grid: &Grid, i: usize, j: usize, part: CellPart) {
        let pts = &grid.points;
        let corners: Vec<Vec3> = match part {
            CellPart::Quad => vec![pts[i][j], pts[i + 1][j], pts[i + 1][j + 1], pts[i][j + 1]],
            CellPart::Tri0 => vec![pts[i][j], pts[i + 1][j], pts[i + 1][j + 1]],
            CellPart::Tri1 => vec![pts[i + 1][j + 1], pts[i][j + 1], pts[i][j]],
        };

        for border in borders.iter_mut() {
            let mut front = 0;
            let mut back = 0;
            for p in &corners {
                match self.point_on_plane_side(p, border.plane) {
                    EdgeSide::Front => front += 1,
                    EdgeSide::Back => back += 1,
                    EdgeSide::On => {}
                }
            }

            if front > 0 && back == 0 {
                border.inward = true;
            } else if back > 0 && front == 0 {
                border.inward = false;
            } else if front == 0 && back == 0 {
                // flat side border
                border.plane = None;
            } else {
                // bisecting side border
                debug!("set_border_inward: mixed plane sides");
                border.inward = false;
            }
        }
    }

    /// The surface plane chopped by every border, or `None` if the border
    /// set is incomplete or leaves nothing.
    fn facet_winding(&self, surface_plane: usize, borders: &[FacetBorder]) -> Option<Winding> {
        let surface = &self.planes[surface_plane];
        let mut w = base_winding_for_plane(&surface.normal, surface.dist)?;
        for border in borders {
            if border.plane == surface_plane {
                continue;
            }
            let (normal, dist) = self.oriented(border);
            chop_winding_in_place(&mut w, &normal, dist, BEVEL_CHOP_EPSILON);
            if w.is_empty() {
                return None;
            }
        }
        Some(w)
    }

    /// A border plane turned so the facet is on its front side.
    fn oriented(&self, border: &FacetBorder) -> (Vec3, f32) {
        let p = &self.planes[border.plane];
        if border.inward {
            (p.normal, p.dist)
        } else {
            (vector_negate(&p.normal), -p.dist)
        }
    }

    /// Rejects facets missing a border or so big a plane must be missing.
    fn validate_facet(&self, surface_plane: Option<usize>, pending: &[PendingBorder]) -> Option<Facet> {
        let surface_plane = surface_plane?;
        let borders = pending
            .iter()
            .map(|b| {
                b.plane.map(|plane| FacetBorder {
                    plane,
                    inward: b.inward,
                    no_adjust: b.no_adjust,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        let w = self.facet_winding(surface_plane, &borders)?;
        let (mins, maxs) = winding_bounds(&w);
        for j in 0..3 {
            if maxs[j] - mins[j] > MAX_MAP_BOUNDS {
                return None; // we must be missing a plane
            }
            if mins[j] >= MAX_MAP_BOUNDS || maxs[j] <= -MAX_MAP_BOUNDS {
                return None;
            }
        }
        Some(Facet { surface_plane, borders })
    }

    /// Adds axial and edge bevels so swept boxes collide with the facet's
    /// corners, then the surface plane as the back side.
    fn add_facet_bevels(&mut self, facet: &mut Facet) -> CmResult<()> {
        let Some(w) = self.facet_winding(facet.surface_plane, &facet.borders) else {
            return Ok(());
        };
        let (mins, maxs) = winding_bounds(&w);

        // add the axial planes
        for axis in 0..3 {
            for dir in [-1.0f32, 1.0] {
                let mut normal = [0.0f32; 3];
                normal[axis] = dir;
                let dist = if dir == 1.0 { maxs[axis] } else { -mins[axis] };
                self.try_add_bevel(facet, &normal, dist, None)?;
            }
        }

        // add the edge bevels, testing the non-axial plane edges
        for j in 0..w.len() {
            let k = (j + 1) % w.len();
            let mut vec = vector_subtract(&w[j], &w[k]);
            // if it's a degenerate edge
            if vector_normalize(&mut vec) < 0.5 {
                continue;
            }
            snap_vector(&mut vec);
            if vec.iter().any(|&v| v == -1.0 || v == 1.0) {
                continue; // only test non-axial edges
            }

            // try the six possible slanted axials from this edge
            for axis in 0..3 {
                for dir in [-1.0f32, 1.0] {
                    let mut vec2 = [0.0f32; 3];
                    vec2[axis] = dir;
                    let mut normal = cross_product(&vec, &vec2);
                    if vector_normalize(&mut normal) < 0.5 {
                        continue;
                    }
                    let dist = dot_product(&w[j], &normal);

                    // if all the points of the facet winding are
                    // behind this plane, it is a proper edge bevel
                    if w.iter().any(|p| dot_product(p, &normal) - dist > 0.1) {
                        continue;
                    }
                    self.try_add_bevel(facet, &normal, dist, Some(&w))?;
                }
            }
        }

        // add opposite plane
        facet.borders.push(FacetBorder {
            plane: facet.surface_plane,
            inward: true,
            no_adjust: false,
        });
        Ok(())
    }

    /// Adds a bevel unless an equal plane is already the surface or a
    /// border. Edge bevels must leave part of the facet winding.
    fn try_add_bevel(
        &mut self,
        facet: &mut Facet,
        normal: &Vec3,
        dist: f32,
        winding: Option<&Winding>,
    ) -> CmResult<()> {
        // if it's the surface plane
        if plane_equal(&self.planes[facet.surface_plane], normal, dist).is_some() {
            return Ok(());
        }
        // see if the plane is already present
        if facet
            .borders
            .iter()
            .any(|b| plane_equal(&self.planes[b.plane], normal, dist).is_some())
        {
            return Ok(());
        }
        if facet.borders.len() > MAX_FACET_BORDERS {
            warn!("add_facet_bevels: too many bevels");
            return Ok(());
        }

        let (plane, flipped) = self.find_plane_exact(normal, dist)?;
        let border = FacetBorder {
            plane,
            inward: flipped,
            no_adjust: false,
        };

        if let Some(w) = winding {
            let mut w2 = w.clone();
            let (n, d) = self.oriented(&border);
            chop_winding_in_place(&mut w2, &n, d, BEVEL_CHOP_EPSILON);
            if w2.is_empty() {
                debug!("add_facet_bevels: invalid bevel");
                return Ok(());
            }
        }

        facet.borders.push(border);
        Ok(())
    }

    fn add_facet(
        &mut self,
        surface_plane: Option<usize>,
        mut borders: Vec<PendingBorder>,
        grid: &Grid,
        i: usize,
        j: usize,
        part: CellPart,
    ) -> CmResult<()> {
        self.set_border_inward(&mut borders, grid, i, j, part);
        if let Some(mut facet) = self.validate_facet(surface_plane, &borders) {
            self.add_facet_bevels(&mut facet)?;
            check_limit("patch facets", self.facets.len() + 1, MAX_FACETS)?;
            self.facets.push(facet);
        }
        Ok(())
    }

    fn facets_from_grid(&mut self, grid: &Grid) -> CmResult<()> {
        let cells_w = grid.width - 1;
        let cells_h = grid.height - 1;

        // find the planes for each triangle of the grid
        let mut grid_planes: GridPlanes = vec![vec![[None, None]; cells_h]; cells_w];
        for i in 0..cells_w {
            for j in 0..cells_h {
                let pts = &grid.points;
                grid_planes[i][j][0] = self.find_plane(&pts[i][j], &pts[i + 1][j], &pts[i + 1][j + 1])?;
                grid_planes[i][j][1] = self.find_plane(&pts[i + 1][j + 1], &pts[i][j + 1], &pts[i][j])?;
            }
        }

        // create the borders for each facet
        for i in 0..cells_w {
            for j in 0..cells_h {
                let [tri0, tri1] = grid_planes[i][j];

                let neighbour = |p: Option<usize>, own: Option<usize>| (p, p.is_some() && p == own);

                let (top, top_na) = neighbour(
                    if j > 0 {
                        grid_planes[i][j - 1][1]
                    } else if grid.wrap_height {
                        grid_planes[i][cells_h - 1][1]
                    } else {
                        None
                    },
                    tri0,
                );
                let (bottom, bottom_na) = neighbour(
                    if j + 1 < cells_h {
                        grid_planes[i][j + 1][0]
                    } else if grid.wrap_height {
                        grid_planes[i][0][0]
                    } else {
                        None
                    },
                    tri1,
                );
                let (left, left_na) = neighbour(
                    if i > 0 {
                        grid_planes[i - 1][j][0]
                    } else if grid.wrap_width {
                        grid_planes[cells_w - 1][j][0]
                    } else {
                        None
                    },
                    tri1,
                );
                let (right, right_na) = neighbour(
                    if i + 1 < cells_w {
                        grid_planes[i + 1][j][1]
                    } else if grid.wrap_width {
                        grid_planes[0][j][1]
                    } else {
                        None
                    },
                    tri0,
                );

                let top = self.border_or_edge(top, top_na, grid, &grid_planes, i, j, Edge::Top)?;
                let bottom = self.border_or_edge(bottom, bottom_na, grid, &grid_planes, i, j, Edge::Bottom)?;
                let left = self.border_or_edge(left, left_na, grid, &grid_planes, i, j, Edge::Left)?;
                let right = self.border_or_edge(right, right_na, grid, &grid_planes, i, j, Edge::Right)?;

                let pending = |plane, no_adjust| PendingBorder {
                    plane,
                    inward: false,
                    no_adjust,
                };

                if tri0 == tri1 {
                    if tri0.is_none() {
                        continue; // degenerate
                    }
                    let borders = vec![
                        pending(top, top_na),
                        pending(right, right_na),
                        pending(bottom, bottom_na),
                        pending(left, left_na),
                    ];
                    self.add_facet(tri0, borders, grid, i, j, CellPart::Quad)?;
                } else {
                    // two separate triangles
                    let mut diagonal = tri1.or(bottom);
                    if diagonal.is_none() {
                        diagonal = self.edge_plane(grid, &grid_planes, i, j, Edge::Diagonal0)?;
                    }
                    let borders = vec![
                        pending(top, top_na),
                        pending(right, right_na),
                        pending(diagonal, false),
                    ];
                    self.add_facet(tri0, borders, grid, i, j, CellPart::Tri0)?;

                    let mut diagonal = tri0.or(top);
                    if diagonal.is_none() {
                        diagonal = self.edge_plane(grid, &grid_planes, i, j, Edge::Diagonal1)?;
                    }
                    let borders = vec![
                        pending(bottom, bottom_na),
                        pending(left, left_na),
                        pending(diagonal, false),
                    ];
                    self.add_facet(tri1, borders, grid, i, j, CellPart::Tri1)?;
                }
            }
        }
        Ok(())
    }

    /// Uses the neighbour's plane as the border unless there is none or it
    /// is coplanar with this cell, in which case an edge plane is built.
    #[allow(clippy::too_many_arguments)]
    fn border_or_edge(
        &mut self,
        neighbour: Option<usize>,
        no_adjust: bool,
        grid: &Grid,
        grid_planes: &GridPlanes,
        i: usize,
        j: usize,
        edge: Edge,
    ) -> CmResult<Option<usize>> {
        if neighbour.is_none() || no_adjust {
            return self.edge_plane(grid, grid_planes, i, j, edge);
        }
        Ok(neighbour)
    }
}

fn plane_from_points(a: &Vec3, b: &Vec3, c: &Vec3) -> Option<(Vec3, f32)> {
    let d1 = vector_subtract(b, a);
    let d2 = vector_subtract(c, a);
    let mut normal = cross_product(&d2, &d1);
    if vector_normalize(&mut normal) == 0.0 {
        return None;
    }
    Some((normal, dot_product(a, &normal)))
}

/// `Some(flipped)` when the plane matches `normal`/`dist` either way round.
fn plane_equal(p: &PatchPlane, normal: &Vec3, dist: f32) -> Option<bool> {
    let close = |n: &Vec3, d: f32| {
        (0..3).all(|i| (p.normal[i] - n[i]).abs() < NORMAL_EPSILON) && (p.dist - d).abs() < DIST_EPSILON
    };
    if close(normal, dist) {
        return Some(false);
    }
    if close(&vector_negate(normal), -dist) {
        return Some(true);
    }
    None
}

fn snap_vector(normal: &mut Vec3) {
    for i in 0..3 {
        if (normal[i] - 1.0).abs() < NORMAL_EPSILON {
            *normal = [0.0; 3];
            normal[i] = 1.0;
            break;
        }
        if (normal[i] + 1.0).abs() < NORMAL_EPSILON {
            *normal = [0.0; 3];
            normal[i] = -1.0;
            break;
        }
    }
}

/// Builds the facetized collision surface for a `width` x `height` grid
/// of Bezier control points stored row by row.
pub fn generate_patch_collide(width: usize, height: usize, points: &[Vec3]) -> CmResult<PatchCollide> {
    if width <= 2 || height <= 2 || width % 2 == 0 || height % 2 == 0 {
        return Err(CmError::corrupt(
            "LUMP_SURFACES",
            format!("bad patch size {} x {}", width, height),
        ));
    }
    check_limit("patch width", width, MAX_GRID_SIZE)?;
    check_limit("patch height", height, MAX_GRID_SIZE)?;
    if points.len() < width * height {
        return Err(CmError::corrupt(
            "LUMP_SURFACES",
            format!("patch needs {} points, has {}", width * height, points.len()),
        ));
    }

    let mut grid = Grid::from_control_points(width, height, points);

    // subdivide the grid
    grid.set_wrap_width();
    grid.subdivide_columns()?;
    grid.remove_degenerate_columns();

    grid.transpose();

    grid.set_wrap_width();
    grid.subdivide_columns()?;
    grid.remove_degenerate_columns();

    // we now have a grid of points exactly on the curve; the approximate
    // surface defined by these points will be collided against
    let (mut mins, mut maxs) = clear_bounds();
    for column in &grid.points {
        for p in column {
            add_point_to_bounds(p, &mut mins, &mut maxs);
        }
    }

    let mut builder = PatchBuilder::new();
    if grid.width >= 2 && grid.height >= 2 {
        builder.facets_from_grid(&grid)?;
    }

    // expand by one unit for epsilon purposes
    for i in 0..3 {
        mins[i] -= 1.0;
        maxs[i] += 1.0;
    }

    Ok(PatchCollide {
        bounds: [mins, maxs],
        planes: builder.planes,
        facets: builder.facets,
    })
}

// ============================================================
// Collision tests
// ============================================================

/// Moves `enter`/`leave` for one plane. Returns `None` when the sweep is
/// entirely in front of the plane, else whether it set a new enter.
fn check_facet_plane(d1: f32, d2: f32, enter: &mut f32, leave: &mut f32) -> Option<bool> {
    // if completely in front of face, no intersection with the entire facet
    if d1 > 0.0 && (d2 >= SURFACE_CLIP_EPSILON || d2 >= d1) {
        return None;
    }
    // if it doesn't cross the plane, the plane isn't relevant
    if d1 <= 0.0 && d2 <= 0.0 {
        return Some(false);
    }

    // crosses face
    if d1 > d2 {
        // enter
        let f = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);
        // always favor previous plane hits and thus also the surface plane hit
        if f > *enter {
            *enter = f;
            return Some(true);
        }
    } else {
        // leave
        let f = ((d1 + SURFACE_CLIP_EPSILON) / (d1 - d2)).min(1.0);
        if f < *leave {
            *leave = f;
        }
    }
    Some(false)
}

impl PatchCollide {
    fn border_plane(&self, border: &FacetBorder) -> (Vec3, f32, u8) {
        let p = &self.planes[border.plane];
        if border.inward {
            (vector_negate(&p.normal), -p.dist, p.signbits)
        } else {
            (p.normal, p.dist, p.signbits)
        }
    }

    /// Earliest facet impact of the sweep in `tw`, if any.
    pub(crate) fn sweep(&self, tw: &TraceWork) -> Option<PatchHit> {
        if !bounds_intersect(&tw.bounds[0], &tw.bounds[1], &self.bounds[0], &self.bounds[1]) {
            return None;
        }
        if tw.is_point {
            return self.sweep_point(tw);
        }

        let mut best: Option<PatchHit> = None;
        for facet in &self.facets {
            let mut enter = -1.0f32;
            let mut leave = 1.0f32;
            let mut hitnum: Option<usize> = None;

            let surface = &self.planes[facet.surface_plane];
            let s = tw.offset_surface_plane(&surface.normal, surface.dist, surface.signbits);
            let d1 = dot_product(&s.start, &surface.normal) - s.dist_start;
            let d2 = dot_product(&s.end, &surface.normal) - s.dist_end;
            if check_facet_plane(d1, d2, &mut enter, &mut leave).is_none() {
                continue;
            }
            let mut best_plane = (surface.normal, surface.dist);

            let mut clipped = false;
            for (j, border) in facet.borders.iter().enumerate() {
                let (normal, dist, signbits) = self.border_plane(border);
                let s = tw.offset_border_plane(&normal, dist, signbits);
                let d1 = dot_product(&s.start, &normal) - s.dist_start;
                let d2 = dot_product(&s.end, &normal) - s.dist_end;
                match check_facet_plane(d1, d2, &mut enter, &mut leave) {
                    None => {
                        clipped = true;
                        break;
                    }
                    Some(true) => {
                        hitnum = Some(j);
                        best_plane = (normal, dist);
                    }
                    Some(false) => {}
                }
            }
            if clipped {
                continue;
            }
            // never clip against the back side
            if hitnum == Some(facet.borders.len() - 1) {
                continue;
            }

            if enter < leave && enter >= 0.0 && best.map_or(true, |b| enter < b.fraction) {
                best = Some(PatchHit {
                    fraction: enter,
                    normal: best_plane.0,
                    dist: best_plane.1,
                });
            }
        }
        best
    }

    /// Point sweeps test the surface planes directly, then check the
    /// crossing lies within the facet borders.
    fn sweep_point(&self, tw: &TraceWork) -> Option<PatchHit> {
        // determine the trace's relationship to all planes
        let mut front_facing = Vec::with_capacity(self.planes.len());
        let mut intersection = Vec::with_capacity(self.planes.len());
        for plane in &self.planes {
            let d1 = plane.distance(&tw.start);
            let d2 = plane.distance(&tw.end);
            front_facing.push(d1 > 0.0);
            let mut t = if d1 == d2 { 99999.0 } else { d1 / (d1 - d2) };
            if t <= 0.0 {
                t = 99999.0;
            }
            intersection.push(t);
        }

        let mut best: Option<PatchHit> = None;
        for facet in &self.facets {
            if !front_facing[facet.surface_plane] {
                continue;
            }
            let intersect = intersection[facet.surface_plane];
            if intersect < 0.0 {
                continue; // surface is behind the starting point
            }
            if intersect > best.map_or(1.0, |b| b.fraction) {
                continue; // already hit something closer
            }

            let inside = facet.borders.iter().all(|border| {
                let k = border.plane;
                if front_facing[k] ^ border.inward {
                    intersection[k] <= intersect
                } else {
                    intersection[k] >= intersect
                }
            });
            if !inside {
                continue;
            }

            // we hit this facet; calculate intersection with a slight pushoff
            let plane = &self.planes[facet.surface_plane];
            let d1 = plane.distance(&tw.start);
            let d2 = plane.distance(&tw.end);
            let fraction = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);
            if best.map_or(true, |b| fraction < b.fraction) {
                best = Some(PatchHit {
                    fraction,
                    normal: plane.normal,
                    dist: plane.dist,
                });
            }
        }
        best
    }

    /// True if the shape at `tw.start` overlaps a facet.
    pub(crate) fn position_test(&self, tw: &TraceWork) -> bool {
        if tw.is_point {
            return false;
        }

        self.facets.iter().any(|facet| {
            let surface = &self.planes[facet.surface_plane];
            let s = tw.offset_surface_plane(&surface.normal, surface.dist, surface.signbits);
            if dot_product(&s.start, &surface.normal) - s.dist_start > 0.0 {
                return false;
            }
            facet.borders.iter().all(|border| {
                let (normal, dist, signbits) = self.border_plane(border);
                let s = tw.offset_border_plane(&normal, dist, signbits);
                dot_product(&s.start, &normal) - s.dist_start <= 0.0
            })
        })
    }
}
