// q_shared.rs — vector math, planes, contents flags and the trace result

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// ============================================================
// Contents and surface flags
// ============================================================

bitflags::bitflags! {
    /// Brush contents. A brush can contribute several bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Contents: u32 {
        const SOLID          = 0x0000_0001;
        const LAVA           = 0x0000_0008;
        const SLIME          = 0x0000_0010;
        const WATER          = 0x0000_0020;
        const FOG            = 0x0000_0040;
        const NOTTEAM1       = 0x0000_0080;
        const NOTTEAM2       = 0x0000_0100;
        const NOBOTCLIP      = 0x0000_0200;
        const AREAPORTAL     = 0x0000_8000;
        const PLAYERCLIP     = 0x0001_0000;
        const MONSTERCLIP    = 0x0002_0000;
        const TELEPORTER     = 0x0004_0000;
        const JUMPPAD        = 0x0008_0000;
        const CLUSTERPORTAL  = 0x0010_0000;
        const DONOTENTER     = 0x0020_0000;
        const BOTCLIP        = 0x0040_0000;
        const MOVER          = 0x0080_0000;
        const ORIGIN         = 0x0100_0000;
        const BODY           = 0x0200_0000;
        const CORPSE         = 0x0400_0000;
        const DETAIL         = 0x0800_0000;
        const STRUCTURAL     = 0x1000_0000;
        const TRANSLUCENT    = 0x2000_0000;
        const TRIGGER        = 0x4000_0000;
        const NODROP         = 0x8000_0000;
    }
}

pub const MASK_ALL: Contents = Contents::from_bits_retain(u32::MAX);
pub const MASK_SOLID: Contents = Contents::SOLID;
pub const MASK_PLAYERSOLID: Contents = Contents::SOLID
    .union(Contents::PLAYERCLIP)
    .union(Contents::BODY);
pub const MASK_DEADSOLID: Contents = Contents::SOLID.union(Contents::PLAYERCLIP);
pub const MASK_WATER: Contents = Contents::WATER
    .union(Contents::LAVA)
    .union(Contents::SLIME);
pub const MASK_OPAQUE: Contents = Contents::SOLID
    .union(Contents::SLIME)
    .union(Contents::LAVA);
pub const MASK_SHOT: Contents = Contents::SOLID
    .union(Contents::BODY)
    .union(Contents::CORPSE);

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: u32 {
        const NODAMAGE    = 0x0000_0001;
        const SLICK       = 0x0000_0002;
        const SKY         = 0x0000_0004;
        const LADDER      = 0x0000_0008;
        const NOIMPACT    = 0x0000_0010;
        const NOMARKS     = 0x0000_0020;
        const FLESH       = 0x0000_0040;
        const NODRAW      = 0x0000_0080;
        const HINT        = 0x0000_0100;
        const SKIP        = 0x0000_0200;
        const NOLIGHTMAP  = 0x0000_0400;
        const POINTLIGHT  = 0x0000_0800;
        const METALSTEPS  = 0x0000_1000;
        const NOSTEPS     = 0x0000_2000;
        /// Curves with this flag never collide.
        const NONSOLID    = 0x0000_4000;
        const LIGHTFILTER = 0x0000_8000;
        const ALPHASHADOW = 0x0001_0000;
        const NODLIGHT    = 0x0002_0000;
        const DUST        = 0x0004_0000;
    }
}

// ============================================================
// Plane
// ============================================================

pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_NON_AXIAL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    /// PLANE_X/Y/Z for positive axial normals, PLANE_NON_AXIAL otherwise.
    pub plane_type: u8,
    /// One bit per negative normal component, indexes box corner offsets.
    pub signbits: u8,
}

impl Default for CPlane {
    fn default() -> Self {
        Self {
            normal: [0.0; 3],
            dist: 0.0,
            plane_type: PLANE_NON_AXIAL,
            signbits: 0,
        }
    }
}

impl CPlane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal),
            signbits: signbits_for_normal(&normal),
        }
    }

    /// Signed distance of `p` in front of the plane.
    #[inline]
    pub fn distance(&self, p: &Vec3) -> f32 {
        if self.plane_type < PLANE_NON_AXIAL {
            p[self.plane_type as usize] - self.dist
        } else {
            dot_product(&self.normal, p) - self.dist
        }
    }
}

pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 {
        PLANE_X
    } else if normal[1] == 1.0 {
        PLANE_Y
    } else if normal[2] == 1.0 {
        PLANE_Z
    } else {
        PLANE_NON_AXIAL
    }
}

pub fn signbits_for_normal(normal: &Vec3) -> u8 {
    let mut bits = 0;
    for j in 0..3 {
        if normal[j] < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if p.plane_type < PLANE_NON_AXIAL {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // general case: pick the corners nearest and farthest along the normal
    let mut dist1 = 0.0;
    let mut dist2 = 0.0;
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            dist1 += p.normal[i] * emins[i];
            dist2 += p.normal[i] * emaxs[i];
        } else {
            dist1 += p.normal[i] * emaxs[i];
            dist2 += p.normal[i] * emins[i];
        }
    }

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Trace result
// ============================================================

/// What a trace collided with. Brushes order before patches so equal
/// fractions resolve to the lowest brush index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HitSource {
    Brush(usize),
    Patch(usize),
    /// The temp box or capsule model.
    TempModel,
}

#[derive(Debug, Clone)]
pub struct Trace {
    /// The whole sweep was inside a solid.
    pub allsolid: bool,
    /// The start point was inside a solid.
    pub startsolid: bool,
    /// 1.0 = reached `end` without hitting anything.
    pub fraction: f32,
    pub endpos: Vec3,
    /// Impact plane, valid when `fraction < 1.0`.
    pub plane: CPlane,
    pub surface_flags: SurfaceFlags,
    pub contents: Contents,
    pub hit: Option<HitSource>,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: CPlane::default(),
            surface_flags: SurfaceFlags::empty(),
            contents: Contents::empty(),
            hit: None,
        }
    }
}

// ============================================================
// MATHLIB — Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_negate(v: &Vec3) -> Vec3 {
    [-v[0], -v[1], -v[2]]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn vector_lerp(a: &Vec3, b: &Vec3, frac: f32) -> Vec3 {
    [
        a[0] + frac * (b[0] - a[0]),
        a[1] + frac * (b[1] - a[1]),
        a[2] + frac * (b[2] - a[2]),
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_length_squared(v: &Vec3) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

pub fn clear_bounds() -> (Vec3, Vec3) {
    ([f32::MAX; 3], [-f32::MAX; 3])
}

pub fn add_point_to_bounds(v: &Vec3, mins: &mut Vec3, maxs: &mut Vec3) {
    for i in 0..3 {
        if v[i] < mins[i] {
            mins[i] = v[i];
        }
        if v[i] > maxs[i] {
            maxs[i] = v[i];
        }
    }
}

pub fn bounds_intersect(mins1: &Vec3, maxs1: &Vec3, mins2: &Vec3, maxs2: &Vec3) -> bool {
    !(maxs1[0] < mins2[0]
        || maxs1[1] < mins2[1]
        || maxs1[2] < mins2[2]
        || mins1[0] > maxs2[0]
        || mins1[1] > maxs2[1]
        || mins1[2] > maxs2[2])
}

// ============================================================
// Angles and rotation
// ============================================================

pub fn angle_vectors(
    angles: &Vec3,
    forward: Option<&mut Vec3>,
    right: Option<&mut Vec3>,
    up: Option<&mut Vec3>,
) {
    let angle_yaw = angles[YAW].to_radians();
    let sy = angle_yaw.sin();
    let cy = angle_yaw.cos();

    let angle_pitch = angles[PITCH].to_radians();
    let sp = angle_pitch.sin();
    let cp = angle_pitch.cos();

    let angle_roll = angles[ROLL].to_radians();
    let sr = angle_roll.sin();
    let cr = angle_roll.cos();

    if let Some(fwd) = forward {
        fwd[0] = cp * cy;
        fwd[1] = cp * sy;
        fwd[2] = -sp;
    }
    if let Some(r) = right {
        r[0] = -sr * sp * cy + -cr * -sy;
        r[1] = -sr * sp * sy + -cr * cy;
        r[2] = -sr * cp;
    }
    if let Some(u) = up {
        u[0] = cr * sp * cy + -sr * -sy;
        u[1] = cr * sp * sy + -sr * cy;
        u[2] = cr * cp;
    }
}

pub type Matrix3 = [Vec3; 3];

/// Rows are forward, left and up for the given angles. `rotate_point`
/// with this matrix takes a world-space offset into model space.
pub fn create_rotation_matrix(angles: &Vec3) -> Matrix3 {
    let mut forward = [0.0f32; 3];
    let mut right = [0.0f32; 3];
    let mut up = [0.0f32; 3];
    angle_vectors(angles, Some(&mut forward), Some(&mut right), Some(&mut up));
    [forward, vector_negate(&right), up]
}

pub fn transpose_matrix(m: &Matrix3) -> Matrix3 {
    let mut t = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            t[i][j] = m[j][i];
        }
    }
    t
}

#[inline]
pub fn rotate_point(point: &Vec3, matrix: &Matrix3) -> Vec3 {
    [
        dot_product(&matrix[0], point),
        dot_product(&matrix[1], point),
        dot_product(&matrix[2], point),
    ]
}

// ============================================================
// Tests
// ============================================================
