// polylib.rs — convex polygon windings clipped against planes

use crate::q_shared::{
    add_point_to_bounds, clear_bounds, cross_product, dot_product, vector_add, vector_length,
    vector_ma, vector_normalize, vector_scale, vector_subtract, Vec3,
};
use log::warn;

/// Half-width of the world; base windings span the whole map.
pub const MAX_MAP_BOUNDS: f32 = 65535.0;

pub const MAX_POINTS_ON_WINDING: usize = 64;

pub const ON_EPSILON: f32 = 0.1;

/// Ordered points of a convex polygon, clockwise seen from the front.
pub type Winding = Vec<Vec3>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
    On,
}

/// A huge quad lying on the plane, later chopped down by other planes.
/// Returns `None` for a zero normal.
pub fn base_winding_for_plane(normal: &Vec3, dist: f32) -> Option<Winding> {
    // find the major axis
    let mut max = -MAX_MAP_BOUNDS;
    let mut x = None;
    for i in 0..3 {
        let v = normal[i].abs();
        if v > max {
            x = Some(i);
            max = v;
        }
    }
    let x = x?;
    if max == 0.0 {
        return None;
    }

    let mut vup = [0.0f32; 3];
    match x {
        0 | 1 => vup[2] = 1.0,
        _ => vup[0] = 1.0,
    }

    let v = dot_product(&vup, normal);
    vup = vector_ma(&vup, -v, normal);
    vector_normalize(&mut vup);

    let org = vector_scale(normal, dist);
    let vright = vector_scale(&cross_product(&vup, normal), MAX_MAP_BOUNDS);
    let vup = vector_scale(&vup, MAX_MAP_BOUNDS);

    Some(vec![
        vector_add(&vector_subtract(&org, &vright), &vup),
        vector_add(&vector_add(&org, &vright), &vup),
        vector_subtract(&vector_add(&org, &vright), &vup),
        vector_subtract(&vector_subtract(&org, &vright), &vup),
    ])
}

/// Keeps the part of `w` in front of the plane. The winding is emptied
/// when nothing remains.
pub fn chop_winding_in_place(w: &mut Winding, normal: &Vec3, dist: f32, epsilon: f32) {
    if w.is_empty() {
        return;
    }

    let mut dists = Vec::with_capacity(w.len() + 1);
    let mut sides = Vec::with_capacity(w.len() + 1);
    let mut counts = [0usize; 3];

    // determine sides for each point
    for p in w.iter() {
        let dot = dot_product(p, normal) - dist;
        let side = if dot > epsilon {
            Side::Front
        } else if dot < -epsilon {
            Side::Back
        } else {
            Side::On
        };
        counts[side as usize] += 1;
        dists.push(dot);
        sides.push(side);
    }
    sides.push(sides[0]);
    dists.push(dists[0]);

    if counts[Side::Front as usize] == 0 {
        w.clear();
        return;
    }
    if counts[Side::Back as usize] == 0 {
        return;
    }

    let maxpts = w.len() + 4;
    let mut f = Vec::with_capacity(maxpts);

    for i in 0..w.len() {
        let p1 = w[i];

        if sides[i] == Side::On {
            f.push(p1);
            continue;
        }
        if sides[i] == Side::Front {
            f.push(p1);
        }
        if sides[i + 1] == Side::On || sides[i + 1] == sides[i] {
            continue;
        }

        // generate a split point
        let p2 = w[(i + 1) % w.len()];
        let dot = dists[i] / (dists[i] - dists[i + 1]);
        let mut mid = [0.0f32; 3];
        for j in 0..3 {
            // avoid round off error when possible
            mid[j] = if normal[j] == 1.0 {
                dist
            } else if normal[j] == -1.0 {
                -dist
            } else {
                p1[j] + dot * (p2[j] - p1[j])
            };
        }
        f.push(mid);
    }

    if f.len() > maxpts {
        warn!("chop_winding_in_place: points exceeded estimate");
    }
    if f.len() > MAX_POINTS_ON_WINDING {
        warn!("chop_winding_in_place: MAX_POINTS_ON_WINDING");
    }

    *w = f;
}

pub fn winding_bounds(w: &Winding) -> (Vec3, Vec3) {
    let (mut mins, mut maxs) = clear_bounds();
    for p in w {
        add_point_to_bounds(p, &mut mins, &mut maxs);
    }
    (mins, maxs)
}

pub fn winding_area(w: &Winding) -> f32 {
    let mut total = 0.0;
    for i in 2..w.len() {
        let d1 = vector_subtract(&w[i - 1], &w[0]);
        let d2 = vector_subtract(&w[i], &w[0]);
        total += 0.5 * vector_length(&cross_product(&d1, &d2));
    }
    total
}
