// cm_test.rs — leaf queries, point contents, PVS and area portals

use std::borrow::Cow;
use std::io::{Read, Write};

use crate::cm_local::{
    CBrush, CBrushSide, ClipHandle, ClipMap, VisitSet, BOX_MODEL_HANDLE, CAPSULE_MODEL_HANDLE,
};
use crate::cm_trace::BoxHull;
use crate::q_shared::{
    box_on_plane_side, create_rotation_matrix, dot_product, rotate_point, vector_subtract, CPlane,
    Contents, Vec3, PLANE_NON_AXIAL,
};
use log::debug;

// ============================================================
// Leaf enumeration
// ============================================================

/// Result of a capped list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListCount {
    /// Entries written, never more than the list length.
    pub count: usize,
    /// Last leaf the walk reached, stored or not.
    pub last_leaf: usize,
    /// The list filled before the walk finished.
    pub overflowed: bool,
}

impl ClipMap {
    /// Tree root, or the single leaf of a world without nodes.
    pub(crate) fn root_node(&self) -> i32 {
        if self.nodes.is_empty() {
            -1
        } else {
            0
        }
    }

    fn point_leafnum_r(&self, p: &Vec3, mut num: i32) -> usize {
        while num >= 0 {
            let node = &self.nodes[num as usize];
            let plane = &self.planes[node.plane];
            let d = if plane.plane_type < PLANE_NON_AXIAL {
                p[plane.plane_type as usize] - plane.dist
            } else {
                dot_product(&plane.normal, p) - plane.dist
            };
            num = if d < 0.0 { node.children[1] } else { node.children[0] };
        }
        (-1 - num) as usize
    }

    /// Leaf containing `p`; points on a split plane go to the front side.
    pub fn point_leafnum(&self, p: &Vec3) -> usize {
        if self.nodes.is_empty() {
            return 0; // map not loaded
        }
        self.point_leafnum_r(p, 0)
    }

    /// Calls `visit` for every leaf the box touches, front side first.
    pub(crate) fn box_leafs_r<F: FnMut(usize)>(&self, mins: &Vec3, maxs: &Vec3, mut nodenum: i32, visit: &mut F) {
        loop {
            if nodenum < 0 {
                visit((-1 - nodenum) as usize);
                return;
            }

            let node = &self.nodes[nodenum as usize];
            let plane = &self.planes[node.plane];
            match box_on_plane_side(mins, maxs, plane) {
                1 => nodenum = node.children[0],
                2 => nodenum = node.children[1],
                _ => {
                    // go down both
                    self.box_leafs_r(mins, maxs, node.children[0], visit);
                    nodenum = node.children[1];
                }
            }
        }
    }

    /// Fills `list` with the leafs touching the box. On overflow the walk
    /// still finishes, so `last_leaf` differs from the last stored entry.
    pub fn box_leafnums(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount {
        let mut result = ListCount::default();
        self.box_leafs_r(mins, maxs, self.root_node(), &mut |leafnum| {
            // store the last leaf even if the list is overflowed
            result.last_leaf = leafnum;
            if result.count >= list.len() {
                result.overflowed = true;
                return;
            }
            list[result.count] = leafnum;
            result.count += 1;
        });
        result
    }

    /// Fills `list` with the brushes whose bounds overlap the box, each
    /// once.
    pub fn box_brushes(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount {
        let mut result = ListCount::default();
        let mut checked = VisitSet::new(self.brushes.len());
        self.box_leafs_r(mins, maxs, self.root_node(), &mut |leafnum| {
            result.last_leaf = leafnum;
            let leaf = &self.leafs[leafnum];
            for &brushnum in &self.leaf_brushes[leaf.first_leaf_brush..leaf.first_leaf_brush + leaf.num_leaf_brushes] {
                if !checked.insert(brushnum) {
                    continue;
                }
                let b = &self.brushes[brushnum];
                if (0..3).any(|i| b.bounds[0][i] >= maxs[i] || b.bounds[1][i] <= mins[i]) {
                    continue;
                }
                if result.count >= list.len() {
                    result.overflowed = true;
                    return;
                }
                list[result.count] = brushnum;
                result.count += 1;
            }
        });
        result
    }

    pub fn leaf_cluster(&self, leafnum: usize) -> i32 {
        if leafnum >= self.leafs.len() {
            panic!("leaf_cluster: bad number {}", leafnum);
        }
        self.leafs[leafnum].cluster
    }

    pub fn leaf_area(&self, leafnum: usize) -> i32 {
        if leafnum >= self.leafs.len() {
            panic!("leaf_area: bad number {}", leafnum);
        }
        self.leafs[leafnum].area
    }

    // ============================================================
    // Point contents
    // ============================================================

    /// OR of the contents of every brush containing `p`. A point on a
    /// brush face counts as inside.
    pub fn point_contents(&self, p: &Vec3, model: ClipHandle) -> Contents {
        if model == BOX_MODEL_HANDLE || model == CAPSULE_MODEL_HANDLE {
            let hull = BoxHull::new(&self.temp_box.mins, &self.temp_box.maxs);
            return if point_in_brush(p, &hull.brush, &hull.sides, &hull.planes) {
                hull.brush.contents
            } else {
                Contents::empty()
            };
        }

        let leaf = if model != 0 {
            self.clip_handle_to_model(model).leaf
        } else {
            self.leafs[self.point_leafnum(p)]
        };

        let mut contents = Contents::empty();
        for &brushnum in &self.leaf_brushes[leaf.first_leaf_brush..leaf.first_leaf_brush + leaf.num_leaf_brushes] {
            let b = &self.brushes[brushnum];
            if point_in_brush(p, b, &self.brush_sides, &self.planes) {
                contents |= b.contents;
            }
        }
        contents
    }

    /// Point contents against a model placed at `origin` with `angles`.
    pub fn transformed_point_contents(&self, p: &Vec3, model: ClipHandle, origin: &Vec3, angles: &Vec3) -> Contents {
        // subtract origin offset
        let mut p_l = vector_subtract(p, origin);

        // rotate start and end into the model's frame of reference
        if model != BOX_MODEL_HANDLE
            && model != CAPSULE_MODEL_HANDLE
            && (angles[0] != 0.0 || angles[1] != 0.0 || angles[2] != 0.0)
        {
            let matrix = create_rotation_matrix(angles);
            p_l = rotate_point(&p_l, &matrix);
        }

        self.point_contents(&p_l, model)
    }

    // ============================================================
    // PVS
    // ============================================================

    /// Visibility row for `cluster`.
    pub fn cluster_pvs(&self, cluster: i32) -> ClusterPvs<'_> {
        let valid = cluster >= 0 && (cluster as usize) < self.num_clusters;
        if !valid {
            return ClusterPvs {
                row: Cow::Owned(vec![0; self.cluster_bytes]),
                vised: self.vised,
                num_clusters: 0,
            };
        }

        let c = cluster as usize;
        if self.vised {
            let start = c * self.cluster_bytes;
            return ClusterPvs {
                row: Cow::Borrowed(&self.visibility[start..start + self.cluster_bytes]),
                vised: true,
                num_clusters: self.num_clusters,
            };
        }

        // unvised: only the cluster itself is known
        let mut row = vec![0u8; self.cluster_bytes];
        row[c >> 3] |= 1 << (c & 7);
        ClusterPvs {
            row: Cow::Owned(row),
            vised: false,
            num_clusters: self.num_clusters,
        }
    }

    // ============================================================
    // Area portals
    // ============================================================

    pub fn adjust_area_portal_state(&self, area1: i32, area2: i32, open: bool) {
        self.portals.lock().adjust(area1, area2, open);
    }

    pub fn areas_connected(&self, area1: i32, area2: i32) -> bool {
        if self.config.no_areas {
            return true;
        }
        self.portals.lock().connected(area1, area2)
    }

    /// Writes a bit per area reachable from `area` and returns the number
    /// of bytes used. `area == -1` marks every area.
    pub fn write_area_bits(&self, buffer: &mut [u8], area: i32) -> usize {
        self.portals.lock().write_area_bits(buffer, area, self.config.no_areas)
    }

    pub fn write_portal_state(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        self.portals.lock().write_state(writer)
    }

    pub fn read_portal_state(&self, reader: &mut dyn Read) -> std::io::Result<()> {
        self.portals.lock().read_state(reader)
    }
}

fn point_in_brush(p: &Vec3, brush: &CBrush, sides: &[CBrushSide], planes: &[CPlane]) -> bool {
    let range = brush.side_range();
    if range.is_empty() {
        return false;
    }
    sides[range].iter().all(|side| {
        let plane = &planes[side.plane];
        dot_product(p, &plane.normal) - plane.dist <= 0.0
    })
}

// ============================================================
// PVS row
// ============================================================

/// One cluster's row of the visibility matrix.
#[derive(Debug, Clone)]
pub struct ClusterPvs<'a> {
    row: Cow<'a, [u8]>,
    vised: bool,
    num_clusters: usize,
}

impl ClusterPvs<'_> {
    pub fn bytes(&self) -> &[u8] {
        &self.row
    }

    /// False when the map was compiled without visibility; the row then
    /// only holds the cluster's own bit.
    pub fn is_vised(&self) -> bool {
        self.vised
    }

    /// Whether `cluster` is potentially visible. Unvised maps see
    /// everything.
    pub fn can_see(&self, cluster: i32) -> bool {
        if cluster < 0 || cluster as usize >= self.num_clusters {
            return false;
        }
        if !self.vised {
            return true;
        }
        let c = cluster as usize;
        self.row[c >> 3] & (1 << (c & 7)) != 0
    }
}

// ============================================================
// Portal graph
// ============================================================

/// Reference-counted portals between areas and the cached floodfill.
#[derive(Debug, Clone, Default)]
pub struct AreaPortals {
    num_areas: usize,
    /// `num_areas * num_areas`, symmetric.
    refs: Vec<u32>,
    flood_num: Vec<u32>,
    flood_valid: Vec<u32>,
    generation: u32,
    dirty: bool,
}

impl AreaPortals {
    pub fn new(num_areas: usize) -> Self {
        Self {
            num_areas,
            refs: vec![0; num_areas * num_areas],
            flood_num: vec![0; num_areas],
            flood_valid: vec![0; num_areas],
            generation: 0,
            dirty: true,
        }
    }

    pub fn num_areas(&self) -> usize {
        self.num_areas
    }

    fn check_area(&self, area: i32, caller: &str) -> usize {
        if area < 0 || area as usize >= self.num_areas {
            panic!("{}: bad area number {}", caller, area);
        }
        area as usize
    }

    /// Opens or closes one reference of the portal between two areas.
    /// Negative areas are ignored.
    pub fn adjust(&mut self, area1: i32, area2: i32, open: bool) {
        if area1 < 0 || area2 < 0 {
            return;
        }
        let a1 = self.check_area(area1, "adjust_area_portal_state");
        let a2 = self.check_area(area2, "adjust_area_portal_state");
        let n = self.num_areas;

        if open {
            self.refs[a1 * n + a2] += 1;
            if a1 != a2 {
                self.refs[a2 * n + a1] += 1;
            }
        } else {
            if self.refs[a1 * n + a2] == 0 {
                panic!("adjust_area_portal_state: negative reference count");
            }
            self.refs[a1 * n + a2] -= 1;
            if a1 != a2 {
                self.refs[a2 * n + a1] -= 1;
            }
        }
        debug!(
            "portal {} <-> {} {} ({} refs)",
            a1,
            a2,
            if open { "opened" } else { "closed" },
            self.refs[a1 * n + a2]
        );
        self.dirty = true;
    }

    fn flood_area_r(&mut self, area: usize, floodnum: u32) {
        if self.flood_valid[area] == self.generation {
            if self.flood_num[area] == floodnum {
                return;
            }
            panic!("flood_area_r: reflooded");
        }

        self.flood_num[area] = floodnum;
        self.flood_valid[area] = self.generation;

        let n = self.num_areas;
        for other in 0..n {
            if self.refs[area * n + other] > 0 {
                self.flood_area_r(other, floodnum);
            }
        }
    }

    fn flood_area_connections(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            // skip the value fresh areas start with
            self.flood_valid.fill(0);
            self.generation = 1;
        }
        let mut floodnum = 0;
        for i in 0..self.num_areas {
            if self.flood_valid[i] == self.generation {
                continue; // already flooded into
            }
            floodnum += 1;
            self.flood_area_r(i, floodnum);
        }
        self.dirty = false;
    }

    fn reflood_if_dirty(&mut self) {
        if self.dirty {
            self.flood_area_connections();
        }
    }

    pub fn connected(&mut self, area1: i32, area2: i32) -> bool {
        if area1 < 0 || area2 < 0 {
            return false;
        }
        let a1 = self.check_area(area1, "areas_connected");
        let a2 = self.check_area(area2, "areas_connected");
        self.reflood_if_dirty();
        self.flood_num[a1] == self.flood_num[a2]
    }

    pub fn write_area_bits(&mut self, buffer: &mut [u8], area: i32, all: bool) -> usize {
        let bytes = (self.num_areas + 7) >> 3;
        if buffer.len() < bytes {
            panic!("write_area_bits: buffer holds {} bytes, need {}", buffer.len(), bytes);
        }

        if all || area == -1 {
            // send everything
            buffer[..bytes].fill(0xff);
            return bytes;
        }

        let a = self.check_area(area, "write_area_bits");
        self.reflood_if_dirty();
        buffer[..bytes].fill(0);
        let floodnum = self.flood_num[a];
        for i in 0..self.num_areas {
            if self.flood_num[i] == floodnum {
                buffer[i >> 3] |= 1 << (i & 7);
            }
        }
        bytes
    }

    /// Reference counts as little-endian u32s, row by row.
    pub fn write_state(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(self.refs.len() * 4);
        for r in &self.refs {
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        writer.write_all(&bytes)
    }

    pub fn read_state(&mut self, reader: &mut dyn Read) -> std::io::Result<()> {
        let mut bytes = vec![0u8; self.refs.len() * 4];
        reader.read_exact(&mut bytes)?;
        let refs: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let n = self.num_areas;
        for a in 0..n {
            for b in 0..n {
                if refs[a * n + b] != refs[b * n + a] {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("portal state not symmetric at {} <-> {}", a, b),
                    ));
                }
            }
        }
        self.refs = refs;
        self.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_maps::TestMap;
    use proptest::prelude::*;

    // ============================================================
    // Leaf walks
    // ============================================================

    #[test]
    fn test_point_leafnum_empty_world() {
        let cm = ClipMap::empty();
        assert_eq!(cm.point_leafnum(&[10.0, 20.0, 30.0]), 0);
        assert_eq!(cm.leaf_cluster(0), 0);
        assert_eq!(cm.leaf_area(0), 0);
    }

    #[test]
    fn test_point_leafnum_splits() {
        let cm = TestMap::new().depth(3).load();
        let a = cm.point_leafnum(&[10.0, 10.0, 10.0]);
        let b = cm.point_leafnum(&[-10.0, 10.0, 10.0]);
        let c = cm.point_leafnum(&[-10.0, -10.0, -10.0]);
        assert_ne!(a, b);
        assert_ne!(b, c);
        // on the split plane goes to the front
        assert_eq!(cm.point_leafnum(&[0.0, 10.0, 10.0]), a);
    }

    #[test]
    fn test_box_leafnums_all_leafs() {
        let cm = TestMap::new().depth(3).load();
        let mut list = [0usize; 16];
        let r = cm.box_leafnums(&[-10.0; 3], &[10.0; 3], &mut list);
        assert_eq!(r.count, 8, "box around the center touches every octant");
        assert!(!r.overflowed);
        assert_eq!(r.last_leaf, list[r.count - 1]);
    }

    #[test]
    fn test_box_leafnums_overflow() {
        let cm = TestMap::new().depth(3).load();
        let mut list = [usize::MAX; 5];
        let r = cm.box_leafnums(&[-10.0; 3], &[10.0; 3], &mut list);
        assert_eq!(r.count, 5, "returns exactly the list size");
        assert!(r.overflowed);
        assert_ne!(r.last_leaf, list[4], "last leaf visited was not stored");
    }

    #[test]
    fn test_box_leafnums_single_leaf() {
        let cm = TestMap::new().depth(3).load();
        let mut list = [0usize; 8];
        let r = cm.box_leafnums(&[10.0; 3], &[20.0; 3], &mut list);
        assert_eq!(r.count, 1);
        assert_eq!(list[0], cm.point_leafnum(&[15.0; 3]));
    }

    #[test]
    fn test_box_brushes_dedupes() {
        let cm = TestMap::new()
            .depth(3)
            .brush([-32.0; 3], [32.0; 3], Contents::SOLID)
            .brush([100.0; 3], [120.0; 3], Contents::WATER)
            .load();
        let mut list = [0usize; 8];
        let r = cm.box_brushes(&[-40.0; 3], &[40.0; 3], &mut list);
        assert_eq!(r.count, 1, "brush spans 8 leafs but is listed once");
        assert_eq!(list[0], 0);

        let r = cm.box_brushes(&[-200.0; 3], &[200.0; 3], &mut list);
        assert_eq!(r.count, 2);

        let mut small = [0usize; 1];
        let r = cm.box_brushes(&[-200.0; 3], &[200.0; 3], &mut small);
        assert_eq!(r.count, 1);
        assert!(r.overflowed);
    }

    // ============================================================
    // Point contents
    // ============================================================

    #[test]
    fn test_point_contents_or_of_brushes() {
        let cm = TestMap::new()
            .depth(3)
            .brush([0.0; 3], [64.0; 3], Contents::SOLID)
            .brush([32.0; 3], [96.0; 3], Contents::WATER)
            .load();
        assert_eq!(cm.point_contents(&[16.0; 3], 0), Contents::SOLID);
        assert_eq!(cm.point_contents(&[48.0; 3], 0), Contents::SOLID | Contents::WATER);
        assert_eq!(cm.point_contents(&[80.0; 3], 0), Contents::WATER);
        assert_eq!(cm.point_contents(&[200.0; 3], 0), Contents::empty());
        // faces count as inside
        assert_eq!(cm.point_contents(&[64.0, 10.0, 10.0], 0), Contents::SOLID);
    }

    #[test]
    fn test_point_contents_empty_world() {
        let cm = ClipMap::empty();
        assert!(cm.point_contents(&[0.0; 3], 0).is_empty());
    }

    #[test]
    fn test_point_contents_temp_box() {
        let mut cm = ClipMap::empty();
        let h = cm.temp_box_model(&[-16.0; 3], &[16.0; 3], false);
        assert_eq!(cm.point_contents(&[0.0; 3], h), Contents::BODY);
        assert!(cm.point_contents(&[17.0, 0.0, 0.0], h).is_empty());
    }

    #[test]
    fn test_transformed_point_contents() {
        let cm = TestMap::new()
            .depth(1)
            .submodel([0.0, -8.0, -8.0], [64.0, 8.0, 8.0], Contents::SOLID)
            .load();
        let origin = [100.0, 0.0, 0.0];
        // unrotated the bar extends along +x from the origin
        assert_eq!(
            cm.transformed_point_contents(&[150.0, 0.0, 0.0], 1, &origin, &[0.0; 3]),
            Contents::SOLID
        );
        // yawed 90 degrees it extends along +y
        let angles = [0.0, 90.0, 0.0];
        assert!(cm.transformed_point_contents(&[150.0, 0.0, 0.0], 1, &origin, &angles).is_empty());
        assert_eq!(
            cm.transformed_point_contents(&[100.0, 50.0, 0.0], 1, &origin, &angles),
            Contents::SOLID
        );
    }

    // ============================================================
    // PVS
    // ============================================================

    #[test]
    fn test_cluster_pvs_unvised() {
        let cm = TestMap::new().depth(2).load();
        let pvs = cm.cluster_pvs(2);
        assert!(!pvs.is_vised());
        assert_eq!(pvs.bytes()[0], 1 << 2, "only the own bit is set");
        assert!(pvs.can_see(0), "unvised maps assume mutual visibility");
        assert!(!pvs.can_see(99));
    }

    #[test]
    fn test_cluster_pvs_vised() {
        // clusters see themselves and their neighbours by index
        let cm = TestMap::new().depth(2).vis(|a, b| (a - b).abs() <= 1).load();
        let pvs = cm.cluster_pvs(0);
        assert!(pvs.is_vised());
        assert!(pvs.can_see(0));
        assert!(pvs.can_see(1));
        assert!(!pvs.can_see(2));
        assert_eq!(pvs.bytes()[0], 0b0011);
    }

    #[test]
    fn test_cluster_pvs_invalid_cluster() {
        let cm = TestMap::new().depth(2).load();
        let pvs = cm.cluster_pvs(-1);
        assert!(pvs.bytes().iter().all(|&b| b == 0));
        assert!(!pvs.can_see(0));
    }

    // ============================================================
    // Area portals
    // ============================================================

    #[test]
    fn test_portal_open_close() {
        let mut p = AreaPortals::new(3);
        assert!(!p.connected(0, 1));
        assert!(p.connected(1, 1));
        p.adjust(0, 1, true);
        assert!(p.connected(0, 1));
        assert!(!p.connected(0, 2));
        p.adjust(1, 2, true);
        assert!(p.connected(0, 2), "connectivity is transitive");
        p.adjust(0, 1, false);
        assert!(!p.connected(0, 2));
        assert!(p.connected(1, 2));
    }

    #[test]
    fn test_portal_ref_counting() {
        let mut p = AreaPortals::new(2);
        p.adjust(0, 1, true);
        p.adjust(1, 0, true);
        p.adjust(0, 1, false);
        assert!(p.connected(0, 1), "one reference still open");
        p.adjust(0, 1, false);
        assert!(!p.connected(0, 1));
    }

    #[test]
    #[should_panic(expected = "negative reference count")]
    fn test_portal_close_unopened() {
        let mut p = AreaPortals::new(2);
        p.adjust(0, 1, false);
    }

    #[test]
    #[should_panic(expected = "bad area number")]
    fn test_portal_bad_area() {
        let mut p = AreaPortals::new(2);
        p.adjust(0, 5, true);
    }

    #[test]
    fn test_negative_areas() {
        let mut p = AreaPortals::new(2);
        p.adjust(-1, 0, true);
        assert!(!p.connected(-1, 0));
    }

    #[test]
    fn test_write_area_bits() {
        let mut p = AreaPortals::new(10);
        p.adjust(0, 9, true);
        let mut buf = [0xaau8; 4];
        let n = p.write_area_bits(&mut buf, 0, false);
        assert_eq!(n, 2);
        assert_eq!(buf[0], 0b0000_0001);
        assert_eq!(buf[1], 0b0000_0010);
        assert_eq!(buf[2], 0xaa, "bytes past the area count are untouched");

        let n = p.write_area_bits(&mut buf, -1, false);
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[0xff, 0xff]);

        p.write_area_bits(&mut buf, 3, true);
        assert_eq!(&buf[..2], &[0xff, 0xff]);
    }

    #[test]
    #[should_panic(expected = "buffer holds")]
    fn test_write_area_bits_small_buffer() {
        let mut p = AreaPortals::new(20);
        let mut buf = [0u8; 2];
        p.write_area_bits(&mut buf, 0, false);
    }

    #[test]
    fn test_portal_state_roundtrip() {
        let mut p = AreaPortals::new(4);
        p.adjust(0, 2, true);
        p.adjust(2, 3, true);
        let mut saved = Vec::new();
        p.write_state(&mut saved).unwrap();
        assert_eq!(saved.len(), 16 * 4);

        let mut q = AreaPortals::new(4);
        q.read_state(&mut saved.as_slice()).unwrap();
        assert!(q.connected(0, 3));
        assert!(!q.connected(0, 1));
    }

    #[test]
    fn test_portal_state_rejects_asymmetric() {
        let mut bytes = vec![0u8; 4 * 4];
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes()); // (0,1) only
        let mut p = AreaPortals::new(2);
        assert!(p.read_state(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_no_areas_config() {
        let mut cm = TestMap::new().depth(1).split_areas(0, 0.0).load();
        assert!(!cm.areas_connected(0, 1));
        cm.config.no_areas = true;
        assert!(cm.areas_connected(0, 1));
        let mut buf = [0u8; 1];
        cm.write_area_bits(&mut buf, 0);
        assert_eq!(buf[0], 0xff);
    }

    proptest! {
        #[test]
        fn prop_portal_symmetry(ops in proptest::collection::vec((0i32..6, 0i32..6, any::<bool>()), 0..40)) {
            let mut p = AreaPortals::new(6);
            for (a, b, open) in ops {
                let n = p.num_areas;
                if !open && p.refs[a as usize * n + b as usize] == 0 {
                    continue;
                }
                p.adjust(a, b, open);
                for x in 0..6 {
                    for y in 0..6 {
                        prop_assert_eq!(p.connected(x, y), p.connected(y, x));
                    }
                }
            }
        }
    }
}
