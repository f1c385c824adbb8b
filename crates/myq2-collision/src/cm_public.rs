// cm_public.rs — the collision model as seen by the game and client
//
// `CollisionModelManager` owns the loaded world and is the only
// implementation of `CollisionModel`. Queries borrow it immutably; only
// loading, clearing and temp box setup need `&mut`.

use std::io::{Read, Write};

use crate::cm_local::{ClipHandle, ClipMap};
use crate::cm_test::{ClusterPvs, ListCount};
use crate::config::CmConfig;
use crate::error::CmResult;
use crate::q_shared::{Contents, Trace, Vec3};
use crate::qfiles::BspLumps;
use log::{debug, warn};

// ============================================================
// Collision model trait
// ============================================================

/// Everything the server, client prediction and bots ask of the static
/// world.
///
/// `Sync` so visibility and trace queries can run from worker threads
/// while the world is loaded.
pub trait CollisionModel: Sync {
    /// Replaces the world with the map built from `lumps` and returns its
    /// checksum. An empty name loads the empty world.
    fn load_map(&mut self, name: &str, lumps: &BspLumps, clientload: bool) -> CmResult<u32>;
    fn clear_map(&mut self);

    fn inline_model(&self, index: usize) -> ClipHandle;
    fn temp_box_model(&mut self, mins: &Vec3, maxs: &Vec3, capsule: bool) -> ClipHandle;
    fn temp_capsule_model(&mut self, mins: &Vec3, maxs: &Vec3) -> ClipHandle {
        self.temp_box_model(mins, maxs, true)
    }
    fn model_bounds(&self, model: ClipHandle) -> (Vec3, Vec3);
    fn num_inline_models(&self) -> usize;
    fn num_clusters(&self) -> usize;
    fn entity_string(&self) -> &str;

    fn point_contents(&self, p: &Vec3, model: ClipHandle) -> Contents;
    fn transformed_point_contents(&self, p: &Vec3, model: ClipHandle, origin: &Vec3, angles: &Vec3) -> Contents;

    fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace;
    #[allow(clippy::too_many_arguments)]
    fn transformed_box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace;
    fn capsule_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace;
    #[allow(clippy::too_many_arguments)]
    fn transformed_capsule_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace;
    fn bisphere_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        start_radius: f32,
        end_radius: f32,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace;
    #[allow(clippy::too_many_arguments)]
    fn transformed_bisphere_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        start_radius: f32,
        end_radius: f32,
        model: ClipHandle,
        brushmask: Contents,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace;

    fn box_leafnums(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount;
    fn box_brushes(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount;
    fn point_leafnum(&self, p: &Vec3) -> usize;
    fn leaf_cluster(&self, leafnum: usize) -> i32;
    fn leaf_area(&self, leafnum: usize) -> i32;

    fn cluster_pvs(&self, cluster: i32) -> ClusterPvs<'_>;
    fn adjust_area_portal_state(&self, area1: i32, area2: i32, open: bool);
    fn areas_connected(&self, area1: i32, area2: i32) -> bool;
    /// Fills `buffer` with one bit per area reachable from `area` and
    /// returns the number of bytes used.
    fn write_area_bits(&self, buffer: &mut [u8], area: i32) -> usize;
    fn write_portal_state(&self, writer: &mut dyn Write) -> std::io::Result<()>;
    fn read_portal_state(&self, reader: &mut dyn Read) -> std::io::Result<()>;
}

// ============================================================
// CollisionModelManager
// ============================================================

/// Owns the current world. Starts out holding the empty world.
#[derive(Debug)]
pub struct CollisionModelManager {
    cm: ClipMap,
    config: CmConfig,
}

impl Default for CollisionModelManager {
    fn default() -> Self {
        Self::new(CmConfig::default())
    }
}

impl CollisionModelManager {
    pub fn new(config: CmConfig) -> Self {
        let mut cm = ClipMap::empty();
        cm.config = config;
        Self { cm, config }
    }

    /// The loaded world, for debug drawing and tools.
    pub fn world(&self) -> &ClipMap {
        &self.cm
    }

    pub fn config(&self) -> &CmConfig {
        &self.config
    }

    /// Sets one `cm_*` variable; the change applies to the current world
    /// and every later load.
    pub fn set_config(&mut self, name: &str, value: &str) -> CmResult<()> {
        self.config.set(name, value)?;
        self.cm.config = self.config;
        Ok(())
    }

    pub fn checksum(&self) -> u32 {
        self.cm.checksum
    }

    fn reset(&mut self) {
        self.cm = ClipMap::empty();
        self.cm.config = self.config;
    }
}

impl CollisionModel for CollisionModelManager {
    fn load_map(&mut self, name: &str, lumps: &BspLumps, clientload: bool) -> CmResult<u32> {
        // the client may load the map the local server already has
        if clientload && !name.is_empty() && self.cm.name == name {
            debug!("load_map: \"{}\" already loaded, checksum {:08x}", name, self.cm.checksum);
            return Ok(self.cm.checksum);
        }

        // free old stuff
        self.reset();

        if name.is_empty() {
            return Ok(0);
        }

        match ClipMap::load(name, lumps, self.config) {
            Ok(cm) => {
                self.cm = cm;
                Ok(self.cm.checksum)
            }
            Err(e) => {
                warn!("load_map: couldn't load \"{}\": {}", name, e);
                Err(e)
            }
        }
    }

    fn clear_map(&mut self) {
        debug!("clear_map: releasing \"{}\"", self.cm.name);
        self.reset();
    }

    fn inline_model(&self, index: usize) -> ClipHandle {
        self.cm.inline_model(index)
    }

    fn temp_box_model(&mut self, mins: &Vec3, maxs: &Vec3, capsule: bool) -> ClipHandle {
        self.cm.temp_box_model(mins, maxs, capsule)
    }

    fn model_bounds(&self, model: ClipHandle) -> (Vec3, Vec3) {
        self.cm.model_bounds(model)
    }

    fn num_inline_models(&self) -> usize {
        self.cm.num_inline_models()
    }

    fn num_clusters(&self) -> usize {
        self.cm.num_clusters()
    }

    fn entity_string(&self) -> &str {
        self.cm.entity_string()
    }

    fn point_contents(&self, p: &Vec3, model: ClipHandle) -> Contents {
        self.cm.point_contents(p, model)
    }

    fn transformed_point_contents(&self, p: &Vec3, model: ClipHandle, origin: &Vec3, angles: &Vec3) -> Contents {
        self.cm.transformed_point_contents(p, model, origin, angles)
    }

    fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        self.cm.box_trace(start, end, mins, maxs, model, brushmask)
    }

    fn transformed_box_trace(
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
        self.cm
            .transformed_box_trace(start, end, mins, maxs, model, brushmask, origin, angles)
    }

    fn capsule_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        self.cm.capsule_trace(start, end, mins, maxs, model, brushmask)
    }

    fn transformed_capsule_trace(
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
        self.cm
            .transformed_capsule_trace(start, end, mins, maxs, model, brushmask, origin, angles)
    }

    fn bisphere_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        start_radius: f32,
        end_radius: f32,
        model: ClipHandle,
        brushmask: Contents,
    ) -> Trace {
        self.cm
            .bisphere_trace(start, end, start_radius, end_radius, model, brushmask)
    }

    fn transformed_bisphere_trace(
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
        self.cm.transformed_bisphere_trace(
            start,
            end,
            start_radius,
            end_radius,
            model,
            brushmask,
            origin,
            angles,
        )
    }

    fn box_leafnums(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount {
        self.cm.box_leafnums(mins, maxs, list)
    }

    fn box_brushes(&self, mins: &Vec3, maxs: &Vec3, list: &mut [usize]) -> ListCount {
        self.cm.box_brushes(mins, maxs, list)
    }

    fn point_leafnum(&self, p: &Vec3) -> usize {
        self.cm.point_leafnum(p)
    }

    fn leaf_cluster(&self, leafnum: usize) -> i32 {
        self.cm.leaf_cluster(leafnum)
    }

    fn leaf_area(&self, leafnum: usize) -> i32 {
        self.cm.leaf_area(leafnum)
    }

    fn cluster_pvs(&self, cluster: i32) -> ClusterPvs<'_> {
        self.cm.cluster_pvs(cluster)
    }

    fn adjust_area_portal_state(&self, area1: i32, area2: i32, open: bool) {
        self.cm.adjust_area_portal_state(area1, area2, open)
    }

    fn areas_connected(&self, area1: i32, area2: i32) -> bool {
        self.cm.areas_connected(area1, area2)
    }

    fn write_area_bits(&self, buffer: &mut [u8], area: i32) -> usize {
        self.cm.write_area_bits(buffer, area)
    }

    fn write_portal_state(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        self.cm.write_portal_state(writer)
    }

    fn read_portal_state(&self, reader: &mut dyn Read) -> std::io::Result<()> {
        self.cm.read_portal_state(reader)
    }
}
