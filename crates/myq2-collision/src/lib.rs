#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::needless_range_loop,
         clippy::manual_range_contains, clippy::comparison_chain, clippy::collapsible_if,
         clippy::collapsible_else_if)]

//! Static world collision for Quake III style BSP maps.
//!
//! A map's collision lumps are loaded into a [`ClipMap`], which answers
//! box, capsule and bi-sphere sweeps, point contents, leaf and brush
//! queries, PVS rows and area connectivity. [`CollisionModelManager`]
//! owns the current world and exposes it through the [`CollisionModel`]
//! trait.

pub mod q_shared;
pub mod polylib;
pub mod qfiles;
pub mod error;
pub mod config;
pub mod cm_local;
pub mod cm_patch;
pub mod cm_trace;
pub mod cm_test;
pub mod cm_load;
pub mod cm_public;

#[cfg(test)]
mod test_maps;

pub use cm_load::{com_block_checksum, map_checksum};
pub use cm_local::{ClipHandle, ClipMap, BOX_MODEL_HANDLE, CAPSULE_MODEL_HANDLE};
pub use cm_public::{CollisionModel, CollisionModelManager};
pub use cm_test::{ClusterPvs, ListCount};
pub use cm_trace::{SphereShape, TraceShape};
pub use config::CmConfig;
pub use error::{CmError, CmResult, ErrorKind};
pub use q_shared::{Contents, HitSource, SurfaceFlags, Trace, Vec3};
pub use qfiles::BspLumps;
