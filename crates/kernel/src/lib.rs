//! Immersed-Boundary Rank Kernel
//!
//! This crate provides everything one rank needs to couple a fluid grid with
//! immersed bodies, without any inter-rank communication. The distributed
//! engine in the `orchestrator` crate drives these pieces.
//!
//! # Modules
//! - [`grid`] -- Global grid, index boxes, per-rank subdomains with halos.
//! - [`field`] -- `FieldSlice`: local interior plus ghost layers, pack/unpack.
//! - [`delta`] -- Regularized delta kernels (linear, Roma 3-point, Peskin 4-point, cosine).
//! - [`transfer`] -- `Interpolator` / `Spreader` sharing one kernel footprint.
//! - [`body`] -- Rigid and soft body state, marker ids.
//! - [`forcing_grid`] -- Body state to marker kinematics, marker forces to body loads.
//! - [`flow`] -- `FlowKernel` trait and the reference viscous kernel.
//! - [`structure`] -- `StructureKernel` trait, rigid-body and rod kernels.

#![warn(missing_docs)]

pub mod body;
pub mod delta;
pub mod error;
pub mod field;
pub mod flow;
pub mod forcing_grid;
pub mod grid;
pub mod structure;
pub mod transfer;
pub mod vec3;

pub use body::{
    marker_id, split_marker_id, Body, BodyId, BodyKind, BodyLoads, BodyState, MarkerId, Motion,
    RigidBodyState, RodState,
};
pub use delta::DeltaKernel;
pub use error::{KernelError, KernelResult};
pub use field::{FieldSlice, UnpackMode};
pub use flow::{FlowKernel, ViscousFlowKernel, ViscousFlowParams};
pub use forcing_grid::ForcingGrid;
pub use grid::{Axis, GlobalGrid, IndexBox, Side, Subdomain};
pub use structure::{RigidBodyKernel, RodKernel, StructureKernel};
pub use transfer::{transfer_gains, Footprint, Interpolator, Spreader};
pub use vec3::Vec3;
