//! Checkpoint files for exact restart
//!
//! A checkpoint of step `n` is a directory `step-<n>` holding one
//! `rank-<r>.json` per rank (field slice, owned markers, home bodies) and a
//! `markers.json` table written by rank 0 listing every marker with its
//! owner. On restart each rank loads its own file and checks it against the
//! table before the run continues.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use kernel::{Body, BodyId, FieldSlice, MarkerId, Subdomain, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{CouplingError, CouplingResult};
use crate::markers::LagrangianMarker;

/// Everything one rank needs to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCheckpoint {
    /// Rank that wrote the file
    pub rank: usize,
    /// Last completed step
    pub step: u64,
    /// Simulated time after that step
    pub time: f64,
    /// Timestep for the next step
    pub dt: f64,
    /// Consecutive instability warnings so far
    pub consecutive_warnings: u32,
    /// Subdomain of the writing rank
    pub subdomain: Subdomain,
    /// Velocity slice, halo included
    pub velocity: FieldSlice,
    /// Markers owned by the rank
    pub markers: Vec<LagrangianMarker>,
    /// Bodies homed on the rank
    pub bodies: Vec<Body>,
}

/// One row of the global marker table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    /// Marker id
    pub id: MarkerId,
    /// Owning body
    pub body: BodyId,
    /// Owning rank
    pub owner: usize,
    /// Position
    pub position: Vec3,
    /// Structure velocity
    pub velocity: Vec3,
}

/// Home rank and marker count of one body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    /// Body id
    pub id: BodyId,
    /// Home rank
    pub home: usize,
    /// Number of markers
    pub markers: usize,
}

/// Global marker table of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerTable {
    /// Step of the checkpoint
    pub step: u64,
    /// Number of ranks that wrote it
    pub ranks: usize,
    /// Bodies
    pub bodies: Vec<BodyRecord>,
    /// Markers, in id order
    pub markers: Vec<MarkerRecord>,
}

impl MarkerTable {
    /// Table from a gathered marker list.
    pub fn new(
        step: u64,
        ranks: usize,
        homes: &BTreeMap<BodyId, usize>,
        counts: &BTreeMap<BodyId, usize>,
        markers: &[LagrangianMarker],
    ) -> Self {
        let bodies = homes
            .iter()
            .map(|(&id, &home)| BodyRecord {
                id,
                home,
                markers: counts.get(&id).copied().unwrap_or(0),
            })
            .collect();
        let mut markers: Vec<MarkerRecord> = markers
            .iter()
            .map(|m| MarkerRecord {
                id: m.id,
                body: m.body,
                owner: m.owner,
                position: m.position,
                velocity: m.velocity,
            })
            .collect();
        markers.sort_by_key(|m| m.id);
        Self {
            step,
            ranks,
            bodies,
            markers,
        }
    }

    /// Check that a rank's checkpoint agrees with the table.
    pub fn verify_rank(&self, checkpoint: &RankCheckpoint) -> CouplingResult<()> {
        let rank = checkpoint.rank;
        if checkpoint.step != self.step {
            return Err(CouplingError::Checkpoint(format!(
                "rank {} file is for step {}, marker table for step {}",
                rank, checkpoint.step, self.step
            )));
        }
        let expected: BTreeMap<MarkerId, &MarkerRecord> = self
            .markers
            .iter()
            .filter(|r| r.owner == rank)
            .map(|r| (r.id, r))
            .collect();
        if expected.len() != checkpoint.markers.len() {
            return Err(CouplingError::Checkpoint(format!(
                "rank {} holds {} markers, table assigns it {}",
                rank,
                checkpoint.markers.len(),
                expected.len()
            )));
        }
        for m in &checkpoint.markers {
            let record = expected.get(&m.id).ok_or_else(|| {
                CouplingError::Checkpoint(format!(
                    "marker {:#x} on rank {} is not assigned to it by the table",
                    m.id, rank
                ))
            })?;
            if record.body != m.body || record.position != m.position || record.velocity != m.velocity {
                return Err(CouplingError::Checkpoint(format!(
                    "marker {:#x} on rank {} disagrees with the table",
                    m.id, rank
                )));
            }
        }
        for body in &checkpoint.bodies {
            let home = self.bodies.iter().find(|b| b.id == body.id).map(|b| b.home);
            if home != Some(rank) {
                return Err(CouplingError::Checkpoint(format!(
                    "body {} stored on rank {} but homed on {:?}",
                    body.id, rank, home
                )));
            }
        }
        Ok(())
    }
}

/// Directory of the checkpoint for `step` under `root`.
pub fn step_directory(root: &Path, step: u64) -> PathBuf {
    root.join(format!("step-{:08}", step))
}

fn rank_file(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("rank-{:04}.json", rank))
}

fn table_file(dir: &Path) -> PathBuf {
    dir.join("markers.json")
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CouplingResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> CouplingResult<T> {
    let contents = fs::read_to_string(path).map_err(|e| {
        CouplingError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write one rank's file into `dir`, creating it if needed.
pub fn write_rank(dir: &Path, checkpoint: &RankCheckpoint) -> CouplingResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = rank_file(dir, checkpoint.rank);
    write_json(&path, checkpoint)?;
    Ok(path)
}

/// Read `rank`'s file from `dir`.
pub fn read_rank(dir: &Path, rank: usize) -> CouplingResult<RankCheckpoint> {
    let checkpoint: RankCheckpoint = read_json(&rank_file(dir, rank))?;
    if checkpoint.rank != rank {
        return Err(CouplingError::Checkpoint(format!(
            "file for rank {} was written by rank {}",
            rank, checkpoint.rank
        )));
    }
    Ok(checkpoint)
}

/// Write the marker table into `dir`.
pub fn write_table(dir: &Path, table: &MarkerTable) -> CouplingResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = table_file(dir);
    write_json(&path, table)?;
    Ok(path)
}

/// Read the marker table from `dir`.
pub fn read_table(dir: &Path) -> CouplingResult<MarkerTable> {
    read_json(&table_file(dir))
}
