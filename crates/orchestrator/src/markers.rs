//! Lagrangian markers and their rank ownership
//!
//! A marker is owned by the rank whose interior contains its position. Only
//! the owner interpolates at and spreads from a marker. Every body has a
//! fixed home rank that keeps the body's structural state and an owner table
//! mapping each of its markers to the owning rank.
//!
//! Ownership changes only inside [`BodyRankMapper::migrate`]: the old owner
//! ships the marker, the new owner inserts it and acknowledges, and only then
//! does the old owner drop its copy. [`BodyRankMapper::audit`] afterwards
//! checks on each home rank that every marker has exactly one owner.

use std::collections::{BTreeMap, BTreeSet};

use kernel::transfer::check_in_domain;
use kernel::vec3::{self, Vec3};
use kernel::{marker_id, split_marker_id, Body, BodyId, DeltaKernel, KernelError, MarkerId};
use serde::{Deserialize, Serialize};

use crate::comm::{Payload, Tag, Transport};
use crate::domain::DomainDecomposer;
use crate::error::{CouplingError, CouplingResult};

/// A point on a body surface (or rod centerline) coupled to the fluid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagrangianMarker {
    /// Globally unique id encoding body and marker index
    pub id: MarkerId,
    /// Body the marker belongs to
    pub body: BodyId,
    /// Current position (not wrapped into the periodic box)
    pub position: Vec3,
    /// Prescribed no-slip velocity from the structure
    pub velocity: Vec3,
    /// Fluid velocity interpolated at the last step
    pub fluid_velocity: Vec3,
    /// Time integral of the slip velocity
    pub mismatch: Vec3,
    /// Coupling force exerted on the fluid at the last step
    pub force: Vec3,
    /// Owning rank
    pub owner: usize,
}

impl LagrangianMarker {
    /// Fresh marker with no coupling history.
    pub fn new(body: BodyId, index: usize, position: Vec3, velocity: Vec3, owner: usize) -> Self {
        Self {
            id: marker_id(body, index),
            body,
            position,
            velocity,
            fluid_velocity: velocity,
            mismatch: vec3::ZERO,
            force: vec3::ZERO,
            owner,
        }
    }

    /// Index of the marker within its body.
    pub fn index(&self) -> usize {
        split_marker_id(self.id).1
    }

    /// Fluid minus structure velocity.
    pub fn slip(&self) -> Vec3 {
        vec3::sub(self.fluid_velocity, self.velocity)
    }
}

/// Counts from one migration round on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    /// Markers handed to other ranks
    pub sent: usize,
    /// Markers taken over from other ranks
    pub received: usize,
}

#[derive(Debug, Clone)]
struct BodyEntry {
    home: usize,
    markers: usize,
}

/// Ownership bookkeeping for one rank.
#[derive(Debug, Clone)]
pub struct BodyRankMapper {
    rank: usize,
    size: usize,
    kernel: DeltaKernel,
    owned: BTreeMap<MarkerId, LagrangianMarker>,
    bodies: BTreeMap<BodyId, BodyEntry>,
    /// Owner of each marker, for bodies homed on this rank
    owner_tables: BTreeMap<BodyId, Vec<usize>>,
}

fn violation(step: u64, marker: MarkerId, claimants: Vec<usize>) -> CouplingError {
    CouplingError::MigrationConsistency {
        step,
        marker,
        claimants,
    }
}

impl BodyRankMapper {
    /// Empty mapper for `rank` of `size`.
    pub fn new(rank: usize, size: usize, kernel: DeltaKernel) -> Self {
        Self {
            rank,
            size,
            kernel,
            owned: BTreeMap::new(),
            bodies: BTreeMap::new(),
            owner_tables: BTreeMap::new(),
        }
    }

    /// Make a body known to this rank. Every rank registers every body.
    pub fn register_body(&mut self, body: BodyId, home: usize, markers: usize) {
        self.bodies.insert(body, BodyEntry { home, markers });
        if home == self.rank {
            self.owner_tables.insert(body, vec![usize::MAX; markers]);
        }
    }

    /// Create the markers of a newly registered body from its kinematics.
    ///
    /// Every rank calls this with the same data; each keeps the markers it
    /// owns and the home rank fills in the owner table.
    pub fn adopt_initial(
        &mut self,
        decomposition: &DomainDecomposer,
        body: BodyId,
        kinematics: &[(Vec3, Vec3)],
    ) -> CouplingResult<()> {
        for (index, &(position, velocity)) in kinematics.iter().enumerate() {
            let id = marker_id(body, index);
            let owner = decomposition
                .owner_of(position)
                .ok_or(CouplingError::MarkerOutOfDomain { step: 0, marker: id })?;
            if owner == self.rank {
                self.owned
                    .insert(id, LagrangianMarker::new(body, index, position, velocity, owner));
            }
            if let Some(table) = self.owner_tables.get_mut(&body) {
                table[index] = owner;
            }
        }
        Ok(())
    }

    /// Take over a marker outside the migration protocol (restart, tests).
    pub fn insert(&mut self, mut marker: LagrangianMarker) -> CouplingResult<()> {
        if self.owned.contains_key(&marker.id) {
            return Err(violation(0, marker.id, vec![self.rank, self.rank]));
        }
        marker.owner = self.rank;
        self.owned.insert(marker.id, marker);
        Ok(())
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Markers owned here, in id order.
    pub fn owned(&self) -> impl Iterator<Item = &LagrangianMarker> {
        self.owned.values()
    }

    /// Mutable access to owned markers, in id order.
    pub fn owned_mut(&mut self) -> impl Iterator<Item = &mut LagrangianMarker> {
        self.owned.values_mut()
    }

    /// Number of owned markers.
    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// True if this rank owns `id`.
    pub fn owns(&self, id: MarkerId) -> bool {
        self.owned.contains_key(&id)
    }

    /// Home rank of `body`.
    pub fn home_of(&self, body: BodyId) -> Option<usize> {
        self.bodies.get(&body).map(|b| b.home)
    }

    /// Home ranks of all registered bodies.
    pub fn homes(&self) -> BTreeMap<BodyId, usize> {
        self.bodies.iter().map(|(&id, b)| (id, b.home)).collect()
    }

    /// Marker counts of all registered bodies.
    pub fn marker_counts(&self) -> BTreeMap<BodyId, usize> {
        self.bodies.iter().map(|(&id, b)| (id, b.markers)).collect()
    }

    /// Owner table of a body homed on this rank.
    pub fn owner_table(&self, body: BodyId) -> Option<&[usize]> {
        self.owner_tables.get(&body).map(|t| t.as_slice())
    }

    /// Ranks owning at least one marker of a body homed here.
    pub fn body_ranks(&self, body: BodyId) -> Vec<usize> {
        let ranks: BTreeSet<usize> = self
            .owner_tables
            .get(&body)
            .map(|t| t.iter().copied().filter(|&r| r < self.size).collect())
            .unwrap_or_default();
        ranks.into_iter().collect()
    }

    /// Ranks other than the owner whose halo overlaps an owned marker's footprint.
    pub fn ghost_holders(&self, decomposition: &DomainDecomposer, id: MarkerId) -> Option<Vec<usize>> {
        self.owned
            .get(&id)
            .map(|m| decomposition.ghost_holders(m.position, self.kernel))
    }

    fn expected_sources(&self) -> BTreeSet<usize> {
        self.owner_tables
            .values()
            .flat_map(|t| t.iter().copied())
            .collect()
    }

    fn owned_homes(&self) -> BTreeSet<usize> {
        self.owned
            .values()
            .filter_map(|m| self.home_of(m.body))
            .collect()
    }

    /// Route the coupling forces of owned markers to their bodies' home ranks
    /// and collect, on each home, the complete per-marker force arrays.
    pub fn gather_forces(
        &mut self,
        transport: &mut dyn Transport,
        step: u64,
    ) -> CouplingResult<BTreeMap<BodyId, Vec<Vec3>>> {
        let mut outgoing: BTreeMap<usize, Vec<(MarkerId, Vec3)>> =
            self.owned_homes().into_iter().map(|h| (h, Vec::new())).collect();
        for m in self.owned.values() {
            if let Some(home) = self.home_of(m.body) {
                if let Some(list) = outgoing.get_mut(&home) {
                    list.push((m.id, m.force));
                }
            }
        }
        for (dest, forces) in outgoing {
            transport.send(dest, Tag::BodyForces, step, Payload::Forces(forces))?;
        }

        let mut result: BTreeMap<BodyId, Vec<Option<(usize, Vec3)>>> = self
            .owner_tables
            .iter()
            .map(|(&body, table)| (body, vec![None; table.len()]))
            .collect();
        for source in self.expected_sources() {
            let forces = transport
                .recv(source, Tag::BodyForces, step, "force gather")?
                .into_forces("force gather", source)?;
            for (id, force) in forces {
                let (body, index) = split_marker_id(id);
                let slot = result
                    .get_mut(&body)
                    .and_then(|v| v.get_mut(index))
                    .ok_or_else(|| violation(step, id, vec![source]))?;
                if let Some((first, _)) = slot {
                    return Err(violation(step, id, vec![*first, source]));
                }
                *slot = Some((source, force));
            }
        }

        let mut forces = BTreeMap::new();
        for (body, slots) in result {
            let mut list = Vec::with_capacity(slots.len());
            for (index, slot) in slots.into_iter().enumerate() {
                match slot {
                    Some((_, f)) => list.push(f),
                    None => return Err(violation(step, marker_id(body, index), Vec::new())),
                }
            }
            forces.insert(body, list);
        }
        Ok(forces)
    }

    /// Send the new marker kinematics of home bodies to the current owners
    /// and apply the kinematics received for owned markers.
    pub fn scatter_kinematics(
        &mut self,
        transport: &mut dyn Transport,
        step: u64,
        bodies: &BTreeMap<BodyId, Body>,
    ) -> CouplingResult<()> {
        let mut outgoing: BTreeMap<usize, Vec<(MarkerId, Vec3, Vec3)>> = self
            .expected_sources()
            .into_iter()
            .map(|r| (r, Vec::new()))
            .collect();
        for (&id, table) in &self.owner_tables {
            let body = bodies.get(&id).ok_or_else(|| KernelError::InvalidBody {
                body: id,
                reason: format!("missing on its home rank {}", self.rank),
            })?;
            for (index, (position, velocity)) in body.marker_kinematics().into_iter().enumerate() {
                let owner = table.get(index).copied().unwrap_or(usize::MAX);
                let list = outgoing
                    .get_mut(&owner)
                    .ok_or_else(|| violation(step, marker_id(id, index), Vec::new()))?;
                list.push((marker_id(id, index), position, velocity));
            }
        }
        for (dest, kinematics) in outgoing {
            transport.send(dest, Tag::Kinematics, step, Payload::Kinematics(kinematics))?;
        }

        let mut updated = BTreeSet::new();
        for source in self.owned_homes() {
            let kinematics = transport
                .recv(source, Tag::Kinematics, step, "kinematics scatter")?
                .into_kinematics("kinematics scatter", source)?;
            for (id, position, velocity) in kinematics {
                let marker = self
                    .owned
                    .get_mut(&id)
                    .ok_or_else(|| violation(step, id, vec![self.rank]))?;
                if !updated.insert(id) {
                    return Err(violation(step, id, vec![self.rank]));
                }
                marker.position = position;
                marker.velocity = velocity;
            }
        }
        if let Some(stale) = self.owned.keys().find(|id| !updated.contains(id)) {
            return Err(violation(step, *stale, vec![self.rank]));
        }
        Ok(())
    }

    /// Hand markers that left this rank's interior to their new owners.
    ///
    /// Exchanges one (possibly empty) marker message and one acknowledgement
    /// with every migration partner. A marker may only move to a partner.
    pub fn migrate(
        &mut self,
        transport: &mut dyn Transport,
        step: u64,
        decomposition: &DomainDecomposer,
    ) -> CouplingResult<MigrationStats> {
        let partners = decomposition.migration_partners(self.rank);
        let mut outgoing: BTreeMap<usize, Vec<LagrangianMarker>> =
            partners.iter().map(|&p| (p, Vec::new())).collect();

        for m in self.owned.values() {
            if check_in_domain(self.kernel, decomposition.grid(), m.position).is_err() {
                return Err(CouplingError::MarkerOutOfDomain { step, marker: m.id });
            }
            let owner = decomposition
                .owner_of(m.position)
                .ok_or(CouplingError::MarkerOutOfDomain { step, marker: m.id })?;
            if owner == self.rank {
                continue;
            }
            let list = outgoing
                .get_mut(&owner)
                .ok_or_else(|| violation(step, m.id, vec![self.rank, owner]))?;
            let mut moved = m.clone();
            moved.owner = owner;
            list.push(moved);
        }

        let mut sent: BTreeMap<usize, Vec<MarkerId>> = BTreeMap::new();
        let mut stats = MigrationStats::default();
        for (dest, markers) in outgoing {
            stats.sent += markers.len();
            sent.insert(dest, markers.iter().map(|m| m.id).collect());
            transport.send(dest, Tag::Migrate, step, Payload::Markers(markers))?;
        }

        for &source in &partners {
            let markers = transport
                .recv(source, Tag::Migrate, step, "marker migration")?
                .into_markers("marker migration", source)?;
            let mut accepted = Vec::with_capacity(markers.len());
            for m in markers {
                if self.owned.contains_key(&m.id) {
                    return Err(violation(step, m.id, vec![self.rank, source]));
                }
                if decomposition.owner_of(m.position) != Some(self.rank) {
                    return Err(violation(step, m.id, vec![source]));
                }
                accepted.push(m.id);
                self.owned.insert(m.id, LagrangianMarker { owner: self.rank, ..m });
            }
            stats.received += accepted.len();
            transport.send(source, Tag::MigrateAck, step, Payload::Ids(accepted))?;
        }

        for &source in &partners {
            let acked = transport
                .recv(source, Tag::MigrateAck, step, "migration acknowledgement")?
                .into_ids("migration acknowledgement", source)?;
            let expected = sent.remove(&source).unwrap_or_default();
            if acked != expected {
                let marker = expected
                    .iter()
                    .chain(acked.iter())
                    .find(|id| !(expected.contains(id) && acked.contains(id)))
                    .copied()
                    .unwrap_or_default();
                return Err(violation(step, marker, vec![self.rank, source]));
            }
            for id in expected {
                self.owned.remove(&id);
            }
        }

        if stats.sent + stats.received > 0 {
            tracing::debug!(
                "Rank {} step {}: migrated {} markers out, {} in",
                self.rank,
                step,
                stats.sent,
                stats.received
            );
        }
        Ok(stats)
    }

    /// Check that every marker of every home body has exactly one owner and
    /// refresh the owner tables. All ranks must call this together.
    pub fn audit(&mut self, transport: &mut dyn Transport, step: u64) -> CouplingResult<()> {
        let homes: BTreeSet<usize> = self.bodies.values().map(|b| b.home).collect();
        let mut reports: BTreeMap<usize, Vec<MarkerId>> =
            homes.iter().map(|&h| (h, Vec::new())).collect();
        for m in self.owned.values() {
            if let Some(list) = self.home_of(m.body).and_then(|h| reports.get_mut(&h)) {
                list.push(m.id);
            }
        }
        for (dest, ids) in reports {
            transport.send(dest, Tag::Ownership, step, Payload::Ids(ids))?;
        }

        if self.owner_tables.is_empty() {
            return Ok(());
        }
        let mut claims: BTreeMap<BodyId, Vec<Vec<usize>>> = self
            .owner_tables
            .iter()
            .map(|(&body, table)| (body, vec![Vec::new(); table.len()]))
            .collect();
        for source in 0..self.size {
            let ids = transport
                .recv(source, Tag::Ownership, step, "ownership audit")?
                .into_ids("ownership audit", source)?;
            for id in ids {
                let (body, index) = split_marker_id(id);
                claims
                    .get_mut(&body)
                    .and_then(|c| c.get_mut(index))
                    .ok_or_else(|| violation(step, id, vec![source]))?
                    .push(source);
            }
        }
        for (body, markers) in claims {
            let mut table = Vec::with_capacity(markers.len());
            for (index, claimants) in markers.into_iter().enumerate() {
                if claimants.len() != 1 {
                    return Err(violation(step, marker_id(body, index), claimants));
                }
                table.push(claimants[0]);
            }
            self.owner_tables.insert(body, table);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::channel_world;
    use kernel::GlobalGrid;
    use std::time::Duration;

    fn decomposition() -> DomainDecomposer {
        let grid = GlobalGrid {
            dims: [8, 8, 8],
            spacing: 0.125,
            origin: [0.0; 3],
            periodic: [true; 3],
        };
        DomainDecomposer::new(&grid, 1, None, 2, 2).unwrap()
    }

    #[test]
    fn test_adopt_initial_fills_owner_table() {
        let d = decomposition();
        let mut mapper = BodyRankMapper::new(0, 1, DeltaKernel::Peskin4);
        mapper.register_body(3, 0, 2);
        mapper
            .adopt_initial(&d, 3, &[([0.5; 3], [0.0; 3]), ([0.6; 3], [1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(mapper.owned_count(), 2);
        assert_eq!(mapper.owner_table(3), Some(&[0usize, 0][..]));
        let m = mapper.owned().nth(1).unwrap();
        assert_eq!(m.index(), 1);
        assert_eq!(m.body, 3);
        assert_eq!(m.slip(), [0.0; 3]);
    }

    #[test]
    fn test_single_rank_protocols_are_consistent() {
        let d = decomposition();
        let mut world = channel_world(1, Duration::from_secs(5));
        let t = &mut world[0];
        let mut mapper = BodyRankMapper::new(0, 1, DeltaKernel::Peskin4);
        mapper.register_body(0, 0, 1);
        mapper.adopt_initial(&d, 0, &[([0.5; 3], [0.0; 3])]).unwrap();
        for m in mapper.owned_mut() {
            m.force = [1.0, 2.0, 3.0];
        }

        let forces = mapper.gather_forces(t, 1).unwrap();
        assert_eq!(forces[&0], vec![[1.0, 2.0, 3.0]]);
        assert_eq!(mapper.migrate(t, 1, &d).unwrap(), MigrationStats::default());
        mapper.audit(t, 1).unwrap();
        assert_eq!(mapper.body_ranks(0), vec![0]);
    }

    #[test]
    fn test_double_insert_is_rejected() {
        let mut mapper = BodyRankMapper::new(0, 1, DeltaKernel::Linear);
        let m = LagrangianMarker::new(0, 0, [0.1; 3], [0.0; 3], 0);
        mapper.insert(m.clone()).unwrap();
        assert!(matches!(
            mapper.insert(m),
            Err(CouplingError::MigrationConsistency { .. })
        ));
    }
}
