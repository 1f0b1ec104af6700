//! Partition coverage and marker ownership audits across ranks

use std::thread;
use std::time::Duration;

use kernel::{marker_id, DeltaKernel, GlobalGrid};
use orchestrator::comm::{channel_world, ChannelTransport};
use orchestrator::domain::DomainDecomposer;
use orchestrator::markers::{BodyRankMapper, LagrangianMarker};
use orchestrator::{CouplingError, CouplingResult};

fn grid(dims: [usize; 3]) -> GlobalGrid {
    GlobalGrid {
        dims,
        spacing: 0.125,
        origin: [0.0; 3],
        periodic: [true; 3],
    }
}

#[test]
fn test_subdomains_tile_the_grid_exactly() {
    let cases: [([usize; 3], usize); 6] = [
        ([8, 8, 8], 1),
        ([8, 8, 8], 2),
        ([8, 8, 8], 8),
        ([12, 8, 4], 6),
        ([16, 12, 8], 12),
        ([24, 24, 24], 27),
    ];
    for (dims, ranks) in cases {
        let g = grid(dims);
        let d = DomainDecomposer::new(&g, ranks, None, 2, 2).unwrap();
        let mut hits = vec![0u32; g.cell_count()];
        for sub in d.subdomains() {
            sub.global_interior().for_each(|idx| {
                hits[g.flat_index([idx[0] as usize, idx[1] as usize, idx[2] as usize])] += 1;
            });
        }
        let bad = hits.iter().filter(|&&h| h != 1).count();
        eprintln!("{:?} on {} ranks: layout {:?}", dims, ranks, d.layout());
        assert_eq!(bad, 0, "{:?} on {} ranks", dims, ranks);
    }
}

/// Two ranks split along x; body 0 (homed on rank 0) has one marker on
/// each side. `tamper` runs on each mapper before the audit.
fn audit_two_ranks(
    tamper: impl Fn(&mut BodyRankMapper) + Sync,
) -> Vec<CouplingResult<()>> {
    let g = grid([8, 8, 8]);
    let d = DomainDecomposer::new(&g, 2, Some([2, 1, 1]), 2, 2).unwrap();
    let kinematics = [([0.2, 0.5, 0.5], [0.0; 3]), ([0.7, 0.5, 0.5], [0.0; 3])];
    let world = channel_world(2, Duration::from_secs(5));

    thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .enumerate()
            .map(|(rank, mut transport): (usize, ChannelTransport)| {
                let d = &d;
                let tamper = &tamper;
                let kinematics = &kinematics;
                s.spawn(move || {
                    let mut mapper = BodyRankMapper::new(rank, 2, DeltaKernel::Peskin4);
                    mapper.register_body(0, 0, 2);
                    mapper.adopt_initial(d, 0, kinematics)?;
                    tamper(&mut mapper);
                    mapper.audit(&mut transport, 1)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_clean_split_passes_audit() {
    let results = audit_two_ranks(|_| {});
    assert!(results.iter().all(|r| r.is_ok()));
}

#[test]
fn test_duplicate_owner_detected_by_home() {
    let results = audit_two_ranks(|mapper| {
        if mapper.rank() == 1 {
            let stolen = LagrangianMarker::new(0, 0, [0.2, 0.5, 0.5], [0.0; 3], 0);
            mapper.insert(stolen).unwrap();
        }
    });
    match &results[0] {
        Err(CouplingError::MigrationConsistency { marker, claimants, .. }) => {
            assert_eq!(*marker, marker_id(0, 0));
            assert_eq!(claimants, &vec![0, 1]);
        }
        other => panic!("expected a consistency error on the home rank, got {:?}", other),
    }
    // only the home rank can see the conflict
    assert!(results[1].is_ok());
}

#[test]
fn test_orphaned_marker_detected_by_home() {
    let results = audit_two_ranks(|mapper| {
        if mapper.rank() == 1 {
            // rebuild without the marker this rank should own
            *mapper = BodyRankMapper::new(1, 2, DeltaKernel::Peskin4);
            mapper.register_body(0, 0, 2);
        }
    });
    match &results[0] {
        Err(CouplingError::MigrationConsistency { marker, claimants, .. }) => {
            assert_eq!(*marker, marker_id(0, 1));
            assert!(claimants.is_empty());
        }
        other => panic!("expected a consistency error on the home rank, got {:?}", other),
    }
}
