//! Halo exchange across real channel worlds
//!
//! Every rank fills its interior from one global field, runs the staged
//! exchange on its own thread, and checks every ghost cell (faces, edges and
//! corners) against the global field. Ghosts beyond a non-periodic face keep
//! their initial value.

use std::thread;
use std::time::Duration;

use kernel::{FieldSlice, GlobalGrid};
use orchestrator::comm::{channel_world, Transport};
use orchestrator::domain::DomainDecomposer;
use orchestrator::halo::HaloExchanger;

const UNSET: f64 = -1.0;

fn global_value(g: [usize; 3], c: usize) -> f64 {
    (g[0] * 10_000 + g[1] * 100 + g[2]) as f64 + 0.25 * c as f64
}

/// Global cell seen by local cell `l`, or `None` beyond a non-periodic face.
fn global_of(grid: &GlobalGrid, offset: [usize; 3], l: [i64; 3]) -> Option<[usize; 3]> {
    let mut g = [0usize; 3];
    for a in 0..3 {
        let n = grid.dims[a] as i64;
        let idx = l[a] + offset[a] as i64;
        if (0..n).contains(&idx) {
            g[a] = idx as usize;
        } else if grid.periodic[a] {
            g[a] = idx.rem_euclid(n) as usize;
        } else {
            return None;
        }
    }
    Some(g)
}

/// Run the forward exchange on every rank and return the number of wrong ghosts.
fn check_exchange(grid: GlobalGrid, ranks: usize, layout: Option<[usize; 3]>, halo: usize) -> usize {
    let decomposition = DomainDecomposer::new(&grid, ranks, layout, halo, 1).unwrap();
    let world = channel_world(ranks, Duration::from_secs(10));

    thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|mut transport| {
                let decomposition = &decomposition;
                let grid = &grid;
                s.spawn(move || {
                    let sub = decomposition.subdomain(transport.rank()).clone();
                    let mut field = FieldSlice::new("u", 2, sub.dims, sub.halo);
                    field.fill(&[UNSET, UNSET]);
                    sub.interior().for_each(|l| {
                        let g = global_of(grid, sub.offset, l).unwrap();
                        for c in 0..2 {
                            field.set(l, c, global_value(g, c));
                        }
                    });

                    let mut halo = HaloExchanger::new();
                    halo.exchange(&mut transport, 1, &sub, &mut field).unwrap();
                    // a second step reuses the recycled buffers
                    halo.exchange(&mut transport, 2, &sub, &mut field).unwrap();
                    assert_eq!(transport.pending_len(), 0);

                    let mut wrong = 0;
                    sub.padded().for_each(|l| {
                        for c in 0..2 {
                            let expected = match global_of(grid, sub.offset, l) {
                                Some(g) => global_value(g, c),
                                None => UNSET,
                            };
                            if field.get(l, c) != expected {
                                if wrong < 5 {
                                    eprintln!(
                                        "rank {} cell {:?} comp {}: got {}, expected {}",
                                        sub.rank,
                                        l,
                                        c,
                                        field.get(l, c),
                                        expected
                                    );
                                }
                                wrong += 1;
                            }
                        }
                    });
                    wrong
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    })
}

#[test]
fn test_ghosts_match_global_field_on_eight_ranks() {
    let grid = GlobalGrid {
        dims: [8, 8, 8],
        spacing: 0.125,
        origin: [0.0; 3],
        periodic: [true, true, false],
    };
    assert_eq!(check_exchange(grid, 8, Some([2, 2, 2]), 2), 0);
}

#[test]
fn test_two_ranks_are_both_neighbors_of_each_other() {
    // periodic x with two ranks: low and high neighbor are the same rank
    let grid = GlobalGrid {
        dims: [8, 4, 4],
        spacing: 0.25,
        origin: [0.0; 3],
        periodic: [true; 3],
    };
    assert_eq!(check_exchange(grid, 2, Some([2, 1, 1]), 2), 0);
}

#[test]
fn test_uneven_layout_with_wide_halo() {
    let grid = GlobalGrid {
        dims: [12, 6, 9],
        spacing: 0.1,
        origin: [-0.5, 0.0, 0.0],
        periodic: [true, false, true],
    };
    assert_eq!(check_exchange(grid, 6, Some([2, 1, 3]), 3), 0);
}

#[test]
fn test_reduce_preserves_global_sum() {
    let grid = GlobalGrid {
        dims: [8, 8, 8],
        spacing: 0.125,
        origin: [0.0; 3],
        periodic: [true; 3],
    };
    let ranks = 4;
    let decomposition = DomainDecomposer::new(&grid, ranks, None, 2, 1).unwrap();
    let world = channel_world(ranks, Duration::from_secs(10));

    let (before, after): (f64, f64) = thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|mut transport| {
                let decomposition = &decomposition;
                s.spawn(move || {
                    let sub = decomposition.subdomain(transport.rank()).clone();
                    let mut field = FieldSlice::new("f", 3, sub.dims, sub.halo);
                    // contributions everywhere, ghosts included
                    let mut before = 0.0;
                    sub.padded().for_each(|l| {
                        let v = 1.0 + 0.001 * (l[0] + 2 * l[1] + 3 * l[2]) as f64 + sub.rank as f64;
                        field.set_vector(l, [v, -v, 0.5 * v]);
                        before += v;
                    });

                    let mut halo = HaloExchanger::new();
                    halo.exchange_reduce(&mut transport, 1, &sub, &mut field).unwrap();

                    // ghosts are cleared once handed over
                    let interior = sub.interior();
                    sub.padded().for_each(|l| {
                        if !interior.contains(l) {
                            assert_eq!(field.vector_at(l), [0.0; 3], "ghost {:?} not cleared", l);
                        }
                    });
                    let sums = field.interior_sum();
                    assert!((sums[1] + sums[0]).abs() < 1e-9);
                    (before, sums[0])
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .fold((0.0, 0.0), |acc, (b, a)| (acc.0 + b, acc.1 + a))
    });

    eprintln!("sum before {}, after {}", before, after);
    assert!((before - after).abs() < 1e-9 * before.abs());
}
