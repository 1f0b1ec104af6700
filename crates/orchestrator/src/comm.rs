//! Point-to-point message passing between ranks
//!
//! Ranks never share mutable state; everything they exchange goes through a
//! [`Transport`]. Messages are matched on `(source, tag)` and delivered in
//! send order for each such pair. Messages that arrive while a rank waits
//! for something else are parked in a pending queue until asked for.
//!
//! [`ChannelTransport`] runs every rank as a thread of one process and is
//! built on `crossbeam-channel`; a message-passing library can be plugged in
//! behind the same trait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use kernel::{Axis, Body, MarkerId, Side, Vec3};

use crate::error::{CouplingError, CouplingResult};
use crate::markers::LagrangianMarker;

/// Message kind; together with the source rank it selects the receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Ghost-layer fill, sent toward `toward`
    Halo {
        /// Exchange axis
        axis: Axis,
        /// Face the data travels through
        toward: Side,
    },
    /// Additive ghost-layer fold-back, sent toward `toward`
    HaloReduce {
        /// Exchange axis
        axis: Axis,
        /// Face the data travels through
        toward: Side,
    },
    /// Marker coupling forces sent to a body's home rank
    BodyForces,
    /// Marker kinematics sent from a body's home rank to marker owners
    Kinematics,
    /// Markers changing owner
    Migrate,
    /// Acknowledgement of received markers
    MigrateAck,
    /// Owned-marker report for the ownership audit
    Ownership,
    /// Contribution to a reduction at the root
    Reduce,
    /// Result of a reduction, from the root
    Broadcast,
    /// Contribution to a gather at the root
    Gather,
    /// Slice of a scatter from the root
    Scatter,
    /// A peer failed and is shutting down
    Abort,
}

/// Message body.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Nothing
    Empty,
    /// Flat numeric data
    Values(Vec<f64>),
    /// Marker ids
    Ids(Vec<MarkerId>),
    /// Per-marker coupling forces
    Forces(Vec<(MarkerId, Vec3)>),
    /// Per-marker position and velocity
    Kinematics(Vec<(MarkerId, Vec3, Vec3)>),
    /// Full marker records
    Markers(Vec<LagrangianMarker>),
    /// Full body records
    Bodies(Vec<Body>),
    /// Reason a peer aborted
    Abort(String),
}

fn unexpected(phase: &str, source: usize, found: &Payload) -> CouplingError {
    CouplingError::comm(
        format!("{}: unexpected payload {:?}", phase, std::mem::discriminant(found)),
        vec![source],
    )
}

macro_rules! payload_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Unwrap the expected variant; anything else is a protocol failure.
        pub fn $name(self, phase: &str, source: usize) -> CouplingResult<$ty> {
            match self {
                Payload::$variant(v) => Ok(v),
                other => Err(unexpected(phase, source, &other)),
            }
        }
    };
}

impl Payload {
    payload_accessor!(into_values, Values, Vec<f64>);
    payload_accessor!(into_ids, Ids, Vec<MarkerId>);
    payload_accessor!(into_forces, Forces, Vec<(MarkerId, Vec3)>);
    payload_accessor!(into_kinematics, Kinematics, Vec<(MarkerId, Vec3, Vec3)>);
    payload_accessor!(into_markers, Markers, Vec<LagrangianMarker>);
    payload_accessor!(into_bodies, Bodies, Vec<Body>);
}

/// A message in flight.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sending rank
    pub source: usize,
    /// Message kind
    pub tag: Tag,
    /// Coupling step the message belongs to
    pub step: u64,
    /// Body
    pub payload: Payload,
}

/// Rank-to-rank messaging.
pub trait Transport: Send {
    /// This rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Queue a message for `dest`; never blocks.
    fn send(&self, dest: usize, tag: Tag, step: u64, payload: Payload) -> CouplingResult<()>;

    /// Next message from `source` with `tag`, waiting at most the configured
    /// timeout. `phase` names the protocol step in errors.
    fn recv(&mut self, source: usize, tag: Tag, step: u64, phase: &str) -> CouplingResult<Payload>;

    /// Tell every peer this rank is going down.
    fn abort(&self, reason: &str);
}

/// In-process transport over unbounded crossbeam channels.
pub struct ChannelTransport {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: VecDeque<Envelope>,
    timeout: Duration,
}

/// Fully connected set of `size` channel transports, one per rank.
pub fn channel_world(size: usize, timeout: Duration) -> Vec<ChannelTransport> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| ChannelTransport {
            rank,
            peers: senders.clone(),
            inbox,
            pending: VecDeque::new(),
            timeout,
        })
        .collect()
}

impl ChannelTransport {
    fn accept(&self, env: Envelope, step: u64, phase: &str) -> CouplingResult<Payload> {
        if env.step != step {
            return Err(CouplingError::comm(
                format!(
                    "{}: message from step {} while expecting step {}",
                    phase, env.step, step
                ),
                vec![env.source],
            ));
        }
        Ok(env.payload)
    }

    /// Messages received but not yet asked for.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, step: u64, payload: Payload) -> CouplingResult<()> {
        let peer = self
            .peers
            .get(dest)
            .ok_or_else(|| CouplingError::comm(format!("send {:?}: no such rank", tag), vec![dest]))?;
        peer.send(Envelope {
            source: self.rank,
            tag,
            step,
            payload,
        })
        .map_err(|_| CouplingError::comm(format!("send {:?}", tag), vec![dest]))
    }

    fn recv(&mut self, source: usize, tag: Tag, step: u64, phase: &str) -> CouplingResult<Payload> {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|e| e.source == source && e.tag == tag)
        {
            if let Some(env) = self.pending.remove(pos) {
                return self.accept(env, step, phase);
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(remaining) {
                Ok(env) if env.tag == Tag::Abort => {
                    let reason = match &env.payload {
                        Payload::Abort(r) => r.clone(),
                        _ => String::new(),
                    };
                    tracing::debug!(
                        "Rank {} saw abort from rank {} during {}: {}",
                        self.rank,
                        env.source,
                        phase,
                        reason
                    );
                    return Err(CouplingError::comm(
                        format!("{} (rank {} aborted: {})", phase, env.source, reason),
                        vec![env.source],
                    ));
                }
                Ok(env) if env.source == source && env.tag == tag => {
                    return self.accept(env, step, phase);
                }
                Ok(env) => self.pending.push_back(env),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(CouplingError::comm(phase, vec![source]));
                }
            }
        }
    }

    fn abort(&self, reason: &str) {
        for (dest, peer) in self.peers.iter().enumerate() {
            if dest != self.rank {
                // peers that already exited are not waiting for anything
                let _ = peer.send(Envelope {
                    source: self.rank,
                    tag: Tag::Abort,
                    step: 0,
                    payload: Payload::Abort(reason.to_string()),
                });
            }
        }
    }
}
