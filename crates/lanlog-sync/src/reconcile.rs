//! Reconciliation: turn a round of handshakes into targeted asks.
//!
//! Pure and synchronous. The engine snapshots the handshakes it collected,
//! reads its own log heads, and hands both to [`reconcile`]. Nothing here
//! touches the store, the transport, or the round lock.
//!
//! ## Algorithm
//!
//! 1. Flatten every peer info, tagging it with the device that sent it.
//! 2. Collapse to one claim per log: higher head wins, then the larger
//!    missing set, then the first in `(device, sequence, sender)` order.
//! 3. Compare each claim with the local head of the same log:
//!    ahead drops the claim, equal asks only for holes the peer can fill,
//!    behind asks for the tail range plus those holes.
//! 4. Clamp to the last `window` sequences of the peer's head. Holes below
//!    the window are reported as abandoned instead of asked for.
//! 5. Expand holes into one single-sequence ask each.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;

use lanlog_core::{DeviceId, HandshakeInfo, HandshakeMessage, LogId, SyncRequest, SyncRequestItem};
use lanlog_store::LogHead;

use crate::messages::limits;

/// Handshakes collected during one round, keyed by sender.
pub type Round = HashMap<DeviceId, HandshakeMessage>;

/// Holes that fell below the sync window and will not be asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedGap {
    pub log: LogId,
    pub sequences: BTreeSet<u64>,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Asks in ascending sequence order per log. Each has `from` set to the
    /// device that will be asked and `starting_sequence` set to the range start.
    pub asks: Vec<HandshakeInfo>,
    pub abandoned: Vec<AbandonedGap>,
}

impl Reconciliation {
    /// True when there is nothing to ask and nothing was abandoned.
    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.abandoned.is_empty()
    }

    /// Group asks by target device into wire requests.
    pub fn requests(&self) -> Vec<SyncRequest> {
        let mut by_target: BTreeMap<DeviceId, Vec<SyncRequestItem>> = BTreeMap::new();
        for ask in &self.asks {
            let Some(target) = ask.from.as_ref() else {
                continue;
            };
            by_target
                .entry(target.clone())
                .or_default()
                .push(SyncRequestItem::from_ask(ask));
        }

        by_target
            .into_iter()
            .flat_map(|(target, items)| {
                items
                    .chunks(limits::MAX_REQUEST_ITEMS)
                    .map(|chunk| SyncRequest {
                        target_device_id: target.clone(),
                        items: chunk.to_vec(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Lowest sequence worth asking for when a peer's head is `peer_head`.
pub fn window_floor(peer_head: u64, window: u64) -> u64 {
    let window = window.max(1);
    if peer_head > window {
        peer_head - window + 1
    } else {
        1
    }
}

/// Flatten a round into claims tagged with their sender, in a stable order.
pub fn flatten(round: &Round) -> Vec<HandshakeInfo> {
    let mut claims: Vec<HandshakeInfo> = round
        .iter()
        .flat_map(|(from, msg)| {
            msg.infos.iter().map(move |info| HandshakeInfo {
                from: Some(from.clone()),
                ..info.clone()
            })
        })
        .collect();
    claims.sort_by(|a, b| {
        (&a.device_id, a.sequence, &a.from).cmp(&(&b.device_id, b.sequence, &b.from))
    });
    claims
}

/// Keep the best claim per log.
pub fn collapse(claims: Vec<HandshakeInfo>) -> BTreeMap<LogId, HandshakeInfo> {
    let mut best: BTreeMap<LogId, HandshakeInfo> = BTreeMap::new();
    for claim in claims {
        let log = claim.log_id();
        let wins = match best.get(&log) {
            None => true,
            Some(current) => {
                claim.sequence > current.sequence
                    || (claim.sequence == current.sequence
                        && claim.missing.len() > current.missing.len())
            }
        };
        if wins {
            best.insert(log, claim);
        }
    }
    best
}

/// Compute the asks for one round.
///
/// `local` holds this device's head for every log named in the round;
/// a log absent from it is treated as empty.
pub fn reconcile(round: &Round, local: &HashMap<LogId, LogHead>, window: u64) -> Reconciliation {
    let mut out = Reconciliation::default();
    let empty = LogHead::default();

    for (log, peer) in collapse(flatten(round)) {
        let Some(target) = peer.from.clone() else {
            continue;
        };
        let mine = local.get(&log).unwrap_or(&empty);
        let floor = window_floor(peer.sequence, window);

        let range: Option<RangeInclusive<u64>> = if mine.sequence > peer.sequence {
            continue;
        } else if mine.sequence == peer.sequence {
            None
        } else {
            Some((mine.sequence + 1).max(floor)..=peer.sequence)
        };
        let covered = |seq: u64| range.as_ref().is_some_and(|r| r.contains(&seq));

        let mut singles = BTreeSet::new();
        let mut abandoned = BTreeSet::new();
        for &seq in mine.missing.difference(&peer.missing) {
            if seq < floor {
                abandoned.insert(seq);
            } else if !covered(seq) {
                singles.insert(seq);
            }
        }

        if let Some(profile) = peer.profile_sequence {
            let have = mine.profile_sequence.is_some_and(|p| p >= profile);
            let lacking = profile > mine.sequence || mine.missing.contains(&profile);
            if !have && lacking && !covered(profile) && !peer.missing.contains(&profile) {
                singles.insert(profile);
                abandoned.remove(&profile);
            }
        }

        for seq in singles {
            out.asks.push(HandshakeInfo::ask(&log, seq, seq, &target));
        }
        if let Some(range) = range {
            out.asks
                .push(HandshakeInfo::ask(&log, *range.start(), *range.end(), &target));
        }
        if !abandoned.is_empty() {
            out.abandoned.push(AbandonedGap {
                log,
                sequences: abandoned,
            });
        }
    }

    out
}
