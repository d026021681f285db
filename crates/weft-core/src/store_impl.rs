// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store: canonical record source, epoch, subscriptions, and the
//! publish → notify cycle.
//!
//! All reads, merges, and notifications run synchronously inside one logical
//! `publish` call; subscribers never observe a partially merged source. The
//! store is an explicit instance with constructor-provided state, not an
//! ambient global, so multiple stores coexist in one process.
use std::collections::{BTreeMap, VecDeque};

use crate::data::recycle;
use crate::ident::DataId;
use crate::marker::mark_reachable;
use crate::reader::{read, ChangeGranularity, ReadError};
use crate::selector::Selector;
use crate::snapshot::{SeenKeys, Snapshot};
use crate::source::{RecordSource, TouchedKeys};

/// Constructor-provided store configuration.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Change-tracking granularity for reads and notification overlap
    /// tests.
    pub granularity: ChangeGranularity,
    /// Number of released retain roots kept alive through GC passes, oldest
    /// evicted first. Zero releases roots immediately.
    pub release_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            granularity: ChangeGranularity::FieldGranular,
            release_buffer_size: 0,
        }
    }
}

/// Handle for one live subscription. Dropping the token does not dispose the
/// subscription; pass it to [`Store::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct SubscriptionToken(u64);

/// Handle for one retained root. Pass to [`Store::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct RetainToken(u64);

/// Receipt for one publish cycle: the epoch it produced, everything it
/// touched, and how notification went.
#[derive(Debug)]
pub struct PublishReceipt {
    /// Epoch after this publish.
    pub epoch: u64,
    /// Changed record/field keys computed by the merge.
    pub touched: TouchedKeys,
    /// Subscriptions whose seen keys intersected the touched set and were
    /// re-read.
    pub subscriptions_reread: usize,
    /// Subscriptions whose data actually changed and whose callback ran.
    pub subscriptions_notified: usize,
    /// Subscriptions whose re-read failed; the failure is contained per
    /// subscription and delivery to the others proceeds.
    pub subscriptions_failed: usize,
}

struct Subscription {
    snapshot: Snapshot,
    callback: Box<dyn FnMut(&Snapshot)>,
}

struct RetainedRoot {
    selector: Selector,
    released: bool,
}

/// Normalized-graph store with publish/notify orchestration.
pub struct Store {
    source: RecordSource,
    config: StoreConfig,
    epoch: u64,
    subscriptions: BTreeMap<u64, Subscription>,
    next_subscription: u64,
    retained: BTreeMap<u64, RetainedRoot>,
    next_retain: u64,
    release_buffer: VecDeque<u64>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self::with_source(RecordSource::new(), config)
    }

    /// Creates a store over pre-seeded records.
    #[must_use]
    pub fn with_source(source: RecordSource, config: StoreConfig) -> Self {
        Self {
            source,
            config,
            epoch: 0,
            subscriptions: BTreeMap::new(),
            next_subscription: 0,
            retained: BTreeMap::new(),
            next_retain: 0,
            release_buffer: VecDeque::new(),
        }
    }

    /// Returns the canonical record source.
    #[must_use]
    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// Returns the store's configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the current publish epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Reads `selector` against the canonical source. Pure: no side effect
    /// beyond none.
    pub fn lookup(&self, selector: &Selector) -> Result<Snapshot, ReadError> {
        let mut snapshot = read(&self.source, selector, self.config.granularity)?;
        snapshot.epoch = self.epoch;
        Ok(snapshot)
    }

    /// Registers `callback` to run when data reachable from the snapshot's
    /// selector changes.
    ///
    /// The snapshot should be current; when it may predate publishes (read
    /// during render, subscribed during commit), pass it through
    /// [`Store::reconcile`] first so the gap is not silently dropped.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> SubscriptionToken {
        let token = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions.insert(
            token,
            Subscription {
                snapshot,
                callback: Box::new(callback),
            },
        );
        SubscriptionToken(token)
    }

    /// Removes a subscription immediately. Idempotent: unknown and
    /// already-disposed tokens are no-ops.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.subscriptions.remove(&token.0);
    }

    /// Brings a possibly-stale snapshot up to the current epoch.
    ///
    /// Returns the snapshot re-read against the canonical source with
    /// unchanged subtrees recycled from `snapshot`, so callers can compare
    /// node identity to decide whether anything changed in the gap. A
    /// snapshot already at the current epoch is returned as a clone,
    /// untouched.
    pub fn reconcile(&self, snapshot: &Snapshot) -> Result<Snapshot, ReadError> {
        if snapshot.epoch == self.epoch {
            return Ok(snapshot.clone());
        }
        let mut next = read(&self.source, &snapshot.selector, self.config.granularity)?;
        next.epoch = self.epoch;
        let (data, _) = recycle(&snapshot.data, next.data);
        next.data = data;
        Ok(next)
    }

    /// Merges `sink` into the canonical source, bumps the epoch, and runs
    /// the notify phase.
    ///
    /// Each live subscription is re-read at most once, and its callback runs
    /// at most once, and not at all when nothing it can see changed, even
    /// if the overlap test was a false positive. A re-read failure is
    /// contained to its subscription.
    pub fn publish(&mut self, sink: RecordSource) -> PublishReceipt {
        let mut touched = TouchedKeys::new();
        self.source.merge(sink, &mut touched);
        self.epoch += 1;
        #[cfg(feature = "telemetry")]
        crate::telemetry::publish(
            self.epoch,
            touched.records.len() as u64,
            touched.fields.len() as u64,
        );
        let (reread, notified, failed) = self.notify_pass(&touched);
        PublishReceipt {
            epoch: self.epoch,
            touched,
            subscriptions_reread: reread,
            subscriptions_notified: notified,
            subscriptions_failed: failed,
        }
    }

    fn notify_pass(&mut self, touched: &TouchedKeys) -> (usize, usize, usize) {
        if touched.is_empty() {
            return (0, 0, 0);
        }
        let mut reread = 0;
        let mut notified = 0;
        let mut failed = 0;
        let epoch = self.epoch;
        let granularity = self.config.granularity;
        let source = &self.source;
        for subscription in self.subscriptions.values_mut() {
            if !overlaps(&subscription.snapshot.seen, touched, granularity) {
                continue;
            }
            reread += 1;
            match read(source, &subscription.snapshot.selector, granularity) {
                Err(_) => {
                    // Contained: one failing subscription must not block
                    // delivery to the others.
                    failed += 1;
                }
                Ok(mut next) => {
                    next.epoch = epoch;
                    let (data, data_changed) = recycle(&subscription.snapshot.data, next.data);
                    next.data = data;
                    let changed = data_changed
                        || next.errors != subscription.snapshot.errors
                        || next.is_missing_data != subscription.snapshot.is_missing_data;
                    if changed {
                        subscription.snapshot = next;
                        (subscription.callback)(&subscription.snapshot);
                        notified += 1;
                    } else {
                        // Keep the previous snapshot object (and its data
                        // identity); only the epoch stamp advances.
                        subscription.snapshot.epoch = epoch;
                    }
                }
            }
        }
        #[cfg(feature = "telemetry")]
        crate::telemetry::notify(reread as u64, notified as u64, failed as u64);
        (reread, notified, failed)
    }

    /// Retains `selector`'s reachable records across GC passes until
    /// released.
    ///
    /// Retains are counted per call: the same selector retained twice stays
    /// live until both tokens are released.
    pub fn retain(&mut self, selector: Selector) -> RetainToken {
        let token = self.next_retain;
        self.next_retain += 1;
        self.retained.insert(
            token,
            RetainedRoot {
                selector,
                released: false,
            },
        );
        RetainToken(token)
    }

    /// Releases a retained root. Idempotent.
    ///
    /// With a non-zero release buffer, the root lingers (still marked during
    /// GC) until newer releases push it out; with a zero buffer it is
    /// dropped immediately.
    pub fn release(&mut self, token: RetainToken) {
        let Some(root) = self.retained.get_mut(&token.0) else {
            return;
        };
        if root.released {
            return;
        }
        root.released = true;
        self.release_buffer.push_back(token.0);
        while self.release_buffer.len() > self.config.release_buffer_size {
            if let Some(oldest) = self.release_buffer.pop_front() {
                self.retained.remove(&oldest);
            }
        }
    }

    /// Evicts records unreachable from the retained roots, returning how
    /// many were dropped.
    ///
    /// GC never runs eagerly inside publish; callers schedule it when retain
    /// counts hit zero.
    pub fn gc(&mut self) -> usize {
        let reachable = mark_reachable(
            &self.source,
            self.retained.values().map(|root| &root.selector),
        );
        let dead: Vec<DataId> = self
            .source
            .ids()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in &dead {
            self.source.remove(id);
        }
        #[cfg(feature = "telemetry")]
        crate::telemetry::gc(dead.len() as u64, self.source.len() as u64);
        dead.len()
    }
}

/// Overlap test between a subscription's seen keys and a publish's touched
/// keys.
///
/// Field-granular mode intersects exact field keys, plus structural
/// (created/deleted) record ids against record-level seen keys: a reader
/// that found an id unfetched has no field keys for it, and must still wake
/// when the record appears. Coarse mode intersects record ids only: a
/// superset test with false positives but no false negatives.
fn overlaps(seen: &SeenKeys, touched: &TouchedKeys, granularity: ChangeGranularity) -> bool {
    match granularity {
        ChangeGranularity::RecordCoarse => {
            touched.records.iter().any(|id| seen.records.contains(id))
        }
        ChangeGranularity::FieldGranular => {
            touched.fields.iter().any(|key| seen.fields.contains(key))
                || touched
                    .structural
                    .iter()
                    .any(|id| seen.records.contains(id))
        }
    }
}
