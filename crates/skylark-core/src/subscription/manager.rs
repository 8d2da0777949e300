//! SubscriptionManager -- owns the desired [`SubscriptionSet`].
//!
//! The set lives in a `tokio::sync::watch` channel. Every mutation that
//! changes the set bumps the watch version, which wakes the dispatcher's
//! resync step; unchanged mutations notify nobody, so repeated identical
//! commands are no-ops. The dispatcher always reads the latest value, so a
//! command landing mid-resync is picked up by the next pass instead of being
//! overwritten.

use tokio::sync::watch;
use tracing::info;

use skylark_types::subscription::{Channel, SubscriptionSet, Timeline};

pub struct SubscriptionManager {
    configured: SubscriptionSet,
    tx: watch::Sender<SubscriptionSet>,
}

impl SubscriptionManager {
    pub fn new(configured: SubscriptionSet) -> Self {
        let (tx, _rx) = watch::channel(configured.clone());
        Self { configured, tx }
    }

    pub fn current(&self) -> SubscriptionSet {
        self.tx.borrow().clone()
    }

    /// The set loaded from configuration at startup.
    pub fn configured(&self) -> &SubscriptionSet {
        &self.configured
    }

    /// A receiver that is notified whenever the set changes.
    pub fn watch(&self) -> watch::Receiver<SubscriptionSet> {
        self.tx.subscribe()
    }

    pub fn add(&self, channels: impl IntoIterator<Item = Channel>) -> bool {
        let channels: Vec<Channel> = channels.into_iter().collect();
        self.modify("add", |set| {
            for channel in channels {
                match channel {
                    Channel::Main => {}
                    Channel::Timeline(t) => {
                        set.timelines.insert(t);
                    }
                    Channel::Antenna(id) => {
                        set.antennas.insert(id);
                    }
                }
            }
        })
    }

    pub fn remove(&self, channels: impl IntoIterator<Item = Channel>) -> bool {
        let channels: Vec<Channel> = channels.into_iter().collect();
        self.modify("remove", |set| {
            for channel in &channels {
                match channel {
                    Channel::Main => {}
                    Channel::Timeline(t) => {
                        set.timelines.remove(t);
                    }
                    Channel::Antenna(id) => {
                        set.antennas.remove(id);
                    }
                }
            }
        })
    }

    /// Replace the whole set. `Main` is implicit and ignored.
    pub fn set(&self, channels: impl IntoIterator<Item = Channel>) -> bool {
        let mut next = SubscriptionSet::default();
        for channel in channels {
            match channel {
                Channel::Main => {}
                Channel::Timeline(t) => {
                    next.timelines.insert(t);
                }
                Channel::Antenna(id) => {
                    next.antennas.insert(id);
                }
            }
        }
        self.modify("set", |set| *set = next)
    }

    /// Replace only the timelines, keeping antennas.
    pub fn set_timelines(&self, timelines: impl IntoIterator<Item = Timeline>) -> bool {
        let timelines = timelines.into_iter().collect();
        self.modify("set_timelines", |set| set.timelines = timelines)
    }

    /// Replace only the antennas, keeping timelines.
    pub fn set_antennas(&self, antennas: impl IntoIterator<Item = String>) -> bool {
        let antennas = antennas
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        self.modify("set_antennas", |set| set.antennas = antennas)
    }

    /// Drop everything but the control channel.
    pub fn clear(&self) -> bool {
        self.modify("clear", |set| *set = SubscriptionSet::default())
    }

    /// Discard runtime edits and restore the configured set.
    pub fn reset(&self) -> bool {
        let configured = self.configured.clone();
        self.modify("reset", |set| *set = configured)
    }

    fn modify(&self, op: &'static str, f: impl FnOnce(&mut SubscriptionSet)) -> bool {
        let changed = self.tx.send_if_modified(|set| {
            let before = set.clone();
            f(set);
            *set != before
        });
        if changed {
            let now = self.tx.borrow();
            info!(
                op,
                timelines = now.timelines.len(),
                antennas = now.antennas.len(),
                "subscription set changed"
            );
        }
        changed
    }
}
