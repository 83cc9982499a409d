//! Reassembles the multi-line birthday listing into one sorted snapshot.

use crate::types::Birthday;
use log::{debug, info, warn};

/// Accumulator for a listing in progress.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BirthdayListBuildState {
    pub expected_count: Option<u32>,
    pub collected: Vec<Birthday>,
}

#[derive(Debug, Default)]
pub struct BirthdayAggregator {
    build: Option<BirthdayListBuildState>,
}

impl BirthdayAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list fetch was requested; anything collected so far is stale.
    pub fn begin(&mut self) {
        if let Some(previous) = self.build.replace(BirthdayListBuildState::default()) {
            if !previous.collected.is_empty() {
                debug!(
                    "Discarding {} birthdays from an unfinished listing",
                    previous.collected.len()
                );
            }
        }
    }

    pub fn is_building(&self) -> bool {
        self.build.is_some()
    }

    pub fn build_state(&self) -> Option<&BirthdayListBuildState> {
        self.build.as_ref()
    }

    /// Returns the empty snapshot when the device reports no birthdays.
    pub fn on_count(&mut self, count: u32) -> Option<Vec<Birthday>> {
        if count == 0 {
            info!("Device has no birthdays stored");
            self.build = None;
            return Some(Vec::new());
        }

        self.build.get_or_insert_with(Default::default).expected_count = Some(count);
        None
    }

    /// Returns the finished snapshot once the last entry has arrived.
    pub fn on_entry(&mut self, number: u32, count: u32, month: u32, day: u32) -> Option<Vec<Birthday>> {
        if number == 0 || number > count {
            warn!("Ignoring malformed birthday entry {}/{}", number, count);
            return None;
        }

        let build = self.build.get_or_insert_with(Default::default);
        if number == 1 {
            *build = BirthdayListBuildState::default();
        }

        if let Some(expected) = build.expected_count {
            if expected != count {
                warn!("Birthday entry count {} differs from announced count {}", count, expected);
            }
        }
        build.expected_count = Some(count);

        // An unrepresentable date still counts towards completing the listing
        match Birthday::normalized(month, day) {
            Some(birthday) => {
                build.collected.push(birthday);
                debug!("Collected birthday {}/{}: {}", number, count, birthday);
            }
            None => warn!("Skipping unrepresentable birthday {}/{}", month, day),
        }

        if number != count {
            return None;
        }

        let mut snapshot = self.build.take().map(|build| build.collected).unwrap_or_default();
        snapshot.sort();
        info!("Birthday list complete with {} entries", snapshot.len());
        Some(snapshot)
    }
}
