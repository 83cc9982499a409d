//! Sink for state changes pushed to the UI layer.

use crate::types::Birthday;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use log::warn;
use std::sync::Arc;

pub trait WordClockListener {
    fn connection_updated(&mut self, connected: bool);

    fn birthdays_updating(&mut self, updating: bool);

    fn birthdays_updated(&mut self, birthdays: &[Birthday]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    ConnectionUpdated(bool),
    BirthdaysUpdating(bool),
    BirthdaysUpdated(Vec<Birthday>),
}

pub type ClockEventChannel = Channel<CriticalSectionRawMutex, ClockEvent, 16>;

/// Forwards listener callbacks into a channel for an async UI task.
#[derive(Clone)]
pub struct ChannelListener {
    channel: Arc<ClockEventChannel>,
}

impl ChannelListener {
    pub fn new(channel: Arc<ClockEventChannel>) -> Self {
        Self { channel }
    }

    fn forward(&self, event: ClockEvent) {
        if let Err(e) = self.channel.try_send(event) {
            warn!("Dropping clock event - channel full: {:?}", e);
        }
    }
}

impl WordClockListener for ChannelListener {
    fn connection_updated(&mut self, connected: bool) {
        self.forward(ClockEvent::ConnectionUpdated(connected));
    }

    fn birthdays_updating(&mut self, updating: bool) {
        self.forward(ClockEvent::BirthdaysUpdating(updating));
    }

    fn birthdays_updated(&mut self, birthdays: &[Birthday]) {
        self.forward(ClockEvent::BirthdaysUpdated(birthdays.to_vec()));
    }
}

/// Keeps every event in order. Handy for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingListener {
    pub events: Vec<ClockEvent>,
}

impl WordClockListener for RecordingListener {
    fn connection_updated(&mut self, connected: bool) {
        self.events.push(ClockEvent::ConnectionUpdated(connected));
    }

    fn birthdays_updating(&mut self, updating: bool) {
        self.events.push(ClockEvent::BirthdaysUpdating(updating));
    }

    fn birthdays_updated(&mut self, birthdays: &[Birthday]) {
        self.events.push(ClockEvent::BirthdaysUpdated(birthdays.to_vec()));
    }
}
