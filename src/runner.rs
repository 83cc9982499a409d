//! Async driver for [`WordClock`].
//!
//! Requests from the UI, transport events and timed follow-ups are merged
//! into one loop, so the engine only ever sees one input at a time.

use crate::clock::WordClock;
use crate::listener::WordClockListener;
use crate::transport::{Transport, TransportEventChannel};
use crate::types::{Birthday, Color};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Instant, Timer};
use log::{debug, info};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockRequest {
    Connect,
    Disconnect,
    SetTime,
    SetColor(Color),
    ListBirthdays,
    AddBirthday(Birthday),
    RemoveBirthday(Birthday),
}

pub type ClockRequestChannel = Channel<CriticalSectionRawMutex, ClockRequest, 8>;

pub struct ClockRunner<T: Transport, L: WordClockListener> {
    clock: WordClock<T, L>,
    requests: Arc<ClockRequestChannel>,
    events: Arc<TransportEventChannel<T::Peripheral>>,
}

impl<T: Transport, L: WordClockListener> ClockRunner<T, L> {
    pub fn new(
        clock: WordClock<T, L>,
        requests: Arc<ClockRequestChannel>,
        events: Arc<TransportEventChannel<T::Peripheral>>,
    ) -> Self {
        Self {
            clock,
            requests,
            events,
        }
    }

    pub fn clock(&self) -> &WordClock<T, L> {
        &self.clock
    }

    pub async fn run(&mut self) {
        info!("Starting word clock loop");

        loop {
            self.step().await;
        }
    }

    /// Waits for the next input and handles it.
    pub async fn step(&mut self) {
        let deadline = self.clock.next_deadline().unwrap_or(Instant::MAX);

        let request_fut = self.requests.receive();
        let event_fut = self.events.receive();
        let timer = Timer::at(deadline);

        match select(select(request_fut, event_fut), timer).await {
            Either::First(Either::First(request)) => self.handle_request(request),
            Either::First(Either::Second(event)) => self.clock.handle_transport_event(event),
            Either::Second(()) => {
                let ran = self.clock.poll_timers(Instant::now());
                debug!("Ran {} timed follow-ups", ran);
            }
        }
    }

    fn handle_request(&mut self, request: ClockRequest) {
        debug!("Received request: {:?}", request);

        match request {
            ClockRequest::Connect => self.clock.connect(),
            ClockRequest::Disconnect => self.clock.disconnect(),
            ClockRequest::SetTime => self.clock.set_time(),
            ClockRequest::SetColor(color) => self.clock.set_color(color),
            ClockRequest::ListBirthdays => self.clock.list_birthdays(),
            ClockRequest::AddBirthday(birthday) => self.clock.add_birthday(birthday),
            ClockRequest::RemoveBirthday(birthday) => self.clock.remove_birthday(birthday),
        }
    }
}
