//! The word clock protocol engine.
//!
//! `WordClock` ties the connection manager, dispatcher, parser and aggregator
//! together. All inputs (user operations, transport events and expired timed
//! tasks) go through `&mut self`, so they are handled strictly one at a time.

use crate::aggregator::BirthdayAggregator;
use crate::config::WordClockConfig;
use crate::connection::{ConnectionManager, LinkOutput, LinkOutputs};
use crate::dispatcher::CommandDispatcher;
use crate::listener::WordClockListener;
use crate::protocol::{self, Response};
use crate::timer::{TaskQueue, TimedTask};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Birthday, Color, ConnectionState, PendingOperation};
use bstr::ByteSlice;
use embassy_time::Instant;
use log::{debug, info};

pub struct WordClock<T: Transport, L: WordClockListener> {
    connection: ConnectionManager<T>,
    dispatcher: CommandDispatcher,
    aggregator: BirthdayAggregator,
    timers: TaskQueue,
    listener: L,
    config: WordClockConfig,
}

impl<T: Transport, L: WordClockListener> WordClock<T, L> {
    pub fn new(transport: T, listener: L, config: WordClockConfig) -> Self {
        Self {
            connection: ConnectionManager::new(transport, config.clone()),
            dispatcher: CommandDispatcher::new(),
            aggregator: BirthdayAggregator::new(),
            timers: TaskQueue::new(),
            listener,
            config,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn pending_operation(&self) -> PendingOperation {
        self.dispatcher.pending()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.connection.transport_mut()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pending_tasks(&self) -> usize {
        self.timers.len()
    }

    // --- Connection ---

    pub fn connect(&mut self) {
        let outputs = self.connection.connect();
        self.apply_link_outputs(outputs);
    }

    /// Safe at any point; outstanding follow-ups are cancelled.
    pub fn disconnect(&mut self) {
        let outputs = self.connection.disconnect();
        self.apply_link_outputs(outputs);
    }

    // --- Logical operations ---

    pub fn set_time(&mut self) {
        self.dispatcher.set_time(&mut self.connection);
    }

    pub fn set_color(&mut self, color: Color) {
        self.dispatcher.set_color(color, &mut self.connection);
    }

    pub fn list_birthdays(&mut self) {
        self.listener.birthdays_updating(true);
        self.aggregator.begin();
        self.dispatcher.list_birthdays(&mut self.connection);
    }

    pub fn add_birthday(&mut self, birthday: Birthday) {
        self.listener.birthdays_updating(true);
        self.dispatcher.add_birthday(birthday, &mut self.connection);
    }

    pub fn remove_birthday(&mut self, birthday: Birthday) {
        self.listener.birthdays_updating(true);
        self.dispatcher.remove_birthday(birthday, &mut self.connection);
    }

    // --- Inbound ---

    pub fn handle_transport_event(&mut self, event: TransportEvent<T::Peripheral>) {
        let outputs = match event {
            TransportEvent::Discovered {
                peripheral,
                address,
            } => self.connection.on_discovered(peripheral, &address),
            TransportEvent::Connected(peripheral) => self.connection.on_connected(peripheral),
            TransportEvent::Disconnected(peripheral) => {
                self.connection.on_disconnected(peripheral)
            }
            TransportEvent::Notification(data) => {
                self.handle_notification(&data);
                return;
            }
        };
        self.apply_link_outputs(outputs);
    }

    pub fn handle_notification(&mut self, data: &[u8]) {
        debug!("Notification: {:?}", data.as_bstr());
        for response in protocol::parse_notification(data) {
            self.handle_response(response);
        }
    }

    fn handle_response(&mut self, response: Response) {
        match response {
            Response::Prompt(prompt) => {
                if let Some(task) = self.dispatcher.on_prompt(prompt) {
                    self.timers
                        .schedule(Instant::now(), self.config.payload_delay(), task);
                }
            }
            Response::BirthdayCount(count) => {
                if let Some(snapshot) = self.aggregator.on_count(count) {
                    self.publish(&snapshot);
                }
            }
            Response::BirthdayEntry {
                number,
                count,
                month,
                day,
            } => {
                if let Some(snapshot) = self.aggregator.on_entry(number, count, month, day) {
                    self.publish(&snapshot);
                }
            }
        }
    }

    fn publish(&mut self, birthdays: &[Birthday]) {
        self.listener.birthdays_updated(birthdays);
        self.listener.birthdays_updating(false);
    }

    // --- Timed follow-ups ---

    /// Runs every follow-up due at `now`. Returns how many ran.
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        let due = self.timers.take_due(now);
        let count = due.len();
        for task in due {
            self.run_task(task, now);
        }
        count
    }

    fn run_task(&mut self, task: TimedTask, now: Instant) {
        debug!("Running timed task {:?}", task);
        match task {
            TimedTask::RefreshBirthdays => self.list_birthdays(),
            task => {
                if let Some(next) = self.dispatcher.run_task(task, &mut self.connection) {
                    self.timers.schedule(now, self.config.refresh_delay(), next);
                }
            }
        }
    }

    fn apply_link_outputs(&mut self, outputs: LinkOutputs) {
        for output in outputs {
            match output {
                LinkOutput::ConnectivityChanged(connected) => {
                    info!("Word clock {}", if connected { "connected" } else { "disconnected" });
                    self.listener.connection_updated(connected);
                }
                LinkOutput::FetchBirthdays => self.list_birthdays(),
                LinkOutput::Release { .. } => {
                    self.timers.cancel_all();
                }
                LinkOutput::StartScan | LinkOutput::StopScan | LinkOutput::ConnectDiscovered => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ClockEvent, RecordingListener};
    use crate::simulator::{SimPeripheral, SimulatedWordClock, SimulatorHandle};
    use crate::transport::TransportEventChannel;
    use embassy_time::Duration;
    use std::sync::Arc;

    type TestClock = WordClock<SimulatedWordClock, RecordingListener>;

    struct Harness {
        clock: TestClock,
        events: Arc<TransportEventChannel<SimPeripheral>>,
        device: SimulatorHandle,
    }

    impl Harness {
        fn new(transport: impl FnOnce(Arc<TransportEventChannel<SimPeripheral>>) -> SimulatedWordClock) -> Self {
            let events = Arc::new(TransportEventChannel::new());
            let transport = transport(Arc::clone(&events));
            let device = transport.handle();
            let clock = WordClock::new(transport, RecordingListener::default(), WordClockConfig::default());
            Self {
                clock,
                events,
                device,
            }
        }

        fn with_birthdays(birthdays: &[Birthday]) -> Self {
            Self::new(|events| {
                SimulatedWordClock::new(crate::types::WORDCLOCK_ADDRESS, events).with_birthdays(birthdays)
            })
        }

        /// Delivers every queued transport event.
        fn pump(&mut self) {
            while let Ok(event) = self.events.try_receive() {
                self.clock.handle_transport_event(event);
            }
        }

        /// Pumps events and fires timers until nothing is left to do.
        fn settle(&mut self) {
            loop {
                self.pump();
                match self.clock.next_deadline() {
                    Some(deadline) => {
                        self.clock.poll_timers(deadline);
                    }
                    None => break,
                }
            }
        }

        fn connected(birthdays: &[Birthday]) -> Self {
            let mut harness = Self::with_birthdays(birthdays);
            harness.clock.connect();
            harness.settle();
            assert_eq!(harness.clock.connection_state(), ConnectionState::Connected);
            harness.clear();
            harness
        }

        fn clear(&mut self) {
            self.clock.listener_mut().events.clear();
            self.device.with(|state| state.writes.clear());
        }

        fn events(&self) -> &[ClockEvent] {
            &self.clock.listener().events
        }
    }

    fn birthday(month: u32, day: u32) -> Birthday {
        Birthday::new(month, day).unwrap()
    }

    #[test]
    fn test_connect_fetches_sorted_list() {
        let mut harness = Harness::with_birthdays(&[birthday(12, 24), birthday(3, 1)]);
        harness.clock.connect();
        assert_eq!(harness.clock.connection_state(), ConnectionState::Scanning);

        harness.settle();

        assert_eq!(harness.clock.connection_state(), ConnectionState::Connected);
        assert_eq!(harness.device.writes(), vec!["listbdays\n"]);
        assert_eq!(
            harness.events(),
            &[
                ClockEvent::ConnectionUpdated(true),
                ClockEvent::BirthdaysUpdating(true),
                ClockEvent::BirthdaysUpdated(vec![birthday(3, 1), birthday(12, 24)]),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }

    #[test]
    fn test_long_listing_completes() {
        let stored: Vec<Birthday> = (1..=20).rev().map(|day| birthday(3, day)).collect();
        let mut harness = Harness::with_birthdays(&stored);
        harness.clock.connect();
        harness.settle();

        let mut expected = stored.clone();
        expected.sort();
        assert_eq!(
            harness.events()[2..],
            [
                ClockEvent::BirthdaysUpdated(expected),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }

    #[test]
    fn test_empty_device_publishes_empty_list() {
        let mut harness = Harness::with_birthdays(&[]);
        harness.clock.connect();
        harness.settle();

        assert_eq!(
            harness.events()[2..],
            [
                ClockEvent::BirthdaysUpdated(Vec::new()),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }

    #[test]
    fn test_set_time_writes_payload_after_delay() {
        let mut harness = Harness::connected(&[]);
        let start = Instant::now();

        harness.clock.set_time();
        harness.pump();
        assert_eq!(harness.device.writes(), vec!["settime\n"]);
        assert_eq!(harness.clock.pending_tasks(), 1);
        assert_eq!(harness.clock.pending_operation(), PendingOperation::None);

        let deadline = harness.clock.next_deadline().unwrap();
        assert!(deadline >= start + Duration::from_millis(200));
        assert_eq!(harness.clock.poll_timers(deadline - Duration::from_millis(1)), 0);
        assert_eq!(harness.clock.poll_timers(deadline), 1);

        let writes = harness.device.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[1].ends_with('\n'));
        assert!(harness.device.with(|state| state.time.is_some()));
        assert!(harness.events().is_empty());
    }

    #[test]
    fn test_set_color_reaches_device() {
        let mut harness = Harness::connected(&[]);
        harness.clock.set_color(Color::new(0xff, 0x88, 0x00));
        harness.settle();

        assert_eq!(harness.device.writes(), vec!["setcolor\n", "#ff8800\n"]);
        assert_eq!(
            harness.device.with(|state| state.color),
            Some(Color::new(0xff, 0x88, 0x00))
        );
    }

    #[test]
    fn test_add_birthday_refreshes_list() {
        let mut harness = Harness::connected(&[birthday(12, 24)]);
        harness.clock.add_birthday(birthday(6, 15));
        harness.settle();

        assert_eq!(
            harness.device.writes(),
            vec!["addbday\n", "6/15\n", "listbdays\n"]
        );
        assert_eq!(harness.events().first(), Some(&ClockEvent::BirthdaysUpdating(true)));
        assert_eq!(
            harness.events()[harness.events().len() - 2..],
            [
                ClockEvent::BirthdaysUpdated(vec![birthday(6, 15), birthday(12, 24)]),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }

    #[test]
    fn test_remove_birthday_refreshes_list() {
        let mut harness = Harness::connected(&[birthday(1, 1), birthday(2, 2)]);
        harness.clock.remove_birthday(birthday(1, 1));
        harness.settle();

        assert_eq!(harness.device.birthdays(), vec![birthday(2, 2)]);
        assert!(harness
            .events()
            .contains(&ClockEvent::BirthdaysUpdated(vec![birthday(2, 2)])));
    }

    #[test]
    fn test_disconnect_cancels_pending_payload() {
        let mut harness = Harness::connected(&[]);
        harness.clock.set_color(Color::new(1, 2, 3));
        harness.pump();
        assert_eq!(harness.clock.pending_tasks(), 1);

        harness.clock.disconnect();
        assert_eq!(harness.clock.pending_tasks(), 0);
        assert_eq!(harness.clock.connection_state(), ConnectionState::Disconnected);
        assert_eq!(harness.events(), &[ClockEvent::ConnectionUpdated(false)]);

        harness.settle();
        assert_eq!(harness.device.writes(), vec!["setcolor\n"]);
        assert_eq!(harness.events(), &[ClockEvent::ConnectionUpdated(false)]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut harness = Harness::with_birthdays(&[]);
        harness.clock.disconnect();
        harness.clock.disconnect();
        assert_eq!(harness.clock.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            harness.events(),
            &[
                ClockEvent::ConnectionUpdated(false),
                ClockEvent::ConnectionUpdated(false),
            ]
        );
    }

    #[test]
    fn test_operations_while_disconnected_write_nothing() {
        let mut harness = Harness::with_birthdays(&[]);
        harness.clock.set_color(Color::new(1, 1, 1));
        harness.clock.list_birthdays();
        harness.settle();

        assert!(harness.device.writes().is_empty());
        assert_eq!(
            harness.clock.pending_operation(),
            PendingOperation::SetColor(Color::new(1, 1, 1))
        );
    }

    #[test]
    fn test_missing_characteristic_returns_to_disconnected() {
        let mut harness = Harness::new(|events| {
            SimulatedWordClock::new(crate::types::WORDCLOCK_ADDRESS, events).without_characteristic()
        });
        harness.clock.connect();
        harness.settle();

        assert_eq!(harness.clock.connection_state(), ConnectionState::Disconnected);
        assert!(harness.events().is_empty());
        assert!(!harness.device.with(|state| state.connected));
    }

    #[test]
    fn test_link_loss_reports_disconnect() {
        let mut harness = Harness::connected(&[]);
        harness.clock.transport_mut().drop_link();
        harness.pump();

        assert_eq!(harness.clock.connection_state(), ConnectionState::Disconnected);
        assert_eq!(harness.events(), &[ClockEvent::ConnectionUpdated(false)]);
    }

    #[test]
    fn test_other_devices_are_ignored() {
        let mut harness = Harness::new(|events| SimulatedWordClock::new("11:22:33:44:55:66", events));
        harness.clock.connect();
        harness.clock.handle_transport_event(TransportEvent::Discovered {
            peripheral: SimPeripheral(7),
            address: "11:22:33:44:55:66".to_string(),
        });
        harness.settle();

        assert_eq!(harness.clock.connection_state(), ConnectionState::Scanning);
        assert!(!harness.device.with(|state| state.connected));
    }

    #[test]
    fn test_abandoned_listing_does_not_leak() {
        let mut harness = Harness::connected(&[]);
        harness.clock.list_birthdays();
        harness.pump();
        harness.clear();

        harness.clock.handle_notification(b"Birthday 1/3: 1/1\nBirthday 2/3: 2/2");
        harness.clock.handle_notification(b"Birthday 1/2: 0/5");
        harness.clock.handle_notification(b"Birthday 2/2: 4/4");

        assert_eq!(
            harness.events(),
            &[
                ClockEvent::BirthdaysUpdated(vec![birthday(4, 4), birthday(12, 5)]),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }

    #[test]
    fn test_listing_split_across_notifications() {
        let mut harness = Harness::connected(&[]);
        harness.clock.list_birthdays();
        harness.pump();
        harness.clear();

        harness.clock.handle_notification(b"Birthday count: 3\nBirthday 1/3: 5/5\r\n");
        harness.clock.handle_notification(b"Birthday 2/3: 1/1");
        assert!(harness.events().is_empty());
        harness.clock.handle_notification(b"Birthday 3/3: 2/30");

        assert_eq!(
            harness.events(),
            &[
                ClockEvent::BirthdaysUpdated(vec![birthday(1, 1), birthday(3, 1), birthday(5, 5)]),
                ClockEvent::BirthdaysUpdating(false),
            ]
        );
    }
}
