//! In-process word clock peripheral.
//!
//! Implements [`Transport`] by answering commands the way the clock firmware
//! does: a command token is answered with a prompt, the next line is taken as
//! the payload, and `listbdays` is answered with a count line followed by one
//! line per stored birthday. The lines printed for one write go out as a
//! single newline-separated notification, so a listing of any length takes
//! one slot in the event channel.

use crate::transport::{Transport, TransportError, TransportEvent, TransportEventChannel};
use crate::types::{Birthday, Color, WORDCLOCK_CHARACTERISTIC_UUID, WORDCLOCK_SERVICE_UUID};
use bstr::ByteSlice;
use chrono::NaiveDateTime;
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimPeripheral(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCharacteristic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Time,
    Color,
    AddBirthday,
    RemoveBirthday,
}

/// Firmware-side state, shared with test code through [`SimulatorHandle`].
#[derive(Debug, Default)]
pub struct DeviceState {
    pub birthdays: Vec<Birthday>,
    pub time: Option<NaiveDateTime>,
    pub color: Option<Color>,
    pub writes: Vec<String>,
    pub scanning: bool,
    pub connected: bool,
    pub notifying: bool,
    awaiting: Option<Awaiting>,
}

impl DeviceState {
    /// Consumes one line written by the controller and returns the lines the
    /// firmware prints back.
    fn receive(&mut self, line: &str) -> Vec<String> {
        if let Some(awaiting) = self.awaiting.take() {
            return self.receive_payload(awaiting, line);
        }

        match line {
            "settime" => self.prompt(Awaiting::Time, "Set the date & time (yyyy/m/d,hh:mm:ss):"),
            "setcolor" => self.prompt(Awaiting::Color, "Set the color (#rrggbb):"),
            "addbday" => self.prompt(Awaiting::AddBirthday, "Enter birthday (m/d):"),
            "removebday" => self.prompt(Awaiting::RemoveBirthday, "Enter birthday (m/d):"),
            "listbdays" => self.listing(),
            other => vec![format!("Unknown command: {}", other)],
        }
    }

    fn prompt(&mut self, awaiting: Awaiting, text: &str) -> Vec<String> {
        self.awaiting = Some(awaiting);
        vec![text.to_string()]
    }

    fn listing(&self) -> Vec<String> {
        let count = self.birthdays.len();
        let mut lines = vec![format!("Birthday count: {}", count)];
        lines.extend(self.birthdays.iter().enumerate().map(|(index, birthday)| {
            format!("Birthday {}/{}: {}/{}", index + 1, count, birthday.month(), birthday.day())
        }));
        lines
    }

    fn receive_payload(&mut self, awaiting: Awaiting, line: &str) -> Vec<String> {
        let reply = match awaiting {
            Awaiting::Time => match NaiveDateTime::parse_from_str(line, "%Y/%m/%d,%H:%M:%S") {
                Ok(time) => {
                    self.time = Some(time);
                    "Time updated"
                }
                Err(_) => "Invalid time",
            },
            Awaiting::Color => match line.parse::<Color>() {
                Ok(color) => {
                    self.color = Some(color);
                    "Color updated"
                }
                Err(_) => "Invalid color",
            },
            Awaiting::AddBirthday => match line.parse::<Birthday>() {
                Ok(birthday) => {
                    self.birthdays.push(birthday);
                    "Added"
                }
                Err(_) => "Invalid date",
            },
            Awaiting::RemoveBirthday => match line.parse::<Birthday>() {
                Ok(birthday) => match self.birthdays.iter().position(|b| *b == birthday) {
                    Some(index) => {
                        self.birthdays.remove(index);
                        "Removed"
                    }
                    None => "Not found",
                },
                Err(_) => "Invalid date",
            },
        };
        vec![reply.to_string()]
    }
}

pub type SharedDeviceState = Arc<Mutex<CriticalSectionRawMutex, RefCell<DeviceState>>>;

/// Read/modify access to the simulated firmware from outside the transport.
#[derive(Clone)]
pub struct SimulatorHandle {
    state: SharedDeviceState,
}

impl SimulatorHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn writes(&self) -> Vec<String> {
        self.with(|state| state.writes.clone())
    }

    pub fn birthdays(&self) -> Vec<Birthday> {
        self.with(|state| state.birthdays.clone())
    }
}

pub struct SimulatedWordClock {
    address: String,
    peripheral: SimPeripheral,
    events: Arc<TransportEventChannel<SimPeripheral>>,
    state: SharedDeviceState,
    resolvable: bool,
}

impl SimulatedWordClock {
    pub fn new(address: &str, events: Arc<TransportEventChannel<SimPeripheral>>) -> Self {
        Self {
            address: address.to_string(),
            peripheral: SimPeripheral(1),
            events,
            state: Arc::new(Mutex::new(RefCell::new(DeviceState::default()))),
            resolvable: true,
        }
    }

    pub fn with_birthdays(self, birthdays: &[Birthday]) -> Self {
        self.handle().with(|state| state.birthdays = birthdays.to_vec());
        self
    }

    /// Hides the word clock characteristic so that connecting fails.
    pub fn without_characteristic(mut self) -> Self {
        self.resolvable = false;
        self
    }

    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Drops the link from the device side.
    pub fn drop_link(&mut self) {
        self.handle().with(|state| {
            state.connected = false;
            state.notifying = false;
        });
        self.emit(TransportEvent::Disconnected(self.peripheral));
    }

    fn emit(&self, event: TransportEvent<SimPeripheral>) {
        if self.events.try_send(event).is_err() {
            warn!("Simulator event channel full, event lost");
        }
    }
}

impl Transport for SimulatedWordClock {
    type Peripheral = SimPeripheral;
    type Characteristic = SimCharacteristic;

    fn start_scan(&mut self, address: &str) -> Result<(), TransportError> {
        self.handle().with(|state| state.scanning = true);
        if address.eq_ignore_ascii_case(&self.address) {
            self.emit(TransportEvent::Discovered {
                peripheral: self.peripheral,
                address: self.address.clone(),
            });
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.handle().with(|state| state.scanning = false);
    }

    fn connect(&mut self, peripheral: &SimPeripheral) -> Result<(), TransportError> {
        if *peripheral != self.peripheral {
            return Err(TransportError::ConnectionFailed(format!("unknown peripheral {:?}", peripheral)));
        }
        self.handle().with(|state| state.connected = true);
        self.emit(TransportEvent::Connected(*peripheral));
        Ok(())
    }

    fn cancel_connection(&mut self, peripheral: &SimPeripheral) {
        let was_connected = self.handle().with(|state| {
            let was_connected = state.connected;
            state.connected = false;
            state.notifying = false;
            state.awaiting = None;
            was_connected
        });
        if was_connected {
            self.emit(TransportEvent::Disconnected(*peripheral));
        }
    }

    fn characteristic(
        &mut self,
        _peripheral: &SimPeripheral,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
    ) -> Option<SimCharacteristic> {
        let known = service == WORDCLOCK_SERVICE_UUID && characteristic == WORDCLOCK_CHARACTERISTIC_UUID;
        (self.resolvable && known).then_some(SimCharacteristic)
    }

    fn set_notify(
        &mut self,
        _peripheral: &SimPeripheral,
        _characteristic: &SimCharacteristic,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.handle().with(|state| {
            if state.connected {
                state.notifying = enabled;
                Ok(())
            } else {
                Err(TransportError::NotifyFailed("not connected".to_string()))
            }
        })
    }

    fn write(
        &mut self,
        _peripheral: &SimPeripheral,
        _characteristic: &SimCharacteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let (notifying, replies) = self.handle().with(|state| {
            if !state.connected {
                return Err(TransportError::WriteFailed("not connected".to_string()));
            }
            let text = data.to_str_lossy();
            state.writes.push(text.to_string());

            let mut replies = Vec::new();
            for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
                debug!("Simulator received {:?}", line);
                replies.extend(state.receive(line));
            }
            Ok((state.notifying, replies))
        })?;

        if notifying && !replies.is_empty() {
            let notification = replies.join("\n");
            info!("Simulator notifies {:?}", notification);
            self.emit(TransportEvent::Notification(notification.into_bytes()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_handshakes() {
        let mut state = DeviceState::default();
        assert_eq!(state.receive("addbday"), vec!["Enter birthday (m/d):"]);
        assert_eq!(state.receive("6/15"), vec!["Added"]);
        assert_eq!(state.receive("setcolor"), vec!["Set the color (#rrggbb):"]);
        assert_eq!(state.receive("#0a0b0c"), vec!["Color updated"]);
        assert_eq!(state.color, Some(Color::new(0x0a, 0x0b, 0x0c)));
        assert_eq!(
            state.receive("listbdays"),
            vec!["Birthday count: 1", "Birthday 1/1: 6/15"]
        );
        assert_eq!(state.receive("removebday"), vec!["Enter birthday (m/d):"]);
        assert_eq!(state.receive("1/1"), vec!["Not found"]);
    }

    #[test]
    fn test_write_requires_connection() {
        let events = Arc::new(TransportEventChannel::new());
        let mut clock = SimulatedWordClock::new("AA:BB", Arc::clone(&events));
        assert!(clock
            .write(&SimPeripheral(1), &SimCharacteristic, b"listbdays\n")
            .is_err());
        assert!(events.try_receive().is_err());
    }

    #[test]
    fn test_long_listing_fits_one_notification() {
        let events = Arc::new(TransportEventChannel::new());
        let birthdays: Vec<Birthday> = (1..=20).map(|day| Birthday::new(1, day).unwrap()).collect();
        let mut clock = SimulatedWordClock::new("AA:BB", Arc::clone(&events)).with_birthdays(&birthdays);

        clock.connect(&SimPeripheral(1)).unwrap();
        clock.set_notify(&SimPeripheral(1), &SimCharacteristic, true).unwrap();
        assert!(matches!(events.try_receive(), Ok(TransportEvent::Connected(_))));

        clock.write(&SimPeripheral(1), &SimCharacteristic, b"listbdays\n").unwrap();
        let Ok(TransportEvent::Notification(data)) = events.try_receive() else {
            panic!("expected a notification");
        };
        let text = String::from_utf8(data).unwrap();
        assert_eq!(text.lines().count(), 21);
        assert_eq!(text.lines().last(), Some("Birthday 20/20: 1/20"));
        assert!(events.try_receive().is_err());
    }
}
