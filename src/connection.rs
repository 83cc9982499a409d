//! Discovery, connection and teardown of the word clock link.
//!
//! States: Disconnected, Scanning, Connecting, Connected.
//! Connecting is internal and is reported to callers as Scanning; the link is
//! only Connected once the characteristic is resolved and notifications are on.

use crate::config::WordClockConfig;
use crate::dispatcher::CommandSink;
use crate::transport::Transport;
use crate::types::ConnectionState;
use bstr::ByteSlice;
use log::{debug, error, info, warn};
use statig::prelude::*;

// Inputs to the link state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInput {
    ConnectRequested,
    ScanFailed,
    DeviceDiscovered,
    LinkEstablished { usable: bool },
    DisconnectRequested,
    LinkLost,
}

// Actions requested by the link state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutput {
    StartScan,
    StopScan,
    ConnectDiscovered,
    Release { cancel_connection: bool },
    ConnectivityChanged(bool),
    FetchBirthdays,
}

pub type LinkOutputs = heapless::Vec<LinkOutput, 8>;

#[derive(Debug, Default)]
pub struct LinkContext {
    outputs: LinkOutputs,
}

impl LinkContext {
    fn emit(&mut self, output: LinkOutput) {
        if self.outputs.push(output).is_err() {
            error!("Link output buffer full, dropping {:?}", output);
        }
    }

    fn emit_teardown(&mut self, cancel_connection: bool, notify: bool) {
        self.emit(LinkOutput::StopScan);
        self.emit(LinkOutput::Release { cancel_connection });
        if notify {
            self.emit(LinkOutput::ConnectivityChanged(false));
        }
    }
}

#[derive(Debug, Default)]
pub struct LinkMachine;

#[state_machine(
    initial = "State::disconnected()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl LinkMachine {
    #[state]
    fn disconnected(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::ConnectRequested => {
                context.emit(LinkOutput::StartScan);
                Transition(State::scanning())
            }
            // Disconnect is idempotent but always reported
            LinkInput::DisconnectRequested => {
                context.emit_teardown(false, true);
                Handled
            }
            _ => Handled,
        }
    }

    #[state]
    fn scanning(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::DeviceDiscovered => {
                context.emit(LinkOutput::StopScan);
                context.emit(LinkOutput::ConnectDiscovered);
                Transition(State::connecting())
            }
            // The link never came up, so there is nothing to report
            LinkInput::ScanFailed => {
                context.emit_teardown(false, false);
                Transition(State::disconnected())
            }
            LinkInput::DisconnectRequested => {
                context.emit_teardown(false, true);
                Transition(State::disconnected())
            }
            _ => Handled,
        }
    }

    #[state]
    fn connecting(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::LinkEstablished { usable: true } => {
                context.emit(LinkOutput::ConnectivityChanged(true));
                context.emit(LinkOutput::FetchBirthdays);
                Transition(State::connected())
            }
            LinkInput::LinkEstablished { usable: false } => {
                context.emit(LinkOutput::Release {
                    cancel_connection: true,
                });
                Transition(State::disconnected())
            }
            LinkInput::DisconnectRequested => {
                context.emit_teardown(true, true);
                Transition(State::disconnected())
            }
            LinkInput::LinkLost => {
                context.emit(LinkOutput::Release {
                    cancel_connection: false,
                });
                Transition(State::disconnected())
            }
            _ => Handled,
        }
    }

    #[state]
    fn connected(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::DisconnectRequested => {
                context.emit_teardown(true, true);
                Transition(State::disconnected())
            }
            LinkInput::LinkLost => {
                context.emit(LinkOutput::Release {
                    cancel_connection: false,
                });
                context.emit(LinkOutput::ConnectivityChanged(false));
                Transition(State::disconnected())
            }
            _ => Handled,
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        info!("Link transition: {:?} -> {:?}", source, target);
    }

    fn connection_state(state: &State) -> ConnectionState {
        match state {
            State::Disconnected {} => ConnectionState::Disconnected,
            State::Scanning {} | State::Connecting {} => ConnectionState::Scanning,
            State::Connected {} => ConnectionState::Connected,
        }
    }
}

/// Owns the transport, the link state and the peripheral/characteristic
/// handles. Callers see only the upward outputs: connectivity changes, the
/// initial list fetch and releases.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: WordClockConfig,
    machine: StateMachine<LinkMachine>,
    context: LinkContext,
    candidate: Option<T::Peripheral>,
    peripheral: Option<T::Peripheral>,
    characteristic: Option<T::Characteristic>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, config: WordClockConfig) -> Self {
        Self {
            transport,
            config,
            machine: LinkMachine::default().state_machine(),
            context: LinkContext::default(),
            candidate: None,
            peripheral: None,
            characteristic: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        LinkMachine::connection_state(self.machine.state())
    }

    pub fn is_connected(&self) -> bool {
        self.characteristic.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn connect(&mut self) -> LinkOutputs {
        self.handle(LinkInput::ConnectRequested)
    }

    pub fn disconnect(&mut self) -> LinkOutputs {
        self.handle(LinkInput::DisconnectRequested)
    }

    pub fn on_discovered(&mut self, peripheral: T::Peripheral, address: &str) -> LinkOutputs {
        if self.state() != ConnectionState::Scanning || self.candidate.is_some() {
            debug!("Ignoring discovery of {} outside of a scan", address);
            return LinkOutputs::new();
        }
        if !address.eq_ignore_ascii_case(&self.config.device_address) {
            debug!("Ignoring unexpected device {}", address);
            return LinkOutputs::new();
        }

        info!("Found word clock at {}", address);
        self.candidate = Some(peripheral);
        self.handle(LinkInput::DeviceDiscovered)
    }

    pub fn on_connected(&mut self, peripheral: T::Peripheral) -> LinkOutputs {
        if self.candidate.as_ref() != Some(&peripheral) {
            warn!("Unexpected connection to {:?}, cancelling", peripheral);
            self.transport.cancel_connection(&peripheral);
            return LinkOutputs::new();
        }

        let usable = self.resolve(&peripheral);
        self.handle(LinkInput::LinkEstablished { usable })
    }

    pub fn on_disconnected(&mut self, peripheral: T::Peripheral) -> LinkOutputs {
        let ours = self.peripheral.as_ref() == Some(&peripheral)
            || self.candidate.as_ref() == Some(&peripheral);
        if !ours {
            debug!("Ignoring disconnect of unrelated peripheral {:?}", peripheral);
            return LinkOutputs::new();
        }

        warn!("Word clock connection lost");
        self.handle(LinkInput::LinkLost)
    }

    fn resolve(&mut self, peripheral: &T::Peripheral) -> bool {
        let Some(characteristic) = self.transport.characteristic(
            peripheral,
            self.config.service_uuid,
            self.config.characteristic_uuid,
        ) else {
            error!(
                "Characteristic {} not found in service {}",
                self.config.characteristic_uuid, self.config.service_uuid
            );
            return false;
        };

        if let Err(e) = self.transport.set_notify(peripheral, &characteristic, true) {
            error!("Failed to subscribe to notifications: {}", e);
            return false;
        }

        info!("Subscribed to characteristic {}", self.config.characteristic_uuid);
        self.peripheral = Some(peripheral.clone());
        self.characteristic = Some(characteristic);
        true
    }

    fn handle(&mut self, input: LinkInput) -> LinkOutputs {
        let mut emitted = LinkOutputs::new();
        let mut next = Some(input);

        while let Some(input) = next.take() {
            self.context.outputs.clear();
            self.machine.handle_with_context(&input, &mut self.context);
            let outputs = std::mem::take(&mut self.context.outputs);

            for output in outputs {
                if let Some(follow_up) = self.execute(output) {
                    next = Some(follow_up);
                }
                if emitted.push(output).is_err() {
                    error!("Link output buffer full, dropping {:?}", output);
                }
            }
        }
        emitted
    }

    /// Runs one transport-facing action. A failed action yields the input
    /// that unwinds the link.
    fn execute(&mut self, output: LinkOutput) -> Option<LinkInput> {
        match output {
            LinkOutput::StartScan => {
                info!("Scanning for word clock {}", self.config.device_address);
                if let Err(e) = self.transport.start_scan(&self.config.device_address) {
                    error!("{}", e);
                    return Some(LinkInput::ScanFailed);
                }
            }
            LinkOutput::StopScan => self.transport.stop_scan(),
            LinkOutput::ConnectDiscovered => {
                let peripheral = self.candidate.clone()?;
                if let Err(e) = self.transport.connect(&peripheral) {
                    error!("{}", e);
                    return Some(LinkInput::LinkLost);
                }
            }
            LinkOutput::Release { cancel_connection } => {
                let peripheral = self.peripheral.take().or(self.candidate.take());
                self.candidate = None;
                self.characteristic = None;
                if let (true, Some(peripheral)) = (cancel_connection, peripheral) {
                    self.transport.cancel_connection(&peripheral);
                }
            }
            LinkOutput::ConnectivityChanged(_) | LinkOutput::FetchBirthdays => {}
        }
        None
    }
}

impl<T: Transport> CommandSink for ConnectionManager<T> {
    fn send(&mut self, data: &[u8]) -> bool {
        let (Some(peripheral), Some(characteristic)) = (&self.peripheral, &self.characteristic)
        else {
            debug!("No characteristic, dropping write {:?}", data.as_bstr());
            return false;
        };

        debug!("Writing {:?}", data.as_bstr());
        match self.transport.write(peripheral, characteristic, data) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}
