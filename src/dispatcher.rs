//! Command dispatch and the prompt/payload handshake.
//!
//! Each logical operation writes a single command token. The device answers
//! with a prompt, and the payload goes out as a timed follow-up. Only one
//! operation is tracked; a newer one replaces an older one whose prompt has
//! not arrived yet.

use crate::protocol::{self, Command, Prompt};
use crate::timer::TimedTask;
use crate::types::{Birthday, Color, PendingOperation};
use log::{debug, info};

/// Outbound byte sink. Returns false when the write was dropped.
pub trait CommandSink {
    fn send(&mut self, data: &[u8]) -> bool;
}

#[derive(Debug, Default)]
pub struct CommandDispatcher {
    pending: PendingOperation,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> PendingOperation {
        self.pending
    }

    pub fn set_time(&mut self, sink: &mut impl CommandSink) -> bool {
        self.dispatch(PendingOperation::SetTime, Command::SetTime, sink)
    }

    pub fn set_color(&mut self, color: Color, sink: &mut impl CommandSink) -> bool {
        self.dispatch(PendingOperation::SetColor(color), Command::SetColor, sink)
    }

    pub fn list_birthdays(&mut self, sink: &mut impl CommandSink) -> bool {
        info!("Requesting birthday list");
        sink.send(Command::ListBirthdays.as_bytes())
    }

    pub fn add_birthday(&mut self, birthday: Birthday, sink: &mut impl CommandSink) -> bool {
        self.dispatch(PendingOperation::AddBirthday(birthday), Command::AddBirthday, sink)
    }

    pub fn remove_birthday(&mut self, birthday: Birthday, sink: &mut impl CommandSink) -> bool {
        self.dispatch(
            PendingOperation::RemoveBirthday(birthday),
            Command::RemoveBirthday,
            sink,
        )
    }

    fn dispatch(
        &mut self,
        operation: PendingOperation,
        command: Command,
        sink: &mut impl CommandSink,
    ) -> bool {
        if self.pending != PendingOperation::None {
            debug!("Replacing pending {:?} with {:?}", self.pending, operation);
        }
        info!("Dispatching {:?}", operation);
        self.pending = operation;
        sink.send(command.as_bytes())
    }

    /// Maps a device prompt to the follow-up that delivers its payload. The
    /// time prompt is always answered; color and birthday prompts consume the
    /// matching pending operation.
    pub fn on_prompt(&mut self, prompt: Prompt) -> Option<TimedTask> {
        let (task, consumed) = match (prompt, self.pending) {
            (Prompt::SetTime, pending) => {
                (Some(TimedTask::SendTime), pending == PendingOperation::SetTime)
            }
            (Prompt::SetColor, PendingOperation::SetColor(color)) => {
                (Some(TimedTask::SendColor(color)), true)
            }
            (Prompt::EnterBirthday, PendingOperation::AddBirthday(birthday))
            | (Prompt::EnterBirthday, PendingOperation::RemoveBirthday(birthday)) => {
                (Some(TimedTask::SendBirthday(birthday)), true)
            }
            (prompt, pending) => {
                debug!("No payload for prompt {:?} while {:?} is pending", prompt, pending);
                (None, false)
            }
        };

        if consumed {
            self.pending = PendingOperation::None;
        }
        task
    }

    /// Writes the payload of a fired follow-up. Returns the next follow-up
    /// in the chain, if any.
    pub fn run_task(&mut self, task: TimedTask, sink: &mut impl CommandSink) -> Option<TimedTask> {
        match task {
            TimedTask::SendTime => {
                let now = chrono::Local::now().naive_local();
                sink.send(protocol::time_payload(&now).as_bytes());
                None
            }
            TimedTask::SendColor(color) => {
                sink.send(protocol::color_payload(&color).as_bytes());
                None
            }
            TimedTask::SendBirthday(birthday) => {
                sink.send(protocol::birthday_payload(&birthday).as_bytes());
                Some(TimedTask::RefreshBirthdays)
            }
            TimedTask::RefreshBirthdays => {
                self.list_birthdays(sink);
                None
            }
        }
    }
}
