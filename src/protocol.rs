//! Word clock wire grammar: command tokens, payload lines and the
//! classification of device notifications.

use crate::types::{Birthday, Color};
use bstr::ByteSlice;
use chrono::NaiveDateTime;
use log::{debug, trace};

pub const PROMPT_SET_TIME: &str = "Set the date & time";
pub const PROMPT_SET_COLOR: &str = "Set the color";
pub const PROMPT_ENTER_BIRTHDAY: &str = "Enter birthday";

const BIRTHDAY_COUNT_MARKER: &str = "Birthday count: ";
const BIRTHDAY_ENTRY_MARKER: &str = "Birthday ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetTime,
    SetColor,
    ListBirthdays,
    AddBirthday,
    RemoveBirthday,
}

impl Command {
    pub fn token(&self) -> &'static str {
        match self {
            Command::SetTime => "settime\n",
            Command::SetColor => "setcolor\n",
            Command::ListBirthdays => "listbdays\n",
            Command::AddBirthday => "addbday\n",
            Command::RemoveBirthday => "removebday\n",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.token().as_bytes()
    }
}

/// Device request for the payload of the previous command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    SetTime,
    SetColor,
    EnterBirthday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Prompt(Prompt),
    BirthdayCount(u32),
    BirthdayEntry {
        number: u32,
        count: u32,
        month: u32,
        day: u32,
    },
}

pub fn time_payload(now: &NaiveDateTime) -> String {
    now.format("%Y/%-m/%-d,%H:%M:%S\n").to_string()
}

pub fn color_payload(color: &Color) -> String {
    format!("{}\n", color.to_hex())
}

pub fn birthday_payload(birthday: &Birthday) -> String {
    format!("{}/{}\n", birthday.month(), birthday.day())
}

/// Splits a notification into lines and classifies each one. Lines that match
/// nothing are dropped.
pub fn parse_notification(data: &[u8]) -> Vec<Response> {
    let text = data.to_str_lossy();
    trace!("Notification text: {:?}", text);

    text.split(|c: char| c == '\n' || c == '\r')
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let response = classify_line(line);
            if response.is_none() {
                debug!("Ignoring unrecognized line: {:?}", line);
            }
            response
        })
        .collect()
}

/// Ordered matchers: prompts by exact prefix first, then the list patterns
/// searched anywhere in the line.
pub fn classify_line(line: &str) -> Option<Response> {
    const PROMPTS: [(&str, Prompt); 3] = [
        (PROMPT_SET_TIME, Prompt::SetTime),
        (PROMPT_SET_COLOR, Prompt::SetColor),
        (PROMPT_ENTER_BIRTHDAY, Prompt::EnterBirthday),
    ];

    if let Some((_, prompt)) = PROMPTS.iter().find(|(prefix, _)| line.starts_with(*prefix)) {
        return Some(Response::Prompt(*prompt));
    }

    match_birthday_count(line).or_else(|| match_birthday_entry(line))
}

// `Birthday count: (\d+)`
fn match_birthday_count(line: &str) -> Option<Response> {
    line.match_indices(BIRTHDAY_COUNT_MARKER).find_map(|(start, marker)| {
        let (count, _) = take_number(&line[start + marker.len()..])?;
        Some(Response::BirthdayCount(count))
    })
}

// `Birthday (\d+)/(\d+): (\d+)/(\d+)`
fn match_birthday_entry(line: &str) -> Option<Response> {
    line.match_indices(BIRTHDAY_ENTRY_MARKER).find_map(|(start, marker)| {
        let rest = &line[start + marker.len()..];
        let (number, rest) = take_number(rest)?;
        let (count, rest) = take_number(rest.strip_prefix('/')?)?;
        let (month, rest) = take_number(rest.strip_prefix(": ")?)?;
        let (day, _) = take_number(rest.strip_prefix('/')?)?;
        Some(Response::BirthdayEntry {
            number,
            count,
            month,
            day,
        })
    })
}

fn take_number(text: &str) -> Option<(u32, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}
