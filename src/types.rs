use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const WORDCLOCK_ADDRESS: &str = "A0:6C:65:CF:A0:8F";
pub const WORDCLOCK_SERVICE_UUID: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_FFE0_0000_1000_8000_00805F9B34FB);
pub const WORDCLOCK_CHARACTERISTIC_UUID: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_FFE1_0000_1000_8000_00805F9B34FB);

pub const PAYLOAD_DELAY_MS: u64 = 200; // Device needs time to switch into payload mode
pub const REFRESH_DELAY_MS: u64 = 200;

// Leap year so that 2/29 is a storable birthday
const REFERENCE_YEAR: i32 = 2000;

#[derive(Debug)]
pub enum ClockError {
    InvalidBirthday { month: u32, day: u32 },
    InvalidColor(String),
    Config(String),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClockError::InvalidBirthday { month, day } => {
                write!(f, "Invalid birthday: {}/{}", month, day)
            }
            ClockError::InvalidColor(text) => write!(f, "Invalid color: {:?}", text),
            ClockError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ClockError {}

impl From<serde_json::Error> for ClockError {
    fn from(error: serde_json::Error) -> Self {
        ClockError::Config(error.to_string())
    }
}

/// A stored birthday. Only month and day are meaningful; the year is a fixed
/// reference year used for validation and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Birthday {
    month: u32,
    day: u32,
}

impl Birthday {
    /// Strict constructor for user-supplied dates.
    pub fn new(month: u32, day: u32) -> Result<Self, ClockError> {
        NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day)
            .map(Self::from_date)
            .ok_or(ClockError::InvalidBirthday { month, day })
    }

    /// Lenient calendar construction for device-reported dates: day overflow
    /// rolls into the following month, day 0 is the last day of the previous
    /// month and month overflow wraps into the next year. Month 0 is December
    /// of the previous year.
    pub fn normalized(month: u32, day: u32) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1)?;
        let month_start = first
            .checked_add_months(Months::new(month))?
            .checked_sub_months(Months::new(1))?;
        let date = if day == 0 {
            month_start.pred_opt()?
        } else {
            month_start.checked_add_days(chrono::Days::new(u64::from(day - 1)))?
        };
        Some(Self::from_date(date))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl fmt::Display for Birthday {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.day)
    }
}

impl FromStr for Birthday {
    type Err = ClockError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ClockError::InvalidBirthday { month: 0, day: 0 };
        let (month, day) = text.trim().split_once('/').ok_or_else(invalid)?;
        let month = month.parse().map_err(|_| invalid())?;
        let day = day.parse().map_err(|_| invalid())?;
        Birthday::new(month, day)
    }
}

/// Display color without alpha, written to the device as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = ClockError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ClockError::InvalidColor(text.to_string());
        let hex = text.trim().strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// The logical command waiting for its payload prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOperation {
    #[default]
    None,
    SetTime,
    SetColor(Color),
    AddBirthday(Birthday),
    RemoveBirthday(Birthday),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connected,
}
