//! Link configuration: device identity and handshake timing.

use crate::types::{
    ClockError, PAYLOAD_DELAY_MS, REFRESH_DELAY_MS, WORDCLOCK_ADDRESS,
    WORDCLOCK_CHARACTERISTIC_UUID, WORDCLOCK_SERVICE_UUID,
};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordClockConfig {
    pub device_address: String,
    pub service_uuid: uuid::Uuid,
    pub characteristic_uuid: uuid::Uuid,
    pub payload_delay_ms: u64,
    pub refresh_delay_ms: u64,
}

impl Default for WordClockConfig {
    fn default() -> Self {
        Self {
            device_address: WORDCLOCK_ADDRESS.to_string(),
            service_uuid: WORDCLOCK_SERVICE_UUID,
            characteristic_uuid: WORDCLOCK_CHARACTERISTIC_UUID,
            payload_delay_ms: PAYLOAD_DELAY_MS,
            refresh_delay_ms: REFRESH_DELAY_MS,
        }
    }
}

impl WordClockConfig {
    pub fn from_json(json: &str) -> Result<Self, ClockError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ClockError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ClockError> {
        if self.device_address.trim().is_empty() {
            return Err(ClockError::Config("device address is empty".to_string()));
        }
        if self.payload_delay_ms == 0 || self.refresh_delay_ms == 0 {
            return Err(ClockError::Config(
                "handshake delays must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn payload_delay(&self) -> Duration {
        Duration::from_millis(self.payload_delay_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}
