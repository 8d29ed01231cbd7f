use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::{BridgeError, Result};

/// number of sensor channels the bridge reports per reading
pub const NUM_CHANNELS: usize = 7;

/// json keys of the sensor channels, in column order
pub const CHANNEL_KEYS: [&str; NUM_CHANNELS] =
    ["no2", "eth", "voc", "co", "co_mics", "eth_mics", "voc_mics"];

/// acquisition state reported by the bridge firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Idle,
    PreCond,
    RampUp,
    Hold,
    Purge,
    Recovery,
    Done,
    Unknown(i64),
}

impl FsmState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => FsmState::Idle,
            1 => FsmState::PreCond,
            2 => FsmState::RampUp,
            3 => FsmState::Hold,
            4 => FsmState::Purge,
            5 => FsmState::Recovery,
            6 => FsmState::Done,
            other => FsmState::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            FsmState::Idle => 0,
            FsmState::PreCond => 1,
            FsmState::RampUp => 2,
            FsmState::Hold => 3,
            FsmState::Purge => 4,
            FsmState::Recovery => 5,
            FsmState::Done => 6,
            FsmState::Unknown(code) => *code,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FsmState::Idle => "IDLE",
            FsmState::PreCond => "PRE-COND",
            FsmState::RampUp => "RAMP_UP",
            FsmState::Hold => "HOLD",
            FsmState::Purge => "PURGE",
            FsmState::Recovery => "RECOVERY",
            FsmState::Done => "DONE",
            FsmState::Unknown(_) => "UNKNOWN",
        }
    }

    /// the firmware finished its cycle; sampling should end
    pub fn is_done(&self) -> bool {
        matches!(self, FsmState::Done)
    }
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for FsmState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// one event from the data stream
///
/// the bridge sends a flat json object per line, e.g.
/// `{"timestamp":1700000000000,"no2":1.2,...,"state":3,"level":2,"state_name":"HOLD"}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub channels: [f64; NUM_CHANNELS],
    pub state: FsmState,
    pub level: i64,
    pub timestamp_ms: Option<u64>,
    /// the bridge's own label for `state`, passed through untouched
    pub state_name: Option<String>,
}

impl SensorReading {
    /// Decode one line of the data stream.
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| BridgeError::Protocol(format!("invalid json: {}", e)))?;
        Self::from_value(&value)
    }

    /// Build a reading from a decoded json value.
    ///
    /// missing or non-numeric fields read as zero.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| BridgeError::Protocol("reading is not a json object".into()))?;

        let mut channels = [0.0; NUM_CHANNELS];
        for (slot, key) in channels.iter_mut().zip(CHANNEL_KEYS) {
            *slot = coerce_f64(map.get(key));
        }

        let timestamp_ms = map.get("timestamp").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        Ok(Self {
            channels,
            state: FsmState::from_code(coerce_i64(map.get("state"))),
            level: coerce_i64(map.get("level")),
            timestamp_ms,
            state_name: map.get("state_name").and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn channel(&self, index: usize) -> f64 {
        self.channels.get(index).copied().unwrap_or(0.0)
    }
}

fn coerce_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn coerce_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}
