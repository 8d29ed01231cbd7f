//! In-memory sample session: the arrays a recording accumulates between
//! start and save, plus the bounded buffer the live plot draws from.

use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::{FsmState, SensorReading};
use crate::error::{BridgeError, Result};
use crate::stats::{self, StatsRow};

/// What `SampleSession::record` did with a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// not sampling, nothing appended
    Ignored,
    Accepted,
    /// appended, and the bridge reported DONE so sampling stopped
    AutoStop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPoint {
    pub time: f64,
    pub values: Vec<f64>,
}

/// Rolling window of the most recent points.
#[derive(Debug, Clone)]
pub struct PlotBuffer {
    capacity: usize,
    points: VecDeque<PlotPoint>,
}

impl PlotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::new(),
        }
    }

    pub fn push(&mut self, point: PlotPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// the last `n` points, oldest first
    pub fn tail(&self, n: usize) -> Vec<PlotPoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).cloned().collect()
    }
}

/// rows of the "sampling information" table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub sample_name: String,
    pub sample_type: String,
    pub mode: &'static str,
    pub points: usize,
    pub elapsed_s: f64,
    pub state: String,
    pub level: i64,
    pub sampling: bool,
}

#[derive(Debug, Clone)]
pub struct SampleSession {
    name: String,
    sample_type: String,
    sensor_names: Vec<String>,
    times: Vec<f64>,
    channels: Vec<Vec<f64>>,
    plot: PlotBuffer,
    sampling: bool,
    last_state: Option<FsmState>,
    last_level: i64,
}

impl SampleSession {
    pub fn new(sensor_names: Vec<String>, max_plot_points: usize) -> Self {
        let channels = vec![Vec::new(); sensor_names.len()];
        Self {
            name: String::new(),
            sample_type: String::new(),
            sensor_names,
            times: Vec::new(),
            channels,
            plot: PlotBuffer::new(max_plot_points),
            sampling: false,
            last_state: None,
            last_level: 0,
        }
    }

    /// Begin sampling under `name`.
    ///
    /// data left over from an earlier run stays; call `clear` first for a
    /// fresh recording.
    pub fn start(&mut self, name: &str, sample_type: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BridgeError::Config("sample name must not be empty".into()));
        }
        self.name = name.to_string();
        self.sample_type = sample_type.to_string();
        self.sampling = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.sampling = false;
    }

    pub fn clear(&mut self) {
        self.times.clear();
        for channel in &mut self.channels {
            channel.clear();
        }
        self.plot.clear();
        self.last_state = None;
        self.last_level = 0;
    }

    /// Append one reading taken `elapsed_s` seconds after start.
    pub fn record(&mut self, reading: &SensorReading, elapsed_s: f64) -> RecordOutcome {
        if !self.sampling {
            return RecordOutcome::Ignored;
        }

        // all arrays grow together so they stay index-aligned
        let values: Vec<f64> = (0..self.channels.len()).map(|i| reading.channel(i)).collect();
        self.times.push(elapsed_s);
        for (channel, value) in self.channels.iter_mut().zip(&values) {
            channel.push(*value);
        }
        self.plot.push(PlotPoint { time: elapsed_s, values });

        self.last_state = Some(reading.state);
        self.last_level = reading.level;

        if reading.state.is_done() {
            self.sampling = false;
            RecordOutcome::AutoStop
        } else {
            RecordOutcome::Accepted
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_type(&self) -> &str {
        &self.sample_type
    }

    pub fn sensor_names(&self) -> &[String] {
        &self.sensor_names
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn channel(&self, index: usize) -> &[f64] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn plot(&self) -> &PlotBuffer {
        &self.plot
    }

    pub fn last_state(&self) -> Option<FsmState> {
        self.last_state
    }

    pub fn elapsed(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn statistics(&self) -> Vec<StatsRow> {
        stats::stats_table(&self.sensor_names, &self.channels)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            sample_name: if self.name.is_empty() { "None".into() } else { self.name.clone() },
            sample_type: if self.sample_type.is_empty() {
                "None".into()
            } else {
                self.sample_type.clone()
            },
            mode: "Auto (FSM)",
            points: self.len(),
            elapsed_s: self.elapsed(),
            state: self.last_state.map(|s| s.label().to_string()).unwrap_or_else(|| "-".into()),
            level: self.last_level,
            sampling: self.sampling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NUM_CHANNELS;

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Sensor {}", i)).collect()
    }

    fn reading(value: f64, state: i64) -> SensorReading {
        SensorReading {
            channels: [value; NUM_CHANNELS],
            state: FsmState::from_code(state),
            level: 1,
            timestamp_ms: None,
            state_name: None,
        }
    }

    fn assert_aligned(session: &SampleSession) {
        for i in 0..session.sensor_names().len() {
            assert_eq!(session.channel(i).len(), session.times().len());
        }
    }

    #[test]
    fn ignores_readings_before_start() {
        let mut session = SampleSession::new(names(7), 100);
        assert_eq!(session.record(&reading(1.0, 2), 0.25), RecordOutcome::Ignored);
        assert!(session.is_empty());
    }

    #[test]
    fn arrays_stay_aligned() {
        let mut session = SampleSession::new(names(4), 100);
        session.start("apel", "Bunga Melati").unwrap();
        for i in 0..25 {
            let outcome = session.record(&reading(i as f64, 3), i as f64 * 0.25);
            assert_eq!(outcome, RecordOutcome::Accepted);
            assert_aligned(&session);
        }
        assert_eq!(session.len(), 25);
        assert_eq!(session.channels().len(), 4);
        assert_eq!(session.channel(2)[10], 10.0);
    }

    #[test]
    fn done_state_auto_stops_after_appending() {
        let mut session = SampleSession::new(names(7), 100);
        session.start("mawar", "Bunga Mawar").unwrap();
        session.record(&reading(1.0, 4), 0.25);
        assert_eq!(session.record(&reading(2.0, 6), 0.5), RecordOutcome::AutoStop);
        assert!(!session.is_sampling());
        assert_eq!(session.len(), 2);
        assert_eq!(session.record(&reading(3.0, 0), 0.75), RecordOutcome::Ignored);
        assert_eq!(session.info().state, "DONE");
    }

    #[test]
    fn start_keeps_stale_data_until_cleared() {
        let mut session = SampleSession::new(names(7), 100);
        session.start("first", "Bunga Kenanga").unwrap();
        session.record(&reading(1.0, 3), 0.25);
        session.stop();

        session.start("second", "Bunga Kenanga").unwrap();
        assert_eq!(session.len(), 1);
        assert_eq!(session.name(), "second");

        session.clear();
        assert!(session.is_empty());
        assert!(session.plot().is_empty());
        assert!(session.channels().iter().all(|c| c.is_empty()));
        assert_eq!(session.last_state(), None);
        assert_aligned(&session);
    }

    #[test]
    fn start_rejects_blank_name() {
        let mut session = SampleSession::new(names(7), 100);
        assert!(session.start("   ", "Bunga Mawar").is_err());
        assert!(!session.is_sampling());
    }

    #[test]
    fn plot_buffer_evicts_oldest() {
        let mut session = SampleSession::new(names(2), 3);
        session.start("x", "Bunga Mawar").unwrap();
        for i in 0..5 {
            session.record(&reading(i as f64, 3), i as f64);
        }
        assert_eq!(session.len(), 5);
        assert_eq!(session.plot().len(), 3);
        let tail = session.plot().tail(2);
        assert_eq!(tail[0].time, 3.0);
        assert_eq!(tail[1].values, vec![4.0, 4.0]);
    }

    #[test]
    fn info_defaults_before_start() {
        let session = SampleSession::new(names(7), 10);
        let info = session.info();
        assert_eq!(info.sample_name, "None");
        assert_eq!(info.points, 0);
        assert_eq!(info.mode, "Auto (FSM)");
    }
}
