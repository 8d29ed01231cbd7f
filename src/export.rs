//! ==============================================================================
//! export.rs - recording files (csv) and ingestion documents (json)
//! ==============================================================================
//!
//! csv layout written on save and read back by the library/upload flow:
//!
//! ```text
//!     Electronic Nose Data Export
//!     Sample Name,<name>
//!     Sample Type,<type>
//!     Export Date,<iso-8601>
//!     Mode,Auto FSM
//!     Number of Points,<n>
//!
//!     Time (s),<sensor 1>,<sensor 2>,...
//!     0.250,1.23,4.56,...
//! ```
//!
//! the json document follows the ingestion service's data acquisition format:
//! an unsigned header (`alg: none`), a placeholder signature and a row-major
//! value matrix.
//!
//! ==============================================================================

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ExportConfig;
use crate::error::{BridgeError, Result};
use crate::session::SampleSession;

pub const CSV_TITLE: &str = "Electronic Nose Data Export";
pub const TIME_HEADER: &str = "Time (s)";
pub const EXPORT_MODE: &str = "Auto FSM";

/// rows searched for the metadata block before giving up
const HEADER_SCAN_ROWS: usize = 15;
/// time deltas averaged for the interval estimate
const INTERVAL_SAMPLES: usize = 5;
const DEFAULT_INTERVAL_MS: f64 = 100.0;

/// A recording as read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub sample_name: String,
    pub sensor_names: Vec<String>,
    pub times: Vec<f64>,
    /// one vec per sensor, aligned with `times`
    pub channels: Vec<Vec<f64>>,
}

impl Recording {
    pub fn from_session(session: &SampleSession) -> Self {
        Self {
            sample_name: session.name().to_string(),
            sensor_names: session.sensor_names().to_vec(),
            times: session.times().to_vec(),
            channels: session.channels().to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Sampling interval in milliseconds, averaged over the first few samples.
    pub fn interval_ms(&self) -> f64 {
        if self.times.len() < 2 {
            return DEFAULT_INTERVAL_MS;
        }
        let diffs: Vec<f64> = self
            .times
            .windows(2)
            .take(INTERVAL_SAMPLES)
            .map(|w| w[1] - w[0])
            .collect();
        diffs.iter().sum::<f64>() / diffs.len() as f64 * 1000.0
    }

    /// transpose the column arrays into one row per sample
    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.len())
            .map(|i| {
                (0..self.sensor_names.len())
                    .map(|s| self.channels.get(s).and_then(|c| c.get(i)).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect()
    }
}

// ==============================================================================
// csv
// ==============================================================================

/// `<name>_<YYYYmmdd_HHMMSS>.csv` with spaces replaced by underscores
pub fn session_file_name(sample_name: &str, now: DateTime<Local>) -> String {
    format!(
        "{}_{}.csv",
        sample_name.trim().replace(' ', "_"),
        now.format("%Y%m%d_%H%M%S")
    )
}

pub fn write_csv<W: Write>(
    writer: W,
    session: &SampleSession,
    sample_type: &str,
    exported_at: DateTime<Local>,
) -> Result<()> {
    let mut meta = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    let points = session.len().to_string();

    meta.write_record([CSV_TITLE])?;
    meta.write_record(["Sample Name", session.name()])?;
    meta.write_record(["Sample Type", sample_type])?;
    meta.write_record(["Export Date", exported_at.to_rfc3339().as_str()])?;
    meta.write_record(["Mode", EXPORT_MODE])?;
    meta.write_record(["Number of Points", points.as_str()])?;

    // the csv writer would quote an empty record, so the separator goes in raw
    let mut writer = meta
        .into_inner()
        .map_err(|e| std::io::Error::new(e.error().kind(), e.error().to_string()))?;
    writer.write_all(b"\n")?;
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec![TIME_HEADER.to_string()];
    header.extend(session.sensor_names().iter().cloned());
    csv.write_record(&header)?;

    for (i, t) in session.times().iter().enumerate() {
        let mut row = Vec::with_capacity(header.len());
        row.push(format!("{:.3}", t));
        for s in 0..session.sensor_names().len() {
            match session.channel(s).get(i) {
                Some(v) => row.push(format!("{:.2}", v)),
                None => row.push("0".to_string()),
            }
        }
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the session to `path`, creating the parent directory.
pub fn save_csv(path: &Path, session: &SampleSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_csv(file, session, session.sample_type(), Local::now())?;
    info!(path = %path.display(), points = session.len(), "saved recording csv");
    Ok(())
}

pub fn read_csv<R: Read>(reader: R) -> Result<Recording> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let records = csv.records().collect::<std::result::Result<Vec<_>, _>>()?;

    let mut sample_name = None;
    let mut header_row = None;
    for (i, record) in records.iter().take(HEADER_SCAN_ROWS).enumerate() {
        match record.get(0) {
            Some("Sample Name") => sample_name = record.get(1).map(str::to_string),
            Some(first) if first.starts_with("Time") => {
                header_row = Some(i);
                break;
            }
            _ => {}
        }
    }

    let header_row = header_row
        .ok_or_else(|| BridgeError::Export("unrecognised csv layout: no time header".into()))?;
    let sensor_names: Vec<String> = records[header_row].iter().skip(1).map(str::to_string).collect();

    let mut times = Vec::new();
    let mut channels = vec![Vec::new(); sensor_names.len()];
    for record in &records[header_row + 1..] {
        if record.len() < 2 {
            continue;
        }
        // a row is taken whole or not at all so the columns stay aligned
        let parsed: Option<Vec<f64>> = (0..=sensor_names.len())
            .map(|i| record.get(i).and_then(|f| f.trim().parse::<f64>().ok()))
            .collect();
        let Some(values) = parsed else { continue };

        times.push(values[0]);
        for (channel, value) in channels.iter_mut().zip(&values[1..]) {
            channel.push(*value);
        }
    }

    if times.is_empty() {
        return Err(BridgeError::Export("csv contains no samples".into()));
    }

    Ok(Recording {
        sample_name: sample_name.unwrap_or_else(|| "Unknown".to_string()),
        sensor_names,
        times,
        channels,
    })
}

pub fn load_csv(path: &Path) -> Result<Recording> {
    read_csv(File::open(path)?)
}

// ==============================================================================
// ingestion json
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionDocument {
    pub protected: ProtectedHeader,
    pub signature: String,
    pub payload: IngestionPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub ver: String,
    pub alg: String,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionPayload {
    pub device_name: String,
    pub device_type: String,
    pub interval_ms: f64,
    pub sensors: Vec<SensorSpec>,
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub name: String,
    pub units: String,
}

impl IngestionDocument {
    pub fn from_recording(recording: &Recording, export: &ExportConfig, issued_at: DateTime<Local>) -> Self {
        Self {
            protected: ProtectedHeader {
                ver: "v1".to_string(),
                // unsigned; the service accepts it without an hmac key
                alg: "none".to_string(),
                iat: issued_at.timestamp(),
            },
            signature: "0".to_string(),
            payload: IngestionPayload {
                device_name: export.device_name.clone(),
                device_type: export.device_type.clone(),
                interval_ms: recording.interval_ms(),
                sensors: recording
                    .sensor_names
                    .iter()
                    .map(|name| SensorSpec {
                        name: name.clone(),
                        units: export.units.clone(),
                    })
                    .collect(),
                values: recording.rows(),
            },
        }
    }
}

/// `foo.csv` -> `foo.json`
pub fn json_path_for(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("json")
}

pub fn save_json(path: &Path, document: &IngestionDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, document)?;
    info!(path = %path.display(), rows = document.payload.values.len(), "saved ingestion json");
    Ok(())
}

/// Read a recording csv and write its ingestion json alongside it.
pub fn convert_csv_to_json(csv_path: &Path, export: &ExportConfig) -> Result<PathBuf> {
    let recording = load_csv(csv_path)?;
    let document = IngestionDocument::from_recording(&recording, export, Local::now());
    let json_path = json_path_for(csv_path);
    save_json(&json_path, &document)?;
    Ok(json_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FsmState, SensorReading, NUM_CHANNELS};
    use chrono::TimeZone;

    fn session_with(points: usize, interval: f64) -> SampleSession {
        let names = vec!["GM-NO2".to_string(), "GM-CO".to_string()];
        let mut session = SampleSession::new(names, 1000);
        session.start("kenanga pagi", "Bunga Kenanga").unwrap();
        for i in 0..points {
            let mut channels = [0.0; NUM_CHANNELS];
            channels[0] = i as f64 * 1.5;
            channels[1] = 100.0 - i as f64;
            let reading = SensorReading {
                channels,
                state: FsmState::Hold,
                level: 1,
                timestamp_ms: None,
                state_name: None,
            };
            session.record(&reading, (i + 1) as f64 * interval);
        }
        session
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 9, 30, 5).unwrap()
    }

    #[test]
    fn file_name_replaces_spaces() {
        assert_eq!(
            session_file_name("kenanga pagi", fixed_time()),
            "kenanga_pagi_20240517_093005.csv"
        );
    }

    #[test]
    fn writes_metadata_then_table() {
        let session = session_with(2, 0.25);
        let mut out = Vec::new();
        write_csv(&mut out, &session, "Bunga Kenanga", fixed_time()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], CSV_TITLE);
        assert_eq!(lines[1], "Sample Name,kenanga pagi");
        assert_eq!(lines[2], "Sample Type,Bunga Kenanga");
        assert!(lines[3].starts_with("Export Date,2024-05-17T09:30:05"));
        assert_eq!(lines[4], "Mode,Auto FSM");
        assert_eq!(lines[5], "Number of Points,2");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "Time (s),GM-NO2,GM-CO");
        assert_eq!(lines[8], "0.250,0.00,100.00");
        assert_eq!(lines[9], "0.500,1.50,99.00");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn csv_round_trip_keeps_shape_and_interval() {
        let session = session_with(40, 0.25);
        let mut out = Vec::new();
        write_csv(&mut out, &session, "Bunga Kenanga", fixed_time()).unwrap();

        let recording = read_csv(out.as_slice()).unwrap();
        assert_eq!(recording.sample_name, "kenanga pagi");
        assert_eq!(recording.sensor_names, vec!["GM-NO2", "GM-CO"]);
        assert_eq!(recording.len(), 40);
        assert_eq!(recording.channels[1].len(), 40);
        assert!((recording.interval_ms() - 250.0).abs() < 1.0);
    }

    #[test]
    fn skips_unparsable_rows() {
        let text = "Electronic Nose Data Export\nSample Name,x\n\nTime (s),a,b\n0.1,1,2\noops,1,2\n0.2,3\n0.3,5,6\n";
        let recording = read_csv(text.as_bytes()).unwrap();
        assert_eq!(recording.times, vec![0.1, 0.3]);
        assert_eq!(recording.channels[1], vec![2.0, 6.0]);
    }

    #[test]
    fn rejects_foreign_csv() {
        let err = read_csv("a,b,c\n1,2,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, BridgeError::Export(_)));
        let err = read_csv("Time (s),a\n".as_bytes()).unwrap_err();
        assert!(matches!(err, BridgeError::Export(_)));
    }

    #[test]
    fn interval_defaults_for_single_sample() {
        let recording = Recording {
            sample_name: "x".into(),
            sensor_names: vec!["a".into()],
            times: vec![0.5],
            channels: vec![vec![1.0]],
        };
        assert_eq!(recording.interval_ms(), 100.0);
    }

    #[test]
    fn ingestion_document_shape() {
        let recording = Recording {
            sample_name: "x".into(),
            sensor_names: vec!["a".into(), "b".into()],
            times: vec![0.0, 0.1, 0.2],
            channels: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        };
        let doc = IngestionDocument::from_recording(&recording, &ExportConfig::default(), fixed_time());
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["protected"]["ver"], "v1");
        assert_eq!(value["protected"]["alg"], "none");
        assert_eq!(value["protected"]["iat"], fixed_time().timestamp());
        assert_eq!(value["signature"], "0");
        assert_eq!(value["payload"]["device_name"], "ENose-UnoR4");
        assert_eq!(value["payload"]["device_type"], "ELECTRONIC_NOSE");
        assert_eq!(value["payload"]["sensors"][1]["name"], "b");
        assert_eq!(value["payload"]["sensors"][1]["units"], "V");
        assert_eq!(value["payload"]["values"][2], serde_json::json!([3.0, 6.0]));
        assert!((doc.payload.interval_ms - 100.0).abs() < 1e-6);
    }
}
