//! ==============================================================================
//! recorder.rs - one recording, start to saved files
//! ==============================================================================
//!
//! purpose:
//!     the controller between the user's actions and the bridge. it sends the
//!     control commands, drains the data stream into the sample session, keeps
//!     the dashboard snapshot current and writes the artifacts on stop.
//!
//! flow:
//!     CONNECT_SERIAL <port>   (optional)
//!     start session, spawn stream worker
//!     START_SAMPLING
//!     ... readings until DONE, the duration elapses, or shutdown ...
//!     STOP_SAMPLING, stop worker
//!     save csv (+ ingestion json, + png preview)
//!
//! command failures are logged and otherwise ignored: the bridge never
//! acknowledges, so the local state is updated optimistically either way.
//!
//! ==============================================================================

use chrono::{Local, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{BridgeCommand, BridgeCommander};
use crate::config::BridgeConfig;
use crate::dashboard::{SessionSnapshot, SharedDashboard};
use crate::domain::SensorReading;
use crate::error::{BridgeError, Result};
use crate::export::{self, IngestionDocument, Recording};
use crate::plot::PlotTool;
use crate::session::{RecordOutcome, SampleSession};
use crate::stats::StatsRow;
use crate::stream::{LineSource, StreamClient, StreamEvent, StreamSummary};

#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub sample_name: String,
    pub sample_type: String,
    pub serial_port: Option<String>,
    /// stop after this long even if the bridge never reports DONE
    pub duration: Option<Duration>,
    /// clear data from an earlier run before starting
    pub fresh: bool,
    pub write_json: bool,
    pub preview: bool,
}

/// which controls are usable, given what we believe about the bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub connected: bool,
    pub sampling: bool,
}

impl ControlState {
    pub fn can_connect(&self) -> bool {
        !self.connected
    }

    pub fn can_start(&self) -> bool {
        self.connected && !self.sampling
    }

    pub fn can_stop(&self) -> bool {
        self.connected && self.sampling
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// the bridge reported the DONE state
    AutoStop,
    Duration,
    Shutdown,
    StreamEnded,
}

#[derive(Debug, Clone)]
pub struct RecordReport {
    pub stop_reason: StopReason,
    pub points: usize,
    pub csv_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
    pub stats: Vec<StatsRow>,
    pub stream: StreamSummary,
}

pub struct Recorder {
    config: BridgeConfig,
    commander: BridgeCommander,
    session: SampleSession,
    control: ControlState,
    dashboard: Option<SharedDashboard>,
    last_publish: Option<Instant>,
}

impl Recorder {
    pub fn new(config: BridgeConfig) -> Self {
        let commander = BridgeCommander::from_endpoint(&config.bridge);
        let session = SampleSession::new(
            config.sampling.sensor_names.clone(),
            config.sampling.max_plot_points,
        );
        Self {
            config,
            commander,
            session,
            control: ControlState::default(),
            dashboard: None,
            last_publish: None,
        }
    }

    /// publish session snapshots into `dashboard` while recording
    pub fn with_dashboard(mut self, dashboard: SharedDashboard) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn session(&self) -> &SampleSession {
        &self.session
    }

    pub fn control(&self) -> ControlState {
        self.control
    }

    /// drop everything recorded so far
    pub fn clear(&mut self) {
        self.session.clear();
    }

    pub fn validate(&self, request: &RecordRequest) -> Result<()> {
        if request.sample_name.trim().is_empty() {
            return Err(BridgeError::Config("sample name must not be empty".into()));
        }
        if !self
            .config
            .sampling
            .sample_types
            .iter()
            .any(|t| t == &request.sample_type)
        {
            return Err(BridgeError::Config(format!(
                "unknown sample type {:?}, expected one of {:?}",
                request.sample_type, self.config.sampling.sample_types
            )));
        }
        Ok(())
    }

    /// Run one recording against the data stream from `source`.
    pub async fn run<S, F>(
        &mut self,
        source: S,
        request: &RecordRequest,
        shutdown: F,
    ) -> Result<RecordReport>
    where
        S: LineSource,
        F: Future<Output = ()>,
    {
        self.validate(request)?;

        if let Some(port) = &request.serial_port {
            self.send_command(BridgeCommand::connect_serial(port)?).await;
        }

        if request.fresh {
            self.session.clear();
        }
        self.session.start(&request.sample_name, &request.sample_type)?;
        self.control.sampling = true;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = StreamClient::new(source, self.config.bridge.retry_delay()).spawn(tx);

        self.send_command(BridgeCommand::StartSampling).await;
        info!(
            sample = %request.sample_name,
            sample_type = %request.sample_type,
            "sampling started"
        );

        let started = Instant::now();
        let deadline = request.duration.map(|d| started + d);
        tokio::pin!(shutdown);

        let stop_reason = loop {
            let timer = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                _ = timer => break StopReason::Duration,
                event = rx.recv() => match event {
                    None => break StopReason::StreamEnded,
                    Some(event) => {
                        if self.handle_event(event, started).await {
                            break StopReason::AutoStop;
                        }
                    }
                },
            }
        };

        self.send_command(BridgeCommand::StopSampling).await;
        let summary = stream.shutdown().await;
        self.session.stop();
        self.control = ControlState::default();
        self.publish(None).await;
        info!(reason = ?stop_reason, points = self.session.len(), "sampling stopped");

        let mut report = RecordReport {
            stop_reason,
            points: self.session.len(),
            csv_path: None,
            json_path: None,
            preview_path: None,
            stats: self.session.statistics(),
            stream: summary,
        };

        if self.session.is_empty() {
            warn!("no data recorded, nothing saved");
            return Ok(report);
        }

        let csv_path = self.config.storage.data_dir.join(export::session_file_name(
            self.session.name(),
            Local::now(),
        ));
        export::save_csv(&csv_path, &self.session)?;

        if request.write_json {
            let json_path = export::json_path_for(&csv_path);
            let document = IngestionDocument::from_recording(
                &Recording::from_session(&self.session),
                &self.config.export,
                Local::now(),
            );
            export::save_json(&json_path, &document)?;
            report.json_path = Some(json_path);
        }

        if request.preview {
            let tool = PlotTool::new(&self.config.plot, &self.config.storage.data_dir);
            let csv = csv_path.clone();
            match tokio::task::spawn_blocking(move || tool.generate_png(&csv)).await {
                Ok(Ok(png)) => report.preview_path = Some(png),
                Ok(Err(e)) => warn!("preview not generated: {}", e),
                Err(e) => warn!("preview task failed: {}", e),
            }
        }

        report.csv_path = Some(csv_path);
        Ok(report)
    }

    /// returns true when the session auto-stopped
    async fn handle_event(&mut self, event: StreamEvent, started: Instant) -> bool {
        match event {
            StreamEvent::Connecting { attempt } => {
                debug!(attempt, "connecting to bridge data stream");
                false
            }
            StreamEvent::Connected => {
                self.control.connected = true;
                self.publish(None).await;
                false
            }
            StreamEvent::Disconnected { reason } => {
                if self.control.connected {
                    warn!("bridge data stream lost: {}", reason);
                }
                self.control.connected = false;
                self.publish(None).await;
                false
            }
            StreamEvent::Skipped { reason } => {
                debug!("skipped stream line: {}", reason);
                false
            }
            StreamEvent::Reading(reading) => {
                let elapsed = started.elapsed().as_secs_f64();
                let outcome = self.session.record(&reading, elapsed);
                if self.config.logging.show_sensor_data && outcome != RecordOutcome::Ignored {
                    log_reading(&reading, elapsed);
                }
                // at most one snapshot per update interval
                let interval = Duration::from_millis(self.config.sampling.update_interval_ms);
                let due = self.last_publish.map_or(true, |at| at.elapsed() >= interval);
                if due || outcome == RecordOutcome::AutoStop {
                    self.publish(Some(reading)).await;
                    self.last_publish = Some(Instant::now());
                }

                if outcome == RecordOutcome::AutoStop {
                    info!("bridge reported DONE, stopping");
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn send_command(&self, command: BridgeCommand) {
        if let Err(e) = self.commander.send(&command).await {
            warn!(command = %command, "bridge command failed: {}", e);
        }
    }

    async fn publish(&self, latest: Option<SensorReading>) {
        let Some(dashboard) = &self.dashboard else {
            return;
        };
        let mut state = dashboard.write().await;
        state.connected = self.control.connected;
        state.session = Some(SessionSnapshot::capture(&self.session));
        if latest.is_some() {
            state.latest = latest;
        }
        state.last_update = Utc::now().timestamp_millis().max(0) as u64;
    }
}

fn log_reading(reading: &SensorReading, elapsed: f64) {
    let c = &reading.channels;
    info!(
        t = format!("{:.2}", elapsed),
        state = %reading.state,
        level = reading.level,
        "NO2 {:.2} | ETH {:.2} | VOC {:.2} | CO {:.2} | MiCS CO {:.2} | MiCS ETH {:.2} | MiCS VOC {:.2}",
        c[0], c[1], c[2], c[3], c[4], c[5], c[6]
    );
}
