//! ==============================================================================
//! dashboard.rs - live session view over http
//! ==============================================================================
//!
//! purpose:
//!     while recording, the controller publishes a snapshot of the session
//!     (info rows, statistics, recent plot points) into shared state; this
//!     module serves it.
//!
//! ```text
//!     GET /      server-rendered html page (refreshes itself)
//!     GET /api   the same snapshot as json
//! ```
//!
//! shared state is arc<rwlock<>>: the recorder writes, http handlers read.
//!
//! ==============================================================================

use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::domain::SensorReading;
use crate::error::Result;
use crate::session::{PlotPoint, SampleSession, SessionInfo};
use crate::stats::StatsRow;

/// plot points included in each snapshot
const SNAPSHOT_POINTS: usize = 200;

pub type SharedDashboard = Arc<RwLock<DashboardState>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardState {
    pub connected: bool,
    pub session: Option<SessionSnapshot>,
    pub latest: Option<SensorReading>,
    /// unix timestamp (ms) of the last update
    pub last_update: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub info: SessionInfo,
    pub sensors: Vec<String>,
    pub stats: Vec<StatsRow>,
    pub recent: Vec<PlotPoint>,
}

impl SessionSnapshot {
    pub fn capture(session: &SampleSession) -> Self {
        Self {
            info: session.info(),
            sensors: session.sensor_names().to_vec(),
            stats: session.statistics(),
            recent: session.plot().tail(SNAPSHOT_POINTS),
        }
    }
}

pub fn shared() -> SharedDashboard {
    Arc::new(RwLock::new(DashboardState::default()))
}

pub fn router(state: SharedDashboard) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/api", get(api_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(bind: &str, state: SharedDashboard) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("dashboard live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<SharedDashboard>) -> Json<DashboardState> {
    let state = state.read().await;
    Json(state.clone())
}

async fn page_handler(State(state): State<SharedDashboard>) -> Html<String> {
    let state = state.read().await;
    Html(render_page(&state))
}

fn render_page(state: &DashboardState) -> String {
    let status = if state.connected { "connected" } else { "disconnected" };

    let mut info_rows = String::new();
    let mut stats_rows = String::new();
    if let Some(snapshot) = &state.session {
        let info = &snapshot.info;
        for (key, value) in [
            ("Sample Name", info.sample_name.clone()),
            ("Sample Type", info.sample_type.clone()),
            ("Mode", info.mode.to_string()),
            ("Points", info.points.to_string()),
            ("Time", format!("{:.2} s", info.elapsed_s)),
            ("FSM State", format!("{} (level {})", info.state, info.level)),
        ] {
            info_rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                key,
                html_escape(&value)
            ));
        }
        for row in &snapshot.stats {
            let s = &row.stats;
            stats_rows.push_str(&format!(
                "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                html_escape(&row.sensor),
                s.min,
                s.max,
                s.mean,
                s.std_dev
            ));
        }
    }

    format!(
        r#"<!doctype html>
<html>
<head><title>e-nose bridge</title><meta http-equiv="refresh" content="2"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h1>E-Nose Bridge</h1>
    <p>Data stream: <b>{status}</b></p>
    <h2>Sampling Information</h2>
    <table>{info_rows}</table>
    <h2>Data Statistics</h2>
    <table>
        <tr><th>Sensor</th><th>Min</th><th>Max</th><th>Mean</th><th>Std Dev</th></tr>
        {stats_rows}
    </table>
</body>
</html>"#
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FsmState, NUM_CHANNELS};

    #[test]
    fn page_escapes_sample_names() {
        let mut session = SampleSession::new(vec!["GM-NO2".into()], 10);
        session.start("<script>", "Bunga Mawar").unwrap();
        session.record(
            &SensorReading {
                channels: [1.0; NUM_CHANNELS],
                state: FsmState::RampUp,
                level: 2,
                timestamp_ms: None,
                state_name: None,
            },
            0.25,
        );
        let state = DashboardState {
            connected: true,
            session: Some(SessionSnapshot::capture(&session)),
            latest: None,
            last_update: 0,
        };

        let html = render_page(&state);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("RAMP_UP (level 2)"));
        assert!(html.contains("<b>connected</b>"));
    }

    #[test]
    fn snapshot_serializes_state_labels() {
        let state = DashboardState {
            latest: Some(SensorReading {
                channels: [0.0; NUM_CHANNELS],
                state: FsmState::Done,
                level: 0,
                timestamp_ms: Some(5),
                state_name: None,
            }),
            ..DashboardState::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["latest"]["state"], "DONE");
        assert_eq!(value["connected"], false);
    }

    #[tokio::test]
    async fn occupied_port_is_an_io_error() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let result = serve(&addr, shared()).await;
        assert!(matches!(result, Err(crate::error::BridgeError::Io(_))));
    }
}
