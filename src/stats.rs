//! Descriptive statistics over the per-sensor sample arrays.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChannelStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// population standard deviation
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRow {
    pub sensor: String,
    pub stats: ChannelStats,
}

/// Summarise one channel, `None` when it holds no samples.
pub fn describe(values: &[f64]) -> Option<ChannelStats> {
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let (min, max, sum) = values.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
    );
    let mean = sum / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    Some(ChannelStats {
        count,
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
    })
}

/// One row per sensor; empty channels report zeros.
pub fn stats_table<C: AsRef<[f64]>>(names: &[String], channels: &[C]) -> Vec<StatsRow> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| StatsRow {
            sensor: name.clone(),
            stats: channels
                .get(i)
                .and_then(|c| describe(c.as_ref()))
                .unwrap_or_default(),
        })
        .collect()
}

pub fn render_table(rows: &[StatsRow]) -> String {
    let width = rows
        .iter()
        .map(|r| r.sensor.chars().count())
        .max()
        .unwrap_or(0)
        .max("Sensor".len());

    let mut out = format!(
        "{:<width$} | {:>10} | {:>10} | {:>10} | {:>10}\n",
        "Sensor", "Min", "Max", "Mean", "Std Dev"
    );
    out.push_str(&format!("{}\n", "-".repeat(width + 4 * 13)));
    for row in rows {
        let s = &row.stats;
        out.push_str(&format!(
            "{:<width$} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2}\n",
            row.sensor, s.min, s.max, s.mean, s.std_dev
        ));
    }
    out
}
