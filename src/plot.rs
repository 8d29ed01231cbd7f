//! ==============================================================================
//! plot.rs - external plot tool (gnuplot) invocation
//! ==============================================================================
//!
//! two call shapes, both against user-supplied scripts:
//!
//! ```text
//!     batch png:    gnuplot -c <png_script> <csv> <png>
//!     interactive:  gnuplot -p -c <interactive_script> <csv>
//! ```
//!
//! the batch form is run to completion; the interactive window is spawned and
//! left running.
//!
//! scripts are looked up as given first, then inside the data directory.
//!
//! ==============================================================================

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{info, warn};

use crate::config::PlotConfig;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct PlotTool {
    program: String,
    png_script: PathBuf,
    interactive_script: PathBuf,
    data_dir: PathBuf,
}

impl PlotTool {
    pub fn new(config: &PlotConfig, data_dir: &Path) -> Self {
        Self {
            program: config.program.clone(),
            png_script: config.png_script.clone(),
            interactive_script: config.interactive_script.clone(),
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn resolve_script(&self, script: &Path) -> PathBuf {
        if !script.exists() {
            let in_data = self.data_dir.join(script);
            if in_data.exists() {
                return in_data;
            }
        }
        script.to_path_buf()
    }

    pub fn png_path_for(csv: &Path) -> PathBuf {
        csv.with_extension("png")
    }

    pub fn png_args(&self, csv: &Path, png: &Path) -> Vec<OsString> {
        vec![
            "-c".into(),
            self.resolve_script(&self.png_script).into_os_string(),
            csv.as_os_str().to_owned(),
            png.as_os_str().to_owned(),
        ]
    }

    pub fn interactive_args(&self, csv: &Path) -> Vec<OsString> {
        vec![
            "-p".into(),
            "-c".into(),
            self.resolve_script(&self.interactive_script).into_os_string(),
            csv.as_os_str().to_owned(),
        ]
    }

    /// Render the thumbnail for `csv` and wait for the tool to finish.
    pub fn generate_png(&self, csv: &Path) -> Result<PathBuf> {
        let png = Self::png_path_for(csv);
        let output = Command::new(&self.program)
            .args(self.png_args(csv, &png))
            .output()
            .map_err(|e| BridgeError::Plot(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::Plot(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!(png = %png.display(), "rendered preview");
        Ok(png)
    }

    /// Refresh the thumbnail, then open a persistent interactive window.
    pub fn open_interactive(&self, csv: &Path) -> Result<Child> {
        if let Err(e) = self.generate_png(csv) {
            warn!("preview not refreshed: {}", e);
        }

        let child = Command::new(&self.program)
            .args(self.interactive_args(csv))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| BridgeError::Plot(format!("failed to launch {}: {}", self.program, e)))?;
        info!(csv = %csv.display(), pid = child.id(), "opened interactive plot");
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::SystemTime;

    fn tool(program: &str, data_dir: &Path) -> PlotTool {
        let config = PlotConfig {
            program: program.to_string(),
            ..PlotConfig::default()
        };
        PlotTool::new(&config, data_dir)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("enose-plot-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn builds_argument_lists() {
        let tool = tool("gnuplot", Path::new("no-such-dir"));
        let csv = Path::new("data/mawar_1.csv");
        let png = PlotTool::png_path_for(csv);
        assert_eq!(png, PathBuf::from("data/mawar_1.png"));

        let args: Vec<String> = tool
            .png_args(csv, &png)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-c", "plot_config.plt", "data/mawar_1.csv", "data/mawar_1.png"]);

        let args: Vec<String> = tool
            .interactive_args(csv)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-p", "-c", "plot_interactive.plt", "data/mawar_1.csv"]);
    }

    #[test]
    fn falls_back_to_script_in_data_dir() {
        let dir = scratch_dir("scripts");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("plot_config.plt"), "plot 1").unwrap();

        let tool = tool("gnuplot", &dir);
        assert_eq!(
            tool.resolve_script(Path::new("plot_config.plt")),
            dir.join("plot_config.plt")
        );
        assert_eq!(
            tool.resolve_script(Path::new("plot_interactive.plt")),
            PathBuf::from("plot_interactive.plt")
        );
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_program_is_a_plot_error() {
        let tool = tool("enose-no-such-plotter", Path::new("."));
        let err = tool.generate_png(Path::new("x.csv")).unwrap_err();
        assert!(matches!(err, BridgeError::Plot(_)));
        assert!(tool.open_interactive(Path::new("x.csv")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_success() {
        let ok = tool("true", Path::new("."));
        assert_eq!(ok.generate_png(Path::new("x.csv")).unwrap(), PathBuf::from("x.png"));

        let failing = tool("false", Path::new("."));
        assert!(matches!(
            failing.generate_png(Path::new("x.csv")),
            Err(BridgeError::Plot(_))
        ));
    }
}
