use clap::Parser;
use orcadash_core::{Endpoint, ReplayMode, ReplayOptions, TcpOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub controller: ControllerConf,
    pub replay: ReplayConf,
    pub ui: UiConf,
    pub log_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConf {
    pub host: String,
    pub port: u32,
    pub auto_reconnect: bool,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub send_poll_ms: u64,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReplayConf {
    pub path: Option<PathBuf>, // set → replay instead of live
    pub auto_play: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UiConf {
    pub tick_hz: u32,
    pub log_lines: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConf::default(),
            replay: ReplayConf::default(),
            ui: UiConf::default(),
            log_file: "orcadash.log".into(),
        }
    }
}

impl Default for ControllerConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8989,
            auto_reconnect: true,
            connect_timeout_ms: 5000,
            retry_interval_ms: 1000,
            send_poll_ms: 100,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for ReplayConf {
    fn default() -> Self {
        Self {
            path: None,
            auto_play: false,
            interval_ms: 100,
        }
    }
}

impl Default for UiConf {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            log_lines: 100,
        }
    }
}

/// Command-line flags; every one of them overrides the config file.
#[derive(Parser, Debug)]
#[command(name = "orcadash")]
#[command(about = "Operator console for the simulation controller", long_about = None)]
pub struct Cli {
    /// Controller host
    #[arg(long)]
    pub host: Option<String>,

    /// Controller port
    #[arg(short, long)]
    pub port: Option<u32>,

    /// Replay a recorded session instead of connecting
    #[arg(short, long)]
    pub replay: Option<PathBuf>,

    /// Play the replay file automatically instead of stepping with 's'
    #[arg(long)]
    pub auto_play: bool,

    /// Give up after the first failed connection
    #[arg(long)]
    pub no_reconnect: bool,

    /// Config file (default: $ORCADASH_CONFIG or orcadash.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where tracing output goes; the terminal belongs to the UI
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ConsoleConfig {
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.controller.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.controller.port = port;
        }
        if let Some(path) = &cli.replay {
            self.replay.path = Some(path.clone());
        }
        if cli.auto_play {
            self.replay.auto_play = true;
        }
        if cli.no_reconnect {
            self.controller.auto_reconnect = false;
        }
        if let Some(log_file) = &cli.log_file {
            self.log_file = log_file.clone();
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match &self.replay.path {
            Some(path) => Endpoint::Replay { path: path.clone() },
            None => Endpoint::Tcp {
                host: self.controller.host.clone(),
                port: self.controller.port,
                auto_reconnect: self.controller.auto_reconnect,
            },
        }
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            connect_timeout: Duration::from_millis(self.controller.connect_timeout_ms),
            retry_interval: Duration::from_millis(self.controller.retry_interval_ms),
            send_poll: Duration::from_millis(self.controller.send_poll_ms),
            max_frame_len: self.controller.max_frame_bytes,
            ..TcpOptions::default()
        }
    }

    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            mode: if self.replay.auto_play {
                ReplayMode::AutoPlay
            } else {
                ReplayMode::Manual
            },
            interval: Duration::from_millis(self.replay.interval_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.ui.tick_hz.max(1)))
    }
}

fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("ORCADASH_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| "orcadash.yaml".into())
}

/// Load the YAML config. A missing, empty or invalid file yields defaults.
/// Runs before tracing is set up, so problems go to stderr.
pub fn load_config(explicit: Option<&Path>) -> ConsoleConfig {
    let path = config_path(explicit);
    if !path.exists() {
        eprintln!("[orcadash] no {}, using default config", path.display());
        return ConsoleConfig::default();
    }
    let txt = std::fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("[orcadash] cannot read {}: {e}", path.display());
        String::new()
    });
    if txt.trim().is_empty() {
        return ConsoleConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        eprintln!("[orcadash] invalid config {}: {e}", path.display());
        ConsoleConfig::default()
    })
}
