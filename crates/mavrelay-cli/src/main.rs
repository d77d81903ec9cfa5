use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use mavrelay_ingest::demo::DemoUpstream;
use mavrelay_ingest::udp::UdpUpstream;
use mavrelay_ingest::{IngestConfig, IngestManager, Upstream};
use mavrelay_proto::{ConfigReport, PortStatus};
use mavrelay_server::{spawn_hub, AppState, Listeners, MapsParams, ServerConfig};
use mavrelay_view::render::DEFAULT_FRAME_INTERVAL;
use mavrelay_view::settings::COMMIT_DELAY;
use mavrelay_view::{
    CameraHandle, ConfigClient, FramePose, HttpConfigClient, InputEvent, Key, NavHandle, PortEditor,
    RelayLink, RenderLoop, RenderTarget, SettingsState,
};

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "mavrelay", version, about = "MAVLink telemetry relay with a live 3D viewer")]
struct Cli {
    /// TOML config. Every section is optional.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    env: Overrides,

    #[command(subcommand)]
    cmd: Command,
}

/// Environment wins over the config file.
#[derive(Debug, Args)]
struct Overrides {
    #[arg(long, global = true, env = "MAVLINK_PORT")]
    mavlink_port: Option<u16>,
    /// `demo` synthesizes telemetry instead of listening for MAVLink.
    #[arg(long, global = true, env = "APPMODE")]
    app_mode: Option<String>,
    #[arg(long, global = true, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,
    #[arg(long, global = true, env = "GOOGLE_MAP_ID")]
    google_map_id: Option<String>,
    #[arg(long, global = true, env = "MAVRELAY_HTTP_PORT")]
    http_port: Option<u16>,
    #[arg(long, global = true, env = "MAVRELAY_WS_PORT")]
    ws_port: Option<u16>,
    #[arg(long, global = true, env = "MAVRELAY_BIND")]
    bind: Option<IpAddr>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Run the relay: MAVLink ingest, config API and viewer endpoint.
    Serve,
    /// Headless viewer: follows the relay and logs camera/marker poses.
    View {
        /// Read camera input from stdin (`down shift`, `move X Y`, `wheel DY`, `up shift`).
        #[arg(long)]
        input: bool,
    },
    /// Read or change the relay's MAVLink port over the HTTP API.
    Config { #[command(subcommand)] cmd: ConfigCmd },
}

#[derive(Debug, Subcommand)]
enum ConfigCmd {
    Get,
    Set { port: String },
    /// Debounced editing: one port per stdin line, like typing into the field.
    Edit,
    /// Maps key and map id published by the relay.
    Maps,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    ingest: IngestConfig,
    server: ServerConfig,
    maps: MapsCfg,
    view: ViewCfg,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MapsCfg {
    api_key: String,
    map_id: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ViewCfg {
    relay_url: String,
    api_url: String,
    frame_interval_ms: Option<u64>,
    commit_delay_ms: Option<u64>,
    /// Log every Nth rendered frame.
    log_every: u64,
}

impl Default for ViewCfg {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8081/".to_string(),
            api_url: "http://127.0.0.1:8080".to_string(),
            frame_interval_ms: None,
            commit_delay_ms: None,
            log_every: 60,
        }
    }
}

impl ViewCfg {
    fn frame_interval(&self) -> Duration {
        self.frame_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_FRAME_INTERVAL)
    }

    fn commit_delay(&self) -> Duration {
        self.commit_delay_ms.map(Duration::from_millis).unwrap_or(COMMIT_DELAY)
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

impl Overrides {
    fn apply(self, cfg: &mut Config) {
        if let Some(p) = self.mavlink_port {
            cfg.ingest.mavlink_port = p;
        }
        if let Some(mode) = self.app_mode {
            cfg.ingest.demo = mode.eq_ignore_ascii_case("demo");
        }
        if let Some(k) = self.google_api_key {
            cfg.maps.api_key = k;
        }
        if let Some(id) = self.google_map_id {
            cfg.maps.map_id = id;
        }
        if let Some(p) = self.http_port {
            cfg.server.http_port = p;
        }
        if let Some(p) = self.ws_port {
            cfg.server.ws_port = p;
        }
        if self.bind.is_some() {
            cfg.server.bind = self.bind;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;
    cli.env.apply(&mut cfg);

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Serve => serve(&cfg).await?,
        Command::View { input } => view(&cfg, input).await?,
        Command::Config { cmd } => config_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(cfg.ingest.mavlink_port != 0, "ingest.mavlink_port must be 1..=65535");
    anyhow::ensure!(cfg.ingest.demo_tick_ms != Some(0), "ingest.demo_tick_ms must be > 0");
    anyhow::ensure!(cfg.ingest.queue_depth != Some(0), "ingest.queue_depth must be > 0");
    anyhow::ensure!(
        cfg.server.http_port == 0 || cfg.server.http_port != cfg.server.ws_port,
        "server.http_port and server.ws_port are both {}",
        cfg.server.http_port
    );
    anyhow::ensure!(
        cfg.view.relay_url.starts_with("ws://") || cfg.view.relay_url.starts_with("wss://"),
        "view.relay_url must be a ws:// or wss:// url"
    );
    anyhow::ensure!(
        cfg.view.api_url.starts_with("http://") || cfg.view.api_url.starts_with("https://"),
        "view.api_url must be an http:// or https:// url"
    );
    anyhow::ensure!(cfg.view.log_every > 0, "view.log_every must be > 0");

    if cfg.maps.api_key.is_empty() {
        warn!("doctor: no maps api key (GOOGLE_API_KEY); viewers get no base map");
    }
    if cfg.ingest.demo {
        info!("doctor: demo mode, udp port {} will not be bound", cfg.ingest.mavlink_port);
    }

    info!("doctor: OK");
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    info!("serve: starting");

    let (tx_env, rx_env) = mpsc::channel(cfg.ingest.queue_depth());
    let (hub, hub_task) = spawn_hub(rx_env);

    let upstream: Arc<dyn Upstream> = if cfg.ingest.demo {
        let tick = cfg.ingest.demo_tick_ms.map(Duration::from_millis);
        Arc::new(tick.map(DemoUpstream::new).unwrap_or_default())
    } else {
        Arc::new(UdpUpstream::new(cfg.ingest.bind_addr()))
    };
    let ingest = IngestManager::new(upstream, tx_env, cfg.ingest.mavlink_port);

    let listeners = Listeners::bind(&cfg.server).await.context("bind http/ws listeners")?;

    // a dead initial port is reported through /api/config, not fatal
    if let Err(e) = ingest.configure(cfg.ingest.mavlink_port).await {
        warn!("serve: mavlink port {} unavailable: {}", cfg.ingest.mavlink_port, e);
    }

    let state = AppState {
        ingest: ingest.clone(),
        hub,
        maps: MapsParams::new(cfg.maps.api_key.clone(), cfg.maps.map_id.clone()),
        demo: cfg.ingest.demo,
    };
    let (stop_tx, stop_rx) = watch::channel(());
    let mut server = tokio::spawn(listeners.serve(state, stop_rx));

    tokio::select! {
        res = &mut server => {
            res.context("server task")?.context("server")?;
            anyhow::bail!("server stopped unexpectedly");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("wait for ctrl-c")?;
            info!("serve: shutting down");
        }
    }

    ingest.shutdown();
    let _ = stop_tx.send(());
    server.await.context("server task")?.context("server")?;

    // the hub ends once the last envelope sender is gone
    drop(ingest);
    match tokio::time::timeout(Duration::from_secs(2), hub_task).await {
        Ok(Ok(stats)) => info!("serve: hub done, {:?}", stats),
        Ok(Err(e)) => warn!("serve: hub task failed: {}", e),
        Err(_) => warn!("serve: hub did not stop in time"),
    }
    Ok(())
}

/// Logs every `every`th pose.
struct LogTarget {
    every: u64,
    seen: u64,
}

impl RenderTarget for LogTarget {
    fn is_ready(&self) -> bool {
        true
    }

    fn render(&mut self, pose: &FramePose) {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return;
        }
        let at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        info!(
            "{} pos={:.7},{:.7} alt={:.1}m yaw={:.3}rad cam hdg={:.1} tilt={:.1} zoom={:.1}",
            at,
            pose.anchor.lat,
            pose.anchor.lng,
            pose.marker_offset,
            pose.marker_yaw,
            pose.camera.heading,
            pose.camera.tilt,
            pose.camera.zoom,
        );
    }
}

async fn view(cfg: &Config, input: bool) -> Result<()> {
    let nav = NavHandle::new();
    let camera = CameraHandle::new();
    let mut link = RelayLink::connect(cfg.view.relay_url.clone(), nav.clone())
        .await
        .context("connect to relay")?;

    let target = LogTarget { every: cfg.view.log_every.max(1), seen: 0 };
    let mut frames = RenderLoop::start(nav.clone(), camera.clone(), target, cfg.view.frame_interval());

    if input {
        tokio::spawn(feed_camera(camera));
    }

    let url = link.url().to_string();
    tokio::select! {
        _ = link.closed() => warn!("view: relay at {} went away", url),
        res = tokio::signal::ctrl_c() => res.context("wait for ctrl-c")?,
    }

    frames.stop();
    let (applied, ignored) = nav.counts();
    info!("view: {} frames, {} messages applied, {} ignored", frames.frames(), applied, ignored);
    Ok(())
}

async fn feed_camera(camera: CameraHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_input(&line) {
            Some(ev) => {
                camera.handle(ev);
            }
            None if line.trim().is_empty() => {}
            None => warn!("view: unrecognized input {:?}", line),
        }
    }
}

fn parse_key(s: &str) -> Option<Key> {
    match s.to_ascii_lowercase().as_str() {
        "shift" => Some(Key::Shift),
        "ctrl" | "control" => Some(Key::Control),
        "alt" => Some(Key::Alt),
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Key::Char(c)),
                _ => None,
            }
        }
    }
}

fn parse_input(line: &str) -> Option<InputEvent> {
    let mut words = line.split_whitespace();
    let ev = match words.next()? {
        "down" => InputEvent::KeyDown(parse_key(words.next()?)?),
        "up" => InputEvent::KeyUp(parse_key(words.next()?)?),
        "move" => InputEvent::PointerMove { x: words.next()?.parse().ok()?, y: words.next()?.parse().ok()? },
        "wheel" => InputEvent::Wheel { delta_y: words.next()?.parse().ok()? },
        _ => return None,
    };
    words.next().is_none().then_some(ev)
}

async fn config_cmd(cfg: &Config, cmd: ConfigCmd) -> Result<()> {
    let client = HttpConfigClient::new(cfg.view.api_url.clone());
    match cmd {
        ConfigCmd::Get => {
            let report = client.get_config().await.context("GET /api/config")?;
            print_report(&report);
            Ok(())
        }
        ConfigCmd::Maps => {
            let maps = client.maps_params().await.context("GET /api/maps-params")?;
            println!("api_key={}", if maps.api_key.is_empty() { "(none)" } else { "(set)" });
            println!("map_id={}", maps.map_id);
            Ok(())
        }
        ConfigCmd::Set { port } => {
            let port = mavrelay_view::validate_port_input(&port)?;
            let editor = PortEditor::new(Arc::new(client), port, cfg.view.commit_delay());
            let mut updates = editor.subscribe();
            editor.commit_now(port);
            let state = updates
                .wait_for(|s| s.status != PortStatus::Unset || s.error.is_some())
                .await
                .context("port editor gone")?
                .clone();
            print_state(&state);
            anyhow::ensure!(state.status == PortStatus::Ok, "port {} not applied", state.port);
            Ok(())
        }
        ConfigCmd::Edit => edit_port(client, cfg.view.commit_delay()).await,
    }
}

async fn edit_port(client: HttpConfigClient, delay: Duration) -> Result<()> {
    let editor = PortEditor::new(Arc::new(client), 0, delay);
    if let Err(e) = editor.load().await {
        warn!("config: {}", e);
    }
    print_state(&editor.state());

    let mut updates = editor.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print_state(&state);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        // the error is already in the editor state
        let _ = editor.edit(&line);
    }

    // let the last debounce fire and its answer land
    tokio::time::sleep(delay + Duration::from_secs(2)).await;
    printer.abort();
    Ok(())
}

fn print_report(report: &ConfigReport) {
    println!("port={}", report.mavlink_port);
    println!("status={}", report.mavlink_status.as_str());
    if let Some(e) = &report.mavlink_error {
        println!("error={}", e);
    }
}

fn print_state(state: &SettingsState) {
    let at = state
        .updated_at
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "port={} status={} error={} updated_at={}",
        state.port,
        state.status.as_str(),
        state.error.as_deref().unwrap_or("-"),
        at
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camera_input() {
        assert_eq!(parse_input("down shift"), Some(InputEvent::KeyDown(Key::Shift)));
        assert_eq!(parse_input("up Shift"), Some(InputEvent::KeyUp(Key::Shift)));
        assert_eq!(parse_input("down a"), Some(InputEvent::KeyDown(Key::Char('a'))));
        assert_eq!(parse_input("move 10 -2.5"), Some(InputEvent::PointerMove { x: 10.0, y: -2.5 }));
        assert_eq!(parse_input("wheel 120"), Some(InputEvent::Wheel { delta_y: 120.0 }));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_input(""), None);
        assert_eq!(parse_input("move 10"), None);
        assert_eq!(parse_input("wheel up"), None);
        assert_eq!(parse_input("down shiftkey"), None);
        assert_eq!(parse_input("wheel 1 2"), None);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.ingest.mavlink_port, 14550);
        assert!(!cfg.ingest.demo);
        assert_eq!(cfg.server.http_port, 8080);
        assert_eq!(cfg.server.ws_port, 8081);
        assert_eq!(cfg.view.frame_interval(), DEFAULT_FRAME_INTERVAL);
        assert_eq!(cfg.view.commit_delay(), COMMIT_DELAY);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn partial_sections_and_overrides() {
        let mut cfg: Config = toml::from_str(
            "[ingest]\nmavlink_port = 14551\n[server]\nws_port = 9001\n[maps]\napi_key = \"k\"\n",
        )
        .unwrap();
        assert_eq!(cfg.ingest.mavlink_port, 14551);
        assert_eq!(cfg.server.http_port, 8080);
        assert_eq!(cfg.server.ws_port, 9001);

        Overrides {
            mavlink_port: Some(14600),
            app_mode: Some("demo".into()),
            google_api_key: None,
            google_map_id: Some("map".into()),
            http_port: None,
            ws_port: None,
            bind: None,
        }
        .apply(&mut cfg);
        assert_eq!(cfg.ingest.mavlink_port, 14600);
        assert!(cfg.ingest.demo);
        assert_eq!(cfg.maps.api_key, "k");
        assert_eq!(cfg.maps.map_id, "map");
    }

    #[test]
    fn doctor_rejects_clashing_ports() {
        let mut cfg = Config::default();
        cfg.server.ws_port = cfg.server.http_port;
        assert!(doctor(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.ingest.mavlink_port = 0;
        assert!(doctor(&cfg).is_err());
    }
}
