use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use skiff_control::session::SessionConfig;
use skiff_control::{doctor as control_doctor, ControlConfig, LogSink, MapSink, Session};
use skiff_link::autodetect::{autodetect_link, default_candidate_devs, AutodetectResult};
use skiff_link::sim::{SimConfig, SimTransport};
use skiff_link::{open_transport, Link, LinkConfig, LinkKind};
use skiff_nav::{doctor as nav_doctor, BoatPose, FenceConfig, GeoPoint, NavConfig, NavState};
use skiff_proto::command::{AuxCommand, FrameStyle};

#[derive(Debug, Parser)]
#[command(name = "skiff", version, about = "skiff - remote control and return-home for small RC boats")]
struct Cli {
    /// TOML config; built-in defaults when omitted.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without touching the radio.
    Doctor,
    /// Interactive console: drive, toggle autonomous mode, return home.
    Run,
    Link { #[command(subcommand)] cmd: LinkCmd },
    Send { #[command(subcommand)] cmd: SendCmd },
    /// Drive the simulated boat out, then bring it home with the navigator.
    Sim {
        #[arg(long, default_value_t = 15)]
        drive_s: u64,
        #[arg(long, default_value_t = 120)]
        timeout_s: u64,
    },
}

#[derive(Debug, Subcommand)]
enum LinkCmd {
    /// Probe serial devices for a boat that answers PING.
    Autodetect,
    Ping {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Ask the boat for its STATUS line.
    Status,
}

#[derive(Debug, Subcommand)]
enum SendCmd {
    /// Vehicle-side return, handled by the boat firmware.
    Return,
    Calibrate,
    SpeedMax { pct: u8 },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    control: ControlConfig,
    nav: NavConfig,
    fence: FenceConfig,
    sim: SimConfig,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else {
        info!("config: none given, using defaults");
        return Ok(Config::default());
    };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Link { cmd } => link_cmd(&cfg, cmd).await?,
        Command::Send { cmd } => send_cmd(&cfg, cmd).await?,
        Command::Sim { drive_s, timeout_s } => sim(&cfg, drive_s, timeout_s).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    control_doctor::check_control(&cfg.control)?;
    nav_doctor::check_nav(&cfg.nav)?;
    nav_doctor::check_fence(&cfg.fence)?;
    check_link(&cfg.link)?;

    if cfg.control.frame == FrameStyle::Discrete {
        info!("doctor: discrete frames; the return navigator can only steer with continuous frames");
    }

    info!("doctor: OK");
    Ok(())
}

fn check_link(link: &LinkConfig) -> Result<()> {
    match link.kind {
        LinkKind::Sim => info!("doctor: simulated link (OK)"),
        LinkKind::Serial if link.autodetect => info!("doctor: link autodetect enabled (OK)"),
        _ => anyhow::ensure!(
            link.address.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
            "link.address missing"
        ),
    }
    anyhow::ensure!(link.baud > 0, "link.baud invalid");
    if let Some(pin) = &link.pin {
        anyhow::ensure!(
            (4..=16).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit()),
            "link.pin must be 4-16 digits"
        );
    }
    Ok(())
}

fn session_config(cfg: &Config) -> SessionConfig {
    SessionConfig {
        control: cfg.control.clone(),
        nav: cfg.nav.clone(),
        fence: cfg.fence.clone(),
        motion: cfg.sim.motion,
        response_timeout: cfg.link.response_timeout(),
    }
}

fn open_session(cfg: &Config, sink: Arc<dyn MapSink>) -> Session {
    let transport = open_transport(&cfg.link, &cfg.control.alphabet, Some(&cfg.sim));
    Session::new(session_config(cfg), Arc::new(Link::new(transport)), sink)
}

async fn run_autodetect(link: &LinkConfig) -> AutodetectResult {
    let devs = link.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    autodetect_link(devs, link.baud, link.probe_timeout()).await
}

async fn resolve_address(link: &LinkConfig) -> Result<String> {
    match link.kind {
        LinkKind::Sim => Ok(link.address.clone().unwrap_or_else(|| "sim".to_string())),
        LinkKind::Serial if link.autodetect => {
            let res = run_autodetect(link).await;
            res.chosen.context("link autodetect failed: no device answered PING")
        }
        _ => link.address.clone().context("link.address missing (autodetect=false)"),
    }
}

async fn connected_session(cfg: &Config) -> Result<Session> {
    let session = open_session(cfg, Arc::new(LogSink));
    let address = resolve_address(&cfg.link).await?;
    session.connect(&address).await?;
    Ok(session)
}

async fn link_cmd(cfg: &Config, cmd: LinkCmd) -> Result<()> {
    match cmd {
        LinkCmd::Autodetect => {
            anyhow::ensure!(cfg.link.kind == LinkKind::Serial, "autodetect only applies to link.kind = \"serial\"");
            let res = run_autodetect(&cfg.link).await;
            match &res.chosen {
                Some(dev) => println!("CHOSEN: {}", dev),
                None => println!("CHOSEN: none"),
            }
            for p in res.probes {
                println!("probe dev={} pong={} {}ms note={}", p.dev, p.pong_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        LinkCmd::Ping { count } => {
            let session = connected_session(cfg).await?;
            let mut res = Ok(());
            for i in 0..count.max(1) {
                match session.ping().await {
                    Ok(rtt) => println!("PONG seq={} rtt={}ms", i, rtt.as_millis()),
                    Err(e) => {
                        res = Err(e);
                        break;
                    }
                }
            }
            session.disconnect().await;
            res
        }
        LinkCmd::Status => {
            let session = connected_session(cfg).await?;
            let res = session.request_status().await;
            session.disconnect().await;
            println!("STATUS: {}", res?);
            Ok(())
        }
    }
}

async fn send_cmd(cfg: &Config, cmd: SendCmd) -> Result<()> {
    let aux = match cmd {
        SendCmd::Return => AuxCommand::Return,
        SendCmd::Calibrate => AuxCommand::Calibrate,
        SendCmd::SpeedMax { pct } => {
            anyhow::ensure!(pct <= 100, "speed max is a percentage");
            AuxCommand::SpeedMax(pct)
        }
    };
    let session = connected_session(cfg).await?;
    let res = session.send_aux(aux).await;
    session.disconnect().await;
    res?;
    println!("sent {}", aux.encode().trim_end());
    Ok(())
}

/// Operator-facing render surface: status and return path on stdout, the
/// chattier map updates in the log.
struct ConsoleSink;

impl MapSink for ConsoleSink {
    fn update_boat(&self, pose: &BoatPose) {
        LogSink.update_boat(pose);
    }

    fn draw_breadcrumbs(&self, trail: &[GeoPoint]) {
        LogSink.draw_breadcrumbs(trail);
    }

    fn draw_geofence(&self, outlines: &[Vec<GeoPoint>]) {
        LogSink.draw_geofence(outlines);
    }

    fn draw_return_path(&self, path: &[GeoPoint]) {
        match path.first() {
            Some(next) => println!("return: {} waypoint(s) left, next {:.6},{:.6}", path.len(), next.lat, next.lon),
            None => println!("return: path cleared"),
        }
    }

    fn notify(&self, status: &str) {
        println!("* {}", status);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConsoleCmd {
    Steer(f64),
    Throttle(f64),
    Stop,
    Auto(bool),
    Return,
    Cancel,
    Ping,
    Status,
    Info,
    Calibrate,
    Speed(u8),
    BoatReturn,
    Help,
    Quit,
}

const CONSOLE_HELP: &str = "\
s <-1..1>      steering
t <-1..1>      throttle
stop           centre both sticks
auto on|off    breadcrumb tracking
return         retrace breadcrumbs home (again to cancel)
cancel         abort the return
ping           round-trip time
status         ask the boat for STATUS
info           session snapshot
calibrate      send CALIBRATE
speed <0..100> send SPEED,MAX
boat-return    firmware-side RETURN
quit";

fn parse_console(line: &str) -> Option<ConsoleCmd> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?.to_ascii_lowercase();
    let arg = words.next();
    let num = || arg.and_then(|a| a.parse::<f64>().ok()).filter(|v| v.is_finite());
    match cmd.as_str() {
        "s" | "steer" => num().map(ConsoleCmd::Steer),
        "t" | "throttle" => num().map(ConsoleCmd::Throttle),
        "stop" | "x" => Some(ConsoleCmd::Stop),
        "auto" => match arg? {
            "on" => Some(ConsoleCmd::Auto(true)),
            "off" => Some(ConsoleCmd::Auto(false)),
            _ => None,
        },
        "return" | "r" => Some(ConsoleCmd::Return),
        "cancel" => Some(ConsoleCmd::Cancel),
        "ping" => Some(ConsoleCmd::Ping),
        "status" => Some(ConsoleCmd::Status),
        "info" | "i" => Some(ConsoleCmd::Info),
        "calibrate" => Some(ConsoleCmd::Calibrate),
        "speed" => arg?.parse().ok().map(ConsoleCmd::Speed),
        "boat-return" => Some(ConsoleCmd::BoatReturn),
        "help" | "?" => Some(ConsoleCmd::Help),
        "quit" | "q" | "exit" => Some(ConsoleCmd::Quit),
        _ => None,
    }
}

async fn console(session: &Session, cmd: ConsoleCmd) -> Result<()> {
    match cmd {
        ConsoleCmd::Steer(v) => {
            if !session.set_steering(v) {
                println!("ignored: returning home");
            }
        }
        ConsoleCmd::Throttle(v) => {
            if !session.set_throttle(v) {
                println!("ignored: returning home");
            }
        }
        ConsoleCmd::Stop => {
            session.set_steering(0.0);
            session.set_throttle(0.0);
        }
        ConsoleCmd::Auto(on) => session.set_autonomous(on),
        ConsoleCmd::Return => session.toggle_return(),
        ConsoleCmd::Cancel => session.cancel_return(),
        ConsoleCmd::Ping => println!("PONG rtt={}ms", session.ping().await?.as_millis()),
        ConsoleCmd::Status => println!("STATUS: {}", session.request_status().await?),
        ConsoleCmd::Info => println!("{}", session.status()),
        ConsoleCmd::Calibrate => session.send_aux(AuxCommand::Calibrate).await?,
        ConsoleCmd::Speed(pct) => session.send_aux(AuxCommand::SpeedMax(pct.min(100))).await?,
        ConsoleCmd::BoatReturn => session.send_aux(AuxCommand::Return).await?,
        ConsoleCmd::Help => println!("{}", CONSOLE_HELP),
        ConsoleCmd::Quit => {}
    }
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let session = open_session(cfg, Arc::new(ConsoleSink));
    let address = resolve_address(&cfg.link).await?;
    session.connect(&address).await?;
    println!("connected to {}; type 'help' for commands", address);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                match parse_console(&line) {
                    Some(ConsoleCmd::Quit) => break,
                    Some(cmd) => {
                        if let Err(e) = console(&session, cmd).await {
                            warn!("run: {:#}", e);
                            println!("error: {:#}", e);
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command: {}", line.trim()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupted");
                break;
            }
        }
    }

    session.disconnect().await;
    info!("run: stopped");
    Ok(())
}

async fn sim(cfg: &Config, drive_s: u64, timeout_s: u64) -> Result<()> {
    let mut control = cfg.control.clone();
    if control.frame == FrameStyle::Discrete {
        info!("sim: switching to continuous frames so the navigator can steer");
        control.frame = FrameStyle::Continuous;
    }
    let boat = Arc::new(SimTransport::new(cfg.sim.clone(), control.alphabet.clone()));
    let scfg = SessionConfig { control, ..session_config(cfg) };
    let session = Session::new(scfg, Arc::new(Link::new(boat.clone())), Arc::new(ConsoleSink));
    session.connect("sim").await?;

    session.set_autonomous(true);
    session.set_throttle(1.0);
    println!("sim: driving out for {}s", drive_s);
    tokio::time::sleep(Duration::from_secs(drive_s)).await;
    session.set_throttle(0.0);

    let (out, _) = boat.position();
    let start = cfg.sim.start;
    println!("sim: {:.1} m from start, requesting return", out.distance_m(&start));
    session.request_return();

    let deadline = Instant::now() + Duration::from_secs(timeout_s);
    while session.nav_state() == NavState::Returning && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    if session.nav_state() == NavState::Returning {
        warn!("sim: return still running after {}s, cancelling", timeout_s);
        session.cancel_return();
    }

    let (end, _) = boat.position();
    println!("sim: ended {:.1} m from start", end.distance_m(&start));
    println!("{}", session.status());
    session.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands() {
        assert_eq!(parse_console("s -0.5"), Some(ConsoleCmd::Steer(-0.5)));
        assert_eq!(parse_console("  T 1 "), Some(ConsoleCmd::Throttle(1.0)));
        assert_eq!(parse_console("t nan"), None);
        assert_eq!(parse_console("t"), None);
        assert_eq!(parse_console("auto on"), Some(ConsoleCmd::Auto(true)));
        assert_eq!(parse_console("auto maybe"), None);
        assert_eq!(parse_console("speed 60"), Some(ConsoleCmd::Speed(60)));
        assert_eq!(parse_console("speed -1"), None);
        assert_eq!(parse_console("q"), Some(ConsoleCmd::Quit));
        assert_eq!(parse_console(""), None);
    }

    #[test]
    fn example_config_parses_and_passes_doctor() {
        let cfg: Config = toml::from_str(include_str!("../../../skiff.example.toml")).unwrap();
        assert_eq!(cfg.link.kind, LinkKind::Sim);
        assert_eq!(cfg.control.frame, FrameStyle::Continuous);
        assert_eq!(cfg.fence.zones.len(), 2);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.control.hz, 20);
        assert_eq!(cfg.link.baud, 9600);
        assert!(check_link(&cfg.link).is_err());
    }

    #[test]
    fn pin_must_be_digits() {
        let mut link = LinkConfig { address: Some("/dev/rfcomm0".into()), ..LinkConfig::default() };
        link.pin = Some("1234".into());
        check_link(&link).unwrap();
        link.pin = Some("12a4".into());
        assert!(check_link(&link).is_err());
    }
}
