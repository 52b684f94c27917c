use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use skiff_link::{LineStream, Link, LinkStatus};
use skiff_nav::sim::{project, MotionConfig};
use skiff_nav::{
    AxisTarget, BoatPose, FenceConfig, GeoPoint, Geofence, NavConfig, NavEvent, NavState, NavStep, PoseTracker,
    ReturnNavigator,
};
use skiff_proto::command::{AuxCommand, DriveFrame};
use skiff_proto::telemetry::{Telemetry, TelemetryDecoder};

use crate::command_loop::{AxisSample, CommandLoop, TickOutcome};
use crate::sink::MapSink;
use crate::timer::Ticker;
use crate::ControlConfig;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub control: ControlConfig,
    pub nav: NavConfig,
    pub fence: FenceConfig,
    /// Motion model for the predictive geofence check.
    pub motion: MotionConfig,
    /// How long PING / STATUS wait for their reply.
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            nav: NavConfig::default(),
            fence: FenceConfig::default(),
            motion: MotionConfig::default(),
            response_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub link: LinkStatus,
    pub nav_state: NavState,
    pub trail_len: usize,
    pub queue_len: usize,
    pub pose: Option<BoatPose>,
    pub gps_age: Option<Duration>,
    pub axis: AxisSample,
    pub last_sent: Option<DriveFrame>,
    pub last_ack: Option<String>,
    pub telemetry: TelemetryDecoder,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub timers_running: bool,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "link      {:?} ({})", self.link.state, self.link.kind)?;
        if let Some(s) = &self.link.last_status {
            writeln!(f, "status    {}", s)?;
        }
        if let Some(e) = &self.link.last_error {
            writeln!(f, "error     {}", e)?;
        }
        match (&self.pose, self.gps_age) {
            (Some(p), Some(age)) => writeln!(
                f,
                "gps       {:.6},{:.6} hdg {:.0} fix {} ({:.1}s ago)",
                p.point.lat,
                p.point.lon,
                p.heading,
                p.clock(),
                age.as_secs_f64()
            )?,
            _ => writeln!(f, "gps       no fix")?,
        }
        writeln!(f, "nav       {:?} trail={} queue={}", self.nav_state, self.trail_len, self.queue_len)?;
        writeln!(f, "axis      steer={:+.2} thr={:+.2}", self.axis.steering, self.axis.throttle)?;
        writeln!(f, "last cmd  {:?} (ack {:?})", self.last_sent, self.last_ack)?;
        writeln!(
            f,
            "counters  tx ok={} failed={} rx lines={} malformed={} heartbeats={}",
            self.commands_sent,
            self.commands_failed,
            self.telemetry.decoded,
            self.telemetry.malformed,
            self.telemetry.heartbeats
        )?;
        write!(f, "timers    {}", if self.timers_running { "running" } else { "stopped" })
    }
}

#[derive(Default)]
struct Waiters {
    pong: Vec<oneshot::Sender<()>>,
    status: Vec<oneshot::Sender<String>>,
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    command: Option<Ticker>,
    nav: Option<Ticker>,
}

struct Inner {
    link: Arc<Link>,
    commands: CommandLoop,
    nav: Mutex<ReturnNavigator>,
    pose: Mutex<PoseTracker>,
    decoder: Mutex<TelemetryDecoder>,
    last_ack: Mutex<Option<String>>,
    waiters: Mutex<Waiters>,
    tasks: Mutex<Tasks>,
    sink: Arc<dyn MapSink>,
    nav_period: Duration,
    motion: MotionConfig,
    lookahead: Option<Duration>,
    response_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One operator session: link, command loop, telemetry, and return-home
/// navigation wired together. Clones share the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(cfg: SessionConfig, link: Arc<Link>, sink: Arc<dyn MapSink>) -> Self {
        let fence = Geofence::new(cfg.fence);
        sink.draw_geofence(&fence.outlines());
        let lookahead = (cfg.nav.lookahead_s > 0.0).then(|| Duration::from_secs_f64(cfg.nav.lookahead_s));
        let nav_period = cfg.nav.control_period();
        let inner = Inner {
            commands: CommandLoop::new(cfg.control, link.clone()),
            link,
            nav: Mutex::new(ReturnNavigator::new(cfg.nav, fence)),
            pose: Mutex::new(PoseTracker::new()),
            decoder: Mutex::new(TelemetryDecoder::new()),
            last_ack: Mutex::new(None),
            waiters: Mutex::new(Waiters::default()),
            tasks: Mutex::new(Tasks::default()),
            sink,
            nav_period,
            motion: cfg.motion,
            lookahead,
            response_timeout: cfg.response_timeout,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.inner.link
    }

    pub fn commands(&self) -> &CommandLoop {
        &self.inner.commands
    }

    pub async fn connect(&self, address: &str) -> Result<()> {
        let lines = match self.inner.link.connect(address).await {
            Ok(lines) => lines,
            Err(e) => {
                self.inner.sink.notify(&format!("connect to {} failed: {}", address, e));
                return Err(e).with_context(|| format!("connecting to {}", address));
            }
        };
        self.inner.commands.reset();
        self.start(lines);
        self.inner.sink.notify(&format!("connected to {}", address));
        Ok(())
    }

    /// Stops the timers, drops session-scoped navigation state and closes the
    /// link. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.teardown(true);
        let was_connected = self.inner.link.state().is_connected();
        self.inner.link.disconnect().await;
        if was_connected {
            self.inner.sink.notify("disconnected");
        }
    }

    fn start(&self, mut lines: LineStream) {
        let mut tasks = lock(&self.inner.tasks);
        if let Some(r) = tasks.reader.take() {
            r.abort();
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let reader_weak = weak.clone();
        tasks.reader = Some(tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                let Some(inner) = reader_weak.upgrade() else { return };
                Session { inner }.handle_line(&line);
            }
            if let Some(inner) = reader_weak.upgrade() {
                Session { inner }.on_stream_closed();
            }
        }));

        let commands = self.inner.commands.clone();
        let sink = self.inner.sink.clone();
        tasks.command = Some(Ticker::start("command", commands.config().tick_period(), move || {
            let commands = commands.clone();
            let sink = sink.clone();
            async move {
                if let TickOutcome::Failed(Some(reason)) = commands.tick().await {
                    sink.notify(&format!("command write failed: {}", reason));
                }
            }
        }));

        tasks.nav = Some(Ticker::start("nav", self.inner.nav_period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.nav_tick();
                }
            }
        }));
    }

    fn on_stream_closed(&self) {
        warn!("session: telemetry stream closed");
        self.teardown(false);
        // Lets the link notice the dead transport and record it.
        let _ = self.inner.link.is_connected();
        self.inner.sink.notify("link lost");
    }

    fn teardown(&self, abort_reader: bool) {
        {
            let mut tasks = lock(&self.inner.tasks);
            if let Some(mut t) = tasks.command.take() {
                t.stop();
            }
            if let Some(mut t) = tasks.nav.take() {
                t.stop();
            }
            if let Some(r) = tasks.reader.take() {
                if abort_reader {
                    r.abort();
                }
            }
        }
        self.drive(|nav| nav.set_autonomous(false));
        self.inner.commands.set_axis(AxisTarget::ZERO);
        self.inner.commands.reset();
        lock(&self.inner.pose).clear();
        // Dropping the senders fails any ping/status still waiting.
        let mut w = lock(&self.inner.waiters);
        w.pong.clear();
        w.status.clear();
    }

    /// Run a navigator operation and apply its axis targets before the
    /// navigator lock is released, so a concurrent cancel cannot be overtaken.
    fn drive<F>(&self, f: F)
    where
        F: FnOnce(&mut ReturnNavigator) -> NavStep,
    {
        let events = {
            let mut nav = lock(&self.inner.nav);
            let step = f(&mut nav);
            if let Some(axis) = step.axis {
                self.inner.commands.set_axis(axis);
            }
            step.events
        };
        self.render(events);
    }

    fn render(&self, events: Vec<NavEvent>) {
        let sink = &self.inner.sink;
        for ev in events {
            match ev {
                NavEvent::TrailUpdated(trail) => sink.draw_breadcrumbs(&trail),
                NavEvent::ReturnStarted(path) => {
                    sink.draw_return_path(&path);
                    sink.notify(&format!("returning home over {} waypoints", path.len()));
                }
                NavEvent::ReturnPath(path) => sink.draw_return_path(&path),
                NavEvent::ReturnComplete => sink.notify("return complete"),
                NavEvent::GeofenceStop(at) => {
                    sink.draw_return_path(&[]);
                    sink.notify(&format!("geofence stop at {:.6},{:.6}", at.lat, at.lon));
                }
                NavEvent::Cancelled => {
                    sink.draw_return_path(&[]);
                    sink.notify("return cancelled");
                }
                NavEvent::NoPath { points } => sink.notify(&format!("no path home ({} breadcrumb(s))", points)),
            }
        }
    }

    /// Dispatch one inbound line.
    pub fn handle_line(&self, line: &str) {
        let inner = &self.inner;
        inner.link.note_rx();
        let Some(t) = lock(&inner.decoder).decode(line) else {
            if !line.trim().is_empty() {
                debug!("telemetry: ignored {:?}", line.trim());
            }
            return;
        };
        match t {
            Telemetry::Position(fix) => {
                let point = GeoPoint::new(fix.lat, fix.lon);
                let pose = lock(&inner.pose).update(point, fix.heading).clone();
                inner.sink.update_boat(&pose);
                self.drive(|nav| NavStep { axis: None, events: nav.on_position(point) });
            }
            Telemetry::Ack(cmd) => {
                trace!("telemetry: ack {}", cmd);
                *lock(&inner.last_ack) = Some(cmd);
            }
            Telemetry::Pong => {
                for tx in lock(&inner.waiters).pong.drain(..) {
                    let _ = tx.send(());
                }
            }
            Telemetry::Heartbeat => trace!("telemetry: heartbeat"),
            Telemetry::Status(text) => {
                inner.link.set_status_text(text.clone());
                for tx in lock(&inner.waiters).status.drain(..) {
                    let _ = tx.send(text.clone());
                }
                inner.sink.notify(&text);
            }
            Telemetry::System(text) => {
                info!("boat: {}", text);
                inner.link.set_status_text(text.clone());
                inner.sink.notify(&text);
            }
        }
    }

    /// One return-home control step. No effect unless returning.
    pub fn nav_tick(&self) {
        let pose = lock(&self.inner.pose).latest().cloned();
        let predicted = match (&pose, self.inner.lookahead) {
            (Some(p), Some(dt)) => {
                let a = self.inner.commands.latest();
                let axis = AxisTarget { steering: a.steering, throttle: a.throttle };
                Some(project(&self.inner.motion, &p.point, p.heading, axis, dt).0)
            }
            _ => None,
        };
        self.drive(|nav| nav.step(pose.as_ref(), predicted));
    }

    /// Manual steering. Ignored while the navigator is driving.
    pub fn set_steering(&self, x: f64) -> bool {
        let nav = lock(&self.inner.nav);
        if nav.state() == NavState::Returning {
            debug!("session: manual steering ignored while returning");
            return false;
        }
        self.inner.commands.set_steering(x);
        true
    }

    /// Manual throttle. Ignored while the navigator is driving.
    pub fn set_throttle(&self, y: f64) -> bool {
        let nav = lock(&self.inner.nav);
        if nav.state() == NavState::Returning {
            debug!("session: manual throttle ignored while returning");
            return false;
        }
        self.inner.commands.set_throttle(y);
        true
    }

    pub fn set_autonomous(&self, on: bool) {
        self.drive(|nav| nav.set_autonomous(on));
    }

    pub fn request_return(&self) {
        self.drive(|nav| nav.request_return());
    }

    pub fn cancel_return(&self) {
        self.drive(|nav| nav.cancel_return());
    }

    pub fn toggle_return(&self) {
        self.drive(|nav| match nav.state() {
            NavState::Returning => nav.cancel_return(),
            _ => nav.request_return(),
        });
    }

    pub fn nav_state(&self) -> NavState {
        lock(&self.inner.nav).state()
    }

    pub async fn send_aux(&self, cmd: AuxCommand) -> Result<()> {
        self.inner
            .commands
            .send_aux(cmd, self.inner.response_timeout)
            .await
            .with_context(|| format!("sending {:?}", cmd))
    }

    /// Round-trip time of a PING/PONG exchange.
    pub async fn ping(&self) -> Result<Duration> {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.waiters).pong.push(tx);
        let start = Instant::now();
        self.await_reply(AuxCommand::Ping, "PONG", rx).await?;
        Ok(start.elapsed())
    }

    /// Ask the boat for its status line and wait for the reply.
    pub async fn request_status(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.waiters).status.push(tx);
        self.await_reply(AuxCommand::Status, "STATUS", rx).await
    }

    async fn await_reply<T>(&self, cmd: AuxCommand, reply: &str, rx: oneshot::Receiver<T>) -> Result<T> {
        let timeout = self.inner.response_timeout;
        let res = async move {
            self.send_aux(cmd).await?;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(v)) => Ok::<T, anyhow::Error>(v),
                Ok(Err(_)) => bail!("link closed while waiting for {}", reply),
                Err(_) => bail!("no {} within {:?}", reply, timeout),
            }
        }
        .await;
        if res.is_err() {
            // Our receiver is gone by now; drop its sender and any other abandoned ones.
            let mut w = lock(&self.inner.waiters);
            w.pong.retain(|tx| !tx.is_closed());
            w.status.retain(|tx| !tx.is_closed());
        }
        res
    }

    pub fn status(&self) -> SessionStatus {
        let inner = &self.inner;
        let (nav_state, trail_len, queue_len) = {
            let nav = lock(&inner.nav);
            (nav.state(), nav.trail().len(), nav.queue().len())
        };
        let (pose, gps_age) = {
            let p = lock(&inner.pose);
            (p.latest().cloned(), p.age())
        };
        let (commands_sent, commands_failed) = inner.commands.counters();
        let timers_running = lock(&inner.tasks).command.as_ref().map_or(false, Ticker::is_running);
        SessionStatus {
            link: inner.link.status(),
            nav_state,
            trail_len,
            queue_len,
            pose,
            gps_age,
            axis: inner.commands.latest(),
            last_sent: inner.commands.last_sent(),
            last_ack: lock(&inner.last_ack).clone(),
            telemetry: lock(&inner.decoder).clone(),
            commands_sent,
            commands_failed,
            timers_running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_link::mock::{MockTransport, WriteBehavior};
    use skiff_nav::Zone;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Boat,
        Trail(usize),
        Fence(usize),
        Path(Vec<GeoPoint>),
        Notify(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<Call> {
            lock(&self.calls).clone()
        }

        fn paths(&self) -> Vec<Vec<GeoPoint>> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Path(p) => Some(p),
                    _ => None,
                })
                .collect()
        }

        fn notified(&self, text: &str) -> bool {
            self.calls().iter().any(|c| matches!(c, Call::Notify(s) if s.contains(text)))
        }
    }

    impl MapSink for RecordingSink {
        fn update_boat(&self, _pose: &BoatPose) {
            lock(&self.calls).push(Call::Boat);
        }
        fn draw_breadcrumbs(&self, trail: &[GeoPoint]) {
            lock(&self.calls).push(Call::Trail(trail.len()));
        }
        fn draw_geofence(&self, outlines: &[Vec<GeoPoint>]) {
            lock(&self.calls).push(Call::Fence(outlines.len()));
        }
        fn draw_return_path(&self, path: &[GeoPoint]) {
            lock(&self.calls).push(Call::Path(path.to_vec()));
        }
        fn notify(&self, status: &str) {
            lock(&self.calls).push(Call::Notify(status.to_string()));
        }
    }

    const HOME: &str = "GPS:36.0000000,-94.0000000";
    const OUT: &str = "GPS:36.0000900,-94.0000000";

    fn session_with(cfg: SessionConfig) -> (Session, Arc<MockTransport>, Arc<RecordingSink>) {
        let mock = Arc::new(MockTransport::new());
        let sink = Arc::new(RecordingSink::default());
        let link = Arc::new(Link::new(mock.clone()));
        (Session::new(cfg, link, sink.clone()), mock, sink)
    }

    fn session() -> (Session, Arc<MockTransport>, Arc<RecordingSink>) {
        session_with(SessionConfig { response_timeout: Duration::from_millis(500), ..SessionConfig::default() })
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, f: F) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn fixes_update_pose_and_map() {
        let (s, _mock, sink) = session();
        s.handle_line(HOME);
        s.handle_line("garbage");
        s.handle_line("+RCV=1,27,GPS:360000900,-940000000,45,-40,11");
        let st = s.status();
        let pose = st.pose.unwrap();
        assert!((pose.point.lat - 36.00009).abs() < 1e-9);
        assert_eq!(pose.heading, 45.0);
        assert!(st.gps_age.is_some());
        assert_eq!(st.telemetry.malformed, 1);
        assert_eq!(sink.calls().iter().filter(|c| **c == Call::Boat).count(), 2);
        assert_eq!(sink.calls()[0], Call::Fence(0));
    }

    #[test]
    fn two_point_return_home() {
        let (s, _mock, sink) = session();
        s.set_autonomous(true);
        s.handle_line(HOME);
        s.handle_line(OUT);
        assert_eq!(s.status().trail_len, 2);

        s.request_return();
        assert_eq!(s.nav_state(), NavState::Returning);
        let drawn_at_start = sink.paths().len();

        // At the far end: first waypoint reached at once, steer back toward home.
        s.nav_tick();
        let axis = s.commands().latest();
        assert_eq!(axis.throttle, 0.75);
        assert_eq!(axis.steering.abs(), 1.0);
        assert_eq!(s.nav_state(), NavState::Returning);

        s.handle_line(HOME);
        s.nav_tick();
        assert_eq!(s.nav_state(), NavState::Idle);
        assert_eq!(s.commands().latest(), AxisSample::default());

        let paths = sink.paths();
        assert_eq!(paths.len() - drawn_at_start, 2);
        assert_eq!(paths[paths.len() - 2].len(), 1);
        assert!(paths[paths.len() - 1].is_empty());
        assert!(sink.notified("return complete"));
        let st = s.status();
        assert_eq!((st.trail_len, st.queue_len), (0, 0));
    }

    #[test]
    fn cancel_zeroes_axes_immediately() {
        let (s, _mock, sink) = session();
        s.set_autonomous(true);
        s.handle_line(HOME);
        s.handle_line(OUT);
        s.request_return();
        s.nav_tick();
        assert_ne!(s.commands().latest(), AxisSample::default());

        assert!(!s.set_throttle(-1.0));
        assert_eq!(s.commands().latest().throttle, 0.75);

        s.cancel_return();
        assert_eq!(s.commands().latest(), AxisSample::default());
        assert_eq!(s.nav_state(), NavState::Idle);
        assert!(sink.notified("return cancelled"));
        assert!(s.set_throttle(0.5));
    }

    #[test]
    fn return_without_trail_reports_no_path() {
        let (s, _mock, sink) = session();
        s.request_return();
        assert_eq!(s.nav_state(), NavState::Idle);
        s.set_autonomous(true);
        s.handle_line(HOME);
        s.request_return();
        assert_eq!(s.nav_state(), NavState::Tracking);
        assert!(sink.notified("no path home"));
    }

    #[test]
    fn predictive_check_stops_before_the_fence() {
        let fence = FenceConfig {
            buffer_deg: 0.00005,
            zones: vec![Zone::Box { south: 36.0002, north: 36.001, west: -94.001, east: -93.999 }],
        };
        let nav = NavConfig { lookahead_s: 10.0, ..NavConfig::default() };
        let (s, _mock, sink) = session_with(SessionConfig { fence, nav, ..SessionConfig::default() });
        s.set_autonomous(true);
        s.handle_line("GPS:36.0000000,-94.0000000,0");
        s.handle_line("GPS:36.0000900,-94.0000000,0");
        s.handle_line("GPS:36.0001200,-94.0000000,0");
        s.request_return();
        // Still steering north at cruise throttle; ten seconds ahead is inside the buffer.
        s.commands().set_axis(AxisTarget { steering: 0.0, throttle: 1.0 });
        s.nav_tick();
        assert_eq!(s.nav_state(), NavState::Idle);
        assert_eq!(s.commands().latest(), AxisSample::default());
        assert!(sink.notified("geofence stop"));
    }

    #[tokio::test]
    async fn ping_and_status_round_trip() {
        let (s, mock, _sink) = session();
        s.connect("mock").await.unwrap();
        assert!(s.status().timers_running);

        let pinger = {
            let s = s.clone();
            tokio::spawn(async move { s.ping().await })
        };
        wait_for("PING write", || mock.writes().iter().any(|w| w == "PING\n")).await;
        assert!(mock.inject_line("PONG"));
        let rtt = pinger.await.unwrap().unwrap();
        assert!(rtt < Duration::from_millis(500));

        let asker = {
            let s = s.clone();
            tokio::spawn(async move { s.request_status().await })
        };
        wait_for("STATUS write", || mock.writes().iter().any(|w| w == "STATUS\n")).await;
        assert!(mock.inject_line("STATUS,GPS_STALE"));
        assert_eq!(asker.await.unwrap().unwrap(), "GPS_STALE");
        assert_eq!(s.status().link.last_status.as_deref(), Some("GPS_STALE"));

        s.disconnect().await;
        s.disconnect().await;
        let st = s.status();
        assert!(!st.timers_running);
        assert!(!st.link.state.is_connected());
    }

    #[tokio::test]
    async fn ping_times_out() {
        let (s, _mock, _sink) =
            session_with(SessionConfig { response_timeout: Duration::from_millis(30), ..SessionConfig::default() });
        s.connect("mock").await.unwrap();
        assert!(s.ping().await.is_err());
        assert!(lock(&s.inner.waiters).pong.is_empty());
        assert!(s.request_status().await.is_err());
        assert!(lock(&s.inner.waiters).status.is_empty());
        s.disconnect().await;
    }

    #[tokio::test]
    async fn ping_while_disconnected_leaves_no_waiter() {
        let (s, mock, _sink) = session();
        let err = s.ping().await.unwrap_err();
        assert!(format!("{:#}", err).contains("not connected"), "{:#}", err);
        assert!(lock(&s.inner.waiters).pong.is_empty());
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test]
    async fn write_failures_are_reported_once() {
        let (s, mock, sink) = session();
        s.connect("mock").await.unwrap();
        mock.set_behavior(WriteBehavior::Fail);
        s.set_throttle(0.9);
        wait_for("repeated failures", || s.status().commands_failed >= 3).await;
        let notices = |sink: &RecordingSink| {
            sink.calls()
                .iter()
                .filter(|c| matches!(c, Call::Notify(t) if t.starts_with("command write failed")))
                .count()
        };
        assert_eq!(notices(&sink), 1);
        assert!(sink.notified("mock failure"));

        // Recovery re-arms the notice for the next outage.
        mock.set_behavior(WriteBehavior::Succeed);
        wait_for("recovered", || s.status().commands_sent >= 1).await;
        mock.set_behavior(WriteBehavior::Fail);
        s.set_throttle(-0.9);
        wait_for("second outage", || notices(&sink) == 2).await;
        s.disconnect().await;
    }

    #[tokio::test]
    async fn refused_connect_is_reported() {
        let (s, mock, sink) = session();
        mock.refuse_connect(true);
        assert!(s.connect("COM7").await.is_err());
        assert!(sink.notified("connect to COM7 failed"));
        assert!(!s.status().timers_running);
    }

    #[test]
    fn status_shows_fix_time() {
        let (s, _mock, _sink) = session();
        s.handle_line(HOME);
        let st = s.status();
        let clock = st.pose.as_ref().unwrap().clock();
        assert!(st.to_string().contains(&format!("fix {}", clock)), "{}", st);
    }

    #[tokio::test]
    async fn command_timer_sends_while_connected() {
        let (s, mock, _sink) = session();
        s.connect("mock").await.unwrap();
        s.set_throttle(0.9);
        wait_for("forward", || mock.writes().iter().any(|w| w == "2\n")).await;
        s.disconnect().await;
        let n = mock.write_count();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(mock.write_count(), n);
    }

    #[tokio::test]
    async fn lost_link_resets_session_state() {
        let (s, mock, sink) = session();
        s.connect("mock").await.unwrap();
        s.set_autonomous(true);
        mock.inject_line(HOME);
        mock.inject_line(OUT);
        wait_for("trail", || s.status().trail_len == 2).await;

        mock.drop_connection();
        wait_for("teardown", || !s.status().timers_running).await;
        let st = s.status();
        assert_eq!(st.nav_state, NavState::Idle);
        assert_eq!(st.trail_len, 0);
        assert!(!st.link.state.is_connected());
        assert!(sink.notified("link lost"));
    }
}
