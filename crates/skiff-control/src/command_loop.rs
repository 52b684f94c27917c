use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use skiff_link::{Link, LinkError};
use skiff_nav::AxisTarget;
use skiff_proto::command::{percent, AuxCommand, CommandCode, DriveFrame, FrameStyle};

use crate::ControlConfig;

/// Raw joystick deflection, each axis in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisSample {
    pub steering: f64,
    pub throttle: f64,
}

/// Deadzone, then round to two decimals. Values that round back inside the
/// deadzone collapse to zero so the function stays idempotent.
pub fn quantize(v: f64, deadzone: f64) -> f64 {
    if v.is_nan() || v.abs() < deadzone {
        return 0.0;
    }
    let q = (v.clamp(-1.0, 1.0) * 100.0).round() / 100.0;
    if q.abs() < deadzone { 0.0 } else { q }
}

/// Throttle beats steering; reverse beats forward; left beats right.
pub fn select_command(qs: f64, qt: f64, deadzone: f64) -> CommandCode {
    if qt <= -deadzone {
        CommandCode::Reverse
    } else if qt >= deadzone {
        CommandCode::Forward
    } else if qs <= -deadzone {
        CommandCode::Left
    } else if qs >= deadzone {
        CommandCode::Right
    } else {
        CommandCode::Neutral
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Input moved less than the hysteresis band.
    Skipped,
    /// Same frame as the last one delivered.
    Unchanged,
    /// A write is still outstanding.
    InFlight,
    Sent(DriveFrame),
    /// The write failed. Carries the reason only on the first failure after
    /// a delivered frame, so callers can report the transition once.
    Failed(Option<String>),
}

#[derive(Debug, Default)]
struct LoopState {
    latest: AxisSample,
    last_quantized: Option<AxisSample>,
    last_sent: Option<DriveFrame>,
    sending: bool,
    failing: bool,
    sent: u64,
    failed: u64,
}

struct Inner {
    cfg: ControlConfig,
    link: Arc<Link>,
    state: Mutex<LoopState>,
}

/// Turns continuous axis input into a rate-limited frame stream with at most
/// one write outstanding. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CommandLoop {
    inner: Arc<Inner>,
}

// Clears `sending` however the write path is left, including when the tick
// future is dropped mid-write.
struct SendingGate<'a>(&'a Mutex<LoopState>);

impl Drop for SendingGate<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).sending = false;
    }
}

impl CommandLoop {
    pub fn new(cfg: ControlConfig, link: Arc<Link>) -> Self {
        Self { inner: Arc::new(Inner { cfg, link, state: Mutex::new(LoopState::default()) }) }
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ControlConfig {
        &self.inner.cfg
    }

    pub fn set_steering(&self, x: f64) {
        self.state().latest.steering = clamp_axis(x);
    }

    pub fn set_throttle(&self, y: f64) {
        self.state().latest.throttle = clamp_axis(y);
    }

    /// Both axes under one lock, so no tick sees half an update.
    pub fn set_axis(&self, axis: AxisTarget) {
        let mut st = self.state();
        st.latest = AxisSample { steering: clamp_axis(axis.steering), throttle: clamp_axis(axis.throttle) };
    }

    pub fn latest(&self) -> AxisSample {
        self.state().latest
    }

    pub fn last_sent(&self) -> Option<DriveFrame> {
        self.state().last_sent
    }

    pub fn is_sending(&self) -> bool {
        self.state().sending
    }

    /// (delivered, failed) write counts.
    pub fn counters(&self) -> (u64, u64) {
        let st = self.state();
        (st.sent, st.failed)
    }

    /// Forget what the boat was last told; the next tick transmits unconditionally.
    pub fn reset(&self) {
        let mut st = self.state();
        st.last_sent = None;
        st.last_quantized = None;
        st.failing = false;
    }

    fn frame_for(&self, q: AxisSample) -> DriveFrame {
        match self.inner.cfg.frame {
            FrameStyle::Discrete => DriveFrame::Code(select_command(q.steering, q.throttle, self.inner.cfg.deadzone)),
            FrameStyle::Continuous => DriveFrame::Ctrl { throttle: percent(q.throttle), steer: percent(q.steering) },
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        let cfg = &self.inner.cfg;
        let (q, frame) = {
            let mut st = self.state();
            let q = AxisSample {
                steering: quantize(st.latest.steering, cfg.deadzone),
                throttle: quantize(st.latest.throttle, cfg.deadzone),
            };
            let steady = st.last_quantized.map_or(false, |lq| {
                (q.steering - lq.steering).abs() <= cfg.hysteresis
                    && (q.throttle - lq.throttle).abs() <= cfg.hysteresis
            });
            if steady && st.last_sent.is_some() {
                return TickOutcome::Skipped;
            }
            let frame = self.frame_for(q);
            if st.last_sent == Some(frame) {
                st.last_quantized = Some(q);
                return TickOutcome::Unchanged;
            }
            if st.sending {
                st.last_quantized = Some(q);
                return TickOutcome::InFlight;
            }
            st.sending = true;
            (q, frame)
        };

        let _gate = SendingGate(&self.inner.state);
        let res = self.inner.link.write(frame.encode(&cfg.alphabet).as_bytes()).await;

        let mut st = self.state();
        match res {
            Ok(()) => {
                st.last_sent = Some(frame);
                st.last_quantized = Some(q);
                st.sent += 1;
                if std::mem::take(&mut st.failing) {
                    info!("command: writes recovered");
                }
                debug!("command: sent {:?}", frame);
                TickOutcome::Sent(frame)
            }
            Err(e) => {
                st.last_sent = None;
                st.last_quantized = None;
                st.failed += 1;
                match &e {
                    LinkError::NotConnected => debug!("command: {:?} not sent, link down", frame),
                    e => warn!("command: {:?} not sent: {}", frame, e),
                }
                let first = !std::mem::replace(&mut st.failing, true);
                TickOutcome::Failed(first.then(|| e.to_string()))
            }
        }
    }

    /// Auxiliary frame through the same single-writer gate as drive frames.
    /// Waits up to `wait` for an in-flight drive write to finish.
    pub async fn send_aux(&self, cmd: AuxCommand, wait: Duration) -> Result<(), LinkError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut st = self.state();
                if !st.sending {
                    st.sending = true;
                    break;
                }
            }
            if Instant::now() >= deadline {
                return Err(LinkError::Busy);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _gate = SendingGate(&self.inner.state);
        self.inner.link.write(cmd.encode().as_bytes()).await
    }
}

fn clamp_axis(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}
