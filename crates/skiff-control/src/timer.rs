use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Periodic driver. Each period spawns one run of the job, so a slow run
/// never delays the next tick; overlap is the job's own concern. Stopping
/// aborts the driver and every run still in progress.
pub struct Ticker {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!("timer: {} every {:?}", name, period);
        let handle = tokio::spawn(async move {
            let mut iv = tokio::time::interval(period);
            iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();
            loop {
                iv.tick().await;
                while runs.try_join_next().is_some() {}
                runs.spawn(job());
            }
        });
        Self { name, handle: Some(handle) }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(h) = self.handle.take() {
            debug!("timer: {} stopped", self.name);
            h.abort();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_until_stopped() {
        let n = Arc::new(AtomicU32::new(0));
        let c = n.clone();
        let mut t = Ticker::start("test", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(t.is_running());
        t.stop();
        t.stop();
        assert!(!t.is_running());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = n.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {} ticks", seen);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(n.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn slow_job_does_not_stall_ticks() {
        let n = Arc::new(AtomicU32::new(0));
        let c = n.clone();
        let _t = Ticker::start("slow", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(n.load(Ordering::SeqCst) >= 3);
    }
}
