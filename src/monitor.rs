//! Supervisor side: heartbeats every supervised process and restarts the ones
//! that stop answering.
//!
//! Each [`Target`] tracks how many heartbeats in a row went unanswered. Once
//! that reaches the target's `max_lag`, the caller's [`RestartHook`] brings up
//! a replacement and the monitor hands trust over to it:
//!
//! * a restarted worker is swapped in at the proxy with
//!   `AuthorizeProcess { new_pid, old_pid }`;
//! * a restarted proxy starts with an empty whitelist, so every other target
//!   is introduced again with `old_pid = 0`.
//!
//! A reply only counts if it echoes the request's sequence number and the
//! kernel says it came from the pid the target is registered under.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::{Envelope, EnvelopeCodec, PayloadType, Pid, ProxyClient, VouchCode, VouchError, codec::DefaultCodec};

pub const DEFAULT_MAX_LAG: u32 = 2;

/// A supervised process and its heartbeat bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: PathBuf,
    pub pid: Pid,
    /// Consecutive heartbeats without a valid reply.
    pub lag: u32,
    pub max_lag: u32,
    pub seq_num: u64,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>, pid: Pid) -> Self {
        Self { path: path.into(), pid, lag: 0, max_lag: DEFAULT_MAX_LAG, seq_num: 0 }
    }

    pub fn with_max_lag(mut self, max_lag: u32) -> Self {
        self.max_lag = max_lag;
        self
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.seq_num;
        self.seq_num = self.seq_num.wrapping_add(1);
        seq
    }

    fn replaced_by(&mut self, pid: Pid) {
        self.pid = pid;
        self.lag = 0;
        self.seq_num = 0;
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between heartbeat rounds.
    pub interval: Duration,
    /// How long one heartbeat or swap waits for its reply.
    pub reply_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), reply_timeout: Duration::from_secs(1) }
    }
}

/// Brings up a replacement for a target that stopped answering and returns
/// the new pid. Killing and reaping the old process is up to the hook.
pub trait RestartHook: Send {
    fn restart(&mut self, target: &Target) -> Result<Pid, VouchError>;
}

impl<F> RestartHook for F
where
    F: FnMut(&Target) -> Result<Pid, VouchError> + Send,
{
    fn restart(&mut self, target: &Target) -> Result<Pid, VouchError> {
        self(target)
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Proxy,
    Worker(usize),
}

pub struct Monitor<R: RestartHook, C: EnvelopeCodec = DefaultCodec> {
    client: ProxyClient<C>,
    proxy: Target,
    workers: Vec<Target>,
    restart: R,
    config: MonitorConfig,
}

impl<R: RestartHook, C: EnvelopeCodec> Monitor<R, C> {
    /// `client` must be bound at the proxy's reply path; the proxy is the
    /// process behind `client.proxy_path()` running as `proxy_pid`.
    pub fn new(client: ProxyClient<C>, proxy_pid: Pid, workers: Vec<Target>, restart: R, config: MonitorConfig) -> Self {
        let proxy = Target::new(client.proxy_path(), proxy_pid);
        Self { client, proxy, workers, restart, config }
    }

    pub fn with_proxy_max_lag(mut self, max_lag: u32) -> Self {
        self.proxy.max_lag = max_lag;
        self
    }

    pub fn proxy(&self) -> &Target {
        &self.proxy
    }

    pub fn workers(&self) -> &[Target] {
        &self.workers
    }

    /// Whitelists every worker at the proxy. Run once the proxy is up.
    pub async fn introduce(&mut self) -> Result<(), VouchError> {
        for i in 0..self.workers.len() {
            let pid = self.workers[i].pid;
            self.swap_at_proxy(pid, 0).await?;
        }
        Ok(())
    }

    /// Heartbeats forever, one round per interval.
    pub async fn run(&mut self) {
        loop {
            self.tick().await;
            sleep(self.config.interval).await;
        }
    }

    /// One heartbeat round: the proxy first, then every worker in order.
    pub async fn tick(&mut self) {
        self.check(Slot::Proxy).await;
        for i in 0..self.workers.len() {
            self.check(Slot::Worker(i)).await;
        }
    }

    fn target_mut(&mut self, slot: Slot) -> &mut Target {
        match slot {
            Slot::Proxy => &mut self.proxy,
            Slot::Worker(i) => &mut self.workers[i],
        }
    }

    async fn check(&mut self, slot: Slot) {
        let reply_timeout = self.config.reply_timeout;
        let target = match slot {
            Slot::Proxy => &mut self.proxy,
            Slot::Worker(i) => &mut self.workers[i],
        };
        let seq = target.take_seq();

        match exchange(&self.client, &target.path, target.pid, Envelope::heartbeat_request(seq), reply_timeout).await {
            Ok(()) => target.lag = 0,
            Err(e) => {
                target.lag += 1;
                warn!(path = %target.path.display(), pid = target.pid, lag = target.lag, error = %e, "missed heartbeat");
            }
        }

        let target = self.target_mut(slot);
        if target.lag >= target.max_lag {
            if let Err(e) = self.recover(slot).await {
                warn!(error = %e, "recovery failed");
            }
        }
    }

    async fn recover(&mut self, slot: Slot) -> Result<(), VouchError> {
        let old = self.target_mut(slot).clone();
        info!(path = %old.path.display(), pid = old.pid, "restarting unresponsive process");

        let new_pid = self.restart.restart(&old)?;
        self.target_mut(slot).replaced_by(new_pid);
        info!(old_pid = old.pid, new_pid, "process restarted");

        match slot {
            Slot::Worker(_) => self.swap_at_proxy(new_pid, old.pid).await,
            Slot::Proxy => self.introduce().await,
        }
    }

    async fn swap_at_proxy(&mut self, new_pid: Pid, old_pid: Pid) -> Result<(), VouchError> {
        let seq = self.proxy.take_seq();
        let request = Envelope::authorize_process_request(seq, new_pid, old_pid);
        exchange(&self.client, &self.proxy.path, self.proxy.pid, request, self.config.reply_timeout).await?;
        debug!(new_pid, old_pid, "proxy accepted swap");
        Ok(())
    }
}

/// Sends `request` to `dest` and waits for the matching response from `pid`.
/// Anything else arriving in the meantime is skipped.
async fn exchange<C: EnvelopeCodec>(
    client: &ProxyClient<C>,
    dest: &Path,
    pid: Pid,
    request: Envelope,
    reply_timeout: Duration,
) -> Result<(), VouchError> {
    let expected = match request.payload_type() {
        PayloadType::HeartbeatRequest => PayloadType::HeartbeatResponse,
        _ => PayloadType::AuthorizeProcessResponse,
    };
    let seq = request.seq_num;
    let deadline = Instant::now() + reply_timeout;

    client.send_to(dest, &request).await?;

    loop {
        let received = timeout_at(deadline, client.recv_with_credential())
            .await
            .map_err(|_| VouchError::no_reply(format_args!("{expected} seq {seq} from pid {pid}")))?;

        match received {
            Ok((reply, sender)) if reply.seq_num == seq && reply.payload_type() == expected && sender.pid == pid => {
                return Ok(());
            }
            Ok((reply, sender)) => {
                debug!(seq = reply.seq_num, kind = %reply.payload_type(), sender = sender.pid, "skipping unexpected reply");
            }
            Err(e) if e.code == VouchCode::Io => return Err(e),
            Err(e) => debug!(error = %e, "skipping unreadable reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::{AccessStore, Proxy, ProxyConfig};

    const FAST: MonitorConfig =
        MonitorConfig { interval: Duration::from_millis(10), reply_timeout: Duration::from_millis(200) };

    fn me() -> Pid {
        std::process::id()
    }

    struct Fixture {
        dir: TempDir,
        proxy: Arc<Proxy>,
        client: Option<ProxyClient>,
    }

    /// Running proxy; the returned client sits at its reply path.
    fn start(store: AccessStore) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ProxyConfig::new(dir.path().join("proxy"), dir.path().join("process_monitor"));
        let client = ProxyClient::bind(&config.peer_path, &config.listen_path).unwrap();

        let proxy = Arc::new(Proxy::bind(config, Arc::new(store)).unwrap());
        let runner = Arc::clone(&proxy);
        tokio::spawn(async move { runner.run().await });

        Fixture { dir, proxy, client: Some(client) }
    }

    /// Restart hook that records whom it replaced and hands out `next`.
    fn recording_hook(next: Pid) -> (Arc<Mutex<Vec<Target>>>, impl RestartHook) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let hook = move |t: &Target| -> Result<Pid, VouchError> {
            seen.lock().unwrap().push(t.clone());
            Ok(next)
        };
        (calls, hook)
    }

    #[tokio::test]
    async fn test_silent_worker_is_restarted_and_swapped() {
        let store = AccessStore::bootstrapped(me());
        store.authorize(4242, 0);
        let mut f = start(store);
        let worker = Target::new(f.dir.path().join("worker"), 4242);
        let (calls, hook) = recording_hook(4343);
        let mut monitor = Monitor::new(f.client.take().unwrap(), me(), vec![worker], hook, FAST);

        monitor.tick().await;
        assert_eq!(monitor.workers()[0].lag, 1);
        assert!(calls.lock().unwrap().is_empty());

        monitor.tick().await;
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pid, 4242);

        let w = &monitor.workers()[0];
        assert_eq!((w.pid, w.lag, w.seq_num), (4343, 0, 0));
        assert_eq!(monitor.proxy().lag, 0);

        let store = f.proxy.store();
        assert!(store.is_authorized(4343));
        assert!(!store.is_authorized(4242));
        assert!(store.is_authorized(me()));
    }

    #[tokio::test]
    async fn test_answering_worker_is_left_alone() {
        let mut f = start(AccessStore::bootstrapped(me()));

        // A second proxy stands in for a worker that answers heartbeats.
        let worker_path = f.dir.path().join("worker");
        let worker = Proxy::bind(
            ProxyConfig::new(&worker_path, f.dir.path().join("process_monitor")),
            Arc::new(AccessStore::bootstrapped(me())),
        )
        .unwrap();
        tokio::spawn(async move { worker.run().await });

        let (calls, hook) = recording_hook(1);
        let target = Target::new(&worker_path, me());
        let mut monitor = Monitor::new(f.client.take().unwrap(), me(), vec![target], hook, FAST);

        for _ in 0..3 {
            monitor.tick().await;
        }

        assert!(calls.lock().unwrap().is_empty());
        let w = &monitor.workers()[0];
        assert_eq!((w.lag, w.seq_num), (0, 3));
        assert_eq!((monitor.proxy().lag, monitor.proxy().seq_num), (0, 3));
    }

    #[tokio::test]
    async fn test_reply_from_wrong_pid_counts_as_missed() {
        let mut f = start(AccessStore::bootstrapped(me()));
        let (calls, hook) = recording_hook(me());
        // Registered under a pid the proxy does not run as.
        let mut monitor = Monitor::new(f.client.take().unwrap(), me() + 1, vec![], hook, FAST).with_proxy_max_lag(5);

        monitor.tick().await;
        assert_eq!(monitor.proxy().lag, 1);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restarted_proxy_gets_workers_reintroduced() {
        let mut f = start(AccessStore::bootstrapped(me()));
        let worker = Target::new(f.dir.path().join("worker"), 777).with_max_lag(100);
        let (calls, hook) = recording_hook(me());
        let mut monitor =
            Monitor::new(f.client.take().unwrap(), me() + 1, vec![worker], hook, FAST).with_proxy_max_lag(1);

        monitor.tick().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path.as_path(), f.proxy.listen_path());
        assert_eq!(monitor.proxy().pid, me());
        assert!(f.proxy.store().is_authorized(777));
        assert_eq!(monitor.workers()[0].lag, 1);
    }

    #[tokio::test]
    async fn test_introduce_whitelists_every_worker() {
        let mut f = start(AccessStore::bootstrapped(me()));
        let workers = vec![Target::new(f.dir.path().join("a"), 500), Target::new(f.dir.path().join("b"), 600)];
        let (_, hook) = recording_hook(1);
        let mut monitor = Monitor::new(f.client.take().unwrap(), me(), workers, hook, FAST);

        monitor.introduce().await.unwrap();

        let mut expected = vec![500, 600, me()];
        expected.sort_unstable();
        assert_eq!(f.proxy.store().authorized_pids(), expected);
        assert_eq!(monitor.proxy().seq_num, 2);
    }

    #[tokio::test]
    async fn test_failed_restart_keeps_old_pid() {
        let mut f = start(AccessStore::bootstrapped(me()));
        let worker = Target::new(f.dir.path().join("worker"), 4242).with_max_lag(1);
        let hook = |_: &Target| -> Result<Pid, VouchError> { Err(VouchError::restart("spawn failed")) };
        let mut monitor = Monitor::new(f.client.take().unwrap(), me(), vec![worker], hook, FAST);

        monitor.tick().await;

        assert_eq!(monitor.workers()[0].pid, 4242);
        assert!(!f.proxy.store().is_authorized(4242));
    }
}
