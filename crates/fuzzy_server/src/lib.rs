//! Single-threaded fuzzy storage server loop.
//!
//! One task owns the listener, the persistence timer and the lifecycle
//! channel; every accepted connection gets its own session task. Run it on a
//! current-thread runtime so that all of them share one thread. The store sits
//! behind one mutex that is never held across an `.await`, which serializes
//! every dispatch against every sync.

use anyhow::{Context, Result};
use fuzzy_core::persist::Persistence;
use fuzzy_core::utils::now_secs;
use fuzzy_core::{Config, FuzzyStore, Session, SessionState};
use std::future::pending;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Sleep};
use tracing::{debug, error, info, warn};

pub type StoreHandle = Arc<Mutex<FuzzyStore>>;

/// Process lifecycle requests, decoupled from whatever delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Sync now regardless of pending modifications, keep serving.
    Flush,
    /// Stop accepting; finish open sessions and exit after the grace period.
    StopAccepting,
    /// Forced sync, then stop.
    Exit,
}

pub fn lock(store: &StoreHandle) -> MutexGuard<'_, FuzzyStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `interval` plus up to one more `interval` of jitter.
pub fn next_sync_delay(interval: Duration) -> Duration {
    interval + interval.mul_f64(rand::random::<f64>())
}

pub struct Server {
    cfg: Config,
    store: StoreHandle,
    persistence: Persistence,
    listener: TcpListener,
    control_tx: mpsc::Sender<Lifecycle>,
    control_rx: mpsc::Receiver<Lifecycle>,
}

impl Server {
    /// Load the record file (if any) and bind the listen address.
    pub async fn bind(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let persistence = Persistence::from_config(&cfg);
        let mut store = cfg.new_store();
        let report = persistence.load(&mut store);
        info!(records = report.loaded, "fuzzy storage initialised");

        let listener = TcpListener::bind(&cfg.listen)
            .await
            .with_context(|| format!("cannot bind {}", cfg.listen))?;
        let (control_tx, control_rx) = mpsc::channel(16);
        Ok(Self {
            cfg,
            store: Arc::new(Mutex::new(store)),
            persistence,
            listener,
            control_tx,
            control_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    pub fn control(&self) -> mpsc::Sender<Lifecycle> {
        self.control_tx.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Server { cfg, store, mut persistence, listener, control_tx, mut control_rx } = self;
        drop(control_tx);

        let mut listener = Some(listener);
        let mut events_open = true;
        let sync_timer = time::sleep(next_sync_delay(cfg.sync_interval));
        tokio::pin!(sync_timer);
        let mut grace: Option<Pin<Box<Sleep>>> = None;

        info!(addr = %cfg.listen, "fuzzy storage listening");
        loop {
            tokio::select! {
                accepted = accept(listener.as_ref()) => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let store = store.clone();
                        let idle = cfg.idle_timeout;
                        tokio::spawn(async move { serve_session(stream, store, idle).await });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                () = &mut sync_timer => {
                    sync_timer.as_mut().reset(Instant::now() + next_sync_delay(cfg.sync_interval));
                    run_sync(&mut persistence, &store);
                }
                ev = control_rx.recv(), if events_open => match ev {
                    Some(Lifecycle::Flush) => {
                        persistence.request_flush();
                        run_sync(&mut persistence, &store);
                    }
                    Some(Lifecycle::StopAccepting) => {
                        if listener.take().is_some() {
                            info!(grace = ?cfg.soft_shutdown, "stopped accepting, shutdown pending");
                            grace = Some(Box::pin(time::sleep(cfg.soft_shutdown)));
                        }
                    }
                    Some(Lifecycle::Exit) => {
                        persistence.request_flush();
                        run_sync(&mut persistence, &store);
                        break;
                    }
                    None => events_open = false,
                },
                () = wait_grace(grace.as_mut()) => {
                    run_sync(&mut persistence, &store);
                    break;
                }
            }
        }
        info!("fuzzy storage stopped");
        Ok(())
    }
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(l) => l.accept().await,
        None => pending().await,
    }
}

async fn wait_grace(grace: Option<&mut Pin<Box<Sleep>>>) {
    match grace {
        Some(s) => s.as_mut().await,
        None => pending().await,
    }
}

fn run_sync(persistence: &mut Persistence, store: &StoreHandle) {
    let mut guard = lock(store);
    match persistence.maybe_sync(&mut *guard, now_secs()) {
        Ok(Some(report)) => debug!(?report, "sync cycle done"),
        Ok(None) => {}
        Err(e) => error!("sync abandoned, will retry next cycle: {e}"),
    }
}

/// Drive one connection to `Closed`. The stream is released exactly once,
/// when this function returns, whichever way the session ended.
pub async fn serve_session(mut stream: TcpStream, store: StoreHandle, idle: Duration) {
    let mut session = Session::new();
    loop {
        match session.state() {
            SessionState::AwaitingCommand => {
                match time::timeout(idle, stream.read(session.recv_buf())).await {
                    Err(_) => {
                        session.on_timeout();
                    }
                    Ok(Err(e)) => {
                        error!("got error while reading from socket: {e}");
                        session.on_error();
                    }
                    Ok(Ok(n)) => {
                        session.on_read(n);
                    }
                }
            }
            SessionState::Dispatching => {
                let reply = {
                    let mut guard = lock(&store);
                    session.dispatch(&mut *guard)
                };
                if let Some(reply) = reply {
                    if let Err(e) = stream.write_all(reply.as_bytes()).await {
                        error!("error while writing reply: {e}");
                    }
                }
            }
            SessionState::Closed => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_one_interval() {
        let base = Duration::from_secs(60);
        for _ in 0..100 {
            let d = next_sync_delay(base);
            assert!(d >= base && d < base * 2);
        }
    }
}
