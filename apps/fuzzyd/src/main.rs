use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fuzzy_core::utils::parse_duration;
use fuzzy_core::Config;
use fuzzy_server::{Lifecycle, Server};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Fuzzy hash storage server")]
pub struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:11335
    #[arg(long)]
    listen: Option<String>,

    /// Record file loaded at startup and rewritten on sync
    #[arg(long)]
    hashfile: Option<PathBuf>,

    /// Record lifetime, e.g. 172800, 2d, 36h
    #[arg(long)]
    expire: Option<String>,

    /// Base sync period; each cycle adds up to one more period of jitter
    #[arg(long)]
    sync_interval: Option<String>,

    /// Close sessions that send nothing for this long
    #[arg(long)]
    idle_timeout: Option<String>,

    /// Modifications needed before a periodic sync writes the file
    #[arg(long)]
    mod_limit: Option<u32>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(p) => Config::load(p).with_context(|| format!("loading {}", p.display()))?,
            None => Config::default(),
        };
        if let Some(l) = self.listen {
            cfg.listen = l;
        }
        if let Some(h) = self.hashfile {
            cfg.hashfile = Some(h);
        }
        if let Some(e) = self.expire {
            cfg.expire = parse_duration(&e)?;
        }
        if let Some(s) = self.sync_interval {
            cfg.sync_interval = parse_duration(&s)?;
        }
        if let Some(i) = self.idle_timeout {
            cfg.idle_timeout = parse_duration(&i)?;
        }
        if let Some(m) = self.mod_limit {
            cfg.mod_limit = m;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cfg = Cli::parse().into_config()?;
    if cfg.hashfile.is_none() {
        tracing::warn!("no hashfile configured, hashes will not survive a restart");
    }

    let server = Server::bind(cfg).await?;
    let control = server.control();
    tokio::spawn(forward_signals(control));
    server.run().await
}

/// SIGTERM and Ctrl-C exit with a forced sync, SIGUSR2 stops accepting,
/// SIGUSR1 flushes.
#[cfg(unix)]
async fn forward_signals(control: mpsc::Sender<Lifecycle>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut usr1, mut usr2) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
    ) {
        (Ok(t), Ok(u1), Ok(u2)) => (t, u1, u2),
        _ => {
            tracing::error!("cannot install signal handlers");
            return;
        }
    };
    loop {
        let ev = tokio::select! {
            _ = term.recv() => Lifecycle::Exit,
            _ = tokio::signal::ctrl_c() => Lifecycle::Exit,
            _ = usr1.recv() => Lifecycle::Flush,
            _ = usr2.recv() => Lifecycle::StopAccepting,
        };
        tracing::info!(event = ?ev, "lifecycle signal");
        if control.send(ev).await.is_err() || ev == Lifecycle::Exit {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(control: mpsc::Sender<Lifecycle>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = control.send(Lifecycle::Exit).await;
    }
}
