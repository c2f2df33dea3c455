mod attributes;
mod cli;
mod matcher;
mod notify;
mod template;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::Config;
use detector::{
    DetectionConfig, DetectionEngine, ExecEventListener, Pid, ProcConnectorSocket,
    ProcfsEnumerator,
};
use matcher::CriteriaSet;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

enum Exit {
    Signal(&'static str),
    EngineEnded(Result<Result<(), detector::Error>, tokio::task::JoinError>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment
    // variable for log control: `PROCWATCH_LOG=warn procwatch -vvv` still
    // logs at the trace level. The environment variable can only set the
    // log level per crate, e.g. `PROCWATCH_LOG=detector=debug`.
    let env_filter = EnvFilter::builder()
        .with_env_var("PROCWATCH_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let mut criteria = load_criteria(&config_path)
        .with_context(|| format!("loading criteria from {config_path:?}"))?;
    let names: Vec<_> = criteria
        .criteria
        .iter()
        .map(|criterion| criterion.name.clone())
        .collect();
    info!(count = names.len(), ?names, "watching criteria");

    let detection_config = DetectionConfig {
        poll_interval: cli.poll_interval(),
        ..DetectionConfig::default()
    };

    // Connector open and subscribe; any failure here is absorbed by the
    // engine as a fallback to polling, never a startup failure.
    let queue_capacity = detection_config.queue_capacity;
    let listener = ProcConnectorSocket::open()
        .and_then(|socket| ExecEventListener::open(socket, queue_capacity));
    let (engine, mut pids) = DetectionEngine::start(listener, ProcfsEnumerator, detection_config);

    let cancel = CancellationToken::new();
    let mut engine_task = tokio::spawn(engine.run(cancel.clone()));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut pids_open = true;

    let exit = loop {
        tokio::select! {
            // The engine only ends on its own when the last detection
            // strategy has failed.
            res = &mut engine_task => break Exit::EngineEnded(res),

            _ = sigint.recv() => break Exit::Signal("SIGINT"),
            _ = sigterm.recv() => break Exit::Signal("SIGTERM"),

            _ = sighup.recv() => {
                match load_criteria(&config_path) {
                    Ok(reloaded) => {
                        info!(
                            count = reloaded.criteria.len(),
                            path = ?config_path,
                            "criteria reloaded"
                        );
                        criteria = reloaded;
                    }
                    // Keep the existing criteria on a bad file.
                    Err(err) => error!(%err, "criteria reload failed, keeping existing"),
                }
            }

            pid = pids.recv(), if pids_open => match pid {
                Some(pid) => handle_pid(pid, &criteria, cli.no_notify),
                None => pids_open = false,
            }
        }
    };

    match exit {
        Exit::Signal(name) => {
            info!(signal = name, "received stop signal, shutting down");
            cancel.cancel();
            engine_task
                .await
                .context("engine task panicked")?
                .context("engine failed during shutdown")?;
            Ok(())
        }
        Exit::EngineEnded(res) => {
            res.context("engine task panicked")?
                .context("all detection strategies failed")?;
            // run() returning Ok without cancellation should not happen.
            anyhow::bail!("detection engine stopped unexpectedly");
        }
    }
}

fn load_criteria(path: &Path) -> anyhow::Result<CriteriaSet> {
    let config = Config::load(path)?;
    CriteriaSet::compile(&config)
}

/// Consumer side: resolve attributes, match, log and notify.
fn handle_pid(pid: Pid, criteria: &CriteriaSet, no_notify: bool) {
    let Some(attrs) = attributes::resolve(pid) else {
        // Already exited; exec events routinely outlive short commands.
        return;
    };

    for criterion in criteria.matching(&attrs) {
        let (title, body) = criterion.render(&attrs);
        info!(
            criterion = %criterion.name,
            pid,
            name = %attrs.name,
            %title,
            %body,
            "match"
        );
        if !no_notify {
            notify::send(title, body, criterion.urgency);
        }
    }
}
