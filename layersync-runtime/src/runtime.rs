use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};

use layersync_core::document::DocumentEventSource;
use layersync_core::types::StreamId;
use layersync_sync::{DebounceScheduler, EngineContext, TriggerOutcome};

use crate::error::{io_err, RuntimeError};
use crate::protocol::{HostCommand, HostResponse};
use crate::store::ClientStore;

struct CommandJob {
    command: HostCommand,
    respond_to: oneshot::Sender<HostResponse>,
}

/// Cloneable front door to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<CommandJob>,
    shutdown: broadcast::Sender<()>,
}

impl RuntimeHandle {
    /// Send one command and wait for its response.
    pub async fn request(&self, command: HostCommand) -> Result<HostResponse, RuntimeError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(CommandJob {
                command,
                respond_to,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed("commands"))?;
        response
            .await
            .map_err(|_| RuntimeError::ChannelClosed("command response"))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// The host-side event loop for one document.
pub struct Runtime {
    store: Arc<ClientStore>,
    fired: mpsc::UnboundedReceiver<StreamId>,
    commands: mpsc::Receiver<CommandJob>,
    shutdown_tx: broadcast::Sender<()>,
    session_home: Option<PathBuf>,
}

impl Runtime {
    /// Build a runtime around `ctx`. Must be called from within a Tokio
    /// runtime; debounce timers are spawned onto it.
    pub fn new(ctx: EngineContext, events: Arc<dyn DocumentEventSource>) -> (Self, RuntimeHandle) {
        let (scheduler, fired) = DebounceScheduler::new(ctx.config.debounce);
        let store = Arc::new(ClientStore::new(ctx, events, scheduler));
        let (command_tx, commands) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(16);
        let handle = RuntimeHandle {
            commands: command_tx,
            shutdown: shutdown_tx.clone(),
        };
        let runtime = Self {
            store,
            fired,
            commands,
            shutdown_tx,
            session_home: None,
        };
        (runtime, handle)
    }

    /// Restore clients from `home` on start and save them on shutdown.
    pub fn with_session_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.session_home = Some(home.into());
        self
    }

    pub fn store(&self) -> Arc<ClientStore> {
        self.store.clone()
    }

    /// Run until [`RuntimeHandle::shutdown`] is called or every handle is
    /// dropped.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let Self {
            store,
            fired,
            commands,
            shutdown_tx,
            session_home,
        } = self;

        if let Some(home) = &session_home {
            store.restore_session_at(home).await?;
        }

        let trigger_handle = {
            let shutdown = shutdown_tx.clone();
            let shutdown_rx = shutdown.subscribe();
            let store = store.clone();
            tokio::spawn(async move {
                let result = trigger_task(store, fired, shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let command_handle = {
            let shutdown = shutdown_tx.clone();
            let shutdown_rx = shutdown.subscribe();
            let store = store.clone();
            tokio::spawn(async move {
                let result = command_task(store, commands, shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let (trigger_result, command_result) = tokio::join!(trigger_handle, command_handle);
        handle_join("trigger", trigger_result)?;
        handle_join("commands", command_result)?;

        if let Some(home) = &session_home {
            store.save_session_at(home).await?;
        }
        store.dispose_all().await;
        tracing::info!(document = %store.document_name(), "runtime stopped");
        Ok(())
    }
}

async fn trigger_task(
    store: Arc<ClientStore>,
    mut fired: mpsc::UnboundedReceiver<StreamId>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            stream = fired.recv() => {
                let Some(stream) = stream else { break };
                let store = store.clone();
                tokio::spawn(async move {
                    match store.on_debounce(&stream).await {
                        Ok(TriggerOutcome::Ran(results)) => {
                            let failed = results.iter().filter(|r| r.is_err()).count();
                            tracing::info!(stream = %stream, cycles = results.len(), failed, "debounced sync finished");
                        }
                        Ok(outcome) => {
                            tracing::debug!(stream = %stream, outcome = ?outcome, "debounced sync skipped");
                        }
                        Err(err) => {
                            tracing::warn!(stream = %stream, error = %err, "debounce fired for unknown stream");
                        }
                    }
                });
            }
        }
    }
    Ok(())
}

async fn command_task(
    store: Arc<ClientStore>,
    mut commands: mpsc::Receiver<CommandJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            job = commands.recv() => {
                let Some(job) = job else { break };
                let store = store.clone();
                tokio::spawn(async move {
                    let name = job.command.name();
                    let result = store.handle_command(job.command).await;
                    if let Err(err) = &result {
                        tracing::warn!(cmd = name, error = %err, "host command failed");
                    }
                    let _ = job.respond_to.send(result.into());
                });
            }
        }
    }
    Ok(())
}

/// Serve host commands over stdin/stdout and block until stdin closes or
/// ctrl-c arrives.
pub fn start_blocking(
    ctx: EngineContext,
    events: Arc<dyn DocumentEventSource>,
    session_home: Option<PathBuf>,
) -> Result<(), RuntimeError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(async move {
        let (mut host, handle) = Runtime::new(ctx, events);
        if let Some(home) = session_home {
            host = host.with_session_home(home);
        }

        let serving = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = serve_lines(tokio::io::stdin(), tokio::io::stdout(), handle.clone()).await;
                handle.shutdown();
                result
            })
        };

        let signal = {
            let handle = handle.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down");
                        handle.shutdown();
                    }
                    Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed"),
                }
            })
        };

        let result = host.run().await;
        signal.abort();
        serving.abort();
        result
    });
    // a pending stdin read would otherwise hold the runtime open
    runtime.shutdown_background();
    result
}

/// Answer newline-delimited JSON commands read from `reader` until EOF.
pub async fn serve_lines<R, W>(reader: R, mut writer: W, handle: RuntimeHandle) -> Result<(), RuntimeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("host command read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let response = match HostCommand::from_line(&line) {
            Ok(command) => handle.request(command).await?,
            Err(err) => HostResponse::error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &HostResponse,
) -> Result<(), RuntimeError> {
    let line = response.to_line()?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| io_err("host command write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("host command write", e))
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), RuntimeError>, tokio::task::JoinError>,
) -> Result<(), RuntimeError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RuntimeError::Protocol(format!("{task} task join error: {err}"))),
    }
}

/// Install the global `fmt` subscriber on stderr, leaving stdout to the
/// command protocol. `RUST_LOG` filters (default `info`);
/// `LAYERSYNC_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LAYERSYNC_LOG_FORMAT").is_ok_and(|v| v == "json");
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };
}
