//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the reactor and the shared control state
//! - Bind the control listener
//! - Install signal capture for SIGHUP, SIGTERM and SIGINT
//! - Reload configuration on SIGHUP, stop on SIGTERM/SIGINT
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener starts before signals are captured
//! - A rejected reload leaves the running configuration untouched

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::signal::unix::SignalKind;

use super::capture::SignalSet;
use super::signals::{SignalError, SignalHandler, SignalQueue};
use crate::config::{load_config, ConfigError, DaemonConfig, ListenerConfig};
use crate::http::command::{CommandResponseCreatorFactory, ControlState};
use crate::http::ResponseCreatorFactory;
use crate::net::{IdleTimeout, Listener, ListenerError, RequestTimeout};
use crate::reactor::{Reactor, ReactorError, ReactorHandle};

/// Error type for daemon startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Reactor could not be created.
    #[error(transparent)]
    Reactor(#[from] ReactorError),

    /// Listener could not be created or bound.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Signal capture could not be installed.
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// Error type for configuration reloads.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// New configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// New listener settings could not be applied.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// State shared between the daemon and its signal handler.
struct Control {
    config_path: PathBuf,
    config: ArcSwap<DaemonConfig>,
    state: Arc<ControlState>,
    factory: Arc<dyn ResponseCreatorFactory>,
    runtime: Handle,
    listener: Mutex<Listener>,
}

impl Control {
    /// Reload from disk. Returns whether listener settings changed.
    fn reload(&self) -> Result<bool, ReloadError> {
        let next = load_config(&self.config_path)?;
        let current = self.config.load_full();

        let listener_changed = next.listener != current.listener;
        if listener_changed {
            self.restart_listener(&next.listener)?;
        }
        if next.observability != current.observability {
            tracing::warn!("Observability changes take effect after restart");
        }

        self.config.store(Arc::new(next));
        self.state.record_reload();
        tracing::info!(
            path = %self.config_path.display(),
            listener_changed,
            reloads = self.state.reloads(),
            "Configuration reloaded"
        );
        Ok(listener_changed)
    }

    /// Apply new listener settings. A changed endpoint is bound before the
    /// old listener stops, so a failed bind keeps the old one serving.
    fn restart_listener(&self, config: &ListenerConfig) -> Result<(), ListenerError> {
        let mut replacement =
            build_listener(config, self.runtime.clone(), Arc::clone(&self.factory))?;
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);

        if replacement.endpoint() == listener.endpoint() {
            let settings = replacement.settings();
            return listener.reconfigure(
                RequestTimeout(settings.request_timeout),
                IdleTimeout(settings.idle_timeout),
                settings.max_body_size,
            );
        }

        replacement.start()?;
        listener.stop();
        *listener = replacement;
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .local_addr()
    }

    fn stop_listener(&self) {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
    }
}

/// The control channel daemon.
pub struct Daemon {
    reactor: Reactor,
    control: Arc<Control>,
    signals: SignalSet,
}

impl Daemon {
    /// Bind the listener and install signal capture.
    ///
    /// `config_path` is re-read on every SIGHUP.
    pub fn start(config_path: impl Into<PathBuf>, config: DaemonConfig) -> Result<Self, StartupError> {
        let reactor = Reactor::new()?;
        let handle = reactor.handle().clone();
        let state = Arc::new(ControlState::new(handle.clone()));
        let factory: Arc<dyn ResponseCreatorFactory> =
            Arc::new(CommandResponseCreatorFactory::new(Arc::clone(&state)));

        let mut listener = build_listener(
            &config.listener,
            handle.runtime().clone(),
            Arc::clone(&factory),
        )?;
        listener.start()?;

        let control = Arc::new(Control {
            config_path: config_path.into(),
            config: ArcSwap::from_pointee(config),
            state,
            factory,
            runtime: handle.runtime().clone(),
            listener: Mutex::new(listener),
        });

        let signals = install_signals(&handle, Arc::clone(&control))?;

        Ok(Self {
            reactor,
            control,
            signals,
        })
    }

    /// Run until SIGTERM, SIGINT or a `shutdown` command, then stop the listener.
    pub fn run(mut self) {
        tracing::info!(signals = ?self.signals.signals(), "Daemon running");
        self.reactor.run();

        self.signals.clear();
        self.control.stop_listener();
        tracing::info!(
            signals_received = self.reactor.handle().sequence().current(),
            reloads = self.control.state.reloads(),
            "Daemon stopped"
        );
    }

    /// Reload configuration from disk, as SIGHUP does.
    ///
    /// Returns whether the listener settings changed.
    pub fn reload(&self) -> Result<bool, ReloadError> {
        self.control.reload()
    }

    /// Configuration currently in effect.
    pub fn config(&self) -> Arc<DaemonConfig> {
        self.control.config.load_full()
    }

    /// Address the control listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.control.local_addr()
    }

    /// Number of successful reloads.
    pub fn reloads(&self) -> u64 {
        self.control.state.reloads()
    }

    /// Handle to the daemon's reactor.
    pub fn handle(&self) -> &ReactorHandle {
        self.reactor.handle()
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config_path", &self.control.config_path)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

fn build_listener(
    config: &ListenerConfig,
    runtime: Handle,
    factory: Arc<dyn ResponseCreatorFactory>,
) -> Result<Listener, ListenerError> {
    let address: IpAddr = config.address.parse().map_err(|_| {
        ListenerError::Configuration(format!("invalid listener address {:?}", config.address))
    })?;

    Ok(Listener::new(
        runtime,
        address,
        config.port,
        factory,
        RequestTimeout::from_millis(config.request_timeout_ms),
        IdleTimeout::from_millis(config.idle_timeout_ms),
    )?
    .with_max_request_size(config.max_request_size))
}

fn install_signals(reactor: &ReactorHandle, control: Arc<Control>) -> Result<SignalSet, SignalError> {
    let hangup = SignalKind::hangup().as_raw_value();
    let terminate = SignalKind::terminate().as_raw_value();
    let interrupt = SignalKind::interrupt().as_raw_value();

    let queue = SignalQueue::new(reactor)?;
    let handler: SignalHandler = {
        let queue = queue.clone();
        let reactor = reactor.clone();
        Arc::new(move |sequence_id| {
            let signal = queue.pop_signal(sequence_id)?;
            match signal.signum() {
                signum if signum == hangup => {
                    tracing::info!(sequence_id, "SIGHUP received, reloading configuration");
                    if let Err(e) = control.reload() {
                        tracing::error!(error = %e, "Configuration reload rejected");
                    }
                }
                signum => {
                    tracing::info!(sequence_id, signum, "Termination signal received");
                    reactor.stop();
                }
            }
            Ok(())
        })
    };

    SignalSet::new(reactor, &[hangup, terminate, interrupt], move |signum| {
        queue.push_signal(signum, Arc::clone(&handler)).is_ok()
    })
}
