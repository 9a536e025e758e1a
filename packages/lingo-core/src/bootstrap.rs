//! Service bootstrap and lifecycle.
//!
//! Wires the session registry, the cloud speech service, and the background
//! idle-eviction sweep into one container that the server binary (or an
//! embedder) owns. No process-wide singletons: everything lives here and is
//! passed to handlers through `AppState`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LingoError, LingoResult};
use crate::service::{CloudSpeechService, SpeechService};
use crate::session::registry::run_sweeper;
use crate::session::SessionRegistry;
use crate::state::Config;

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// Validated application configuration.
    pub config: Arc<Config>,
    /// Live streaming sessions.
    pub registry: Arc<SessionRegistry>,
    /// Capability interface handed to HTTP handlers.
    pub service: Arc<dyn SpeechService>,
    /// Cancelled on shutdown; background tasks watch it.
    shutdown: CancellationToken,
    /// Handle of the sweep task, once started.
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BootstrappedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrappedServices")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// Validates the configuration and constructs the service graph.
///
/// Background tasks are NOT started here; call
/// [`BootstrappedServices::start_background_tasks`] from an async context.
pub fn bootstrap_services(config: Config) -> LingoResult<BootstrappedServices> {
    config
        .validate()
        .map_err(LingoError::Configuration)?;

    let config = Arc::new(config);
    let registry = Arc::new(SessionRegistry::with_limit(config.session.max_sessions));
    let service = Arc::new(CloudSpeechService::new(
        Arc::clone(&registry),
        Arc::clone(&config),
    )?);

    Ok(BootstrappedServices {
        config,
        registry,
        service,
        shutdown: CancellationToken::new(),
        sweeper: Mutex::new(None),
    })
}

impl BootstrappedServices {
    /// Starts the periodic idle-eviction sweep.
    ///
    /// Calling this more than once is a no-op.
    pub fn start_background_tasks(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&self.registry),
            Duration::from_secs(self.config.session.sweep_interval_secs),
            Duration::from_secs(self.config.session.max_idle_secs),
            self.shutdown.clone(),
        ));
        *sweeper = Some(handle);
        log::info!(
            "[Bootstrap] Sweep task started (interval {}s, max idle {}s)",
            self.config.session.sweep_interval_secs,
            self.config.session.max_idle_secs
        );
    }

    /// Graceful shutdown: stops the sweep, then closes every session so
    /// clients observe `session_stopped` and a normal WebSocket closure.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        self.registry.close_all().await;
        log::info!("[Bootstrap] Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            region: "japaneast".into(),
            subscription_key: "key".into(),
            ..Default::default()
        }
    }

    #[test]
    fn bootstrap_rejects_missing_credentials() {
        let err = bootstrap_services(Config::default()).unwrap_err();
        assert!(matches!(err, LingoError::Configuration(_)));
    }

    #[tokio::test]
    async fn bootstrap_builds_service_graph() {
        let services = bootstrap_services(valid_config()).unwrap();
        assert!(services.registry.is_empty());
    }

    #[tokio::test]
    async fn background_tasks_start_once_and_shut_down() {
        let services = bootstrap_services(valid_config()).unwrap();
        services.start_background_tasks();
        services.start_background_tasks(); // no-op
        services.shutdown().await;
    }
}
