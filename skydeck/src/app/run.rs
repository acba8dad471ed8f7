//! Component run loops

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{
    BroadcasterOptions, BrokerOptions, BuilderOptions, DispatcherOptions, LifecycleOptions,
    RouterOptions, RuntimeOptions,
};
use crate::broadcaster::registry::SubscriptionRegistry;
use crate::broadcaster::relay;
use crate::broadcaster::serve::BroadcasterState;
use crate::broker::mqtt::MqttBroker;
use crate::broker::topics::Topics;
use crate::broker::Broker;
use crate::builder::executor::{BuildExecutor, BuildPlan, BuildReport};
use crate::dispatcher::state::DispatcherState;
use crate::errors::PlatformError;
use crate::router::proxy::RouterState;
use crate::runtime::docker::DockerRuntime;
use crate::runtime::http::HttpRuntime;
use crate::runtime::ContainerRuntime;
use crate::store::http::HttpStore;

/// Run the dispatcher until `shutdown_signal` resolves
pub async fn run_dispatcher(
    options: DispatcherOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    info!("Initializing dispatcher...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let base_environment = options.builder_environment();
    let runtime = init_runtime(options.runtime)?;
    let state = DispatcherState::new(
        runtime,
        options.platform_domain,
        options.build_image,
        options.placement,
        base_environment,
    );

    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let handle = crate::dispatcher::serve::serve(&options.server, Arc::new(state), async move {
        let _ = server_shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(handle)?;

    await_shutdown(shutdown_signal, shutdown_tx, shutdown_manager).await
}

fn init_runtime(options: RuntimeOptions) -> Result<Arc<dyn ContainerRuntime>, PlatformError> {
    let runtime: Arc<dyn ContainerRuntime> = match options {
        RuntimeOptions::Docker => {
            info!("Launching builds with the local docker daemon");
            Arc::new(DockerRuntime::new())
        }
        RuntimeOptions::Http {
            endpoint,
            cluster,
            container_name,
            token,
        } => {
            info!("Launching builds through {} (cluster {})", endpoint, cluster);
            Arc::new(HttpRuntime::new(&endpoint, cluster, container_name, token)?)
        }
    };
    Ok(runtime)
}

/// Run one build to completion
pub async fn run_builder(options: BuilderOptions) -> Result<BuildReport, PlatformError> {
    info!("Initializing build executor for {}...", options.slug);

    let BuilderOptions {
        repository_url,
        slug,
        work_dir,
        build_command,
        output_dir,
        abort_on_build_failure,
        store,
        broker,
    } = options;

    let broker: Arc<dyn Broker> = Arc::new(connect_broker(&broker, "builder").await?);
    let plan = BuildPlan {
        repository_url,
        slug,
        work_dir,
        build_command,
        output_dir,
        store_public_url: store.public_url,
        abort_on_build_failure,
    };
    let store = Arc::new(HttpStore::new(
        &store.endpoint,
        store.access_key_id,
        store.secret_access_key,
    )?);
    info!("Uploading artifacts to {}", store.endpoint());

    let result = BuildExecutor::new(plan, store, broker.clone()).run().await;

    // deliver the last progress events before exiting
    if let Err(e) = broker.close().await {
        warn!("Failed to close broker connection: {}", e);
    }
    result
}

/// Run the log broadcaster until `shutdown_signal` resolves
pub async fn run_broadcaster(
    options: BroadcasterOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    info!("Initializing broadcaster...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());
    let registry = Arc::new(SubscriptionRegistry::new());

    match init_relay(&options.broker, registry.clone(), shutdown_tx.subscribe()).await {
        Ok((broker, handle)) => {
            shutdown_manager.with_broker(broker)?;
            shutdown_manager.with_relay_handle(handle)?;
        }
        Err(e) => {
            error!("Broker unavailable, serving WebSockets without log relay: {}", e);
        }
    }

    let state = BroadcasterState { registry };
    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let handle = crate::broadcaster::serve::serve(&options.server, Arc::new(state), async move {
        let _ = server_shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(handle)?;

    await_shutdown(shutdown_signal, shutdown_tx, shutdown_manager).await
}

async fn init_relay(
    options: &BrokerOptions,
    registry: Arc<SubscriptionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(Arc<dyn Broker>, JoinHandle<()>), PlatformError> {
    info!("Initializing log relay...");

    let broker: Arc<dyn Broker> = Arc::new(connect_broker(options, "broadcaster").await?);
    let stream = broker.subscribe_prefix(Topics::LOG_PREFIX).await?;
    info!("Subscribed to {}*", Topics::LOG_PREFIX);

    let handle = tokio::spawn(relay::run(stream, registry, async move {
        let _ = shutdown_rx.recv().await;
    }));
    Ok((broker, handle))
}

async fn connect_broker(options: &BrokerOptions, role: &str) -> Result<MqttBroker, PlatformError> {
    let client_id = format!("skydeck-{}-{}", role, uuid::Uuid::new_v4().simple());
    MqttBroker::connect(&options.connect, &client_id).await
}

/// Run the traffic router until `shutdown_signal` resolves
pub async fn run_router(
    options: RouterOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    info!("Initializing router...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let state = RouterState::from_options(&options)?;
    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let handle = crate::router::serve::serve(&options.server, Arc::new(state), async move {
        let _ = server_shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(handle)?;

    await_shutdown(shutdown_signal, shutdown_tx, shutdown_manager).await
}

async fn await_shutdown(
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_manager: ShutdownManager,
) -> Result<(), PlatformError> {
    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), PlatformError>>>,
    relay_handle: Option<JoinHandle<()>>,
    broker: Option<Arc<dyn Broker>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            relay_handle: None,
            broker: None,
        }
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), PlatformError>>,
    ) -> Result<(), PlatformError> {
        if self.server_handle.is_some() {
            return Err(PlatformError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_relay_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PlatformError> {
        if self.relay_handle.is_some() {
            return Err(PlatformError::ShutdownError("relay_handle already set".to_string()));
        }
        self.relay_handle = Some(handle);
        Ok(())
    }

    pub fn with_broker(&mut self, broker: Arc<dyn Broker>) -> Result<(), PlatformError> {
        if self.broker.is_some() {
            return Err(PlatformError::ShutdownError("broker already set".to_string()));
        }
        self.broker = Some(broker);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PlatformError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PlatformError> {
        // 1. Relay
        if let Some(handle) = self.relay_handle.take() {
            handle.await.map_err(|e| PlatformError::ShutdownError(e.to_string()))?;
        }

        // 2. Broker connection
        if let Some(broker) = self.broker.take() {
            if let Err(e) = broker.close().await {
                warn!("Failed to close broker connection: {}", e);
            }
        }

        // 3. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| PlatformError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
