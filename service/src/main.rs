//! Notification service binary.
//!
//! Subscribes to `post.created` events and logs a notification for each.

use notification_service::{ServiceError, build_consumer, config::Config};
use notifier_amqp::AmqpBroker;
use notifier_runtime::drain_channel;
use notifier_runtime::metrics::MetricsRecorder;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "notification_service=info,notifier_runtime=info,notifier_amqp=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => {
            info!("Notification service stopped");
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!(error = %e, "Notification service failed");
            ExitCode::FAILURE
        },
    }
}

async fn run() -> Result<(), ServiceError> {
    info!("Starting notification service");

    let config = Config::from_env()?;
    info!(
        urls = ?config.amqp.urls,
        exchange = %config.subscription.exchange,
        exchange_type = %config.subscription.exchange_type,
        queue = %config.subscription.queue,
        concurrency = config.dispatch.concurrency,
        max_attempts = config.dispatch.max_attempts,
        "Configuration loaded"
    );

    let mut metrics = MetricsRecorder::new();
    if config.metrics_enabled {
        if let Err(e) = metrics.install() {
            warn!(error = %e, "Metrics disabled");
        }
    }

    let broker = AmqpBroker::builder().connection_name("notification-service").build();
    let consumer = build_consumer(&config, Arc::new(broker))?;

    let (trigger, drain) = drain_channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.drain();
    });

    let result = consumer.run(drain).await;

    let dead_letters = consumer.dead_letters();
    if !dead_letters.is_empty() {
        warn!(count = dead_letters.len(), "Messages were dead-lettered during this run");
    }
    if let Some(rendered) = metrics.render() {
        info!(metrics = %rendered, "Final metrics");
    }

    result.map_err(ServiceError::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, draining...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, draining...");
        },
    }
}
