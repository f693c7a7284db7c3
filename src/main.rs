use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_pipeline::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::{PostgresRecordStore, RecordStore},
        email::{SendGridSender, SmtpSender},
        fcm::FcmSender,
        health::{BrokerCheck, HealthChecker},
        rbmq::{QueueConnector, RabbitMqConnector, RabbitMqPublisher},
        redis::{IdempotencyStore, RedisClient},
        sender::{DeliverySender, LoggingSender, ProtectedSender},
        status::{HttpStatusReporter, StatusReporter},
        template::{TemplateDirectory, TemplateServiceClient},
        user::{UserDirectory, UserServiceClient},
    },
    config::Config,
    consumer::ChannelConsumer,
    ingress::IngressGate,
    models::message::Channel,
    utils::init_tracing,
    worker::ConsumerWorker,
};
use reqwest::Client;
use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load()?;
    init_tracing(&config.log_format)?;

    info!("Starting notification pipeline");

    let http_client = Client::builder()
        .timeout(config.http_timeout())
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

    let redis = RedisClient::connect(&config).await?;
    let idempotency: Arc<dyn IdempotencyStore> = Arc::new(redis.clone());

    let postgres = Arc::new(PostgresRecordStore::connect(&config.database_url).await?);
    postgres.ensure_schema().await?;

    let user_breaker = Arc::new(CircuitBreaker::new(
        config.circuit_breaker_config("user_service"),
    ));
    let template_breaker = Arc::new(CircuitBreaker::new(
        config.circuit_breaker_config("template_service"),
    ));

    let users: Arc<dyn UserDirectory> = Arc::new(UserServiceClient::new(
        &config,
        http_client.clone(),
        user_breaker.clone(),
    ));
    let templates: Arc<dyn TemplateDirectory> = Arc::new(TemplateServiceClient::new(
        &config,
        http_client.clone(),
        template_breaker.clone(),
    ));
    let reporter: Arc<dyn StatusReporter> =
        Arc::new(HttpStatusReporter::new(&config, http_client.clone()));

    let mut health_checker = HealthChecker::new()
        .with_dependency("cache_service", Arc::new(redis))
        .with_dependency("database", postgres.clone())
        .with_dependency("message_broker", Arc::new(BrokerCheck::new(config.clone())))
        .with_circuit_breaker(user_breaker)
        .with_circuit_breaker(template_breaker);

    let connector: Arc<dyn QueueConnector> = Arc::new(RabbitMqConnector::new(config.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

    for channel in Channel::ALL {
        let enabled = match channel {
            Channel::Email => config.enable_email_consumer,
            Channel::Push => config.enable_push_consumer,
        };
        if !enabled {
            info!(channel = %channel, "Consumer disabled");
            continue;
        }

        let (provider, provider_name) = build_sender(&config, channel, http_client.clone()).await?;
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker_config(provider_name),
        ));
        health_checker = health_checker.with_circuit_breaker(breaker.clone());

        let sender = Arc::new(ProtectedSender::new(provider, breaker, config.retry_config()));
        let consumer = Arc::new(ChannelConsumer::new(
            channel,
            users.clone(),
            templates.clone(),
            sender,
            reporter.clone(),
            idempotency.clone(),
            config.max_redeliveries,
        ));

        let worker = ConsumerWorker::new(config.clone(), consumer, connector.clone());
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            worker.run(shutdown).await;
            Ok(())
        });
    }

    if config.enable_api {
        let records: Arc<dyn RecordStore> = postgres;
        let ingress = IngressGate::new(
            idempotency,
            users,
            templates,
            records.clone(),
            Arc::new(RabbitMqPublisher::new(config.clone())),
            config.idempotency_service.clone(),
        );

        let state = Arc::new(AppState {
            health_checker,
            ingress,
            records,
            service_token: config.service_token.clone(),
        });

        tasks.spawn(run_api_server(config.server_port, state, shutdown_rx.clone()));
    }

    if tasks.is_empty() {
        warn!("Nothing enabled, exiting");
        return Ok(());
    }

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        Some(finished) = tasks.join_next() => match finished {
            Ok(Ok(())) => warn!("A service task exited early, shutting down"),
            Ok(Err(e)) => error!(error = %e, "A service task failed, shutting down"),
            Err(e) => error!(error = %e, "A service task panicked, shutting down"),
        },
    }

    let _ = shutdown_tx.send(true);

    while let Some(finished) = tasks.join_next().await {
        match finished {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Service task failed during shutdown"),
            Err(e) => error!(error = %e, "Service task panicked during shutdown"),
        }
    }

    info!("Notification pipeline stopped");
    Ok(())
}

/// Picks the provider for `channel`, falling back to a log-only sender when
/// the provider is not configured.
async fn build_sender(
    config: &Config,
    channel: Channel,
    http_client: Client,
) -> Result<(Arc<dyn DeliverySender>, &'static str), Error> {
    match channel {
        Channel::Push if config.fcm_project_id.is_some() => {
            let sender = FcmSender::from_config(config, http_client).await?;
            Ok((Arc::new(sender), "fcm"))
        }
        Channel::Email if config.sendgrid_api_key.is_some() => {
            let sender = SendGridSender::from_config(config, http_client)?;
            Ok((Arc::new(sender), "sendgrid"))
        }
        Channel::Email if config.smtp_host.is_some() => {
            let sender = SmtpSender::from_config(config)?;
            Ok((Arc::new(sender), "smtp"))
        }
        Channel::Push => {
            warn!("FCM_PROJECT_ID not set, push notifications will only be logged");
            Ok((Arc::new(LoggingSender::new(channel)), "push_provider"))
        }
        Channel::Email => {
            warn!("Neither SENDGRID_API_KEY nor SMTP_HOST set, emails will only be logged");
            Ok((Arc::new(LoggingSender::new(channel)), "email_provider"))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
