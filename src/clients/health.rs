use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker, database::PostgresRecordStore, rbmq::RabbitMqClient,
        redis::RedisClient,
    },
    config::Config,
    models::health::{BreakerHealth, DependencyHealth, HealthReport},
};

/// Something the pipeline cannot run without.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    async fn check(&self) -> Result<(), Error>;
}

#[async_trait]
impl DependencyCheck for RedisClient {
    async fn check(&self) -> Result<(), Error> {
        self.ping().await
    }
}

#[async_trait]
impl DependencyCheck for PostgresRecordStore {
    async fn check(&self) -> Result<(), Error> {
        self.ping().await
    }
}

/// Opens and drops a broker connection.
pub struct BrokerCheck {
    config: Config,
}

impl BrokerCheck {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DependencyCheck for BrokerCheck {
    async fn check(&self) -> Result<(), Error> {
        RabbitMqClient::connect(&self.config).await.map(|_| ())
    }
}

#[derive(Default)]
pub struct HealthChecker {
    dependencies: Vec<(String, Arc<dyn DependencyCheck>)>,
    breakers: Vec<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dependency(mut self, name: &str, dependency: Arc<dyn DependencyCheck>) -> Self {
        self.dependencies.push((name.to_string(), dependency));
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breakers.push(breaker);
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut dependencies = HashMap::new();
        for (name, dependency) in &self.dependencies {
            dependencies.insert(name.clone(), Self::check_dependency(name, dependency.as_ref()).await);
        }

        let circuit_breakers = self
            .breakers
            .iter()
            .map(|breaker| {
                (
                    breaker.service_name().to_string(),
                    BreakerHealth::from(breaker.snapshot()),
                )
            })
            .collect();

        HealthReport::new(dependencies, circuit_breakers)
    }

    async fn check_dependency(name: &str, dependency: &dyn DependencyCheck) -> DependencyHealth {
        let start = Instant::now();

        match dependency.check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(dependency = name, response_time_ms = elapsed, "Health check passed");
                DependencyHealth::reachable(elapsed)
            }
            Err(e) => {
                warn!(dependency = name, error = %e, "Health check failed");
                DependencyHealth::unreachable(e.to_string())
            }
        }
    }
}
