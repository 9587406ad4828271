//! Service-discovery registration contract.
//!
//! The framework does not talk to any discovery system itself. A discovery
//! module announces [`ServiceRegistration`] from its ready hook (the listener
//! address exists by then) and withdraws it from its shutdown hook, through
//! whatever [`DiscoveryBackend`] it constructed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::config::ConfigService;
use crate::health;

/// Payload announced to a discovery system once the listener is bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique per process instance.
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub health_check_path: String,
}

impl ServiceRegistration {
    /// Assemble the announcement from config and the bound address.
    ///
    /// Config keys: `service.name` (default `ensemble-service`) and
    /// `service.health_path` (default the built-in readiness path).
    pub fn from_config(config: &ConfigService, addr: SocketAddr) -> Self {
        let service_name = config.get_or("service.name", "ensemble-service");
        Self {
            service_id: format!("{service_name}-{}", Uuid::new_v4()),
            service_name,
            address: addr.to_string(),
            health_check_path: config.get_or("service.health_path", health::READINESS_PATH),
        }
    }
}

/// The seam a concrete discovery client (Consul, etcd, ...) implements.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    async fn register(&self, registration: &ServiceRegistration) -> anyhow::Result<()>;
    async fn deregister(&self, registration: &ServiceRegistration) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults() {
        let config = ConfigService::empty();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let registration = ServiceRegistration::from_config(&config, addr);

        assert_eq!(registration.service_name, "ensemble-service");
        assert_eq!(registration.address, "127.0.0.1:8080");
        assert_eq!(registration.health_check_path, health::READINESS_PATH);
        assert!(registration.service_id.starts_with("ensemble-service-"));
    }

    #[test]
    fn test_from_config_overrides() {
        let config = ConfigService::empty();
        config.set("service.name", "identity");
        config.set("service.health_path", "/status");
        let addr: SocketAddr = "10.0.0.5:9200".parse().unwrap();
        let registration = ServiceRegistration::from_config(&config, addr);

        assert_eq!(registration.service_name, "identity");
        assert_eq!(registration.health_check_path, "/status");
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let config = ConfigService::empty();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let a = ServiceRegistration::from_config(&config, addr);
        let b = ServiceRegistration::from_config(&config, addr);
        assert_ne!(a.service_id, b.service_id);
    }
}
