//! Advertising the gateway itself in the service registry.
use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::{
    config::models::SelfRegistrationConfig,
    core::registry::normalize_service_name,
    ports::registry::{InstanceRegistrar, InstanceStatus, RegisteredInstance, RegistryError},
    utils::ShutdownToken,
};

/// Keeps one instance registered: registers, heartbeats on an interval, re-registers when the
/// registry has evicted it, and deregisters on shutdown.
pub struct SelfRegistration {
    registrar: Arc<dyn InstanceRegistrar>,
    instance: RegisteredInstance,
    heartbeat_interval: Duration,
}

impl SelfRegistration {
    pub fn new(
        registrar: Arc<dyn InstanceRegistrar>,
        instance: RegisteredInstance,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            registrar,
            instance,
            heartbeat_interval,
        }
    }

    /// Describe this process from its registration settings and listen port.
    pub fn from_config(
        registrar: Arc<dyn InstanceRegistrar>,
        config: &SelfRegistrationConfig,
        listen_port: u16,
    ) -> Result<Self, String> {
        let app = normalize_service_name(&config.app_name);
        let port = config.port.unwrap_or(listen_port);
        let instance = RegisteredInstance {
            instance_id: format!("{app}:{}:{port}", config.instance_ip),
            app,
            host_name: config.instance_ip.clone(),
            ip_addr: config.instance_ip.clone(),
            port,
            status: InstanceStatus::Up,
        };
        Ok(Self::new(registrar, instance, config.heartbeat_interval()?))
    }

    pub fn instance(&self) -> &RegisteredInstance {
        &self.instance
    }

    async fn register(&self) -> bool {
        match self.registrar.register(&self.instance).await {
            Ok(()) => {
                tracing::info!(
                    app = %self.instance.app,
                    instance = %self.instance.instance_id,
                    "Registered with service registry"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Service registry registration failed");
                false
            }
        }
    }

    async fn heartbeat(&self) -> Result<(), RegistryError> {
        self.registrar
            .heartbeat(&self.instance.app, &self.instance.instance_id)
            .await
    }

    pub async fn run(&self, mut shutdown: ShutdownToken) {
        let mut registered = false;
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !registered {
                        registered = self.register().await;
                        continue;
                    }
                    match self.heartbeat().await {
                        Ok(()) => tracing::trace!("Registry heartbeat sent"),
                        Err(RegistryError::UnknownInstance { .. }) => {
                            tracing::warn!("Registry no longer knows this instance, re-registering");
                            registered = self.register().await;
                        }
                        Err(e) => tracing::warn!(error = %e, "Registry heartbeat failed"),
                    }
                }
                _ = shutdown.wait_for_shutdown() => break,
            }
        }

        if registered {
            match self
                .registrar
                .deregister(&self.instance.app, &self.instance.instance_id)
                .await
            {
                Ok(()) => tracing::info!("Deregistered from service registry"),
                Err(e) => tracing::warn!(error = %e, "Service registry deregistration failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::utils::{GracefulShutdown, ShutdownReason};

    #[derive(Default)]
    struct RecordingRegistrar {
        calls: Mutex<Vec<String>>,
        evict_next_heartbeat: Mutex<bool>,
    }

    impl RecordingRegistrar {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InstanceRegistrar for RecordingRegistrar {
        async fn register(&self, instance: &RegisteredInstance) -> Result<(), RegistryError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("register {}", instance.instance_id));
            Ok(())
        }

        async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), RegistryError> {
            self.calls.lock().unwrap().push("heartbeat".to_string());
            let mut evict = self.evict_next_heartbeat.lock().unwrap();
            if *evict {
                *evict = false;
                return Err(RegistryError::UnknownInstance {
                    app: app.to_string(),
                    instance_id: instance_id.to_string(),
                });
            }
            Ok(())
        }

        async fn deregister(&self, _app: &str, instance_id: &str) -> Result<(), RegistryError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("deregister {instance_id}"));
            Ok(())
        }
    }

    fn config() -> SelfRegistrationConfig {
        SelfRegistrationConfig {
            app_name: "api-gateway".to_string(),
            instance_ip: "10.0.0.5".to_string(),
            port: None,
            heartbeat_interval: "30s".to_string(),
        }
    }

    #[test]
    fn test_instance_identity() {
        let registration =
            SelfRegistration::from_config(Arc::new(RecordingRegistrar::default()), &config(), 8080)
                .unwrap();
        let instance = registration.instance();
        assert_eq!(instance.app, "API-GATEWAY");
        assert_eq!(instance.instance_id, "API-GATEWAY:10.0.0.5:8080");
        assert_eq!(instance.base_url(), "http://10.0.0.5:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_heartbeat_reregister_and_deregister() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let registration = Arc::new(
            SelfRegistration::from_config(registrar.clone(), &config(), 8080).unwrap(),
        );
        let shutdown = GracefulShutdown::new();

        let task = {
            let registration = registration.clone();
            let token = shutdown.shutdown_token();
            tokio::spawn(async move { registration.run(token).await })
        };

        // Register immediately, heartbeat after one interval.
        tokio::time::sleep(Duration::from_secs(31)).await;
        *registrar.evict_next_heartbeat.lock().unwrap() = true;
        tokio::time::sleep(Duration::from_secs(30)).await;

        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        task.await.unwrap();

        assert_eq!(
            registrar.calls(),
            vec![
                "register API-GATEWAY:10.0.0.5:8080",
                "heartbeat",
                "heartbeat",
                "register API-GATEWAY:10.0.0.5:8080",
                "deregister API-GATEWAY:10.0.0.5:8080",
            ]
        );
    }
}
