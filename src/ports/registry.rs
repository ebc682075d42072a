//! Ports towards the external service registry.
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("registry returned status {status} for {url}")]
    Status { url: String, status: u16 },

    /// The registry does not know the instance (heartbeat after eviction).
    #[error("instance {instance_id} of {app} is not registered")]
    UnknownInstance { app: String, instance_id: String },

    #[error("failed to decode registry response: {0}")]
    Decode(String),
}

/// Health status an instance reports to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UP" => Self::Up,
            "DOWN" => Self::Down,
            "STARTING" => Self::Starting,
            "OUT_OF_SERVICE" => Self::OutOfService,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredInstance {
    pub instance_id: String,
    pub app: String,
    pub host_name: String,
    pub ip_addr: String,
    pub port: u16,
    pub status: InstanceStatus,
}

impl RegisteredInstance {
    /// Base URL the gateway forwards to, built from the advertised IP and port.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip_addr, self.port)
    }

    pub fn is_up(&self) -> bool {
        self.status == InstanceStatus::Up
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredApplication {
    pub name: String,
    pub instances: Vec<RegisteredInstance>,
}

/// Read side: list every application the registry knows.
#[async_trait]
pub trait RegistrySource: Send + Sync + 'static {
    async fn fetch_applications(&self) -> Result<Vec<RegisteredApplication>, RegistryError>;
}

/// Write side: used when the gateway advertises itself.
#[async_trait]
pub trait InstanceRegistrar: Send + Sync + 'static {
    async fn register(&self, instance: &RegisteredInstance) -> Result<(), RegistryError>;

    async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), RegistryError>;

    async fn deregister(&self, app: &str, instance_id: &str) -> Result<(), RegistryError>;
}
