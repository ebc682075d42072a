//! Eureka REST adapter for the registry ports.
//!
//! Endpoints used, relative to the configured base URL (e.g. `http://eureka:8761/eureka`):
//!
//! | operation    | request                          |
//! |--------------|----------------------------------|
//! | fetch        | `GET    /apps`                   |
//! | register     | `POST   /apps/{APP}`             |
//! | heartbeat    | `PUT    /apps/{APP}/{instance}`  |
//! | deregister   | `DELETE /apps/{APP}/{instance}`  |
//!
//! Eureka's JSON collapses single-element arrays into plain objects and may encode the port as
//! a string, so the wire types below accept both shapes.
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::json;

use crate::ports::registry::{
    InstanceRegistrar, InstanceStatus, RegisteredApplication, RegisteredInstance, RegistryError,
    RegistrySource,
};

const DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

pub struct EurekaClient {
    base_url: String,
    client: Client,
}

impl EurekaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build registry HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn instance_url(&self, app: &str, instance_id: &str) -> String {
        format!(
            "{}/apps/{}/{}",
            self.base_url,
            app.to_ascii_uppercase(),
            instance_id
        )
    }

    fn transport_error(url: &str, e: reqwest::Error) -> RegistryError {
        RegistryError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }

    fn expect_success(url: &str, status: StatusCode) -> Result<(), RegistryError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(RegistryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl RegistrySource for EurekaClient {
    async fn fetch_applications(&self) -> Result<Vec<RegisteredApplication>, RegistryError> {
        let url = format!("{}/apps", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        Self::expect_success(&url, response.status())?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        parse_applications(&body)
    }
}

#[async_trait]
impl InstanceRegistrar for EurekaClient {
    async fn register(&self, instance: &RegisteredInstance) -> Result<(), RegistryError> {
        let app = instance.app.to_ascii_uppercase();
        let url = format!("{}/apps/{}", self.base_url, app);
        let base = format!("http://{}:{}", instance.ip_addr, instance.port);

        let body = json!({
            "instance": {
                "instanceId": instance.instance_id,
                "hostName": instance.host_name,
                "app": app,
                "ipAddr": instance.ip_addr,
                "vipAddress": instance.app,
                "secureVipAddress": instance.app,
                "status": instance.status.as_str(),
                "port": { "$": instance.port, "@enabled": "true" },
                "homePageUrl": format!("{base}/"),
                "statusPageUrl": format!("{base}/health"),
                "healthCheckUrl": format!("{base}/health"),
                "dataCenterInfo": { "@class": DATA_CENTER_CLASS, "name": "MyOwn" },
                "countryId": 1,
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        Self::expect_success(&url, response.status())
    }

    async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), RegistryError> {
        let url = self.instance_url(app, instance_id);
        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::UnknownInstance {
                app: app.to_string(),
                instance_id: instance_id.to_string(),
            });
        }
        Self::expect_success(&url, response.status())
    }

    async fn deregister(&self, app: &str, instance_id: &str) -> Result<(), RegistryError> {
        let url = self.instance_url(app, instance_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        Self::expect_success(&url, response.status())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortNumber {
    Number(u16),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePort {
    Wrapped {
        #[serde(rename = "$")]
        value: PortNumber,
    },
    Bare(PortNumber),
}

impl WirePort {
    fn value(&self) -> Option<u16> {
        let number = match self {
            WirePort::Wrapped { value } | WirePort::Bare(value) => value,
        };
        match number {
            PortNumber::Number(port) => Some(*port),
            PortNumber::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppsEnvelope {
    applications: AppsBody,
}

#[derive(Debug, Deserialize)]
struct AppsBody {
    #[serde(default)]
    application: OneOrMany<WireApplication>,
}

#[derive(Debug, Deserialize)]
struct WireApplication {
    name: String,
    #[serde(default)]
    instance: OneOrMany<WireInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstance {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    host_name: String,
    #[serde(default)]
    app: Option<String>,
    ip_addr: String,
    #[serde(default)]
    status: String,
    port: WirePort,
}

/// Decode a `GET /apps` JSON body. Instances with an unusable port are skipped.
pub fn parse_applications(body: &[u8]) -> Result<Vec<RegisteredApplication>, RegistryError> {
    let envelope: AppsEnvelope =
        serde_json::from_slice(body).map_err(|e| RegistryError::Decode(e.to_string()))?;

    let applications = envelope
        .applications
        .application
        .into_vec()
        .into_iter()
        .map(|app| {
            let instances = app
                .instance
                .into_vec()
                .into_iter()
                .filter_map(|wire| {
                    let Some(port) = wire.port.value() else {
                        tracing::warn!(
                            app = %app.name,
                            ip = %wire.ip_addr,
                            "Skipping registry instance with invalid port"
                        );
                        return None;
                    };
                    Some(RegisteredInstance {
                        instance_id: wire
                            .instance_id
                            .unwrap_or_else(|| format!("{}:{}", wire.ip_addr, port)),
                        app: wire.app.unwrap_or_else(|| app.name.clone()),
                        host_name: wire.host_name,
                        ip_addr: wire.ip_addr,
                        port,
                        status: InstanceStatus::parse(&wire.status),
                    })
                })
                .collect();
            RegisteredApplication {
                name: app.name,
                instances,
            }
        })
        .collect();

    Ok(applications)
}
