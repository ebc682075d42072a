pub mod http_client;
pub mod registry;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use registry::{
    InstanceRegistrar, InstanceStatus, RegisteredApplication, RegisteredInstance, RegistryError,
    RegistrySource,
};
