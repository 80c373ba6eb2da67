//! Template sources.
//!
//! A source turns a reference (an image name, a directory) into the ordered
//! list of layers that make up a template and downloads their payloads on
//! request. Sources are registered by name in a [`SourceRegistry`] at
//! startup and selected by that name at run time.

mod oci;
mod oci_layout;
pub mod reference;
mod registry;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sandbox_image_core::error::{Result, TemplateError};

use crate::layer::{LayerConfig, PayloadFormat};

pub use oci_layout::OciLayoutSource;
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistrySource};

/// Name of the source used when none is given.
pub const DEFAULT_SOURCE: &str = "docker";

/// What to fetch and how to authenticate.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Source-specific reference (image reference, layout directory, ...)
    pub reference: String,
    /// Registry overriding the one in the reference
    pub registry: Option<String>,
    /// Registry credentials
    pub auth: RegistryAuth,
}

impl FetchRequest {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            registry: None,
            auth: RegistryAuth::anonymous(),
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }
}

/// One layer of a template as announced by a source, root first.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    /// Content digest ("sha256:..."); verified after download when it is a sha256 digest
    pub digest: String,
    /// Payload archive format, `None` for a configuration-only layer
    pub payload: Option<PayloadFormat>,
    /// Advertised payload size in bytes
    pub size: Option<u64>,
    /// Runtime configuration declared by this layer
    pub config: LayerConfig,
    /// Source-private locator used by `fetch_payload`
    pub locator: String,
}

/// Capability interface every template source implements.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Registry key of this source.
    fn name(&self) -> &str;

    /// Describe the layers of the requested template, root first.
    async fn fetch_template(&self, request: &FetchRequest) -> Result<Vec<LayerDescriptor>>;

    /// Download the payload of `layer` into the file `dest`.
    async fn fetch_payload(
        &self,
        request: &FetchRequest,
        layer: &LayerDescriptor,
        dest: &Path,
    ) -> Result<()>;

    /// Default command for a template with the merged configuration `config`.
    fn resolve_run_command(&self, config: &LayerConfig) -> Vec<String> {
        entry_command(config)
    }
}

/// Entrypoint followed by cmd.
pub fn entry_command(config: &LayerConfig) -> Vec<String> {
    config
        .entrypoint
        .iter()
        .chain(config.cmd.iter())
        .cloned()
        .collect()
}

type SourceFactory = Box<dyn Fn() -> Arc<dyn TemplateSource> + Send + Sync>;

/// Named source factories.
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in sources: `docker` and `oci-layout`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(registry::SOURCE_NAME, || Arc::new(RegistrySource::new()));
        registry.register(oci_layout::SOURCE_NAME, || Arc::new(OciLayoutSource::new()));
        registry
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn TemplateSource> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(source = %name, "Registering template source");
        self.factories.insert(name, Box::new(factory));
    }

    /// Instantiate the source registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TemplateSource>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                TemplateError::ConfigError(format!(
                    "Unknown source '{}' (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_image_core::EnvVar;

    struct NullSource;

    #[async_trait]
    impl TemplateSource for NullSource {
        fn name(&self) -> &str {
            "null"
        }

        async fn fetch_template(&self, request: &FetchRequest) -> Result<Vec<LayerDescriptor>> {
            Err(TemplateError::source_unavailable("null", &request.reference))
        }

        async fn fetch_payload(
            &self,
            _request: &FetchRequest,
            _layer: &LayerDescriptor,
            _dest: &Path,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_defaults() {
        let registry = SourceRegistry::with_defaults();
        assert!(registry.contains("docker"));
        assert!(registry.contains("oci-layout"));
        assert_eq!(registry.get("docker").unwrap().name(), "docker");
        assert_eq!(registry.get("oci-layout").unwrap().name(), "oci-layout");
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = SourceRegistry::new();
        registry.register("null", || Arc::new(NullSource));
        assert_eq!(registry.get("null").unwrap().name(), "null");
        assert_eq!(registry.names(), vec!["null"]);
    }

    #[test]
    fn test_registry_unknown_source() {
        let registry = SourceRegistry::with_defaults();
        let err = registry.get("virt-builder").err().unwrap();
        assert!(matches!(err, TemplateError::ConfigError(_)));
        assert!(err.to_string().contains("docker"));
    }

    #[test]
    fn test_default_run_command_joins_entrypoint_and_cmd() {
        let config = LayerConfig {
            env: vec![EnvVar::new("A", "1")],
            entrypoint: vec!["/docker-entrypoint.sh".to_string()],
            cmd: vec!["nginx".to_string(), "-g".to_string()],
            ..Default::default()
        };
        assert_eq!(
            NullSource.resolve_run_command(&config),
            vec!["/docker-entrypoint.sh", "nginx", "-g"]
        );
    }

    #[test]
    fn test_fetch_request_builder() {
        let request = FetchRequest::new("fedora")
            .with_registry("registry.example.com")
            .with_auth(RegistryAuth::basic("user", "secret"));
        assert_eq!(request.registry.as_deref(), Some("registry.example.com"));
        assert!(request.auth.is_authenticated());
    }
}
