//! Template resolution and run assembly.
//!
//! Resolution turns a template name into its layer chain, root first, and
//! folds the per-layer configuration into one. Environment and volumes
//! accumulate down the chain; entrypoint, cmd and working directory are
//! taken from the most specific layer that sets them.

use std::collections::HashSet;
use std::path::PathBuf;

use sandbox_image_core::error::{Result, TemplateError};
use sandbox_image_core::{DiskFormat, EnvVar, VolumeSpec};
use serde::Serialize;

use crate::id::LayerId;
use crate::index::NameIndex;
use crate::layer::{Layer, LayerConfig};
use crate::layer_store::LayerStore;
use crate::source::{entry_command, SourceRegistry};

/// Caller-supplied overrides applied after the template configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Appended to the template's declared volumes
    pub volumes: Vec<VolumeSpec>,
    /// Appended to the template's environment
    pub env: Vec<EnvVar>,
    /// Network parameters handed to the launcher as given
    pub network: Vec<String>,
    /// Replaces the template's command entirely
    pub command: Option<Vec<String>>,
    /// Format of the materialized disk
    pub format: DiskFormat,
}

/// A template name resolved to its layers and merged configuration.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub name: String,
    /// Layers from root to topmost
    pub chain: Vec<Layer>,
    /// Configuration merged from root to topmost
    pub config: LayerConfig,
    /// Default command from the source that created the template
    pub command: Vec<String>,
}

impl ResolvedTemplate {
    pub fn top(&self) -> Option<&Layer> {
        self.chain.last()
    }

    /// Total payload size of the chain in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.chain.iter().map(|l| l.meta.size_bytes).sum()
    }
}

/// A disk attached to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskMount {
    pub source: PathBuf,
    pub target: String,
    pub format: DiskFormat,
}

/// Everything a launcher needs to start a sandbox from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    /// Materialized disk artifact
    pub disk: PathBuf,
    pub format: DiskFormat,
    pub mounts: Vec<DiskMount>,
    pub volumes: Vec<VolumeSpec>,
    pub env: Vec<EnvVar>,
    pub network: Vec<String>,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl LaunchSpec {
    /// Assemble the launch parameters for `template` with its disk at `disk`.
    ///
    /// Caller volumes and environment are appended after the template's own,
    /// duplicates included; a caller command replaces the template command.
    pub fn assemble(template: &ResolvedTemplate, options: RunOptions, disk: PathBuf) -> Self {
        let format = options.format;
        let mut volumes: Vec<VolumeSpec> = template
            .config
            .volumes
            .iter()
            .map(VolumeSpec::declared)
            .collect();
        volumes.extend(options.volumes);

        let mut env = template.config.env.clone();
        env.extend(options.env);

        let command = options
            .command
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| template.command.clone());

        Self {
            mounts: vec![DiskMount {
                source: disk.clone(),
                target: "/".to_string(),
                format,
            }],
            disk,
            format,
            volumes,
            env,
            network: options.network,
            command,
            working_dir: template.config.working_dir.clone(),
        }
    }

    /// Environment with duplicate keys collapsed, the last value winning.
    pub fn effective_env(&self) -> Vec<EnvVar> {
        let mut merged: Vec<EnvVar> = Vec::new();
        for var in &self.env {
            merge_env(&mut merged, var);
        }
        merged
    }
}

/// Resolves template names against a layer store.
pub struct Resolver<'a> {
    layers: &'a LayerStore,
    index: &'a NameIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(layers: &'a LayerStore, index: &'a NameIndex) -> Self {
        Self { layers, index }
    }

    /// Resolve `name` into its chain, merged configuration and default command.
    ///
    /// The default command comes from the source recorded on the topmost
    /// layer; unknown sources fall back to entrypoint followed by cmd.
    pub fn resolve(&self, name: &str, sources: &SourceRegistry) -> Result<ResolvedTemplate> {
        let top = self.index.resolve(name)?;
        let chain = self.chain(&top)?;
        let config = merge_configs(&chain);

        let source_name = chain
            .last()
            .map(|l| l.meta.source.as_str())
            .unwrap_or_default();
        let command = if sources.contains(source_name) {
            sources.get(source_name)?.resolve_run_command(&config)
        } else {
            tracing::debug!(source = %source_name, "Source not registered, using image command");
            entry_command(&config)
        };

        tracing::debug!(name = %name, top = %top, depth = chain.len(), "Resolved template");

        Ok(ResolvedTemplate {
            name: name.to_string(),
            chain,
            config,
            command,
        })
    }

    /// Layers from the root to `top`.
    ///
    /// A parent that does not exist or a cycle means the store is corrupt.
    pub fn chain(&self, top: &LayerId) -> Result<Vec<Layer>> {
        let mut chain: Vec<Layer> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(top.clone());

        while let Some(id) = current.take() {
            if !seen.insert(id.clone()) {
                return Err(TemplateError::corrupt(
                    id.as_str(),
                    format!("Parent chain of {} loops back to this layer", top),
                ));
            }

            let layer = match self.layers.get(&id) {
                Ok(layer) => layer,
                Err(TemplateError::LayerNotFound(_)) => {
                    let message = match chain.last() {
                        Some(child) => format!("Missing parent of layer {}", child.id()),
                        None => "Named layer is missing".to_string(),
                    };
                    return Err(TemplateError::corrupt(id.as_str(), message));
                }
                Err(e) => return Err(e),
            };

            current = layer.meta.parent.clone();
            chain.push(layer);
        }

        chain.reverse();
        Ok(chain)
    }
}

/// Merge layer configurations from root to topmost.
pub fn merge_configs(chain: &[Layer]) -> LayerConfig {
    let mut merged = LayerConfig::default();

    for layer in chain {
        let config = layer.config();

        for var in &config.env {
            merge_env(&mut merged.env, var);
        }
        for volume in &config.volumes {
            if !merged.volumes.contains(volume) {
                merged.volumes.push(volume.clone());
            }
        }
        if !config.entrypoint.is_empty() {
            merged.entrypoint = config.entrypoint.clone();
        }
        if !config.cmd.is_empty() {
            merged.cmd = config.cmd.clone();
        }
        if config.working_dir.is_some() {
            merged.working_dir = config.working_dir.clone();
        }
    }

    merged
}

/// Set `var` in `env`, keeping the position of an existing key.
fn merge_env(env: &mut Vec<EnvVar>, var: &EnvVar) {
    match env.iter_mut().find(|e| e.key == var.key) {
        Some(existing) => existing.value = var.value.clone(),
        None => env.push(var.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerMeta;
    use tempfile::TempDir;

    fn add(
        layers: &LayerStore,
        parent: Option<&LayerId>,
        digest: &str,
        config: LayerConfig,
    ) -> LayerId {
        layers
            .put(
                LayerMeta {
                    id: LayerId::chain(parent, digest),
                    parent: parent.cloned(),
                    digest: digest.to_string(),
                    payload: None,
                    size_bytes: 0,
                    source: "docker".to_string(),
                    created_at: chrono::Utc::now(),
                    config,
                },
                None,
            )
            .unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> Vec<EnvVar> {
        pairs.iter().map(|(k, v)| EnvVar::new(*k, *v)).collect()
    }

    #[test]
    fn test_merge_env_and_command() {
        let tmp = TempDir::new().unwrap();
        let layers = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());

        let root = add(
            &layers,
            None,
            "sha256:root",
            LayerConfig {
                env: env(&[("A", "1"), ("PATH", "/bin")]),
                volumes: vec!["/data".to_string()],
                cmd: vec!["/bin/sh".to_string()],
                ..Default::default()
            },
        );
        let top = add(
            &layers,
            Some(&root),
            "sha256:top",
            LayerConfig {
                env: env(&[("A", "2"), ("B", "3")]),
                volumes: vec!["/data".to_string(), "/cache".to_string()],
                cmd: vec!["nginx".to_string()],
                ..Default::default()
            },
        );
        index.bind("web", &top).unwrap();

        let resolved = Resolver::new(&layers, &index)
            .resolve("web", &SourceRegistry::with_defaults())
            .unwrap();
        assert_eq!(resolved.chain.len(), 2);
        assert_eq!(resolved.chain[0].id(), &root);
        assert_eq!(resolved.config.env, env(&[("A", "2"), ("PATH", "/bin"), ("B", "3")]));
        assert_eq!(resolved.config.volumes, vec!["/data", "/cache"]);
        assert_eq!(resolved.command, vec!["nginx"]);
    }

    #[test]
    fn test_resolve_uses_source_fallback_command() {
        let tmp = TempDir::new().unwrap();
        let layers = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let id = add(&layers, None, "sha256:a", LayerConfig::default());
        index.bind("bare", &id).unwrap();

        let resolver = Resolver::new(&layers, &index);
        let resolved = resolver
            .resolve("bare", &SourceRegistry::with_defaults())
            .unwrap();
        assert_eq!(resolved.command, vec!["/bin/sh"]);

        // Without the source registered the image command is used as is
        let resolved = resolver.resolve("bare", &SourceRegistry::new()).unwrap();
        assert!(resolved.command.is_empty());
    }

    #[test]
    fn test_resolve_unknown_name() {
        let tmp = TempDir::new().unwrap();
        let layers = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let err = Resolver::new(&layers, &index)
            .resolve("nope", &SourceRegistry::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::TemplateNotFound(_)));
    }

    #[test]
    fn test_chain_detects_cycle() {
        let tmp = TempDir::new().unwrap();
        let layers = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let a = add(&layers, None, "sha256:a", LayerConfig::default());
        let b = add(&layers, Some(&a), "sha256:b", LayerConfig::default());

        // Point a back at b
        let mut meta = layers.get(&a).unwrap().meta;
        meta.parent = Some(b.clone());
        std::fs::write(
            layers.layer_dir(&a).join(crate::layer::TEMPLATE_FILE),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        let err = Resolver::new(&layers, &index).chain(&b).unwrap_err();
        assert!(matches!(err, TemplateError::StoreCorrupt { .. }));
    }

    #[test]
    fn test_launch_spec_overrides() {
        let template = ResolvedTemplate {
            name: "web".to_string(),
            chain: Vec::new(),
            config: LayerConfig {
                env: env(&[("A", "2"), ("B", "3")]),
                volumes: vec!["/data".to_string()],
                working_dir: Some("/srv".to_string()),
                ..Default::default()
            },
            command: vec!["nginx".to_string()],
        };
        let options = RunOptions {
            volumes: vec![VolumeSpec::parse("/host:/data:ro").unwrap()],
            env: env(&[("A", "9")]),
            network: vec!["dhcp".to_string()],
            command: Some(vec!["/bin/bash".to_string()]),
            format: DiskFormat::Dir,
        };

        let spec = LaunchSpec::assemble(&template, options, PathBuf::from("/disk"));
        assert_eq!(spec.env, env(&[("A", "2"), ("B", "3"), ("A", "9")]));
        assert_eq!(spec.effective_env(), env(&[("A", "9"), ("B", "3")]));
        assert_eq!(spec.volumes.len(), 2);
        assert_eq!(spec.volumes[0], VolumeSpec::declared("/data"));
        assert_eq!(spec.command, vec!["/bin/bash"]);
        assert_eq!(spec.network, vec!["dhcp"]);
        assert_eq!(spec.mounts[0].target, "/");
        assert_eq!(spec.working_dir.as_deref(), Some("/srv"));
    }

    #[test]
    fn test_launch_spec_keeps_template_command_without_override() {
        let template = ResolvedTemplate {
            name: "web".to_string(),
            chain: Vec::new(),
            config: LayerConfig::default(),
            command: vec!["nginx".to_string()],
        };
        let spec = LaunchSpec::assemble(&template, RunOptions::default(), PathBuf::from("/disk"));
        assert_eq!(spec.command, vec!["nginx"]);
        assert!(spec.network.is_empty());
    }
}
