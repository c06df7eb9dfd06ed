use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail, ensure};
use quasar_core::backend::{
    BackendRegistry, LocalSimulator, QuantumBackend, RemoteBackend, RemoteConfig,
    SimulatorConfig,
};
use quasar_core::{EstimationConfig, Estimator, OrchestratorConfig};
use quasar_model::BackendId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

const PATH_VAR: &str = "QUASAR_CONFIG_PATH";
const JSON_VAR: &str = "QUASAR_CONFIG_JSON";

const DEFAULT_CANDIDATES: &[&str] = &[
    "quasar.toml",
    "quasar.json",
    "config/quasar.toml",
    "config/quasar.json",
];

/// Where the loaded settings came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SettingsSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Remote backend settings. The API token may be given inline or through
/// the environment variable named by `api_token_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(flatten)]
    pub config: RemoteConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSettings {
    Simulator(SimulatorConfig),
    Remote(RemoteSettings),
}

impl BackendSettings {
    pub fn id(&self) -> &str {
        match self {
            BackendSettings::Simulator(config) => &config.id,
            BackendSettings::Remote(remote) => &remote.config.id,
        }
    }

    fn max_concurrent_jobs(&self) -> usize {
        match self {
            BackendSettings::Simulator(config) => config.max_concurrent_jobs,
            BackendSettings::Remote(remote) => remote.config.capability.max_concurrent_jobs,
        }
    }
}

/// Everything a host needs to stand up an orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub orchestrator: OrchestratorConfig,
    pub estimation: EstimationConfig,
    pub backends: Vec<BackendSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            estimation: EstimationConfig::default(),
            backends: vec![BackendSettings::Simulator(SimulatorConfig::default())],
        }
    }
}

impl EngineSettings {
    /// Loads settings using the process environment and working directory.
    /// Evaluation order:
    /// 1) `$QUASAR_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$QUASAR_CONFIG_JSON` (inline JSON),
    /// 3) the first default file that exists,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, SettingsSource)> {
        Self::load_with(|name| env::var(name).ok(), Path::new("."))
    }

    /// [`EngineSettings::load_from_env`] with an explicit variable lookup and
    /// base directory for the default file candidates.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> anyhow::Result<(Self, SettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let (mut settings, source) = if let Some(path) = set(PATH_VAR) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, SettingsSource::EnvPath(path))
        } else if let Some(raw) = set(JSON_VAR) {
            let parsed =
                Self::parse_json(&raw).with_context(|| format!("failed to parse {JSON_VAR}"))?;
            (parsed, SettingsSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, SettingsSource::File(path))
        } else {
            (Self::default(), SettingsSource::Default)
        };

        settings.resolve_secrets(&lookup)?;
        settings.validate()?;
        info!(source = ?source, backends = settings.backends.len(), "engine settings loaded");
        Ok((settings, source))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read engine settings from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid engine settings {}", path.display())),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid engine settings {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Tries TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse engine settings {origin}: \
                     toml error: {toml_err}; json error: {json_err}"
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid engine settings json: {err}"))
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_CANDIDATES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.is_file())
    }

    /// Fills remote API tokens from the variables named by `api_token_env`.
    /// An inline token takes precedence.
    pub fn resolve_secrets<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for backend in &mut self.backends {
            let BackendSettings::Remote(remote) = backend else {
                continue;
            };
            if remote.config.api_token.is_some() {
                continue;
            }
            let Some(name) = remote.api_token_env.as_deref() else {
                continue;
            };
            let token = lookup(name).filter(|value| !value.trim().is_empty()).ok_or_else(|| {
                anyhow!(
                    "backend `{}` reads its API token from ${name}, which is not set",
                    remote.config.id
                )
            })?;
            debug!(backend_id = %remote.config.id, variable = name, "resolved remote API token");
            remote.config.api_token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.orchestrator.worker_pool_size > 0,
            "orchestrator.worker_pool_size must be at least 1"
        );
        ensure!(!self.backends.is_empty(), "at least one backend must be configured");

        self.estimation
            .validate()
            .map_err(|err| anyhow!("estimation settings: {err}"))?;

        let mut ids = BTreeSet::new();
        for backend in &self.backends {
            let id = backend.id();
            BackendId::new(id).map_err(|err| anyhow!("backend id `{id}`: {err}"))?;
            ensure!(ids.insert(id), "backend `{id}` is configured twice");
            ensure!(
                backend.max_concurrent_jobs() > 0,
                "backend `{id}` must allow at least one concurrent job"
            );
            if let BackendSettings::Remote(remote) = backend {
                let url = Url::parse(&remote.config.endpoint).with_context(|| {
                    format!("backend `{id}` endpoint `{}`", remote.config.endpoint)
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    bail!("backend `{id}` endpoint must be an http(s) URL, got `{url}`");
                }
            }
        }

        if let Some(default) = &self.orchestrator.default_backend {
            ensure!(
                ids.contains(default.as_str()),
                "default_backend `{default}` names no configured backend"
            );
        }
        Ok(())
    }

    pub fn estimator(&self) -> anyhow::Result<Estimator> {
        Estimator::new(self.estimation.clone())
            .map_err(|err| anyhow!("estimation settings: {err}"))
    }

    /// Instantiates every configured backend behind its pool.
    pub fn build_backends(&self) -> anyhow::Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        for settings in &self.backends {
            let backend: Arc<dyn QuantumBackend> = match settings {
                BackendSettings::Simulator(config) => Arc::new(
                    LocalSimulator::new(config.clone())
                        .with_context(|| format!("simulator `{}`", config.id))?,
                ),
                BackendSettings::Remote(remote) => Arc::new(
                    RemoteBackend::new(remote.config.clone())
                        .with_context(|| format!("remote backend `{}`", remote.config.id))?,
                ),
            };
            registry
                .register(backend)
                .with_context(|| format!("backend `{}`", settings.id()))?;
        }
        if let Some(default) = &self.orchestrator.default_backend {
            let id = BackendId::new(default.as_str())
                .map_err(|err| anyhow!("default_backend `{default}`: {err}"))?;
            registry.set_default(id)?;
        }
        Ok(registry)
    }
}
