//! Configuration file loader for campaign-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::CampaignError;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".campaign-config.yaml";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Explicit config file; replaces the project config when set
    pub config_file: Option<PathBuf>,

    /// CLI overrides (highest priority)
    pub cli_overrides: Option<OrchestratorConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,

    /// Skip ~/.campaign-config.yaml
    pub skip_global: bool,
}

impl ConfigLoadOptions {
    pub fn for_project<P: Into<PathBuf>>(project_path: P) -> Self {
        Self {
            project_path: project_path.into(),
            env: env::vars().collect(),
            ..Default::default()
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "registry.domains.medium.com")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI overrides
    /// 2. Environment variables
    /// 3. Explicit config file, or project config (./.campaign-config.yaml)
    /// 4. Global config (~/.campaign-config.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<OrchestratorConfig, CampaignError> {
        let mut configs: Vec<OrchestratorConfig> = Vec::new();

        // 5. Default values (lowest priority)
        configs.push(OrchestratorConfig::default());

        // 4. Global config
        if !options.skip_global
            && let Some(global_config) = Self::load_global_config(&options.env).await?
        {
            configs.push(global_config);
        }

        // 3. Explicit or project config
        let file_config = match &options.config_file {
            Some(path) => Some(Self::load_config_file(path).await?.ok_or_else(|| {
                CampaignError::Config(format!("config file not found: {}", path.display()))
            })?),
            None => Self::load_config_file(&options.project_path.join(CONFIG_FILENAME)).await?,
        };
        if let Some(file_config) = file_config {
            configs.push(file_config);
        }

        // 2. Environment variables
        if let Some(env_config) = Self::load_env_config(&options.env)? {
            configs.push(env_config);
        }

        // 1. CLI overrides (highest priority)
        if let Some(cli_config) = options.cli_overrides {
            configs.push(cli_config);
        }

        let merged_config = Self::merge_configs(configs);
        let expanded_config = Self::expand_env_vars(merged_config, &options.env)?;

        debug!(
            max_concurrency = expanded_config.max_concurrency(),
            job_timeout_secs = expanded_config.job_timeout().as_secs(),
            "configuration loaded"
        );

        Ok(expanded_config)
    }

    /// Load global configuration from ~/.campaign-config.yaml
    async fn load_global_config(
        env: &HashMap<String, String>,
    ) -> Result<Option<OrchestratorConfig>, CampaignError> {
        let Some(home_dir) = env.get("HOME") else {
            return Ok(None);
        };
        let global_config_path = PathBuf::from(home_dir).join(CONFIG_FILENAME);

        Self::load_config_file(&global_config_path).await
    }

    /// Load a YAML or TOML file and the `extends` chain behind it
    ///
    /// Bases are merged first, so the file named last wins. A chain that
    /// revisits a file is rejected.
    pub async fn load_config_file(
        file_path: &Path,
    ) -> Result<Option<OrchestratorConfig>, CampaignError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(file_path.to_path_buf());

        while let Some(path) = next.take() {
            if !path.exists() {
                if chain.is_empty() {
                    return Ok(None);
                }
                warn!(path = %path.display(), "extended config file not found");
                break;
            }
            if !visited.insert(path.clone()) {
                return Err(CampaignError::Config(format!(
                    "extends cycle at {}",
                    path.display()
                )));
            }

            let content = fs::read_to_string(&path).await.map_err(|e| {
                CampaignError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            let config = Self::parse(&path, &content)?;

            next = config
                .extends
                .as_ref()
                .map(|base| path.parent().unwrap_or(Path::new(".")).join(base));
            chain.push(config);
        }

        chain.reverse();
        Ok(Some(Self::merge_configs(chain)))
    }

    fn parse(file_path: &Path, content: &str) -> Result<OrchestratorConfig, CampaignError> {
        let is_toml = file_path
            .extension()
            .map(|e| e == "toml")
            .unwrap_or(false);

        if is_toml {
            toml::from_str(content).map_err(|e| {
                CampaignError::Config(format!("Failed to parse TOML config: {}", e))
            })
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                CampaignError::Config(format!("Failed to parse YAML config: {}", e))
            })
        }
    }

    /// Load configuration from environment variables
    fn load_env_config(
        env: &HashMap<String, String>,
    ) -> Result<Option<OrchestratorConfig>, CampaignError> {
        let mut dispatcher = DispatcherConfig::default();
        let mut output = None;
        let mut has_changes = false;

        // CAMPAIGN_MAX_CONCURRENCY -> dispatcher.maxConcurrency
        if let Some(value) = env.get("CAMPAIGN_MAX_CONCURRENCY") {
            dispatcher.max_concurrency = Some(parse_env("CAMPAIGN_MAX_CONCURRENCY", value)?);
            has_changes = true;
        }

        // CAMPAIGN_JOB_TIMEOUT_SECS -> dispatcher.jobTimeoutSecs
        if let Some(value) = env.get("CAMPAIGN_JOB_TIMEOUT_SECS") {
            dispatcher.job_timeout_secs = Some(parse_env("CAMPAIGN_JOB_TIMEOUT_SECS", value)?);
            has_changes = true;
        }

        // CAMPAIGN_MAX_ATTEMPTS -> dispatcher.retry.maxAttempts
        if let Some(value) = env.get("CAMPAIGN_MAX_ATTEMPTS") {
            let mut retry = dispatcher.retry.take().unwrap_or_default();
            retry.max_attempts = parse_env("CAMPAIGN_MAX_ATTEMPTS", value)?;
            dispatcher.retry = Some(retry);
            has_changes = true;
        }

        // CAMPAIGN_LOG_DIR -> output.logDir
        if let Some(value) = env.get("CAMPAIGN_LOG_DIR") {
            output = Some(OutputConfig {
                log_dir: Some(value.clone()),
            });
            has_changes = true;
        }

        if !has_changes {
            return Ok(None);
        }

        Ok(Some(OrchestratorConfig {
            dispatcher: Some(dispatcher),
            output,
            credentials: None,
            ..Default::default()
        }))
    }

    /// Merge multiple configurations with priority
    fn merge_configs(configs: Vec<OrchestratorConfig>) -> OrchestratorConfig {
        let mut result = OrchestratorConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target
    fn merge_into(target: &mut OrchestratorConfig, source: OrchestratorConfig) {
        if !source.version.is_empty() {
            target.version = source.version;
        }

        if source.extends.is_some() {
            target.extends = source.extends;
        }

        // Dispatcher (field-wise)
        if let Some(source_dispatcher) = source.dispatcher {
            let target_dispatcher = target.dispatcher.get_or_insert_with(Default::default);
            if source_dispatcher.max_concurrency.is_some() {
                target_dispatcher.max_concurrency = source_dispatcher.max_concurrency;
            }
            if source_dispatcher.job_timeout_secs.is_some() {
                target_dispatcher.job_timeout_secs = source_dispatcher.job_timeout_secs;
            }
            if source_dispatcher.retry.is_some() {
                target_dispatcher.retry = source_dispatcher.retry;
            }
        }

        if source.relay.is_some() {
            target.relay = source.relay;
        }

        // Capabilities (by name)
        if let Some(source_capabilities) = source.capabilities {
            target
                .capabilities
                .get_or_insert_with(HashMap::new)
                .extend(source_capabilities);
        }

        // Registry tables (by key)
        if let Some(source_registry) = source.registry {
            let target_registry = target.registry.get_or_insert_with(Default::default);
            target_registry.domains.extend(source_registry.domains);
            target_registry.categories.extend(source_registry.categories);
        }

        if let Some(source_credentials) = source.credentials {
            let target_credentials = target.credentials.get_or_insert_with(Default::default);
            if let Some(fallback) = source_credentials.env_fallback {
                target_credentials
                    .env_fallback
                    .get_or_insert_with(HashMap::new)
                    .extend(fallback);
            }
            if source_credentials.env_var_expansion.is_some() {
                target_credentials.env_var_expansion = source_credentials.env_var_expansion;
            }
        }

        if source.output.is_some() {
            target.output = source.output;
        }
    }

    /// Expand `${VAR}` references in capability endpoints, headers and the log dir
    fn expand_env_vars(
        mut config: OrchestratorConfig,
        env: &HashMap<String, String>,
    ) -> Result<OrchestratorConfig, CampaignError> {
        let settings = config
            .credentials
            .as_ref()
            .and_then(|c| c.env_var_expansion.clone());
        if settings.as_ref().and_then(|s| s.enabled) == Some(false) {
            return Ok(config);
        }
        let expander = EnvExpander::new(env, settings.as_ref())?;

        for capability in config.capabilities.iter_mut().flat_map(|c| c.values_mut()) {
            if let Some(endpoint) = &mut capability.endpoint {
                *endpoint = expander.expand(endpoint);
            }
            for value in capability.headers.iter_mut().flat_map(|h| h.values_mut()) {
                *value = expander.expand(value);
            }
        }

        if let Some(log_dir) = config.output.as_mut().and_then(|o| o.log_dir.as_mut()) {
            *log_dir = expander.expand(log_dir);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(config: &OrchestratorConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Check version (required)
        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            });
        }

        // 2. Dispatcher limits
        if config.max_concurrency() == 0 {
            errors.push(ConfigValidationError {
                field: "dispatcher.maxConcurrency".to_string(),
                message: "maxConcurrency must be at least 1".to_string(),
            });
        }
        if config.job_timeout().is_zero() {
            errors.push(ConfigValidationError {
                field: "dispatcher.jobTimeoutSecs".to_string(),
                message: "jobTimeoutSecs must be at least 1".to_string(),
            });
        }
        let retry = config.retry_policy();
        if retry.max_attempts == 0 {
            errors.push(ConfigValidationError {
                field: "dispatcher.retry.maxAttempts".to_string(),
                message: "maxAttempts must be at least 1".to_string(),
            });
        }
        if retry.backoff_multiplier < 1.0 {
            warnings.push(ConfigValidationWarning {
                field: "dispatcher.retry.backoffMultiplier".to_string(),
                message: "backoffMultiplier below 1.0 is treated as 1.0".to_string(),
                suggestion: None,
            });
        }

        // 3. Registry tables must name known capabilities
        let capabilities = config.capabilities.clone().unwrap_or_default();
        if let Some(registry) = &config.registry {
            let tables = [("domains", &registry.domains), ("categories", &registry.categories)];
            for (table, entries) in tables {
                for (key, name) in entries {
                    if !capabilities.contains_key(name) {
                        errors.push(ConfigValidationError {
                            field: format!("registry.{}.{}", table, key),
                            message: format!("unknown capability: {}", name),
                        });
                    }
                }
            }

            if registry.domains.is_empty() && registry.categories.is_empty() {
                warnings.push(ConfigValidationWarning {
                    field: "registry".to_string(),
                    message: "registry has no entries; every destination will fail to resolve"
                        .to_string(),
                    suggestion: Some("Add registry.domains or registry.categories".to_string()),
                });
            }
        } else {
            warnings.push(ConfigValidationWarning {
                field: "registry".to_string(),
                message: "no registry configured".to_string(),
                suggestion: Some("Run `campaign-publisher init` for a starting point".to_string()),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("Configuration validation succeeded".to_string());
        } else {
            lines.push("Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\nErrors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\nWarnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CampaignError> {
    value
        .trim()
        .parse()
        .map_err(|_| CampaignError::Config(format!("{} has an invalid value: {}", name, value)))
}

/// `${VAR}` substitution restricted by prefix and forbidden-pattern rules
///
/// References that are not allowed or not set are left in place.
struct EnvExpander<'a> {
    env: &'a HashMap<String, String>,
    pattern: Regex,
    allowed_prefixes: Option<Vec<String>>,
    forbidden: Vec<Regex>,
}

impl<'a> EnvExpander<'a> {
    fn new(
        env: &'a HashMap<String, String>,
        settings: Option<&EnvVarExpansionConfig>,
    ) -> Result<Self, CampaignError> {
        let pattern = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| CampaignError::Config(format!("invalid env pattern: {}", e)))?;
        let forbidden = settings
            .and_then(|s| s.forbidden_patterns.as_deref())
            .unwrap_or_default()
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    CampaignError::Config(format!("invalid forbidden pattern {}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            env,
            pattern,
            allowed_prefixes: settings.and_then(|s| s.allowed_prefixes.clone()),
            forbidden,
        })
    }

    fn permits(&self, name: &str) -> bool {
        if self.forbidden.iter().any(|p| p.is_match(name)) {
            warn!(variable = name, "environment variable matches forbidden pattern, skipping");
            return false;
        }
        if let Some(prefixes) = &self.allowed_prefixes
            && !prefixes.iter().any(|prefix| name.starts_with(prefix))
        {
            warn!(variable = name, "environment variable outside allowed prefixes, skipping");
            return false;
        }
        true
    }

    fn expand(&self, input: &str) -> String {
        self.pattern
            .replace_all(input, |caps: &Captures| {
                let name = &caps[1];
                if !self.permits(name) {
                    return caps[0].to_string();
                }
                match self.env.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        warn!(variable = name, "environment variable not found");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}
