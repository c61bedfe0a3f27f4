use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding configuration files.
const CONFIGURATION_DIR: &str = "configuration";

const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable overrides, e.g. `APP_QUEUE_CAPACITY=8`.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_ENQUEUE_RETRY__MAX_ATTEMPTS=5`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Implemented by configuration roots that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on commas into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Clone, Copy)]
enum ConfigFileKind {
    Base,
    Environment(Environment),
}

impl ConfigFileKind {
    fn stem(&self) -> Cow<'static, str> {
        match self {
            ConfigFileKind::Base => Cow::Borrowed("base"),
            ConfigFileKind::Environment(env) => Cow::Borrowed(env.as_str()),
        }
    }
}

impl fmt::Display for ConfigFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFileKind::Base => f.write_str("base configuration"),
            ConfigFileKind::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Errors raised while locating, parsing or merging configuration sources.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate {kind_description} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        kind_description: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load {kind_description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        kind_description: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to build configuration: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),
}

/// Loads configuration from the `configuration` directory of the working directory.
///
/// Sources are layered in order: `base.(yaml|yml|json)`, then `{environment}.(yaml|yml|json)`
/// where the environment comes from `APP_ENVIRONMENT`, then `APP_`-prefixed environment
/// variables with `__` separating nested keys.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;
    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Same as [`load_config`] with an explicit configuration directory and environment.
pub(crate) fn load_config_from<T>(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !configuration_directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(configuration_directory, ConfigFileKind::Base)?;
    let environment_file = find_configuration_file(
        configuration_directory,
        ConfigFileKind::Environment(environment),
    )?;

    let mut environment_source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let builder = rust_cli_config::Config::builder()
        .add_source(rust_cli_config::File::from(base_file.clone()));
    check_source(&builder, ConfigFileKind::Base, &base_file)?;

    let builder = builder.add_source(rust_cli_config::File::from(environment_file.clone()));
    check_source(
        &builder,
        ConfigFileKind::Environment(environment),
        &environment_file,
    )?;

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn find_configuration_file(
    directory: &Path,
    kind: ConfigFileKind,
) -> Result<PathBuf, LoadConfigError> {
    let stem = kind.stem();
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        kind_description: kind.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the layers added so far so a broken file is reported against its own path.
fn check_source(
    builder: &ConfigBuilder<DefaultState>,
    kind: ConfigFileKind,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            kind_description: kind.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::shared::SessionConfig;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "spool-config-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = std::env::temp_dir().join("spool-config-does-not-exist");
        let err = load_config_from::<SessionConfig>(&dir, Environment::Dev).unwrap_err();
        assert!(matches!(
            err,
            LoadConfigError::MissingConfigurationDirectory(_)
        ));
    }

    #[test]
    fn missing_environment_file_lists_attempted_paths() {
        let dir = scratch_dir("missing-env");
        fs::write(dir.join("base.yaml"), "queue_capacity: 2\n").unwrap();

        let err = load_config_from::<SessionConfig>(&dir, Environment::Dev).unwrap_err();
        match err {
            LoadConfigError::ConfigurationFileMissing { attempted, .. } => {
                assert!(attempted.contains("dev.yaml"));
                assert!(attempted.contains("dev.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn environment_file_overrides_base() {
        let dir = scratch_dir("layered");
        fs::write(
            dir.join("base.yaml"),
            "queue_capacity: 2\nproducers:\n  - name: sender1\n    items: [\"a\", \"b\"]\n",
        )
        .unwrap();
        fs::write(dir.join("dev.yaml"), "enable_teardown_after_drain: true\n").unwrap();

        let config = load_config_from::<SessionConfig>(&dir, Environment::Dev).unwrap();
        assert_eq!(config.queue_capacity, 2);
        assert!(config.enable_teardown_after_drain);
        assert_eq!(config.producers.len(), 1);
        assert_eq!(config.producers[0].items, vec!["a", "b"]);
    }

    #[test]
    fn selected_environment_picks_its_own_file() {
        let dir = scratch_dir("prod");
        fs::write(dir.join("base.yaml"), "queue_capacity: 2
").unwrap();
        fs::write(dir.join("dev.yaml"), "queue_capacity: 3
").unwrap();
        fs::write(dir.join("prod.yaml"), "queue_capacity: 16
").unwrap();

        let config = load_config_from::<SessionConfig>(&dir, Environment::Prod).unwrap();
        assert_eq!(config.queue_capacity, 16);

        let config = load_config_from::<SessionConfig>(&dir, Environment::Dev).unwrap();
        assert_eq!(config.queue_capacity, 3);
    }
}
