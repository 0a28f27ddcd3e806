//! Layered configuration loading.
//!
//! Sources (applied in order, later sources override earlier ones):
//!  1. `/etc/identity-relay/service.yaml`: system-wide defaults
//!  2. `./config/service.yaml`: deployment-local override
//!  3. Path given by `IR_CONFIG_FILE`: operator-specified file (required if set)
//!  4. Environment variables prefixed `IR__` with `__` as separator,
//!     e.g. `IR__SERVER__PORT=9090` sets `server.port = 9090`
//!
//! Every field carries a serde default, so missing files produce the built-in
//! defaults. A malformed file or an uncoercible variable is a hard error.

use identity_relay_api::ServiceConfig;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "IR_CONFIG_FILE";

/// Prefix for configuration overrides in the environment
pub const ENV_PREFIX: &str = "IR";

/// Environment variable holding the webhook signing secret
pub const WEBHOOK_SECRET_ENV: &str = "CLERK_WEBHOOK_SECRET";

/// Load the service configuration from files and the process environment.
pub fn load_service_config() -> Result<ServiceConfig, config::ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/identity-relay/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(explicit_path) = explicit_config_path() {
        builder = builder.add_source(
            config::File::with_name(&explicit_path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Path named by `IR_CONFIG_FILE`, if set and non-empty.
///
/// Loading happens before logging is up, so the caller reports the path once
/// the subscriber is installed.
pub fn explicit_config_path() -> Option<String> {
    non_empty(std::env::var(CONFIG_FILE_ENV).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse a YAML document into a [`ServiceConfig`], applying defaults.
#[cfg(test)]
fn from_yaml_str(yaml: &str) -> Result<ServiceConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
