//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 Layers, lowest priority first:
//!   1. serde defaults (150 workers, 20 attempts, no progress bar)
//!   2. `S3S_*` environment variables, nested with `__` (`S3S_RUNTIME__CONCURRENCY=32`)
//!   3. an optional TOML file
//!   4. command line flags, applied last through [`ConfigOverrides`]
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of. 🦆

use std::path::Path;

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::S3sError;

const ENV_PREFIX: &str = "S3S_";

/// 📦 The AppConfig: built once at the boundary, then passed around by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

/// 🧵 How hard the pipeline works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 🚦 Upper bound on concurrent prefix listings, and separately on concurrent queries.
    #[serde(default = "default_concurrency", alias = "thread_count")]
    pub concurrency: usize,
    /// 📊 Draw a progress bar on stderr.
    #[serde(default)]
    pub show_progress: bool,
}

fn default_concurrency() -> usize {
    150
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            show_progress: false,
        }
    }
}

/// ☁️ Knobs for the S3 client. Anything unset falls back to the usual AWS environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// 🔁 Total attempts per API call, first try included.
    #[serde(default = "default_max_retries", alias = "max_attempts")]
    pub max_retries: u32,
    /// 🧪 Custom endpoint, for S3-compatible stores and local testing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_max_retries() -> u32 {
    20
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            max_retries: default_max_retries(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// 🎛️ Values from the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub concurrency: Option<usize>,
    pub show_progress: Option<bool>,
    pub region: Option<String>,
    pub max_retries: Option<u32>,
}

impl ConfigOverrides {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(concurrency) = self.concurrency {
            config.runtime.concurrency = concurrency;
        }
        if let Some(show_progress) = self.show_progress {
            config.runtime.show_progress = show_progress;
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
        if let Some(max_retries) = self.max_retries {
            config.aws.max_retries = max_retries;
        }
    }
}

impl AppConfig {
    /// ✅ Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), S3sError> {
        if self.runtime.concurrency == 0 {
            return Err(S3sError::validation(
                "concurrency (thread count) must be at least 1",
            ));
        }
        Ok(())
    }
}

/// 🚀 Load the config: env vars, then the optional TOML file, then the overrides.
///
/// 💀 A config file that was asked for but does not exist is an error. Figment would
/// happily treat it as empty, and nobody wants to debug that at 3am.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name.map_or_else(|| "<env only>".to_string(), |p| p.display().to_string())
    );

    let config = Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config = match config_file_name {
        Some(file_name) => {
            if !file_name.is_file() {
                bail!(
                    "💀 Config file '{}' does not exist. It exists in our hearts, but apparently not on disk.",
                    file_name.display()
                );
            }
            config.merge(Toml::file(file_name))
        }
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables ({ENV_PREFIX}*).",
            path.display()
        ),
        None => format!(
            "💀 Failed to parse configuration from environment variables ({ENV_PREFIX}*). \
             No file was provided, this one's all on the environment."
        ),
    };

    let mut app_config: AppConfig = config.extract().context(context_msg)?;
    overrides.apply_to(&mut app_config);
    app_config.validate()?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    // every test that calls load_config runs inside a Jail, so S3S_* vars set by one
    // test never leak into another

    fn load(jail: &Jail, file: Option<&str>, overrides: &ConfigOverrides) -> figment::error::Result<AppConfig> {
        let the_path = file.map(|name| jail.directory().join(name));
        load_config(the_path.as_deref(), overrides).map_err(|e| format!("{e:#}").into())
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let the_config: AppConfig = Figment::new()
            .extract()
            .expect("💀 an empty figment should still produce defaults");
        assert_eq!(the_config.runtime.concurrency, 150);
        assert!(!the_config.runtime.show_progress);
        assert_eq!(the_config.aws.max_retries, 20);
        assert_eq!(the_config.aws.region, None);
    }

    #[test]
    fn the_one_where_the_toml_file_and_its_former_names_are_honored() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "s3s.toml",
                r#"
                [runtime]
                thread_count = 8
                show_progress = true

                [aws]
                region = "ap-northeast-1"
                max_attempts = 3
                endpoint_url = "http://localhost:9000"
                force_path_style = true
                "#,
            )?;

            let the_config = load(jail, Some("s3s.toml"), &ConfigOverrides::default())?;
            assert_eq!(the_config.runtime.concurrency, 8);
            assert!(the_config.runtime.show_progress);
            assert_eq!(the_config.aws.region.as_deref(), Some("ap-northeast-1"));
            assert_eq!(the_config.aws.max_retries, 3);
            assert_eq!(the_config.aws.endpoint_url.as_deref(), Some("http://localhost:9000"));
            assert!(the_config.aws.force_path_style);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_a_serialized_config_survives_the_trip_through_disk() {
        Jail::expect_with(|jail| {
            let the_original = AppConfig {
                runtime: RuntimeConfig {
                    concurrency: 42,
                    show_progress: true,
                },
                aws: AwsConfig {
                    region: Some("us-west-2".to_string()),
                    ..AwsConfig::default()
                },
            };
            let the_toml = toml::to_string(&the_original).map_err(|e| e.to_string())?;
            jail.create_file("s3s.toml", &the_toml)?;

            assert_eq!(load(jail, Some("s3s.toml"), &ConfigOverrides::default())?, the_original);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_command_line_flags_win_every_argument() {
        Jail::expect_with(|jail| {
            jail.create_file("s3s.toml", "[runtime]\nconcurrency = 8\n")?;
            let the_overrides = ConfigOverrides {
                concurrency: Some(2),
                region: Some("eu-west-1".to_string()),
                max_retries: Some(1),
                show_progress: Some(true),
            };

            let the_config = load(jail, Some("s3s.toml"), &the_overrides)?;
            assert_eq!(the_config.runtime.concurrency, 2);
            assert_eq!(the_config.aws.region.as_deref(), Some("eu-west-1"));
            assert_eq!(the_config.aws.max_retries, 1);
            assert!(the_config.runtime.show_progress);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_env_vars_sit_between_defaults_and_the_file() {
        Jail::expect_with(|jail| {
            jail.set_env("S3S_RUNTIME__CONCURRENCY", "12");
            jail.set_env("S3S_AWS__REGION", "us-east-2");
            jail.create_file("s3s.toml", "[aws]\nregion = \"sa-east-1\"\n")?;

            let the_config = load(jail, None, &ConfigOverrides::default())?;
            assert_eq!(the_config.runtime.concurrency, 12);
            assert_eq!(the_config.aws.region.as_deref(), Some("us-east-2"));

            let the_config = load(jail, Some("s3s.toml"), &ConfigOverrides::default())?;
            assert_eq!(the_config.runtime.concurrency, 12);
            assert_eq!(the_config.aws.region.as_deref(), Some("sa-east-1"));
            Ok(())
        });
    }

    #[test]
    fn the_one_where_zero_workers_is_not_a_plan() {
        Jail::expect_with(|jail| {
            jail.create_file("s3s.toml", "[runtime]\nconcurrency = 0\n")?;
            let the_path = jail.directory().join("s3s.toml");
            let err = load_config(Some(&the_path), &ConfigOverrides::default())
                .expect_err("💀 zero concurrency should be rejected");
            assert!(matches!(
                crate::error::find_s3s_error(&err),
                Some(S3sError::Validation(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn the_one_where_a_missing_file_is_not_silently_empty() {
        Jail::expect_with(|jail| {
            let the_path = jail.directory().join("nope.toml");
            let err = load_config(Some(&the_path), &ConfigOverrides::default())
                .expect_err("💀 a missing file should fail");
            assert!(err.to_string().contains("does not exist"));
            Ok(())
        });
    }
}
