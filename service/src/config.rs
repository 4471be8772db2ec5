use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use health::HealthCheckerConfig;
use lifecycle::RunnerConfig;

use crate::server::DebugServerConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "service")]
    pub service_name: String,

    #[envconfig(default = "development")]
    pub environment: String,

    #[envconfig(default = "false")]
    pub debug: FlexBool,

    #[envconfig(from = "DEBUG_BIND_HOST", default = "0.0.0.0")]
    pub debug_host: String,

    #[envconfig(from = "DEBUG_BIND_PORT", default = "9090")]
    pub debug_port: u16,

    #[envconfig(default = "cache")]
    pub cache_dir: PathBuf,

    #[envconfig(default = "10000")]
    pub health_poll_interval: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub health_check_timeout: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub metrics_refresh_interval: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub init_timeout: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub on_init_signal_timeout: EnvMsDuration,

    #[envconfig(default = "uptime")]
    pub readiness_checks: CheckList,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            init_timeout: self.init_timeout.0,
            shutdown_timeout: self.shutdown_timeout.0,
            on_init_signal_timeout: self.on_init_signal_timeout.0,
            ..RunnerConfig::default()
        }
    }

    /// A zero `HEALTH_CHECK_TIMEOUT` disables the per-check bound.
    pub fn health_config(&self, version: &str) -> HealthCheckerConfig {
        HealthCheckerConfig {
            version: version.to_string(),
            poll_interval: self.health_poll_interval.0,
            check_timeout: Some(self.health_check_timeout.0).filter(|t| !t.is_zero()),
        }
    }

    pub fn debug_server_config(&self) -> DebugServerConfig {
        DebugServerConfig {
            name: self.service_name.clone(),
            host: self.debug_host.clone(),
            port: self.debug_port,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Comma-separated check names; blanks are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckList(pub Vec<String>);

impl FromStr for CheckList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CheckList(
            s.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }
}

impl Deref for CheckList {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.service_name, "service");
        assert!(!*config.debug);
        assert!(!config.is_production());
        assert_eq!(config.debug_port, 9090);
        assert_eq!(config.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.readiness_checks.0, vec!["uptime"]);

        let runner = config.runner_config();
        assert_eq!(runner.init_timeout, Duration::from_secs(60));
        assert_eq!(runner.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(runner.on_init_signal_timeout, Duration::from_secs(10));
        assert!(runner.trap_signals);

        let health = config.health_config("1.2.3");
        assert_eq!(health.version, "1.2.3");
        assert_eq!(health.poll_interval, Duration::from_secs(10));
        assert_eq!(health.check_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn overrides_from_environment() {
        let env = HashMap::from([
            ("SERVICE_NAME".to_string(), "ingest".to_string()),
            ("ENVIRONMENT".to_string(), "production".to_string()),
            ("DEBUG".to_string(), "yes".to_string()),
            ("DEBUG_BIND_PORT".to_string(), "9191".to_string()),
            ("HEALTH_CHECK_TIMEOUT".to_string(), "0".to_string()),
            ("INIT_TIMEOUT".to_string(), "1500".to_string()),
            ("READINESS_CHECKS".to_string(), "uptime, kafka,,db ".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert!(*config.debug);
        assert!(config.is_production());
        assert_eq!(config.runner_config().init_timeout, Duration::from_millis(1500));
        assert_eq!(config.health_config("v").check_timeout, None);
        assert_eq!(&*config.readiness_checks, ["uptime", "kafka", "db"]);

        let server = config.debug_server_config();
        assert_eq!(server.name, "ingest");
        assert_eq!(server.bind(), "0.0.0.0:9191");
    }

    #[test]
    fn rejects_bad_values() {
        let env = HashMap::from([("SHUTDOWN_TIMEOUT".to_string(), "1m".to_string())]);
        assert!(Config::init_from_hashmap(&env).is_err());

        let env = HashMap::from([("DEBUG".to_string(), "maybe".to_string())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
