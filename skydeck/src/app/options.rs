//! Application configuration options
//!
//! Every component is configured from environment variables. Values are read
//! from an [`Env`] snapshot so tests can supply their own.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::broker::mqtt::{MqttAddress, MqttConnectOptions};
use crate::errors::PlatformError;
use crate::logs::{LogLevel, LogOptions};
use crate::runtime::NetworkPlacement;
use crate::slug::Slug;
use crate::utils::split_list;

/// Environment variable names
pub mod keys {
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_DIR: &str = "LOG_DIR";
    pub const BIND_HOST: &str = "BIND_HOST";

    pub const STORE_ENDPOINT: &str = "STORE_ENDPOINT";
    pub const STORE_PUBLIC_URL: &str = "STORE_PUBLIC_URL";
    pub const STORE_ACCESS_KEY_ID: &str = "STORE_ACCESS_KEY_ID";
    pub const STORE_SECRET_ACCESS_KEY: &str = "STORE_SECRET_ACCESS_KEY";

    pub const BROKER_HOST: &str = "BROKER_HOST";
    pub const BROKER_PORT: &str = "BROKER_PORT";
    pub const BROKER_USERNAME: &str = "BROKER_USERNAME";
    pub const BROKER_PASSWORD: &str = "BROKER_PASSWORD";
    pub const BROKER_TLS: &str = "BROKER_TLS";
    pub const BROKER_CA_CERT: &str = "BROKER_CA_CERT";

    pub const DISPATCHER_PORT: &str = "DISPATCHER_PORT";
    pub const PLATFORM_DOMAIN: &str = "PLATFORM_DOMAIN";
    pub const BUILD_IMAGE: &str = "BUILD_IMAGE";
    pub const SUBNETS: &str = "SUBNETS";
    pub const SECURITY_GROUPS: &str = "SECURITY_GROUPS";
    pub const RUNTIME_KIND: &str = "RUNTIME_KIND";
    pub const RUNTIME_ENDPOINT: &str = "RUNTIME_ENDPOINT";
    pub const RUNTIME_CLUSTER: &str = "RUNTIME_CLUSTER";
    pub const RUNTIME_TOKEN: &str = "RUNTIME_TOKEN";
    pub const RUNTIME_CONTAINER_NAME: &str = "RUNTIME_CONTAINER_NAME";

    pub const GIT_REPOSITORY_URL: &str = "GIT_REPOSITORY_URL";
    pub const PROJECT_ID: &str = "PROJECT_ID";
    pub const BUILD_WORKDIR: &str = "BUILD_WORKDIR";
    pub const BUILD_COMMAND: &str = "BUILD_COMMAND";
    pub const BUILD_OUTPUT_DIR: &str = "BUILD_OUTPUT_DIR";
    pub const ABORT_ON_BUILD_FAILURE: &str = "ABORT_ON_BUILD_FAILURE";

    pub const BROADCASTER_PORT: &str = "BROADCASTER_PORT";

    pub const ROUTER_PORT: &str = "ROUTER_PORT";
    pub const DISPATCHER_URL: &str = "DISPATCHER_URL";
    pub const BROADCASTER_URL: &str = "BROADCASTER_URL";
    pub const LANDING_URL: &str = "LANDING_URL";
    pub const UPSTREAM_TIMEOUT_SECS: &str = "UPSTREAM_TIMEOUT_SECS";
}

/// Snapshot of configuration variables
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Capture the process environment, seeded from `.env.local` when present.
    /// Variables already set in the environment take precedence.
    pub fn from_process() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of a variable, blank values count as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn required(&self, key: &str) -> Result<String, PlatformError> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::ConfigError(format!("{} is not set", key)))
    }

    pub fn secret(&self, key: &str) -> Result<SecretString, PlatformError> {
        self.required(key).map(SecretString::from)
    }

    pub fn port(&self, key: &str) -> Result<u16, PlatformError> {
        let value = self.required(key)?;
        value
            .parse()
            .map_err(|_| PlatformError::ConfigError(format!("{} is not a valid port: {}", key, value)))
    }

    /// Whole seconds, `default` when unset
    pub fn seconds(&self, key: &str, default: Duration) -> Result<Duration, PlatformError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map(Duration::from_secs).map_err(|_| {
                PlatformError::ConfigError(format!("{} is not a number of seconds: {}", key, value))
            }),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_lowercase).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }
}

/// Lifecycle options shared by the long-running components
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP listener options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerOptions {
    fn from_env(env: &Env, port_key: &str) -> Result<Self, PlatformError> {
        Ok(Self {
            host: env
                .get(keys::BIND_HOST)
                .unwrap_or("0.0.0.0")
                .to_string(),
            port: env.port(port_key)?,
        })
    }
}

pub fn log_options(env: &Env, file_prefix: &str) -> LogOptions {
    LogOptions {
        log_level: env
            .get(keys::LOG_LEVEL)
            .and_then(|l| l.parse().ok())
            .unwrap_or(LogLevel::Info),
        json_format: env
            .get(keys::LOG_FORMAT)
            .is_some_and(|f| f.eq_ignore_ascii_case("json")),
        log_dir: env.get(keys::LOG_DIR).map(PathBuf::from),
        file_prefix: format!("{}.log", file_prefix),
        ..Default::default()
    }
}

/// Artifact store settings
#[derive(Debug)]
pub struct StoreOptions {
    /// Base URL objects are written to
    pub endpoint: String,

    /// Base URL browsers read objects from
    pub public_url: String,

    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl StoreOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        Ok(Self {
            endpoint: env.required(keys::STORE_ENDPOINT)?,
            public_url: env.required(keys::STORE_PUBLIC_URL)?,
            access_key_id: env.required(keys::STORE_ACCESS_KEY_ID)?,
            secret_access_key: env.secret(keys::STORE_SECRET_ACCESS_KEY)?,
        })
    }

    fn export(&self, env: &mut BTreeMap<String, String>) {
        env.insert(keys::STORE_ENDPOINT.to_string(), self.endpoint.clone());
        env.insert(keys::STORE_PUBLIC_URL.to_string(), self.public_url.clone());
        env.insert(keys::STORE_ACCESS_KEY_ID.to_string(), self.access_key_id.clone());
        env.insert(
            keys::STORE_SECRET_ACCESS_KEY.to_string(),
            self.secret_access_key.expose_secret().to_string(),
        );
    }
}

/// Message broker settings
#[derive(Debug)]
pub struct BrokerOptions {
    pub connect: MqttConnectOptions,
}

impl BrokerOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        let address = MqttAddress {
            host: env.required(keys::BROKER_HOST)?,
            port: env.port(keys::BROKER_PORT)?,
            use_tls: env.flag(keys::BROKER_TLS),
            ca_cert_path: env.get(keys::BROKER_CA_CERT).map(str::to_string),
        };
        Ok(Self {
            connect: MqttConnectOptions::new(
                address,
                env.required(keys::BROKER_USERNAME)?,
                env.secret(keys::BROKER_PASSWORD)?,
            ),
        })
    }

    fn export(&self, env: &mut BTreeMap<String, String>) {
        let connect = &self.connect;
        env.insert(keys::BROKER_HOST.to_string(), connect.address.host.clone());
        env.insert(keys::BROKER_PORT.to_string(), connect.address.port.to_string());
        env.insert(keys::BROKER_USERNAME.to_string(), connect.username.clone());
        env.insert(
            keys::BROKER_PASSWORD.to_string(),
            connect.password.expose_secret().to_string(),
        );
        if connect.address.use_tls {
            env.insert(keys::BROKER_TLS.to_string(), "true".to_string());
        }
        if let Some(ca_cert) = &connect.address.ca_cert_path {
            env.insert(keys::BROKER_CA_CERT.to_string(), ca_cert.clone());
        }
    }
}

/// Which container runtime launches builds
#[derive(Debug)]
pub enum RuntimeOptions {
    /// Local docker daemon
    Docker,

    /// Remote run-task API
    Http {
        endpoint: String,
        cluster: String,
        container_name: String,
        token: Option<SecretString>,
    },
}

impl RuntimeOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        match env.get(keys::RUNTIME_KIND).unwrap_or("docker") {
            "docker" => Ok(RuntimeOptions::Docker),
            "http" => Ok(RuntimeOptions::Http {
                endpoint: env.required(keys::RUNTIME_ENDPOINT)?,
                cluster: env.required(keys::RUNTIME_CLUSTER)?,
                container_name: env
                    .get(keys::RUNTIME_CONTAINER_NAME)
                    .unwrap_or("builder")
                    .to_string(),
                token: env.get(keys::RUNTIME_TOKEN).map(SecretString::from),
            }),
            other => Err(PlatformError::ConfigError(format!(
                "{} must be 'docker' or 'http', got '{}'",
                keys::RUNTIME_KIND,
                other
            ))),
        }
    }
}

/// Dispatcher settings
#[derive(Debug)]
pub struct DispatcherOptions {
    pub server: ServerOptions,
    pub lifecycle: LifecycleOptions,

    /// Domain preview URLs are built under, may carry a port
    pub platform_domain: String,

    /// Image (or task definition) the build container runs
    pub build_image: String,
    pub placement: NetworkPlacement,
    pub runtime: RuntimeOptions,
    pub store: StoreOptions,
    pub broker: BrokerOptions,
}

impl DispatcherOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        Ok(Self {
            server: ServerOptions::from_env(env, keys::DISPATCHER_PORT)?,
            lifecycle: LifecycleOptions::default(),
            platform_domain: env.required(keys::PLATFORM_DOMAIN)?,
            build_image: env.required(keys::BUILD_IMAGE)?,
            placement: NetworkPlacement {
                subnets: split_list(&env.required(keys::SUBNETS)?),
                security_groups: split_list(&env.required(keys::SECURITY_GROUPS)?),
                assign_public_ip: true,
            },
            runtime: RuntimeOptions::from_env(env)?,
            store: StoreOptions::from_env(env)?,
            broker: BrokerOptions::from_env(env)?,
        })
    }

    /// Environment handed to every build container, before the per-request
    /// repository URL and slug are added
    pub fn builder_environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        self.store.export(&mut env);
        self.broker.export(&mut env);
        env
    }
}

/// Build executor settings
#[derive(Debug)]
pub struct BuilderOptions {
    pub repository_url: String,
    pub slug: Slug,

    /// Directory holding the project sources
    pub work_dir: PathBuf,

    /// Shell command that installs dependencies and builds
    pub build_command: String,

    /// Build output directory, relative to `work_dir`
    pub output_dir: PathBuf,

    /// Skip the upload when the build command exits non-zero
    pub abort_on_build_failure: bool,

    pub store: StoreOptions,
    pub broker: BrokerOptions,
}

impl BuilderOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        let slug = Slug::parse(&env.required(keys::PROJECT_ID)?)
            .map_err(|e| PlatformError::ConfigError(format!("{}: {}", keys::PROJECT_ID, e)))?;
        Ok(Self {
            repository_url: env.required(keys::GIT_REPOSITORY_URL)?,
            slug,
            work_dir: PathBuf::from(env.get(keys::BUILD_WORKDIR).unwrap_or("output")),
            build_command: env
                .get(keys::BUILD_COMMAND)
                .unwrap_or("npm install && npm run build")
                .to_string(),
            output_dir: PathBuf::from(env.get(keys::BUILD_OUTPUT_DIR).unwrap_or("dist")),
            abort_on_build_failure: env.flag(keys::ABORT_ON_BUILD_FAILURE),
            store: StoreOptions::from_env(env)?,
            broker: BrokerOptions::from_env(env)?,
        })
    }
}

/// Log broadcaster settings
#[derive(Debug)]
pub struct BroadcasterOptions {
    pub server: ServerOptions,
    pub lifecycle: LifecycleOptions,
    pub broker: BrokerOptions,
}

impl BroadcasterOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        Ok(Self {
            server: ServerOptions::from_env(env, keys::BROADCASTER_PORT)?,
            lifecycle: LifecycleOptions::default(),
            broker: BrokerOptions::from_env(env)?,
        })
    }
}

/// Traffic router settings
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub server: ServerOptions,
    pub lifecycle: LifecycleOptions,
    pub platform_domain: String,
    pub dispatcher_url: String,
    pub broadcaster_url: String,
    pub landing_url: String,
    pub store_public_url: String,

    /// How long an upstream may take to start answering
    pub upstream_timeout: Duration,
}

impl RouterOptions {
    pub fn from_env(env: &Env) -> Result<Self, PlatformError> {
        Ok(Self {
            server: ServerOptions::from_env(env, keys::ROUTER_PORT)?,
            lifecycle: LifecycleOptions::default(),
            platform_domain: env.required(keys::PLATFORM_DOMAIN)?,
            dispatcher_url: env.required(keys::DISPATCHER_URL)?,
            broadcaster_url: env.required(keys::BROADCASTER_URL)?,
            landing_url: env.required(keys::LANDING_URL)?,
            store_public_url: env.required(keys::STORE_PUBLIC_URL)?,
            upstream_timeout: env.seconds(keys::UPSTREAM_TIMEOUT_SECS, Duration::from_secs(30))?,
        })
    }
}
