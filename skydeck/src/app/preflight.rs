//! Environment preflight
//!
//! Reports which required variables are missing for a component before it is
//! started, so a misconfigured deployment fails loudly at boot.

use std::fmt;
use std::str::FromStr;

use colored::Colorize;

use crate::app::options::{keys, Env};
use crate::errors::PlatformError;

/// The independently deployable services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Dispatcher,
    Builder,
    Broadcaster,
    Router,
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Component::Dispatcher => "dispatcher",
            Component::Builder => "builder",
            Component::Broadcaster => "broadcaster",
            Component::Router => "router",
        }
    }

    /// Variables that must be set for the component to start
    pub fn required_keys(&self, env: &Env) -> Vec<&'static str> {
        const STORE: [&str; 4] = [
            keys::STORE_ENDPOINT,
            keys::STORE_PUBLIC_URL,
            keys::STORE_ACCESS_KEY_ID,
            keys::STORE_SECRET_ACCESS_KEY,
        ];
        const BROKER: [&str; 4] = [
            keys::BROKER_HOST,
            keys::BROKER_PORT,
            keys::BROKER_USERNAME,
            keys::BROKER_PASSWORD,
        ];

        let mut required = Vec::new();
        match self {
            Component::Dispatcher => {
                required.extend([
                    keys::DISPATCHER_PORT,
                    keys::PLATFORM_DOMAIN,
                    keys::BUILD_IMAGE,
                    keys::SUBNETS,
                    keys::SECURITY_GROUPS,
                ]);
                if env.get(keys::RUNTIME_KIND) == Some("http") {
                    required.extend([keys::RUNTIME_ENDPOINT, keys::RUNTIME_CLUSTER]);
                }
                required.extend(STORE);
                required.extend(BROKER);
            }
            Component::Builder => {
                required.extend([keys::GIT_REPOSITORY_URL, keys::PROJECT_ID]);
                required.extend(STORE);
                required.extend(BROKER);
            }
            Component::Broadcaster => {
                required.push(keys::BROADCASTER_PORT);
                required.extend(BROKER);
            }
            Component::Router => {
                required.extend([
                    keys::ROUTER_PORT,
                    keys::PLATFORM_DOMAIN,
                    keys::DISPATCHER_URL,
                    keys::BROADCASTER_URL,
                    keys::LANDING_URL,
                    keys::STORE_PUBLIC_URL,
                ]);
            }
        }
        required
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Component {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dispatcher" => Ok(Component::Dispatcher),
            "builder" => Ok(Component::Builder),
            "broadcaster" => Ok(Component::Broadcaster),
            "router" => Ok(Component::Router),
            other => Err(PlatformError::ConfigError(format!(
                "unknown component '{}', expected dispatcher, builder, broadcaster or router",
                other
            ))),
        }
    }
}

/// Result of checking one component's environment
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub component: Component,
    pub present: Vec<&'static str>,
    pub missing: Vec<&'static str>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }

    /// Human readable report, one line per variable
    pub fn render(&self) -> String {
        let total = self.present.len() + self.missing.len();
        let mut out = format!(
            "Environment check for {} ({}/{} set)\n",
            self.component.name().bold(),
            self.present.len(),
            total
        );
        for key in &self.present {
            out.push_str(&format!("  {} {}\n", "ok".green(), key));
        }
        for key in &self.missing {
            out.push_str(&format!("  {} {}\n", "missing".red().bold(), key));
        }
        if self.is_ok() {
            out.push_str(&format!("{}\n", "all required variables are set".green()));
        } else {
            out.push_str(&format!(
                "{}\n",
                format!("{} required variable(s) missing", self.missing.len()).red()
            ));
        }
        out
    }
}

pub fn check(component: Component, env: &Env) -> PreflightReport {
    let (present, missing) = component
        .required_keys(env)
        .into_iter()
        .partition(|key| env.is_set(key));
    PreflightReport {
        component,
        present,
        missing,
    }
}
