use core::fmt::{Debug, Display};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "cca.toml";
pub const ENV_PREFIX: &str = "CCA_";

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct WebSocketConfig {
    /// Outbound messages buffered per connection before it counts as slow.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            send_queue: default_send_queue(),
        }
    }
}

/// Minimum number of courses of each type a department has to choose.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Requirements {
    #[serde(default)]
    pub sport: u32,
    #[serde(default)]
    pub non_sport: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub database_url: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default = "default_staff_department")]
    pub staff_department: String,
    /// department -> year group bitmask
    #[serde(default)]
    pub year_groups: BTreeMap<String, u32>,
    /// group handle -> display name
    #[serde(default)]
    pub course_groups: BTreeMap<String, String>,
    #[serde(default)]
    pub requirements: BTreeMap<String, Requirements>,
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

const fn default_max_connections() -> usize {
    500
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

const fn default_send_queue() -> usize {
    64
}

const fn default_listen() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3000))
}

fn default_staff_department() -> String {
    "Staff".to_owned()
}

#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Figment(Box::new(value))
    }
}

impl Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

pub fn figment() -> Figment {
    Figment::new()
        .merge(Toml::file(CONFIG_FILE))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn get_config() -> Result<Config, ConfigError> {
    Ok(figment().extract()?)
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn reads_file_and_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                    database_url = "postgres://localhost/cca"

                    [year_groups]
                    Y9 = 1
                    Y10 = 2

                    [course_groups]
                    MW1 = "Monday/Wednesday 1"

                    [requirements.Y9]
                    sport = 1
                    non_sport = 2
                "#,
            )?;
            jail.set_env("CCA_WEBSOCKET__SEND_QUEUE", "8");

            let config = get_config().map_err(|err| err.to_string())?;
            assert_eq!(config.staff_department, "Staff");
            assert_eq!(config.listen, default_listen());
            assert_eq!(config.year_groups.get("Y10"), Some(&2));
            assert_eq!(config.websocket.send_queue, 8);
            assert_eq!(config.database.max_connections, 500);
            assert_eq!(
                config.requirements.get("Y9"),
                Some(&Requirements {
                    sport: 1,
                    non_sport: 2
                })
            );
            Ok(())
        });
    }

    #[test]
    fn missing_database_url_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"staff_department = "Staff""#)?;
            assert!(get_config().is_err());
            Ok(())
        });
    }
}
