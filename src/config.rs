use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::controller::ControllerSettings;
use crate::physics::Material;
use crate::simulation::SimulationSettings;
use crate::types::Dimensions;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub input: InputConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            input: InputConfig::from_env(),
            simulation: SimulationConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "AGGREGATE_PACKER_API_HOST";
    const PORT_VAR: &'static str = "AGGREGATE_PACKER_API_PORT";

    fn from_env() -> Self {
        let (bind_ip, display_host) = match env_string(Self::HOST_VAR) {
            Some(raw) => match raw.parse::<IpAddr>() {
                Ok(ip) => (ip, raw),
                Err(err) => {
                    log::warn!(
                        "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                        Self::HOST_VAR,
                        raw,
                        err,
                        Self::DEFAULT_HOST
                    );
                    (Self::DEFAULT_HOST, Self::DEFAULT_HOST.to_string())
                }
            },
            None => (Self::DEFAULT_HOST, Self::DEFAULT_HOST.to_string()),
        };

        let port = match env_string(Self::PORT_VAR) {
            Some(raw) => parse_port(&raw).unwrap_or_else(|reason| {
                log::warn!(
                    "⚠️ {} ('{}') {}. Using {}.",
                    Self::PORT_VAR,
                    raw,
                    reason,
                    Self::DEFAULT_PORT
                );
                Self::DEFAULT_PORT
            }),
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Where the aggregate table is read from.
#[derive(Clone, Debug)]
pub struct InputConfig {
    csv_path: PathBuf,
}

impl InputConfig {
    const DEFAULT_CSV_PATH: &'static str = "AB8_CMG_full.csv";
    const CSV_PATH_VAR: &'static str = "AGGREGATE_PACKER_CSV_PATH";

    fn from_env() -> Self {
        Self {
            csv_path: env_string(Self::CSV_PATH_VAR)
                .unwrap_or_else(|| Self::DEFAULT_CSV_PATH.to_string())
                .into(),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

/// Container geometry and simulation tunables.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    container: Dimensions,
    settings: SimulationSettings,
}

impl SimulationConfig {
    const DEFAULT_CONTAINER_EDGE: f64 = 100.0;

    const WIDTH_VAR: &'static str = "AGGREGATE_PACKER_CONTAINER_WIDTH";
    const HEIGHT_VAR: &'static str = "AGGREGATE_PACKER_CONTAINER_HEIGHT";
    const DEPTH_VAR: &'static str = "AGGREGATE_PACKER_CONTAINER_DEPTH";
    const SPAWN_INTERVAL_VAR: &'static str = "AGGREGATE_PACKER_SPAWN_INTERVAL_FRAMES";
    const TIMESTEP_VAR: &'static str = "AGGREGATE_PACKER_TIMESTEP";
    const GRAVITY_VAR: &'static str = "AGGREGATE_PACKER_GRAVITY";
    const FRICTION_VAR: &'static str = "AGGREGATE_PACKER_FRICTION";
    const RESTITUTION_VAR: &'static str = "AGGREGATE_PACKER_RESTITUTION";
    const SNAPSHOT_INTERVAL_VAR: &'static str = "AGGREGATE_PACKER_SNAPSHOT_INTERVAL_FRAMES";
    const SEED_VAR: &'static str = "AGGREGATE_PACKER_SEED";
    const AUTOSTART_VAR: &'static str = "AGGREGATE_PACKER_AUTOSTART";

    fn from_env() -> Self {
        let edge = |var: &str| {
            load_f64_with_warning(
                var,
                Self::DEFAULT_CONTAINER_EDGE,
                |value| value > 0.0,
                "must be greater than 0",
                "Note: Container size differs from the default",
            )
        };
        let container = Dimensions::new(
            edge(Self::WIDTH_VAR),
            edge(Self::HEIGHT_VAR),
            edge(Self::DEPTH_VAR),
        );

        let timestep = load_f64_with_warning(
            Self::TIMESTEP_VAR,
            SimulationSettings::DEFAULT_TIMESTEP,
            |value| value > 0.0 && value <= 1.0,
            "must be in (0, 1] seconds",
            "Warning: A larger timestep may let aggregates tunnel through walls",
        );

        let gravity = load_f64_with_warning(
            Self::GRAVITY_VAR,
            SimulationSettings::DEFAULT_GRAVITY,
            |value| value < 0.0,
            "must be negative (pointing down the y axis)",
            "Note: Gravity differs from Earth gravity",
        );

        let friction = load_f64_with_warning(
            Self::FRICTION_VAR,
            Material::AGGREGATE.friction,
            |value| value >= 0.0,
            "must not be negative",
            "Warning: Adjusted friction changes how the bed settles",
        );

        let restitution = load_f64_with_warning(
            Self::RESTITUTION_VAR,
            Material::AGGREGATE.restitution,
            |value| (0.0..=1.0).contains(&value),
            "must be between 0 and 1",
            "Warning: Bouncy aggregates may take long to settle",
        );

        let spawn_interval_frames = load_u64_with_warning(
            Self::SPAWN_INTERVAL_VAR,
            SimulationSettings::DEFAULT_SPAWN_INTERVAL_FRAMES,
        );
        let snapshot_interval_frames = load_u64_with_warning(
            Self::SNAPSHOT_INTERVAL_VAR,
            SimulationSettings::DEFAULT_SNAPSHOT_INTERVAL_FRAMES,
        );

        let seed = env_string(Self::SEED_VAR).and_then(|raw| match raw.parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(err) => {
                log::warn!(
                    "⚠️ Could not parse {} ('{}'): {}. Using a random seed.",
                    Self::SEED_VAR,
                    raw,
                    err
                );
                None
            }
        });

        let autostart = env_string(Self::AUTOSTART_VAR)
            .and_then(|raw| parse_bool(&raw, Self::AUTOSTART_VAR))
            .unwrap_or(true);

        Self {
            container,
            settings: SimulationSettings {
                timestep,
                gravity,
                controller: ControllerSettings {
                    spawn_interval_frames,
                    material: Material {
                        friction,
                        restitution,
                    },
                },
                snapshot_interval_frames,
                seed,
                autostart,
            },
        }
    }

    pub fn container(&self) -> Dimensions {
        self.container
    }

    pub fn settings(&self) -> SimulationSettings {
        self.settings
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            log::warn!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name,
                err
            );
            None
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.parse::<u16>() {
        Ok(0) => Err("must not be 0".to_string()),
        Ok(port) => Ok(port),
        Err(err) => Err(format!("is not a port number: {}", err)),
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            log::warn!(
                "⚠️ Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name,
                other
            );
            None
        }
    }
}

/// Frame counts must be at least 1.
fn parse_frames(raw: &str) -> Result<u64, String> {
    match raw.parse::<u64>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(frames) => Ok(frames),
        Err(err) => Err(format!("is not a frame count: {}", err)),
    }
}

fn load_u64_with_warning(var_name: &str, default: u64) -> u64 {
    match env_string(var_name) {
        Some(raw) => parse_frames(&raw).unwrap_or_else(|reason| {
            log::warn!(
                "⚠️ {} ('{}') {}. Using {}.",
                var_name,
                raw,
                reason,
                default
            );
            default
        }),
        None => default,
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match env_string(var_name) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && validator(value) => {
                let tolerance = (default.abs().max(1.0)) * 1e-9;
                if (value - default).abs() > tolerance {
                    log::info!("⚠️ {} ({} = {}).", warning, var_name, value);
                }
                value
            }
            Ok(_) => {
                log::warn!(
                    "⚠️ {} contains invalid value '{}': {}. Using {}.",
                    var_name,
                    raw,
                    invalid_hint,
                    default
                );
                default
            }
            Err(err) => {
                log::warn!(
                    "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name,
                    raw,
                    err,
                    default
                );
                default
            }
        },
        None => default,
    }
}
