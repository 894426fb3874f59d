pub mod models {
    pub mod episode;
}

pub mod client;
pub mod config;
pub mod control {
    pub mod cooldown;
    pub mod emergency;
    pub mod planner;
    pub mod power;
    pub mod reward;
    pub mod snapshot;
    pub mod units;
}
pub mod influx;
pub mod services {
    pub mod cycle;
    pub mod episode_log;
    pub mod sim;
    pub mod telemetry;
}

use crate::client::{HassClient, Hub};
use crate::config::{Config, ControllerConfig};
use crate::control::units::OutdoorUnitRegistry;
use crate::influx::{InfluxClient, PowerHistory};
use crate::services::cycle;
use crate::services::sim::{SimulatedHistory, SimulatedHub};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Default)]
struct CliArgs {
    env_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

pub fn run(config_file_override: Option<&Path>) -> Result<(), String> {
    // 1) Load runtime settings
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (hass_url={}, influx_url={}, db={}, measurement={}, interval={}s, simulation={})",
        cfg.hass_url,
        cfg.influx_url,
        cfg.influx_database,
        cfg.influx_measurement,
        cfg.interval.as_secs(),
        cfg.simulation_enabled
    );

    // 2) Load the controller document
    let config_path = config_file_override.unwrap_or(&cfg.config_file);
    let controller = ControllerConfig::load(config_path)?;
    info!(
        "Controller config loaded from {} ({} room(s), {} outdoor unit(s){})",
        config_path.display(),
        controller.rooms.len(),
        controller.outdoor_units.len().max(1),
        if controller.outdoor_units.is_empty() { ", legacy single-unit" } else { "" }
    );

    // 3) Build and check the unit registry
    let registry = OutdoorUnitRegistry::from_config(&controller)?;
    if !registry.validate() {
        warn!("unit registry has structural issues; affected rooms will be skipped each cycle");
    }

    // 4) Wire the hub and the power history
    let (hub, history): (Box<dyn Hub>, Box<dyn PowerHistory>) = if cfg.simulation_enabled {
        info!("Simulation enabled: using the built-in hub and history");
        (
            Box::new(SimulatedHub::new(&controller, registry.power_sensors())),
            Box::new(SimulatedHistory::new(800.0)),
        )
    } else {
        (
            Box::new(HassClient::new(cfg.hass_url.as_str(), cfg.hass_token.as_str())),
            Box::new(InfluxClient::new(
                cfg.influx_url.as_str(),
                cfg.influx_database.as_str(),
                cfg.influx_measurement.as_str(),
            )),
        )
    };

    // 5) Control loop (steady cadence)
    info!(
        "Starting control loop: rooms={}, units={}, interval={}s, episode_log={}",
        controller.rooms.len(),
        registry.unit_count(),
        cfg.interval.as_secs(),
        cfg.episode_log.display()
    );
    let stop = AtomicBool::new(false);
    cycle::run_loop(
        hub.as_ref(),
        history.as_ref(),
        &controller,
        &registry,
        &cfg.episode_log,
        cfg.interval,
        &stop,
    )
}

fn parse_cli() -> Result<CliArgs, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if parsed.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                parsed.env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if parsed.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                parsed.env_file = Some(PathBuf::from(path_str));
            }
            Some("--config-file") => {
                if parsed.config_file.is_some() {
                    return Err("`--config-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--config-file` requires a path argument".to_string())?;
                parsed.config_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--config-file=") => {
                if parsed.config_file.is_some() {
                    return Err("`--config-file` provided more than once".to_string());
                }
                let path_str = &s["--config-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--config-file` requires a path argument".to_string());
                }
                parsed.config_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(parsed)
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        match parse_env_assignment(&line) {
            Ok(Some((key, value))) => {
                // Preserve any value that was already supplied via the process environment.
                if std::env::var_os(&key).is_none() {
                    // Updating process-level environment variables is unsafe on some targets.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                return Err(format!("{}:{}: {}", path.display(), index + 1, e));
            }
        }
    }

    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let without_export = trimmed
        .strip_prefix("export ")
        .map(|s| s.trim_start())
        .unwrap_or(trimmed);

    let mut parts = without_export.splitn(2, '=');
    let key = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing environment variable name".to_string())?;
    let value_part = parts.next().ok_or_else(|| "missing '=' in assignment".to_string())?;

    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let value = parse_env_value(value_part)?;
    Ok(Some((key.to_string(), value)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_double_quoted(rest)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_single_quoted(rest)
    } else {
        let value = trimmed.splitn(2, '#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn parse_double_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            let value = match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '\\' => '\\',
                '"' => '"',
                other => other,
            };
            result.push(value);
            escape = false;
            continue;
        }

        match ch {
            '\\' => escape = true,
            '"' => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                } else {
                    return Err("unexpected characters after closing double quote".to_string());
                }
            }
            other => result.push(other),
        }
    }

    if escape {
        Err("unterminated escape sequence in double-quoted value".to_string())
    } else {
        Err("unterminated double-quoted value".to_string())
    }
}

fn parse_single_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\'' {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            } else {
                return Err("unexpected characters after closing single quote".to_string());
            }
        } else {
            result.push(ch);
        }
    }

    Err("unterminated single-quoted value".to_string())
}

fn main() {
    let args = match parse_cli() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    let loaded_env = match configure_env(args.env_file) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "taktguard {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(args.config_file.as_deref()) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
