use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use enasolar2mqtt::mqtt_config::MqttConfig;
use serde_derive::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file, appended to. Logs go to stderr when unset.
    pub file: Option<String>,
    /// env_logger filter, e.g. `warn` or `info,enasolar2mqtt=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some("enasolar.log".into()),
            level: "warn".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inverter_host: String,
    pub request_timeout_ms: u64,
    pub meters_interval_secs: u64,
    pub data_interval_secs: u64,
    pub mqtt: MqttConfig,
    pub logging: LoggingConfig,
    // collected while loading, the logger only exists afterwards
    #[serde(skip)]
    notes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inverter_host: "http://enasolar".into(),
            request_timeout_ms: 2_000,
            meters_interval_secs: 5,
            data_interval_secs: 300,
            mqtt: MqttConfig::default(),
            logging: LoggingConfig::default(),
            notes: Vec::new(),
        }
    }
}

impl Config {
    pub fn is_valid(&self) -> bool {
        !self.inverter_host.is_empty()
            && self.meters_interval_secs > 0
            && self.data_interval_secs > 0
            && self.mqtt.is_valid()
    }

    /// Messages about how the configuration was loaded, for logging once the
    /// logger is up.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn meters_interval(&self) -> Duration {
        Duration::from_secs(self.meters_interval_secs)
    }

    pub fn data_interval(&self) -> Duration {
        Duration::from_secs(self.data_interval_secs)
    }

    // config.toml in the working dir, or next to the executable if it isn't there
    fn locate(notes: &mut Vec<String>) -> Option<PathBuf> {
        let mut path = env::current_dir().ok()?;
        path.push("config.toml");
        if !path.exists() {
            notes.push(format!(
                "{} does not exist. Trying relative path",
                path.display()
            ));
            path = env::current_exe().ok()?;
            path.pop();
            path.push("config.toml");
        }
        Some(path)
    }

    fn parse(contents: &str) -> Config {
        match toml::from_str::<Config>(contents) {
            Ok(config) => config,
            Err(e) => Config {
                notes: vec![format!("toml config unparsable: {e}")],
                ..Config::default()
            },
        }
    }

    /// Overwrites fields for which `lookup` has a value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // $INVERTER_HOST
        if let Some(inverter_host) = lookup("INVERTER_HOST") {
            self.inverter_host = inverter_host;
        }
        // $MQTT_BROKER_HOST
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            self.mqtt.host = host;
        }
        // $MQTT_PORT (optional)
        if let Some(port) = lookup("MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = Some(port),
                Err(e) => self.notes.push(format!("ignoring MQTT_PORT={port}: {e}")),
            }
        }
        // $MQTT_USERNAME (optional)
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
    }

    /// Missing or broken files fall back to the built-in defaults.
    pub fn load() -> Config {
        let mut notes = Vec::new();
        let contents = match Config::locate(&mut notes) {
            Some(path) => match fs::read_to_string(&path) {
                Ok(contents) => {
                    notes.push(format!("loading configuration from {}", path.display()));
                    contents
                }
                Err(e) => {
                    notes.push(format!("Could not read {}: {e}", path.display()));
                    "".into()
                }
            },
            None => "".into(),
        };

        let mut config = Config::parse(&contents);
        notes.append(&mut config.notes);
        config.notes = notes;
        config.apply_overrides(|key| env::var(key).ok());
        config
    }
}
