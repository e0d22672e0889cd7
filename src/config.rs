use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;

/// Invalid startup configuration. Never produced at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyDay { start: NaiveTime, end: NaiveTime },
    NonPositiveDuration(i64),
    /// The duration is longer than the whole day window, so no slot fits.
    NoSlots { window_minutes: i64, duration_minutes: i64 },
    Invalid { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyDay { start, end } => write!(
                f,
                "day start {} must be before day end {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            ConfigError::NonPositiveDuration(m) => {
                write!(f, "slot duration must be positive, got {m} minutes")
            }
            ConfigError::NoSlots {
                window_minutes,
                duration_minutes,
            } => write!(
                f,
                "slot duration {duration_minutes}min does not fit the {window_minutes}min day"
            ),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub slot_minutes: i64,
    /// Rooms seeded at startup, in configured order.
    pub rooms: Vec<String>,
    pub session_idle: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            day_start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            day_end: NaiveTime::from_hms_opt(17, 0, 0).expect("valid time"),
            slot_minutes: 60,
            rooms: vec!["Room A".into(), "Room B".into(), "Room C".into()],
            session_idle: Duration::from_secs(900),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        if let Some(dir) = lookup("ROOMBOOK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("ROOMBOOK_DAY_START") {
            cfg.day_start = parse_time("ROOMBOOK_DAY_START", &v)?;
        }
        if let Some(v) = lookup("ROOMBOOK_DAY_END") {
            cfg.day_end = parse_time("ROOMBOOK_DAY_END", &v)?;
        }
        if let Some(v) = lookup("ROOMBOOK_SLOT_MINUTES") {
            cfg.slot_minutes = parse_num("ROOMBOOK_SLOT_MINUTES", &v)?;
        }
        if let Some(v) = lookup("ROOMBOOK_ROOMS") {
            let rooms: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if rooms.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "ROOMBOOK_ROOMS",
                    value: v,
                });
            }
            cfg.rooms = rooms;
        }
        if let Some(v) = lookup("ROOMBOOK_SESSION_IDLE_SECS") {
            cfg.session_idle = Duration::from_secs(parse_num("ROOMBOOK_SESSION_IDLE_SECS", &v)?);
        }
        if let Some(v) = lookup("ROOMBOOK_COMPACT_THRESHOLD") {
            cfg.compact_threshold = parse_num("ROOMBOOK_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROOMBOOK_METRICS_PORT") {
            cfg.metrics_port = Some(parse_num("ROOMBOOK_METRICS_PORT", &v)?);
        }

        Ok(cfg)
    }
}

fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
