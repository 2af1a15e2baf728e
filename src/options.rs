use std::{fs, path::PathBuf, time::Duration};

use directories::ProjectDirs;
use log::LevelFilter;
use toml::Value;

use crate::protocol::{TransferSettings, MAX_RETRIES};

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub frame_timeout: Duration,
    pub subpacket_timeout: Duration,
    pub drain_timeout: Duration,
    pub max_retries: u32,
    pub output_dir: PathBuf,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    pub fn new() -> Self {
        Options {
            frame_timeout: Duration::from_secs(10),
            subpacket_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            max_retries: MAX_RETRIES,
            output_dir: PathBuf::from("."),
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }

    pub fn options_file() -> Option<PathBuf> {
        ProjectDirs::from("com", "GitHub", "rxmodem").map(|proj_dirs| proj_dirs.config_dir().join("options.toml"))
    }

    /// Reads `options.toml` from the config dir, falls back to defaults if
    /// there is none or it can't be read.
    pub fn load_options() -> Self {
        if let Some(options_file) = Options::options_file() {
            if options_file.exists() {
                match fs::read_to_string(&options_file) {
                    Ok(txt) => {
                        log::debug!("loading {}", options_file.display());
                        return Options::from_str(&txt);
                    }
                    Err(err) => log::warn!("can't read {}: {err}", options_file.display()),
                }
            }
        }
        Options::new()
    }

    pub fn from_str(input_text: &str) -> Options {
        let mut result = Options::new();
        match input_text.parse::<Value>() {
            Ok(value) => parse_value(&mut result, &value),
            Err(err) => log::warn!("invalid options file, using defaults: {err}"),
        }
        result
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            frame_timeout: self.frame_timeout,
            subpacket_timeout: self.subpacket_timeout,
            drain_timeout: self.drain_timeout,
            max_retries: self.max_retries,
        }
    }
}

fn parse_value(options: &mut Options, value: &Value) {
    let Value::Table(table) = value else {
        log::warn!("options file doesn't contain a table");
        return;
    };
    for (k, v) in table {
        match k.as_str() {
            "frame_timeout" => {
                if let Some(d) = parse_duration(v) {
                    options.frame_timeout = d;
                }
            }
            "subpacket_timeout" => {
                if let Some(d) = parse_duration(v) {
                    options.subpacket_timeout = d;
                }
            }
            "drain_timeout" => {
                if let Some(d) = parse_duration(v) {
                    options.drain_timeout = d;
                }
            }
            "max_retries" => {
                if let Value::Integer(i) = v {
                    match u32::try_from(*i) {
                        Ok(i) if i > 0 => options.max_retries = i,
                        _ => log::warn!("invalid max_retries {i}"),
                    }
                }
            }
            "output_dir" => {
                if let Value::String(str) = v {
                    options.output_dir = PathBuf::from(str);
                }
            }
            "log_level" => {
                if let Value::String(str) = v {
                    match str.parse::<LevelFilter>() {
                        Ok(level) => options.log_level = level,
                        Err(_) => log::warn!("invalid log_level '{str}'"),
                    }
                }
            }
            "log_file" => {
                if let Value::String(str) = v {
                    options.log_file = Some(PathBuf::from(str));
                }
            }
            _ => log::warn!("unknown option '{k}'"),
        }
    }
}

/// Seconds, integer or float.
fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Integer(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
        Value::Float(f) if *f >= 0.0 => Some(Duration::from_secs_f64(*f)),
        _ => {
            log::warn!("invalid duration {value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::new();
        assert_eq!(Duration::from_secs(10), options.frame_timeout);
        assert_eq!(Duration::from_secs(5), options.subpacket_timeout);
        assert_eq!(Duration::from_secs(1), options.drain_timeout);
        assert_eq!(20, options.max_retries);
        assert_eq!(PathBuf::from("."), options.output_dir);
        assert_eq!(LevelFilter::Info, options.log_level);
        assert_eq!(None, options.log_file);
        assert_eq!(TransferSettings::default(), options.transfer_settings());
    }

    #[test]
    fn test_from_str() {
        let options = Options::from_str(
            r#"
frame_timeout = 30
subpacket_timeout = 2.5
max_retries = 5
output_dir = "/tmp/in"
log_level = "debug"
log_file = "/tmp/rxmodem.log"
"#,
        );
        assert_eq!(Duration::from_secs(30), options.frame_timeout);
        assert_eq!(Duration::from_millis(2500), options.subpacket_timeout);
        assert_eq!(Duration::from_secs(1), options.drain_timeout);
        assert_eq!(5, options.max_retries);
        assert_eq!(PathBuf::from("/tmp/in"), options.output_dir);
        assert_eq!(LevelFilter::Debug, options.log_level);
        assert_eq!(Some(PathBuf::from("/tmp/rxmodem.log")), options.log_file);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let options = Options::from_str(
            r#"
frame_timeout = "soon"
max_retries = -1
log_level = "loud"
scaling = "Linear"
"#,
        );
        assert_eq!(Options::new(), options);
    }

    #[test]
    fn test_malformed_file() {
        assert_eq!(Options::new(), Options::from_str("frame_timeout = = 3"));
    }
}
