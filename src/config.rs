use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database_url: String,
    pub data_dir: PathBuf,
    pub verify_command: String,
    pub verify_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind: load_or("ATTEND_BIND", "127.0.0.1:3000"),
            database_url: load_or("DATABASE_URL", "sqlite:attendance.db"),
            data_dir: load_or::<PathBuf>("ATTEND_DATA_DIR", "data"),
            verify_command: load_or("FACE_VERIFY_CMD", "face-verify"),
            verify_timeout: Duration::from_secs(load_or("ATTEND_VERIFY_TIMEOUT_SECS", "30")),
        }
    }
}

fn load_or<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    match raw.parse() {
        Ok(value) => value,
        Err(err) => {
            log::warn!("invalid {}={:?}: {}; using default {}", key, raw, err, default);
            default
                .parse()
                .unwrap_or_else(|err| panic!("bad builtin default for {}: {}", key, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let bind: SocketAddr = load_or("ATTEND_TEST_UNSET_BIND", "127.0.0.1:3000");
        assert_eq!(bind.port(), 3000);
        let secs: u64 = load_or("ATTEND_TEST_UNSET_SECS", "30");
        assert_eq!(secs, 30);
    }
}
