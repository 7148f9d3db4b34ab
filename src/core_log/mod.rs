use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Maps a `-l` flag value to a level filter. Case-insensitive.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.to_ascii_uppercase().as_str() {
        "DEBUG" => Some(LevelFilter::Debug),
        "INFO" => Some(LevelFilter::Info),
        "WARN" => Some(LevelFilter::Warn),
        "ERROR" => Some(LevelFilter::Error),
        _ => None,
    }
}

/// Initializes the logger with a `[timestamp] [LEVEL] message` format.
pub fn init(level: LevelFilter) {
    Builder::from_env(Env::default())
        .filter_level(level)
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("info"), Some(LevelFilter::Info));
        assert_eq!(parse_level("Warn"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("ERROR"), Some(LevelFilter::Error));
        assert_eq!(parse_level("TRACE"), None);
    }
}
