//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup. Library code only emits `tracing` events;
//! it never installs a subscriber itself.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialise the global tracing subscriber.
///
/// The configured `level` is validated first and used as the fallback filter;
/// a `RUST_LOG` directive, when set, takes precedence over it.
pub fn init(level: &str) -> Result<(), AppError> {
    let fallback = parse_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(fallback.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Parse a log level string into a [`LevelFilter`], rejecting anything that
/// is not a standard level name.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn shipped_default_level_is_accepted() {
        // The level in config/default.toml must survive validation as-is.
        let cfg = crate::config::load_from(Path::new("config/default.toml"), None, None).unwrap();
        assert_eq!(parse_level(&cfg.log_level).unwrap(), LevelFilter::INFO);
    }

    #[test]
    fn nonsense_levels_are_rejected() {
        for l in ["verbose", "loudest", "", "info, debug"] {
            assert!(parse_level(l).is_err(), "'{l}' should be rejected");
        }
    }

    #[test]
    fn init_rejects_bad_level_before_installing_anything() {
        assert!(matches!(init("bogus"), Err(AppError::Logger(_))));
    }

    #[test]
    fn reinitialisation_is_tolerated() {
        // A second init in the same process loses the subscriber race; both
        // outcomes are acceptable at startup.
        match init("warn") {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
