//! Configuration and file loading errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_problem() {
        let err = Error::Config("poll.interval_secs must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: poll.interval_secs must be greater than 0"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "veo-animator.toml").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }
}
