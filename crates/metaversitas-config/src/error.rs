//! Errors raised while loading or persisting `config.ron`.

/// Failure modes of [`Config`](crate::Config) persistence and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config.ron: {0}")]
    ReadError(#[source] std::io::Error),

    /// The config directory or file could not be written.
    #[error("cannot write config.ron: {0}")]
    WriteError(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("malformed config.ron: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// The in-memory config could not be rendered as RON.
    #[error("cannot serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// A setting parsed fine but holds an unusable value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Dotted path of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
