/// Errors when registering, reading or interpolating configuration values
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config key is already registered
    #[error("Config key '{0}' is already registered")]
    AlreadyRegistered(String),
    /// The required config key is not known
    #[error("Config key '{0}' is not known")]
    Missing(String),
    /// An expression could not be parsed
    #[error("Malformed expression '{expression}': {reason}")]
    MalformedExpression {
        expression: String,
        reason: &'static str,
    },
    /// A value exists but does not have the requested shape
    #[error("Config key '{key}' could not be read as '{target}': {message}")]
    Deserialize {
        key: String,
        target: &'static str,
        message: String,
    },
}
