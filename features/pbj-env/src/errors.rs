use pbj::PbjError;

/// Errors when reading a variable from the environment registry
#[derive(thiserror::Error, Debug, Clone)]
pub enum EnvError {
    /// The variable is not set and no default was given
    #[error("The environment variable '{0}' is not set")]
    Missing(String),
    /// The variable is set but can't be parsed into the requested type
    #[error("The environment variable '{name}' has an invalid value '{value}': {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Registry(#[from] PbjError),
}
