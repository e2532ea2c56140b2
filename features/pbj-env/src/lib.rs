//! pbj-env exposes environment variables as services of a [pbj::Context].
//!
//! The variables are captured into an [EnvSource] and registered as one JSON service. Single
//! variables are derived from it, so registering a new source rebuilds every service which
//! read a variable.
//!
//! # Examples
//!
//! ```rust
//! use pbj::Context;
//! use pbj_env::{env_parse, register_env, EnvSource};
//!
//! let ctx = Context::new();
//! let source = EnvSource::from_pairs([("PORT", "8080")]);
//! let env = register_env(&ctx, &source);
//!
//! let port = env_parse::<u16>(&ctx, &env, "PORT", None).unwrap();
//! assert_eq!(*ctx.resolve(&port).unwrap(), 8080);
//!
//! let workers = env_parse::<u8>(&ctx, &env, "WORKERS", Some(4)).unwrap();
//! assert_eq!(*ctx.resolve(&workers).unwrap(), 4);
//! ```
//!
//! pbj-env consists of the following components:
//!
//! 1. Source - for capturing variables
//! 2. Registration - for turning variables into services
//! 3. Errors - for missing and malformed variables

use std::{fmt::Display, str::FromStr};

use pbj::{pbj_key, Context, Pbj, PbjKey};
use serde_json::Value;

pub mod errors;
pub mod source;

pub use errors::EnvError;
pub use source::EnvSource;

/// Registers the variables of `source` under a new key
pub fn register_env(ctx: &Context, source: &EnvSource) -> PbjKey<Value> {
    let key = pbj_key::<Value>("env");
    ctx.register(&key)
        .with_value(source.to_json())
        .with_description("environment variables");
    tracing::debug!("Registered {} environment variables", source.len());
    key
}

/// A variable as a lazy JSON value, missing variables fall back to `default`
pub fn env_value(
    ctx: &Context,
    env: &PbjKey<Value>,
    name: &str,
    default: Option<&str>,
) -> Result<Pbj<Value>, EnvError> {
    Ok(ctx.path_of(env, name, default.map(Value::from))?)
}

/// A variable parsed into `T`, registered as its own service
///
/// A missing variable resolves to `default`, or fails without one.
pub fn env_parse<T>(
    ctx: &Context,
    env: &PbjKey<Value>,
    name: &str,
    default: Option<T>,
) -> Result<PbjKey<T>, EnvError>
where
    T: FromStr + Clone + 'static,
    T::Err: Display,
{
    let raw = env_value(ctx, env, name, None)?;
    let key = pbj_key::<T>(name);
    let variable = name.to_string();

    ctx.register(&key)
        .with_factory(move |resolution| {
            let raw: Pbj<Value> = resolution.get(&raw)?;
            match raw.get_optional()? {
                Some(value) => parse_value(&variable, &value),
                None => default
                    .clone()
                    .ok_or_else(|| EnvError::Missing(variable.clone())),
            }
        })
        .with_description(&format!("environment variable {name}"));

    Ok(key)
}

fn parse_value<T>(name: &str, value: &Value) -> Result<T, EnvError>
where
    T: FromStr,
    T::Err: Display,
{
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    text.trim().parse().map_err(|e: T::Err| EnvError::Invalid {
        name: name.to_string(),
        value: text.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(pairs: &[(&str, &str)]) -> (Context, PbjKey<Value>) {
        let ctx = Context::new();
        let env = register_env(&ctx, &EnvSource::from_pairs(pairs.iter().copied()));
        (ctx, env)
    }

    #[test]
    fn values_fall_back_to_defaults() {
        let (ctx, env) = context_with(&[("HOST", "db.local")]);

        let host = env_value(&ctx, &env, "HOST", None).unwrap();
        assert_eq!(*host.get().unwrap(), Value::from("db.local"));

        let user = env_value(&ctx, &env, "USER", Some("app")).unwrap();
        assert_eq!(*user.get().unwrap(), Value::from("app"));
    }

    #[test]
    fn missing_variables_without_default_fail() {
        let (ctx, env) = context_with(&[]);
        let port = env_parse::<u16>(&ctx, &env, "PORT", None).unwrap();

        let err = ctx.resolve(&port).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Factory for 'PORT' failed - error: The environment variable 'PORT' is not set"
        );
    }

    #[test]
    fn malformed_values_are_reported() {
        let (ctx, env) = context_with(&[("PORT", "eighty")]);
        let port = env_parse::<u16>(&ctx, &env, "PORT", None).unwrap();

        let err = ctx.resolve(&port).unwrap_err();
        assert!(err.to_string().contains("invalid value 'eighty'"), "{err}");
    }

    #[test]
    fn new_sources_rebuild_parsed_values() {
        let ctx = Context::new();
        let env = register_env(&ctx, &EnvSource::from_pairs([("WORKERS", "2")]));
        let workers = env_parse::<u8>(&ctx, &env, "WORKERS", None).unwrap();
        assert_eq!(*ctx.resolve(&workers).unwrap(), 2);

        ctx.register(&env)
            .with_value(EnvSource::from_pairs([("WORKERS", "8")]).to_json());
        assert_eq!(*ctx.resolve(&workers).unwrap(), 8);
    }

    #[test]
    fn malformed_names_are_rejected() {
        let (ctx, env) = context_with(&[]);
        assert!(matches!(
            env_value(&ctx, &env, "a..b", None),
            Err(EnvError::Registry(_))
        ));
    }
}
