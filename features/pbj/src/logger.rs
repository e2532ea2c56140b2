use std::{rc::Rc, sync::LazyLock};

use tracing::Level;

use crate::key::{pbj_key, PbjKey};

static LOGGER_KEY: LazyLock<PbjKey<Rc<dyn Logger>>> = LazyLock::new(|| pbj_key("logger"));

/// Key under which every root context registers its logger
pub fn logger_key() -> PbjKey<Rc<dyn Logger>> {
    LOGGER_KEY.clone()
}

/// Structured logger used by the registry
///
/// Templates contain `{field}` placeholders which are filled from `fields`.
pub trait Logger {
    fn log(&self, level: Level, template: &str, fields: &[(&str, &str)]);

    fn debug(&self, template: &str, fields: &[(&str, &str)]) {
        self.log(Level::DEBUG, template, fields)
    }

    fn info(&self, template: &str, fields: &[(&str, &str)]) {
        self.log(Level::INFO, template, fields)
    }

    fn warn(&self, template: &str, fields: &[(&str, &str)]) {
        self.log(Level::WARN, template, fields)
    }

    fn error(&self, template: &str, fields: &[(&str, &str)]) {
        self.log(Level::ERROR, template, fields)
    }
}

/// Forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, template: &str, fields: &[(&str, &str)]) {
        let message = format_template(template, fields);
        match level {
            Level::TRACE => tracing::trace!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            _ => tracing::error!("{message}"),
        }
    }
}

/// Replaces `{name}` placeholders, unknown placeholders are kept as they are
pub fn format_template(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after[..close];
        match fields.iter().find(|(field, _)| *field == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let formatted = format_template(
            "Resolved {key} in {ms}ms",
            &[("key", "db"), ("ms", "12")],
        );
        assert_eq!(formatted, "Resolved db in 12ms");
    }

    #[test]
    fn unknown_and_unclosed_placeholders_stay() {
        assert_eq!(format_template("{missing} ok", &[]), "{missing} ok");
        assert_eq!(format_template("open {brace", &[("brace", "x")]), "open {brace");
    }

    #[derive(Default)]
    struct Recording(RefCell<Vec<(Level, String)>>);

    impl Logger for Recording {
        fn log(&self, level: Level, template: &str, fields: &[(&str, &str)]) {
            self.0
                .borrow_mut()
                .push((level, format_template(template, fields)));
        }
    }

    #[test]
    fn helpers_pick_the_level() {
        let logger = Recording::default();
        logger.warn("careful with {what}", &[("what", "cycles")]);
        logger.error("failed", &[]);

        let lines = logger.0.borrow();
        assert_eq!(lines[0], (Level::WARN, "careful with cycles".to_string()));
        assert_eq!(lines[1].0, Level::ERROR);
    }

    #[test]
    fn logger_key_is_stable() {
        assert_eq!(
            crate::key::key_of(&logger_key()),
            crate::key::key_of(&logger_key())
        );
    }
}
