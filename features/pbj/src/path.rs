use std::rc::Rc;

use serde_json::Value;

use crate::{
    container::Context,
    errors::PbjError,
    factories::{Factory, Service},
    key::{KeyId, ServiceKey},
    resolver::{rc::downcast_required, Pbj},
    types::{Instance, TypeInfo},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Parses `a.b[0].c`
fn parse_path(path: &str) -> Result<Vec<Segment>, PbjError> {
    let invalid = || PbjError::InvalidArgument(format!("malformed path '{path}'"));
    let mut segments = Vec::new();

    for part in path.split('.') {
        let (field, mut indices) = match part.find('[') {
            Some(open) => (&part[..open], &part[open..]),
            None => (part, ""),
        };

        if !field.is_empty() {
            segments.push(Segment::Field(field.to_string()));
        } else if indices.is_empty() {
            return Err(invalid());
        }

        while !indices.is_empty() {
            let close = indices.find(']').ok_or_else(invalid)?;
            if !indices.starts_with('[') {
                return Err(invalid());
            }
            let index = indices[1..close].parse().map_err(|_| invalid())?;
            segments.push(Segment::Index(index));
            indices = &indices[close + 1..];
        }
    }

    Ok(segments)
}

fn navigate<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Field(name) => current.get(name.as_str()),
        Segment::Index(index) => current.get(*index),
    })
}

impl Context {
    /// A service holding the value found at `path` inside a JSON service
    ///
    /// The derived service depends on `source` and follows its changes. A missing or null
    /// value resolves to `default`, or to null without one. The same source and path give
    /// the same derived service.
    pub fn path_of<K>(
        &self,
        source: &K,
        path: &str,
        default: Option<Value>,
    ) -> Result<Pbj<Value>, PbjError>
    where
        K: ServiceKey<Output = Value>,
    {
        let source = source.key_id();
        let memo = (source.clone(), path.to_string());
        if let Some(existing) = self.0.paths.borrow().get(&memo).cloned() {
            return Ok(self.pbj_id(existing));
        }

        let segments = parse_path(path)?;
        let key = KeyId::symbol(&format!("{source}.{path}"));
        let record = self.record_id(&key);
        record.set_optional(true);
        record.add_dependency(&source);

        let from = source.clone();
        record.set_service(Service::Factory(Factory::raw(
            TypeInfo::of::<Value>(),
            move |resolution| {
                let root: Rc<Value> =
                    downcast_required(&from, resolution.resolve_instance(&from)?)?;
                let found = navigate(&root, &segments)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .or_else(|| default.clone());
                Ok(found.map(Instance::new))
            },
        )));

        self.0.paths.borrow_mut().insert(memo, key.clone());
        Ok(self.pbj_id(key))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::key::pbj_key;

    #[test]
    fn paths_are_parsed() {
        assert_eq!(
            parse_path("servers[1].port").unwrap(),
            vec![
                Segment::Field("servers".into()),
                Segment::Index(1),
                Segment::Field("port".into())
            ]
        );
        assert_eq!(parse_path("[0][2]").unwrap(), vec![Segment::Index(0), Segment::Index(2)]);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for path in ["", "a..b", "a[", "a[x]", "a]b["] {
            assert!(parse_path(path).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn derived_values_follow_the_source() {
        let ctx = Context::new();
        let config = pbj_key::<Value>("config");
        ctx.register(&config)
            .with_value(json!({ "db": { "hosts": ["a", "b"] } }));

        let host = ctx.path_of(&config, "db.hosts[1]", None).unwrap();
        assert_eq!(*host.get().unwrap(), json!("b"));

        ctx.register(&config)
            .with_value(json!({ "db": { "hosts": ["c", "d"] } }));
        assert_eq!(*host.get().unwrap(), json!("d"));
    }

    #[test]
    fn missing_values_use_the_default() {
        let ctx = Context::new();
        let config = pbj_key::<Value>("config");
        ctx.register(&config).with_value(json!({}));

        let port = ctx.path_of(&config, "port", Some(json!(8080))).unwrap();
        assert_eq!(*port.get().unwrap(), json!(8080));

        let missing = ctx.path_of(&config, "host", None).unwrap();
        assert!(missing.get_optional().unwrap().is_none());
    }

    #[test]
    fn derived_services_are_memoized() {
        let ctx = Context::new();
        let config = pbj_key::<Value>("config");
        ctx.register(&config).with_value(json!({ "a": 1 }));

        let first = ctx.path_of(&config, "a", None).unwrap();
        let second = ctx.path_of(&config, "a", None).unwrap();
        assert_eq!(first.key(), second.key());
    }
}
