use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering},
};

use pbj::{
    pbj_key, type_key, Arg, Construct, Context, DynError, Pbj, PbjError, ProxyState, Resolution,
};

fn counting_factory(calls: &Rc<Cell<u32>>) -> impl Fn(&Resolution<'_>) -> Result<u32, DynError> {
    let calls = calls.clone();
    move |_| {
        calls.set(calls.get() + 1);
        Ok(calls.get())
    }
}

#[test]
fn cacheable_services_are_built_once() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let key = pbj_key::<u32>("counter");
    ctx.register(&key).with_factory(counting_factory(&calls));

    let first = ctx.resolve(&key).unwrap();
    let second = ctx.resolve(&key).unwrap();
    assert_eq!(*first, 1);
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(calls.get(), 1);
}

#[test]
fn uncacheable_services_are_rebuilt() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let key = pbj_key::<u32>("counter");
    ctx.register(&key)
        .with_factory(counting_factory(&calls))
        .with_cacheable(false);

    assert_eq!(*ctx.resolve(&key).unwrap(), 1);
    assert_eq!(*ctx.resolve(&key).unwrap(), 2);
}

static ANSWER_CALLS: AtomicU32 = AtomicU32::new(0);

fn answer(resolution: &Resolution<'_>) -> Result<u32, PbjError> {
    ANSWER_CALLS.fetch_add(1, Ordering::SeqCst);
    let base: Rc<u32> = resolution.arg(0)?;
    Ok(*base + 2)
}

#[test]
fn registering_the_same_service_again_keeps_the_cache() {
    let ctx = Context::new();
    let base = pbj_key::<u32>("base");
    let other = pbj_key::<u32>("other");
    let key = pbj_key::<u32>("answer");
    ctx.register(&base).with_value(40);
    ctx.register(&other).with_value(0);

    ctx.register(&key).with_factory(answer).with_arg(&base);
    assert_eq!(*ctx.resolve(&key).unwrap(), 42);

    ctx.register(&key)
        .with_factory(answer)
        .with_args([Arg::key(&base)]);
    assert_eq!(*ctx.resolve(&key).unwrap(), 42);
    assert_eq!(ANSWER_CALLS.load(Ordering::SeqCst), 1);

    ctx.register(&key).with_args([Arg::key(&other)]);
    assert_eq!(*ctx.resolve(&key).unwrap(), 2);
    assert_eq!(ANSWER_CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn proxies_are_lazy() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let key = pbj_key::<u32>("lazy");
    ctx.register(&key).with_factory(counting_factory(&calls));

    let proxy = ctx.pbj(&key);
    assert!(matches!(proxy.state(), ProxyState::Unbuilt));
    assert_eq!(calls.get(), 0);

    assert_eq!(*proxy.get().unwrap(), 1);
    assert!(matches!(proxy.state(), ProxyState::Primitive));
    assert_eq!(calls.get(), 1);
}

#[test]
fn dependency_changes_reach_dependents() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let dep = pbj_key::<u32>("dep");
    let factory = pbj_key::<u32>("factory");

    ctx.register(&dep).with_factory(counting_factory(&calls));
    ctx.register(&factory)
        .with_factory(|r| {
            let dep: Pbj<u32> = r.arg(0)?;
            Ok::<_, PbjError>(*dep.get()? + 1)
        })
        .with_arg(ctx.pbj(&dep));

    assert_eq!(*ctx.resolve(&factory).unwrap(), 2);
    assert_eq!(*ctx.resolve(&factory).unwrap(), 2);

    ctx.register(&dep).with_factory(|_| Ok::<_, DynError>(100));
    assert_eq!(*ctx.resolve(&factory).unwrap(), 101);
}

#[test]
fn invalidation_is_transitive() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let a = pbj_key::<u32>("a");
    let b = pbj_key::<u32>("b");
    let c = pbj_key::<u32>("c");

    ctx.register(&a).with_factory(counting_factory(&calls));
    let a_key = a.clone();
    ctx.register(&b)
        .with_factory(move |r| r.resolve(&a_key).map(|a| *a * 10));
    let b_key = b.clone();
    ctx.register(&c)
        .with_factory(move |r| r.resolve(&b_key).map(|b| *b + 1));

    assert_eq!(*ctx.resolve(&c).unwrap(), 11);
    ctx.invalidate(&a);
    assert!(ctx.record(&c).invalid());
    assert_eq!(*ctx.resolve(&c).unwrap(), 21);
}

#[test]
fn records_never_depend_on_themselves() {
    let ctx = Context::new();
    let key = pbj_key::<u32>("selfish");
    let record = ctx.register(&key).with_value(1).record();

    assert!(!record.add_dependency(record.key()));
    assert!(record.dependencies().is_empty());
}

#[test]
fn primitives_pass_through() {
    let ctx = Context::new();
    let name = pbj_key::<String>("name");
    let flag = pbj_key::<bool>("flag");
    ctx.register(&name).with_value("pbj".to_string());
    ctx.register(&flag).with_value(true);

    let proxy = ctx.pbj(&name);
    assert_eq!(format!("{proxy}"), "pbj");
    assert_eq!(proxy.to_string() + "!", "pbj!");
    assert!(proxy.is::<String>().unwrap());
    assert!(!proxy.is::<u8>().unwrap());
    assert!(proxy.is_primitive().unwrap());
    assert!(ctx.record(&name).is_primitive());
    assert_eq!(ctx.pbj(&flag).to_string(), "true");
}

#[test]
fn null_values_need_the_optional_accessor() {
    let ctx = Context::new();
    let nothing = pbj_key::<String>("nothing");
    ctx.register(&nothing).with_optional_value(None);

    let proxy = ctx.pbj(&nothing);
    assert!(proxy.is_null().unwrap());
    assert!(proxy.get_optional().unwrap().is_none());
    assert!(matches!(proxy.get(), Err(PbjError::Null { .. })));
    assert_eq!(proxy.to_string(), "null");
}

#[test]
fn non_optional_factories_must_produce_a_value() {
    let ctx = Context::new();
    let key = pbj_key::<u32>("maybe");
    ctx.register(&key)
        .with_optional_factory(|_| Ok::<_, DynError>(None))
        .with_optional(false);

    let err = ctx.resolve(&key).unwrap_err();
    assert_eq!(err.to_string(), "'maybe' resolved to nothing but is not optional");
    assert!(ctx.record(&key).error().is_some());
}

#[test]
fn factory_errors_are_retried() {
    let ctx = Context::new();
    let attempts = Rc::new(Cell::new(0));
    let key = pbj_key::<u32>("flaky");
    let counter = attempts.clone();
    ctx.register(&key).with_factory(move |_| {
        counter.set(counter.get() + 1);
        if counter.get() == 1 {
            Err("not yet")
        } else {
            Ok(7)
        }
    });

    let err = ctx.resolve(&key).unwrap_err();
    assert_eq!(err.to_string(), "Factory for 'flaky' failed - error: not yet");
    assert_eq!(*ctx.resolve(&key).unwrap(), 7);
    assert!(ctx.record(&key).error().is_none());
    assert_eq!(attempts.get(), 2);
}

#[test]
fn values_with_arguments_cant_be_invoked() {
    let ctx = Context::new();
    let key = pbj_key::<u32>("plain");
    ctx.register(&key).with_value(1).with_arg(Arg::value(2_u32));

    assert!(matches!(
        ctx.resolve(&key),
        Err(PbjError::NotInvokable { .. })
    ));
}

struct ServiceA {
    b: Pbj<ServiceB>,
}
struct ServiceB {
    a: Pbj<ServiceA>,
}

#[test]
fn cycles_through_proxies_resolve() {
    let ctx = Context::new();
    let a = pbj_key::<ServiceA>("a");
    let b = pbj_key::<ServiceB>("b");

    let b_key = b.clone();
    ctx.register(&a)
        .with_factory(move |r| Ok::<_, PbjError>(ServiceA { b: r.pbj(&b_key) }));
    let a_key = a.clone();
    ctx.register(&b)
        .with_factory(move |r| Ok::<_, PbjError>(ServiceB { a: r.pbj(&a_key) }));

    let service_a = ctx.resolve(&a).unwrap();
    let service_b = service_a.b.get().unwrap();
    assert!(Rc::ptr_eq(&service_b.a.get().unwrap(), &service_a));
    assert!(ctx.check().is_ok());
}

#[test]
fn forced_cycles_fail_instead_of_recursing() {
    let ctx = Context::new();
    let a = pbj_key::<u32>("a");
    let b = pbj_key::<u32>("b");

    let b_key = b.clone();
    ctx.register(&a)
        .with_factory(move |r| r.resolve(&b_key).map(|b| *b));
    let a_key = a.clone();
    ctx.register(&b)
        .with_factory(move |r| r.resolve(&a_key).map(|a| *a));

    let err = ctx.resolve(&a).unwrap_err();
    assert!(matches!(err, PbjError::Circular { .. }), "{err}");
    assert!(ctx.check().is_err());
}

#[test]
fn initializers_run_after_dependencies() {
    let ctx = Context::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let db = pbj_key::<String>("db");
    let repo = pbj_key::<String>("repo");

    let events = log.clone();
    let init_events = log.clone();
    ctx.register(&db)
        .with_factory(move |_| {
            events.borrow_mut().push("build db");
            Ok::<_, DynError>("db".to_string())
        })
        .with_initialize("connect", move |_: &String| {
            init_events.borrow_mut().push("init db");
            Ok::<_, DynError>(())
        });

    let events = log.clone();
    let init_events = log.clone();
    let db_key = db.clone();
    ctx.register(&repo)
        .with_factory(move |r| {
            let db = r.resolve(&db_key)?;
            events.borrow_mut().push("build repo");
            Ok::<_, DynError>(format!("repo on {db}"))
        })
        .with_initialize("warm_up", move |_: &String| {
            init_events.borrow_mut().push("init repo");
            Ok::<_, DynError>(())
        });

    ctx.resolve(&repo).unwrap();
    ctx.resolve(&repo).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["build db", "init db", "build repo", "init repo"]
    );

    log.borrow_mut().clear();
    ctx.invalidate(&db);
    ctx.resolve(&repo).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["build db", "init db", "build repo", "init repo"]
    );
    assert_eq!(ctx.record(&repo).initializer_method().as_deref(), Some("warm_up"));
}

#[test]
fn failing_initializers_fail_the_resolution() {
    let ctx = Context::new();
    let key = pbj_key::<u32>("service");
    ctx.register(&key)
        .with_factory(|_| Ok::<_, DynError>(1))
        .with_initialize("start", |_: &u32| Err("port in use"));

    let err = ctx.resolve(&key).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Initializer 'start' of 'service' failed - error: port in use"
    );
    assert!(ctx.record(&key).invalid());
}

#[test]
fn interceptors_wrap_the_invocation() {
    let ctx = Context::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let key = pbj_key::<u32>("intercepted");

    let outer = log.clone();
    let inner = log.clone();
    ctx.register(&key)
        .with_factory(|_| Ok::<_, DynError>(20))
        .with_interceptor(move |next| {
            outer.borrow_mut().push("outer");
            let value = next.next()?;
            Ok(value.map(|v| Rc::new(*v * 2)))
        })
        .with_interceptor(move |next| {
            inner.borrow_mut().push("inner");
            let value = next.next()?;
            Ok(value.map(|v| Rc::new(*v + 1)))
        });

    assert_eq!(*ctx.resolve(&key).unwrap(), 42);
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

#[test]
fn interceptors_can_substitute_values() {
    let ctx = Context::new();
    let key = pbj_key::<String>("secret");
    ctx.register(&key)
        .with_factory(|_| Err::<String, _>("vault offline"))
        .with_interceptor(|next| match next.next() {
            Ok(value) => Ok(value),
            Err(_) => Ok(Some(Rc::new("fallback".to_string()))),
        });

    assert_eq!(*ctx.resolve(&key).unwrap(), "fallback");
}

#[test]
fn lists_follow_registrations() {
    let ctx = Context::new();
    let plugin = pbj_key::<String>("plugin");
    let list = ctx.list_of(&plugin);
    assert!(list.is_empty().unwrap());

    ctx.register(&pbj_key::<String>("auth"))
        .with_value("auth".to_string())
        .with_tag(&plugin);
    ctx.register(&pbj_key::<String>("untagged"))
        .with_value("untagged".to_string());
    let names: Vec<String> = list.get().unwrap().iter().map(|s| s.to_string()).collect();
    assert_eq!(names, vec!["auth"]);

    ctx.register(&pbj_key::<String>("cache"))
        .with_value("cache".to_string())
        .with_tags([&plugin]);
    let names: Vec<String> = list.get().unwrap().iter().map(|s| s.to_string()).collect();
    assert_eq!(names, vec!["auth", "cache"]);
    assert_eq!(list.len().unwrap(), 2);
}

#[derive(Debug)]
struct Handler(&'static str);

#[test]
fn type_keys_list_every_provider() {
    let ctx = Context::new();
    ctx.register(&pbj_key::<Handler>("get")).with_value(Handler("get"));
    ctx.register(&pbj_key::<Handler>("post"))
        .with_factory(|_| Ok::<_, DynError>(Handler("post")));

    let handlers = ctx.list_of(&type_key::<Handler>());
    let names: Vec<&str> = handlers.get().unwrap().iter().map(|h| h.0).collect();
    assert_eq!(names, vec!["get", "post"]);
}

struct Greeter {
    name: Rc<String>,
}

impl Construct for Greeter {
    fn construct(resolution: &Resolution<'_>) -> Result<Self, DynError> {
        let name = resolution.arg(0)?;
        Ok(Greeter { name })
    }
}

#[test]
fn types_construct_themselves() {
    let ctx = Context::new();
    let name = pbj_key::<String>("name");
    ctx.register(&name).with_value("ada".to_string());
    ctx.register_type::<Greeter>().with_arg(&name);

    let greeter = ctx.resolve(&type_key::<Greeter>()).unwrap();
    assert_eq!(greeter.name.as_str(), "ada");
    assert!(ctx.record(&type_key::<Greeter>()).is_constructor());
}

fn forty_two(_: &Resolution<'_>) -> Result<u32, DynError> {
    Ok(42)
}

#[test]
fn functions_are_their_own_keys() {
    let ctx = Context::new();
    let first = ctx.resolve_fn(forty_two).unwrap();
    let second = ctx.resolve_fn(forty_two).unwrap();
    assert_eq!(*first, 42);
    assert!(Rc::ptr_eq(&first, &second));

    let handle = ctx.register_fn(forty_two);
    assert_eq!(handle.key().name(), "forty_two");
}

#[test]
fn errors_name_the_key() {
    let ctx = Context::new();
    let key = pbj_key::<u32>("database-url");
    let err = ctx.resolve(&key).unwrap_err();
    assert_eq!(
        err.to_string(),
        "No service has been registered for 'database-url'"
    );
}

#[test]
fn stream_receives_new_services() {
    use futures::StreamExt;

    let ctx = Context::new();
    let mut added = ctx.service_added_stream();
    let key = pbj_key::<u8>("fresh");
    ctx.register(&key).with_value(1);

    let received = futures::executor::block_on(added.next()).unwrap();
    assert_eq!(received.name(), "fresh");
}

#[test]
fn visit_all_walks_dependencies_first() {
    let ctx = Context::new();
    let config = pbj_key::<u32>("config");
    let pool = pbj_key::<u32>("pool");
    let repository = pbj_key::<u32>("repository");
    ctx.register(&repository)
        .with_factory(|r| r.arg::<Rc<u32>>(0).map(|v| *v + 1))
        .with_arg(&pool);
    ctx.register(&pool)
        .with_factory(|r| r.arg::<Rc<u32>>(0).map(|v| *v * 2))
        .with_arg(&config);
    ctx.register(&config).with_value(20);
    assert_eq!(*ctx.resolve(&repository).unwrap(), 41);

    let mut visited = Vec::new();
    let signals = ctx.visit_all(|record| {
        visited.push(record.name());
        match record.name().as_str() {
            "pool" => pbj::Visit::Destroy,
            _ => pbj::Visit::Continue,
        }
    });

    assert_eq!(visited, vec!["logger", "config", "pool", "repository"]);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].0.name(), "pool");
    assert_eq!(signals[0].1, pbj::Visit::Destroy);
}
