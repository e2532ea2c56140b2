use std::{convert::Infallible, rc::Rc};

use pbj::{pbj_key, type_key, Construct, Context, DynError, Resolution};

#[derive(Debug)]
struct Database {
    url: Rc<String>,
}

impl Construct for Database {
    fn construct(resolution: &Resolution<'_>) -> Result<Self, DynError> {
        let url = resolution.resolve(&url_key())?;
        Ok(Database { url })
    }
}

fn url_key() -> pbj::PbjKey<String> {
    thread_local! {
        static URL: pbj::PbjKey<String> = pbj_key("url");
    }
    URL.with(Clone::clone)
}

fn main() {
    let ctx = Context::builder().name("demo").build();
    ctx.register(&url_key())
        .with_value("postgres://localhost/app".to_string());
    ctx.register_type::<Database>();

    let db = ctx.resolve(&type_key::<Database>()).unwrap();
    println!("{:?}", db);

    let greeting = pbj_key::<String>("greeting");
    ctx.register(&greeting).with_async_factory(|_| async {
        Ok::<_, Infallible>("hello from a future".to_string())
    });
    let greeting = futures::executor::block_on(ctx.resolve_async(&greeting)).unwrap();
    println!("{greeting}");

    println!("{:#}", ctx.to_json().unwrap());
}
