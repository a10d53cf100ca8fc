#![allow(dead_code)]

use std::sync::LazyLock;

use stencil::{Context, Engine, InMemoryLoader, Record, TemplateError, Value};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static SUBSCRIBER_INIT: LazyLock<()> = LazyLock::new(|| {
    let filter = std::env::var("STENCIL_LOG")
        .ok()
        .and_then(|s| s.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(tracing::Level::TRACE));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_target(false)
                .compact(),
        )
        .with(filter)
        .try_init()
        .ok();
});

/// Install the test tracing subscriber (once per process).
pub fn setup() {
    #[allow(clippy::let_unit_value)]
    let _ = *SUBSCRIBER_INIT;
}

/// Engine backed by the templates the inheritance and include tests share.
pub fn engine() -> Engine {
    Engine::builder()
        .locator(
            InMemoryLoader::new()
                .with("base", "Hello {% block name %}Josh{% endblock %}!")
                .with("greetings", "Hello {{ name|capitalize }}!")
                .with("greetings_with_errors", "Hello {{ name|notexistent }}!"),
        )
        .build()
}

pub fn render(source: &str, mut ctx: Context) -> Result<String, TemplateError> {
    engine().parse("test", source)?.render(&mut ctx)
}

/// Render and return the output, or the innermost error message.
pub fn render_or_error(source: &str, ctx: Context) -> String {
    match render(source, ctx) {
        Ok(out) => out,
        Err(err) => format!("error: {}", err.root_cause()),
    }
}

fn friend(name: &str, age: i64) -> Record {
    Record::new("Person")
        .with_field("Name", name)
        .with_field("Age", age)
        .with_field("Friends", Value::List(Vec::new()))
}

/// Florian, 40, with three friends, an account and two methods.
pub fn person() -> Value {
    Record::new("Person")
        .with_field("Name", "Florian")
        .with_field("Age", 40)
        .with_field(
            "Friends",
            vec![friend("Georg", 51), friend("Mike", 25), friend("Philipp", 19)],
        )
        .with_field(
            "Accounts",
            std::collections::BTreeMap::from([("default", 1234.56)]),
        )
        .with_method("SayHello", 0, |_, _| vec![Value::from("Hello Flo!")])
        .with_method("SayHelloTo", 2, |_, args| {
            vec![Value::from(format!(
                "Hello to {} and {} from Flo!",
                args[0], args[1]
            ))]
        })
        .into()
}
