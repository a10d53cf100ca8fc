//! `stencil`: render a template with a JSON context.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use stencil::{Context, Engine, FileLocator, Value};
use tracing::debug;

mod logging;

#[derive(Debug, Parser)]
#[command(version, about = "Render a stencil template")]
struct Args {
    /// Template file to render
    template: Utf8PathBuf,

    /// JSON file whose top-level object becomes the template context
    #[arg(short, long)]
    context: Option<Utf8PathBuf>,

    /// Set a context variable. The value is parsed as JSON, falling back to a
    /// plain string. Applied after `--context`.
    #[arg(short = 'D', long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Directory that `extends` and `include` names resolve against
    /// (defaults to the template's directory)
    #[arg(short, long)]
    templates: Option<Utf8PathBuf>,

    /// Do not HTML-escape `{{ }}` output
    #[arg(long)]
    no_autoescape: bool,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in `{raw}`"));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((key.to_owned(), value))
}

fn load_context(args: &Args) -> Result<Context> {
    let mut ctx = Context::new();
    if let Some(path) = &args.context {
        let raw = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading context file {path}"))?;
        let json: serde_json::Value = serde_json::from_str(&raw)
            .into_diagnostic()
            .wrap_err_with(|| format!("parsing context file {path}"))?;
        let serde_json::Value::Object(fields) = json else {
            bail!("context file {path} must contain a JSON object");
        };
        ctx.extend(fields.into_iter().map(|(k, v)| (k, Value::from(v))));
    }
    ctx.extend(args.vars.iter().cloned());
    Ok(ctx)
}

fn main() -> Result<()> {
    logging::init_standard_tracing();
    let args = Args::parse();

    let mut builder = Engine::builder().autoescape(!args.no_autoescape);
    if let Some(dir) = &args.templates {
        builder = builder.locator(FileLocator::new(dir.clone()));
    }
    let engine = builder.build();

    let template = engine.load_file(&args.template)?;
    let mut ctx = load_context(&args)?;
    debug!(template = template.name(), vars = ctx.len(), "rendering");

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("creating {path}"))?;
            template.render_to(&mut ctx, file)?;
        }
        None => {
            let out = template.render(&mut ctx)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(out.as_bytes()).into_diagnostic()?;
            stdout.flush().into_diagnostic()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_parse_as_json_or_strings() {
        let (key, value) = parse_var("count=3").unwrap();
        assert_eq!(key, "count");
        assert!(matches!(value, Value::Int(3)));

        let (_, value) = parse_var("names=[\"a\",\"b\"]").unwrap();
        assert_eq!(value.to_string(), "[a, b]");

        let (_, value) = parse_var("greeting=hello world").unwrap();
        assert_eq!(value.as_str(), Some("hello world"));

        let (_, value) = parse_var("eq=a=b").unwrap();
        assert_eq!(value.as_str(), Some("a=b"));

        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn context_file_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("ctx.json"), r#"{"name": "flo", "age": 40}"#).unwrap();
        std::fs::write(root.join("list.json"), "[1, 2]").unwrap();

        let args = Args::parse_from([
            "stencil",
            "page.html",
            "--context",
            root.join("ctx.json").as_str(),
            "-D",
            "age=41",
        ]);
        let ctx = load_context(&args).unwrap();
        assert_eq!(ctx.get("name").and_then(Value::as_str), Some("flo"));
        assert!(matches!(ctx.get("age"), Some(Value::Int(41))));

        let args = Args::parse_from(["stencil", "page.html", "-c", root.join("list.json").as_str()]);
        assert!(load_context(&args).is_err());
    }
}
