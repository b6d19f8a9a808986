//! Inspection CLI for slothlet module trees.
//!
//! Loads a directory, prints the composed API as a tree (or JSON), and can
//! invoke a single path for quick checks:
//!
//! ```text
//! slothlet ./api
//! slothlet ./api --json
//! slothlet ./api --call math.add --args '[2, 3]'
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;

use boa_engine::JsValue;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use slothlet_engine::{ApiMode, DescribeNode, Mode, Slothlet, SlothletInstance};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Eager,
    Lazy,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ApiModeArg {
    Auto,
    Function,
    Object,
}

/// CLI configuration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect a slothlet module tree", name = "slothlet")]
struct Opt {
    /// Root directory of the module tree.
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Materialization mode. Eager is the default here so the whole tree is
    /// visible without touching it.
    #[arg(long, value_enum, default_value = "eager")]
    mode: ModeArg,

    /// Outer callable-vs-object policy.
    #[arg(long, value_enum, default_value = "auto")]
    api_mode: ApiModeArg,

    /// Maximum folder depth to recurse into.
    #[arg(long)]
    depth: Option<usize>,

    /// Print the description as JSON instead of a tree.
    #[arg(long)]
    json: bool,

    /// Call this dotted path after loading.
    #[arg(long, value_name = "PATH")]
    call: Option<String>,

    /// JSON array of arguments for `--call`.
    #[arg(long, value_name = "JSON", default_value = "[]")]
    args: String,

    /// Instance context as a JSON object.
    #[arg(long, value_name = "JSON")]
    context: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let opt = Opt::parse();

    let level = if opt.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    if let Err(err) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("{}: {err}", "logger".red());
    }

    match run(&opt) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("{}: {err}", "error".red().bold());
            std::process::exit(1);
        }
    }
}

fn run(opt: &Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Slothlet::builder(&opt.dir).mode(match opt.mode {
        ModeArg::Eager => Mode::Eager,
        ModeArg::Lazy => Mode::Lazy,
    });
    builder = builder.api_mode(match opt.api_mode {
        ApiModeArg::Auto => ApiMode::Auto,
        ApiModeArg::Function => ApiMode::Function,
        ApiModeArg::Object => ApiMode::Object,
    });
    if let Some(depth) = opt.depth {
        builder = builder.api_depth(depth);
    }
    if let Some(context) = &opt.context {
        builder = builder.context(serde_json::from_str(context)?);
    }

    let mut api = builder.build()?;

    if let Some(path) = &opt.call {
        let result = call_path(&mut api, path, &opt.args)?;
        println!("{result}");
    } else {
        let tree = api.describe()?;
        if opt.json {
            println!("{}", serde_json::to_string_pretty(&tree)?);
        } else {
            println!("{}", opt.dir.display().to_string().bold());
            print_tree(&tree, "");
        }
    }

    api.shutdown()?;
    Ok(())
}

fn call_path(
    api: &mut SlothletInstance,
    path: &str,
    args: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let parsed: Vec<serde_json::Value> = serde_json::from_str(args)?;
    let mut values = Vec::with_capacity(parsed.len());
    for arg in &parsed {
        let value = JsValue::from_json(arg, api.context_mut())
            .map_err(|e| format!("argument conversion: {e}"))?;
        values.push(value);
    }
    let result = api.call(path, &values)?;
    let json = result
        .to_json(api.context_mut())
        .map_err(|e| format!("result conversion: {e}"))?;
    Ok(json.to_string())
}

fn print_tree(node: &DescribeNode, indent: &str) {
    for (i, child) in node.children.iter().enumerate() {
        let last = i + 1 == node.children.len();
        let branch = if last { "└─" } else { "├─" };
        let name = child.path.rsplit('.').next().unwrap_or(&child.path);
        let label = match child.kind.as_str() {
            "function" => name.green().to_string(),
            "object" => name.cyan().to_string(),
            "placeholder" => format!("{} {}", name.yellow(), "(lazy)".dimmed()),
            _ => name.normal().to_string(),
        };
        println!("{indent}{branch} {label}");
        let next_indent = if last {
            format!("{indent}   ")
        } else {
            format!("{indent}│  ")
        };
        print_tree(child, &next_indent);
    }
}
