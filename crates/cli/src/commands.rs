use std::env;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use stencil_engine::{Context, RunOptions, RunOutcome, discover, get_job, run};
use stencil_types::{DEFAULT_JOB_NAME, UserSettings};
use stencil_util::{SettingsStore, StencilHome, absolutize, expand_tilde};
use tracing::{debug, info};

use crate::console::ConsoleRuntime;
use crate::context_layers::merged_context;

pub fn build_cli() -> Command {
    let package = Arg::new("package")
        .long("package")
        .short('p')
        .action(ArgAction::Set)
        .help("Local path or [host/]owner/repo[@version] reference");
    let script = Arg::new("script")
        .long("script")
        .short('s')
        .action(ArgAction::Set)
        .help("Job document inside the package");
    let job = Arg::new("job").default_value(DEFAULT_JOB_NAME).help("Job name or saved alias");

    Command::new("stencil")
        .about("Job-driven project scaffolding")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .action(ArgAction::Set)
                .default_value("warn")
                .help("Log filter used when RUST_LOG is unset"),
        )
        .subcommand(
            Command::new("run")
                .about("Run a job from a package")
                .arg(job.clone())
                .arg(package.clone())
                .arg(script.clone())
                .arg(
                    Arg::new("context")
                        .long("context")
                        .short('c')
                        .action(ArgAction::Append)
                        .value_name("KEY=VALUE")
                        .help("Context value; may be repeated"),
                )
                .arg(
                    Arg::new("context-from")
                        .long("context-from")
                        .action(ArgAction::Set)
                        .value_name("FILE")
                        .help("YAML or JSON file merged into the context"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .short('t')
                        .action(ArgAction::Set)
                        .default_value(".")
                        .help("Directory files are generated into"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Describe a job without running it")
                .arg(job)
                .arg(package)
                .arg(script)
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print the job as JSON")),
        )
        .subcommand(
            Command::new("discover")
                .about("List the job aliases a package provides")
                .arg(Arg::new("package").default_value("."))
                .arg(Arg::new("save").long("save").action(ArgAction::SetTrue).help("Store the aliases in the user settings")),
        )
        .subcommand(Command::new("list").about("List saved job aliases"))
        .subcommand(
            Command::new("config")
                .about("Inspect or change user settings")
                .subcommand_required(true)
                .subcommand(Command::new("view").about("Print the settings"))
                .subcommand(Command::new("path").about("Print the settings file location"))
                .subcommand(Command::new("set-url").about("Set the default package").arg(Arg::new("url").required(true))),
        )
}

pub fn dispatch(matches: &ArgMatches) -> Result<()> {
    let home = StencilHome::locate();
    let store = SettingsStore::open(&home);
    let settings = store.load().with_context(|| format!("failed to load settings from {}", store.path().display()))?;
    debug!(home = %home.root().display(), "loaded settings");

    match matches.subcommand() {
        Some(("run", sub)) => run_job(sub, &home, &settings),
        Some(("info", sub)) => show_job(sub, &settings),
        Some(("discover", sub)) => discover_aliases(sub, &store, settings),
        Some(("list", _)) => {
            list_aliases(&settings);
            Ok(())
        }
        Some(("config", sub)) => config(sub, &store, settings),
        _ => anyhow::bail!("expected a subcommand"),
    }
}

/// Options for the job named on the command line. A saved alias supplies
/// package, job and script when no package was given explicitly.
fn job_options(settings: &UserSettings, matches: &ArgMatches) -> RunOptions {
    let job = matches.get_one::<String>("job").map(String::as_str).unwrap_or(DEFAULT_JOB_NAME);
    let package = matches.get_one::<String>("package");
    let script = matches.get_one::<String>("script");

    let mut options = match (package, settings.alias(job)) {
        (None, Some(alias)) => {
            debug!(alias = job, package = %alias.package, "resolved job alias");
            let options = RunOptions::new(&alias.package).with_job(&alias.job);
            match script {
                Some(script) => options.with_script(script),
                None if !alias.script.is_empty() => options.with_script(&alias.script),
                None => options,
            }
        }
        _ => {
            let package = package.cloned().or_else(|| settings.url.clone()).unwrap_or_else(|| ".".to_string());
            let options = RunOptions::new(package).with_job(job);
            match script {
                Some(script) => options.with_script(script),
                None => options,
            }
        }
    };
    options.cache_dir = settings.cache_dir.clone();
    options
}

fn run_job(matches: &ArgMatches, home: &StencilHome, settings: &UserSettings) -> Result<()> {
    let mut options = job_options(settings, matches);
    let cwd = env::current_dir().context("failed to read the working directory")?;
    let assignments: Vec<String> = matches.get_many::<String>("context").map(|values| values.cloned().collect()).unwrap_or_default();
    let from_file = matches.get_one::<String>("context-from").map(|path| expand_tilde(path));
    options.context = merged_context(&home.context_path(), from_file.as_deref(), &cwd, &assignments)?;

    let target = matches.get_one::<String>("target").map(String::as_str).unwrap_or(".");
    let context = seed_context(&absolutize(&expand_tilde(target)));

    info!(package = %options.package, job = %options.job_name(), "running job");
    let mut runtime = ConsoleRuntime::stdio(settings.parameter_overrides.clone());
    match run(context, &options, &mut runtime)? {
        RunOutcome::Completed(_) => {}
        RunOutcome::Aborted => eprintln!("aborted"),
    }
    Ok(())
}

/// Starting context for a run: the process environment and the target.
fn seed_context(target: &Path) -> Context {
    let mut context = Context::new();
    let environment = env::vars().map(|(key, value)| (key, Value::String(value))).collect();
    context.insert("env", Value::Object(environment));
    context.set_target(target);
    context
}

fn show_job(matches: &ArgMatches, settings: &UserSettings) -> Result<()> {
    let options = job_options(settings, matches);
    let info = get_job(&options)?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&info.to_value())?);
        return Ok(());
    }

    println!("job:         {}", info.name);
    println!("description: {}", info.job.description.as_deref().unwrap_or(""));
    println!("script:      {}", info.script_url.as_deref().unwrap_or("<auto generated>"));
    if !info.job.parameters.is_empty() {
        println!("parameters:");
        for parameter in &info.job.parameters {
            let name = parameter.get("name").and_then(Value::as_str).unwrap_or("?");
            match parameter.get("type").and_then(Value::as_str) {
                Some(kind) => println!("  - {name} ({kind})"),
                None => println!("  - {name}"),
            }
        }
    }
    Ok(())
}

fn discover_aliases(matches: &ArgMatches, store: &SettingsStore, mut settings: UserSettings) -> Result<()> {
    let package = matches.get_one::<String>("package").cloned().unwrap_or_else(|| ".".to_string());
    let mut options = RunOptions::new(package_key(&package));
    options.cache_dir = settings.cache_dir.clone();
    let discovery = discover(&options)?;

    for (alias, entry) in &discovery.aliases {
        println!("{alias:<32} {}", entry.description);
    }
    if discovery.aliases.is_empty() {
        println!("no named job documents in {}", options.package);
    }

    if matches.get_flag("save") {
        let count = discovery.aliases.len();
        settings.library.insert(options.package.clone(), discovery.aliases);
        store.save(&settings)?;
        println!("saved {count} aliases to {}", store.path().display());
    }
    Ok(())
}

/// Local packages are saved by absolute path so aliases work from any
/// directory; references are kept as written.
fn package_key(package: &str) -> String {
    let local = expand_tilde(package);
    if local.exists() {
        absolutize(&local).to_string_lossy().into_owned()
    } else {
        package.to_string()
    }
}

fn list_aliases(settings: &UserSettings) {
    let mut any = false;
    for (alias, entry) in settings.aliases() {
        any = true;
        println!("{alias:<32} {:<40} {}", entry.package, entry.description);
    }
    if !any {
        println!("no saved aliases; run `stencil discover --save` in a package");
    }
}

fn config(matches: &ArgMatches, store: &SettingsStore, mut settings: UserSettings) -> Result<()> {
    match matches.subcommand() {
        Some(("view", _)) => print!("{}", serde_yaml::to_string(&settings)?),
        Some(("path", _)) => println!("{}", store.path().display()),
        Some(("set-url", sub)) => {
            let url = sub.get_one::<String>("url").cloned().context("missing url")?;
            settings.url = Some(url);
            store.save(&settings)?;
        }
        _ => anyhow::bail!("expected a config subcommand"),
    }
    Ok(())
}
