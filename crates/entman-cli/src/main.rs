// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result, anyhow};
use config::Config;
use entman_app::{Extras, ExtrasExport, Gateway, ImportSummary, Panel, StateFilter};
use entman_db::Store;
use entman_testkit::MemoryGateway;
use runtime::DbRuntime;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const DEMO_SEED: u64 = 42;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `entman --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;

    let db_path = if options.demo {
        PathBuf::from(":memory:")
    } else {
        config.db_path()?
    };
    if options.print_db_path {
        println!("{}", db_path.display());
        return Ok(());
    }

    logging::init(config.log_level(), &config.log_file()?)?;
    info!(config = %options.config_path.display(), demo = options.demo, "starting entman");

    let store = Store::open(&db_path).with_context(|| {
        format!(
            "open database {} -- if this path is wrong, set [storage].db_path or ENTMAN_DB_PATH",
            db_path.display()
        )
    })?;
    store.bootstrap()?;
    let mut extras = store.load_extras()?;

    if let Some(path) = &options.import_path {
        let summary = import_extras_file(path, &mut extras)?;
        store.save_extras(&extras)?;
        println!(
            "imported {} favorites, {} tag sets, {} aliases from {}",
            summary.favorites,
            summary.tags,
            summary.aliases,
            path.display()
        );
        return Ok(());
    }

    if options.demo {
        return launch(MemoryGateway::demo(DEMO_SEED), &store, extras, &config, &options);
    }

    let url = config.hass_url()?;
    let client = entman_hass::Client::connect(url, &config.token()?, config.timeout()?)
        .with_context(|| {
            format!(
                "connect to Home Assistant at {url}; check [hass].url and that {} holds a valid token",
                config.token_env()
            )
        })?;
    info!(url, version = client.ha_version().unwrap_or("unknown"), "connected");
    launch(client, &store, extras, &config, &options)
}

fn launch<G: Gateway>(
    gateway: G,
    store: &Store,
    extras: Extras,
    config: &Config,
    options: &CliOptions,
) -> Result<()> {
    if options.check_only {
        return Ok(());
    }

    let mut panel = build_panel(gateway, extras, config, options);
    if options.export_states {
        println!("{}", export_states_json(&mut panel)?);
        return Ok(());
    }
    if let Some(path) = &options.export_path {
        let json = export_extras_json(&mut panel)?;
        return write_output(path, &json);
    }
    if options.list {
        println!("{}", list_text(&mut panel, options)?);
        return Ok(());
    }

    let mut runtime = DbRuntime::new(store);
    entman_tui::run_app(&mut panel, &mut runtime)
}

fn build_panel<G: Gateway>(
    gateway: G,
    extras: Extras,
    config: &Config,
    options: &CliOptions,
) -> Panel<G> {
    let mut panel = Panel::new(gateway).with_extras(extras);
    panel.set_view_state(options.state.unwrap_or_else(|| config.default_view()));
    panel
}

/// Domain and search filters apply after the fetch so the domain can be
/// checked against the loaded entities.
fn list_text<G: Gateway>(panel: &mut Panel<G>, options: &CliOptions) -> Result<String> {
    panel
        .refresh()
        .context("fetch entities; check the connection and try again")?;
    if let Some(domain) = &options.domain {
        panel.set_domain_filter(domain.as_str());
    }
    if let Some(search) = &options.search {
        panel.set_search_term(search.as_str());
    }
    Ok(entman_tui::render_list(&panel.view(), panel.extras()))
}

fn export_extras_json<G: Gateway>(panel: &mut Panel<G>) -> Result<String> {
    panel
        .refresh()
        .context("fetch entities; check the connection and try again")?;
    let export = panel.export_extras()?;
    serde_json::to_string_pretty(&export).context("encode extras export")
}

fn export_states_json<G: Gateway>(panel: &mut Panel<G>) -> Result<String> {
    let entries = panel
        .export_states()
        .context("export entity states; check the connection and try again")?;
    serde_json::to_string_pretty(&entries).context("encode state export")
}

fn import_extras_file(path: &Path, extras: &mut Extras) -> Result<ImportSummary> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read import file {}", path.display()))?;
    let export: ExtrasExport = serde_json::from_str(&text).with_context(|| {
        format!(
            "parse {}; expected a file written by `entman --export`",
            path.display()
        )
    })?;
    let summary = extras
        .import(&export)
        .with_context(|| format!("import {}", path.display()))?;
    info!(path = %path.display(), favorites = summary.favorites, "imported extras");
    Ok(summary)
}

/// `-` writes to stdout.
fn write_output(path: &Path, text: &str) -> Result<()> {
    if path == Path::new("-") {
        println!("{text}");
        return Ok(());
    }
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("write export to {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_db_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    list: bool,
    state: Option<StateFilter>,
    domain: Option<String>,
    search: Option<String>,
    export_path: Option<PathBuf>,
    import_path: Option<PathBuf>,
    export_states: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_db_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        list: false,
        state: None,
        domain: None,
        search: None,
        export_path: None,
        import_path: None,
        export_states: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-path" => {
                options.print_db_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--list" => {
                options.list = true;
            }
            "--state" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--state requires all, enabled, or disabled"))?;
                let state = StateFilter::parse(value.as_ref()).ok_or_else(|| {
                    anyhow!(
                        "unknown state {:?}; use all, enabled, or disabled",
                        value.as_ref()
                    )
                })?;
                options.state = Some(state);
            }
            "--domain" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--domain requires a domain such as light"))?;
                options.domain = Some(value.as_ref().to_owned());
            }
            "--search" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--search requires a search term"))?;
                options.search = Some(value.as_ref().to_owned());
            }
            "--export" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--export requires a file path or -"))?;
                options.export_path = Some(PathBuf::from(value.as_ref()));
            }
            "--import" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--import requires a file path"))?;
                options.import_path = Some(PathBuf::from(value.as_ref()));
            }
            "--export-states" => {
                options.export_states = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("entman: enable and disable Home Assistant entities");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-path             Print resolved database path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --demo                   Launch against a generated registry (in-memory)");
    println!("  --check                  Validate config + DB + Home Assistant login");
    println!("  --list                   Print the entity tree and exit");
    println!("  --state <state>          With --list: all, enabled, or disabled");
    println!("  --domain <domain>        With --list: only entities of this domain");
    println!("  --search <term>          With --list: only entities matching this term");
    println!("  --export <path>          Write favorites, tags and aliases as JSON (- for stdout)");
    println!("  --import <path>          Merge favorites, tags and aliases from an export");
    println!("  --export-states          Print the entity registry as JSON");
    println!("  --help                   Show this help");
}
