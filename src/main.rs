//! viewkit - view engine CLI and preview server.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use std::{
    fs,
    io::{Write, stdout},
    path::Path,
    sync::Arc,
};
use viewkit::{
    cli::{Cli, Commands, DataArgs},
    config::ProjectConfig,
    log,
    serve::{inject_request, serve_views},
    views::{RenderContext, ViewKind, Views, ViewsBuilder},
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Check { list } => check(&config, *list),
        Commands::Render {
            name,
            layout,
            skip_layout,
            data_args,
        } => {
            let views = build_views(&config, false)?;
            let mut ctx = RenderContext::new(load_data(data_args)?);
            if let Some(layout) = layout {
                ctx = ctx.with_layout(layout.as_str());
            }
            if *skip_layout {
                ctx = ctx.skip_layout();
            }
            let mut out = stdout().lock();
            views
                .render(name, &ctx, &mut out)
                .with_context(|| format!("Failed to render `{name}`"))?;
            writeln!(out)?;
            Ok(())
        }
        Commands::Stream {
            action,
            target,
            name,
            data_args,
        } => {
            let views = build_views(&config, false)?;
            let ctx = RenderContext::new(load_data(data_args)?);
            let name = match name.as_deref() {
                Some(name) => name,
                None if !action.needs_content() => "",
                None => bail!("`{action}` needs a partial name"),
            };
            let mut out = stdout().lock();
            views
                .render_stream(*action, target, name, &ctx, &mut out)
                .with_context(|| format!("Failed to encode `{action}` stream for `{target}`"))?;
            writeln!(out)?;
            Ok(())
        }
        Commands::Serve { .. } => {
            let views = Arc::new(build_views(&config, cli.is_serve())?);
            serve_views(&config, views)
        }
    }
}

/// Load and validate configuration from CLI arguments
fn load_config(cli: &Cli) -> Result<ProjectConfig> {
    let config = ProjectConfig::load(cli).context("Failed to load config")?;
    config.validate()?;
    Ok(config)
}

/// Build the view engine. A scan or parse error stops the process here.
fn build_views(config: &ProjectConfig, preview: bool) -> Result<Views> {
    let mut builder = ViewsBuilder::from_config(config);
    if preview {
        builder = builder.injector(inject_request);
    }
    builder.build().context("Failed to build views")
}

fn check(config: &ProjectConfig, list: bool) -> Result<()> {
    let views = build_views(config, false)?;
    if list {
        let registry = views.registry();
        for kind in [ViewKind::Page, ViewKind::Partial, ViewKind::Layout] {
            let names = registry.names(kind);
            if !names.is_empty() {
                log!(kind.name(); "{}", names.join("\n"));
            }
        }
    }
    Ok(())
}

/// Read `--data FILE` as JSON, or `null` when absent.
fn load_data(args: &DataArgs) -> Result<Value> {
    let Some(path) = args.data.as_deref() else {
        return Ok(Value::Null);
    };
    read_json(path)
}

fn read_json(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
