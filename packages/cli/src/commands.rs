//! Subcommand execution. Each command returns the text to print.

use std::path::Path;
use std::sync::Arc;

use nu_ansi_term::{Color, Style};
use serde_json::Value;
use tracing::info;

use blockframe_bundle::{BundleResolver, ReleaseSource};
use blockframe_kv::{JsonFileKv, KvBackend, ScopeKey};
use blockframe_runtime::{Diff, HostConfig};

use crate::args::{Args, BundleArgs, Command, ScopeArgs, StoreAction};
use crate::error::{CliError, Result};
use crate::settings;

pub async fn run(args: Args) -> Result<String> {
    let config = settings::load(args.config.as_deref())?;
    match args.command {
        Command::Bundle(bundle_args) => bundle(&config, bundle_args).await,
        Command::Store { scope, action } => store(&config, &scope, action).await,
        Command::Diff {
            old,
            new,
            context,
            color,
        } => diff(&old, &new, context, color),
        Command::Config => Ok(config.to_toml()?),
    }
}

async fn bundle(config: &HostConfig, args: BundleArgs) -> Result<String> {
    let mut source = ReleaseSource::new(&config.bundle.api_base)?;
    if let Some(token) = args.token {
        source = source.with_token(token);
    }
    let resolver = BundleResolver::new(
        Arc::new(source),
        config.import_guard(),
        config.bundle_freshness(),
    );
    let identity = args.block.identity(args.kind);
    let bundle = resolver.resolve(&identity).await?;

    let mut out = String::new();
    for file in &bundle.files {
        out.push_str(&format!("{:>8}  {}\n", file.content.len(), file.name));
    }

    if let Some(dir) = args.out {
        for file in &bundle.files {
            // Names were validated on unpack; they stay inside `dir`.
            let target = dir.join(&file.name);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|err| CliError::io(parent, err))?;
            }
            std::fs::write(&target, &file.content).map_err(|err| CliError::io(&target, err))?;
        }
        info!(block = %identity, dir = %dir.display(), files = bundle.files.len(), "wrote bundle");
    }
    Ok(out)
}

async fn store(config: &HostConfig, scope: &ScopeArgs, action: StoreAction) -> Result<String> {
    let dir = settings::store_dir(config, scope.dir.as_deref())?;
    let kv = JsonFileKv::create(dir)?;
    store_with(&kv, scope, action).await
}

async fn store_with(kv: &dyn KvBackend, scope: &ScopeArgs, action: StoreAction) -> Result<String> {
    let key_scope = ScopeKey::for_context(&scope.identity(), &scope.context());
    match action {
        StoreAction::Get { key } => match kv.get(&key_scope, &key).await? {
            Some(value) => Ok(format!("{}\n", pretty(&value))),
            None => Err(CliError::MissingKey(key)),
        },
        StoreAction::Set { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            kv.set(&key_scope, &key, value).await?;
            Ok(String::new())
        }
        StoreAction::Delete { key } => {
            let existed = kv.delete(&key_scope, &key).await?;
            Ok(if existed { "deleted\n" } else { "not set\n" }.to_string())
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn diff(old: &Path, new: &Path, context: usize, color: bool) -> Result<String> {
    let read = |path: &Path| std::fs::read_to_string(path).map_err(|err| CliError::io(path, err));
    let (original, proposed) = (read(old)?, read(new)?);
    let unified = Diff::lines(&original, &proposed).unified(
        &old.display().to_string(),
        &new.display().to_string(),
        context,
    );
    Ok(if color { colorize(&unified) } else { unified })
}

fn colorize(unified: &str) -> String {
    let mut out = String::with_capacity(unified.len());
    for line in unified.lines() {
        let style = if line.starts_with("+++") || line.starts_with("---") {
            Style::new().bold()
        } else if line.starts_with("@@") {
            Color::Cyan.normal()
        } else if line.starts_with('+') {
            Color::Green.normal()
        } else if line.starts_with('-') {
            Color::Red.normal()
        } else {
            Style::new()
        };
        out.push_str(&style.paint(line).to_string());
        out.push('\n');
    }
    out
}
