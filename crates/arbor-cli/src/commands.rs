use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use arbor_repo::{
    Node, Property, Repository, RepositoryConfig, UnitOfWork, Value,
};

use crate::cli::*;

const CONFIG_FILE: &str = "arbor.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Init(args) = &cli.command {
        return cmd_init(&cli.repo, args, cli.format);
    }
    debug!(repo = %cli.repo.display(), user = %cli.user, "opening repository");
    let repo = open(&cli.repo)?;
    let result = match cli.command {
        Command::Init(_) => Ok(()),
        Command::Add(args) => cmd_add(&repo, &cli.user, args, cli.format),
        Command::Rm(args) => cmd_rm(&repo, &cli.user, args, cli.format),
        Command::Get(args) => cmd_get(&repo, &cli.user, args, cli.format),
        Command::Ls(args) => cmd_ls(&repo, &cli.user, args, cli.format),
        Command::Set(args) => cmd_set(&repo, &cli.user, args, cli.format),
        Command::Search(args) => cmd_search(&repo, &cli.user, args, cli.format),
        Command::Home => cmd_home(&repo, &cli.user, cli.format),
        Command::Checkpoint => cmd_checkpoint(&repo, cli.format),
    };
    repo.shutdown().context("repository did not shut down cleanly")?;
    result
}

/// Open the repository at `dir`, reading `arbor.toml` when present.
fn open(dir: &Path) -> anyhow::Result<Repository> {
    if !dir.is_dir() {
        bail!(
            "{} is not an arbor repository (run `arbor init --repo {}`)",
            dir.display(),
            dir.display()
        );
    }
    let config_path = dir.join(CONFIG_FILE);
    let config = if config_path.exists() {
        RepositoryConfig::load(&config_path)?
    } else {
        RepositoryConfig::durable(dir)
    };
    Ok(Repository::open(config)?)
}

fn cmd_init(dir: &Path, args: &InitArgs, format: OutputFormat) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", config_path.display());
    }
    let config = RepositoryConfig::durable(dir);
    fs::write(&config_path, config.to_toml_string()?)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    let repo = Repository::open(config)?;
    let seq = repo.seq();
    repo.shutdown()?;

    match format {
        OutputFormat::Json => print_json(&json!({ "repo": dir.display().to_string(), "seq": seq })),
        OutputFormat::Text => {
            println!("{} Initialized arbor repository in {}", "✓".green().bold(), dir.display().to_string().bold());
            println!("  Config: {}", config_path.display().to_string().cyan());
            Ok(())
        }
    }
}

/// Run `f` in a transaction for `user` and commit it synchronously.
fn write<T>(
    repo: &Repository,
    user: &str,
    name: &str,
    f: impl FnOnce(&UnitOfWork) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let tx = repo.create_transaction(user, name, false, None)?;
    let value = match f(&tx) {
        Ok(value) => value,
        Err(e) => {
            repo.rollback(&tx)?;
            return Err(e);
        }
    };
    repo.commit(&tx)?;
    Ok(value)
}

fn read(repo: &Repository, user: &str, name: &str) -> anyhow::Result<UnitOfWork> {
    Ok(repo.create_transaction(user, name, true, None)?)
}

fn cmd_add(repo: &Repository, user: &str, args: AddArgs, format: OutputFormat) -> anyhow::Result<()> {
    let node = write(repo, user, "cli-add", |tx| {
        Ok(repo.add(tx, Some(&args.parent), &args.name, args.node_type.as_deref())?)
    })?;
    match format {
        OutputFormat::Json => print_json(&node),
        OutputFormat::Text => {
            println!("{} Added {} ({})", "✓".green().bold(), node.path.bold(), node.primary_type.cyan());
            Ok(())
        }
    }
}

fn cmd_rm(repo: &Repository, user: &str, args: RmArgs, format: OutputFormat) -> anyhow::Result<()> {
    let paths: Vec<&str> = args.paths.iter().map(String::as_str).collect();
    write(repo, user, "cli-rm", |tx| Ok(repo.remove(tx, &paths)?))?;
    match format {
        OutputFormat::Json => print_json(&json!({ "removed": args.paths })),
        OutputFormat::Text => {
            for p in &args.paths {
                println!("  {} {}", "removed:".red(), p);
            }
            Ok(())
        }
    }
}

fn cmd_get(repo: &Repository, user: &str, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tx = read(repo, user, "cli-get")?;
    let Some(node) = repo.get(&tx, &args.path)? else {
        bail!("no node at {}", args.path);
    };
    match format {
        OutputFormat::Json => print_json(&node),
        OutputFormat::Text => {
            print_node(&node);
            Ok(())
        }
    }
}

fn cmd_ls(repo: &Repository, user: &str, args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tx = read(repo, user, "cli-ls")?;
    let patterns: Vec<&str> = args.names.iter().map(String::as_str).collect();
    let children = repo.children(&tx, &args.path, &patterns)?;
    print_list(&children, format)
}

fn cmd_set(repo: &Repository, user: &str, args: SetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let value = Value::parse(args.value_type, &args.value)?;
    let property = Property::single(args.property.as_str(), value);
    write(repo, user, "cli-set", |tx| Ok(repo.set_property(tx, &args.path, property.clone())?))?;
    match format {
        OutputFormat::Json => print_json(&property),
        OutputFormat::Text => {
            println!("Set {} on {}", args.property.bold(), args.path.yellow());
            Ok(())
        }
    }
}

fn cmd_search(repo: &Repository, user: &str, args: SearchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tx = read(repo, user, "cli-search")?;
    let hits = match &args.by {
        SearchBy::Type { type_name } => repo.search_by_type(&tx, type_name)?,
        SearchBy::Path { pattern } => repo.search_by_path(&tx, pattern)?,
        SearchBy::Keyword {
            type_name,
            property,
            keywords,
            criteria,
        } => {
            let keywords: Vec<&str> = keywords.iter().map(String::as_str).collect();
            repo.search_by_keyword(&tx, type_name, property, *criteria, &keywords)?
        }
    };
    print_list(&hits, format)
}

fn cmd_home(repo: &Repository, user: &str, format: OutputFormat) -> anyhow::Result<()> {
    let home = write(repo, user, "cli-home", |tx| {
        repo.get_from_workspace(tx, None)?
            .with_context(|| format!("no workspace for {user}"))
    })?;
    match format {
        OutputFormat::Json => print_json(&home),
        OutputFormat::Text => {
            println!("{}", home.path.bold());
            Ok(())
        }
    }
}

fn cmd_checkpoint(repo: &Repository, format: OutputFormat) -> anyhow::Result<()> {
    repo.checkpoint()?;
    match format {
        OutputFormat::Json => print_json(&json!({ "seq": repo.seq() })),
        OutputFormat::Text => {
            println!("{} Checkpoint written at seq {}", "✓".green(), repo.seq().to_string().bold());
            Ok(())
        }
    }
}

fn print_node(node: &Node) {
    println!("{}  {}", node.path.bold(), node.primary_type.cyan());
    println!("  id: {}", node.id.to_string().dimmed());
    if !node.mixins.is_empty() {
        println!("  mixins: {}", node.mixins.join(", "));
    }
    for (name, property) in &node.properties {
        let values: Vec<String> = property.values().iter().map(display_value).collect();
        println!("  {} = {}", name.yellow(), values.join(", "));
    }
    if !node.children.is_empty() {
        println!("  children: {}", node.children.len());
    }
}

/// Binary values print as a hex prefix.
fn display_value(value: &Value) -> String {
    const SHOWN: usize = 16;
    match value.as_bytes() {
        Some(bytes) if bytes.len() > SHOWN => {
            format!("0x{}... ({} bytes)", hex::encode(&bytes[..SHOWN]), bytes.len())
        }
        Some(bytes) => format!("0x{}", hex::encode(bytes)),
        None => value.to_string(),
    }
}

fn print_list(nodes: &[Node], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(&nodes),
        OutputFormat::Text => {
            if nodes.is_empty() {
                println!("{}", "(none)".dimmed());
            }
            for node in nodes {
                println!("{}  {}", node.path, node.primary_type.cyan());
            }
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
