mod aggregate;
mod auth;
mod cancel;
mod config;
mod contact;
mod dedupe;
mod error;
mod grouping;
mod remote;
mod removal;
mod session;
mod ui;

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use aggregate::ContactAggregate;
use auth::{IdentityProvider, TokenCache};
use cancel::CancelToken;
use config::Config;
use contact::ContactSummary;
use dedupe::Deduplicator;
use error::DedupeError;
use grouping::{Group, GroupIndex, GroupingStrategy};
use remote::graph::GraphConnector;

#[derive(Parser, Debug)]
#[command(
    name = "graph-dedup",
    version,
    about = "Find and delete duplicate contacts in a Microsoft account"
)]
struct Cli {
    /// Configuration file [default: <config dir>/graph-dedup/config.toml]
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Never open a browser; fail when sign-in needs user interaction
    #[arg(long, global = true)]
    no_interactive: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential in the token cache
    Login,
    /// Delete the cached credential
    Logout,
    /// Print contacts grouped by name
    Groups(GroupsArgs),
    /// Write every contact summary as JSON
    Export(ExportArgs),
    /// Delete contacts by id
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
struct GroupsArgs {
    /// Include groups with a single member
    #[arg(long)]
    all: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Read contacts from a file written by `export` instead of fetching
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Grouping key; overrides the configuration
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Output file (stdout when omitted)
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RemoveArgs {
    /// Contact ids to delete
    #[arg(value_name = "ID", required = true)]
    ids: Vec<String>,

    /// Do not ask for confirmation
    #[arg(long)]
    yes: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// Trimmed display name, case-sensitive
    DisplayName,
    /// First word of the given name
    FirstGivenName,
}

impl From<StrategyArg> for GroupingStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::DisplayName => GroupingStrategy::DisplayName,
            StrategyArg::FirstGivenName => GroupingStrategy::FirstGivenName,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    init_logging(cli.verbose, cli.command.is_none());

    match cli.command {
        None => run_tui(&config, cli.no_interactive),
        Some(Command::Login) => handle_login(&config, cli.no_interactive),
        Some(Command::Logout) => handle_logout(&config),
        Some(Command::Groups(args)) => handle_groups(args, &config, cli.no_interactive),
        Some(Command::Export(args)) => handle_export(args, &config, cli.no_interactive),
        Some(Command::Remove(args)) => handle_remove(args, &config, cli.no_interactive),
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Log to stderr, or to the log file while the TUI owns the terminal.
fn init_logging(verbose: u8, to_file: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,graph_dedup={}", level)));

    if to_file {
        match open_log_file() {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init(),
            Err(err) => {
                eprintln!("warning: logging disabled: {:#}", err);
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(io::sink)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn open_log_file() -> Result<fs::File> {
    let path = config::log_file_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn connector(config: &Config, no_interactive: bool, announce_url: bool) -> Result<GraphConnector> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("graph-dedup/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let identity = IdentityProvider::new(&config.auth, http.clone())?
        .with_interactive(config.auth.interactive && !no_interactive)
        .with_announce_url(announce_url);
    Ok(GraphConnector::new(identity, config.graph.clone(), http))
}

// =============================================================================
// Commands
// =============================================================================

fn run_tui(config: &Config, no_interactive: bool) -> Result<()> {
    let connector = connector(config, no_interactive, false)?;
    let account = connector.identity().cached_account();
    let runtime = runtime()?;
    let dedup = Deduplicator::new(connector, config.grouping.strategy);

    let mut app = ui::App::new(config, &runtime, dedup).with_account(account.clone());
    if account.is_some() {
        app = app.refresh_on_start();
    }
    app.run()
}

fn handle_login(config: &Config, no_interactive: bool) -> Result<()> {
    let connector = connector(config, no_interactive, true)?;
    let runtime = runtime()?;
    let token = runtime
        .block_on(connector.identity().acquire_token(&CancelToken::new()))
        .context("sign-in failed")?;

    println!(
        "Signed in as {}",
        token.account().unwrap_or("unknown account")
    );
    println!(
        "Credential cached at {}",
        connector.identity().cache().path().display()
    );
    Ok(())
}

fn handle_logout(config: &Config) -> Result<()> {
    let cache = TokenCache::new(config.auth.token_cache.clone());
    if cache.delete().context("failed to delete token cache")? {
        println!("Signed out; removed {}", cache.path().display());
    } else {
        println!("No cached credential at {}", cache.path().display());
    }
    Ok(())
}

#[derive(Serialize)]
struct GroupOutput<'a> {
    key: &'a str,
    count: usize,
    members: &'a [ContactSummary],
}

fn handle_groups(args: GroupsArgs, config: &Config, no_interactive: bool) -> Result<()> {
    let strategy = args
        .strategy
        .map(GroupingStrategy::from)
        .unwrap_or(config.grouping.strategy);

    match &args.input {
        Some(path) => {
            let aggregate = read_contacts(path)?;
            let index = GroupIndex::from_contacts(strategy, aggregate.iter());
            write_groups(&mut io::stdout().lock(), &index, aggregate.len(), &args)
        }
        None => {
            let runtime = runtime()?;
            let mut dedup = Deduplicator::new(connector(config, no_interactive, true)?, strategy);
            fetch(&runtime, &mut dedup)?;
            write_groups(&mut io::stdout().lock(), dedup.groups(), dedup.contacts().len(), &args)
        }
    }
}

fn write_groups(
    out: &mut impl Write,
    index: &GroupIndex,
    total: usize,
    args: &GroupsArgs,
) -> Result<()> {
    let groups: Vec<&Group> = if args.all {
        index.groups().collect()
    } else {
        index.duplicate_groups().collect()
    };

    if args.json {
        let output: Vec<GroupOutput> = groups
            .iter()
            .map(|g| GroupOutput {
                key: g.key(),
                count: g.len(),
                members: g.members(),
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        return Ok(());
    }

    if groups.is_empty() {
        writeln!(
            out,
            "No {} among {} contact(s).",
            if args.all { "groups" } else { "duplicates" },
            total
        )?;
        return Ok(());
    }

    for group in &groups {
        let key = if group.key().is_empty() {
            "(no name)"
        } else {
            group.key()
        };
        writeln!(out, "{} ({})", key, group.len())?;
        for member in group.members() {
            writeln!(out, "  {}  {}", member.id, member.describe())?;
        }
    }
    Ok(())
}

/// Load an `export` file; repeated ids collapse with the later entry winning.
fn read_contacts(path: &Path) -> Result<ContactAggregate> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let contacts: Vec<ContactSummary> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse contacts from {}", path.display()))?;
    let mut aggregate = ContactAggregate::new();
    for contact in contacts {
        aggregate.upsert(contact);
    }
    Ok(aggregate)
}

fn handle_export(args: ExportArgs, config: &Config, no_interactive: bool) -> Result<()> {
    let runtime = runtime()?;
    let mut dedup = Deduplicator::new(
        connector(config, no_interactive, true)?,
        config.grouping.strategy,
    );
    fetch(&runtime, &mut dedup)?;

    let contacts: Vec<&ContactSummary> = dedup.contacts().iter().collect();
    let json = serde_json::to_string_pretty(&contacts)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Exported {} contacts to {}", contacts.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn handle_remove(args: RemoveArgs, config: &Config, no_interactive: bool) -> Result<()> {
    let runtime = runtime()?;
    let mut dedup = Deduplicator::new(
        connector(config, no_interactive, true)?,
        config.grouping.strategy,
    );
    fetch(&runtime, &mut dedup)?;

    let mut seen = HashSet::new();
    let mut unknown = Vec::new();
    for id in &args.ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if dedup.contacts().contains(id) {
            dedup.toggle_removal(id);
        } else {
            unknown.push(id.as_str());
        }
    }
    if !unknown.is_empty() {
        bail!("unknown contact id(s): {}", unknown.join(", "));
    }

    println!("About to delete {} contact(s):", dedup.removal().len());
    for contact in dedup.removal().iter() {
        println!("  {}  {}  {}", contact.id, contact.display_name, contact.describe());
    }
    if !args.yes && !confirm("Delete these contacts? [y/N] ")? {
        println!("Aborted.");
        return Ok(());
    }

    let pb = ProgressBar::new(dedup.removal().len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_message("Deleting");

    let result = runtime.block_on(
        dedup.confirm_removal(&CancelToken::new(), |done, _| pb.set_position(done as u64)),
    );
    pb.finish_and_clear();

    match result {
        Ok(report) => {
            println!("Deleted {} contact(s).", report.deleted.len());
            Ok(())
        }
        Err(DedupeError::Delete { source, report }) => {
            for id in &report.deleted {
                println!("  deleted {}", id);
            }
            if let Some(failed) = &report.failed {
                eprintln!("  failed  {}", failed);
            }
            for id in &report.pending {
                eprintln!("  skipped {}", id);
            }
            Err(DedupeError::Delete { source, report }.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn fetch(runtime: &Runtime, dedup: &mut Deduplicator<GraphConnector>) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {pos} contacts")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Fetching");
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = runtime.block_on(dedup.refresh(&CancelToken::new(), |n| pb.set_position(n as u64)));
    pb.finish_and_clear();

    let report = result.context("failed to fetch contacts")?;
    eprintln!(
        "Fetched {} contacts in {} groups.",
        report.contacts, report.groups
    );
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES" | "Yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryConnector, MemoryStore};

    fn groups_args(all: bool) -> GroupsArgs {
        GroupsArgs {
            all,
            json: false,
            input: None,
            strategy: None,
        }
    }

    fn render(index: &GroupIndex, total: usize, args: &GroupsArgs) -> String {
        let mut out = Vec::new();
        write_groups(&mut out, index, total, args).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_fetched_groups_come_from_live_index() {
        let store = MemoryStore::new()
            .with_page(
                None,
                vec![ContactSummary::new("1", "Jo Smith"), ContactSummary::new("2", "Ann Lee")],
            )
            .with_page(
                None,
                vec![ContactSummary::new("3", "Jo Smith"), ContactSummary::new("1", "Jo Smith")],
            );
        let mut dedup = Deduplicator::new(MemoryConnector::new(store), GroupingStrategy::DisplayName);
        dedup.refresh(&CancelToken::new(), |_| {}).await.unwrap();

        let text = render(dedup.groups(), dedup.contacts().len(), &groups_args(false));

        assert_eq!(dedup.contacts().len(), 3);
        assert_eq!(text, "Jo Smith (2)\n  1  [Contacts]\n  3  [Contacts]\n");
    }

    #[test]
    fn test_no_duplicates_message() {
        let aggregate = {
            let mut a = ContactAggregate::new();
            a.upsert(ContactSummary::new("1", "Ann"));
            a
        };
        let index = GroupIndex::from_contacts(GroupingStrategy::DisplayName, aggregate.iter());

        assert_eq!(
            render(&index, aggregate.len(), &groups_args(false)),
            "No duplicates among 1 contact(s).\n"
        );
        assert_eq!(render(&index, aggregate.len(), &groups_args(true)), "Ann (1)\n  1  [Contacts]\n");
    }
}
