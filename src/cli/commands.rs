use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::core::checkout::{CheckoutOptions, ResetMode};
use crate::core::context::Context;
use crate::core::merge::{MergeOptions, MergeStrategy};
use crate::core::models::OperationType;
use crate::core::remote::HttpRemoteClient;
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

#[derive(Parser)]
#[command(name = "wvc", about = "Git-like version control for a vector database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a repository in the current directory
    Init,
    /// Show staged, unstaged, and schema changes
    Status,
    /// Stage changes (a class, class/id, or everything)
    Add {
        /// class or class/id to stage
        target: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Unstage changes, or move HEAD with --soft/--mixed/--hard
    Reset {
        /// class or class/id to unstage, or a ref with a mode flag
        target: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        soft: bool,
        #[arg(long)]
        mixed: bool,
        #[arg(long)]
        hard: bool,
    },
    /// Commit staged changes
    Commit {
        #[arg(short, long)]
        message: String,
    },
    /// Show commit history
    Log,
    /// Show one commit and its operations
    Show { reference: String },
    /// Show unstaged changes against HEAD
    Diff,
    /// Revert a commit with a new inverse commit
    Revert { reference: String },
    /// Create, delete, or list branches
    Branch {
        name: Option<String>,
        start: Option<String>,
        #[arg(short, long)]
        delete: bool,
    },
    /// Switch to a branch or commit
    Checkout {
        reference: Option<String>,
        /// create this branch at the target and switch to it
        #[arg(short = 'b')]
        branch: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Park working changes and restore them later
    Stash {
        #[command(subcommand)]
        action: Option<StashAction>,
    },
    /// Merge a branch or commit into the current branch
    Merge {
        reference: String,
        #[arg(long)]
        no_ff: bool,
        #[arg(long)]
        ours: bool,
        #[arg(long)]
        theirs: bool,
    },
    /// Manage remotes
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
    /// Download commits and vectors from a remote
    Fetch {
        remote: Option<String>,
        branch: Option<String>,
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Fetch and fast-forward the local branch
    Pull {
        remote: Option<String>,
        branch: Option<String>,
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Upload commits and vectors to a remote
    Push {
        remote: Option<String>,
        branch: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Delete unreferenced vector blobs
    Gc,
}

#[derive(Subcommand)]
pub enum StashAction {
    Push {
        #[arg(short, long)]
        message: Option<String>,
    },
    Apply {
        stash: Option<String>,
        #[arg(long)]
        index: Option<usize>,
    },
    Pop {
        stash: Option<String>,
        #[arg(long)]
        index: Option<usize>,
    },
    Drop { stash: Option<String> },
    List,
    Show { stash: Option<String> },
    Clear,
}

#[derive(Subcommand)]
pub enum RemoteAction {
    Add { name: String, url: String },
    Remove { name: String },
    SetUrl { name: String, url: String },
    SetToken { name: String, token: String },
    List,
}

/// Parse `stash@{N}` (or a bare index); defaults to the newest stash.
fn parse_stash_index(reference: Option<&str>) -> Result<usize> {
    let Some(reference) = reference else {
        return Ok(0);
    };
    let inner = reference
        .strip_prefix("stash@{")
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(reference);
    inner
        .parse()
        .map_err(|_| WvcError::InvalidInput(format!("bad stash ref '{reference}'")))
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('/') {
        Some((class, id)) => (class.to_string(), Some(id.to_string())),
        None => (target.to_string(), None),
    }
}

fn change_sigil(change_type: OperationType) -> char {
    match change_type {
        OperationType::Insert => '+',
        OperationType::Update => '~',
        OperationType::Delete => '-',
    }
}

pub fn handle_init() -> Result<()> {
    Repository::init(".")?;
    println!("Initialized empty repository in .wvc");
    Ok(())
}

pub fn handle_status(repo: &Repository, ctx: &Context) -> Result<()> {
    let status = repo.status(ctx)?;
    if status.branch.is_empty() {
        if status.head.is_empty() {
            println!("No commits yet");
        } else {
            println!("HEAD detached at {}", &status.head[..8]);
        }
    } else {
        println!("On branch {}", status.branch);
    }

    if !status.staged.is_empty() {
        println!("\nChanges staged for commit:");
        for (key, change) in &status.staged {
            println!("  {} {}", change_sigil(change.change_type), key);
        }
    }
    if !status.unstaged.is_empty() {
        println!("\nChanges not staged:");
        for entry in &status.unstaged {
            let suffix = if entry.vector_only { " (vector)" } else { "" };
            println!("  {} {}{}", change_sigil(entry.change_type), entry.key(), suffix);
        }
    }
    if !status.schema.is_empty() {
        println!("\nSchema changes:");
        for class in &status.schema.added_classes {
            println!("  + class {class}");
        }
        for class in &status.schema.removed_classes {
            println!("  - class {class}");
        }
        for (class, prop) in &status.schema.added_properties {
            println!("  + property {class}.{prop}");
        }
        for (class, prop) in &status.schema.removed_properties {
            println!("  - property {class}.{prop}");
        }
    }
    if status.staged.is_empty() && status.unstaged.is_empty() && status.schema.is_empty() {
        println!("Nothing to commit, working set clean");
    }
    Ok(())
}

pub fn handle_add(repo: &Repository, ctx: &Context, target: Option<&str>, all: bool) -> Result<()> {
    let staged = match (target, all) {
        (_, true) | (None, false) => repo.stage_all(ctx)?,
        (Some(target), false) => {
            let (class, id) = split_target(target);
            match id {
                Some(id) => repo.stage_object(ctx, &class, &id)?,
                None => repo.stage_class(ctx, &class)?,
            }
        }
    };
    println!("Staged {staged} changes");
    Ok(())
}

#[allow(clippy::fn_params_excessive_bools)]
pub fn handle_reset(
    repo: &Repository,
    ctx: &Context,
    target: Option<&str>,
    all: bool,
    soft: bool,
    mixed: bool,
    hard: bool,
) -> Result<()> {
    let modes = [soft, mixed, hard].iter().filter(|m| **m).count();
    if modes > 1 {
        return Err(WvcError::InvalidInput(
            "pick one of --soft, --mixed, --hard".to_string(),
        ));
    }
    if modes == 1 {
        let mode = if soft {
            ResetMode::Soft
        } else if mixed {
            ResetMode::Mixed
        } else {
            ResetMode::Hard
        };
        let result = repo.reset(ctx, target.unwrap_or("HEAD"), mode)?;
        println!("HEAD is now at {}", &result.commit_id[..8]);
        for warning in &result.warnings {
            println!("warning: {warning}");
        }
        return Ok(());
    }

    let removed = match (target, all) {
        (_, true) | (None, false) => repo.unstage_all()?,
        (Some(target), false) => {
            let (class, id) = split_target(target);
            match id {
                Some(id) => repo.unstage_object(&class, &id)?,
                None => repo.unstage_class(&class)?,
            }
        }
    };
    println!("Unstaged {removed} changes");
    Ok(())
}

pub fn handle_commit(repo: &Repository, ctx: &Context, message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(WvcError::InvalidInput(
            "commit message cannot be empty".to_string(),
        ));
    }
    let commit = repo.commit_staged(ctx, message)?;
    println!(
        "[{}] {} ({} operations)",
        commit.short_id(),
        commit.message,
        commit.operation_count
    );
    Ok(())
}

pub fn handle_log(repo: &Repository) -> Result<()> {
    for commit in repo.log()? {
        println!("commit {}", commit.id);
        if commit.is_merge() {
            println!("merge  {}", commit.merge_parent_id);
        }
        println!("date   {}", commit.timestamp.to_rfc3339());
        println!("\n    {}\n", commit.message);
    }
    Ok(())
}

pub fn handle_show(repo: &Repository, reference: &str) -> Result<()> {
    let resolved = repo.resolve_ref(reference)?;
    let (commit, ops) = repo.commit_details(&resolved.commit_id)?;
    println!("commit {}", commit.id);
    if !commit.parent_id.is_empty() {
        println!("parent {}", commit.parent_id);
    }
    if commit.is_merge() {
        println!("merge  {}", commit.merge_parent_id);
    }
    println!("date   {}", commit.timestamp.to_rfc3339());
    println!("\n    {}\n", commit.message);
    for op in ops {
        println!("  {} {}/{}", change_sigil(op.op_type), op.class, op.object_id);
    }
    Ok(())
}

pub fn handle_diff(repo: &Repository, ctx: &Context) -> Result<()> {
    let entries = repo.diff_incremental(ctx)?;
    if entries.is_empty() {
        println!("No changes");
        return Ok(());
    }
    for entry in entries {
        println!("{} {}", change_sigil(entry.change_type), entry.key());
        if !entry.previous_data.is_empty() {
            println!("  - {}", entry.previous_data);
        }
        if !entry.object_data.is_empty() {
            println!("  + {}", entry.object_data);
        }
    }
    Ok(())
}

pub fn handle_revert(repo: &Repository, ctx: &Context, reference: &str) -> Result<()> {
    let (commit, warnings) = repo.revert(ctx, reference)?;
    println!("[{}] {}", commit.short_id(), commit.message);
    for warning in warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

pub fn handle_branch(
    repo: &Repository,
    name: Option<&str>,
    start: Option<&str>,
    delete: bool,
) -> Result<()> {
    match name {
        None => {
            let (branches, current) = repo.list_branches()?;
            for (branch, commit_id) in branches {
                let marker = if branch == current { '*' } else { ' ' };
                println!("{marker} {branch} {}", &commit_id[..8.min(commit_id.len())]);
            }
            Ok(())
        }
        Some(name) if delete => {
            repo.delete_branch(name)?;
            println!("Deleted branch '{name}'");
            Ok(())
        }
        Some(name) => {
            let commit_id = repo.create_branch(name, start)?;
            println!("Created branch '{name}' at {}", &commit_id[..8]);
            Ok(())
        }
    }
}

pub fn handle_checkout(
    repo: &Repository,
    ctx: &Context,
    reference: Option<&str>,
    new_branch: Option<String>,
    force: bool,
) -> Result<()> {
    let result = repo.checkout(
        ctx,
        reference,
        CheckoutOptions {
            force,
            create_branch: new_branch,
        },
    )?;
    if result.branch.is_empty() {
        println!("HEAD detached at {}", &result.commit_id[..8]);
    } else {
        println!("Switched to branch '{}'", result.branch);
    }
    for warning in result.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

pub fn handle_stash(repo: &Repository, ctx: &Context, action: Option<StashAction>) -> Result<()> {
    match action.unwrap_or(StashAction::Push { message: None }) {
        StashAction::Push { message } => {
            let stash = repo.stash_push(ctx, message.as_deref())?;
            println!("Saved working set as stash@{{0}}: {}", stash.message);
        }
        StashAction::Apply { stash, index } => {
            let index = match index {
                Some(index) => index,
                None => parse_stash_index(stash.as_deref())?,
            };
            let stash = repo.stash_apply(ctx, index)?;
            println!("Applied stash@{{{index}}}: {}", stash.message);
        }
        StashAction::Pop { stash, index } => {
            let index = match index {
                Some(index) => index,
                None => parse_stash_index(stash.as_deref())?,
            };
            let stash = repo.stash_pop(ctx, index)?;
            println!("Dropped stash@{{{index}}}: {}", stash.message);
        }
        StashAction::Drop { stash } => {
            let index = parse_stash_index(stash.as_deref())?;
            let stash = repo.stash_drop(index)?;
            println!("Dropped stash@{{{index}}}: {}", stash.message);
        }
        StashAction::List => {
            for (index, stash) in repo.stash_list()?.into_iter().enumerate() {
                println!(
                    "stash@{{{index}}}: on {}: {}",
                    if stash.branch_name.is_empty() {
                        "HEAD"
                    } else {
                        &stash.branch_name
                    },
                    stash.message
                );
            }
        }
        StashAction::Show { stash } => {
            let index = parse_stash_index(stash.as_deref())?;
            let stash = repo.stash_get(index)?;
            println!("stash@{{{index}}}: {}", stash.message);
            for item in &stash.changes {
                let mark = if item.was_staged { "staged" } else { "unstaged" };
                println!(
                    "  {} {}/{} ({mark})",
                    change_sigil(item.change.change_type),
                    item.change.class,
                    item.change.object_id
                );
            }
        }
        StashAction::Clear => {
            let count = repo.stash_clear()?;
            println!("Dropped {count} stashes");
        }
    }
    Ok(())
}

pub fn handle_merge(
    repo: &Repository,
    ctx: &Context,
    reference: &str,
    no_ff: bool,
    ours: bool,
    theirs: bool,
) -> Result<()> {
    let strategy = match (ours, theirs) {
        (true, true) => {
            return Err(WvcError::InvalidInput(
                "pick one of --ours, --theirs".to_string(),
            ))
        }
        (true, false) => Some(MergeStrategy::Ours),
        (false, true) => Some(MergeStrategy::Theirs),
        (false, false) => None,
    };
    let outcome = repo.merge(
        ctx,
        reference,
        MergeOptions {
            no_ff,
            strategy,
            message: None,
        },
    )?;

    if !outcome.success {
        println!("Merge failed with {} conflicts:", outcome.conflicts.len());
        for conflict in &outcome.conflicts {
            println!(
                "  {} {}/{}",
                conflict.conflict_type.as_str(),
                conflict.class,
                conflict.object_id
            );
        }
        return Err(WvcError::MergeConflicts(outcome.conflicts.len()));
    }
    if outcome.fast_forward {
        println!("Fast-forwarded to {}", reference);
    } else if let Some(commit) = &outcome.merge_commit {
        println!("[{}] {}", commit.short_id(), commit.message);
    }
    if outcome.resolved_conflicts > 0 {
        println!("Resolved {} conflicts", outcome.resolved_conflicts);
    }
    for warning in outcome.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

pub fn handle_remote(repo: &Repository, action: RemoteAction) -> Result<()> {
    match action {
        RemoteAction::Add { name, url } => {
            repo.remote_add(&name, &url, None)?;
            println!("Added remote '{name}'");
        }
        RemoteAction::Remove { name } => {
            repo.remote_remove(&name)?;
            println!("Removed remote '{name}'");
        }
        RemoteAction::SetUrl { name, url } => {
            repo.remote_set_url(&name, &url)?;
            println!("Updated url of '{name}'");
        }
        RemoteAction::SetToken { name, token } => {
            repo.remote_set_token(&name, Some(token))?;
            println!("Updated token of '{name}'");
        }
        RemoteAction::List => {
            for remote in repo.remote_list()? {
                println!("{} {}", remote.name, remote.url);
            }
        }
    }
    Ok(())
}

fn client_for(repo: &Repository, remote: Option<&str>) -> Result<Arc<HttpRemoteClient>> {
    let remote = repo.get_remote(remote)?;
    Ok(Arc::new(HttpRemoteClient::new(&remote)))
}

pub fn handle_fetch(
    repo: &Repository,
    ctx: &Context,
    remote: Option<&str>,
    branch: Option<&str>,
    depth: u32,
) -> Result<()> {
    let client = client_for(repo, remote)?;
    let report = repo.fetch(ctx, client, remote, branch, depth)?;
    if report.up_to_date {
        println!("Already up to date");
    } else {
        println!(
            "Fetched {} commits, {} vectors from {}/{}",
            report.fetched_commits, report.fetched_vectors, report.remote, report.branch
        );
        if report.shallow {
            println!("note: history is shallow below the fetched range");
        }
    }
    Ok(())
}

pub fn handle_pull(
    repo: &Repository,
    ctx: &Context,
    remote: Option<&str>,
    branch: Option<&str>,
    depth: u32,
) -> Result<()> {
    use crate::core::fetch::PullStatus;
    let client = client_for(repo, remote)?;
    let report = repo.pull(ctx, client, remote, branch, depth)?;
    match report.status {
        PullStatus::FastForwarded => {
            println!("Fast-forwarded {} to {}", report.branch, &report.new_tip[..8])
        }
        PullStatus::UpToDate => println!("Already up to date"),
        PullStatus::Ahead => println!("Local branch is ahead of the remote"),
        PullStatus::Diverged => {
            println!("Local and remote histories have diverged; merge or reset manually")
        }
    }
    Ok(())
}

pub fn handle_push(
    repo: &Repository,
    ctx: &Context,
    remote: Option<&str>,
    branch: Option<&str>,
    force: bool,
) -> Result<()> {
    let client = client_for(repo, remote)?;
    let report = repo.push(ctx, client, remote, branch, force)?;
    if report.up_to_date {
        println!("Already up to date");
    } else {
        println!(
            "Pushed {} commits, {} vectors to {}/{}",
            report.uploaded_commits, report.uploaded_vectors, report.remote, report.branch
        );
    }
    Ok(())
}

pub fn handle_gc(repo: &Repository) -> Result<()> {
    let report = repo.collect_garbage()?;
    println!(
        "Scanned {} blobs, deleted {}",
        report.scanned, report.deleted
    );
    Ok(())
}
