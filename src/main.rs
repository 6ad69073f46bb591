use clap::Parser;
use tracing_subscriber::EnvFilter;

use wvc::cli::commands::{self, Cli, Commands};
use wvc::core::context::Context;
use wvc::core::repository::Repository;
use wvc::error::Result;

fn run(ctx: &Context) -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        return commands::handle_init();
    }

    let repo = Repository::open(".")?;
    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Status => commands::handle_status(&repo, ctx),
        Commands::Add { target, all } => commands::handle_add(&repo, ctx, target.as_deref(), all),
        Commands::Reset {
            target,
            all,
            soft,
            mixed,
            hard,
        } => commands::handle_reset(&repo, ctx, target.as_deref(), all, soft, mixed, hard),
        Commands::Commit { message } => commands::handle_commit(&repo, ctx, &message),
        Commands::Log => commands::handle_log(&repo),
        Commands::Show { reference } => commands::handle_show(&repo, &reference),
        Commands::Diff => commands::handle_diff(&repo, ctx),
        Commands::Revert { reference } => commands::handle_revert(&repo, ctx, &reference),
        Commands::Branch {
            name,
            start,
            delete,
        } => commands::handle_branch(&repo, name.as_deref(), start.as_deref(), delete),
        Commands::Checkout {
            reference,
            branch,
            force,
        } => commands::handle_checkout(&repo, ctx, reference.as_deref(), branch, force),
        Commands::Stash { action } => commands::handle_stash(&repo, ctx, action),
        Commands::Merge {
            reference,
            no_ff,
            ours,
            theirs,
        } => commands::handle_merge(&repo, ctx, &reference, no_ff, ours, theirs),
        Commands::Remote { action } => commands::handle_remote(&repo, action),
        Commands::Fetch {
            remote,
            branch,
            depth,
        } => commands::handle_fetch(&repo, ctx, remote.as_deref(), branch.as_deref(), depth),
        Commands::Pull {
            remote,
            branch,
            depth,
        } => commands::handle_pull(&repo, ctx, remote.as_deref(), branch.as_deref(), depth),
        Commands::Push {
            remote,
            branch,
            force,
        } => commands::handle_push(&repo, ctx, remote.as_deref(), branch.as_deref(), force),
        Commands::Gc => commands::handle_gc(&repo),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WVC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::new();
    let handler_ctx = ctx.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_ctx.cancel()) {
        tracing::warn!(%err, "could not install interrupt handler");
    }

    if let Err(e) = run(&ctx) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
