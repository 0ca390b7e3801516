use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod ops;

use ops::{List, Mount, Op, OpContext};

#[derive(Parser, Debug)]
#[command(name = "archive-mount", version, about = "Mount an archive read-only over FUSE")]
struct Cli {
    /// Bridge config file (TOML)
    #[arg(long, global = true, env = "ARCHIVE_MOUNT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Mount an archive and serve it until Ctrl-C
    Mount(Mount),
    /// List the members of an archive
    List(List),
}

async fn run<O: Op>(op: &O, ctx: &OpContext) -> anyhow::Result<()>
where
    O::Output: std::fmt::Display,
{
    let output = op.execute(ctx).await?;
    println!("{}", output);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = OpContext {
        config_path: cli.config,
    };

    match &cli.command {
        Command::Mount(op) => run(op, &ctx).await,
        Command::List(op) => run(op, &ctx).await,
    }
}
