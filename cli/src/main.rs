use crate::cli::download;
use clap::Parser;
use std::path::MAIN_SEPARATOR;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let f_appender =
        tracing_appender::rolling::hourly(format!(".{}", MAIN_SEPARATOR), "coursemirror.log");
    let (non_blk, _guard) = tracing_appender::non_blocking(f_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("libcoursemirror=debug,coursemirror=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(tracing_subscriber::fmt::format().pretty())
        .with_writer(non_blk)
        .init();

    download(cli).await
}
