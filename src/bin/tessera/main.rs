use anyhow::Result;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_del;
mod cmd_flush;
mod cmd_get;
mod cmd_put;
mod cmd_scan;
mod cmd_status;
mod util;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт info.
    // Пример: RUST_LOG=debug ./tessera ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse_args();
    match cli.cmd {
        cli::Cmd::Put { path, key, value, value_file } =>
            cmd_put::exec(path, key, value, value_file),

        cli::Cmd::Get { path, key, out } =>
            cmd_get::exec(path, key, out),

        cli::Cmd::Del { path, key } =>
            cmd_del::exec(path, key),

        cli::Cmd::Scan { path, prefix, max_key, from, limit, json } =>
            cmd_scan::exec(path, prefix, max_key, from, limit, json),

        cli::Cmd::Flush { path, json } =>
            cmd_flush::exec(path, json),

        cli::Cmd::Status { path, json } =>
            cmd_status::exec(path, json),
    }
}
