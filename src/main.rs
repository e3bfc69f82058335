use anyhow::Result;
use clap::Parser;
use codenav::config::Config;
use codenav::{cli, rpc};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn default_db_path() -> PathBuf {
    PathBuf::from(".codenav").join("codenav.sqlite")
}

/// Logs go to stderr; stdout carries JSONL responses.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("CODENAV_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Serve {
            db,
            bundle_manager_url,
        } => {
            let db_path = db.unwrap_or_else(default_db_path);
            let url = bundle_manager_url.unwrap_or_else(|| Config::get().bundle_manager_url.clone());
            rpc::serve(&db_path, &url)
        }
        cli::Command::Request {
            db,
            bundle_manager_url,
            method,
            params,
            params_file,
            id,
        } => {
            let db_path = db.unwrap_or_else(default_db_path);
            let url = bundle_manager_url.unwrap_or_else(|| Config::get().bundle_manager_url.clone());
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)?
            } else {
                params
            };
            let response = rpc::call(&db_path, &url, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
    }
}
