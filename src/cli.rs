use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "codenav",
    version,
    about = "Precise code navigation over indexed dumps",
    after_help = r#"Examples:
  codenav serve --db codenav.sqlite --bundle-manager-url http://localhost:3187
  codenav request --method exists --params '{"repository_id":1,"commit":"deadbeef","path":"cmd/main.go"}'
  codenav request --method references --params '{"repository_id":1,"commit":"deadbeef","path":"cmd/main.go","line":10,"character":5,"dump_id":42}'
  codenav request --method help
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Overrides CODENAV_BUNDLE_MANAGER_URL.
        #[arg(long)]
        bundle_manager_url: Option<String>,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Overrides CODENAV_BUNDLE_MANAGER_URL.
        #[arg(long)]
        bundle_manager_url: Option<String>,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
}
