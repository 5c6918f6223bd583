//! LMTagScript CLI
//!
//! Validates, compiles and runs LMTagScript files, and hosts the HTTP and
//! stdio RPC adapters.

use lmtagscript_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
