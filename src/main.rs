//! Demo binary entry point. Grounded on the teacher's `main.rs`: construct
//! the CLI handler, run it, and format `SokuWebError` for the terminal on
//! the way out.

use soku_web::cli::CliHandler;
use soku_web::SokuWebError;

#[tokio::main]
async fn main() {
    let handler = CliHandler::new();

    if let Err(e) = handler.run().await {
        match &e {
            SokuWebError::Compile { .. } | SokuWebError::Resolve { .. } => {
                eprintln!("{}", e.format_detailed());
            }
            _ => {
                eprintln!("error: {e}");
            }
        }
        std::process::exit(1);
    }
}
