use clap::Parser;

use sql_worksheet::app::{App, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let app = App::new();
    if let Err(err) = app.run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
