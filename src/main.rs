use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use pagepilot::agent::GoalRunner;
use pagepilot::browser::BrowserConfig;
use pagepilot::gemini::GeminiConfig;
use pagepilot::server::{self, AppState};
use pagepilot::storefront;

#[derive(Parser, Debug)]
#[command(
    name = "pagepilot",
    about = "Goal-driven browser automation, over HTTP or the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP service
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Execute one AI-directed goal and print the outcome
    Run {
        /// The goal in plain language
        goal: String,
        #[arg(long, default_value_t = 15)]
        max_steps: usize,
        /// Show the browser window while the loop runs
        #[arg(long)]
        headful: bool,
    },
    /// Run the fixed product-price lookup
    Price {
        #[arg(default_value = "wireless mouse")]
        product: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let state = AppState::new(GeminiConfig::default(), BrowserConfig::default());
            server::serve(addr, state).await
        }
        Commands::Run {
            goal,
            max_steps,
            headful,
        } => {
            let browser_cfg = BrowserConfig {
                headless: !headful,
                ..BrowserConfig::default()
            };
            let runner = GoalRunner::new(GeminiConfig::default(), browser_cfg)?;
            let outcome = runner.execute_goal(&goal, max_steps).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Price { product } => {
            let report = storefront::search_product_price(BrowserConfig::default(), &product).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
