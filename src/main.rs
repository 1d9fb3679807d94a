use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ledger_sync::session::SessionId;
use ledger_sync::sync::entity;
use ledger_sync::{config, observability, run};
use url::Url;

#[derive(Parser)]
#[command(name = "ledger-sync", about = "Ledger Sync - real-time change stream client")]
struct Cli {
	/// Extra configuration file layered over the standard locations
	#[arg(long, global = true, env = "LSYNC_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Subscribe to the change stream and log settled refreshes (default)
	Watch {
		/// Entity type to refresh; repeatable. Defaults to every known type
		#[arg(long = "entity", short = 'e')]
		entities: Vec<String>,
		/// Override the debounce quiet window in milliseconds
		#[arg(long)]
		quiet_ms: Option<u64>,
		/// Override the server base URL
		#[arg(long)]
		url: Option<Url>,
	},
	/// Print a freshly generated session identity
	Session,
	/// Print the effective settings
	Settings,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let mut settings = match config::load_from(cli.config.as_deref()) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Warning: failed to load config, using defaults: {}", e);
			config::Settings::default()
		}
	};

	match cli.command.unwrap_or(Commands::Watch {
		entities: Vec::new(),
		quiet_ms: None,
		url: None,
	}) {
		Commands::Watch {
			entities,
			quiet_ms,
			url,
		} => {
			if let Some(ms) = quiet_ms {
				settings.quiet_window_ms = ms;
			}
			if let Some(url) = url {
				settings.server_url = url;
			}
			let entities = if entities.is_empty() {
				entity::KNOWN.iter().map(|s| s.to_string()).collect()
			} else {
				entities
			};

			if let Err(e) = observability::init_logging(settings.log_level) {
				eprintln!("{}", e);
			}
			if let Err(e) = run(settings, entities).await {
				eprintln!("ledger-sync failed: {:#}", e);
				std::process::exit(1);
			}
		}
		Commands::Session => println!("{}", SessionId::generate()),
		Commands::Settings => println!("{:#?}", settings),
	}
}
