use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let matches = Command::new("govctl")
        .version(VERSION)
        .about("Operator CLI for the multi-agent governance and finality engine")
        .subcommand(
            Command::new("up")
                .about("Start the governance loop, watchdog, and hatchery")
                .arg(
                    Arg::new("scope")
                        .long("scope")
                        .value_name("SCOPE_ID")
                        .help("Scope to watch in addition to SCOPE_ID from the environment")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(Command::new("doctor").about("Check database, bus, and config file health"))
        .subcommand(
            Command::new("status")
                .about("Show a scope's state, finality snapshot, and pending reviews")
                .arg(
                    Arg::new("scope")
                        .value_name("SCOPE_ID")
                        .help("Scope to report on")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("logs")
                .about("Tail the write-ahead log")
                .arg(
                    Arg::new("lines")
                        .short('n')
                        .long("lines")
                        .value_name("LINES")
                        .help("Number of recent entries to show")
                        .default_value("50"),
                )
                .arg(
                    Arg::new("scope")
                        .long("scope")
                        .value_name("SCOPE_ID")
                        .help("Only show entries touching this scope"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("up", sub_matches)) => commands::up::run(sub_matches).await,
        Some(("doctor", _)) => commands::doctor::run().await,
        Some(("status", sub_matches)) => commands::status::run(sub_matches).await,
        Some(("logs", sub_matches)) => commands::logs::run(sub_matches).await,
        _ => {
            println!("govctl v{VERSION}");
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("✗ {err:#}");
        std::process::exit(1);
    }
}
