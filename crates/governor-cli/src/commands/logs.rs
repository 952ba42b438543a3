use clap::ArgMatches;
use governor_core::config::Config;
use governor_core::wal::{PgWal, WriteAheadLog};

pub async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let lines: i64 = matches
        .get_one::<String>("lines")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    let scope_filter = matches.get_one::<String>("scope").cloned();

    let config = Config::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let wal = PgWal::new(pool);

    let events = wal.tail(lines).await?;
    for event in events {
        if let Some(scope) = &scope_filter {
            let matches_scope = event
                .data
                .payload
                .get("scope_id")
                .and_then(|v| v.as_str())
                .map(|s| s == scope)
                .unwrap_or(false);
            if !matches_scope {
                continue;
            }
        }
        println!(
            "[{}] seq={} {} {}",
            event.ts, event.seq, event.data.event_type, event.data.payload
        );
    }

    Ok(())
}
