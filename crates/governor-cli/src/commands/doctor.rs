use governor_core::config::Config;
use governor_core::policy::PolicyConfig;

pub async fn run() -> anyhow::Result<()> {
    println!("Checking governance engine health...\n");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            println!("✗ Configuration: {e}");
            return Err(e.into());
        }
    };
    println!("✓ Configuration loaded from environment");

    let mut all_ok = true;

    print!("• Postgres ({})... ", config.database.url);
    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.url)
        .await
    {
        Ok(_) => println!("✓ reachable"),
        Err(e) => {
            println!("✗ {e}");
            all_ok = false;
        }
    }

    print!("• NATS ({})... ", config.bus.nats_url);
    let nats_host = config.bus.nats_url.trim_start_matches("nats://").to_string();
    match tokio::net::TcpStream::connect(&nats_host).await {
        Ok(_) => println!("✓ port reachable"),
        Err(e) => {
            println!("✗ {e}");
            all_ok = false;
        }
    }

    print!("• Governance policy ({})... ", config.governance_yaml_path);
    match PolicyConfig::from_yaml_file(&config.governance_yaml_path) {
        Ok(_) => println!("✓ parsed"),
        Err(e) => {
            println!("○ {e} (falling back to defaults)");
        }
    }

    println!();
    if all_ok {
        println!("All checks passed. Ready to run: govctl up");
        Ok(())
    } else {
        println!("Some checks failed. Fix the issues above before running govctl up");
        std::process::exit(1);
    }
}
