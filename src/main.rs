//! Thin CLI entry point over the Fleet Manager library. Intended for manual
//! smoke-testing and scripting; the MCP/RPC surface that wraps this crate
//! for end users is an external collaborator (see SPEC_FULL §1) and lives
//! outside this binary.

use fleetbrowse::config;
use fleetbrowse::fleet::{FleetManager, GetOrCreateOptions};
use fleetbrowse::FleetError;
use std::time::Duration;

fn print_usage() {
    eprintln!(
        "usage: fleetbrowse <command> [args]\n\n\
         commands:\n\
         \u{20}  profiles list\n\
         \u{20}  profiles create <name> [description]\n\
         \u{20}  profiles delete <name>\n\
         \u{20}  sessions list\n\
         \u{20}  launch [--profile <name>] [--url <url>]\n"
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match config::load_and_validate() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("failed to load config, falling back to in-memory defaults: {}", e);
            config::AppConfig::default()
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        std::process::exit(2);
    };

    let manager = match FleetManager::new(config).await {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to start fleet manager: {}", e);
            std::process::exit(1);
        }
    };

    let result = match command.as_str() {
        "profiles" => run_profiles(&manager, &args[1..]),
        "sessions" => run_sessions(&manager, &args[1..]),
        "launch" => run_launch(&manager, &args[1..]).await,
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    manager.shutdown().await;

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_profiles(manager: &FleetManager, args: &[String]) -> fleetbrowse::Result<()> {
    match args.first().map(String::as_str) {
        Some("list") => {
            for p in manager.list_profiles()? {
                println!("{}\t{}\t{}", p.name, p.description, if p.exists { "present" } else { "missing" });
            }
        }
        Some("create") => {
            let name = args.get(1).ok_or_else(|| FleetError::Validation("profiles create requires <name>".into()))?;
            let description = args.get(2).map(String::as_str).unwrap_or("");
            let dir = manager.create_profile(name, description)?;
            println!("created {:?}", dir);
        }
        Some("delete") => {
            let name = args.get(1).ok_or_else(|| FleetError::Validation("profiles delete requires <name>".into()))?;
            println!("deleted: {}", manager.delete_profile(name)?);
        }
        _ => print_usage(),
    }
    Ok(())
}

fn run_sessions(manager: &FleetManager, args: &[String]) -> fleetbrowse::Result<()> {
    match args.first().map(String::as_str) {
        Some("list") => {
            for s in manager.list_sessions()? {
                println!("{}\t{}\t{}", s.id, s.name.unwrap_or_default(), s.url);
            }
        }
        _ => print_usage(),
    }
    Ok(())
}

async fn run_launch(manager: &FleetManager, args: &[String]) -> fleetbrowse::Result<()> {
    let mut profile = None;
    let mut url = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--profile" => {
                profile = args.get(i + 1).cloned();
                i += 2;
            }
            "--url" => {
                url = args.get(i + 1).cloned();
                i += 2;
            }
            _ => i += 1,
        }
    }

    let options = GetOrCreateOptions { profile, acquire_deadline: Duration::from_secs(30), ..Default::default() };
    let instance = manager.get_or_create(options).await?;
    if let Some(url) = url {
        instance.navigate(&url).await?;
    }
    println!("launched instance {} on debug port {}", instance.id, instance.debug_port);
    Ok(())
}
