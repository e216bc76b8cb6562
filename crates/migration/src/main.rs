use lostfound_migration::Migrator;
use sea_orm_migration::prelude::*;
use std::env;
use std::process::ExitCode;

async fn connect() -> Result<sea_orm::DatabaseConnection, String> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL environment variable must be set".to_string())?;
    sea_orm::Database::connect(&database_url)
        .await
        .map_err(|e| format!("failed to connect to the database: {}", e))
}

async fn run(command: &str) -> Result<(), String> {
    let db = connect().await?;
    let db_err = |e: DbErr| e.to_string();

    match command {
        "up" => {
            println!("Running migrations up...");
            Migrator::up(&db, None).await.map_err(db_err)?;
            println!("Completed migrations up.");
        }
        "down" => {
            println!("Running migrations down...");
            Migrator::down(&db, None).await.map_err(db_err)?;
            println!("Completed migrations down.");
        }
        "fresh" => {
            println!("Refreshing database (down then up)...");
            Migrator::down(&db, None).await.map_err(db_err)?;
            Migrator::up(&db, None).await.map_err(db_err)?;
            println!("Database refresh completed.");
        }
        "status" => {
            let pending = Migrator::get_pending_migrations(&db)
                .await
                .map_err(db_err)?;
            let applied = Migrator::get_applied_migrations(&db)
                .await
                .map_err(db_err)?;
            println!("Migration Status:");
            for migration in &applied {
                println!("{}: Applied", migration.name());
            }
            for migration in &pending {
                println!("{}: Pending", migration.name());
            }
        }
        other => return Err(format!("unknown command `{}`", other)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let command = env::args().nth(1);
    let result = match command.as_deref() {
        Some(command) => run(command).await,
        None => {
            // no subcommand: hand over to the SeaORM CLI
            cli::run_cli(Migrator).await;
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Usage: lostfound-migration [up|down|fresh|status]");
            ExitCode::FAILURE
        }
    }
}
