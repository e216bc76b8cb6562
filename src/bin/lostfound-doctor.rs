use clap::{Arg, Command};
use lostfound::error::Result;
use lostfound::models::ItemType;
use lostfound::validation::LoginForm;
use lostfound::LostFound;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn run(email: Option<&str>, password: Option<&str>) -> Result<()> {
    let app = LostFound::from_env()?;
    println!("Project: {}", app.config.base_url());

    if let (Some(email), Some(password)) = (email, password) {
        let form = LoginForm {
            email: email.to_string(),
            password: password.to_string(),
        };
        app.auth().sign_in(&form).await?;
    }

    let viewer = app.auth().viewer().await?;
    match &viewer.session {
        Some(session) => {
            let role = viewer.role();
            println!(
                "Signed in as {} ({}), role {}",
                session.user.email.as_deref().unwrap_or("no email"),
                session.user.id,
                role
            );
        }
        None => println!("Not signed in, querying anonymously"),
    }

    for kind in ItemType::ALL {
        let items = app.items().list_by_type(*kind).await?;
        println!("{} items: {}", kind, items.len());
    }

    info!("connection check passed");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let matches = Command::new("lostfound-doctor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Checks the connection to the Lost & Found backend")
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .value_name("EMAIL")
                .help("Sign in with this email before checking")
                .takes_value(true)
                .requires("password"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .help("Password for --email")
                .takes_value(true)
                .requires("email"),
        )
        .get_matches();

    if let Err(e) = run(matches.value_of("email"), matches.value_of("password")).await {
        error!(error = %e, "connection check failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
