use courier_storage::{connect, NewUser, PgRepository, Repository};
use std::env;
use tokio::runtime::Builder;
use tracing::info;

fn main() {
    let _ = dotenvy::dotenv();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("info")
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to init tracing");
    let mut runtime = Builder::new_multi_thread();
    runtime.enable_all();
    let runtime = runtime.build().expect("failed to build runtime");
    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn async_main() -> Result<(), String> {
    let mut args = env::args().skip(1).collect::<Vec<String>>();
    if args.is_empty() {
        return Err("usage: courier-cli <migrate|create-user|diagnose>".to_string());
    }
    let command = args.remove(0);
    match command.as_str() {
        "migrate" => command_migrate().await,
        "create-user" => command_create_user(args).await,
        "diagnose" => command_diagnose().await,
        other => Err(format!("unknown command: {}", other)),
    }
}

async fn command_migrate() -> Result<(), String> {
    let repository = repository_connect().await?;
    repository
        .migrate()
        .await
        .map_err(|err| format!("migrate failed: {}", err))?;
    info!("migrations applied");
    Ok(())
}

async fn command_create_user(mut args: Vec<String>) -> Result<(), String> {
    if args.is_empty() {
        return Err("usage: courier-cli create-user <username> [display-name]".to_string());
    }
    let username = args.remove(0);
    let display_name = if args.is_empty() {
        username.clone()
    } else {
        args.remove(0)
    };
    let repository = repository_connect().await?;
    let user = repository
        .create_user(&NewUser {
            username,
            display_name,
            avatar_url: None,
        })
        .await
        .map_err(|err| format!("create-user failed: {}", err))?;
    info!(user = user.id, username = %user.username, "user created");
    println!("{}", user.id);
    Ok(())
}

async fn command_diagnose() -> Result<(), String> {
    let repository = repository_connect().await?;
    repository
        .readiness()
        .await
        .map_err(|err| format!("diagnose failed: {}", err))?;
    info!("storage reachable");
    Ok(())
}

async fn repository_connect() -> Result<PgRepository, String> {
    let dsn = env::var("COURIER_PG_DSN")
        .map_err(|_| "COURIER_PG_DSN is not set".to_string())?;
    connect(&dsn)
        .await
        .map_err(|err| format!("storage connect failed: {}", err))
}
