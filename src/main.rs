//! tenantry CLI - run and administer the IAM server

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tenantry::auth::validate_password;
use tenantry::config::{Config, LogFormat, LoggingConfig, StorageBackendType};
use tenantry::service::{IamService, ServiceError};
use tenantry::storage::{FileStorage, SqliteStorage, StorageBackend};
use tenantry::web::{AppState, WebServer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tenantry")]
#[command(about = "Multi-tenant IAM server with tenant-scoped RBAC")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Address to bind to, overriding the config
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Create the permission catalog, built-in roles, default tenant and superuser
    Seed,

    /// Verify the storage backend is reachable
    CheckDb,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => init_config(cli.config, force).await?,
        Commands::Serve { bind } => {
            let mut config = prepare(cli.config.as_ref(), cli.verbose).await?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            run_server(config).await?;
        }
        Commands::Seed => seed(prepare(cli.config.as_ref(), cli.verbose).await?).await?,
        Commands::CheckDb => check_db(prepare(cli.config.as_ref(), cli.verbose).await?).await?,
    }

    Ok(())
}

/// Load configuration, apply environment overrides and set up logging
async fn prepare(path: Option<&PathBuf>, verbose: u8) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = load_config(path).await?;
    config.apply_env()?;
    init_tracing(&config.logging, verbose)?;
    Ok(config)
}

/// Load the configuration from `--config`, the default path, or defaults
async fn load_config(path: Option<&PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(Config::load(path).await?);
    }
    let default_path = Config::default_path();
    if default_path.exists() {
        Ok(Config::load(&default_path).await?)
    } else {
        Ok(Config::default())
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let directive = match verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) if verbose == 0 => filter,
        _ => EnvFilter::try_new(&directive)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

/// Open the configured storage backend
async fn init_storage(config: &Config) -> Result<Arc<dyn StorageBackend>, Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackendType::File => {
            let path = config
                .storage
                .file_path
                .clone()
                .unwrap_or_else(Config::default_storage_path);
            info!(path = %path.display(), "Using file storage");
            Ok(Arc::new(FileStorage::open(&path).await?))
        }
        StorageBackendType::Sqlite => {
            let url = config
                .storage
                .database_url
                .clone()
                .unwrap_or_else(Config::default_database_url);
            if let Some(path) = url.strip_prefix("sqlite://") {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
            info!(url = %url, "Using SQLite storage");
            Ok(Arc::new(SqliteStorage::connect(&url).await?))
        }
    }
}

async fn init_service(config: &Config) -> Result<Arc<IamService>, Box<dyn std::error::Error>> {
    let storage = init_storage(config).await?;
    Ok(Arc::new(IamService::new(
        storage,
        &config.auth,
        config.invitations.clone(),
    )))
}

/// Run the REST API server
async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let service = init_service(&config).await?;

    match service.bootstrap(&config.bootstrap).await {
        Ok(report) => info!(
            permissions = report.permissions_created,
            roles = report.roles_created,
            "Bootstrap complete"
        ),
        // No superuser password yet; the catalog and built-in roles are seeded
        Err(ServiceError::Validation(reason)) => {
            warn!(%reason, "Skipping superuser bootstrap, run `tenantry seed`")
        }
        Err(e) => return Err(e.into()),
    }

    let server = WebServer::new(AppState::new(service, config));
    println!("tenantry listening on http://{}", server.bind_address());
    server.run().await.map_err(|e| e as Box<dyn std::error::Error>)?;
    Ok(())
}

/// Seed the database, prompting for the superuser password when needed
async fn seed(mut config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let service = init_service(&config).await?;

    let bootstrap = &mut config.bootstrap;
    if let Some(email) = &bootstrap.superuser_email {
        let exists = service.storage().get_user_by_email(email).await?.is_some();
        if !exists
            && bootstrap.superuser_password.is_none()
            && bootstrap.superuser_password_hash.is_none()
        {
            bootstrap.superuser_password = Some(prompt_password(email)?);
        }
    }

    let report = service.bootstrap(&config.bootstrap).await?;
    println!("Permissions created: {}", report.permissions_created);
    println!("Roles created:       {}", report.roles_created);
    match report.tenant_created {
        Some(slug) => println!("Tenant created:      {}", slug),
        None => println!("Tenant created:      -"),
    }
    match report.superuser_created {
        Some(email) => println!("Superuser created:   {}", email),
        None => println!("Superuser created:   -"),
    }
    Ok(())
}

fn prompt_password(email: &str) -> Result<SecretString, Box<dyn std::error::Error>> {
    eprint!("Password for superuser {}: ", email);
    io::stderr().flush()?;
    let password = rpassword::read_password()?;
    validate_password(&password)?;

    eprint!("Confirm password: ");
    io::stderr().flush()?;
    let confirm = rpassword::read_password()?;
    if password != confirm {
        return Err("Passwords do not match".into());
    }

    Ok(SecretString::from(password))
}

async fn check_db(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let service = init_service(&config).await?;
    service.health_check().await?;
    let permissions = service.storage().list_permissions().await?.len();
    let tenants = service.storage().list_tenants().await?.len();
    println!("Storage OK ({} permissions, {} tenants)", permissions, tenants);
    Ok(())
}

/// Write the default configuration file
async fn init_config(path: Option<PathBuf>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = path.unwrap_or_else(Config::default_path);

    if config_path.exists() && !force {
        return Err(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&config_path, Config::default_toml()).await?;

    println!("Configuration initialized at {}", config_path.display());
    println!("\nNext steps:");
    println!("1. Set TENANTRY_SUPERUSER_PASSWORD or run `tenantry seed` to be prompted");
    println!("2. Start the server: tenantry serve");
    Ok(())
}
