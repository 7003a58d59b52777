use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use mesh_acl::acl::{enforce, AclConfig, AuthorizerContext, EnforceAccess, Resolver, Resource};
use mesh_acl::db::acl_repo::{self, SqliteTokenSource};
use mesh_acl::models::acl::{NodeIdentity, PolicyCreateRequest, PolicyLink, ServiceIdentity, TokenCreateRequest};

#[derive(Parser, Debug)]
#[command(author, version, about = "mesh-acl admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create a policy from a JSON rule document
    PolicyCreate {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Inline JSON rules
        #[arg(long, conflicts_with = "rules_file")]
        rules: Option<String>,
        /// Path to a JSON rules file
        #[arg(long)]
        rules_file: Option<std::path::PathBuf>,
    },
    /// Create a token and print its secret
    TokenCreate {
        #[arg(long, default_value = "")]
        description: String,
        /// Policy name to link (repeatable)
        #[arg(long = "policy")]
        policies: Vec<String>,
        /// Service identity to attach (repeatable)
        #[arg(long = "service-identity")]
        service_identities: Vec<String>,
        /// Node identity to attach (repeatable)
        #[arg(long = "node-identity")]
        node_identities: Vec<String>,
        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Check one permission for a token secret
    Authorize {
        /// Token secret; empty for the anonymous token
        #[arg(long, default_value = "")]
        token: String,
        resource: String,
        access: String,
        /// Resource name, e.g. the service or key; unused for acl/operator/keyring
        #[arg(long, default_value = "")]
        segment: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::PolicyCreate {
            name,
            description,
            rules,
            rules_file,
        } => {
            let rules = match (rules, rules_file) {
                (Some(rules), _) => rules,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read rules from {}", path.display()))?,
                (None, None) => String::new(),
            };
            let pool = get_pool().await?;
            let request = PolicyCreateRequest {
                name,
                description,
                rules,
            };
            let policy = acl_repo::create_policy(&pool, &request).await?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        Commands::TokenCreate {
            description,
            policies,
            service_identities,
            node_identities,
            ttl,
        } => {
            let pool = get_pool().await?;
            let request = TokenCreateRequest {
                description,
                policies: policies
                    .into_iter()
                    .map(|name| PolicyLink {
                        id: None,
                        name: Some(name),
                    })
                    .collect(),
                service_identities: service_identities
                    .into_iter()
                    .map(|service_name| ServiceIdentity { service_name })
                    .collect(),
                node_identities: node_identities
                    .into_iter()
                    .map(|node_name| NodeIdentity { node_name })
                    .collect(),
                expiration_ttl: ttl,
            };
            let token = acl_repo::create_token(&pool, &request).await?;
            println!("{}", serde_json::to_string_pretty(&token)?);
        }
        Commands::Authorize {
            token,
            resource,
            segment,
            access,
        } => {
            let pool = get_pool().await?;
            let config = AclConfig::from_env()?;
            let default_allow = config.default_allow();
            let resolver = Resolver::new(config, Arc::new(SqliteTokenSource::new(pool)));

            let resource: Resource = resource.parse()?;
            let access: EnforceAccess = access.parse()?;
            let authz = resolver.resolve(&token).await?;
            let decision = enforce(authz.as_ref(), resource, &segment, access, &AuthorizerContext::default())?;

            println!(
                "{resource}:{access} {segment:?} -> {decision} (allow: {})",
                decision.resolve(default_allow)
            );
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root), then the
    // crate-local migrations folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
