use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Confirm;
use tracing::info;
use uuid::Uuid;

use notiflow_core::cache::RedisPool;
use notiflow_core::db::create_pool;
use notiflow_core::db::migrate::Migrator;
use notiflow_core::notification::model::{NotificationChannel, NotificationStatus};
use notiflow_core::notification::{IdempotencyGate, NotificationService, QueuePublisher, RateLimiter, SubmitRequest};
use notiflow_core::repository::{
    NotificationStore, PostgresNotificationStore, PostgresTemplateRepository, PostgresUserRepository,
    TemplateRepository, UserRepository,
};
use notiflow_core::{Config, Error, Result};

/// Security checks for CLI operations.
mod security {
    use colored::Colorize;

    /// Refuse to run privileged subcommands as root.
    pub fn check_not_root() -> std::result::Result<(), String> {
        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            if uid == 0 {
                return Err(format!(
                    "{}\n{}",
                    "running as root is not allowed".red().bold(),
                    "run as a non-privileged user instead"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "notiflow")]
#[command(about = "notiflow notification dispatch service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server and its background workers
    Server {
        #[arg(short = 'H', long, help = "Bind address", default_value = "0.0.0.0")]
        host: String,

        #[arg(short = 'P', long, help = "Port number", default_value = "8080")]
        port: u16,

        #[arg(long, help = "Skip automatic database migration on startup")]
        skip_migrate: bool,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Submit and inspect notifications
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },

    /// Manage notification templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Look up users and their contact points
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Show the loaded configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,

    /// Reset database (DANGEROUS - deletes all data)
    Reset {
        #[arg(long, help = "Skip confirmation prompt")]
        force: bool,
    },

    /// Show database and pipeline status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum NotificationCommands {
    /// Submit a single notification
    Submit {
        #[arg(long)]
        user_id: Uuid,

        #[arg(long, value_enum)]
        channel: ChannelArg,

        #[arg(long, help = "Name of a stored template to render")]
        template_name: Option<String>,

        #[arg(long, help = "Literal content; mutually exclusive with --template-name")]
        content: Option<String>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long, help = "Caller-supplied idempotency key")]
        event_id: Option<String>,

        #[arg(long)]
        max_retries: Option<i32>,
    },

    /// Submit the same content to many users
    Bulk {
        #[arg(long, value_delimiter = ',', help = "Comma-separated user ids")]
        user_ids: Vec<Uuid>,

        #[arg(long, value_enum)]
        channel: ChannelArg,

        #[arg(long)]
        content: String,

        #[arg(long)]
        subject: Option<String>,
    },

    /// Fetch a notification by id
    Get {
        id: Uuid,
    },

    /// List notifications for a user
    List {
        user_id: Uuid,

        #[arg(long, default_value = "1")]
        page: i64,

        #[arg(long, default_value = "20")]
        size: i64,

        #[arg(long, help = "Filter by status (PENDING, PROCESSING, SENT, DELIVERED, READ, FAILED)")]
        status: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Create a template
    Create {
        #[arg(long)]
        name: String,

        #[arg(long, value_enum)]
        channel: ChannelArg,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        content: String,
    },

    /// List active templates, optionally filtered by channel
    List {
        #[arg(long, value_enum)]
        channel: Option<ChannelArg>,
    },

    /// Fetch a template by id
    Get {
        id: Uuid,
    },

    /// Update a template's subject/content
    Update {
        id: Uuid,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        content: String,
    },

    /// Deactivate a template
    Deactivate {
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Fetch a user by id
    Get {
        id: Uuid,
    },

    /// Look up a user by email or phone
    Lookup {
        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ChannelArg {
    Email,
    Sms,
    Push,
    InApp,
}

impl From<ChannelArg> for NotificationChannel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Email => NotificationChannel::Email,
            ChannelArg::Sms => NotificationChannel::Sms,
            ChannelArg::Push => NotificationChannel::Push,
            ChannelArg::InApp => NotificationChannel::InApp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = if let Some(ref config_path) = cli.config {
        Config::load(config_path.to_str().unwrap())?
    } else {
        Config::from_env()?
    };

    info!("notiflow v{}", notiflow_core::VERSION);

    match cli.command {
        Commands::Server { host, port, skip_migrate } => {
            let mut config = config;
            config.server.host = host;
            config.server.port = port;

            if !skip_migrate {
                info!("running database migrations...");
                let pool = create_pool(&config.database).await?;
                Migrator::new(pool).migrate().await?;
            }

            notiflow_api::run(config).await?;
        }

        Commands::Db { command } => {
            let pool = create_pool(&config.database).await?;
            let migrator = Migrator::new(pool);

            match command {
                DbCommands::Migrate => {
                    println!("{}", "running database migrations...".yellow());
                    migrator.migrate().await?;
                    println!("{}", "migrations completed".green());
                }
                DbCommands::Reset { force } => {
                    if !force {
                        let confirmed = Confirm::new()
                            .with_prompt("this will DELETE ALL DATA. continue?".red().to_string())
                            .default(false)
                            .interact()
                            .map_err(|e| Error::validation(format!("input error: {}", e)))?;
                        if !confirmed {
                            println!("aborted.");
                            return Ok(());
                        }
                    }

                    println!("{}", "resetting database...".red());
                    migrator.reset().await?;
                    println!("{}", "database reset complete".green());
                }
                DbCommands::Status => {
                    let status = migrator.status().await?;
                    println!("{}", "Database Status".bold().underline());
                    println!("  Host:                {}:{}", config.database.host, config.database.port);
                    println!("  Database:            {}", config.database.database);
                    println!("  Applied migrations:  {}", status.applied_migrations);
                    println!("  Users:               {}", status.user_count);
                    println!("  Templates:           {}", status.template_count);
                    println!("  Notifications:       {}", status.notification_count);
                    println!("  Pending:             {}", status.pending_count);
                }
            }
        }

        Commands::Notification { command } => {
            if let Err(e) = security::check_not_root() {
                eprintln!("{}", e);
                std::process::exit(1);
            }

            let deps = Dependencies::connect(&config).await?;

            match command {
                NotificationCommands::Submit {
                    user_id,
                    channel,
                    template_name,
                    content,
                    subject,
                    event_id,
                    max_retries,
                } => {
                    let request = SubmitRequest {
                        user_id,
                        channel: channel.into(),
                        priority: Default::default(),
                        template_name,
                        template_variables: Default::default(),
                        subject,
                        content,
                        event_id,
                        max_retries,
                    };

                    match deps.service.submit(request).await {
                        Ok(receipt) => {
                            println!("{}", "notification accepted".green());
                            println!("  id:      {}", receipt.id);
                            println!("  status:  {:?}", receipt.status);
                        }
                        Err(e) => {
                            eprintln!("{}", format!("submission failed: {}", e).red());
                            std::process::exit(1);
                        }
                    }
                }

                NotificationCommands::Bulk { user_ids, channel, content, subject } => {
                    let template = SubmitRequest::literal(Uuid::nil(), channel.into(), subject, content);
                    let result = deps.service.submit_bulk(&user_ids, template).await;
                    println!("{}", "bulk submission complete".green());
                    println!("  requested:  {}", result.total_requested);
                    println!("  accepted:   {}", result.success_count);
                    for failure in &result.failures {
                        println!("  {} {}: {}", "failed".red(), failure.user_id, failure.error);
                    }
                }

                NotificationCommands::Get { id } => match deps.store.find_by_id(id).await? {
                    Some(n) => {
                        println!("{}", "Notification".bold().underline());
                        println!("  id:           {}", n.id);
                        println!("  user_id:      {}", n.user_id);
                        println!("  channel:      {}", n.channel.as_str());
                        println!("  status:       {:?}", n.status);
                        println!("  retry_count:  {}/{}", n.retry_count, n.max_retries);
                        println!("  created_at:   {}", n.created_at);
                        if let Some(err) = n.error_message {
                            println!("  error:        {}", err);
                        }
                    }
                    None => println!("{}", format!("notification {} not found", id).yellow()),
                },

                NotificationCommands::List { user_id, page, size, status } => {
                    let status = status
                        .map(|s| s.parse::<NotificationStatus>())
                        .transpose()?;
                    let offset = (page.max(1) - 1) * size;
                    let items = deps.store.list_for_user(user_id, status, offset, size).await?;

                    if items.is_empty() {
                        println!("{}", "no notifications found".yellow());
                    } else {
                        println!("{:<36} {:<8} {:<12} {:<20}", "ID", "CHANNEL", "STATUS", "CREATED");
                        println!("{}", "-".repeat(80));
                        for n in &items {
                            println!(
                                "{:<36} {:<8} {:<12} {:<20}",
                                n.id,
                                n.channel.as_str(),
                                format!("{:?}", n.status),
                                n.created_at.format("%Y-%m-%d %H:%M:%S")
                            );
                        }
                    }
                }
            }
        }

        Commands::Template { command } => {
            let deps = Dependencies::connect(&config).await?;

            match command {
                TemplateCommands::Create { name, channel, subject, content } => {
                    let now = chrono::Utc::now();
                    let template = notiflow_core::notification::model::Template {
                        id: Uuid::new_v4(),
                        name,
                        channel: channel.into(),
                        subject,
                        content,
                        active: true,
                        created_at: now,
                        updated_at: now,
                    };

                    let created = deps.templates.create(&template).await?;
                    println!("{}", "template created".green());
                    println!("  id:   {}", created.id);
                    println!("  name: {}", created.name);
                }

                TemplateCommands::List { channel } => {
                    let templates = deps.templates.list_active(channel.map(Into::into)).await?;
                    if templates.is_empty() {
                        println!("{}", "no active templates".yellow());
                    } else {
                        for t in templates {
                            println!("{:<36} {:<20} {}", t.id, t.name, t.channel.as_str());
                        }
                    }
                }

                TemplateCommands::Get { id } => match deps.templates.find_by_id(id).await? {
                    Some(t) => {
                        println!("  id:      {}", t.id);
                        println!("  name:    {}", t.name);
                        println!("  channel: {}", t.channel.as_str());
                        println!("  subject: {}", t.subject.as_deref().unwrap_or("(none)"));
                        println!("  content: {}", t.content);
                        println!("  active:  {}", t.active);
                    }
                    None => println!("{}", format!("template {} not found", id).yellow()),
                },

                TemplateCommands::Update { id, subject, content } => {
                    match deps.templates.update(id, subject, content).await? {
                        Some(_) => println!("{}", "template updated".green()),
                        None => println!("{}", format!("template {} not found", id).yellow()),
                    }
                }

                TemplateCommands::Deactivate { id } => match deps.templates.deactivate(id).await? {
                    Some(_) => println!("{}", "template deactivated".green()),
                    None => println!("{}", format!("template {} not found", id).yellow()),
                },
            }
        }

        Commands::User { command } => {
            let deps = Dependencies::connect(&config).await?;

            match command {
                UserCommands::Get { id } => match deps.users.find_by_id(id).await? {
                    Some(u) => {
                        println!("  id:           {}", u.id);
                        println!("  email:        {}", u.email.as_deref().unwrap_or("(none)"));
                        println!("  phone:        {}", u.phone.as_deref().unwrap_or("(none)"));
                        println!("  device_token: {}", u.device_token.as_deref().unwrap_or("(none)"));
                    }
                    None => println!("{}", format!("user {} not found", id).yellow()),
                },

                UserCommands::Lookup { email, phone } => {
                    let result = match (email, phone) {
                        (Some(email), None) => deps.users.find_by_email(&email).await?,
                        (None, Some(phone)) => deps.users.find_by_phone(&phone).await?,
                        _ => {
                            eprintln!("{}", "provide exactly one of --email or --phone".red());
                            std::process::exit(1);
                        }
                    };

                    match result {
                        Some(u) => println!("  id: {}", u.id),
                        None => println!("{}", "no matching user".yellow()),
                    }
                }
            }
        }

        Commands::Config => {
            println!(
                "Configuration loaded from: {}",
                cli.config.map(|p| p.display().to_string()).unwrap_or_else(|| "environment".to_string())
            );
            println!("{:#?}", config);
        }
    }

    Ok(())
}

/// The repository/service handles every non-server subcommand needs. Built
/// fresh per invocation rather than kept running, matching the CLI's
/// one-shot, fire-and-exit nature.
struct Dependencies {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserRepository>,
    templates: Arc<dyn TemplateRepository>,
    service: NotificationService,
}

impl Dependencies {
    async fn connect(config: &Config) -> Result<Self> {
        let pool = create_pool(&config.database).await?;
        let store: Arc<dyn NotificationStore> = Arc::new(PostgresNotificationStore::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(PostgresUserRepository::new(pool.clone()));
        let templates: Arc<dyn TemplateRepository> = Arc::new(PostgresTemplateRepository::new(pool));

        let redis = RedisPool::new(config.cache.redis.clone()).await?;

        let idempotency = Arc::new(IdempotencyGate::new(redis.clone(), config.notifications.dedup.ttl_seconds));
        let rate_limiter = Arc::new(RateLimiter::new(redis.clone(), config.notifications.rate_limit.clone()));
        let queue = Arc::new(QueuePublisher::new(redis));

        let service = NotificationService::new(
            store.clone(),
            users.clone(),
            templates.clone(),
            idempotency,
            rate_limiter,
            queue,
            config.notifications.clone(),
        );

        Ok(Self { store, users, templates, service })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_server() {
        let cli = Cli::parse_from(["notiflow", "server"]);
        assert!(matches!(cli.command, Commands::Server { .. }));
    }

    #[test]
    fn test_cli_parse_notification_submit() {
        let cli = Cli::parse_from([
            "notiflow",
            "notification",
            "submit",
            "--user-id",
            "00000000-0000-0000-0000-000000000001",
            "--channel",
            "email",
            "--content",
            "hello",
        ]);
        assert!(matches!(cli.command, Commands::Notification { .. }));
    }
}
