//! groupsync - synchronized group membership reconciler.
//!
//! Reconciles the membership of synchronized groups in an identity
//! directory against the union of their source groups, either for every
//! enabled group (`--auto`) or for one explicit group with an
//! operator-supplied source query (`--manual`).

use std::sync::Arc;

use clap::{ArgGroup, Args, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use groupsync_directory::GroupPath;
use groupsync_directory_rest::{RestDirectory, RestDirectoryConfig};
use groupsync_engine::{NoopNotifier, Notifier, Reconciler, SmtpConfig, SmtpNotifier, SyncOptions};

mod error;

use error::{CliError, CliResult};

#[derive(Parser)]
#[command(name = "groupsync", version, about)]
#[command(group(ArgGroup::new("mode").required(true).args(["auto", "manual"])))]
struct Cli {
    /// Discover every enabled synchronized group and reconcile each.
    #[arg(long)]
    auto: bool,

    /// Reconcile one group using the given source query, overriding the
    /// group's own configuration. Refused for groups under automatic
    /// management.
    #[arg(long, num_args = 2, value_names = ["GROUP_PATH", "SOURCE_QUERY"])]
    manual: Option<Vec<String>>,

    /// Report every decision without changing memberships, state, or
    /// sending mail.
    #[arg(long)]
    dryrun: bool,

    /// Actually deliver notifications. Without this flag decisions are
    /// made normally but all mail is dropped.
    #[arg(long)]
    allow_notifications: bool,

    /// Log filter (e.g. "info", "groupsync_engine=debug").
    #[arg(long, env = "GROUPSYNC_LOG", default_value = "info")]
    log_level: String,

    #[command(flatten)]
    directory: DirectorySettings,

    #[command(flatten)]
    mail: MailSettings,
}

/// Connection settings for the directory's admin API.
#[derive(Args)]
struct DirectorySettings {
    /// Base URL of the directory server.
    #[arg(long, env = "GROUPSYNC_DIRECTORY_URL")]
    directory_url: String,

    /// Realm whose groups are managed.
    #[arg(long, env = "GROUPSYNC_REALM")]
    realm: String,

    /// OAuth2 client id of the service account.
    #[arg(long, env = "GROUPSYNC_CLIENT_ID")]
    client_id: String,

    /// OAuth2 client secret.
    #[arg(long, env = "GROUPSYNC_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Realm to authenticate against, when different from --realm.
    #[arg(long, env = "GROUPSYNC_TOKEN_REALM")]
    token_realm: Option<String>,
}

/// Notification delivery settings.
#[derive(Args)]
struct MailSettings {
    /// SMTP relay host.
    #[arg(long, env = "GROUPSYNC_SMTP_HOST", default_value = "localhost")]
    smtp_host: String,

    /// SMTP relay port.
    #[arg(long, env = "GROUPSYNC_SMTP_PORT", default_value_t = 25)]
    smtp_port: u16,

    /// Sender address for notifications. Required with
    /// --allow-notifications.
    #[arg(long, env = "GROUPSYNC_MAIL_FROM")]
    mail_from: Option<String>,

    /// Domain for deriving a recipient address when a user record has no
    /// email.
    #[arg(long, env = "GROUPSYNC_MAIL_DOMAIN")]
    mail_domain: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // A live automatic run always notifies; require the operator to say
    // so explicitly.
    if cli.auto && !cli.dryrun && !cli.allow_notifications {
        return Err(CliError::usage(
            "--auto without --dryrun requires --allow-notifications",
        ));
    }

    let directory = build_directory(&cli.directory)?;
    let notifier = build_notifier(&cli)?;
    let options = SyncOptions {
        dry_run: cli.dryrun,
        allow_notifications: cli.allow_notifications,
    };
    let reconciler = Reconciler::new(directory, notifier, options);

    if cli.auto {
        let reports = reconciler.auto_sync().await?;
        info!(groups = reports.len(), "automatic run finished");
        for report in &reports {
            println!("{report}");
        }
        return Ok(());
    }

    // clap guarantees --manual carries exactly two values here.
    let manual = cli
        .manual
        .as_deref()
        .filter(|args| args.len() == 2)
        .ok_or_else(|| CliError::usage("--manual requires GROUP_PATH and SOURCE_QUERY"))?;
    let target = GroupPath::new(&manual[0])?;
    let report = reconciler.manual_sync(&target, &manual[1]).await?;
    println!("{report}");
    Ok(())
}

fn build_directory(settings: &DirectorySettings) -> CliResult<Arc<RestDirectory>> {
    let mut config = RestDirectoryConfig::new(
        &settings.directory_url,
        &settings.realm,
        &settings.client_id,
        &settings.client_secret,
    );
    if let Some(token_realm) = &settings.token_realm {
        config = config.with_token_realm(token_realm);
    }
    Ok(Arc::new(RestDirectory::new(config)?))
}

fn build_notifier(cli: &Cli) -> CliResult<Arc<dyn Notifier>> {
    if !cli.allow_notifications {
        return Ok(Arc::new(NoopNotifier));
    }
    let from_address = cli
        .mail
        .mail_from
        .clone()
        .ok_or_else(|| CliError::usage("--mail-from is required with --allow-notifications"))?;
    let notifier = SmtpNotifier::new(SmtpConfig {
        host: cli.mail.smtp_host.clone(),
        port: cli.mail.smtp_port,
        from_address,
        fallback_domain: cli.mail.mail_domain.clone(),
    })?;
    Ok(Arc::new(notifier))
}
