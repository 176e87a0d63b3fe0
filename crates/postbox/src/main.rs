//! `postbox` - queue email for background SMTP delivery.
//!
//! Messages are persisted to the outbox first, then delivered by a worker
//! that survives failures of the sending command itself (`postbox resume`).

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod notify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use postbox_core::{
    Credentials, JobId, JobRecord, JobState, JobStore, MessageBuilder, NoopReporter, Outbox,
    ProgressReporter, Settings, SmtpTransport, WorkerScheduler, credentials,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use notify::DesktopReporter;

#[derive(Parser)]
#[command(name = "postbox", version, about = "Queue email for background SMTP delivery")]
struct Cli {
    /// Settings file to use instead of the platform default
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// SMTP login shared by the commands that deliver mail.
#[derive(Args)]
struct Login {
    /// SMTP user name
    #[arg(long)]
    username: String,

    /// Environment variable holding the SMTP password (keyring otherwise)
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a message and wait for its delivery
    Send {
        /// Sender address
        #[arg(long)]
        from: String,

        /// Recipient address(es), comma separated
        #[arg(long)]
        to: String,

        /// SMTP server host name
        #[arg(long)]
        server: String,

        /// SMTP server port
        #[arg(long)]
        port: u16,

        /// Upgrade the connection with STARTTLS
        #[arg(long)]
        starttls: bool,

        /// Subject line
        #[arg(long, default_value = "")]
        subject: String,

        /// Plain text body
        #[arg(long, default_value = "")]
        body: String,

        /// File to attach, optionally presented under another name
        #[arg(long = "attach", value_name = "PATH[=NAME]")]
        attachments: Vec<String>,

        #[command(flatten)]
        login: Login,

        /// Do not show desktop notifications
        #[arg(long)]
        no_notify: bool,
    },

    /// Show the stored state of a job
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,
    },

    /// Deliver jobs an earlier run left unfinished
    Resume {
        #[command(flatten)]
        login: Login,

        /// SMTP server the keyring password belongs to
        #[arg(long)]
        server: String,

        /// Do not show desktop notifications
        #[arg(long)]
        no_notify: bool,
    },

    /// Save an SMTP password in the system keyring
    StorePassword {
        /// SMTP user name
        #[arg(long)]
        username: String,

        /// SMTP server the password belongs to
        #[arg(long)]
        server: String,

        /// Environment variable holding the password (stdin otherwise)
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postbox=info,postbox_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Send {
            from,
            to,
            server,
            port,
            starttls,
            subject,
            body,
            attachments,
            login,
            no_notify,
        } => {
            let mut builder = MessageBuilder::new()
                .from(from)
                .to(to)
                .smtp_server(server)
                .smtp_port(port)
                .use_starttls(starttls)
                .subject(subject)
                .body(body);
            for attachment in &attachments {
                builder = attach(builder, attachment)?;
            }
            let message = builder.build()?;

            let credentials = login.credentials(message.smtp_server())?;
            let outbox = open_outbox(&settings, no_notify).await?;

            let id = outbox.send(&message, credentials).await?;
            println!("Queued {id}");

            let record = outbox.scheduler().wait(id).await?;
            outbox.shutdown().await;
            print_outcome(&record);

            if record.state == JobState::Failed {
                bail!("delivery failed");
            }
        }

        Commands::Status { job_id } => {
            let store = open_store(&settings.database_path).await?;
            let record = store
                .get(JobId(job_id))
                .await?
                .with_context(|| format!("no job {job_id}"))?;
            print_record(&record);
        }

        Commands::Resume {
            login,
            server,
            no_notify,
        } => {
            let credentials = login.credentials(&server)?;
            let outbox = open_outbox(&settings, no_notify).await?;
            let scheduler = outbox.scheduler();

            let ids = scheduler.resume(&credentials).await?;
            if ids.is_empty() {
                println!("Nothing to resume");
            }

            let mut failed = 0;
            for id in ids {
                let record = scheduler.wait(id).await?;
                print_outcome(&record);
                if record.state == JobState::Failed {
                    failed += 1;
                }
            }
            outbox.shutdown().await;

            if failed > 0 {
                bail!("{failed} job(s) failed");
            }
        }

        Commands::StorePassword {
            username,
            server,
            password_env,
        } => {
            let password = match password_env {
                Some(var) => env_password(&var)?,
                None => read_password()?,
            };
            credentials::store_smtp_password(&username, &server, &password)?;
            println!("Password stored for {username} on {server}");
        }
    }

    Ok(())
}

impl Login {
    /// Resolves the password from the named variable, then the keyring.
    fn credentials(&self, server: &str) -> Result<Credentials> {
        let password = if let Some(var) = &self.password_env {
            env_password(var)?
        } else {
            credentials::get_smtp_password(&self.username, server)?.with_context(|| {
                format!(
                    "no password stored for {} on {server}; run store-password or pass --password-env",
                    self.username
                )
            })?
        };

        Ok(Credentials::new(self.username.clone(), password))
    }
}

fn env_password(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("environment variable {var} is not set"))
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}

/// Adds `PATH` or `PATH=NAME` to the message.
fn attach(builder: MessageBuilder, arg: &str) -> Result<MessageBuilder> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(builder.attachment(path)?);
    }

    match arg.rsplit_once('=') {
        Some((path, name)) if !name.is_empty() => Ok(builder.attachment_named(path, name)?),
        _ => Ok(builder.attachment(path)?),
    }
}

async fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path).await,
        None => Settings::load().await,
    }
    .context("loading settings")?;

    info!("Outbox at {}", settings.outbox_dir.display());
    Ok(settings)
}

async fn open_outbox(settings: &Settings, no_notify: bool) -> Result<Outbox<WorkerScheduler>> {
    let transport = Arc::new(SmtpTransport::new(settings.smtp_timeout()));
    let reporter: Arc<dyn ProgressReporter> = if no_notify {
        Arc::new(NoopReporter)
    } else {
        Arc::new(DesktopReporter::new())
    };

    Outbox::start(settings, transport, reporter)
        .await
        .context("starting delivery worker")
}

async fn open_store(path: &Path) -> Result<JobStore> {
    let path = path
        .to_str()
        .with_context(|| format!("database path {} is not valid UTF-8", path.display()))?;
    JobStore::new(path).await.context("opening job database")
}

fn print_outcome(record: &JobRecord) {
    match &record.last_error {
        Some(error) => println!("{} {}: {error}", record.id, record.state),
        None => println!("{} {}", record.id, record.state),
    }
}

fn print_record(record: &JobRecord) {
    println!("Job:        {}", record.id);
    println!("State:      {}", record.state);
    println!("Message:    {}", record.mail_data);
    println!("Expedited:  {}", record.expedited);
    println!("Created:    {}", record.created_at.to_rfc3339());
    println!("Updated:    {}", record.updated_at.to_rfc3339());
    if let Some(error) = &record.last_error {
        println!("Error:      {error}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn builder() -> MessageBuilder {
        MessageBuilder::new()
            .from("a@x.com")
            .to("b@x.com")
            .smtp_server("smtp.x.com")
            .smtp_port(587)
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from([
            "postbox",
            "send",
            "--from",
            "a@x.com",
            "--to",
            "b@x.com",
            "--server",
            "smtp.x.com",
            "--port",
            "587",
            "--starttls",
            "--attach",
            "/tmp/upload=report.pdf",
            "--username",
            "a@x.com",
            "--password-env",
            "SMTP_PASSWORD",
        ])
        .unwrap();

        let Commands::Send {
            port,
            starttls,
            attachments,
            login,
            ..
        } = cli.command
        else {
            panic!("expected send");
        };
        assert_eq!(port, 587);
        assert!(starttls);
        assert_eq!(attachments, ["/tmp/upload=report.pdf"]);
        assert_eq!(login.password_env.as_deref(), Some("SMTP_PASSWORD"));
    }

    #[test]
    fn test_cli_rejects_bad_job_id() {
        assert!(Cli::try_parse_from(["postbox", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_attach_plain_and_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("upload-3f2a");
        std::fs::write(&upload, "x").unwrap();

        let plain = attach(builder(), upload.to_str().unwrap()).unwrap();
        let renamed = attach(plain, &format!("{}=report.pdf", upload.display())).unwrap();
        let message = renamed.build().unwrap();

        let names: Vec<_> = message
            .attachments()
            .iter()
            .map(|a| a.file_name().to_string())
            .collect();
        assert_eq!(names, ["upload-3f2a", "report.pdf"]);
    }

    #[test]
    fn test_attach_missing_file() {
        assert!(attach(builder(), "/definitely/not/here=x.txt").is_err());
    }

    #[test]
    fn test_send_arguments_are_documented() {
        use clap::CommandFactory;

        let cli = Cli::command();
        let send = cli.find_subcommand("send").unwrap();
        for arg in send.get_arguments() {
            if ["help", "version"].contains(&arg.get_id().as_str()) {
                continue;
            }
            assert!(arg.get_help().is_some(), "--{} has no help", arg.get_id());
        }
    }
}
