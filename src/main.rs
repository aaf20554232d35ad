//! pgsu command line
//!
//! Runs one SQL statement as the PostgreSQL superuser, working out how to
//! connect on its own.

use clap::Parser;
use pgsu::{
    ConnectionHint, Error, QueryResult, Resolver, ResolverConfig, TerminalPrompt,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_QUERY: &str = "SELECT datname FROM pg_database";

/// Execute SQL as the PostgreSQL superuser
#[derive(Parser, Debug)]
#[command(name = "pgsu")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQL statement to execute
    #[arg(default_value = DEFAULT_QUERY)]
    query: String,

    /// Connection string, e.g. postgres://postgres@localhost:5432/template1
    #[arg(long)]
    dsn: Option<String>,

    /// Host name, address or socket directory
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long, short)]
    port: Option<u16>,

    /// Database superuser
    #[arg(long, short)]
    user: Option<String>,

    /// Database to connect to
    #[arg(long, short)]
    database: Option<String>,

    /// Password for the database superuser
    #[arg(long, env = "PGSU_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// OS account to act as when escalating (default: the database user)
    #[arg(long)]
    service_account: Option<String>,

    /// Do not fall back to running psql as the service account
    #[arg(long)]
    no_escalation: bool,

    /// Seconds allowed per connection attempt
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Prompt on the terminal for the sudo password and, as a last resort, connection details
    #[arg(long, short)]
    interactive: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn hint(&self) -> pgsu::Result<ConnectionHint> {
        let mut hint = match self.dsn {
            Some(ref dsn) => ConnectionHint::parse(dsn)?,
            None => ConnectionHint::default(),
        };
        if let Some(ref host) = self.host {
            hint.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            hint.port = Some(port);
        }
        if let Some(ref user) = self.user {
            hint.user = Some(user.clone());
        }
        if let Some(ref database) = self.database {
            hint.database = Some(database.clone());
        }
        if let Some(ref password) = self.password {
            hint.password = Some(password.clone());
        }
        Ok(hint)
    }

    fn resolver(&self) -> Resolver {
        let mut config = ResolverConfig::builder()
            .connect_timeout(Duration::from_secs(self.timeout))
            .escalation(!self.no_escalation);
        if let Some(ref account) = self.service_account {
            config = config.service_account(account);
        }

        let resolver = Resolver::new().with_config(config.build());
        if self.interactive {
            resolver
                .with_prompt(TerminalPrompt)
                .with_setup_fallback(TerminalPrompt)
        } else {
            resolver
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(result) => {
            if let Err(e) = print_result(&result, cli.json) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            match e {
                Error::Resolution(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: &Cli) -> pgsu::Result<QueryResult> {
    let hint = cli.hint()?;
    let mut resolver = cli.resolver();
    let mut session = resolver.resolve(&hint).await?;
    tracing::debug!(strategy = %session.strategy(), "executing statement");

    let result = session.execute(&cli.query).await;
    if let Err(e) = session.close().await {
        tracing::debug!("error closing session: {}", e);
    }
    Ok(result?)
}

fn print_result(result: &QueryResult, json: bool) -> serde_json::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.rows.is_empty() {
        if let Some(ref tag) = result.command {
            println!("{}", tag);
        }
        return Ok(());
    }
    for row in &result.rows {
        let line: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("")).collect();
        println!("{}", line.join("\t"));
    }
    Ok(())
}
