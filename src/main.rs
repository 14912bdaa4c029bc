//! invoice-radar CLI: fetch mail and find invoices.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use invoice_radar::config::RadarConfig;
use invoice_radar::detect::KeywordConfiguration;
use invoice_radar::mail::{FetchFilters, MailAccessConfig, Protocol};
use invoice_radar::paths::RadarPaths;
use invoice_radar::service::RadarService;

#[derive(Parser)]
#[command(name = "invoice-radar", version, about = "Find invoices in a mailbox")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/invoice-radar/config.toml).
    #[arg(long, global = true, env = "INVOICE_RADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the data directory.
    Init {
        /// Print the default config instead of writing it.
        #[arg(long)]
        print: bool,
    },

    /// Log in to a mailbox and report what the server says.
    Test {
        #[command(flatten)]
        account: AccountArgs,
    },

    /// Fetch and normalize messages.
    Fetch {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Fetch, score and record invoices.
    Scan {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Score messages from a JSON file (an array, or `{"messages": [...]}`).
    Detect {
        #[arg(long)]
        file: PathBuf,
    },

    /// Show or replace the keyword configuration.
    Keywords {
        #[command(subcommand)]
        action: KeywordAction,
    },

    /// Inspect recorded invoices.
    Invoices {
        #[command(subcommand)]
        action: InvoiceAction,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    /// Print the active configuration as JSON.
    Show,
    /// Replace the configuration from a JSON file.
    Set {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum InvoiceAction {
    /// List recorded invoices, newest first.
    List,
    /// Totals over all recorded invoices.
    Stats,
}

#[derive(Args)]
struct AccountArgs {
    /// Mail server hostname.
    #[arg(long)]
    host: String,

    /// Server port (defaults to the protocol's standard port).
    #[arg(long)]
    port: Option<u16>,

    /// Login name.
    #[arg(long, short)]
    username: String,

    /// Login secret.
    #[arg(long, env = "INVOICE_RADAR_PASSWORD", hide_env_values = true)]
    password: String,

    /// imap or pop3.
    #[arg(long, default_value = "imap")]
    protocol: Protocol,

    /// Connect without TLS.
    #[arg(long)]
    no_ssl: bool,

    /// IMAP folder.
    #[arg(long)]
    folder: Option<String>,
}

impl AccountArgs {
    fn into_access(self) -> MailAccessConfig {
        let ssl = !self.no_ssl;
        MailAccessConfig {
            port: self.port.unwrap_or_else(|| self.protocol.default_port(ssl)),
            host: self.host,
            username: self.username,
            password: self.password,
            ssl,
            protocol: self.protocol,
            folder: self.folder,
        }
    }
}

#[derive(Args)]
struct FilterArgs {
    /// Maximum number of messages.
    #[arg(long)]
    limit: Option<usize>,

    /// Sender substring.
    #[arg(long)]
    from: Option<String>,

    /// Recipient substring.
    #[arg(long)]
    to: Option<String>,

    /// Lower time bound, "YYYY/MM/DD HH:mm" local time (default: start of today).
    #[arg(long)]
    since: Option<String>,
}

impl From<FilterArgs> for FetchFilters {
    fn from(args: FilterArgs) -> Self {
        Self {
            limit: args.limit,
            from: args.from,
            to: args.to,
            since: args.since,
        }
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = RadarPaths::resolve().ok();
    let config_path = match (&cli.config, &paths) {
        (Some(path), _) => path.clone(),
        (None, Some(paths)) => paths.config_file(),
        (None, None) => PathBuf::from("invoice-radar.toml"),
    };

    let open_service = || -> Result<RadarService> {
        let config = RadarConfig::load_or_default(&config_path)?;
        Ok(RadarService::from_config(&config, paths.as_ref())?)
    };

    match cli.command {
        Commands::Init { print } => {
            let config = RadarConfig::default();
            if print {
                print!("{}", config.to_toml(&config_path)?);
                return Ok(());
            }
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
            } else {
                config.save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
            if let Some(paths) = &paths {
                paths.ensure_dirs()?;
                println!("Data directory: {}", paths.data_dir.display());
            }
        }

        Commands::Test { account } => {
            let service = open_service()?;
            let outcome = service.test_connection(&account.into_access())?;
            if cli.json {
                print_json(&outcome)?;
            } else if outcome.success {
                println!("OK: {}", outcome.message);
            } else {
                println!("FAILED: {}", outcome.message);
            }
            if !outcome.success {
                std::process::exit(2);
            }
        }

        Commands::Fetch { account, filters } => {
            let service = open_service()?;
            let outcome = service.fetch(&account.into_access(), &filters.into())?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("{}", outcome.message);
                for message in &outcome.messages {
                    println!(
                        "  {}  {}",
                        message.timestamp.format("%Y-%m-%d %H:%M"),
                        message.summary()
                    );
                }
            }
            if !outcome.success {
                std::process::exit(2);
            }
        }

        Commands::Scan { account, filters } => {
            let service = open_service()?;
            let report = service.scan(&account.into_access(), &filters.into())?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("{}", report.fetch_info.message);
                for result in report.detection.results.iter().filter(|r| r.is_invoice) {
                    println!(
                        "  [{:.2}] {} (from {})",
                        result.confidence, result.subject, result.sender
                    );
                    if let Some(info) = &result.extracted {
                        if let Some(number) = &info.invoice_number {
                            println!("         number: {number}");
                        }
                        if let Some(amount) = info.amount {
                            let currency = info.currency.as_deref().unwrap_or("");
                            println!("         amount: {amount:.2} {currency}");
                        }
                    }
                }
                println!("New records: {}", report.fetch_info.recorded);
            }
            if !report.fetch_info.success {
                std::process::exit(2);
            }
        }

        Commands::Detect { file } => {
            let service = open_service()?;
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            let value: serde_json::Value = serde_json::from_str(&content).into_diagnostic()?;
            let items = match value {
                serde_json::Value::Array(items) => items,
                serde_json::Value::Object(mut obj) => match obj.remove("messages") {
                    Some(serde_json::Value::Array(items)) => items,
                    _ => vec![serde_json::Value::Object(obj)],
                },
                other => vec![other],
            };
            let batch = service.detect_batch(items);
            if cli.json {
                print_json(&batch)?;
            } else {
                println!("{} of {} messages look like invoices", batch.invoice_count, batch.total);
                for result in &batch.results {
                    let mark = if result.is_invoice { "*" } else { " " };
                    match &result.error {
                        Some(error) => println!("{mark} {}: error: {error}", result.message_id),
                        None => println!(
                            "{mark} [{:.2}] {} ({})",
                            result.confidence, result.subject, result.message_id
                        ),
                    }
                }
            }
        }

        Commands::Keywords { action } => {
            let service = open_service()?;
            match action {
                KeywordAction::Show => print_json(&service.keywords())?,
                KeywordAction::Set { file } => {
                    let content = std::fs::read_to_string(&file).into_diagnostic()?;
                    let keywords: KeywordConfiguration =
                        serde_json::from_str(&content).into_diagnostic()?;
                    let updated = service.update_keywords(keywords)?;
                    if !service.store().is_enabled() {
                        eprintln!("warning: storage is disabled, the change lasts for this process only");
                    }
                    print_json(&updated)?;
                }
            }
        }

        Commands::Invoices { action } => {
            let service = open_service()?;
            match action {
                InvoiceAction::List => {
                    let records = service.invoices()?;
                    if cli.json {
                        print_json(&records)?;
                    } else if records.is_empty() {
                        println!("No invoices recorded.");
                    } else {
                        for record in &records {
                            println!(
                                "{}  {:<20} {:>12} {:<4} {:.2}  {}",
                                record.effective_date(),
                                record.invoice_number.as_deref().unwrap_or("-"),
                                record.amount.map_or("-".to_string(), |a| format!("{a:.2}")),
                                record.currency.as_deref().unwrap_or(""),
                                record.confidence_score,
                                record.issuer.as_deref().unwrap_or("-"),
                            );
                        }
                    }
                }
                InvoiceAction::Stats => {
                    let stats = service.invoice_stats()?;
                    if cli.json {
                        print_json(&stats)?;
                    } else {
                        println!("Invoices:           {}", stats.total_count);
                        println!("Total amount:       {:.2}", stats.total_amount);
                        println!("Average confidence: {:.4}", stats.average_confidence);
                        if let (Some(earliest), Some(latest)) =
                            (stats.date_range.earliest, stats.date_range.latest)
                        {
                            println!("Date range:         {earliest} .. {latest}");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
