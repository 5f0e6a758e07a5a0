//! netstate command line tool

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use netstate::commands::{
    firewall::parse_rule, FirewallCommand, IpCommand, LinkAction, LinkCommand, OutputFormat,
    RestoreCommand, SaveCommand, ShowCommand, StatusCommand, ValidateCommand,
};
use netstate::context::AppContext;
use netstate_types::Chain;

#[derive(Parser)]
#[command(name = "netstate")]
#[command(about = "Save and restore host network and firewall state")]
#[command(long_about = "
Save and restore host network and firewall state

Captures interfaces, netplan configuration and iptables filter rules into a
single snapshot file and restores them on demand.

Examples:
  netstate save                                   # Capture and save live state
  netstate restore                                # Restore after confirmation
  netstate restore --yes                          # Restore without asking
  netstate show --live --format json              # Print live state as JSON
  netstate firewall add INPUT tcp ACCEPT --port 22 --description 'Allow SSH'
  netstate ip static eth0 192.168.1.50/24 --gateway 192.168.1.1 --dns 1.1.1.1
")]
struct Cli {
    /// Enable verbose output
    #[arg(short = 'V', long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture live state and save it
    Save,

    /// Restore the saved configuration
    Restore {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the saved configuration
    Show {
        /// Show the live system instead
        #[arg(long)]
        live: bool,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check the saved configuration for violations
    Validate,

    /// List backups of earlier saves
    Backups,

    /// Show live interfaces
    Status,

    /// Bring an interface up or down
    Link {
        #[arg(value_enum)]
        action: LinkAction,
        interface: String,
    },

    /// Manage filter table rules
    Firewall {
        #[command(subcommand)]
        command: FirewallCommands,
    },

    /// Configure addressing through netplan
    Ip {
        #[command(subcommand)]
        command: IpCommands,
    },
}

#[derive(Subcommand)]
enum FirewallCommands {
    /// Append a rule
    Add(RuleArgs),

    /// Remove the first rule matching the given one
    Remove(RuleArgs),

    /// Remove the rule at a 1-based position
    RemoveAt { chain: Chain, position: usize },

    /// List the rules of a chain
    List { chain: Chain },

    /// Remove every rule of a chain
    Clear { chain: Chain },
}

#[derive(clap::Args)]
struct RuleArgs {
    /// INPUT, OUTPUT or FORWARD
    chain: String,
    /// tcp, udp or icmp
    protocol: String,
    /// ACCEPT, DROP or REJECT
    action: String,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    source: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Subcommand)]
enum IpCommands {
    /// Static address with optional gateway and DNS servers
    Static {
        interface: String,
        /// Address with prefix, e.g. 192.168.1.50/24
        address: String,
        #[arg(short, long)]
        gateway: Option<String>,
        /// Comma separated DNS servers
        #[arg(long, value_delimiter = ',')]
        dns: Vec<String>,
    },

    /// DHCP addressing
    Dhcp { interface: String },
}

async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::bootstrap(cli.config.as_deref())?;

    match cli.command {
        Commands::Save => SaveCommand::new(context).execute().await,
        Commands::Restore { yes } => RestoreCommand::new(context).execute(yes).await,
        Commands::Show { live, format } => ShowCommand::new(context).execute(live, format).await,
        Commands::Validate => ValidateCommand::new(context).execute().await,
        Commands::Backups => ShowCommand::new(context).list_backups().await,
        Commands::Status => StatusCommand::new(context).execute().await,
        Commands::Link { action, interface } => {
            LinkCommand::new(context).execute(action, &interface).await
        }
        Commands::Firewall { command } => {
            let cmd = FirewallCommand::new(context);
            match command {
                FirewallCommands::Add(args) => cmd.add(&args.into_rule()?).await,
                FirewallCommands::Remove(args) => cmd.remove(&args.into_rule()?).await,
                FirewallCommands::RemoveAt { chain, position } => {
                    cmd.remove_at(chain, position).await
                }
                FirewallCommands::List { chain } => cmd.list(chain).await,
                FirewallCommands::Clear { chain } => cmd.clear(chain).await,
            }
        }
        Commands::Ip { command } => {
            let cmd = IpCommand::new(context);
            match command {
                IpCommands::Static {
                    interface,
                    address,
                    gateway,
                    dns,
                } => {
                    cmd.set_static(&interface, &address, gateway.as_deref(), &dns)
                        .await
                }
                IpCommands::Dhcp { interface } => cmd.set_dhcp(&interface).await,
            }
        }
    }
}

impl RuleArgs {
    fn into_rule(self) -> Result<netstate_types::Rule> {
        parse_rule(
            &self.chain,
            &self.protocol,
            &self.action,
            self.port,
            self.source,
            self.description,
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let quiet = cli.quiet;
    let show_chain = cli.verbose || cli.debug;

    match run(cli).await {
        Ok(()) => {
            log::info!("Command completed successfully");
            std::process::exit(0);
        }
        Err(e) => {
            if !quiet {
                eprintln!("Error: {}", e);

                if show_chain {
                    for cause in e.chain().skip(1) {
                        eprintln!("  Caused by: {}", cause);
                    }
                }
            }
            std::process::exit(1);
        }
    }
}
