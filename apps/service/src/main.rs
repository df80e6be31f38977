use std::path::PathBuf;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;

mod config;
mod error;
mod models;
mod monitoring;
mod orchestrator;
mod storage;
mod validation;

#[cfg(test)]
mod test_support;

use config::Config;
use error::MonitorError;
use models::{AuthConfig, AuthKind, ProbeMethod, RawInterval, Service, ServiceId};
use monitoring::IntervalDescriptor;
use orchestrator::{NewService, Orchestrator, ServiceUpdate};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled HTTP uptime checks over a JSON record set", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule every service and keep checking until Ctrl-C
    Run,
    /// Print the stored services
    List,
    /// Store a new service and schedule it
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// e.g. "30 seconds", "5 minutes", "1 hour 30 minutes"
        #[arg(long)]
        interval: Option<String>,
        #[arg(long, default_value = "GET")]
        method: ProbeMethod,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Change fields of a stored service
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        interval: Option<String>,
        #[arg(long)]
        method: Option<ProbeMethod>,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Delete a stored service
    Remove { id: String },
    /// Check one service now and print the result
    Check { id: String },
    /// Check every service now and print the results
    CheckAll,
    /// Show how an interval string is understood
    Interval { raw: String },
    /// Set (HH:MM, default 09:00) or cancel the daily check of every service;
    /// a running daemon picks the change up on restart
    DailyCheck {
        time: Option<String>,
        #[arg(long, conflicts_with = "time")]
        cancel: bool,
    },
    /// Print one stored service
    Get { id: String },
}

#[derive(clap::Args, Debug)]
struct AuthArgs {
    /// header, query or bearer
    #[arg(long = "auth-type", requires = "auth_value")]
    auth_type: Option<AuthKind>,
    /// Header or query parameter name
    #[arg(long = "auth-key", default_value = "")]
    auth_key: String,
    #[arg(long = "auth-value")]
    auth_value: Option<String>,
}

impl AuthArgs {
    fn into_config(self) -> Option<AuthConfig> {
        let kind = self.auth_type?;
        Some(AuthConfig { kind, key: self.auth_key, value: self.auth_value.unwrap_or_default() })
    }
}

fn raw_interval(raw: String) -> RawInterval {
    match raw.trim().parse::<i64>() {
        Ok(seconds) => RawInterval::Seconds(seconds),
        Err(_) => RawInterval::Text(raw),
    }
}

fn print_service(service: &Service) {
    let checked = service
        .last_checked
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".into());
    let code = service.status_code.map(|code| code.to_string()).unwrap_or_else(|| "-".into());

    println!(
        "{:>4}  {:<8} {:<4} {:<20} {:<40} every {:<12} checked {}",
        service.id.to_string(),
        service.status.to_string(),
        code,
        service.label(),
        service.url,
        IntervalDescriptor::parse(&service.interval).to_string(),
        checked
    );
    if let Some(error) = &service.error {
        println!("      error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref())?;
    logger::init_with(
        logger::parse_level(&config.logging.level),
        config.logging.format.parse().unwrap_or_default(),
    );
    debug!("{}", config);

    let orchestrator = Orchestrator::new(&config)?;

    match cli.command {
        Command::Run => orchestrator.run().await?,
        Command::List => {
            let services = orchestrator.list_services().await;
            if services.is_empty() {
                println!("No services configured");
            }
            services.iter().for_each(print_service);
        }
        Command::Add { name, url, interval, method, auth } => {
            let service = orchestrator
                .add_service(NewService {
                    name,
                    url,
                    method,
                    interval: interval.map(raw_interval),
                    auth: auth.into_config(),
                    ..Default::default()
                })
                .await?;
            println!("Added service {}", service.id);
            print_service(&service);
        }
        Command::Update { id, name, url, interval, method, auth } => {
            let update = ServiceUpdate {
                name,
                url,
                method,
                interval: interval.map(raw_interval),
                auth: auth.into_config(),
                ..Default::default()
            };
            let service = orchestrator.update_service(&ServiceId::parse(&id), update).await?;
            print_service(&service);
        }
        Command::Remove { id } => {
            let service = orchestrator.remove_service(&ServiceId::parse(&id)).await?;
            println!("Removed service {} ({})", service.id, service.label());
        }
        Command::Check { id } => {
            let id = ServiceId::parse(&id);
            let accepted = orchestrator.check_one(&id).await?;
            println!("{}", serde_json::to_string(&accepted)?);
            orchestrator.wait_idle().await;
            if let Some(service) = orchestrator.find_service(&id).await? {
                print_service(&service);
            }
        }
        Command::CheckAll => {
            let accepted = orchestrator.check_all().await?;
            println!("{}", serde_json::to_string(&accepted)?);
            orchestrator.wait_idle().await;
            orchestrator.list_services().await.iter().for_each(print_service);
        }
        Command::Get { id } => {
            let id = ServiceId::parse(&id);
            match orchestrator.find_service(&id).await? {
                Some(service) => {
                    print_service(&service);
                    println!("{}", serde_json::to_string_pretty(&service)?);
                }
                None => return Err(MonitorError::NotFound(id).into()),
            }
        }
        Command::DailyCheck { time, cancel } => {
            if cancel {
                orchestrator.cancel_daily_check().await;
                config.schedule.daily_check_enabled = false;
                println!("Daily check disabled");
            } else {
                let at = orchestrator.schedule_daily_check(time.as_deref()).await?;
                config.schedule.daily_check = at.to_string();
                config.schedule.daily_check_enabled = true;
                println!("Daily check scheduled for {at} every day");
            }
            config.write_config(&Config::resolve_path(cli.config.as_ref())?)?;
        }
        Command::Interval { raw } => {
            let descriptor = IntervalDescriptor::parse(&raw_interval(raw));
            let trigger = descriptor.to_trigger();
            println!("interval:   {} ({} seconds)", descriptor, descriptor.total_seconds());
            println!("trigger:    {}", trigger.expression());
            println!("next check: {}", trigger.next_after(Utc::now()).with_timezone(&Local));
        }
    }

    Ok(())
}
