use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use printwatch::{
    config::{loading::load_config, models::Settings},
    report::{EventReport, JobReport, PrinterReport},
    JobState, PrintOptions, PrintService,
};
use tokio::io::AsyncReadExt;

use crate::cli::{Cli, Commands};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    colog::init();
    let cli = Cli::parse();

    let settings = load_config().context("Could not load configuration")?;
    let _sentry = init_sentry(&settings);

    let service = PrintService::from_settings(&settings)?;
    if service.is_simulation_mode() {
        info!("Simulation mode is active, nothing is sent to a real printer");
    }

    let result = match cli.command {
        Commands::Printers => list_printers(&service).await,
        Commands::Print { printer, file, name, no_wait, media_type, options } => {
            let mut options = PrintOptions::from_properties(options.into_iter().collect::<HashMap<_, _>>());
            options.name = name.or(options.name);
            options.media_type = media_type;
            options.wait_for_completion = !no_wait;
            print(&service, &printer, &file, options).await
        }
        Commands::Watch { interval } => watch(&service, interval).await,
    };

    service.shutdown();
    result
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref().filter(|dsn| !dsn.is_empty())?;
    info!("Reporting errors to Sentry");
    Some(sentry::init((dsn, sentry::ClientOptions { release: sentry::release_name!(), ..Default::default() })))
}

async fn list_printers(service: &PrintService) -> Result<()> {
    let printers = service.list_printers().await?;
    let reports: Vec<PrinterReport> = printers.iter().map(PrinterReport::from).collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn print(service: &PrintService, printer: &str, file: &Path, options: PrintOptions) -> Result<()> {
    let id = if file == Path::new("-") {
        let mut data = Vec::new();
        tokio::io::stdin().read_to_end(&mut data).await.context("Could not read print data from stdin")?;
        service.print_bytes(printer, data, options).await?
    } else {
        service.print_file(printer, file, options).await?
    };

    let job = service.get_job(id).with_context(|| format!("Job {id} vanished before it could be reported"))?;
    println!("{}", serde_json::to_string_pretty(&JobReport::from(&job))?);

    if matches!(job.state, JobState::Failed | JobState::Cancelled) {
        bail!("Job {id} ended as {}", job.state);
    }
    Ok(())
}

async fn watch(service: &PrintService, interval: Option<std::time::Duration>) -> Result<()> {
    if let Some(interval) = interval {
        service.set_poll_interval(interval)?;
    }

    let subscription = service
        .subscribe(|event| {
            println!("{}", serde_json::to_string(&EventReport::from(event))?);
            Ok(())
        })
        .await;
    info!("Watching printers every {}, press Ctrl-C to stop", humantime::format_duration(service.monitor().poll_interval()));

    tokio::signal::ctrl_c().await.context("Could not listen for Ctrl-C")?;
    if !subscription.unsubscribe() {
        warn!("Subscription {} was already gone", subscription.id());
    }
    Ok(())
}
