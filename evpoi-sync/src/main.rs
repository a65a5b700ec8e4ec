//! Point d'entrée CLI pour evpoi-sync

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use evpoi_sync::{
    AppConfig, MemoryWarehouse, Pipeline, PipelineError, PostgresWarehouse, RunReport, Warehouse,
    WarehouseBackend,
};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Synchroniser les points de recharge d'une ville vers l'entrepôt
#[derive(Parser)]
#[command(name = "evpoi-sync")]
#[command(author, version)]
#[command(about = "Synchroniser les points de recharge OpenChargeMap d'une ville vers PostgreSQL")]
#[command(long_about = "Récupère les stations d'un pays, garde celles situées dans la limite \
    configurée, complète les localités, écrit l'export CSV puis fusionne le lot dans la table \
    d'entrepôt.\n\nToute la configuration vient de l'environnement (OCM_API_KEY, PGHOST, ...).")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = AppConfig::from_env()?;
    info!(
        country = %config.source.country_code,
        backend = ?config.warehouse.backend,
        export = %config.export_path.display(),
        "Starting EV POI sync"
    );

    let start = Instant::now();
    let (mut report, result) = match config.warehouse.backend {
        WarehouseBackend::Postgres => {
            let warehouse = PostgresWarehouse::from_config(&config.warehouse).await?;
            run(&config, warehouse).await?
        }
        WarehouseBackend::Memory => run(&config, MemoryWarehouse::new()).await?,
    };
    report.set_duration(start.elapsed());

    if let Err(ref e) = result {
        error!(error = %e, "Run failed");
        report.record_failure(e.to_string(), e.sync_step());
    }
    report.finalize();

    if !cli.quiet {
        report.display();
    }
    if let Some(ref path) = config.report_path {
        report.save_to_file(path)?;
        info!(path = %path.display(), "Report saved");
    }
    info!("{}", report.summary());

    result?;
    Ok(())
}

async fn run<W: Warehouse>(
    config: &AppConfig,
    warehouse: W,
) -> Result<(RunReport, Result<(), PipelineError>)> {
    let mut pipeline = Pipeline::from_config(config, warehouse)?;
    let mut report = pipeline.new_report();
    let result = pipeline.run(&mut report).await;
    Ok((report, result))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
