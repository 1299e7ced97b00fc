use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hazard_census_map::config::AppConfig;
use hazard_census_map::export::{filtered_csv, ExportFilter};
use hazard_census_map::hazard::{accept_upload, HazardUpload};
use hazard_census_map::legend::detect_legend_property;
use hazard_census_map::normalize::normalize;
use hazard_census_map::render::{self, TileScene};
use hazard_census_map::selection::ActiveHazard;
use hazard_census_map::server;
use hazard_census_map::store::FileStore;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the map dashboard API
    Serve,
    /// Check that a file is a usable hazard layer
    Validate {
        #[arg(value_name = "GEOJSON")]
        file: PathBuf,
    },
    /// Validate a hazard layer and save it to the store
    Upload {
        #[arg(value_name = "GEOJSON")]
        file: PathBuf,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Print the households inside a hazard as JSON
    Affected {
        #[arg(long)]
        hazard: String,
    },
    /// Write household members as CSV
    Export {
        #[arg(long)]
        hazard: String,
        #[arg(long)]
        barangay: Option<String>,
        #[arg(long)]
        affected_only: bool,
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Render choropleth and household tiles for a hazard
    Render {
        #[arg(long)]
        hazard: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app_config = AppConfig::load_or_default(&cli.config)?;
    let store = FileStore::new(&app_config.store.root);
    let max_bytes = app_config.store.max_upload_bytes;

    match cli.command {
        Commands::Serve => {
            server::start_server(app_config).await?;
        }
        Commands::Validate { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let layer = normalize(&text, max_bytes)?;
            let legend = detect_legend_property(layer.features());
            println!(
                "{:?}: {} feature(s), {} polygon(s), legend {}",
                file,
                layer.len(),
                layer.shapes().count(),
                legend.map_or("none".to_string(), |l| format!("{} ({:?})", l.key, l.kind))
            );
        }
        Commands::Upload {
            file,
            id,
            name,
            description,
        } => {
            let geojson = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let record = accept_upload(
                HazardUpload {
                    id,
                    name,
                    description,
                    geojson,
                    legend_prop: None,
                    color_settings: None,
                },
                max_bytes,
            )?;
            store.save_hazard(&record).await?;
            info!(hazard = %record.id, "upload complete");
        }
        Commands::Affected { hazard } => {
            let active =
                ActiveHazard::load(&store, &hazard, app_config.matching.policy, max_bytes, 0).await?;
            println!("{}", serde_json::to_string_pretty(&active.affected)?);
        }
        Commands::Export {
            hazard,
            barangay,
            affected_only,
            out,
        } => {
            let active =
                ActiveHazard::load(&store, &hazard, app_config.matching.policy, max_bytes, 0).await?;
            let filter = ExportFilter {
                barangay,
                affected_only,
            };
            let csv = filtered_csv(&active.households, &active.affected, &filter)?;
            match out {
                Some(path) => fs::write(&path, csv).with_context(|| format!("Failed to write {:?}", path))?,
                None => println!("{csv}"),
            }
        }
        Commands::Render { hazard } => {
            let active =
                ActiveHazard::load(&store, &hazard, app_config.matching.policy, max_bytes, 0).await?;
            let accidents = store.load_accidents().await?;
            let scene = TileScene {
                hazard: &active.hazard,
                households: &active.households,
                affected_ids: active.affected.iter().map(|a| a.record.id.as_str()).collect(),
                accidents: &accidents,
            };
            let tiles = render::generate_tiles(&app_config.output, &scene)?;
            info!(tiles, "render complete");
        }
    }

    Ok(())
}
