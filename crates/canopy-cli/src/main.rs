//! Command-line front end of the canopy pipeline: one subcommand per
//! pipeline operation, all driven by one JSON configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canopy_core::{Config, Pipeline, RegionId, StageReport};
use clap::{Args, Parser, Subcommand};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "canopy", version, about = "Canopy raster pipeline for NAIP quarter-quad imagery")]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, global = true, default_value = "canopy.json")]
    config: PathBuf,

    /// Log skip decisions and other detail (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Regions {
    /// Comma-separated region ids, e.g. 8,7,2
    #[arg(long, value_delimiter = ',', required = true)]
    regions: Vec<RegionId>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    Init,
    /// Record on every tile the regions it intersects
    AssignRegions,
    /// Project source tiles onto the reference grid
    Reproject(Regions),
    /// Convert classifier output into two-class tiles
    Classify(Regions),
    /// Clip classified tiles to their footprints
    Clip(Regions),
    /// Mosaic clipped tiles into one canopy raster per region
    Mosaic(Regions),
    /// Classify, clip and mosaic in one go
    Run(Regions),
    /// Swap canopy classes for regions with inverted classifier output
    CorrectInverted {
        /// Defaults to `inverted_region_ids` from the configuration
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<RegionId>>,
    },
    /// Convert canopy rasters to polygon layers
    ExportPolygons(Regions),
    /// Generate ground-truth points
    GtGenerate {
        #[command(flatten)]
        regions: Regions,
        /// Area (km²) at or below which a region gets the minimum point count
        #[arg(long)]
        min_area: f64,
        /// Area (km²) at or above which a region gets the maximum point count
        #[arg(long)]
        max_area: f64,
        #[arg(long)]
        min_points: usize,
        #[arg(long)]
        max_points: usize,
    },
    /// Carry an earlier year's ground-truth points forward
    GtUpdate {
        #[command(flatten)]
        regions: Regions,
        /// Results root of the earlier analysis
        #[arg(long)]
        old_results: PathBuf,
    },
    /// List the source imagery under a ground-truth point set
    GtImagery {
        /// Point layer (GeoJSON)
        points: PathBuf,
    },
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    run(cli.command, &cli.config)
}

fn open(config: &Path) -> Result<Pipeline> {
    let config = Config::load(config)
        .with_context(|| format!("Cannot load configuration {}", config.display()))?;
    Ok(Pipeline::new(config))
}

fn run(command: Command, config: &Path) -> Result<()> {
    match command {
        Command::Init => {
            Config::write_template(config).with_context(|| format!("Cannot write {}", config.display()))?;
            log::info!("wrote {}", config.display());
        }
        Command::AssignRegions => {
            let n = open(config)?.assign_regions_to_tiles().context("Region assignment failed")?;
            println!("{n} tiles assigned to at least one region");
        }
        Command::Reproject(r) => {
            let report = open(config)?.reproject_input_tiles(&r.regions).context("Reprojection failed")?;
            print_report("reproject", report);
        }
        Command::Classify(r) => {
            let report = open(config)?.convert_afe_to_final_tiles(&r.regions).context("Classification failed")?;
            print_report("classify", report);
        }
        Command::Clip(r) => {
            let report = open(config)?.clip_final_tiles(&r.regions).context("Clipping failed")?;
            print_report("clip", report);
        }
        Command::Mosaic(r) => {
            let report = open(config)?.mosaic_clipped_final_tiles(&r.regions).context("Mosaicking failed")?;
            print_report("mosaic", report);
        }
        Command::Run(r) => {
            let report = open(config)?.convert_afe_to_canopy_tif(&r.regions).context("Canopy pipeline failed")?;
            print_report("classify", report.classified);
            print_report("clip", report.clipped);
            print_report("mosaic", report.mosaicked);
        }
        Command::CorrectInverted { regions } => {
            let pipeline = open(config)?;
            let ids = regions.unwrap_or_else(|| pipeline.config().inverted_region_ids.clone());
            let report = pipeline.correct_inverted_canopy_tif(&ids).context("Inversion correction failed")?;
            print_report("correct-inverted", report);
        }
        Command::ExportPolygons(r) => {
            let report = open(config)?.export_canopy_polygons(&r.regions).context("Polygon export failed")?;
            print_report("export-polygons", report);
        }
        Command::GtGenerate { regions, min_area, max_area, min_points, max_points } => {
            let report = open(config)?
                .generate_gtpoints(&regions.regions, min_area, max_area, min_points, max_points)
                .context("Ground-truth generation failed")?;
            print_report("gt-generate", report);
        }
        Command::GtUpdate { regions, old_results } => {
            let report = open(config)?
                .update_gtpoints(&old_results, &regions.regions)
                .with_context(|| format!("Ground-truth update from {} failed", old_results.display()))?;
            print_report("gt-update", report);
        }
        Command::GtImagery { points } => {
            let tiles = open(config)?
                .tiles_for_points(&points)
                .with_context(|| format!("Cannot look up imagery for {}", points.display()))?;
            for t in tiles {
                println!("{}", t.display());
            }
        }
    }
    Ok(())
}

fn print_report(stage: &str, report: StageReport) {
    println!("{stage:>16}: {report}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_lists_are_comma_separated() {
        let cli = Cli::try_parse_from(["canopy", "run", "--regions", "8,7,2"]).unwrap();
        match cli.command {
            Command::Run(r) => assert_eq!(r.regions, [8, 7, 2]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("canopy.json"));
    }

    #[test]
    fn stage_commands_need_regions() {
        assert!(Cli::try_parse_from(["canopy", "mosaic"]).is_err());
        assert!(Cli::try_parse_from(["canopy", "correct-inverted"]).is_ok());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "canopy", "gt-generate", "--regions", "8", "--min-area", "0", "--max-area", "100",
            "--min-points", "10", "--max-points", "20", "--config", "other.json", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("other.json"));
    }

    #[test]
    fn init_writes_a_template_once() {
        let dir = std::env::temp_dir().join(format!("canopy-cli-init-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("canopy.json");
        let _ = std::fs::remove_file(&path);

        run(Command::Init, &path).unwrap();
        assert_eq!(Config::load(&path).unwrap().analysis_year, Config::default().analysis_year);
        assert!(run(Command::Init, &path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
