use clap::{Parser, Subcommand};
use eda_common::db::core::Design;
use eda_common::db::route::RouteMap;
use eda_common::util::config::Config;
use eda_common::util::generator::{self, GeneratorParams};
use eda_common::util::{check, logger, visualization};
use eda_router::grid::RoutingGrid;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route the design named in the configuration.
    Route,
    /// Write a random synthetic design.
    Generate {
        #[arg(long, default_value_t = 32)]
        width: u32,
        #[arg(long, default_value_t = 32)]
        height: u32,
        #[arg(long, default_value_t = 4)]
        layers: u8,
        #[arg(long, default_value_t = 10)]
        tracks: u32,
        #[arg(long, default_value_t = 200)]
        nets: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value = "inputs/design.toml")]
        output: String,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    match args.command.unwrap_or(Commands::Route) {
        Commands::Generate {
            width,
            height,
            layers,
            tracks,
            nets,
            seed,
            output,
        } => {
            let params = GeneratorParams {
                grid_width: width,
                grid_height: height,
                num_layers: layers.max(2),
                tracks_per_gcell: tracks,
                num_nets: nets,
                seed,
                ..GeneratorParams::default()
            };
            prepare_output_dir(&output)?;
            log::info!(
                "Generating {}x{} design with {} nets on {} layers -> {}",
                width,
                height,
                nets,
                params.num_layers,
                output
            );
            let design = generator::generate_random_design(&params);
            let text = toml::to_string(&design)
                .map_err(|e| anyhow::anyhow!("Failed to serialise design: {}", e))?;
            std::fs::write(&output, text)?;
            Ok(())
        }
        Commands::Route => run_routing(&config),
    }
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn load_design(path: &str) -> anyhow::Result<Design> {
    if !Path::new(path).exists() {
        return Err(anyhow::anyhow!(
            "Design file not found: {}. Run `generate` first or set input.design_file.",
            path
        ));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read design {}: {}", path, e))?;
    let mut design: Design = toml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Failed to parse design {}: {}", path, e))?;
    design.rebuild_name_map();
    Ok(design)
}

fn run_routing(config: &Config) -> anyhow::Result<()> {
    let design = load_design(&config.input.design_file)?;
    log::info!(
        "Loaded design '{}': {} nets, {} layers",
        design.name,
        design.nets.len(),
        design.tech.layers.len()
    );

    log::info!("Starting Routing...");
    let outcome =
        eda_router::route_design(&design, &config.routing).map_err(|e| anyhow::anyhow!(e))?;
    let routes = outcome.controller.route_map();

    prepare_output_dir(&config.output.guide_file)?;
    log::info!("Writing route guides to {}", config.output.guide_file);
    write_guides(&routes, &design, &config.output.guide_file)?;

    prepare_output_dir(&config.output.congestion_image)?;
    let grid = outcome.controller.grid();
    let mut heatmap = visualization::HeatmapSink::new(grid.width(), grid.height());
    outcome.controller.report_congestion(&mut heatmap);
    heatmap
        .save(&config.output.congestion_image, config.output.image_scale)
        .map_err(|e| anyhow::anyhow!("Failed to write congestion map: {}", e))?;

    prepare_output_dir(&config.output.route_image)?;
    log::info!("Generating routed visualization...");
    visualization::draw_routes(&design.die_area, &routes, &config.output.route_image, 2000, 2000)
        .map_err(|e| anyhow::anyhow!("Failed to write route image: {}", e))?;

    check::run(&routes).map_err(|e| anyhow::anyhow!("Verification Failed: {}", e))?;

    if !outcome.report.accepted {
        return Err(anyhow::anyhow!(
            "Routing left {} units of overflow on {} edges (allow_residual_overflow = false)",
            outcome.report.summary.total_overflow,
            outcome.report.summary.overflowed_edges
        ));
    }
    Ok(())
}

/// Guide file: per net its name, then one `x0 y0 x1 y1 layer` line per box
/// between parentheses.
fn write_guides(routes: &RouteMap, design: &Design, filename: &str) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(filename)?);
    let margin = design
        .tech
        .layers
        .iter()
        .map(|l| l.pitch)
        .max()
        .unwrap_or(0);
    for route in routes.nets.values() {
        writeln!(file, "{}", route.name)?;
        writeln!(file, "(")?;
        for (layer, rect) in route.guides(margin) {
            let layer_name = design
                .tech
                .layers
                .get(layer as usize)
                .map_or_else(|| format!("L{}", layer), |l| l.name.clone());
            writeln!(
                file,
                "{} {} {} {} {}",
                rect.min.x, rect.min.y, rect.max.x, rect.max.y, layer_name
            )?;
        }
        writeln!(file, ")")?;
    }
    file.flush()
}
