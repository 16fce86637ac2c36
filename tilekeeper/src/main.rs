//! Command-line entry point. Mirrors the teacher's `versatiles/src/main.rs`
//! top-level `Cli`/`Commands` split: a default download invocation plus a
//! `serve` subcommand, both sharing one verbosity flag wired to
//! `env_logger::Builder`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tilekeeper::geocode::NullGeocoordinateResolver;
use tilekeeper::metadata::MetadataStore;
use tilekeeper::orchestrator::{Orchestrator, OrchestratorRequest};
use tilekeeper::server::TileKeeperServer;
use tilekeeper::sources::SourceRegistry;
use tilekeeper_core::config::Config;
use tilekeeper_core::error::TileKeeperError;
use tilekeeper_core::BBox;

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about = "Acquires, stores, and serves raster and vector map tiles for user-defined regions.",
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Path to the configuration JSON file.
	#[arg(short = 'c', long, global = true, default_value = "tilekeeper.json")]
	config: PathBuf,

	/// Increase log verbosity. Repeat for more detail (-v, -vv, -vvv).
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	verbose: u8,

	#[command(flatten)]
	download: DownloadArgs,
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
	/// Name of a configured region to download.
	#[arg(long)]
	region: Option<String>,

	/// A free-text place name, resolved through the geocoordinate lookup service.
	#[arg(long)]
	place: Option<String>,

	/// Explicit bounding box: min_lon min_lat max_lon max_lat.
	#[arg(long, num_args = 4, value_names = ["MIN_LON", "MIN_LAT", "MAX_LON", "MAX_LAT"])]
	bbox: Option<Vec<f64>>,

	/// Minimum zoom level to download.
	#[arg(long, default_value_t = 0)]
	min_zoom: u8,

	/// Maximum zoom level to download.
	#[arg(long, default_value_t = 14)]
	max_zoom: u8,

	/// Comma-separated list of remote server names to restrict the download to.
	#[arg(long, value_delimiter = ',')]
	servers: Option<Vec<String>>,

	/// Comma-separated list of local archive source names to restrict the download to.
	#[arg(long, value_delimiter = ',')]
	sources: Option<Vec<String>>,

	/// List the regions known to the metadata store and exit.
	#[arg(long)]
	list_regions: bool,

	/// List the configured sources and exit.
	#[arg(long)]
	list_sources: bool,

	/// Interactive region-selection wizard. Not implemented; rejected with an error.
	#[arg(long)]
	interactive: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Serve previously downloaded tiles via HTTP.
	Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
	/// Bind address.
	#[arg(short = 'b', long, default_value = "0.0.0.0")]
	bind: String,

	/// Listening port. 0 picks an ephemeral port.
	#[arg(short, long, default_value_t = 8080)]
	port: u16,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let level = match cli.verbose {
		0 => log::LevelFilter::Info,
		1 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	};
	env_logger::Builder::new().filter_level(level).format_timestamp(None).init();

	let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
	runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
	let config = Arc::new(Config::load(&cli.config).with_context(|| format!("loading configuration from {}", cli.config.display()))?);
	let root = PathBuf::from(&config.output_dir);
	let registry = SourceRegistry::from_config(&config).context("building source registry")?;
	let metadata = MetadataStore::new(root.clone(), Arc::clone(&config));

	match cli.command {
		Some(Commands::Serve(args)) => run_serve(args, root, config, registry, metadata).await,
		None => run_download(cli.download, root, config, registry, metadata).await,
	}
}

async fn run_serve(args: ServeArgs, root: PathBuf, config: Arc<Config>, registry: SourceRegistry, metadata: MetadataStore) -> Result<()> {
	let mut server = TileKeeperServer::new(args.bind, args.port, root, config, Arc::new(registry), Arc::new(metadata));
	server.start().await.context("starting tile server")?;
	log::info!("listening on port {}", server.get_port());

	tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
	server.stop().await;
	Ok(())
}

async fn run_download(args: DownloadArgs, root: PathBuf, config: Arc<Config>, registry: SourceRegistry, metadata: MetadataStore) -> Result<()> {
	if args.interactive {
		bail!(TileKeeperError::Configuration("interactive region selection is not available in this build".into()));
	}

	if args.list_sources {
		for source in registry.all_sources() {
			println!("{}\t{:?}\t{}", source.name(), source.tile_type(), if source.is_remote() { "remote" } else { "local" });
		}
		return Ok(());
	}

	if args.list_regions {
		for region in metadata.list_regions(false).context("listing regions")? {
			println!("{region}");
		}
		return Ok(());
	}

	let bbox = match args.bbox.as_deref() {
		Some([min_lon, min_lat, max_lon, max_lat]) => Some(BBox::new(*min_lon, *min_lat, *max_lon, *max_lat).context("parsing --bbox")?),
		Some(_) => unreachable!("clap enforces exactly four values for --bbox"),
		None => None,
	};

	let resolver = Box::new(NullGeocoordinateResolver);
	let orchestrator = Orchestrator::new(root, config, registry, metadata, resolver);

	let request = OrchestratorRequest {
		region: args.region,
		bbox,
		place: args.place,
		z_min: args.min_zoom,
		z_max: args.max_zoom,
		remote_filter: args.servers,
		local_filter: args.sources,
	};

	let report = orchestrator.run(request).await.context("running download")?;
	log::info!("downloaded {} tile(s), {} failed", report.downloaded, report.failed);
	for reason in report.errors.iter().map(|e| &e.reason).take(10) {
		log::warn!("tile failure: {reason}");
	}

	// spec.md §6: "non-zero on any download failure" — a partial failure
	// still exits non-zero even though `downloaded` is itself a non-fatal
	// warning at the orchestrator level (§4.8).
	if report.failed > 0 {
		bail!("{} of {} tile download(s) failed", report.failed, report.downloaded + report.failed);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn cli_parses_bbox_download_request() {
		let cli = Cli::try_parse_from(["tilekeeper", "--config", "c.json", "--bbox", "1", "2", "3", "4", "--min-zoom", "5", "--max-zoom", "6"]).unwrap();
		assert_eq!(cli.download.bbox, Some(vec![1.0, 2.0, 3.0, 4.0]));
		assert_eq!(cli.download.min_zoom, 5);
		assert!(cli.command.is_none());
	}

	#[test]
	fn cli_parses_serve_subcommand() {
		let cli = Cli::try_parse_from(["tilekeeper", "serve", "--port", "9090"]).unwrap();
		match cli.command {
			Some(Commands::Serve(args)) => assert_eq!(args.port, 9090),
			_ => panic!("expected serve subcommand"),
		}
	}

	#[test]
	fn cli_debug_assert() {
		Cli::command().debug_assert();
	}
}
