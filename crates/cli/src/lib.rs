use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_model::synthetic::SyntheticEngine;
use doc_model::{PageNumber, PageSize};
use docview_cache::{CacheBudget, CacheStats, DeviceCapabilities, DeviceCapabilityProbe, SystemProbe, StaticProbe};
use docview_core::{PageState, ScrollWindows, Viewer, ViewerConfig, ViewerContext, ViewerOptions};
use docview_scheduler::ManualClock;
use futures::executor::LocalPool;
use log::{debug, info};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Upper bound on tick rounds while letting a simulated session settle
const MAX_SETTLE_ROUNDS: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "docview")]
#[command(about = "Paged document viewer tooling")]
pub struct Cli {
    /// Log level written to stderr (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the cache budget selected for a device as JSON.
    Budget {
        /// Total RAM in GiB; read from DOCVIEW_TOTAL_RAM_GB when omitted.
        #[arg(long)]
        total_ram_gb: Option<u64>,
        /// Select the mobile tier.
        #[arg(long)]
        mobile: bool,
    },
    /// Run a scripted viewing session against the synthetic engine and print the outcome as JSON.
    Simulate {
        #[arg(long, default_value_t = 50)]
        pages: u32,
        /// Page to jump to after opening.
        #[arg(long)]
        goto: Option<PageNumber>,
        /// Zoom percent applied before the jump.
        #[arg(long)]
        zoom: Option<f64>,
        /// Override the budget's prefetch window.
        #[arg(long)]
        prefetch: Option<u32>,
        /// Make every rasterization of this page fail.
        #[arg(long)]
        fail_page: Option<PageNumber>,
        #[arg(long, default_value_t = 612.0)]
        page_width: f32,
        #[arg(long, default_value_t = 792.0)]
        page_height: f32,
        #[arg(long, default_value_t = 800.0)]
        container_width: f64,
        #[arg(long, default_value_t = 700.0)]
        container_height: f64,
        /// Viewer configuration file (TOML); defaults to docview/viewer.toml in the user config directory.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct BudgetOutput {
    capabilities: DeviceCapabilities,
    budget: CacheBudget,
    byte_limit: usize,
}

#[derive(Debug, Default, Serialize)]
struct PageSummary {
    prefetched: Vec<PageNumber>,
    rendering: Vec<PageNumber>,
    resident: Vec<PageNumber>,
    evicted: Vec<PageNumber>,
    failed: Vec<PageNumber>,
    unseen: usize,
}

#[derive(Debug, Serialize)]
struct SimulationOutput {
    page_count: u32,
    zoom_percent: f64,
    tier: Option<f32>,
    current_page: Option<PageNumber>,
    windows: Option<ScrollWindows>,
    pages: PageSummary,
    stats: CacheStats,
    hit_rate: f64,
    memory_utilization: f64,
}

struct SimulateArgs {
    pages: u32,
    goto: Option<PageNumber>,
    zoom: Option<f64>,
    prefetch: Option<u32>,
    fail_page: Option<PageNumber>,
    page_size: PageSize,
    container: (f64, f64),
    config: Option<PathBuf>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.log_level);

    match cli.command {
        Commands::Budget { total_ram_gb, mobile } => run_budget(total_ram_gb, mobile),
        Commands::Simulate {
            pages,
            goto,
            zoom,
            prefetch,
            fail_page,
            page_width,
            page_height,
            container_width,
            container_height,
            config,
        } => run_simulate(SimulateArgs {
            pages,
            goto,
            zoom,
            prefetch,
            fail_page,
            page_size: PageSize::new(page_width, page_height),
            container: (container_width, container_height),
            config,
        }),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(level: LevelFilter) {
    // A logger may already be installed when `run` is called more than once in a process.
    if TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never).is_err() {
        debug!("logger already initialized");
    }
}

fn probe_for(total_ram_gb: Option<u64>, mobile: bool) -> StaticProbe {
    let mut capabilities = match total_ram_gb {
        Some(gb) => DeviceCapabilities::from_total_ram_gb(gb, mobile),
        None => SystemProbe.capabilities(),
    };
    capabilities.mobile |= mobile;
    StaticProbe(capabilities)
}

fn run_budget(total_ram_gb: Option<u64>, mobile: bool) -> Result<()> {
    let probe = probe_for(total_ram_gb, mobile);
    let budget = ViewerConfig::default().resolve_budget(&probe).context("failed to select cache budget")?;

    let payload = BudgetOutput { capabilities: probe.capabilities(), budget, byte_limit: budget.byte_limit() };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    match path {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => ViewerConfig::load().context("failed to load user config"),
    }
}

fn run_simulate(args: SimulateArgs) -> Result<()> {
    if args.pages == 0 {
        anyhow::bail!("--pages must be >= 1");
    }

    let config = load_config(args.config.as_deref())?;
    let rendering_delay = config.rendering_delay();
    let mut budget = config.resolve_budget(&probe_for(None, false)).context("failed to select cache budget")?;
    if let Some(prefetch) = args.prefetch {
        budget.prefetch_pages = prefetch;
    }

    let engine = SyntheticEngine::uniform(args.pages, args.page_size);
    if let Some(page) = args.fail_page {
        engine.fail_page_always(page);
    }

    let mut pool = LocalPool::new();
    let clock = ManualClock::new();
    let context = ViewerContext::new(Rc::new(pool.spawner())).with_clock(Rc::new(clock.clone()));
    let options = ViewerOptions {
        config,
        budget,
        container_width: args.container.0,
        container_height: args.container.1,
    };
    let mut viewer = Viewer::open(Rc::new(engine), options, context).context("failed to open document")?;

    let settle = |pool: &mut LocalPool, viewer: &Viewer| {
        for _ in 0..MAX_SETTLE_ROUNDS {
            pool.run_until_stalled();
            clock.advance(rendering_delay);
            if !viewer.tick() {
                break;
            }
        }
    };
    settle(&mut pool, &viewer);

    if let Some(zoom) = args.zoom {
        viewer.set_zoom(zoom);
        settle(&mut pool, &viewer);
    }
    if let Some(page) = args.goto {
        if !viewer.go_to_page(page) {
            anyhow::bail!("page {page} is out of range (1-{})", args.pages);
        }
        settle(&mut pool, &viewer);
    }

    let mut summary = PageSummary::default();
    for (page, state) in viewer.scroller().page_states() {
        match state {
            PageState::Unseen => summary.unseen += 1,
            PageState::Prefetched => summary.prefetched.push(page),
            PageState::Rendering => summary.rendering.push(page),
            PageState::Resident => summary.resident.push(page),
            PageState::Evicted => summary.evicted.push(page),
            PageState::Failed => summary.failed.push(page),
        }
    }

    let stats = viewer.stats();
    let payload = SimulationOutput {
        page_count: viewer.document().page_count(),
        zoom_percent: viewer.zoom_percent(),
        tier: viewer.scroller().active_tier().map(|tier| tier.scale()),
        current_page: viewer.current_page(),
        windows: viewer.windows(),
        pages: summary,
        stats,
        hit_rate: stats.hit_rate(),
        memory_utilization: stats.memory_utilization(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    viewer.close();
    info!("simulation finished");
    Ok(())
}
