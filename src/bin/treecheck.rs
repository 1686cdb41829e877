//! Binary entry point for the tree consistency checker.
#![forbid(unsafe_code)]

#[path = "treecheck/config.rs"]
mod config;

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::CliConfig;
use cowtree::{
    admin::{
        verify, write_demo_image, AdminOpenOptions, DemoCorruption, DemoOptions, DemoReport,
        VerifyLevel, VerifyReport,
    },
    logging::init_logging,
    primitives::pager::KeyFormatKind,
    types::{Generation, PageId},
};

/// Exit status when a check ran to completion and found defects.
const EXIT_DEFECTS: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "treecheck",
    version,
    about = "Structural consistency checker for copy-on-write B+ tree page images",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "TREECHECK_CONFIG",
        value_name = "FILE",
        help = "TOML file with default settings"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "RUST_LOG",
        value_name = "FILTER",
        help = "Log filter directive, e.g. warn or cowtree=debug"
    )]
    log_level: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(flatten)]
    check: CheckArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(
        long,
        global = true,
        help = "Newest completed generation; overrides the image header"
    )]
    stable_generation: Option<u64>,

    #[arg(
        long,
        global = true,
        help = "In-flight generation; defaults to one past the stable generation"
    )]
    unstable_generation: Option<u64>,

    #[arg(long, global = true, help = "Lowest page id the space check accounts for")]
    min_tree_node_id: Option<u64>,

    #[arg(long, global = true, help = "Most findings to report")]
    max_findings: Option<usize>,
}

#[derive(Args, Debug)]
struct DemoCmd {
    #[arg(value_name = "IMAGE")]
    out: PathBuf,

    #[arg(long, help = "Number of keys (10, 20, ...)")]
    keys: Option<u64>,

    #[arg(long, help = "Keys per leaf")]
    leaf_fill: Option<usize>,

    #[arg(long, help = "Children per internal node")]
    internal_fill: Option<usize>,

    #[arg(long, help = "Pages to release to the free list")]
    free_pages: Option<usize>,

    #[arg(long, value_enum, help = "Key encoding")]
    key_format: Option<KeyFormatArg>,

    #[arg(long, value_enum, help = "Damage to write into the image")]
    corrupt: Option<CorruptionArg>,

    #[arg(long, help = "Page size in bytes")]
    page_size: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Walk the tree and validate every reachable node")]
    Check {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    #[command(about = "Prove every page id is live or free exactly once")]
    Space {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    #[command(about = "Run both the tree walk and the space check")]
    Verify {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    #[command(about = "Write a sample page image")]
    Demo(DemoCmd),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum KeyFormatArg {
    U64,
    Bytes,
}

impl From<KeyFormatArg> for KeyFormatKind {
    fn from(format: KeyFormatArg) -> Self {
        match format {
            KeyFormatArg::U64 => KeyFormatKind::U64,
            KeyFormatArg::Bytes => KeyFormatKind::Bytes,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CorruptionArg {
    None,
    MisorderedKeys,
    UnusedPage,
    BrokenSibling,
}

impl From<CorruptionArg> for DemoCorruption {
    fn from(corruption: CorruptionArg) -> Self {
        match corruption {
            CorruptionArg::None => DemoCorruption::None,
            CorruptionArg::MisorderedKeys => DemoCorruption::MisorderedKeys,
            CorruptionArg::UnusedPage => DemoCorruption::UnusedPage,
            CorruptionArg::BrokenSibling => DemoCorruption::BrokenSibling,
        }
    }
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_DEFECTS),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let level = cli
        .log_level
        .as_deref()
        .or(config.log_level())
        .unwrap_or("warn");
    init_logging(level)?;
    if let Some(path) = config.path() {
        tracing::debug!(config = %path.display(), "config loaded");
    }
    let open_opts = build_open_options(&config, &cli.check);

    let (image, verify_level) = match cli.command {
        Command::Check { image } => (image, VerifyLevel::Tree),
        Command::Space { image } => (image, VerifyLevel::Space),
        Command::Verify { image } => (image, VerifyLevel::Full),
        Command::Demo(cmd) => {
            let mut opts = open_opts;
            if let Some(page_size) = cmd.page_size {
                opts.pager.page_size = page_size;
            }
            let demo = build_demo_options(&config, &cmd);
            let report = write_demo_image(&cmd.out, &opts, &demo)?;
            emit(cli.format, &report, || print_demo_text(&report))?;
            return Ok(true);
        }
    };
    let report = verify(&image, &open_opts, verify_level)?;
    emit(cli.format, &report, || print_verify_text(&report))?;
    Ok(report.success)
}

fn build_open_options(config: &CliConfig, args: &CheckArgs) -> AdminOpenOptions {
    let mut opts = config.open_options();
    if let Some(stable) = args.stable_generation {
        opts.check.stable_generation = Generation(stable);
        opts.check.unstable_generation = Generation(stable).next();
        opts.generations_from_image = false;
    }
    if let Some(unstable) = args.unstable_generation {
        opts.check.unstable_generation = Generation(unstable);
        opts.generations_from_image = false;
    }
    if let Some(min) = args.min_tree_node_id {
        opts.check.min_tree_node_id = PageId(min);
    }
    if let Some(max) = args.max_findings {
        opts.max_findings = max;
    }
    opts
}

fn build_demo_options(config: &CliConfig, cmd: &DemoCmd) -> DemoOptions {
    let mut demo = config.demo_options();
    if let Some(keys) = cmd.keys {
        demo.keys = keys;
    }
    if let Some(fill) = cmd.leaf_fill {
        demo.leaf_fill = fill;
    }
    if let Some(fill) = cmd.internal_fill {
        demo.internal_fill = fill;
    }
    if let Some(free) = cmd.free_pages {
        demo.free_pages = free;
    }
    if let Some(format) = cmd.key_format {
        demo.key_format = format.into();
    }
    if let Some(corruption) = cmd.corrupt {
        demo.corruption = corruption.into();
    }
    demo
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_verify_text(report: &VerifyReport) {
    let counts = &report.counts;
    println!(
        "Verify ({:?}) => success={} pages={} defects={}",
        report.level, report.success, counts.pages, counts.defects
    );
    if !counts.nodes_per_level.is_empty() {
        let levels: Vec<String> = counts.nodes_per_level.iter().map(u64::to_string).collect();
        println!(
            "  nodes_per_level=[{}] leaves={} internal={} heirs_followed={} retries={}",
            levels.join(","),
            counts.leaves,
            counts.internal_nodes,
            counts.heirs_followed,
            counts.retries
        );
    }
    if counts.live_pages + counts.free_ids > 0 {
        println!(
            "  live_pages={} free_ids={}",
            counts.live_pages, counts.free_ids
        );
    }
    for finding in &report.findings {
        let kind = finding.kind.map(|k| k.as_str()).unwrap_or("-");
        println!("- {:?} [{kind}]: {}", finding.severity, finding.message);
    }
}

fn print_demo_text(report: &DemoReport) {
    println!(
        "Wrote {} ({} pages, root {}, height {}, {} leaves, {} free ids, corruption {:?})",
        report.path,
        report.pages,
        report.root,
        report.height,
        report.leaves,
        report.free_ids,
        report.corruption
    );
}
