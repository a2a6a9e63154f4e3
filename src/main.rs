use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};

use cvt::utils::file_ops::{is_xml_file, output_path_for, read_xml_file, write_sql_file};
use cvt::{CalcViewTransformer, Dialect, HanaVersion, TransformationConfig};

#[derive(Parser)]
#[command(name = "cvt")]
#[command(about = "Compile SAP HANA calculation views to HANA or Snowflake SQL")]
#[command(version = "0.1.0")]
struct Cli {
    /// Calculation-view XML files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target SQL dialect (hana, snowflake)
    #[arg(short, long)]
    dialect: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target HANA version, e.g. "2.0 SPS03"
    #[arg(long)]
    hana_version: Option<String>,

    /// Read every physical source from this schema
    #[arg(long)]
    target_schema: Option<String>,

    /// Wrap the query in a view with this name
    #[arg(long)]
    view_name: Option<String>,

    /// Emit the bare query even if the configuration asks for a view
    #[arg(long, conflicts_with = "view_name")]
    no_view: bool,

    /// Skip validation of the generated SQL
    #[arg(long)]
    no_validate: bool,

    /// Apply automatic fixes for validation issues
    #[arg(long)]
    auto_correct: bool,

    /// JSON file mapping calculation views to repository packages
    #[arg(long)]
    package_map: Option<PathBuf>,

    /// Write `<id>.sql` files here instead of printing
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Only report the detected XML format and HANA version
    #[arg(long)]
    detect: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new().filter_level(level).init();
}

fn load_config(cli: &Cli) -> Result<TransformationConfig> {
    let mut config = match &cli.config {
        Some(path) => TransformationConfig::from_file(path)?,
        None => TransformationConfig::from_env()?,
    };
    if let Some(dialect) = &cli.dialect {
        config.target.dialect = Dialect::from_str(dialect).map_err(|e| anyhow!(e))?.name().to_string();
    }
    if let Some(version) = &cli.hana_version {
        config.target.hana_version = HanaVersion::from_str(version).map_err(|e| anyhow!(e))?.name().to_string();
    }
    if let Some(schema) = &cli.target_schema {
        config.schema.target_schema = Some(schema.clone());
    }
    if let Some(name) = &cli.view_name {
        config.output.create_view = true;
        config.output.view_name = Some(name.clone());
    }
    if cli.no_view {
        config.output.create_view = false;
    }
    if cli.no_validate {
        config.output.validate = false;
    }
    if cli.auto_correct {
        config.output.auto_correct = true;
    }
    if let Some(map) = &cli.package_map {
        config.packages.mapping_file = Some(map.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let transformer = CalcViewTransformer::with_config(config)?;

    let mut failures = 0;
    for input in &cli.inputs {
        if !is_xml_file(input) {
            warn!("{} does not look like a calculation view file", input.display());
        }
        if let Err(e) = compile_one(cli, &transformer, input) {
            error!("{}: {:#}", input.display(), e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} of {} files failed", failures, cli.inputs.len());
    }
    Ok(())
}

fn compile_one(cli: &Cli, transformer: &CalcViewTransformer, input: &Path) -> Result<()> {
    let xml = read_xml_file(input)?;

    if cli.detect {
        let (format, version) = transformer
            .detect(&xml)
            .with_context(|| format!("detecting {}", input.display()))?;
        println!("{}: {} (HANA {})", input.display(), format, version);
        return Ok(());
    }

    let compiled = transformer
        .transform(&xml)
        .with_context(|| format!("compiling {}", input.display()))?;

    for warning in &compiled.warnings {
        warn!("{}: {}", compiled.scenario_id, warning);
    }
    for issue in compiled.validation.warnings.iter() {
        warn!("{}: {}", compiled.scenario_id, issue);
    }
    for correction in &compiled.corrections {
        info!("{}: {}", compiled.scenario_id, correction);
    }
    if transformer.dialect() == Dialect::Hana
        && compiled.recommended_version > transformer.config().target.hana_version()?
    {
        warn!(
            "{} uses features of HANA {}; consider --hana-version \"{}\"",
            compiled.scenario_id, compiled.recommended_version, compiled.recommended_version
        );
    }

    match &cli.output_dir {
        Some(dir) => {
            let path = output_path_for(dir, &compiled.scenario_id);
            write_sql_file(&path, &compiled.sql)?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", compiled.sql),
    }
    Ok(())
}
