use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use log::{info, LevelFilter};
use satflash::{
    parse_utc, DirectoryArchive, Extractor, FlashDatabase, RecordStore, SatFlashResult, Satellite,
    TimeWindow, DEFAULT_CADENCE_SECONDS,
};
use simple_logger::SimpleLogger;
use std::{
    error::Error,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

/*-------------------------------------------------------------------------------------------------
 *                                     Command Line Options
 *-----------------------------------------------------------------------------------------------*/

///
/// Load GLM lightning events into a database.
///
/// This program finds every GLM-L2-LCFA file covering a time window in a local copy of the NOAA
/// archive, flattens the flash/group/event hierarchy into one record per event, and stores them.
/// Events already in the database are left alone, so it is safe to run again over the same or an
/// overlapping window.
///
#[derive(Debug, Parser)]
#[clap(bin_name = "glmingest")]
#[clap(author, version, about)]
struct IngestOptionsInit {
    /// The start of the time window, e.g. 2023-06-01T12:00:00Z.
    #[clap(short, long)]
    #[clap(parse(try_from_str=parse_utc))]
    start: DateTime<Utc>,

    /// The end of the time window, exclusive.
    #[clap(short, long)]
    #[clap(parse(try_from_str=parse_utc))]
    end: DateTime<Utc>,

    /// The root directory of the local archive.
    ///
    /// Files are expected in the same layout as the NOAA bucket, e.g.
    /// GLM-L2-LCFA/2023/152/12/OR_GLM-L2-LCFA_G18_s20231521200000_....nc. If this is not
    /// specified, then the program will check for it in the "GLM_ARCHIVE" environment variable.
    #[clap(short, long)]
    #[clap(env = "GLM_ARCHIVE")]
    archive: PathBuf,

    /// The path to the database file.
    ///
    /// If this is not specified, then the program will check for it in the "FLASH_DB"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "FLASH_DB")]
    database: PathBuf,

    /// The satellite to load data from.
    ///
    /// Allowed values are G16, G17, G18, and G19.
    #[clap(long)]
    #[clap(env = "GLM_SATELLITE")]
    #[clap(parse(try_from_str=parse_satellite))]
    #[clap(default_value_t=Satellite::G18)]
    sat: Satellite,

    /// The number of seconds each source file covers.
    #[clap(long)]
    #[clap(env = "GLM_CADENCE")]
    #[clap(default_value_t=DEFAULT_CADENCE_SECONDS)]
    cadence: i64,

    /// The number of files to retrieve at once, defaults to the number of CPUs.
    #[clap(short, long)]
    threads: Option<usize>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

fn parse_satellite(sat: &str) -> Result<Satellite, String> {
    Satellite::string_contains_satellite(sat)
        .ok_or_else(|| format!("Argument is not a valid satellite name: {}", sat))
}

#[derive(Debug)]
struct IngestOptionsChecked {
    /// The time window to load.
    window: TimeWindow,

    /// The root of the local archive.
    archive: PathBuf,

    /// The path to the database file.
    database: PathBuf,

    /// The satellite.
    sat: Satellite,

    /// Length of time covered by each file.
    cadence: Duration,

    /// Retrieval threads.
    threads: usize,

    /// Verbose output
    verbose: bool,
}

impl Display for IngestOptionsChecked {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f, "\n")?; // yes, two blank lines.
        writeln!(f, "     Window: {}", self.window)?;
        writeln!(f, "    Archive: {}", self.archive.display())?;
        writeln!(f, "   Database: {}", self.database.display())?;
        writeln!(f, "  Satellite: {} ({})", self.sat.name(), self.sat.bucket())?;
        writeln!(f, "    Cadence: {} s", self.cadence.num_seconds())?;
        writeln!(f, "    Threads: {}", self.threads)?;
        writeln!(f, "\n")?; // yes, two blank lines.

        Ok(())
    }
}

/// Get the command line arguments and check them.
///
/// If there is missing data, try to fill it in with environment variables.
fn parse_args() -> Result<IngestOptionsChecked, Box<dyn Error>> {
    let IngestOptionsInit {
        start,
        end,
        archive,
        database,
        sat,
        cadence,
        threads,
        verbose,
    } = IngestOptionsInit::parse();

    if cadence <= 0 {
        return Err(format!("cadence must be a positive number of seconds: {}", cadence).into());
    }

    let window = TimeWindow::new(start, end)?;
    let threads = threads.unwrap_or_else(num_cpus::get).max(1);

    Ok(IngestOptionsChecked {
        window,
        archive,
        database,
        sat,
        cadence: Duration::seconds(cadence),
        threads,
        verbose,
    })
}

fn open_store(path: &Path) -> SatFlashResult<FlashDatabase> {
    FlashDatabase::initialize(path)?;
    FlashDatabase::connect(path)
}

/*-------------------------------------------------------------------------------------------------
 *                                             MAIN
 *-----------------------------------------------------------------------------------------------*/
fn main() -> Result<(), Box<dyn Error>> {
    let opts = parse_args()?;

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .with_module_level("satflash", level)
        .with_module_level("glmingest", level)
        .init()?;

    if opts.verbose {
        info!("{}", opts);
    }

    let extractor = Extractor::new(opts.sat)
        .with_cadence(opts.cadence)
        .with_threads(opts.threads);
    let archive = DirectoryArchive::new(&opts.archive);
    let mut store = open_store(&opts.database)?;

    let report = satflash::ingest(&extractor, &opts.window, &archive, &mut store)?;

    info!("{} events in {}", store.count()?, opts.database.display());
    if let Some(newest) = store.newest_event_time()? {
        info!("newest event {}", newest);
    }

    println!("{}", report);

    Ok(())
}
