use chrono::{DateTime, Utc};
use clap::Parser;
use log::{info, LevelFilter};
use satflash::{
    parse_utc, BoundingBox, Coord, Evaluator, FeatureSelection, FlashDatabase, KMeans, TimeWindow,
};
use simple_logger::SimpleLogger;
use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

/*-------------------------------------------------------------------------------------------------
 *                                     Command Line Options
 *-----------------------------------------------------------------------------------------------*/

///
/// Find clusters of lightning events in the database.
///
/// This program selects the events in a time window and area, fits k-means for a range of
/// cluster counts, and recommends the count with the best silhouette. The elbow of the inertia
/// curve is reported alongside it. The clusters for the recommended count are summarized.
///
#[derive(Debug, Parser)]
#[clap(bin_name = "glmcluster")]
#[clap(author, version, about)]
struct ClusterOptionsInit {
    /// The start of the time window, e.g. 2023-06-01T12:00:00Z.
    #[clap(short, long)]
    #[clap(parse(try_from_str=parse_utc))]
    start: DateTime<Utc>,

    /// The end of the time window, exclusive.
    #[clap(short, long)]
    #[clap(parse(try_from_str=parse_utc))]
    end: DateTime<Utc>,

    /// The path to the database file.
    ///
    /// If this is not specified, then the program will check for it in the "FLASH_DB"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "FLASH_DB")]
    database: PathBuf,

    /// The southern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    #[clap(default_value_t = -90.0)]
    south: f64,

    /// The northern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    #[clap(default_value_t = 90.0)]
    north: f64,

    /// The western edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    #[clap(default_value_t = -180.0)]
    west: f64,

    /// The eastern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    #[clap(default_value_t = 180.0)]
    east: f64,

    /// The smallest number of clusters to try.
    #[clap(long)]
    #[clap(default_value_t = 2)]
    k_min: usize,

    /// The largest number of clusters to try.
    #[clap(long)]
    #[clap(default_value_t = 10)]
    k_max: usize,

    /// Cluster on the event optical energy as well as position.
    #[clap(long)]
    intensity: bool,

    /// Cluster on the event time as well as position.
    #[clap(long)]
    time: bool,

    /// Compute silhouettes from a random sample of at most this many events, 0 uses them all.
    #[clap(long)]
    #[clap(default_value_t = 2000)]
    sample: usize,

    /// Number of k-means restarts for each k.
    #[clap(long)]
    #[clap(default_value_t = 10)]
    n_init: usize,

    /// Iteration limit for each k-means run.
    #[clap(long)]
    #[clap(default_value_t = 100)]
    max_iterations: usize,

    /// Seed for the k-means initialization.
    #[clap(long)]
    #[clap(default_value_t = 60)]
    seed: u64,

    /// The number of values of k to fit at once, defaults to the number of CPUs.
    #[clap(short, long)]
    threads: Option<usize>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Debug)]
struct ClusterOptionsChecked {
    /// The time window to cluster.
    window: TimeWindow,

    /// The path to the database file.
    database: PathBuf,

    /// The area to cluster.
    area: BoundingBox,

    /// Candidate numbers of clusters.
    k_range: Vec<usize>,

    /// Features beyond latitude and longitude.
    selection: FeatureSelection,

    evaluator: Evaluator,

    /// Verbose output
    verbose: bool,
}

impl Display for ClusterOptionsChecked {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let km = &self.evaluator.kmeans;

        writeln!(f, "\n")?; // yes, two blank lines.
        writeln!(f, "     Window: {}", self.window)?;
        writeln!(f, "   Database: {}", self.database.display())?;
        writeln!(
            f,
            "       Area: {:.3},{:.3} to {:.3},{:.3}",
            self.area.ll.lat, self.area.ll.lon, self.area.ur.lat, self.area.ur.lon
        )?;
        writeln!(f, "    k range: {:?}", self.k_range)?;
        writeln!(f, "   Features: {:?}", self.selection.names())?;
        writeln!(
            f,
            "     KMeans: n_init {}, max_iterations {}, seed {}",
            km.n_init, km.max_iterations, km.seed
        )?;
        match self.evaluator.silhouette_sample {
            Some(n) => writeln!(f, "     Sample: {}", n)?,
            None => writeln!(f, "     Sample: all")?,
        }
        writeln!(f, "    Threads: {}", self.evaluator.threads)?;
        writeln!(f, "\n")?; // yes, two blank lines.

        Ok(())
    }
}

/// Get the command line arguments and check them.
///
/// If there is missing data, try to fill it in with environment variables.
fn parse_args() -> Result<ClusterOptionsChecked, Box<dyn Error>> {
    let ClusterOptionsInit {
        start,
        end,
        database,
        south,
        north,
        west,
        east,
        k_min,
        k_max,
        intensity,
        time,
        sample,
        n_init,
        max_iterations,
        seed,
        threads,
        verbose,
    } = ClusterOptionsInit::parse();

    let window = TimeWindow::new(start, end)?;

    if south >= north || west >= east {
        return Err(format!(
            "empty area: south {} north {} west {} east {}",
            south, north, west, east
        )
        .into());
    }
    let area = BoundingBox {
        ll: Coord {
            lat: south,
            lon: west,
        },
        ur: Coord {
            lat: north,
            lon: east,
        },
    };

    if k_min < 2 || k_min >= k_max {
        return Err(format!("need 2 <= k-min < k-max, got {} and {}", k_min, k_max).into());
    }
    let k_range: Vec<usize> = (k_min..=k_max).collect();

    let evaluator = Evaluator {
        kmeans: KMeans {
            max_iterations: max_iterations.max(1),
            n_init: n_init.max(1),
            seed,
        },
        silhouette_sample: if sample == 0 { None } else { Some(sample) },
        threads: threads.unwrap_or_else(num_cpus::get).max(1),
    };

    Ok(ClusterOptionsChecked {
        window,
        database,
        area,
        k_range,
        selection: FeatureSelection { intensity, time },
        evaluator,
        verbose,
    })
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
        .with_module_level("glmcluster", level)
        .init()?;

    if opts.verbose {
        info!("{}", opts);
    }

    let store = FlashDatabase::connect(&opts.database)?;

    let report = satflash::analyze(
        &store,
        &opts.window,
        &opts.area,
        opts.selection,
        &opts.evaluator,
        &opts.k_range,
    )?;
    drop(store);

    println!("{}", report);

    Ok(())
}
