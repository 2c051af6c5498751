use std::path::PathBuf;

use clap::Parser;
use fusion_ekf::{
    evaluation::rmse, plot, scenario::CircularTarget, FusionConfig, FusionEkf, FusionError,
};
use nalgebra::Vector2;
use tracing::{debug, info, warn};

/// Name of the plot
const NAME: &str = "Laser/Radar Fusion of a Circular Target";

/// Time step between readings
const DELTA_TIME: f64 = 0.05;

/// Number of readings
const STEPS: usize = 400;

// Circular target parameters, the sensors sit at the origin
const CENTER_X: f64 = 6.0;
const CENTER_Y: f64 = 2.0;
const RADIUS: f64 = 3.0;
const RPM: f64 = 4.0;

/// First timestamp of the run, microseconds
const START_TIMESTAMP: u64 = 1_477_010_443_000_000;

/// Fuses simulated laser and radar readings of a target on a circle
#[derive(Parser, Debug)]
#[command(name = "fusion_ekf")]
struct Args {
    #[arg(short, long, default_value_t = STEPS)]
    steps: usize,

    #[arg(short, long, default_value_t = DELTA_TIME)]
    delta_time: f64,

    /// Seed of the measurement noise
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = RADIUS)]
    radius: f64,

    #[arg(long, default_value_t = RPM)]
    rpm: f64,

    /// JSON file overriding the default filter tuning
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a PNG of the run to this path
    #[arg(short, long)]
    plot: Option<PathBuf>,

    /// Log every fusion cycle
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    info!(?config, "filter configuration");

    let target = CircularTarget::new(
        Vector2::new(CENTER_X, CENTER_Y),
        args.radius,
        args.rpm,
        &config,
    )?;
    let samples = target.simulate(START_TIMESTAMP, args.steps, args.delta_time, args.seed);
    let mut ekf = FusionEkf::new(config)?;

    // Histories for scoring and plotting
    let mut estimates = Vec::new();
    let mut ground_truth = Vec::new();
    let mut t_history = Vec::new();
    let mut actual_state_history = Vec::new();
    let mut measured_state_history = Vec::new();
    let mut estimated_state_history = Vec::new();
    let mut rejected = 0usize;

    for sample in &samples {
        match ekf.process_measurement(&sample.measurement) {
            Ok(Some(estimate)) => {
                debug!(
                    time = sample.time,
                    px = estimate.state[0],
                    py = estimate.state[1],
                    truth_px = sample.truth[0],
                    truth_py = sample.truth[1],
                    "estimate"
                );
                estimates.push(estimate.state);
                ground_truth.push(sample.truth);

                let measured = sample.measurement.cartesian_position();
                t_history.push(sample.time);
                actual_state_history.push((sample.truth[0], sample.truth[1]));
                measured_state_history.push((measured.x, measured.y));
                estimated_state_history.push((estimate.state[0], estimate.state[1]));
            }
            Ok(None) => info!("track initialized from {}", sample.measurement.sensor()),
            Err(err) => {
                rejected += 1;
                warn!(time = sample.time, %err, "skipping measurement");
            }
        }
    }

    // Print the results
    let config = ekf.config();
    println!("------------------------- Input -------------------------");
    println!("Readings:                     {:?}", samples.len());
    println!("Time Delta:                   {:?}", args.delta_time);
    println!("Laser variance:               {:?}", config.laser_variance);
    println!("Radar variance:               {:?}", config.radar_variance);
    println!("Acceleration noise:           {:?}", (config.noise_ax, config.noise_ay));
    println!("\n------------------------- Error -------------------------");
    println!("Rejected:                     {:?}", rejected);
    // A run of fewer than two readings never produces an estimate
    match rmse(&estimates, &ground_truth) {
        Ok(score) => {
            println!("RMSE px, py:                  {:.4?}, {:.4?}", score[0], score[1]);
            println!("RMSE vx, vy:                  {:.4?}, {:.4?}\n", score[2], score[3]);
        }
        Err(FusionError::EmptyEstimates) => {
            println!("RMSE:                         no estimates\n");
        }
        Err(err) => return Err(err.into()),
    }

    if let Some(path) = &args.plot {
        plot(
            NAME,
            path,
            &t_history,
            &actual_state_history,
            &measured_state_history,
            &estimated_state_history,
        )?;
        info!(path = %path.display(), "plot written");
    }

    Ok(())
}
