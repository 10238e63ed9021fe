use clap::Parser;
use std::path::PathBuf;

pub mod config;
pub mod radar;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PACKAGE: &str = env!("CARGO_PKG_NAME");

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Radar target tracking (ARPA) on a simulated radar")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Settings file to use instead of the one in the user's config directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the settings, including those set on the command line
    #[arg(long, default_value_t = false)]
    pub save: bool,

    /// Spokes per rotation
    #[arg(long, default_value_t = 2048)]
    pub spokes: usize,

    /// Pixels per spoke
    #[arg(long, default_value_t = 1024)]
    pub spoke_len: usize,

    /// Range of the radar in meters
    #[arg(short, long, default_value_t = 1852)]
    pub range: u32,

    /// Rotation period in milliseconds
    #[arg(long, default_value_t = 2500)]
    pub rotation_ms: u64,

    /// Number of simulated vessels
    #[arg(short, long, default_value_t = 3)]
    pub targets: usize,

    /// Number of sweeps to simulate, 0 runs until interrupted
    #[arg(short, long, default_value_t = 20)]
    pub sweeps: u64,

    /// Radius of the guard zone in meters, used when no guard zone is configured
    #[arg(short, long, default_value_t = 1500)]
    pub guard_radius: u32,

    /// Heading of the own ship in degrees
    #[arg(long, default_value_t = 0.)]
    pub heading: f64,

    /// Dual radar mode, adds a long range radar that shares its targets
    #[arg(long, default_value_t = false)]
    pub dual: bool,

    /// Stationary mode, ignore echoes that are present in every rotation
    #[arg(long, default_value_t = false)]
    pub stationary: bool,

    /// Doppler mode, the radar reports approaching and receding echoes
    #[arg(long, default_value_t = false)]
    pub doppler: bool,

    /// Highest speed in m/s a new target may show, overrides the stored setting
    #[arg(long)]
    pub start_up_speed: Option<f64>,

    /// Run at the rotation speed of a real radar
    #[arg(long, default_value_t = false)]
    pub realtime: bool,
}
