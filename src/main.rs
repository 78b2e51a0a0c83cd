//! ircam-capture binary: list capture devices and grab test frames.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ircam_capture::validation::{self, ValidationError};
use ircam_capture::{
    CaptureConfig, CaptureError, Device, DeviceRegistry, ErrorKind, FourCC, Frame,
    PixelFormatDescriptor, RegistryConfig, WarmupPolicy,
};
use log::{debug, info};

/// Capture frames from V4L2 cameras
#[derive(Parser)]
#[command(name = "ircam-capture")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=trace for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory scanned for device nodes
    #[arg(long, global = true, default_value = "/dev")]
    device_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture-capable devices and their formats
    Devices,

    /// Capture frames and print their geometry
    Grab(GrabArgs),
}

#[derive(Args)]
struct GrabArgs {
    /// Device ordinal or path
    #[arg(short, long, default_value = "0")]
    device: String,

    /// Requested pixel format
    #[arg(short, long, default_value = "YUYV")]
    fourcc: FourCC,

    /// Requested width; the driver may adjust it
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Requested height; the driver may adjust it
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames to capture
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Buffers requested from the driver
    #[arg(long)]
    buffers: Option<u32>,

    /// Leading dequeues discarded on non-infrared sensors
    #[arg(long)]
    warmup: Option<u32>,

    /// Dequeue timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Check the frames for a test pattern
    #[arg(long, value_enum)]
    expect: Option<Pattern>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Pattern {
    ColorBars,
    Gradient,
}

#[derive(Debug)]
enum CliError {
    /// No such device, or ordinal out of range
    NotFound(CaptureError),
    /// Capture failed
    Capture(CaptureError),
    /// Frames did not show the expected pattern
    Validation(ValidationError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(err) => write!(f, "device not found: {err}"),
            Self::Capture(err) => write!(f, "capture failed: {err}"),
            Self::Validation(err) => write!(f, "validation failed: {err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<CaptureError> for CliError {
    fn from(err: CaptureError) -> Self {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::IndexOutOfRange => Self::NotFound(err),
            _ => Self::Capture(err),
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Capture(_) => ExitCode::from(1),
            Self::NotFound(_) => ExitCode::from(3),
            Self::Validation(_) => ExitCode::from(4),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let registry_config = RegistryConfig::default().with_device_dir(cli.device_dir);
    let result = match cli.command {
        Commands::Devices => list_devices(&registry_config),
        Commands::Grab(args) => grab(&registry_config, &args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            err.exit_code()
        }
    }
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    debug!("Logging initialized");
}

fn list_devices(config: &RegistryConfig) -> Result<(), CliError> {
    let registry = DeviceRegistry::scan_with(config)?;
    if registry.is_empty() {
        info!("no capture devices under {}", config.device_dir.display());
        return Ok(());
    }

    for (ordinal, device) in registry.iter().enumerate() {
        print_device(ordinal, device);
    }
    Ok(())
}

fn print_device(ordinal: usize, device: &Device) {
    let caps = device.capabilities();
    let sensor = if caps.is_infrared_sensor { "infrared" } else { "visible" };

    println!("[{ordinal}] {}", device.path().display());
    println!("    Card:   {}", caps.card);
    println!("    Driver: {} ({})", caps.driver, caps.bus_info);
    println!("    Sensor: {sensor}");
    for format in device.formats() {
        println!("    {format}");
    }
}

fn grab(registry_config: &RegistryConfig, args: &GrabArgs) -> Result<(), CliError> {
    let mut config = CaptureConfig::default();
    if let Some(buffers) = args.buffers {
        config = config.with_buffer_count(buffers);
    }
    if let Some(discard_frames) = args.warmup {
        config = config.with_warmup(WarmupPolicy {
            discard_frames,
            ..WarmupPolicy::default()
        });
    }
    if let Some(millis) = args.timeout_ms {
        config = config.with_dequeue_timeout(Duration::from_millis(millis));
    }

    if let Ok(ordinal) = args.device.parse::<usize>() {
        let registry = DeviceRegistry::scan_with(&registry_config.clone().with_capture(config))?;
        capture(registry.lookup_by_ordinal(ordinal)?, args)
    } else {
        capture(&Device::open_with(&args.device, config)?, args)
    }
}

fn capture(device: &Device, args: &GrabArgs) -> Result<(), CliError> {
    let request = PixelFormatDescriptor::new(args.fourcc, args.width, args.height);
    info!(
        "capturing {} frame(s) from {} ({})",
        args.count,
        device.path().display(),
        device.capabilities().card
    );

    let frames = device
        .grab_multiple(&request, args.count)?
        .collect::<Result<Vec<Frame>, _>>()?;

    if let Some(first) = frames.first() {
        for frame in &frames {
            validation::validate_dimensions(frame, first.width(), first.height())?;
        }
    }

    for frame in &frames {
        println!(
            "frame {}: {}x{} {} bytes",
            frame.sequence(),
            frame.width(),
            frame.height(),
            frame.bytes().len()
        );
        match args.expect {
            Some(Pattern::ColorBars) => validation::validate_color_bars(frame)?,
            Some(Pattern::Gradient) => validation::validate_gradient(frame)?,
            None => {}
        }
    }

    if args.expect.is_some() {
        info!("{} frame(s) match the expected pattern", frames.len());
    }
    Ok(())
}
