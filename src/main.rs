use clap::{Parser, Subcommand};
use piano2midi::calibration::Analyser;
use piano2midi::{Config, PianoToMidi};
use std::path::PathBuf;

/// Piano-to-MIDI Transcription System
#[derive(Parser)]
#[command(name = "piano2midi")]
#[command(about = "Convert piano performance videos to MIDI by tracking key brightness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert videos (files or image-sequence directories) to MIDI
    Convert {
        /// Input videos
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for MIDI files
        #[arg(short, long, default_value = "./output")]
        output_dir: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reuse stored DPF data instead of re-processing video
        #[arg(long)]
        use_history: bool,

        /// Directory holding DPF history files
        #[arg(long)]
        history_dir: Option<PathBuf>,

        /// Frame rate of image-sequence inputs
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Suggest note thresholds from stored DPF history
    Calibrate {
        /// Directory holding DPF history files
        history_dir: PathBuf,

        /// Number of mixture components
        #[arg(long)]
        components: Option<usize>,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    if verbose && quiet {
        anyhow::bail!("Cannot specify both --verbose and --quiet");
    }
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    Ok(())
}

fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => piano2midi::config::load_config(path),
        None => Ok(Config::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Convert {
            inputs,
            output_dir,
            config,
            use_history,
            history_dir,
            fps,
        } => {
            let mut config = load_or_default(config)?;
            if use_history {
                config.history.reuse = true;
            }
            if let Some(dir) = history_dir {
                config.history.directory = dir;
            }
            if let Some(fps) = fps {
                config.video.image_sequence_fps = fps;
            }
            piano2midi::config::validate_config(&config)?;

            let processor = PianoToMidi::new(config);
            let outcomes = processor.process_batch(&inputs, &output_dir);

            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(path) => println!("{}: {}", outcome.input.display(), path.display()),
                    Err(e) => {
                        failed += 1;
                        println!("{}: {}", outcome.input.display(), e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} videos failed", failed, outcomes.len());
            }
        }
        Commands::Calibrate {
            history_dir,
            components,
            config,
        } => {
            let mut config = load_or_default(config)?;
            if let Some(n) = components {
                config.calibration.n_components = n;
            }
            piano2midi::config::validate_config(&config)?;

            let mut analyser = Analyser::new(&config.calibration);
            analyser.load_history_dir(&history_dir)?;
            let thresholds = analyser.find_note_thresholds()?;
            println!("Note On Boundary: {:.2}", thresholds.note_on);
            println!("Note Off Boundary: {:.2}", thresholds.note_off);
            println!(
                "{}",
                serde_json::to_string_pretty(&thresholds.to_segmentation())?
            );
        }
        Commands::ValidateConfig { config } => {
            let config = piano2midi::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
