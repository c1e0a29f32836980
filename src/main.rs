use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden::config::CliOverrides;
use warden::matcher::EnrollmentDb;
use warden::{Config, Daemon};

/// Exit status when a camera or audio device cannot be used
const EXIT_DEVICE: u8 = 2;

/// Warden - webcam security monitor with voice-controlled guard mode
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Config file (default: ~/.config/warden/config.toml)
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enrollment database (JSON)
    #[arg(short, long)]
    enrollment: Option<PathBuf>,

    /// Camera: device index, /dev/videoN, replay:<dir>, or stub://
    #[arg(long)]
    camera: Option<String>,

    /// Microphone name or index
    #[arg(long)]
    mic: Option<String>,

    /// Use stdin/stdout instead of microphone and speakers
    #[arg(long)]
    text_voice: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the monitor (default)
    Run,
    /// Validate the enrollment database and list identities
    CheckEnrollment,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "This area is under surveillance.")]
        text: String,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            enrollment: self.enrollment.clone(),
            camera: self.camera.clone(),
            mic: self.mic.clone(),
            text_voice: self.text_voice,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,warden=info",
        1 => "info,warden=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            let device = e
                .downcast_ref::<warden::Error>()
                .is_some_and(warden::Error::is_device_fault);
            if device {
                ExitCode::from(EXIT_DEVICE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.overrides())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => Daemon::new(config).run().await?,
        Command::CheckEnrollment => check_enrollment(&config)?,
        Command::TestMic { duration } => audio::test_mic(&config, duration).await?,
        Command::TestSpeaker => audio::test_speaker()?,
        Command::TestTts { text } => audio::test_tts(&config, &text).await?,
    }
    Ok(())
}

/// Load the enrollment database and print what it holds
fn check_enrollment(config: &Config) -> anyhow::Result<()> {
    let path = &config.recognition.enrollment_path;
    let db = EnrollmentDb::load(path)?;

    println!("Enrollment: {}", path.display());
    match db.dimension() {
        Some(dim) => println!("Encoding dimension: {dim}"),
        None => println!("No encodings"),
    }
    for identity in &db.identities {
        println!("  {:<24} {} encoding(s)", identity.label, identity.encodings.len());
    }
    println!("{} identities, {} encodings", db.identities.len(), db.encoding_count());

    if db.is_empty() {
        anyhow::bail!("enrollment database is empty");
    }
    Ok(())
}

#[cfg(feature = "audio")]
mod audio {
    use std::time::Duration;

    use warden::Config;
    use warden::voice::{AudioCapture, AudioPlayback, Clip, SAMPLE_RATE, TextToSpeech, input_device_names, rms};

    /// Print a level meter for the microphone, once a second
    pub async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
        println!("Input devices:");
        for (index, name) in input_device_names()?.iter().enumerate() {
            println!("  [{index}] {name}");
        }

        let mut capture = AudioCapture::open(config.voice.mic.as_deref())?;
        capture.start()?;
        println!("\nRecording {duration}s at {SAMPLE_RATE} Hz, speak into the microphone\n");

        for second in 1..=duration {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let samples = capture.drain();
            let energy = rms(&samples);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bar = (energy * 100.0).min(50.0) as usize;
            println!(
                "[{second:2}s] rms {energy:.4}  peak {peak:.4}  |{}{}|",
                "#".repeat(bar),
                " ".repeat(50 - bar)
            );
        }
        capture.stop();

        println!("\nA flat meter means no signal: check the device with --mic <name|index>");
        Ok(())
    }

    /// Play a two-second tone
    pub fn test_speaker() -> anyhow::Result<()> {
        let clip = Clip::tone(440.0, Duration::from_secs(2), 24_000);
        println!("Playing a 440 Hz tone for {:?}...", clip.duration());
        AudioPlayback::new()?.play(&clip)?;
        println!("Done. No sound means the default output device is wrong or muted.");
        Ok(())
    }

    /// Synthesize `text` and play it
    pub async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
        let tts = TextToSpeech::from_config(&config.voice, &config.api_keys)?;
        println!("Synthesizing \"{text}\" with {}...", config.voice.tts_provider);

        let mp3 = tts.synthesize(text).await?;
        let clip = Clip::from_mp3(&mp3)?;
        println!(
            "Got {} bytes, {:?} at {} Hz",
            mp3.len(),
            clip.duration(),
            clip.sample_rate
        );

        tokio::task::spawn_blocking(move || AudioPlayback::new()?.play(&clip)).await??;
        println!("Done.");
        Ok(())
    }
}

#[cfg(not(feature = "audio"))]
mod audio {
    use warden::Config;

    const MISSING: &str = "built without audio support; rebuild with --features audio";

    #[allow(clippy::unused_async)]
    pub async fn test_mic(_config: &Config, _duration: u64) -> anyhow::Result<()> {
        anyhow::bail!(MISSING)
    }

    pub fn test_speaker() -> anyhow::Result<()> {
        anyhow::bail!(MISSING)
    }

    #[allow(clippy::unused_async)]
    pub async fn test_tts(_config: &Config, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!(MISSING)
    }
}
