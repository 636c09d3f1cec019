use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicebox::voice::{
    AudioCapture, AudioChunk, AudioSink, CaptureSession, DeviceSink, MicrophoneFactory,
    PiperLoader, PlaybackWorker, Voice, rms,
};
use voicebox::Config;

/// Voicebox - speech capture and playback for chat assistants
#[derive(Parser)]
#[command(name = "voicebox", version, about)]
struct Cli {
    /// Directory containing voice model assets
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Default voice (e.g., "norman-male")
    #[arg(long, global = true)]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Transcribe the microphone for a while and print the result
    Listen {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
    /// Speak text through the synthesis worker
    Say {
        /// Text to speak
        text: Vec<String>,
    },
    /// Read back whatever was heard, every few seconds
    Converse {
        /// Seconds between transcript drains
        #[arg(short, long, default_value = "12")]
        interval: u64,
        /// Number of rounds (0 runs forever)
        #[arg(short, long, default_value = "0")]
        rounds: u32,
    },
    /// List known voices and whether their assets are installed
    Voices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicebox=info",
        1 => "info,voicebox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(dir) = cli.models_dir {
        config.playback.models_dir = dir;
    }
    if let Some(voice) = cli.voice.as_deref() {
        config.playback.default_voice = voice.parse()?;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Listen { seconds } => listen(&config, seconds),
        Command::Say { text } => say(config, &text.join(" ")),
        Command::Converse { interval, rounds } => converse(config, interval, rounds),
        Command::Voices => {
            list_voices(&config);
            Ok(())
        }
        Command::TestMic { duration } => test_mic(&config, duration),
        Command::TestSpeaker => test_speaker(&config),
    }
}

fn capture_session(config: &Config) -> anyhow::Result<CaptureSession> {
    let recognizer = config.recognizer()?;
    Ok(CaptureSession::new(
        Arc::new(MicrophoneFactory::new(config.microphone.clone())),
        Arc::new(recognizer),
        config.capture.clone(),
    ))
}

fn playback_worker(config: Config) -> anyhow::Result<PlaybackWorker> {
    let loader = PiperLoader::new(config.piper_bin.as_deref())?;
    let sink = DeviceSink::new(config.output_device.clone());
    Ok(PlaybackWorker::new(
        Box::new(loader),
        Box::new(sink),
        config.playback,
    ))
}

/// Transcribe for a fixed time
fn listen(config: &Config, seconds: u64) -> anyhow::Result<()> {
    let session = capture_session(config)?;

    session.start()?;
    println!("Listening for {seconds} seconds...");
    std::thread::sleep(Duration::from_secs(seconds));

    let text = session.stop_and_drain();
    if text.is_empty() {
        println!("(nothing recognized)");
    } else {
        println!("{text}");
    }
    Ok(())
}

/// Speak one piece of text and wait for it to finish
fn say(mut config: Config, text: &str) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("nothing to say");
    }

    // Give the whole utterance time to play before giving up on the join
    config.playback.join_timeout = config.playback.join_timeout.max(Duration::from_secs(120));

    let worker = playback_worker(config)?;
    worker.start()?;
    worker.speak(text);
    worker.stop(true)?;
    Ok(())
}

/// Demo orchestrator: drain the transcript on a timer and read it back
fn converse(config: Config, interval: u64, rounds: u32) -> anyhow::Result<()> {
    let session = capture_session(&config)?;
    let worker = playback_worker(config)?;

    worker.start()?;
    session.start()?;
    tracing::info!(interval, "conversation loop running");

    let mut round = 0;
    while rounds == 0 || round < rounds {
        std::thread::sleep(Duration::from_secs(interval));

        let heard = session.stop_and_drain();
        session.start()?;

        if heard.is_empty() {
            tracing::debug!("nothing heard this round");
        } else {
            println!("heard: {heard}");
            worker.speak(heard);
        }
        round += 1;
    }

    let _ = session.stop_and_drain();
    worker.stop(true)?;
    Ok(())
}

fn list_voices(config: &Config) {
    let dir = &config.playback.models_dir;
    println!("Voices in {}:", dir.display());
    for voice in Voice::ALL {
        let installed = dir.join(voice.asset_file()).is_file();
        let default = if voice == config.playback.default_voice {
            " (default)"
        } else {
            ""
        };
        let status = if installed { "installed" } else { "missing" };
        println!(
            "  {:<24} {:<45} {status}{default}",
            voice.id(),
            voice.asset_file()
        );
    }
}

/// Test microphone input
fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.microphone.device.as_deref())?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        std::thread::sleep(Duration::from_secs(1));

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        let speech = if energy > config.microphone.segmenter.energy_threshold {
            "speech"
        } else {
            ""
        };
        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}] {speech}", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    // Same path a synthesized job takes: one stream, 100ms chunks
    let chunks: Vec<AudioChunk> = samples
        .chunks(sample_rate as usize / 10)
        .map(|block| AudioChunk::from_i16(sample_rate, 1, block))
        .collect();

    let mut sink = DeviceSink::new(config.output_device.clone());
    let mut stream = sink.open_for(&chunks[0])?;
    for chunk in &chunks {
        stream.write(chunk)?;
    }
    stream.close()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    Ok(())
}
