use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use tutorline::core::audio::{CaptureSource, ClockedSink, StaticPermission, create_capture};
use tutorline::core::persona::{TutorLanguage, TutorStyle, compose_instructions};
use tutorline::core::realtime::{RealtimeVoice, SessionEvent};
use tutorline::{TutorlineConfig, VoiceCall};

/// Tutorline - realtime speech-to-speech language tutor
#[derive(Parser, Debug)]
#[command(name = "tutorline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a headless call, streaming a recorded WAV as microphone input
    Call {
        /// Recorded input (any WAV; normalized to mono 24kHz)
        #[arg(short = 'i', long = "input", value_name = "WAV")]
        input: PathBuf,

        /// Teaching style (strict, friendly, coach)
        #[arg(long)]
        style: Option<String>,

        /// Language policy (english, spanish, mixed)
        #[arg(long)]
        language: Option<String>,

        /// Learner name used in the greeting
        #[arg(long)]
        student: Option<String>,

        /// Assistant voice
        #[arg(long)]
        voice: Option<String>,

        /// End the call after this many seconds
        #[arg(short = 'd', long = "duration", value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Print the instruction text for a persona
    Persona {
        /// Teaching style (strict, friendly, coach)
        #[arg(long, default_value = "friendly")]
        style: String,

        /// Language policy (english, spanish, mixed)
        #[arg(long, default_value = "english")]
        language: String,

        /// Learner name used in the greeting
        #[arg(long)]
        student: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TutorlineConfig::from_file(path)?
        }
        None => TutorlineConfig::from_env()?,
    };

    match cli.command {
        Commands::Persona {
            style,
            language,
            student,
        } => {
            let student = student.unwrap_or(config.persona.student_name);
            println!(
                "{}",
                compose_instructions(parse_style(&style)?, parse_language(&language)?, &student)
            );
            Ok(())
        }
        Commands::Call {
            input,
            style,
            language,
            student,
            voice,
            duration,
        } => {
            if let Some(style) = style {
                config.persona.style = parse_style(&style)?;
            }
            if let Some(language) = language {
                config.persona.language = parse_language(&language)?;
            }
            if let Some(student) = student {
                config.persona.student_name = student;
            }
            if let Some(voice) = voice {
                config.voice = RealtimeVoice::from_str_or_default(&voice);
            }
            run_call(config, input, duration.map(Duration::from_secs)).await
        }
    }
}

async fn run_call(
    config: TutorlineConfig,
    input: PathBuf,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    let capture = create_capture(
        CaptureSource::Recording(input),
        Arc::new(StaticPermission::granted()),
        config.chunk_interval,
    );
    let call = VoiceCall::new(
        config.realtime_settings(),
        config.credential_provider()?,
        capture,
        Arc::new(ClockedSink::new()),
    );

    call.start().await?;
    info!(call_id = %call.call_id(), "Call started, press Ctrl-C to hang up");

    let mut events = call
        .subscribe()
        .ok_or_else(|| anyhow!("Call ended during setup"))?;
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                break;
            }
            _ = &mut deadline => {
                info!("Call duration reached");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::AssistantTranscript(text)) => println!("tutor: {text}"),
                Ok(SessionEvent::UserTranscript(text)) => println!("you:   {text}"),
                Ok(SessionEvent::Reconnecting { attempt, delay }) => {
                    warn!("Reconnecting in {:?} (attempt {})", delay, attempt);
                }
                Ok(SessionEvent::Fatal(e)) => {
                    outcome = Err(anyhow!(e));
                    break;
                }
                Ok(SessionEvent::Closed { code }) => {
                    info!("Call closed (code {:?})", code);
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} call events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    if let Some(session) = call.session() {
        let stats = session.playback().stats();
        info!(
            "Played {} audio chunks ({} failed)",
            stats.played, stats.failed
        );
    }
    call.end_call().await;
    outcome
}

fn parse_style(value: &str) -> anyhow::Result<TutorStyle> {
    TutorStyle::parse(value)
        .ok_or_else(|| anyhow!("Invalid style '{}'. Must be strict, friendly or coach", value))
}

fn parse_language(value: &str) -> anyhow::Result<TutorLanguage> {
    TutorLanguage::parse(value).ok_or_else(|| {
        anyhow!(
            "Invalid language '{}'. Must be english, spanish or mixed",
            value
        )
    })
}
