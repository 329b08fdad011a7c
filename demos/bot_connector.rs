use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use speech_session::types::{Activity, BotEvent};
use speech_session::{BotConnectorConfig, BotConnectorSession};
use speech_session_utils::WavFileSource;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Talks to a bot: sends one activity, optionally speaks a wav file to it.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Activity JSON to send after connecting.
    #[arg(long, default_value = r#"{"type":"message","text":"Hello!"}"#)]
    activity: String,

    /// A 16 kHz PCM16 wav file to send as one utterance.
    #[arg(long)]
    wav: Option<PathBuf>,

    /// How long to keep listening for replies.
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let config = BotConnectorConfig::from_env()?;

    let mut builder = BotConnectorSession::builder(config);
    if let Some(path) = &args.wav {
        builder = builder.audio(WavFileSource::open(path)?);
    }
    let session = builder.build()?;

    let (_token, mut events) = session.events().channel(&[]);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BotEvent::ActivityReceived {
                    activity,
                    has_audio,
                    ..
                } => println!("activity (audio: {}): {}", has_audio, activity.serialize()),
                BotEvent::Recognized { result, .. } => println!("recognized: {}", result.text()),
                BotEvent::Canceled { details, .. } => {
                    println!("canceled: {:?} {}", details.reason(), details.message())
                }
                other => println!("{:?}", other),
            }
        }
    });

    session.connect().await?;
    println!("connected, session {}", session.session_id().unwrap_or_default());

    let activity = Activity::from_serialized(&args.activity)?;
    session.send_activity(activity).await?;

    if args.wav.is_some() {
        let result = session.listen_once().await?;
        println!("utterance {}: {:?}", result.utterance_id(), result.reason());
    }

    tokio::time::sleep(Duration::from_secs(args.wait_secs)).await;
    session.disconnect().await?;
    Ok(())
}
