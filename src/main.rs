use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use parley::api::{ApiServer, ApiState};
use parley::chat::{CANNED_PROMPT, ChatService, GatewayChat, OpenAiChat};
use parley::speech::{
    AudioPlayback, Availability, BackendInitializer, InitPolicy, OpenAiSpeechLoader, PrimaryLoader,
    SpeechBackend, SystemVoice, TranscriptBuffer,
};
use parley::{Config, Event, EventBus, Turn, TurnOrchestrator};

const SAMPLE_TEXT: &str = "Hello! This is a test of the selected voice.";

/// Parley - practice spoken conversation with a chat assistant
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Speak with the system synthesizer only
    #[arg(long, env = "PARLEY_NO_NEURAL")]
    no_neural: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session (default)
    Chat,
    /// Run a single turn and exit
    Say {
        /// What to say; defaults to the English-practice prompt
        text: Option<String>,
    },
    /// Run the HTTP gateway
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List neural voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr so replies on stdout stay readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.no_neural {
        config.speech.neural = false;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config).await,
        Command::Say { text } => say(&config, text.as_deref().unwrap_or(CANNED_PROMPT)).await,
        Command::Serve { port } => serve(&config, port.unwrap_or(config.api_server.port)).await,
        Command::Voices => voices(&config).await,
    }
}

/// Run the HTTP gateway, bringing the neural voice up in the background
async fn serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let state = ApiState::from_config(config);
    if config.speech.neural {
        let _init = BackendInitializer::new(
            Arc::clone(&state.backend),
            Arc::new(speech_loader(config)),
            InitPolicy::from(&config.speech),
            EventBus::new(),
        )
        .spawn();
    } else {
        state.backend.mark_degraded(None).await;
    }

    ApiServer::new(state, port).run().await?;
    Ok(())
}

/// Everything a spoken session needs, wired from configuration
struct Session {
    orchestrator: Arc<TurnOrchestrator>,
    input: Arc<TranscriptBuffer>,
    playback: Arc<AudioPlayback>,
    system_voice: Arc<SystemVoice>,
    init: Option<tokio::task::JoinHandle<Availability>>,
}

impl Session {
    fn new(config: &Config) -> anyhow::Result<Self> {
        let events = EventBus::new();
        let backend = Arc::new(SpeechBackend::new(config.speech.degraded_policy));

        let init = config.speech.neural.then(|| {
            BackendInitializer::new(
                Arc::clone(&backend),
                Arc::new(speech_loader(config)),
                InitPolicy::from(&config.speech),
                events.clone(),
            )
            .spawn()
        });

        let chat: Arc<dyn ChatService> = if let Some(url) = &config.chat.gateway_url {
            tracing::info!(%url, "using gateway for chat");
            Arc::new(GatewayChat::new(url))
        } else {
            Arc::new(
                OpenAiChat::new(config.chat.api_key.clone().unwrap_or_default(), config.chat.model.clone())?
                    .with_api_url(&config.chat.api_url)
                    .with_system_prompt(config.chat.system_prompt.clone()),
            )
        };

        let system_voice = Arc::new(SystemVoice::from_command_line(&config.speech.system_voice)?);
        if !system_voice.is_installed() {
            tracing::warn!(command = %config.speech.system_voice, "system voice not found on PATH");
        }
        let playback = Arc::new(AudioPlayback::new()?);
        match AudioPlayback::output_device() {
            Some(device) => tracing::debug!(%device, "audio output device"),
            None => tracing::warn!("no audio output device; replies will use the system voice"),
        }

        let input = Arc::new(TranscriptBuffer::new());
        let orchestrator = TurnOrchestrator::builder()
            .input(input.clone())
            .chat(chat)
            .backend(backend)
            .fallback(system_voice.clone())
            .audio(playback.clone())
            .locale(&config.speech.locale)
            .events(events)
            .build()?;

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            input,
            playback,
            system_voice,
            init,
        })
    }

    /// Wait for the neural voice to settle, if it is being brought up
    async fn settle(&mut self) {
        if let Some(init) = self.init.take() {
            match init.await {
                Ok(availability) => tracing::debug!(?availability, "speech engine settled"),
                Err(e) => tracing::warn!(error = %e, "speech engine task failed"),
            }
        }
    }

    /// Wait until nothing is audible
    async fn drain(&self) {
        while self.playback.is_playing() || self.system_voice.is_speaking().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Type a line as if it had been recognized from the microphone
    async fn speak_line(&self, line: &str) -> parley::Result<Option<Turn>> {
        self.orchestrator.start_listening().await?;
        self.input.push(line);
        self.orchestrator.stop_listening_and_submit().await
    }
}

fn speech_loader(config: &Config) -> OpenAiSpeechLoader {
    OpenAiSpeechLoader {
        api_key: config.chat.api_key.clone(),
        base_url: config.speech.tts_url.clone(),
        model: config.speech.tts_model.clone(),
        voice: config.speech.voice.clone(),
        speed: config.speech.speed,
    }
}

fn report(result: parley::Result<Option<Turn>>) {
    match result {
        Ok(Some(turn)) => tracing::debug!(turn = %turn.id(), phase = ?turn.phase(), route = ?turn.route(), "turn complete"),
        Ok(None) => {}
        Err(e) => eprintln!("error: {e}"),
    }
}

async fn chat(config: &Config) -> anyhow::Result<()> {
    let session = Session::new(config)?;

    let mut events = session.orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::ReplyVisible { text, .. }) => println!("assistant: {text}"),
                Ok(Event::Status(status)) => eprintln!("[{status}]"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Type what you would say. /hello starts a practice session, /help lists commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => {
                println!("/hello             send the English-practice prompt");
                println!("/voices            list neural voices");
                println!("/voice <id>        select a neural voice");
                println!("/primary on|off    toggle the neural voice");
                println!("/test              speak a sample sentence");
                println!("/status            show speech engine state");
                println!("/quit              leave");
            }
            "/hello" => report(session.orchestrator.submit_canned_prompt(CANNED_PROMPT).await),
            "/voices" => {
                let voices = session.orchestrator.voices().await;
                if voices.is_empty() {
                    println!("no neural voices yet");
                }
                for voice in voices {
                    println!("{:<28} {}", voice.id, voice.name);
                }
            }
            "/voice" => match session.orchestrator.select_voice(arg).await {
                Ok(()) => println!("voice set to {arg}"),
                Err(e) => eprintln!("error: {e}"),
            },
            "/primary" => {
                let enabled = match arg {
                    "on" => true,
                    "off" => false,
                    _ => {
                        eprintln!("usage: /primary on|off");
                        continue;
                    }
                };
                if session.orchestrator.set_primary_backend_enabled(enabled).await {
                    println!("neural voice {arg}");
                } else {
                    println!("neural voice is not ready yet");
                }
            }
            "/test" => match session.orchestrator.speak_sample(SAMPLE_TEXT).await {
                Ok(route) => tracing::debug!(?route, "sample spoken"),
                Err(e) => eprintln!("error: {e}"),
            },
            "/status" => {
                let state = session.orchestrator.backend_state().await;
                println!(
                    "readiness={:?} enabled={} attempts={}",
                    state.readiness, state.primary_enabled, state.init_attempts
                );
            }
            _ => report(session.speak_line(line).await),
        }
    }

    session.drain().await;
    printer.abort();
    Ok(())
}

async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let mut session = Session::new(config)?;
    session.settle().await;

    let turn = session
        .orchestrator
        .submit_canned_prompt(text)
        .await?
        .ok_or_else(|| anyhow::anyhow!("nothing to say"))?;

    if let Some(reply) = turn.reply_text() {
        println!("{reply}");
    }
    session.drain().await;
    Ok(())
}

async fn voices(config: &Config) -> anyhow::Result<()> {
    let speech = speech_loader(config).load().await?;
    for voice in speech.voices().await? {
        println!("{:<12} {}", voice.id, voice.name);
    }
    Ok(())
}
