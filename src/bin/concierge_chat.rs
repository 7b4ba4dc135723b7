//! Terminal chat front end for the concierge core.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use concierge::conversation::{ConversationStore, Feedback, Sender, StoreEvent};
use concierge::gateway::GeminiGateway;
use concierge::i18n::Language;
use concierge::orchestrator::{
    DeviceLocation, TurnInput, TurnOptions, TurnOrchestrator, TurnOutcome, VoiceOptions,
};
use concierge::settings::SettingsLoader;
use concierge::speech::{
    AudioOutput, GeminiSpeech, PlaybackCoordinator, TimedOutput, WavRecorder,
};
use concierge::storage::{FileKvStore, KeyValueStore, Preferences};
use concierge::ConciergeConfig;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chat with the hotel-booking concierge from a terminal.
#[derive(Parser)]
#[command(name = "concierge-chat", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Speak replies (persisted as a preference).
    #[arg(long)]
    voice: bool,

    /// Write spoken replies as WAV files into this directory.
    #[arg(long)]
    record_speech: Option<PathBuf>,

    /// Device location as `LAT,LNG` for nearby suggestions.
    #[arg(long, value_parser = parse_location)]
    location: Option<DeviceLocation>,
}

fn parse_location(raw: &str) -> Result<DeviceLocation, String> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| "expected LAT,LNG".to_owned())?;
    let latitude: f64 = lat.trim().parse().map_err(|e| format!("latitude: {e}"))?;
    let longitude: f64 = lng.trim().parse().map_err(|e| format!("longitude: {e}"))?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err("coordinates out of range".to_owned());
    }
    Ok(DeviceLocation {
        latitude,
        longitude,
    })
}

const HELP: &str = "\
Commands:
  /new                 start a new conversation
  /list                list conversations
  /switch <n>          switch to conversation n from /list
  /rename <title>      rename the active conversation
  /clear               clear the active conversation
  /delete              delete the active conversation
  /edit <text>         replace your last message and resend
  /like, /dislike      rate the last reply (again to clear)
  /voice on|off        toggle spoken replies
  /maps on|off         toggle map-grounded answers
  /lang en|es|th       change language
  /stop                stop speaking
  /quit                exit
Ctrl-C stops a reply in progress.";

struct Session {
    orchestrator: Arc<TurnOrchestrator>,
    kv: Arc<dyn KeyValueStore>,
    prefs: Mutex<Preferences>,
    location: Option<DeviceLocation>,
}

impl Session {
    async fn options(&self) -> TurnOptions {
        let prefs = self.prefs.lock().await;
        TurnOptions {
            voice: VoiceOptions {
                enabled: prefs.voice_enabled,
                voice_id: prefs.voice_id.clone(),
            },
            map_grounding: prefs.map_grounding,
            location: self.location,
        }
    }

    fn store(&self) -> &ConversationStore {
        self.orchestrator.store()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is the chat surface.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("concierge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConciergeConfig::from_file(path)?,
        None => {
            let path = ConciergeConfig::default_config_path();
            if path.exists() {
                ConciergeConfig::from_file(&path)?
            } else {
                ConciergeConfig::default()
            }
        }
    };
    let api_key = config.gateway.resolve_api_key()?;

    let data_dir = config.storage.resolved_data_dir();
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::new(&data_dir)?);
    info!(data_dir = %data_dir.display(), "using data directory");

    let mut prefs = Preferences::load(kv.as_ref());
    if cli.voice && !prefs.voice_enabled {
        prefs.set_voice_enabled(kv.as_ref(), true)?;
    }
    let strings = prefs.language.strings();

    let store = Arc::new(ConversationStore::load(kv.clone(), strings.new_chat_title));
    let settings = SettingsLoader::new(&config.settings).load().await;
    let gateway = Arc::new(GeminiGateway::new(&config.gateway, api_key.clone())?);

    let output: Arc<dyn AudioOutput> = match &cli.record_speech {
        Some(dir) => Arc::new(WavRecorder::new(dir.clone())?),
        None => Arc::new(TimedOutput::new()),
    };
    let speech = Arc::new(PlaybackCoordinator::new(
        Arc::new(GeminiSpeech::new(&config.gateway, &config.speech, api_key)?),
        output,
        store.clone(),
        config.speech.sample_rate,
    ));

    let orchestrator = Arc::new(
        TurnOrchestrator::new(store.clone(), gateway, settings)
            .with_speech(speech)
            .with_language(prefs.language),
    );

    let session = Arc::new(Session {
        orchestrator: orchestrator.clone(),
        kv,
        prefs: Mutex::new(prefs),
        location: cli.location,
    });

    let shutdown = CancellationToken::new();
    tokio::spawn(render_loop(store.clone(), shutdown.clone()));
    tokio::spawn(interrupt_loop(orchestrator.clone(), shutdown.clone()));

    println!("Concierge v{}", env!("CARGO_PKG_VERSION"));
    let persona = orchestrator.settings().persona();
    if !persona.name.is_empty() {
        let greeting = persona.greeting.as_deref().unwrap_or("How can I help with your stay?");
        println!("{}: {greeting}", persona.name);
    }
    println!("Type a message, or /help.\n");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(&session, command).await? {
                break;
            }
            continue;
        }

        let session = session.clone();
        let input = TurnInput::text(line);
        tokio::spawn(async move {
            let options = session.options().await;
            report(session.orchestrator.send_message(input, &options).await);
        });
    }

    shutdown.cancel();
    orchestrator.stop_generating();
    orchestrator.stop_speaking();
    Ok(())
}

/// Returns `false` when the session should end.
async fn handle_command(session: &Arc<Session>, command: &str) -> anyhow::Result<bool> {
    let (name, arg) = command
        .split_once(' ')
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    let store = session.store();

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{HELP}"),
        "new" => {
            let conversation = store.create_conversation();
            println!("Started \"{}\".", conversation.title);
        }
        "list" => {
            let active = store.active_id();
            for (i, conversation) in store.conversations_by_recency().iter().enumerate() {
                let marker = if conversation.id == active { '*' } else { ' ' };
                println!(
                    "{marker} {:>2}. {} ({} messages)",
                    i + 1,
                    conversation.title,
                    conversation.messages.len()
                );
            }
        }
        "switch" => {
            let target = arg
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| store.conversations_by_recency().into_iter().nth(i));
            match target {
                Some(conversation) => {
                    store.select_conversation(&conversation.id);
                    println!("Switched to \"{}\".", conversation.title);
                    for message in &conversation.messages {
                        let who = match message.sender {
                            Sender::User => "you",
                            Sender::Bot => "bot",
                        };
                        println!("{who}> {}", message.text);
                    }
                }
                None => println!("No such conversation; see /list."),
            }
        }
        "rename" if !arg.is_empty() => {
            store.rename_conversation(&store.active_id(), arg);
        }
        "clear" => {
            store.clear_messages(&store.active_id());
        }
        "delete" => {
            store.delete_conversation(&store.active_id());
            if let Some(conversation) = store.active_conversation() {
                println!("Now in \"{}\".", conversation.title);
            }
        }
        "edit" if !arg.is_empty() => {
            let last_user = store.active_conversation().and_then(|c| {
                c.messages
                    .iter()
                    .rev()
                    .find(|m| m.sender == Sender::User)
                    .map(|m| m.id.clone())
            });
            match last_user {
                Some(message_id) => {
                    let session = session.clone();
                    let text = arg.to_owned();
                    tokio::spawn(async move {
                        let options = session.options().await;
                        report(
                            session
                                .orchestrator
                                .edit_and_resend(&message_id, &text, &options)
                                .await,
                        );
                    });
                }
                None => println!("Nothing to edit."),
            }
        }
        "like" | "dislike" => {
            let feedback = if name == "like" {
                Feedback::Like
            } else {
                Feedback::Dislike
            };
            let target = store.active_conversation().and_then(|c| {
                c.messages
                    .iter()
                    .rev()
                    .find(|m| m.sender == Sender::Bot)
                    .map(|m| (c.id.clone(), m.id.clone()))
            });
            if let Some((conversation_id, message_id)) = target {
                let now = session
                    .orchestrator
                    .record_feedback(&conversation_id, &message_id, feedback);
                println!("Feedback: {now:?}");
            }
        }
        "voice" => {
            let mut prefs = session.prefs.lock().await;
            let enabled = arg == "on";
            prefs.set_voice_enabled(session.kv.as_ref(), enabled)?;
            if !enabled {
                session.orchestrator.stop_speaking();
            }
            println!("Voice {}.", if enabled { "on" } else { "off" });
        }
        "maps" => {
            let mut prefs = session.prefs.lock().await;
            let enabled = arg == "on";
            prefs.set_map_grounding(session.kv.as_ref(), enabled)?;
            if enabled && session.location.is_none() {
                println!("{}", prefs.language.strings().location_denied);
            }
            println!("Map grounding {}.", if enabled { "on" } else { "off" });
        }
        "lang" => {
            let language = Language::from_code(arg);
            let mut prefs = session.prefs.lock().await;
            prefs.set_language(session.kv.as_ref(), language)?;
            session.orchestrator.set_language(language);
            println!("Language: {language:?}.");
        }
        "stop" => session.orchestrator.stop_speaking(),
        _ => println!("Unknown command; try /help."),
    }
    Ok(true)
}

fn report(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Rejected(reason) => println!("(not sent: {reason:?})"),
        TurnOutcome::Completed(_) | TurnOutcome::Cancelled(_) | TurnOutcome::Failed(_) => {
            println!()
        }
    }
}

/// Ctrl-C stops the streaming reply, else speech; a second idle Ctrl-C exits.
async fn interrupt_loop(orchestrator: Arc<TurnOrchestrator>, shutdown: CancellationToken) {
    let mut armed = false;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
            }
        }
        if orchestrator.stop_generating() {
            armed = false;
            continue;
        }
        orchestrator.stop_speaking();
        if armed {
            shutdown.cancel();
            return;
        }
        armed = true;
        println!("\n(press Ctrl-C again or type /quit to exit)");
    }
}

/// Print bot replies as they grow by following store events.
async fn render_loop(store: Arc<ConversationStore>, shutdown: CancellationToken) {
    let mut events = store.subscribe();
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut imaged: HashMap<String, bool> = HashMap::new();

    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        let (conversation_id, message_id) = match event {
            Ok(StoreEvent::MessageUpdated {
                conversation_id,
                message_id,
            }) => (conversation_id, message_id),
            Ok(StoreEvent::ConversationsChanged | StoreEvent::ActiveChanged { .. }) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "renderer lagged behind store events");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        };
        if conversation_id != store.active_id() {
            continue;
        }
        let Some(message) = store.message(&conversation_id, &message_id) else {
            continue;
        };
        if message.sender != Sender::Bot {
            continue;
        }

        let mut out = std::io::stdout().lock();
        let seen = printed.entry(message_id.clone()).or_insert(0);
        if *seen == 0 && !message.text.is_empty() {
            let _ = write!(out, "bot> ");
        }
        if let Some(fresh) = message.text.get(*seen..) {
            if !fresh.is_empty() {
                let _ = write!(out, "{fresh}");
                *seen = message.text.len();
            }
        }
        if let Some(call) = message.tool_call.as_ref().filter(|c| c.thinking) {
            let _ = write!(out, "\n[{} …]", call.name);
        }
        if message.image_url.is_some() && !imaged.get(&message_id).copied().unwrap_or(false) {
            imaged.insert(message_id.clone(), true);
            let _ = write!(out, "\n[image attached]");
        }
        let _ = out.flush();
    }
}
