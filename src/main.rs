use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use nexus::agent_core::{StreamAccumulator, StreamEmitter, StreamEvent, StreamOutcome, TurnRequest};
use nexus::commands::{AssistantSettings, ChatService};
use nexus::inference::config;
use nexus::inference::ConversationTurn;

/// Nexus: a natural-language layer over your desktop.
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the assistant something; it may run commands, look at the screen or search the web.
    Ask {
        prompt: String,

        /// File to attach (image, audio, PDF, video); detected from its contents.
        #[arg(short, long, value_name = "PATH")]
        attach: Option<PathBuf>,

        /// Earlier conversation as a JSON array of turns.
        #[arg(long, value_name = "PATH")]
        history: Option<PathBuf>,

        /// Print the answer as it is generated.
        #[arg(short, long)]
        stream: bool,
    },

    /// Suggest a short title for a saved conversation.
    Title {
        /// Conversation as a JSON array of turns.
        #[arg(value_name = "HISTORY")]
        history: PathBuf,
    },

    /// Manage stored credentials and the user profile.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Store the model API key.
    SetApiKey { value: String },
    /// Store the search API key.
    SetSerpKey { value: String },
    /// Describe yourself so answers can be tailored to you.
    SetDescription { value: String },
    /// Show what is configured (keys are not printed).
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    nexus::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            prompt,
            attach,
            history,
            stream,
        } => cmd_ask(prompt, attach, history, stream).await,
        Commands::Title { history } => cmd_title(&history).await,
        Commands::Config { action } => cmd_config(action),
    }
}

async fn cmd_ask(
    prompt: String,
    attach: Option<PathBuf>,
    history: Option<PathBuf>,
    stream: bool,
) -> Result<()> {
    let service = ChatService::new(config::load_or_default())?;
    let settings = AssistantSettings::load_or_default();

    let mut request = TurnRequest::new(prompt);
    if let Some(path) = history {
        request = request.with_history(load_history(&path)?);
    }
    if let Some(path) = attach {
        request = request.with_attachment(path);
    }

    if !stream {
        println!("{}", service.invoke_ai(&settings, request).await);
        return Ok(());
    }

    let (emitter, mut events) = StreamEmitter::channel();
    let request_id = service.invoke_ai_stream(&settings, request, emitter);
    let mut accumulator = StreamAccumulator::new();
    accumulator.begin(request_id);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        if !accumulator.apply(&event) {
            continue;
        }
        if let StreamEvent::Chunk { text, .. } = &event {
            write!(stdout, "{text}")?;
            stdout.flush()?;
        }
        if accumulator.is_done() {
            break;
        }
    }

    match accumulator.outcome() {
        Some(StreamOutcome::Completed(_)) => {
            writeln!(stdout)?;
            Ok(())
        }
        Some(StreamOutcome::Failed(error)) => bail!("{error}"),
        None => bail!("stream ended without a result"),
    }
}

async fn cmd_title(history_path: &Path) -> Result<()> {
    let service = ChatService::new(config::load_or_default())?;
    let settings = AssistantSettings::load_or_default();
    let history = load_history(history_path)?;

    match service.generate_title(&settings, &history).await {
        Some(title) => println!("{title}"),
        None => bail!("no title could be generated"),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let edit: Box<dyn FnOnce(&mut AssistantSettings)> = match action {
        ConfigAction::SetApiKey { value } => {
            Box::new(move |s: &mut AssistantSettings| s.set_api_key(value))
        }
        ConfigAction::SetSerpKey { value } => {
            Box::new(move |s: &mut AssistantSettings| s.set_serp_api_key(value))
        }
        ConfigAction::SetDescription { value } => {
            Box::new(move |s: &mut AssistantSettings| s.set_user_description(value))
        }
        ConfigAction::Show => {
            let settings = AssistantSettings::load_or_default();
            let describe = |key: String| if key.is_empty() { "not set" } else { "set" };
            println!("data dir:     {}", nexus::data_dir().display());
            println!("model key:    {}", describe(settings.api_key()));
            println!("search key:   {}", describe(settings.serp_api_key()));
            println!("description:  {}", settings.user_description());
            return Ok(());
        }
    };
    AssistantSettings::update(edit)?;
    println!("saved");
    Ok(())
}

fn load_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("history at {} is not a JSON array of turns", path.display()))
}
