// Module declarations
mod agent;
mod auth;
mod cli;
mod config;
mod google_api;
mod maps;
mod model;
mod ratelimit;
mod session;
mod tool_args;
mod tool_exec;
mod tools;
mod types;
mod util;
mod weather;
mod websearch;

// Re-export all module items at crate root so cross-module references work
// through a single namespace.
#[allow(unused_imports)]
pub(crate) use agent::*;
#[allow(unused_imports)]
pub(crate) use auth::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use model::*;
#[allow(unused_imports)]
pub(crate) use ratelimit::*;
#[allow(unused_imports)]
pub(crate) use session::*;
#[allow(unused_imports)]
pub(crate) use tool_args::*;
#[allow(unused_imports)]
pub(crate) use tool_exec::*;
#[allow(unused_imports)]
pub(crate) use tools::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;
#[allow(unused_imports)]
pub(crate) use weather::*;

use std::io::{self, BufRead, Write};

use chrono::Utc;
use clap::Parser;

const BANNER: &str = r"
            _      _
 __ ____ _ | | ___| |_
 \ V / _` || |/ -_)  _|
  \_/\__,_||_|\___|\__|
";

const EXIT_KEYWORDS: [&str; 2] = ["exit", "quit"];

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command {
        None | Some(Command::Chat { session: None }) => run_chat(None),
        Some(Command::Chat { session }) => run_chat(session),
        Some(Command::Ask { prompt }) => run_ask(&prompt),
        Some(Command::Auth { bind, port }) => run_auth(&bind, port),
        Some(Command::Whoami) => run_whoami(),
        Some(Command::Tools) => run_tools(),
    };

    if let Err(e) = result {
        // One descriptive line, never a backtrace.
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Everything a conversation needs, built once at startup. Components
/// receive their dependencies explicitly; no global lazily-built clients.
struct Assistant {
    model: ChatModel,
    toolbox: Toolbox,
    limiter: RateLimiter,
    system_prompt: String,
    settings: Settings,
}

impl Assistant {
    fn build(interactive_auth: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = Settings::from_env()?;
        let registry = ToolRegistry::build(&settings);
        let credentials = CredentialManager::new(&settings, interactive_auth);

        // Derive the account identity when a credential is already usable;
        // the assistant stays functional for non-Google tools without one.
        let identity = match credentials.user_identity() {
            Ok(identity) => identity,
            Err(e) => {
                eprintln!("[startup] identity unavailable ({e}); run `valet auth` to connect Google tools");
                UserIdentity::default()
            }
        };
        let system_prompt = default_system_prompt(&identity);
        let toolbox = Toolbox::new(&settings, registry, credentials, identity.email.clone());
        let limiter = RateLimiter::new(
            settings.rate_limit_requests_per_second,
            settings.rate_limit_max_burst,
            settings.rate_limit_check_interval_secs,
        );
        let model = ChatModel::new(&settings);
        Ok(Assistant { model, toolbox, limiter, system_prompt, settings })
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(
            &self.model,
            &self.toolbox,
            &self.limiter,
            self.system_prompt.clone(),
            self.settings.max_planner_rounds,
        )
    }
}

fn run_chat(session_id: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = Assistant::build(false)?;
    let session_id =
        session_id.unwrap_or_else(|| format!("cli-{}", Utc::now().format("%Y%m%d-%H%M%S")));
    let mut session = Session::new(session_id, &assistant.settings);
    let planner = assistant.planner();

    install_interrupt_handler();
    eprintln!("[session] {} ready", session.id);
    println!("{BANNER}");
    println!("Welcome! Ask me to send email, manage your calendar, look things up, and more.");
    println!("Type 'exit' to quit.\n");

    let stdin = io::stdin();
    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                // Ctrl-C at the prompt: clear the flag and offer a new prompt.
                take_interrupt();
                println!();
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if EXIT_KEYWORDS.contains(&query.to_lowercase().as_str()) {
            println!("Goodbye! Have a great day.");
            break;
        }

        match planner.run_turn(&mut session, query) {
            Ok(reply) => println!("\n{reply}\n"),
            Err(TurnError::Interrupted) => println!("\n(turn interrupted)\n"),
            // Turn-level failures are recoverable; report one line and keep
            // the session open for the next request.
            Err(e) => println!("\n{e}\n"),
        }
    }
    Ok(())
}

fn run_ask(prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = Assistant::build(false)?;
    let mut session = Session::new(
        format!("ask-{}", Utc::now().format("%Y%m%d-%H%M%S")),
        &assistant.settings,
    );
    install_interrupt_handler();
    let reply = assistant.planner().run_turn(&mut session, prompt)?;
    println!("{reply}");
    Ok(())
}

fn run_auth(bind: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let credentials = CredentialManager::new(&settings, true);
    let credential = credentials.reauthorize(bind, port)?;
    if let Some(scope) = credential.scope.as_deref() {
        eprintln!("[auth] granted scopes: {scope}");
    }
    println!("Credential stored at {}", settings.token_path.display());
    match credentials.user_identity() {
        Ok(identity) => println!(
            "Authorized as {} <{}>",
            identity.display_name(),
            identity.email.as_deref().unwrap_or("unknown")
        ),
        Err(e) => eprintln!("[auth] identity lookup failed: {e}"),
    }
    Ok(())
}

fn run_whoami() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let credentials = CredentialManager::new(&settings, false);
    let identity = credentials.user_identity()?;
    println!(
        "{} <{}>",
        identity.display_name(),
        identity.email.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

fn run_tools() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let registry = ToolRegistry::build(&settings);
    for spec in registry.specs() {
        println!("{:<24} {}", spec.name, spec.description);
    }
    Ok(())
}
