use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "valet")]
#[command(about = "Conversational personal assistant with email, calendar, document, maps, weather, and web-search tools", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Interactive chat session (the default when no subcommand is given).
    Chat {
        /// Session identifier shown in logs; defaults to a timestamp.
        #[arg(long)]
        session: Option<String>,
    },

    /// Ask a single question, print the answer, and exit.
    Ask {
        prompt: String,
    },

    /// Run the Google authorization flow and persist the credential.
    Auth {
        /// Address the loopback callback listener binds to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Callback port; 0 picks an ephemeral port.
        #[arg(long, default_value_t = 0)]
        port: u16,
    },

    /// Show the authorized account identity.
    Whoami,

    /// List the tools available with the current configuration.
    Tools,
}
