use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pinchtab",
    version,
    about = "HTTP control-plane for driving a shared Chrome instance over CDP",
    long_about = "pinchtab serves a REST API that lets automation agents drive a single \
        shared browser through the Chrome DevTools Protocol: accessibility snapshots with \
        stable refs, node-identity actions, navigation, screenshots, and tab management.\n\n\
        Run with no subcommand to start the server. Configuration comes from BRIDGE_* \
        environment variables, falling back to ~/.pinchtab/config.json."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Inspect or initialize the config file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Write a default config.json (fails if one exists)
    Init,
    /// Print the resolved configuration as JSON
    Show,
}
