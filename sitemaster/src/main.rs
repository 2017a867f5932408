use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use sitemaster::handlers::{
    handle_plugin_install, handle_plugin_list, handle_plugin_uninstall, handle_scan,
};
use tracing::Level;

mod commands;

/// Exit status for errors that stopped the run.
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();

    let level = if chosen_command.get_flag("verbose") {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match chosen_command.subcommand() {
        Some(("scan", primary_command)) => handle_scan(primary_command).await,
        Some(("plugin", primary_command)) => handle_plugin(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn handle_plugin(args: &ArgMatches) -> anyhow::Result<i32> {
    match args.subcommand() {
        Some(("list", secondary_command)) => handle_plugin_list(secondary_command),
        Some(("install", secondary_command)) => handle_plugin_install(secondary_command),
        Some(("uninstall", secondary_command)) => handle_plugin_uninstall(secondary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
