use crate::CLAP_STYLING;
use clap::{ArgGroup, arg, command};
use sitemaster::handlers::DEFAULT_DB_PATH;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitemaster")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitemaster")
        .styles(CLAP_STYLING)
        .arg(arg!(-v --"verbose" "Log pipeline progress to stderr").required(false))
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the sitemaster database")
                .default_value(DEFAULT_DB_PATH),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("scan")
                .about(
                    "Audit one page or a list of pages: checks every link and runs the metric \
                plugins over the markup.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The page to audit")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of page URLs to audit")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .group(
                    ArgGroup::new("target")
                        .args(["url", "hosts-file"])
                        .required(true),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("JSON scan configuration file; flags below override it")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-t --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Maximum link probes in flight per page (default: 8)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Per-request timeout in seconds (default: 10)")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    arg!(--"max-redirects" <NUM>)
                        .required(false)
                        .help("Redirect hops followed before a link is flagged (default: 5)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"no-redirect-marks")
                        .required(false)
                        .help("Do not report links that redirect before resolving")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(--"no-persist")
                        .required(false)
                        .help("Do not record results in the database")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("plugin")
                .about("Manage sitemaster plugins")
                .subcommand_required(true)
                .subcommand(command!("list").about("List all registered plugins"))
                .subcommand(
                    command!("install")
                        .about("Install or update every registered plugin and its marks"),
                )
                .subcommand(
                    command!("uninstall").about("Uninstall a plugin").arg(
                        arg!(-n --"name" <NAME>)
                            .required(true)
                            .help("The name of the plugin"),
                    ),
                ),
        )
}
