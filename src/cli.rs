//! Command-line interface.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};

use crate::bridge::rules::RULE_FIELDS;
use crate::config::schema::json_schema;
use crate::transport::TransportKinds;

const USAGE: &str = "\
Usage: chatrelay [--help [clients|rules]] <CONFIG>

Relay messages between chat rooms on IRC, Gitter and Telegram.

Arguments:
  <CONFIG>           Path to a YAML or JSON configuration document

Options:
  -h, --help         Print this help
  --help clients     Print the JSON-Schema of every client kind
  --help rules       Print the JSON-Schema of a forwarding rule
  -V, --version      Print version

Example configuration:

  clients:
    IRC:
      transport: irc
      server: irc.libera.chat
      port: 6697
      use_ssl: true
      nickname: relay-bot
      channels: [\"#openstack-rally\"]
    Gitter:
      transport: gitter
      token: <token>
      channels: [openstack/rally]
  rules:
    - from: \"#openstack-rally@IRC\"
      send_to: openstack/rally@Gitter
      ignore_nicknames: [bot2]
    - from: openstack/rally@Gitter
      send_to: \"#openstack-rally@IRC\"
  logging:
    level: info

Secrets may be supplied as CHATRELAY_<CLIENT>_TOKEN or CHATRELAY_<CLIENT>_PASSWORD.";

#[derive(Debug, Parser)]
#[command(
    name = "chatrelay",
    version,
    about,
    disable_help_flag = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Print usage, or the schema of `clients` or `rules`
    #[arg(short = 'h', long = "help", action = ArgAction::SetTrue)]
    help: bool,

    /// Configuration document, or a help topic after --help
    #[arg(value_name = "CONFIG")]
    args: Vec<String>,
}

/// What `--help` should print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Usage,
    Clients,
    Rules,
}

/// A resolved invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help(HelpTopic),
    Run(PathBuf),
}

impl Cli {
    /// Help wins whenever it is asked for anywhere on the command line. A
    /// topic word next to it selects a schema, anything else prints usage.
    pub fn invocation(self) -> Result<Invocation> {
        let args = self.args;
        if self.help || args.iter().any(|a| a == "help") {
            let has = |words: &[&str]| args.iter().any(|a| words.contains(&a.as_str()));
            let topic = if has(&["clients", "client"]) {
                HelpTopic::Clients
            } else if has(&["rules", "rule"]) {
                HelpTopic::Rules
            } else {
                HelpTopic::Usage
            };
            return Ok(Invocation::Help(topic));
        }

        match args.as_slice() {
            [] => bail!("Missing the path to a configuration document\n\n{}", USAGE),
            [path] => Ok(Invocation::Run(PathBuf::from(path))),
            _ => bail!(
                "Expected exactly one configuration document, got {}\n\n{}",
                args.len(),
                USAGE
            ),
        }
    }
}

/// Text printed for a help topic.
pub fn help_text(topic: HelpTopic, kinds: &TransportKinds) -> Result<String> {
    Ok(match topic {
        HelpTopic::Usage => USAGE.to_string(),
        HelpTopic::Clients => serde_json::to_string_pretty(&kinds.schemas())?,
        HelpTopic::Rules => serde_json::to_string_pretty(&json_schema(RULE_FIELDS))?,
    })
}
