//! Console command parsing.

use std::path::PathBuf;

use anyhow::{Context, bail};
use leech_protocol::TaskId;

pub const HELP: &str = "\
commands:
  leech <url> [format]     fetch a URL and relay it in parts
  cancel <id>              cancel one task
  cancel                   cancel all of your tasks
  status [id]              show running tasks
  cleanup                  remove leftovers of dead tasks
  join <out> <part>...     concatenate parts into one file
  help                     show this help
  quit                     cancel running tasks and exit";

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Leech { url: String, format: Option<String> },
    Cancel(Option<TaskId>),
    Status(Option<TaskId>),
    Cleanup,
    Join { out: PathBuf, parts: Vec<PathBuf> },
    Help,
    Quit,
}

impl Command {
    /// Parses a line. Blank lines yield `None`. A leading `/` is accepted
    /// so chat-style commands work too.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let cmd = match head.trim_start_matches('/').to_ascii_lowercase().as_str() {
            "leech" | "get" => match args.as_slice() {
                [url] => Command::Leech {
                    url: url.to_string(),
                    format: None,
                },
                [url, format] => Command::Leech {
                    url: url.to_string(),
                    format: Some(format.to_string()),
                },
                _ => bail!("usage: leech <url> [format]"),
            },
            "cancel" => match args.as_slice() {
                [] => Command::Cancel(None),
                [id] => Command::Cancel(Some(parse_id(id)?)),
                _ => bail!("usage: cancel [id]"),
            },
            "status" => match args.as_slice() {
                [] => Command::Status(None),
                [id] => Command::Status(Some(parse_id(id)?)),
                _ => bail!("usage: status [id]"),
            },
            "cleanup" if args.is_empty() => Command::Cleanup,
            "join" if args.len() >= 2 => Command::Join {
                out: PathBuf::from(args[0]),
                parts: args[1..].iter().map(PathBuf::from).collect(),
            },
            "join" => bail!("usage: join <out> <part>..."),
            "help" | "start" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command {other:?}, type `help`"),
        };
        Ok(Some(cmd))
    }
}

fn parse_id(raw: &str) -> anyhow::Result<TaskId> {
    raw.parse().with_context(|| format!("{raw:?} is not a task id"))
}
