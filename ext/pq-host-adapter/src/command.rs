//! Command line parsing for `execute`

use std::fmt;
use std::str::FromStr;

use crate::codec::parse_compression;
use crate::condition::Condition;
use crate::{HostError, Result};

/// Arguments of `read <path> <varlist> <n_rows> <offset> <batch_size> <threads> [condition]`
#[derive(Debug, Clone, PartialEq)]
pub struct ReadArgs {
    pub path: String,
    pub varlist: String,
    /// Rows to read, 0 for all
    pub n_rows: usize,
    /// 1-based first row, 0 for the top of the file
    pub offset: usize,
    pub batch_size: usize,
    /// Worker threads, 0 for the engine default
    pub threads: usize,
    /// Row filter, applied before `offset` and `n_rows`
    pub condition: Option<Condition>,
}

/// Arguments of `save <path> <varlist> <n_rows> <offset> <compression> <level> <threads>
/// [condition] [partition_by] [overwrite]`
#[derive(Debug, Clone, PartialEq)]
pub struct SaveArgs {
    pub path: String,
    pub varlist: String,
    pub n_rows: usize,
    pub offset: usize,
    pub compression: String,
    /// Codec level, `None` for the codec default
    pub level: Option<u32>,
    pub threads: usize,
    /// Row filter, applied after `offset` and `n_rows`
    pub condition: Option<Condition>,
    /// Columns that split the output into a hive-style directory
    pub partition_by: Vec<String>,
    /// Replace an existing file or partition directory at `path`
    pub overwrite: bool,
}

/// A parsed host command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetupCheck,
    If(Condition),
    Describe { path: String, detailed: bool },
    Read(ReadArgs),
    Save(SaveArgs),
}

/// Command names accepted as the first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetupCheck,
    If,
    Describe,
    Read,
    Save,
}

impl FromStr for CommandKind {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "setup_check" => Ok(CommandKind::SetupCheck),
            "if" => Ok(CommandKind::If),
            "describe" => Ok(CommandKind::Describe),
            "read" => Ok(CommandKind::Read),
            "save" => Ok(CommandKind::Save),
            _ => Err(HostError::invalid_argument(format!(
                "Unknown subfunction '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::SetupCheck => write!(f, "setup_check"),
            CommandKind::If => write!(f, "if"),
            CommandKind::Describe => write!(f, "describe"),
            CommandKind::Read => write!(f, "read"),
            CommandKind::Save => write!(f, "save"),
        }
    }
}

struct Args<'a> {
    kind: CommandKind,
    values: &'a [&'a str],
}

impl<'a> Args<'a> {
    fn expect(kind: CommandKind, values: &'a [&'a str], min: usize, max: usize) -> Result<Self> {
        if values.len() < min || values.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(HostError::invalid_argument(format!(
                "{} expects {} arguments, got {}",
                kind,
                expected,
                values.len()
            )));
        }
        Ok(Self { kind, values })
    }

    fn text(&self, index: usize) -> String {
        self.values.get(index).map(|v| v.to_string()).unwrap_or_default()
    }

    fn count(&self, index: usize, what: &str) -> Result<usize> {
        let raw = self.values.get(index).copied().unwrap_or("0").trim();
        raw.parse::<usize>().map_err(|_| {
            HostError::invalid_argument(format!(
                "{}: {} must be a non-negative integer, got '{}'",
                self.kind, what, raw
            ))
        })
    }

    fn condition(&self, index: usize) -> Result<Option<Condition>> {
        Condition::parse(self.values.get(index).copied().unwrap_or(""))
    }

    fn flag(&self, index: usize, what: &str) -> Result<bool> {
        match self.values.get(index).map(|v| v.trim()) {
            None | Some("") | Some("0") => Ok(false),
            Some("1") => Ok(true),
            Some(other) if other.eq_ignore_ascii_case(what) => Ok(true),
            Some(other) => Err(HostError::invalid_argument(format!(
                "{}: unknown option '{}'",
                self.kind, other
            ))),
        }
    }

    fn level(&self, index: usize) -> Result<Option<u32>> {
        let raw = self.values.get(index).copied().unwrap_or("-1").trim();
        let level = raw.parse::<i64>().map_err(|_| {
            HostError::invalid_argument(format!(
                "{}: compression level must be an integer, got '{}'",
                self.kind, raw
            ))
        })?;
        match level {
            -1 => Ok(None),
            l if l >= 0 => Ok(u32::try_from(l).ok()),
            _ => Err(HostError::invalid_argument(format!(
                "{}: compression level must be -1 or at least 0, got {}",
                self.kind, level
            ))),
        }
    }
}

impl Command {
    /// Parse `args`, where `args[0]` is the command name
    pub fn parse(args: &[&str]) -> Result<Self> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| HostError::invalid_argument("No subfunction specified"))?;
        let kind: CommandKind = name.parse()?;

        match kind {
            CommandKind::SetupCheck => Ok(Command::SetupCheck),
            CommandKind::If => {
                let joined = rest.join(" ");
                Condition::parse(&joined)?
                    .map(Command::If)
                    .ok_or_else(|| HostError::Condition("empty condition".into()))
            }
            CommandKind::Describe => {
                let args = Args::expect(kind, rest, 1, 2)?;
                let detailed = match rest.get(1).map(|s| s.trim()) {
                    None | Some("") | Some("0") => false,
                    Some("detailed") | Some("1") => true,
                    Some(other) => {
                        return Err(HostError::invalid_argument(format!(
                            "describe: unknown option '{}'",
                            other
                        )))
                    }
                };
                Ok(Command::Describe {
                    path: args.text(0),
                    detailed,
                })
            }
            CommandKind::Read => {
                let args = Args::expect(kind, rest, 2, 7)?;
                let batch_size = match args.count(4, "batch_size")? {
                    0 => crate::codec::DEFAULT_READ_BATCH_SIZE,
                    n => n,
                };
                Ok(Command::Read(ReadArgs {
                    path: args.text(0),
                    varlist: args.text(1),
                    n_rows: args.count(2, "n_rows")?,
                    offset: args.count(3, "offset")?,
                    batch_size,
                    threads: args.count(5, "threads")?,
                    condition: args.condition(6)?,
                }))
            }
            CommandKind::Save => {
                let args = Args::expect(kind, rest, 2, 10)?;
                let compression = match args.text(4).trim() {
                    "" => "zstd".to_string(),
                    other => other.to_ascii_lowercase(),
                };
                let level = args.level(5)?;
                // reject unknown codecs before any work is done
                parse_compression(&compression, level)?;
                Ok(Command::Save(SaveArgs {
                    path: args.text(0),
                    varlist: args.text(1),
                    n_rows: args.count(2, "n_rows")?,
                    offset: args.count(3, "offset")?,
                    compression,
                    level,
                    threads: args.count(6, "threads")?,
                    condition: args.condition(7)?,
                    partition_by: args.text(8).split_whitespace().map(str::to_string).collect(),
                    overwrite: args.flag(9, "overwrite")?,
                }))
            }
        }
    }
}
