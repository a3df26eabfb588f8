//! Operator command batches.
//!
//! Wire form: `COMMAND|<domains joined by '+'>|<N>` followed, for each command,
//! by `|<token_count>|<tok_1>|...|<tok_k>`. Commands are split on whitespace.

pub const COMMAND_PREFIX: &str = "COMMAND";

pub const DEFAULT_DOMAINS: &[&str] = &["MPI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub domains: &'static [&'static str],
}

/// Known verbs, in suggestion order.
pub const COMMANDS: &[CommandMeta] = &[
    CommandMeta {
        name: "PAUSE",
        description: "Pause all MPI ranks",
        domains: DEFAULT_DOMAINS,
    },
    CommandMeta {
        name: "RESUME",
        description: "Resume all MPI ranks",
        domains: DEFAULT_DOMAINS,
    },
    CommandMeta {
        name: "APPCFG",
        description: "Update application configuration key",
        domains: DEFAULT_DOMAINS,
    },
    CommandMeta {
        name: "APPCMD",
        description: "Issue application command",
        domains: DEFAULT_DOMAINS,
    },
    CommandMeta {
        name: "UPDATEFLOW",
        description: "Install new flow plan",
        domains: &["CTL", "AGG", "MPI"],
    },
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("domains cannot be empty")]
    EmptyDomains,

    #[error("commands cannot be empty")]
    EmptyCommands,

    #[error("command {index} is empty")]
    EmptyCommand { index: usize },

    #[error("malformed command batch: {0}")]
    Malformed(String),
}

/// A decoded `COMMAND` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub domains: Vec<String>,
    pub commands: Vec<Vec<String>>,
}

impl CommandBatch {
    pub fn domain_field(&self) -> String {
        self.domains.join("+")
    }

    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .filter_map(|tokens| tokens.first().map(String::as_str))
    }
}

pub fn lookup(verb: &str) -> Option<&'static CommandMeta> {
    COMMANDS.iter().find(|meta| meta.name.eq_ignore_ascii_case(verb))
}

/// Case-insensitive prefix completion over the command table.
pub fn suggest(prefix: &str) -> Vec<&'static CommandMeta> {
    let prefix = prefix.trim().to_ascii_uppercase();
    COMMANDS
        .iter()
        .filter(|meta| meta.name.starts_with(&prefix))
        .collect()
}

/// Domains a free-text command is routed to, chosen by its upper-cased verb.
pub fn domains_for(command: &str) -> &'static [&'static str] {
    command
        .split_whitespace()
        .next()
        .and_then(lookup)
        .map_or(DEFAULT_DOMAINS, |meta| meta.domains)
}

pub fn encode_commands<D, C>(domains: &[D], commands: &[C]) -> Result<String, CommandError>
where
    D: AsRef<str>,
    C: AsRef<str>,
{
    let domains: Vec<&str> = domains
        .iter()
        .map(|d| d.as_ref().trim())
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        return Err(CommandError::EmptyDomains);
    }
    if commands.is_empty() {
        return Err(CommandError::EmptyCommands);
    }

    let mut fields = vec![
        COMMAND_PREFIX.to_string(),
        domains.join("+"),
        commands.len().to_string(),
    ];
    for (index, command) in commands.iter().enumerate() {
        let tokens: Vec<&str> = command.as_ref().split_whitespace().collect();
        if tokens.is_empty() {
            return Err(CommandError::EmptyCommand { index });
        }
        fields.push(tokens.len().to_string());
        fields.extend(tokens.into_iter().map(str::to_string));
    }
    Ok(fields.join("|"))
}

/// Encode one operator command, routed by its verb.
pub fn encode_operator_command(command: &str) -> Result<String, CommandError> {
    encode_commands(domains_for(command), &[command])
}

/// `ENABLE_PROBE|schema|probe` / `DISABLE_PROBE|schema|probe`, wrapped in a batch.
///
/// The inner `|` stays inside a single token, so on the wire it is
/// indistinguishable from extra fields; [`decode_commands`] folds trailing
/// fields back into the last token to recover it.
pub fn probe_toggle(schema: &str, probe: &str, on: bool) -> Result<String, CommandError> {
    let op = if on { "ENABLE_PROBE" } else { "DISABLE_PROBE" };
    encode_operator_command(&format!("{op}|{schema}|{probe}"))
}

pub fn decode_commands(payload: &str) -> Result<CommandBatch, CommandError> {
    let mut fields = payload.split('|');
    let malformed = |why: &str| CommandError::Malformed(why.to_string());

    if fields.next() != Some(COMMAND_PREFIX) {
        return Err(malformed("missing COMMAND prefix"));
    }
    let domains: Vec<String> = fields
        .next()
        .ok_or_else(|| malformed("missing domain field"))?
        .split('+')
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();
    if domains.is_empty() {
        return Err(CommandError::EmptyDomains);
    }

    let count = parse_count(fields.next(), "command count")?;
    if count == 0 {
        return Err(CommandError::EmptyCommands);
    }

    let mut commands = Vec::with_capacity(count);
    for index in 0..count {
        let tokens = parse_count(fields.next(), "token count")?;
        if tokens == 0 {
            return Err(CommandError::EmptyCommand { index });
        }
        let command = (0..tokens)
            .map(|_| fields.next().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| malformed("batch shorter than its token counts"))?;
        commands.push(command);
    }

    let trailing: Vec<&str> = fields.collect();
    if !trailing.is_empty() {
        if let Some(last) = commands.last_mut().and_then(|c| c.last_mut()) {
            for extra in trailing {
                last.push('|');
                last.push_str(extra);
            }
        }
    }

    Ok(CommandBatch { domains, commands })
}

fn parse_count(field: Option<&str>, what: &str) -> Result<usize, CommandError> {
    let raw = field.ok_or_else(|| CommandError::Malformed(format!("missing {what}")))?;
    raw.parse()
        .map_err(|_| CommandError::Malformed(format!("invalid {what}: {raw:?}")))
}
