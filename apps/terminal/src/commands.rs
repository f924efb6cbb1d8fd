//! Line commands typed at the prompt.

pub const HELP: &str = "\
Commands:
  /register <user> <password>   create an account and sign in
  /login <user> <password>      sign in
  /logout                       sign out
  /list                         show conversations
  /open <number|id>             open a conversation
  /search <prefix>              find users (at least 2 characters)
  /start <number>               start a conversation with a search result
  /resync                       re-fetch conversations and the open history
  /status                       show session and live-update status
  /quit                         exit
Anything else is sent to the open conversation.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationRef {
    /// 1-based position in the last `/list` output.
    Position(usize),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    Register { user_name: String, secret: String },
    Login { user_name: String, secret: String },
    Logout,
    List,
    Open(ConversationRef),
    Search(String),
    Start(usize),
    Send(String),
    Resync,
    Status,
    Help,
    Quit,
}

impl TerminalCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::List => "list",
            Self::Open(_) => "open",
            Self::Search(_) => "search",
            Self::Start(_) => "start",
            Self::Send(_) => "send",
            Self::Resync => "resync",
            Self::Status => "status",
            Self::Help => "help",
            Self::Quit => "quit",
        }
    }
}

/// Parses one input line. `Ok(None)` for blank lines, `Err` carries a usage
/// hint for the user.
pub fn parse_line(line: &str) -> Result<Option<TerminalCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(TerminalCommand::Send(line.to_string())));
    };
    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };

    let command = match verb {
        "register" | "login" => {
            let mut parts = args.split_whitespace();
            let (Some(user_name), Some(secret), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(format!("usage: /{verb} <user> <password>"));
            };
            let user_name = user_name.to_string();
            let secret = secret.to_string();
            if verb == "register" {
                TerminalCommand::Register { user_name, secret }
            } else {
                TerminalCommand::Login { user_name, secret }
            }
        }
        "logout" => TerminalCommand::Logout,
        "list" | "ls" => TerminalCommand::List,
        "open" => {
            if args.is_empty() {
                return Err("usage: /open <number|id>".to_string());
            }
            match args.parse::<usize>() {
                Ok(position) if position > 0 => {
                    TerminalCommand::Open(ConversationRef::Position(position))
                }
                _ => TerminalCommand::Open(ConversationRef::Id(args.to_string())),
            }
        }
        "search" => {
            if args.is_empty() {
                return Err("usage: /search <prefix>".to_string());
            }
            TerminalCommand::Search(args.to_string())
        }
        "start" => match args.parse::<usize>() {
            Ok(position) if position > 0 => TerminalCommand::Start(position),
            _ => return Err("usage: /start <number from /search>".to_string()),
        },
        "resync" => TerminalCommand::Resync,
        "status" => TerminalCommand::Status,
        "help" | "?" => TerminalCommand::Help,
        "quit" | "exit" => TerminalCommand::Quit,
        other => return Err(format!("unknown command /{other}; try /help")),
    };
    Ok(Some(command))
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
