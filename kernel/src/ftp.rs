//! FTP control-connection contract.
//!
//! A real FTP server is out of scope; what's pinned down here is the
//! command set and reply-code shape an implementation would need to sit on
//! top of [`crate::net::tcp`] -- parsing is real (it's a few lines of
//! string splitting), command *execution* is not.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

/// RFC 959 commands this server's control connection understands. Data
/// connections are out of scope entirely; `PASV`/`PORT` are recognized but
/// not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Pass(String),
    Syst,
    Feat,
    Pwd,
    Cwd(String),
    Cdup,
    Type(String),
    Mode(String),
    Stru(String),
    Pasv,
    Port(String),
    List(Option<String>),
    Nlst(Option<String>),
    Retr(String),
    Stor(String),
    Appe(String),
    Dele(String),
    Mkd(String),
    Rmd(String),
    Size(String),
    Quit,
    Noop,
    Unrecognized(String),
}

/// Parse one control-connection line (`VERB arg`, CRLF already stripped).
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    let verb = verb.to_ascii_uppercase();
    let arg = || rest.to_string();
    let arg_opt = || if rest.is_empty() { None } else { Some(rest.to_string()) };

    match verb.as_str() {
        "USER" => Command::User(arg()),
        "PASS" => Command::Pass(arg()),
        "SYST" => Command::Syst,
        "FEAT" => Command::Feat,
        "PWD" | "XPWD" => Command::Pwd,
        "CWD" | "XCWD" => Command::Cwd(arg()),
        "CDUP" => Command::Cdup,
        "TYPE" => Command::Type(arg()),
        "MODE" => Command::Mode(arg()),
        "STRU" => Command::Stru(arg()),
        "PASV" => Command::Pasv,
        "PORT" => Command::Port(arg()),
        "LIST" => Command::List(arg_opt()),
        "NLST" => Command::Nlst(arg_opt()),
        "RETR" => Command::Retr(arg()),
        "STOR" => Command::Stor(arg()),
        "APPE" => Command::Appe(arg()),
        "DELE" => Command::Dele(arg()),
        "MKD" | "XMKD" => Command::Mkd(arg()),
        "RMD" | "XRMD" => Command::Rmd(arg()),
        "SIZE" => Command::Size(arg()),
        "QUIT" => Command::Quit,
        "NOOP" => Command::Noop,
        _ => Command::Unrecognized(line.to_string()),
    }
}

/// A numeric reply line (`code SPACE text CRLF`), per RFC 959 §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: &str) -> Self {
        Self {
            code,
            text: text.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        alloc::format!("{} {}\r\n", self.code, self.text)
    }
}

/// Maps each [`Command`] to the reply a compliant server would send if it
/// accepted any user/password and ran the control connection only (no data
/// transfer). This is the contract boundary: a real implementation would
/// plug actual VFS/auth calls in here.
pub fn dispatch_stub(command: &Command) -> Reply {
    match command {
        Command::User(_) => Reply::new(331, "User name okay, need password"),
        Command::Pass(_) => Reply::new(230, "User logged in"),
        Command::Syst => Reply::new(215, "UNIX Type: L8"),
        Command::Feat => Reply::new(211, "No features"),
        Command::Pwd => Reply::new(257, "\"/\""),
        Command::Cwd(_) | Command::Cdup => Reply::new(250, "Directory successfully changed"),
        Command::Type(_) | Command::Mode(_) | Command::Stru(_) => Reply::new(200, "Command okay"),
        Command::Pasv | Command::Port(_) => Reply::new(502, "Command not implemented"),
        Command::List(_) | Command::Nlst(_) => Reply::new(502, "Command not implemented"),
        Command::Retr(_) | Command::Stor(_) | Command::Appe(_) => {
            Reply::new(502, "Command not implemented")
        }
        Command::Dele(_) | Command::Mkd(_) | Command::Rmd(_) => Reply::new(502, "Command not implemented"),
        Command::Size(_) => Reply::new(502, "Command not implemented"),
        Command::Quit => Reply::new(221, "Goodbye"),
        Command::Noop => Reply::new(200, "NOOP okay"),
        Command::Unrecognized(_) => Reply::new(500, "Command not recognized"),
    }
}

/// Split a buffered byte stream into complete CRLF-terminated lines, each
/// parsed. Leftover bytes after the last CRLF are returned for the caller
/// to prepend to the next read.
pub fn split_lines(buffer: &[u8]) -> (Vec<Command>, Vec<u8>) {
    let mut commands = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == b'\r' && buffer[i + 1] == b'\n' {
            if let Ok(line) = core::str::from_utf8(&buffer[start..i]) {
                commands.push(parse_command(line));
            }
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    (commands, buffer[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_pass() {
        assert_eq!(parse_command("USER anonymous"), Command::User("anonymous".into()));
        assert_eq!(parse_command("PASS secret"), Command::Pass("secret".into()));
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(parse_command("quit"), Command::Quit);
        assert_eq!(parse_command("NoOp"), Command::Noop);
    }

    #[test]
    fn list_with_no_argument_is_none() {
        assert_eq!(parse_command("LIST"), Command::List(None));
        assert_eq!(parse_command("LIST /bin"), Command::List(Some("/bin".into())));
    }

    #[test]
    fn unrecognized_command_is_preserved_verbatim() {
        assert_eq!(parse_command("FROB it"), Command::Unrecognized("FROB it".into()));
    }

    #[test]
    fn dispatch_stub_reports_unimplemented_data_transfer() {
        assert_eq!(dispatch_stub(&Command::Retr("file".into())).code, 502);
        assert_eq!(dispatch_stub(&Command::Quit).code, 221);
    }

    #[test]
    fn split_lines_handles_partial_trailing_command() {
        let (commands, rest) = split_lines(b"USER a\r\nPASS b\r\nQUI");
        assert_eq!(commands, alloc::vec![Command::User("a".into()), Command::Pass("b".into())]);
        assert_eq!(rest, b"QUI");
    }
}
