//! Control-channel grammar: command parsing, reply codes and formatting,
//! and the typed parsers for PORT/TYPE/MODE/STRU parameters.

use crate::constants::MAX_VERB_LEN;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error, command unrecognized")]
    BadSyntax,
}

/// A command line split into its verb and optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Uppercased verb, at most eight ASCII letters.
    pub verb: String,
    pub argument: String,
    pub has_argument: bool,
}

/// Parses a raw command line into a [`ParsedCommand`].
///
/// The trailing CRLF is stripped, surrounding whitespace is trimmed, the
/// verb is uppercased. A verb longer than eight characters or containing
/// anything but ASCII letters is rejected.
pub fn parse_command(line: &str) -> Result<ParsedCommand, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']).trim();

    if line.is_empty() {
        return Err(ParseError::BadSyntax);
    }

    let (verb, argument) = match line.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    if verb.is_empty() || verb.len() > MAX_VERB_LEN || !verb.bytes().all(|b| b.is_ascii_alphabetic())
    {
        return Err(ParseError::BadSyntax);
    }

    Ok(ParsedCommand {
        verb: verb.to_ascii_uppercase(),
        argument: argument.to_string(),
        has_argument: !argument.is_empty(),
    })
}

/// The reply codes this server emits (RFC 959 subset plus RFC 3659).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReplyCode {
    InNMinutes = 120,
    ConnectionAlreadyOpen = 125,
    FileStatusOkay = 150,

    CommandOkay = 200,
    SystemStatus = 211,
    FileStatus = 213,
    SystemType = 215,
    ServiceReady = 220,
    ClosingControlConnection = 221,
    DataConnectionOpen = 225,
    ClosingDataConnection = 226,
    EnteringPassiveMode = 227,
    UserLoggedIn = 230,
    FileActionOkay = 250,
    PathCreated = 257,

    NeedPassword = 331,
    FileActionPending = 350,

    ServiceNotAvailable = 421,
    CantOpenDataConnection = 425,
    ConnectionClosed = 426,
    TransientFileError = 450,
    LocalError = 451,

    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadCommandSequence = 503,
    CommandNotImplementedForParameter = 504,
    NotLoggedIn = 530,
    FileUnavailable = 550,
}

impl ReplyCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Formats a final reply line: `CCC msg\r\n`.
pub fn format_reply(code: ReplyCode, msg: &str) -> String {
    format!("{} {}\r\n", code.as_u16(), msg)
}

/// Formats a continuation line of a multi-line reply: `CCC-msg\r\n`.
/// The reply is terminated by a later [`format_reply`] line with the
/// same code.
pub fn format_reply_cont(code: ReplyCode, msg: &str) -> String {
    format!("{}-{}\r\n", code.as_u16(), msg)
}

/// Representation type negotiated with TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
    Ebcdic,
}

/// Transfer mode negotiated with MODE. Only stream mode is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Stream,
    Block,
    Compressed,
}

/// File structure negotiated with STRU. Only file structure is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStructure {
    File,
    Record,
    Page,
}

/// Parses a PORT argument of the form `h1,h2,h3,h4,p1,p2`.
pub fn parse_port(argument: &str) -> Result<(Ipv4Addr, u16), ParseError> {
    let octets: Vec<u8> = argument
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| ParseError::BadSyntax)?;

    if octets.len() != 6 {
        return Err(ParseError::BadSyntax);
    }

    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = u16::from(octets[4]) * 256 + u16::from(octets[5]);

    Ok((ip, port))
}

/// Formats the PASV reply: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub fn format_pasv_response(ip: Ipv4Addr, port: u16) -> String {
    let [h1, h2, h3, h4] = ip.octets();
    format!(
        "227 Entering Passive Mode ({},{},{},{},{},{})\r\n",
        h1,
        h2,
        h3,
        h4,
        port / 256,
        port % 256
    )
}

pub fn parse_type(argument: &str) -> Result<TransferType, ParseError> {
    match argument.trim().to_ascii_uppercase().as_str() {
        "A" | "A N" => Ok(TransferType::Ascii),
        "I" => Ok(TransferType::Binary),
        "E" | "E N" => Ok(TransferType::Ebcdic),
        _ => Err(ParseError::BadSyntax),
    }
}

pub fn parse_mode(argument: &str) -> Result<TransferMode, ParseError> {
    match argument.trim().to_ascii_uppercase().as_str() {
        "S" => Ok(TransferMode::Stream),
        "B" => Ok(TransferMode::Block),
        "C" => Ok(TransferMode::Compressed),
        _ => Err(ParseError::BadSyntax),
    }
}

pub fn parse_stru(argument: &str) -> Result<DataStructure, ParseError> {
    match argument.trim().to_ascii_uppercase().as_str() {
        "F" => Ok(DataStructure::File),
        "R" => Ok(DataStructure::Record),
        "P" => Ok(DataStructure::Page),
        _ => Err(ParseError::BadSyntax),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verb_and_argument() {
        let cmd = parse_command("RETR file.txt\r\n").unwrap();
        assert_eq!(cmd.verb, "RETR");
        assert_eq!(cmd.argument, "file.txt");
        assert!(cmd.has_argument);
    }

    #[test]
    fn parse_lowercase_verb_is_uppercased() {
        let cmd = parse_command("user anonymous\r\n").unwrap();
        assert_eq!(cmd.verb, "USER");
        assert_eq!(cmd.argument, "anonymous");
    }

    #[test]
    fn parse_verb_without_argument() {
        let cmd = parse_command("PASV\r\n").unwrap();
        assert_eq!(cmd.verb, "PASV");
        assert!(!cmd.has_argument);
        assert_eq!(cmd.argument, "");
    }

    #[test]
    fn parse_argument_with_spaces() {
        let cmd = parse_command("STOR my file.txt\r\n").unwrap();
        assert_eq!(cmd.argument, "my file.txt");
    }

    #[test]
    fn parse_rejects_empty_line() {
        assert_eq!(parse_command("\r\n"), Err(ParseError::BadSyntax));
        assert_eq!(parse_command("   \r\n"), Err(ParseError::BadSyntax));
    }

    #[test]
    fn parse_rejects_long_or_non_alphabetic_verb() {
        assert_eq!(parse_command("ABCDEFGHI\r\n"), Err(ParseError::BadSyntax));
        assert_eq!(parse_command("RE7R x\r\n"), Err(ParseError::BadSyntax));
    }

    #[test]
    fn reply_formats() {
        assert_eq!(
            format_reply(ReplyCode::ServiceReady, "FTP Server Ready"),
            "220 FTP Server Ready\r\n"
        );
        assert_eq!(
            format_reply_cont(ReplyCode::SystemStatus, " SIZE"),
            "211- SIZE\r\n"
        );
    }

    #[test]
    fn port_parse_happy_path() {
        let (ip, port) = parse_port("127,0,0,1,78,52").unwrap();
        assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 78 * 256 + 52);
    }

    #[test]
    fn port_parse_rejects_bad_input() {
        assert!(parse_port("1,2,3,4,5").is_err());
        assert!(parse_port("256,0,0,1,10,10").is_err());
        assert!(parse_port("a,b,c,d,e,f").is_err());
    }

    #[test]
    fn pasv_response_format() {
        let formatted = format_pasv_response(Ipv4Addr::new(10, 0, 0, 2), 20021);
        assert_eq!(formatted, "227 Entering Passive Mode (10,0,0,2,78,53)\r\n");
    }

    #[test]
    fn type_mode_stru_parsers() {
        assert_eq!(parse_type("A"), Ok(TransferType::Ascii));
        assert_eq!(parse_type("a n"), Ok(TransferType::Ascii));
        assert_eq!(parse_type("I"), Ok(TransferType::Binary));
        assert_eq!(parse_type("E"), Ok(TransferType::Ebcdic));
        assert!(parse_type("L 8").is_err());

        assert_eq!(parse_mode("S"), Ok(TransferMode::Stream));
        assert_eq!(parse_mode("b"), Ok(TransferMode::Block));
        assert!(parse_mode("X").is_err());

        assert_eq!(parse_stru("F"), Ok(DataStructure::File));
        assert_eq!(parse_stru("r"), Ok(DataStructure::Record));
        assert!(parse_stru("M").is_err());
    }
}
