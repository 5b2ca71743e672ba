//! # Line Codec
//!
//! Pure functions between wire lines and typed records. Grammar:
//!
//! ```text
//! PUT  <key> <value> [<ttl>]
//! GET  <key>
//! DELETE <key>
//! EXISTS <key>
//! REPL_PUT    <key> <value> [<ttl>]
//! REPL_DELETE <key>
//! QUIT
//! ```
//!
//! Responses are `OK [<payload>]` or `ERROR <message>`. Verbs match
//! case-insensitively; formatting always emits the canonical uppercase form
//! with single spaces and a trailing newline, and omits a zero ttl.

use crate::command::{Command, Response, MAX_KEY_LEN, MAX_TTL_SECS, MAX_VALUE_LEN};
use crate::error::KvError;

/// Parses one request line (without its terminator) into a command.
///
/// Surrounding whitespace is trimmed first. Errors carry the exact wire
/// message to send back.
pub fn parse_command(line: &str) -> Result<Command, KvError> {
    let line = line.trim_matches(|c: char| c.is_ascii_whitespace());
    if line.is_empty() {
        return Err(KvError::EmptyCommand);
    }

    let mut tokens = line.split_ascii_whitespace();
    let verb = tokens.next().unwrap_or_default();
    let args: Vec<&str> = tokens.collect();

    if verb.eq_ignore_ascii_case("PUT") {
        return parse_put(&args, false);
    }
    if verb.eq_ignore_ascii_case("GET") {
        return Ok(Command::Get { key: parse_key_arg(&args)? });
    }
    if verb.eq_ignore_ascii_case("DELETE") {
        return Ok(Command::Delete { key: parse_key_arg(&args)? });
    }
    if verb.eq_ignore_ascii_case("EXISTS") {
        return Ok(Command::Exists { key: parse_key_arg(&args)? });
    }
    if verb.eq_ignore_ascii_case("REPL_PUT") {
        return parse_put(&args, true);
    }
    if verb.eq_ignore_ascii_case("REPL_DELETE") {
        return Ok(Command::ReplDelete { key: parse_key_arg(&args)? });
    }
    if verb.eq_ignore_ascii_case("QUIT") {
        if !args.is_empty() {
            return Err(KvError::InvalidCommand);
        }
        return Ok(Command::Quit);
    }

    Err(KvError::InvalidCommand)
}

/// Renders a command as its canonical wire line, newline included.
pub fn format_command(cmd: &Command) -> String {
    match cmd {
        Command::Put { key, value, ttl_secs } => format_put("PUT", key, value, *ttl_secs),
        Command::Get { key } => format!("GET {key}\n"),
        Command::Delete { key } => format!("DELETE {key}\n"),
        Command::Exists { key } => format!("EXISTS {key}\n"),
        Command::ReplPut { key, value, ttl_secs } => format_put("REPL_PUT", key, value, *ttl_secs),
        Command::ReplDelete { key } => format!("REPL_DELETE {key}\n"),
        Command::Quit => "QUIT\n".to_string(),
    }
}

/// Parses one response line (without its terminator).
pub fn parse_response(line: &str) -> Result<Response, KvError> {
    let line = line.trim_matches(|c: char| c.is_ascii_whitespace());
    if line == "OK" {
        return Ok(Response::Ok(None));
    }
    if let Some(payload) = line.strip_prefix("OK ") {
        return Ok(Response::Ok(Some(payload.to_string())));
    }
    if let Some(message) = line.strip_prefix("ERROR ") {
        return Ok(Response::Error(message.to_string()));
    }
    Err(KvError::InvalidResponse)
}

/// Renders a response as its wire line, newline included.
pub fn format_response(resp: &Response) -> String {
    match resp {
        Response::Ok(None) => "OK\n".to_string(),
        Response::Ok(Some(payload)) => format!("OK {payload}\n"),
        Response::Error(message) => format!("ERROR {message}\n"),
    }
}

fn parse_put(args: &[&str], internal: bool) -> Result<Command, KvError> {
    let (key, value, ttl_secs) = match args {
        [key, value] => (*key, *value, 0),
        [key, value, ttl] => (*key, *value, parse_ttl(ttl)?),
        _ => return Err(KvError::InvalidCommand),
    };
    let key = validate_key(key)?;
    let value = validate_value(value)?;
    Ok(if internal {
        Command::ReplPut { key, value, ttl_secs }
    } else {
        Command::Put { key, value, ttl_secs }
    })
}

fn parse_key_arg(args: &[&str]) -> Result<String, KvError> {
    match args {
        [key] => validate_key(key),
        _ => Err(KvError::InvalidCommand),
    }
}

fn validate_key(key: &str) -> Result<String, KvError> {
    if key.len() > MAX_KEY_LEN {
        return Err(KvError::KeyTooLong);
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String, KvError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(KvError::ValueTooLong);
    }
    Ok(value.to_string())
}

fn parse_ttl(token: &str) -> Result<u32, KvError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KvError::InvalidTtl);
    }
    let value: u64 = token.parse().map_err(|_| KvError::InvalidTtl)?;
    if value > MAX_TTL_SECS as u64 {
        return Err(KvError::InvalidTtl);
    }
    Ok(value as u32)
}

fn format_put(verb: &str, key: &str, value: &str, ttl_secs: u32) -> String {
    if ttl_secs > 0 {
        format!("{verb} {key} {value} {ttl_secs}\n")
    } else {
        format!("{verb} {key} {value}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_put_with_and_without_ttl() {
        assert_eq!(
            parse_command("PUT apple red").unwrap(),
            Command::Put {
                key: "apple".into(),
                value: "red".into(),
                ttl_secs: 0,
            }
        );
        assert_eq!(
            parse_command("PUT apple red 30").unwrap(),
            Command::Put {
                key: "apple".into(),
                value: "red".into(),
                ttl_secs: 30,
            }
        );
    }

    #[test]
    fn verbs_match_case_insensitively() {
        assert_eq!(
            parse_command("get apple").unwrap(),
            Command::Get { key: "apple".into() }
        );
        assert_eq!(parse_command("quit").unwrap(), Command::Quit);
        assert_eq!(
            parse_command("repl_delete apple").unwrap(),
            Command::ReplDelete { key: "apple".into() }
        );
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(
            parse_command("  GET apple \r").unwrap(),
            Command::Get { key: "apple".into() }
        );
    }

    #[test]
    fn empty_line_is_its_own_error() {
        assert_eq!(parse_command(""), Err(KvError::EmptyCommand));
        assert_eq!(parse_command("   "), Err(KvError::EmptyCommand));
    }

    #[test]
    fn unknown_verb_and_bad_arity_are_invalid() {
        assert_eq!(parse_command("FOO"), Err(KvError::InvalidCommand));
        assert_eq!(parse_command("PUT"), Err(KvError::InvalidCommand));
        assert_eq!(parse_command("PUT k"), Err(KvError::InvalidCommand));
        assert_eq!(parse_command("PUT k v 1 extra"), Err(KvError::InvalidCommand));
        assert_eq!(parse_command("GET a b"), Err(KvError::InvalidCommand));
        assert_eq!(parse_command("QUIT now"), Err(KvError::InvalidCommand));
    }

    #[test]
    fn ttl_must_be_a_bounded_decimal() {
        assert_eq!(parse_command("PUT k v 99999999999"), Err(KvError::InvalidTtl));
        assert_eq!(parse_command("PUT k v -1"), Err(KvError::InvalidTtl));
        assert_eq!(parse_command("PUT k v 1x"), Err(KvError::InvalidTtl));
        assert_eq!(parse_command("PUT k v 2147483648"), Err(KvError::InvalidTtl));
        assert!(parse_command("PUT k v 2147483647").is_ok());
    }

    #[test]
    fn oversize_fields_get_specific_errors() {
        let long = "x".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            parse_command(&format!("GET {long}")),
            Err(KvError::KeyTooLong)
        );
        assert_eq!(
            parse_command(&format!("PUT k {long}")),
            Err(KvError::ValueTooLong)
        );
        let max = "x".repeat(MAX_KEY_LEN);
        assert!(parse_command(&format!("GET {max}")).is_ok());
    }

    #[test]
    fn zero_ttl_formats_without_ttl_token() {
        let cmd = parse_command("PUT k v 0").unwrap();
        assert_eq!(format_command(&cmd), "PUT k v\n");
    }

    #[test]
    fn response_lines_round_trip() {
        for resp in [
            Response::Ok(None),
            Response::stored(),
            Response::value("red"),
            Response::flag(false),
            Response::Error("key not found".into()),
        ] {
            let line = format_response(&resp);
            assert!(line.ends_with('\n'));
            assert_eq!(parse_response(line.trim_end()).unwrap(), resp);
        }
        assert_eq!(parse_response("weird"), Err(KvError::InvalidResponse));
    }

    fn token() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[A-Za-z0-9_.:-]{1,16}").unwrap()
    }

    fn command() -> impl Strategy<Value = Command> {
        prop_oneof![
            (token(), token(), 0u32..=MAX_TTL_SECS)
                .prop_map(|(key, value, ttl_secs)| Command::Put { key, value, ttl_secs }),
            token().prop_map(|key| Command::Get { key }),
            token().prop_map(|key| Command::Delete { key }),
            token().prop_map(|key| Command::Exists { key }),
            (token(), token(), 0u32..=MAX_TTL_SECS)
                .prop_map(|(key, value, ttl_secs)| Command::ReplPut { key, value, ttl_secs }),
            token().prop_map(|key| Command::ReplDelete { key }),
            Just(Command::Quit),
        ]
    }

    proptest! {
        #[test]
        fn format_then_parse_reconstructs_commands(cmd in command()) {
            let line = format_command(&cmd);
            prop_assert!(line.ends_with('\n'));
            prop_assert_eq!(parse_command(line.trim_end()).unwrap(), cmd);
        }

        #[test]
        fn parse_then_format_normalizes_lines(
            key in token(),
            value in token(),
            ttl in 1u32..=MAX_TTL_SECS,
        ) {
            // Lower-case verb and stray padding normalize away.
            let sloppy = format!("  put {key} {value} {ttl} ");
            let cmd = parse_command(&sloppy).unwrap();
            prop_assert_eq!(format_command(&cmd), format!("PUT {key} {value} {ttl}\n"));
        }
    }
}
