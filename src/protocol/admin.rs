//! Admin text protocol.
//!
//! Admin packets are newline-terminated lines sharing the stream with
//! binary packets. Four forms are recognized:
//!
//! ```text
//! OK[ <line>]               -> ok
//! ERR <code>[ <message>]    -> error
//! .                         -> block-complete
//! anything else             -> line
//! ```

use super::packet::Args;
use crate::error::{PacketError, Result};

/// Admin type names.
pub mod names {
    pub const OK: &str = "ok";
    pub const ERROR: &str = "error";
    pub const LINE: &str = "line";
    pub const BLOCK_COMPLETE: &str = "block-complete";
}

/// A classified admin line, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLine<'a> {
    Ok { line: Option<&'a str> },
    Error { code: &'a str, message: Option<&'a str> },
    BlockComplete,
    Line(&'a str),
}

impl<'a> AdminLine<'a> {
    /// Classify a line. Surrounding whitespace is ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use gearman_packet::protocol::AdminLine;
    ///
    /// assert_eq!(
    ///     AdminLine::parse("ERR 13 bad\r"),
    ///     AdminLine::Error { code: "13", message: Some("bad") }
    /// );
    /// assert_eq!(AdminLine::parse("OK"), AdminLine::Ok { line: None });
    /// ```
    pub fn parse(raw: &'a str) -> Self {
        let line = raw.trim();

        if let Some(rest) = after_keyword(line, "OK") {
            return AdminLine::Ok {
                line: non_empty(rest),
            };
        }

        if let Some(rest) = after_keyword(line, "ERR") {
            if let Some(code) = rest.split_whitespace().next() {
                let message = rest[code.len()..].trim_start();
                return AdminLine::Error {
                    code,
                    message: non_empty(message),
                };
            }
        }

        if line == "." {
            return AdminLine::BlockComplete;
        }

        AdminLine::Line(line)
    }

    /// Admin type name for this line.
    pub fn type_name(&self) -> &'static str {
        match self {
            AdminLine::Ok { .. } => names::OK,
            AdminLine::Error { .. } => names::ERROR,
            AdminLine::BlockComplete => names::BLOCK_COMPLETE,
            AdminLine::Line(_) => names::LINE,
        }
    }

    /// Argument values carried by the line.
    pub fn to_args(&self) -> Args {
        let mut args = Args::new();
        match *self {
            AdminLine::Ok { line } => {
                if let Some(line) = line {
                    args.insert("line", line);
                }
            }
            AdminLine::Error { code, message } => {
                args.insert("code", code);
                if let Some(message) = message {
                    args.insert("message", message);
                }
            }
            AdminLine::BlockComplete => {}
            AdminLine::Line(line) => args.insert("line", line),
        }
        args
    }
}

/// Strip `keyword` if it is the whole line or is followed by whitespace.
fn after_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() {
        return Some(rest);
    }
    if rest.starts_with(char::is_whitespace) {
        return Some(rest.trim_start());
    }
    None
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Render an admin packet as a newline-terminated line.
///
/// Values containing a newline are rejected, as they would end the line early.
pub fn render_admin(type_name: &str, args: &Args) -> Result<Vec<u8>> {
    let optional = |arg: &str| match args.get(arg) {
        Some(value) if value.contains('\n') => Err(PacketError::ArgumentContainsTerminator {
            packet_type: type_name.to_string(),
            arg: arg.to_string(),
        }),
        value => Ok(value),
    };
    let required = |arg: &str| {
        optional(arg)?.ok_or_else(|| PacketError::MissingArgument {
            packet_type: type_name.to_string(),
            arg: arg.to_string(),
        })
    };

    let mut out = match type_name {
        names::OK => match optional("line")? {
            Some(line) => format!("OK {}", line),
            None => "OK".to_string(),
        },
        names::ERROR => {
            let code = required("code")?;
            match optional("message")? {
                Some(message) => format!("ERR {} {}", code, message),
                None => format!("ERR {}", code),
            }
        }
        names::BLOCK_COMPLETE => ".".to_string(),
        names::LINE => required("line")?.to_string(),
        other => return Err(PacketError::UnsupportedAdminType(other.to_string())),
    };

    out.push('\n');
    Ok(out.into_bytes())
}
