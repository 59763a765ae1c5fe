//! Shell-style argument decoding.
//!
//! Registration files store the command line of the device process as a
//! single string.  [`decode_args`] splits it back into arguments using the
//! same rules a POSIX shell applies to quoting:
//!
//! - unquoted whitespace separates arguments;
//! - `"` starts or ends a quoted section, inside which whitespace is literal;
//! - `\` makes the next character literal, inside or outside quotes.
//!
//! ```text
//! a "b c" d\\e   →   ["a", "b c", "d\e"]
//! ```

use thiserror::Error;

/// Errors produced while decoding an argument string.
#[derive(Debug, Error, PartialEq)]
pub enum ArgsError {
    /// A quoted section was opened but never closed.
    #[error("unterminated quote in argument string")]
    UnterminatedQuote,

    /// The string ends with a backslash that has nothing to escape.
    #[error("dangling escape character at end of argument string")]
    DanglingEscape,
}

/// Splits `input` into arguments.
///
/// # Errors
///
/// Returns [`ArgsError::UnterminatedQuote`] or [`ArgsError::DanglingEscape`]
/// for malformed input.
pub fn decode_args(input: &str) -> Result<Vec<String>, ArgsError> {
    let mut args = Vec::new();
    let mut current = String::new();
    // An argument exists once we saw any character or an opening quote, so
    // that `""` yields an empty argument.
    let mut in_argument = false;
    let mut quoted = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(ArgsError::DanglingEscape)?;
                current.push(escaped);
                in_argument = true;
            }
            '"' => {
                quoted = !quoted;
                in_argument = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_argument {
                    args.push(std::mem::take(&mut current));
                    in_argument = false;
                }
            }
            c => {
                current.push(c);
                in_argument = true;
            }
        }
    }

    if quoted {
        return Err(ArgsError::UnterminatedQuote);
    }
    if in_argument {
        args.push(current);
    }
    Ok(args)
}

/// Joins `args` into a single string that [`decode_args`] splits back into
/// the same arguments.
pub fn encode_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            let needs_quotes = arg.is_empty() || arg.chars().any(char::is_whitespace);
            let mut out = String::with_capacity(arg.len() + 2);
            if needs_quotes {
                out.push('"');
            }
            for c in arg.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            if needs_quotes {
                out.push('"');
            }
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}
