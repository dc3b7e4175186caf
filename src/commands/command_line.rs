//! Argument-template handling: tokenizing, `$ARGn$` substitution and quoting.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static ARG_MACRO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$ARG(\d+)\$").expect("ARG macro pattern is valid")
});

/// Split a shell-like argument string on whitespace.
///
/// A span enclosed in single or double quotes is kept in one token and the
/// quote characters are dropped. An unterminated quote runs to the end of the
/// input.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Replace every `$ARGk$` (case-insensitive, 1-based) in `token` with `args[k - 1]`.
/// Macros without a matching argument are left as they are.
pub fn substitute(token: &str, args: &[String]) -> String {
    ARG_MACRO
        .replace_all(token, |caps: &Captures| {
            let index = caps[1].parse::<usize>().unwrap_or(0);
            match index.checked_sub(1).and_then(|i| args.get(i)) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Quote `token` for display if it contains a space and is not quoted already.
///
/// Single quotes are preferred; double quotes are used when the value itself
/// holds a single quote.
pub fn quote_if_needed(token: &str) -> String {
    if !token.contains(' ') || is_quoted(token) {
        return token.to_string();
    }
    if token.contains('\'') {
        format!("\"{}\"", token)
    } else {
        format!("'{}'", token)
    }
}

fn is_quoted(token: &str) -> bool {
    token.len() >= 2
        && ((token.starts_with('\'') && token.ends_with('\''))
            || (token.starts_with('"') && token.ends_with('"')))
}

/// Render an argument vector as a single command line.
pub fn render(argv: &[String]) -> String {
    argv.iter()
        .map(|t| quote_if_needed(t))
        .collect::<Vec<_>>()
        .join(" ")
}
