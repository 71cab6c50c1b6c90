//! Normalization of path-shaped environment values.
//!
//! Deployment templating upstream of the container sometimes leaves shell
//! references (`$HOME/work`), a leading `-` or a trailing `}` in the value.
//! [`normalize`] expands the references and strips those artifacts.

use std::{env, process};

/// Normalizes a raw value taken from the process environment.
///
/// Returns `None` when the value is absent or empty, meaning the variable stays unset downstream.
pub fn normalize_env(raw: Option<&str>) -> Option<String> {
    match raw {
        Some(raw) if !raw.is_empty() => Some(normalize(raw, |name| env::var(name).ok())),
        _ => None,
    }
}

/// Expands `raw` against `lookup`, strips a leading `-/*` and one trailing `}`, and makes
/// the result absolute.
pub fn normalize<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand(raw, &lookup);

    let mut path = match expanded.strip_prefix('-') {
        Some(rest) => rest.trim_start_matches('/'),
        None => expanded.as_str(),
    };
    if let Some(rest) = path.strip_suffix('}') {
        path = rest;
    }

    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Shell-style expansion of `$NAME`, `${NAME}`, `${NAME:-word}`, `${NAME-word}`,
/// `${NAME:+word}`, `${NAME+word}` and a leading `~`.
///
/// Undefined variables expand to nothing, as do the positional parameters `$1`..`$9`, `$@`
/// and `$*`. `$?` is `0` and `$$` is the pid of this process. Anything that does not parse
/// is kept verbatim.
pub fn expand<F>(raw: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    if let Some(after) = rest.strip_prefix('~') {
        if after.is_empty() || after.starts_with('/') {
            match lookup("HOME") {
                Some(home) => out.push_str(&home),
                None => out.push('~'),
            }
            rest = after;
        }
    }

    while let Some(c) = rest.chars().next() {
        match c {
            '\\' => {
                let mut chars = rest[1..].chars();
                match chars.next() {
                    Some(escaped) => {
                        out.push(escaped);
                        rest = &rest[1 + escaped.len_utf8()..];
                    }
                    None => {
                        out.push('\\');
                        rest = "";
                    }
                }
            }
            '$' => rest = expand_reference(&rest[1..], lookup, &mut out),
            _ => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    out
}

/// Expands the reference following a `$` and returns the unconsumed input.
fn expand_reference<'a, F>(input: &'a str, lookup: &F, out: &mut String) -> &'a str
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(braced) = input.strip_prefix('{') {
        let Some(end) = closing_brace(braced) else {
            out.push_str("${");
            out.push_str(braced);
            return "";
        };

        match expand_braced(&braced[..end], lookup) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("${");
                out.push_str(&braced[..=end]);
            }
        }
        return &braced[end + 1..];
    }

    match input.chars().next() {
        // No positional parameters.
        Some('1'..='9' | '@' | '*') => return &input[1..],
        Some('?') => {
            out.push('0');
            return &input[1..];
        }
        Some('$') => {
            out.push_str(&process::id().to_string());
            return &input[1..];
        }
        _ => {}
    }

    let len = name_len(input);
    if len == 0 {
        out.push('$');
        return input;
    }

    if let Some(value) = lookup(&input[..len]) {
        out.push_str(&value);
    }
    &input[len..]
}

/// Evaluates the body of `${...}`. `None` means the body is not a supported form.
fn expand_braced<F>(body: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let len = name_len(body);
    if len == 0 {
        return None;
    }

    let value = lookup(&body[..len]);
    let operator = &body[len..];

    let expanded = if operator.is_empty() {
        value.unwrap_or_default()
    } else if let Some(word) = operator.strip_prefix(":-") {
        match value {
            Some(value) if !value.is_empty() => value,
            _ => expand(word, lookup),
        }
    } else if let Some(word) = operator.strip_prefix(":+") {
        match value {
            Some(value) if !value.is_empty() => expand(word, lookup),
            _ => String::new(),
        }
    } else if let Some(word) = operator.strip_prefix('-') {
        value.unwrap_or_else(|| expand(word, lookup))
    } else if let Some(word) = operator.strip_prefix('+') {
        value.map(|_| expand(word, lookup)).unwrap_or_default()
    } else {
        return None;
    };

    Some(expanded)
}

/// Length of the variable name at the start of `input`.
fn name_len(input: &str) -> usize {
    let mut chars = input.char_indices();

    match chars.next() {
        Some((_, c)) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return 0,
    }

    chars
        .find(|(_, c)| !(*c == '_' || c.is_ascii_alphanumeric()))
        .map_or(input.len(), |(index, _)| index)
}

/// Byte offset of the `}` closing a `${`, honouring nested braces.
fn closing_brace(input: &str) -> Option<usize> {
    let mut depth = 0usize;

    for (index, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(index),
            '}' => depth -= 1,
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn vars(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/dev".into()),
            "PROJECT" => Some("acme".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("-/home/user}", "/home/user")]
    #[case("-///opt/workspace}", "/opt/workspace")]
    #[case("-relative}", "/relative")]
    #[case("/already/absolute", "/already/absolute")]
    #[case("relative/path", "/relative/path")]
    #[case("$HOME/work", "/home/dev/work")]
    #[case("${HOME}/work/${PROJECT}", "/home/dev/work/acme")]
    #[case("~/work", "/home/dev/work")]
    #[case("-$HOME/work}", "/home/dev/work")]
    #[case("${UNSET:-/opt/fallback}", "/opt/fallback")]
    #[case("/a/b}}", "/a/b}")]
    #[case("/a/-b", "/a/-b")]
    fn normalizes_templating_artifacts(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize(raw, vars), expected);
    }

    #[rstest]
    #[case("/home/user")]
    #[case("-/home/user}")]
    #[case("$HOME/projects")]
    #[case("workspace")]
    fn normalization_is_idempotent(#[case] raw: &str) {
        let once = normalize(raw, vars);
        assert_eq!(normalize(&once, vars), once);
    }

    #[rstest]
    #[case("$UNSET/x", "/x")]
    #[case("${EMPTY:-default}", "default")]
    #[case("${EMPTY-default}", "")]
    #[case("${UNSET-default}", "default")]
    #[case("${PROJECT:+set}", "set")]
    #[case("${EMPTY:+set}", "")]
    #[case("${UNSET+set}", "")]
    #[case("${EMPTY+set}", "set")]
    #[case("${UNSET:-$HOME/x}", "/home/dev/x")]
    #[case("cost: $5", "cost: ")]
    #[case("/a/$1/b", "/a//b")]
    #[case("$@x$*", "x")]
    #[case("status $?", "status 0")]
    #[case("$0", "$0")]
    #[case("\\$5", "$5")]
    #[case("\\$HOME", "$HOME")]
    #[case("${unterminated", "${unterminated")]
    #[case("${1bad}", "${1bad}")]
    #[case("a~b", "a~b")]
    fn expands_shell_references(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expand(raw, &vars), expected);
    }

    #[test]
    fn double_dollar_is_own_pid() {
        assert_eq!(expand("/tmp/$$", &vars), format!("/tmp/{}", std::process::id()));
    }

    #[test]
    fn leading_tilde_without_home_is_kept() {
        assert_eq!(expand("~/x", &|_: &str| None), "~/x");
    }

    #[test]
    fn empty_environment_value_stays_unset() {
        assert_eq!(normalize_env(None), None);
        assert_eq!(normalize_env(Some("")), None);
        assert_eq!(
            normalize_env(Some("-/opt/workspace}")),
            Some("/opt/workspace".into())
        );
    }
}
