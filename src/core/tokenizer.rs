// src/core/tokenizer.rs

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("Unterminated quote in command line.")]
    UnterminatedQuote,
}

/// Splits one logical command line into tokens.
///
/// Rules:
/// - Tokens split on unquoted spaces and tabs.
/// - Single and double quotes open a literal span; the quote characters
///   themselves are not part of the token.
/// - Inside single quotes a backslash has no meaning. Everywhere else it
///   escapes the next character; an escaped newline (line continuation)
///   disappears entirely.
/// - Tokenization stops at the first unescaped, unquoted newline. Generated
///   launch scripts carry exactly one invocation line, so later lines are
///   ignored on purpose.
pub fn tokenize(text: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut backslash = false;

    for c in text.chars() {
        if backslash {
            if c != '\n' {
                current.push(c);
            }
            backslash = false;
        } else if c == '\\' && quote != Some('\'') {
            backslash = true;
        } else if quote.is_none() && (c == '\'' || c == '"') {
            quote = Some(c);
        } else if Some(c) == quote {
            quote = None;
        } else if quote.is_none() && (c == ' ' || c == '\t') {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else if quote.is_none() && c == '\n' {
            break;
        } else {
            current.push(c);
        }
    }

    if quote.is_some() {
        return Err(TokenizeError::UnterminatedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Renders tokens back into a single logical command line.
///
/// Tokens containing whitespace or a quote character are quote-wrapped so the
/// result tokenizes back to the same sequence. In pretty mode every flag token
/// starts a new, indented physical line behind an escaped line break; that is
/// purely cosmetic and never changes token content or order.
pub fn detokenize<S: AsRef<str>>(tokens: &[S], pretty: bool) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let token = token.as_ref();
        if i > 0 {
            if pretty && token.starts_with('-') {
                out.push_str(" \\\n    ");
            } else {
                out.push(' ');
            }
        }
        out.push_str(&quote_token(token));
    }
    out
}

fn quote_token(token: &str) -> String {
    let needs_quoting = token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"');
    if !needs_quoting {
        return token.to_string();
    }
    if token.contains('\'') {
        // Backslashes keep their escape meaning inside double quotes.
        format!(
            "\"{}\"",
            token.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        format!("'{}'", token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str) -> Vec<String> {
        tokenize(text).unwrap()
    }

    #[test]
    fn test_splits_on_whitespace() {
        assert_eq!(tok("qemu -m  128\t-nographic"), [
            "qemu",
            "-m",
            "128",
            "-nographic"
        ]);
    }

    #[test]
    fn test_quotes_suppress_splitting() {
        assert_eq!(tok("sh -c 'echo hi there'"), ["sh", "-c", "echo hi there"]);
        assert_eq!(tok("-append \"console=ttyS0 oops=panic\""), [
            "-append",
            "console=ttyS0 oops=panic"
        ]);
    }

    #[test]
    fn test_adjacent_quoted_spans_merge() {
        assert_eq!(tok("echo 'kpwninit'washere"), ["echo", "kpwninitwashere"]);
    }

    #[test]
    fn test_backslash_escapes_outside_single_quotes() {
        assert_eq!(tok(r"a\ b c"), ["a b", "c"]);
        // Inside single quotes the backslash is literal.
        assert_eq!(tok(r"'a\ b'"), [r"a\ b"]);
    }

    #[test]
    fn test_line_continuation_is_removed() {
        assert_eq!(tok("qemu \\\n    -m 128"), ["qemu", "-m", "128"]);
    }

    #[test]
    fn test_stops_at_first_unescaped_newline() {
        assert_eq!(tok("qemu -m 128\necho ignored"), ["qemu", "-m", "128"]);
    }

    #[test]
    fn test_unterminated_quote_is_an_error() {
        assert_eq!(tokenize("qemu 'oops"), Err(TokenizeError::UnterminatedQuote));
        assert_eq!(
            tokenize("qemu \"oops"),
            Err(TokenizeError::UnterminatedQuote)
        );
    }

    #[test]
    fn test_detokenize_round_trip() {
        let cases = [
            "qemu-system-x86_64 -m 128 -append 'console=ttyS0 oops=panic' -nographic",
            "a b 'c d' e\\'f",
            r#"prog "mixed 'quote' arg" plain"#,
        ];
        for case in cases {
            let tokens = tok(case);
            let rendered = detokenize(&tokens, false);
            assert_eq!(tok(&rendered), tokens, "round trip failed for {case:?}");
        }
    }

    #[test]
    fn test_pretty_detokenize_round_trips_and_breaks_on_flags() {
        let tokens = tok("qemu-system-x86_64 -m 128 -append 'a b' -nographic");
        let pretty = detokenize(&tokens, true);
        assert!(pretty.contains(" \\\n    -m"));
        assert_eq!(tok(&pretty), tokens);
    }

    #[test]
    fn test_detokenize_quotes_tokens_with_spaces() {
        let rendered = detokenize(&["-append", "console=ttyS0 nokaslr"], false);
        assert_eq!(rendered, "-append 'console=ttyS0 nokaslr'");
    }
}
