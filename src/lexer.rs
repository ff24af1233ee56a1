use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::LexError;
use crate::token::{Token, TokenKind};

const INDENT_WIDTH: usize = 4;

/// Converts raw source text into a flat token sequence, synthesizing
/// INDENT/DEDENT/NEWLINE/EOF tokens from leading-space counts.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let prepared = preprocess(source);
    let mut tokens = Vec::new();
    let mut indent_stack: Vec<usize> = vec![0];
    let mut line_no = 0;

    for line in prepared.lines() {
        line_no += 1;
        let indent = line.chars().take_while(|&c| c == ' ').count();
        let rest = &line[indent..];

        // Blank and comment-only lines never touch the indent stack.
        if rest.is_empty() || rest.starts_with('#') || rest.starts_with("//") {
            continue;
        }

        let current = *indent_stack.last().expect("indent stack is never empty");
        if indent > current {
            if indent % INDENT_WIDTH != 0 {
                return Err(LexError::new(
                    line_no,
                    format!("Indentation of {indent} spaces is not a multiple of {INDENT_WIDTH}"),
                ));
            }
            indent_stack.push(indent);
            tokens.push(Token::new(TokenKind::Indent, "", line_no));
        } else if indent < current {
            while *indent_stack.last().expect("indent stack is never empty") > indent {
                indent_stack.pop();
                tokens.push(Token::new(TokenKind::Dedent, "", line_no));
            }
            if *indent_stack.last().expect("indent stack is never empty") != indent {
                return Err(LexError::new(
                    line_no,
                    format!("Dedent to {indent} spaces does not match any open indentation level"),
                ));
            }
        }

        scan_line(rest, line_no, &mut tokens)?;
        tokens.push(Token::new(TokenKind::Newline, "", line_no));
    }

    while indent_stack.len() > 1 {
        indent_stack.pop();
        tokens.push(Token::new(TokenKind::Dedent, "", line_no));
    }
    tokens.push(Token::new(TokenKind::Eof, "", line_no));
    Ok(tokens)
}

/// Normalizes line endings, expands tabs to 4 spaces, strips invisible
/// marker characters, and guarantees a trailing newline.
fn preprocess(source: &str) -> String {
    let mut text = source.replace("\r\n", "\n").replace('\r', "\n");
    text = text.replace('\t', "    ");
    text.retain(|c| c != '\u{feff}' && c != '\u{200b}');
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn scan_line(rest: &str, line: usize, tokens: &mut Vec<Token>) -> Result<(), LexError> {
    let mut chars = rest.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            ' ' => {
                chars.next();
            }
            '#' => break,
            '/' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '/')) => break,
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::new(TokenKind::SlashEqual, "/=", line));
                    }
                    _ => tokens.push(Token::new(TokenKind::Slash, "/", line)),
                }
            }
            '"' | '\'' => tokens.push(scan_string(rest, &mut chars, ch, line)?),
            c if c.is_ascii_digit() => tokens.push(scan_number(rest, &mut chars, start, line)?),
            c if c.is_alphabetic() || c == '_' => {
                tokens.push(scan_identifier(rest, &mut chars, start, line));
            }
            _ => {
                chars.next();
                let two = two_char_op(ch, chars.peek().map(|&(_, c)| c));
                if let Some((kind, lexeme)) = two {
                    chars.next();
                    tokens.push(Token::new(kind, lexeme, line));
                } else if let Some((kind, lexeme)) = one_char_op(ch) {
                    tokens.push(Token::new(kind, lexeme, line));
                } else {
                    return Err(LexError::new(
                        line,
                        format!("Unexpected character '{ch}'"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn two_char_op(first: char, second: Option<char>) -> Option<(TokenKind, &'static str)> {
    match (first, second?) {
        ('=', '=') => Some((TokenKind::EqualEqual, "==")),
        ('!', '=') => Some((TokenKind::BangEqual, "!=")),
        ('<', '=') => Some((TokenKind::LessEqual, "<=")),
        ('>', '=') => Some((TokenKind::GreaterEqual, ">=")),
        ('<', '<') => Some((TokenKind::Shl, "<<")),
        ('>', '>') => Some((TokenKind::Shr, ">>")),
        ('+', '=') => Some((TokenKind::PlusEqual, "+=")),
        ('-', '=') => Some((TokenKind::MinusEqual, "-=")),
        ('*', '=') => Some((TokenKind::StarEqual, "*=")),
        ('*', '*') => Some((TokenKind::StarStar, "**")),
        _ => None,
    }
}

fn one_char_op(ch: char) -> Option<(TokenKind, &'static str)> {
    match ch {
        '=' => Some((TokenKind::Equal, "=")),
        '<' => Some((TokenKind::Less, "<")),
        '>' => Some((TokenKind::Greater, ">")),
        '+' => Some((TokenKind::Plus, "+")),
        '-' => Some((TokenKind::Minus, "-")),
        '*' => Some((TokenKind::Star, "*")),
        '%' => Some((TokenKind::Percent, "%")),
        '&' => Some((TokenKind::Amp, "&")),
        '|' => Some((TokenKind::Pipe, "|")),
        '^' => Some((TokenKind::Caret, "^")),
        '~' => Some((TokenKind::Tilde, "~")),
        ':' => Some((TokenKind::Colon, ":")),
        ',' => Some((TokenKind::Comma, ",")),
        '.' => Some((TokenKind::Dot, ".")),
        '(' => Some((TokenKind::LParen, "(")),
        ')' => Some((TokenKind::RParen, ")")),
        '[' => Some((TokenKind::LBracket, "[")),
        ']' => Some((TokenKind::RBracket, "]")),
        '{' => Some((TokenKind::LBrace, "{")),
        '}' => Some((TokenKind::RBrace, "}")),
        _ => None,
    }
}

fn scan_string(
    rest: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    quote: char,
    line: usize,
) -> Result<Token, LexError> {
    let (start, _) = chars.next().expect("opening quote was peeked");
    let mut value = String::new();

    while let Some((idx, c)) = chars.next() {
        if c == quote {
            return Ok(Token::new(
                TokenKind::Str(value),
                &rest[start..idx + quote.len_utf8()],
                line,
            ));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\'')) => value.push('\''),
                Some((_, other)) => {
                    // Unknown escapes pass through with the backslash.
                    value.push('\\');
                    value.push(other);
                }
                None => break,
            }
        } else {
            value.push(c);
        }
    }
    Err(LexError::new(line, "Unterminated string literal"))
}

fn scan_number(
    rest: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    start: usize,
    line: usize,
) -> Result<Token, LexError> {
    chars.next();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            chars.next();
        } else {
            break;
        }
    }

    // A '.' continues the literal only when a digit follows; otherwise it is
    // a member-access dot.
    if let Some(&(dot_idx, '.')) = chars.peek() {
        let after_dot = rest[dot_idx + 1..].chars().next();
        if after_dot.is_some_and(|c| c.is_ascii_digit()) {
            chars.next();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    chars.next();
                } else {
                    break;
                }
            }
        }
    }

    let end = chars.peek().map(|&(idx, _)| idx).unwrap_or(rest.len());
    let lexeme = &rest[start..end];
    let value = lexeme
        .parse::<f64>()
        .map_err(|_| LexError::new(line, format!("Invalid numeric literal '{lexeme}'")))?;
    Ok(Token::new(TokenKind::Number(value), lexeme, line))
}

fn scan_identifier(
    rest: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    start: usize,
    line: usize,
) -> Token {
    chars.next();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            chars.next();
        } else {
            break;
        }
    }
    let end = chars.peek().map(|&(idx, _)| idx).unwrap_or(rest.len());
    let word = &rest[start..end];
    let kind = match word {
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "def" => TokenKind::Def,
        "class" => TokenKind::Class,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "pass" => TokenKind::Pass,
        "global" => TokenKind::Global,
        "import" => TokenKind::Import,
        "lambda" => TokenKind::Lambda,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "is" => TokenKind::Is,
        "True" => TokenKind::True,
        "False" => TokenKind::False,
        "None" => TokenKind::NoneKw,
        _ => TokenKind::Identifier(word.to_string()),
    };
    Token::new(kind, word, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn tokenizes_simple_block() {
        let input = indoc! {"
            def fn():
                n = 4 + 4
                print(n)
            fn()
        "};
        let expected = vec![
            TokenKind::Def,
            TokenKind::Identifier("fn".to_string()),
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Identifier("n".to_string()),
            TokenKind::Equal,
            TokenKind::Number(4.0),
            TokenKind::Plus,
            TokenKind::Number(4.0),
            TokenKind::Newline,
            TokenKind::Identifier("print".to_string()),
            TokenKind::LParen,
            TokenKind::Identifier("n".to_string()),
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Identifier("fn".to_string()),
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn blank_and_comment_lines_do_not_affect_indentation() {
        let input = indoc! {"
            while True:
                x = 1
            # back at column zero
                // another comment style

                y = 2
        "};
        let tokens = kinds(input);
        let dedents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Dedent))
            .count();
        let indents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Indent))
            .count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
    }

    #[test]
    fn errors_on_indent_not_multiple_of_four() {
        let err = tokenize("if x:\n   y = 1\n").expect_err("expected lex failure");
        assert!(err.message.contains("not a multiple of 4"));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn errors_on_unmatched_dedent() {
        let input = "if x:\n        y = 1\n    z = 2\n";
        let err = tokenize(input).expect_err("expected lex failure");
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn errors_on_unexpected_character() {
        let err = tokenize("x = 1 @ 2\n").expect_err("expected lex failure");
        assert!(err.message.contains("Unexpected character '@'"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("s = \"abc\n").expect_err("expected lex failure");
        assert!(err.message.contains("Unterminated string"));
    }

    #[test]
    fn decodes_string_escapes() {
        let tokens = tokenize(r#"s = 'a\n\t\'b\q'"#).expect("tokenize should succeed");
        match &tokens[2].kind {
            TokenKind::Str(value) => assert_eq!(value, "a\n\t'b\\q"),
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn expands_tabs_and_normalizes_line_endings() {
        let tokens = kinds("if x:\r\n\ty = 1\r\n");
        assert!(tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn reads_decimal_and_integer_literals() {
        let tokens = kinds("x = 1.5 + 2");
        assert!(tokens.contains(&TokenKind::Number(1.5)));
        assert!(tokens.contains(&TokenKind::Number(2.0)));
    }

    #[test]
    fn dot_after_number_without_digit_is_member_access() {
        let tokens = kinds("x = 1 .y");
        assert!(tokens.contains(&TokenKind::Dot));
    }

    #[test]
    fn flushes_dedents_at_end_of_input() {
        let tokens = kinds("if x:\n    if y:\n        z = 1");
        let trailing: Vec<_> = tokens[tokens.len() - 3..].to_vec();
        assert_eq!(
            trailing,
            vec![TokenKind::Dedent, TokenKind::Dedent, TokenKind::Eof]
        );
    }
}
