//! Splitting template sources into segments and expressions into tokens.

/// Opening delimiter of an expression.
pub const EXPRESSION_START: &str = "${{";
pub const EXPRESSION_END: &str = "}}";
const STATEMENT_START: &str = "{%";
const STATEMENT_END: &str = "%}";
const COMMENT_START: &str = "{#";
const COMMENT_END: &str = "#}";

/// A slice of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    Text(&'a str),
    Expression(&'a str),
    Statement { body: &'a str, trim_before: bool, trim_after: bool },
    Comment { trim_before: bool, trim_after: bool },
}

/// Splits `source` into text, expression, statement and comment segments.
///
/// An opening delimiter without a matching close is kept as literal text.
pub fn segments(source: &str) -> Vec<Segment<'_>> {
    let mut output = Vec::new();
    let mut position = 0;

    while position < source.len() {
        let Some((start, opener)) = next_opener(source, position) else {
            output.push(Segment::Text(&source[position..]));
            break;
        };
        if start > position {
            output.push(Segment::Text(&source[position..start]));
        }

        let inner_start = start + opener.len();
        let (closer, skip_quotes) = match opener {
            EXPRESSION_START => (EXPRESSION_END, true),
            STATEMENT_START => (STATEMENT_END, true),
            _ => (COMMENT_END, false),
        };
        let Some(inner_end) = find_closing(source, inner_start, closer, skip_quotes) else {
            output.push(Segment::Text(&source[start..]));
            break;
        };

        let inner = &source[inner_start..inner_end];
        let segment = match opener {
            EXPRESSION_START => Segment::Expression(inner.trim()),
            STATEMENT_START => {
                let trim_before = inner.starts_with('-');
                let trim_after = inner.ends_with('-') && inner.len() > usize::from(trim_before);
                let body = inner.strip_prefix('-').unwrap_or(inner);
                let body = if trim_after { body.strip_suffix('-').unwrap_or(body) } else { body };
                Segment::Statement {
                    body: body.trim(),
                    trim_before,
                    trim_after,
                }
            }
            _ => Segment::Comment {
                trim_before: inner.starts_with('-'),
                trim_after: inner.len() > 1 && inner.ends_with('-'),
            },
        };
        output.push(segment);
        position = inner_end + closer.len();
    }

    output
}

fn next_opener(source: &str, from: usize) -> Option<(usize, &'static str)> {
    [EXPRESSION_START, STATEMENT_START, COMMENT_START]
        .into_iter()
        .filter_map(|opener| source[from..].find(opener).map(|offset| (from + offset, opener)))
        .min_by_key(|(index, _)| *index)
}

/// Finds `closer` starting at `from`, skipping over quoted string literals.
fn find_closing(source: &str, from: usize, closer: &str, skip_quotes: bool) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, character) in source[from..].char_indices() {
        let index = from + offset;
        if let Some(open_quote) = quote {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == open_quote {
                quote = None;
            }
            continue;
        }
        if skip_quotes && (character == '\'' || character == '"') {
            quote = Some(character);
            continue;
        }
        if source[index..].starts_with(closer) {
            return Some(index);
        }
    }
    None
}

/// Expression token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
    Symbol(&'static str),
}

const SYMBOLS: [&str; 24] = [
    "//", "==", "!=", "<=", ">=", "(", ")", "[", "]", "{", "}", ".", ",", ":", "|", "~", "+", "-", "*", "/", "%", "<", ">", "=",
];

/// Tokenizes an expression or statement body.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let characters: Vec<(usize, char)> = source.char_indices().collect();
    let mut cursor = 0;

    while cursor < characters.len() {
        let (index, character) = characters[cursor];

        if character.is_whitespace() {
            cursor += 1;
            continue;
        }

        if character == '\'' || character == '"' {
            let (literal, consumed) = read_string(&characters[cursor..], character)?;
            tokens.push(Token::Str(literal));
            cursor += consumed;
            continue;
        }

        if character.is_ascii_digit() {
            let start = cursor;
            while cursor < characters.len() && (characters[cursor].1.is_ascii_digit() || characters[cursor].1 == '_') {
                cursor += 1;
            }
            let is_float = cursor + 1 < characters.len() && characters[cursor].1 == '.' && characters[cursor + 1].1.is_ascii_digit();
            if is_float {
                cursor += 1;
                while cursor < characters.len() && characters[cursor].1.is_ascii_digit() {
                    cursor += 1;
                }
            }
            let end = characters.get(cursor).map(|(offset, _)| *offset).unwrap_or(source.len());
            let literal = source[characters[start].0..end].replace('_', "");
            let token = if is_float {
                Token::Float(literal.parse().map_err(|_| format!("invalid number '{literal}'"))?)
            } else {
                Token::Int(literal.parse().map_err(|_| format!("invalid number '{literal}'"))?)
            };
            tokens.push(token);
            continue;
        }

        if character.is_alphabetic() || character == '_' {
            let start = cursor;
            while cursor < characters.len() && (characters[cursor].1.is_alphanumeric() || characters[cursor].1 == '_') {
                cursor += 1;
            }
            let end = characters.get(cursor).map(|(offset, _)| *offset).unwrap_or(source.len());
            tokens.push(Token::Name(source[characters[start].0..end].to_string()));
            continue;
        }

        let rest = &source[index..];
        match SYMBOLS.iter().find(|symbol| rest.starts_with(**symbol)) {
            Some(symbol) => {
                tokens.push(Token::Symbol(*symbol));
                cursor += symbol.chars().count();
            }
            None => return Err(format!("unexpected character '{character}'")),
        }
    }

    Ok(tokens)
}

/// Reads a quoted literal; returns the unescaped text and the number of characters consumed.
fn read_string(characters: &[(usize, char)], quote: char) -> Result<(String, usize), String> {
    let mut literal = String::new();
    let mut cursor = 1;
    while cursor < characters.len() {
        let character = characters[cursor].1;
        match character {
            '\\' => {
                let escaped = characters.get(cursor + 1).map(|(_, next)| *next).ok_or("unterminated string literal")?;
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                cursor += 2;
            }
            c if c == quote => return Ok((literal, cursor + 1)),
            other => {
                literal.push(other);
                cursor += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_text_and_expressions() {
        assert_eq!(
            segments("hello ${{ name }}!"),
            vec![Segment::Text("hello "), Segment::Expression("name"), Segment::Text("!")]
        );
    }

    #[test]
    fn plain_jinja_delimiters_are_text() {
        assert_eq!(segments("{{ name }}"), vec![Segment::Text("{{ name }}")]);
    }

    #[test]
    fn closing_delimiter_inside_string_literal_is_skipped() {
        assert_eq!(segments("${{ '}}' }}"), vec![Segment::Expression("'}}'")]);
    }

    #[test]
    fn unterminated_expression_is_kept_verbatim() {
        assert_eq!(segments("a ${{ b"), vec![Segment::Text("a "), Segment::Text("${{ b")]);
    }

    #[test]
    fn statements_record_whitespace_control() {
        assert_eq!(
            segments("{%- if x -%}"),
            vec![Segment::Statement {
                body: "if x",
                trim_before: true,
                trim_after: true
            }]
        );
        assert_eq!(
            segments("{# note #}x"),
            vec![
                Segment::Comment {
                    trim_before: false,
                    trim_after: false
                },
                Segment::Text("x")
            ]
        );
    }

    #[test]
    fn tokenizes_operators_and_literals() {
        let tokens = tokenize("a.b | default('x') // 2 >= 1.5").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("a".into()),
                Token::Symbol("."),
                Token::Name("b".into()),
                Token::Symbol("|"),
                Token::Name("default".into()),
                Token::Symbol("("),
                Token::Str("x".into()),
                Token::Symbol(")"),
                Token::Symbol("//"),
                Token::Int(2),
                Token::Symbol(">="),
                Token::Float(1.5),
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("a $ b").is_err());
        assert!(tokenize("'open").is_err());
    }
}
