use pausegate_core::errors::FormulaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("name '{name}'"),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

/// Token with its byte offset in the source.
pub type Spanned = (usize, Token);

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '(' | ')' | '!' | '&' | '|')
}

/// Split a submitter expression into tokens.
///
/// Names run until whitespace or an operator character, so principal ids
/// like `jane.doe@corp` or `release-managers` are single names. `,` is OR.
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push((offset, Token::Or));
            }
            '(' => {
                chars.next();
                tokens.push((offset, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((offset, Token::RParen));
            }
            '!' => {
                chars.next();
                tokens.push((offset, Token::Not));
            }
            '&' | '|' => {
                chars.next();
                // `&&` and `||` are accepted as spellings of `&` and `|`
                if chars.peek().map(|&(_, n)| n) == Some(c) {
                    chars.next();
                }
                tokens.push((offset, if c == '&' { Token::And } else { Token::Or }));
            }
            _ => {
                let mut end = offset;
                while let Some(&(i, c)) = chars.peek() {
                    if is_delimiter(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let word = &src[offset..end];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((offset, token));
            }
        }
    }

    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(_, t)| t).collect()
    }

    #[test]
    fn comma_is_or() {
        assert_eq!(
            kinds("alice,bob"),
            vec![
                Token::Ident("alice".into()),
                Token::Or,
                Token::Ident("bob".into())
            ]
        );
    }

    #[test]
    fn symbolic_and_word_operators() {
        assert_eq!(
            kinds("!a && (b || c)"),
            vec![
                Token::Not,
                Token::Ident("a".into()),
                Token::And,
                Token::LParen,
                Token::Ident("b".into()),
                Token::Or,
                Token::Ident("c".into()),
                Token::RParen
            ]
        );
        assert_eq!(kinds("not a and b"), kinds("!a & b"));
    }

    #[test]
    fn principal_ids_keep_punctuation() {
        assert_eq!(
            kinds("jane.doe@corp release-managers"),
            vec![
                Token::Ident("jane.doe@corp".into()),
                Token::Ident("release-managers".into())
            ]
        );
    }

    #[test]
    fn offsets_point_at_token_start() {
        let tokens = tokenize("a , b").unwrap();
        assert_eq!(tokens[1].0, 2);
        assert_eq!(tokens[2].0, 4);
    }

    #[test]
    fn blank_input_is_empty_error() {
        assert_eq!(tokenize("   "), Err(FormulaError::Empty));
    }
}
