//! Splits formula text into tokens. Identifiers are read with maximal munch,
//! so `R1` is never matched inside `R12`, and numbers are always whole tokens.
use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Caret => "^".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::Eq => "=".into(),
            Token::Ne => "!=".into(),
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, FormulaError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
            i = scan_number(bytes, i);
            let text = &src[start..i];
            let value = text.parse::<f64>().map_err(|_| FormulaError::InvalidNumber(text.to_string()))?;
            out.push(Spanned { token: Token::Number(value), pos: start });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            i = scan_word(bytes, i);
            // Dotted segments: `F1.Start`, `M2.3`.
            while bytes.get(i) == Some(&b'.') && bytes.get(i + 1).is_some_and(|b| is_word_byte(*b)) {
                i = scan_word(bytes, i + 1);
            }
            out.push(Spanned { token: Token::Ident(src[start..i].to_string()), pos: start });
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (token, width) = match (c, next) {
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'<', Some(b'>')) => (Token::Ne, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'=', Some(b'=')) => (Token::Eq, 2),
            (b'!', Some(b'=')) => (Token::Ne, 2),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'=', _) => (Token::Eq, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b',', _) => (Token::Comma, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'^', _) => (Token::Caret, 1),
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(FormulaError::UnexpectedChar { ch, pos: start });
            }
        };
        out.push(Spanned { token, pos: start });
        i += width;
    }

    Ok(out)
}

#[inline]
fn is_word_byte(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' }

fn scan_word(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && is_word_byte(bytes[i]) {
        i += 1;
    }
    i
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(|b| b.is_ascii_digit()) {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_longer_names_are_single_tokens() {
        assert_eq!(
            kinds("R1+R12"),
            vec![Token::Ident("R1".into()), Token::Plus, Token::Ident("R12".into())]
        );
    }

    #[test]
    fn test_dotted_references() {
        assert_eq!(
            kinds("F1.Start * M2.3"),
            vec![Token::Ident("F1.Start".into()), Token::Star, Token::Ident("M2.3".into())]
        );
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("1.5e2 <> .5"),
            vec![Token::Number(150.0), Token::Ne, Token::Number(0.5)]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("R1 # 2").unwrap_err();
        assert_eq!(err, FormulaError::UnexpectedChar { ch: '#', pos: 3 });
    }
}
