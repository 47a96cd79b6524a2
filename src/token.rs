//! Token model and pure text classifiers.

use std::fmt;

/// A single chain token. `Start` and `End` are sentinel markers bounding
/// every trained sequence; they are distinct enum variants, so they can
/// never collide with natural-language text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Start,
    End,
    Text(String),
}

impl Token {
    pub fn text(s: impl Into<String>) -> Self {
        Token::Text(s.into())
    }
}

// Ordered so chain transition maps iterate stably; generation must be
// reproducible for a fixed random source.
impl Ord for Token {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(t: &Token) -> u8 {
            match t {
                Token::Start => 0,
                Token::End => 1,
                Token::Text(_) => 2,
            }
        }
        match (self, other) {
            (Token::Text(a), Token::Text(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Start => f.write_str("<start>"),
            Token::End => f.write_str("<end>"),
            Token::Text(s) => f.write_str(s),
        }
    }
}

// Punctuation accepted during generation. Includes the Cyrillic
// typographic set (—, «») the model was first trained on.
const PUNCTUATION: &str = r#",.:;!?()[]{}—–«»"'"#;

// Marks that terminate a sentence.
const SENTENCE_END: &str = ".!?…";

pub fn is_punctuation_char(c: char) -> bool {
    PUNCTUATION.contains(c)
}

pub fn is_sentence_end_char(c: char) -> bool {
    SENTENCE_END.contains(c)
}

/// A token counts as a word when it contains at least one alphabetic
/// character, in any script. Pure digit or symbol tokens are not words.
pub fn is_word(token: &str) -> bool {
    token.chars().any(char::is_alphabetic)
}

/// A token counts as punctuation when it starts with a punctuation mark.
pub fn is_punctuation(token: &str) -> bool {
    token.chars().next().is_some_and(is_punctuation_char)
}

/// A token ends a sentence when its last character is a terminator.
pub fn is_sentence_end(token: &str) -> bool {
    token.chars().last().is_some_and(is_sentence_end_char)
}
