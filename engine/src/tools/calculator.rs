//! Safe arithmetic evaluation
//!
//! Input is normalized (question framing stripped, percent phrasing and
//! operator words rewritten), tokenized against a strict whitelist and
//! evaluated by a recursive-descent parser. Nothing is ever handed to an
//! interpreter.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := postfix ('^' unary)?        right-associative
//! postfix := primary '%'*                 percent, divides by 100
//! primary := number | '(' expr ')'
//! ```

use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// Maximum parenthesis / sign nesting accepted by the parser
const MAX_DEPTH: usize = 64;

/// Decimal places kept in results
const ROUND_DIGITS: i32 = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculatorError {
    #[error("Empty expression")]
    Empty,

    #[error("Unsupported token '{0}' in expression")]
    DisallowedToken(String),

    #[error("Malformed number '{0}'")]
    MalformedNumber(String),

    #[error("Unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("Unexpected '{0}' in expression")]
    UnexpectedToken(String),

    #[error("Expression ended unexpectedly")]
    UnexpectedEnd,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NonFinite,

    #[error("Expression is nested too deeply")]
    TooDeep,
}

impl From<CalculatorError> for EngineError {
    fn from(err: CalculatorError) -> Self {
        EngineError::CalculatorParse(err.to_string())
    }
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    /// Normalized expression that was evaluated
    pub expression: String,

    /// Rounded numeric result
    pub value: f64,

    /// Result formatted for display (`96`, `37.5`)
    pub display: String,
}

impl Calculation {
    /// `expression = value` line used in answers
    pub fn summary(&self) -> String {
        format!("{} = {}", self.expression, self.display)
    }
}

/// Normalize, parse and evaluate a user expression
pub fn evaluate(input: &str) -> Result<Calculation, CalculatorError> {
    let expression = normalize(input);
    if expression.is_empty() {
        return Err(CalculatorError::Empty);
    }

    let tokens = tokenize(&expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };

    let raw = parser.expr()?;
    match parser.peek() {
        None => {}
        Some(Token::RParen) => return Err(CalculatorError::UnbalancedParentheses),
        Some(token) => return Err(CalculatorError::UnexpectedToken(token.to_string())),
    }

    let value = round(raw)?;
    Ok(Calculation {
        expression,
        value,
        display: format_number(value),
    })
}

/// Whether a message is an arithmetic request
///
/// True when the normalized text is non-empty, contains a digit and an
/// operator, and consists solely of whitelisted characters. Dates and phone
/// numbers (`2024-01-15`, `555-1234`, `03/14/2024`) are left to the classifier.
pub fn looks_like_arithmetic(input: &str) -> bool {
    let normalized = normalize(input);

    !normalized.is_empty()
        && !is_date_or_number_code(&normalized)
        && normalized.chars().any(|c| c.is_ascii_digit())
        && normalized.chars().any(|c| "+-*/^%".contains(c))
        && normalized
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || "+-*/^%().".contains(c))
}

/// Digit groups joined only by bare hyphens, or a slash-separated date
fn is_date_or_number_code(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?:\d+(?:-\d+)+|\d{1,4}/\d{1,2}/\d{1,4})$").ok())
        .as_ref()
        .map(|pattern| pattern.is_match(text))
        .unwrap_or(false)
}

struct Rewrite {
    pattern: Regex,
    replacement: &'static str,
}

/// Rewrites applied in order during normalization
fn rewrites() -> &'static Vec<Rewrite> {
    static REWRITES: OnceLock<Vec<Rewrite>> = OnceLock::new();
    REWRITES.get_or_init(|| {
        [
            // 1,000 -> 1000
            (r"(\d),(\d{3})", "$1$2"),
            // "15% of 250", "15 percent of 250" -> "(15/100)*250"
            (r"(\d+(?:\.\d+)?|\.\d+)\s*(?:%|\bpercent\b)\s*of\b", "($1/100)*"),
            (r"\bpercent\b", "%"),
            (r"\bmultiplied\s+by\b", "*"),
            (r"\bdivided\s+by\b", "/"),
            (r"\bto\s+the\s+power\s+of\b", "^"),
            (r"\btimes\b", "*"),
            (r"\bplus\b", "+"),
            (r"\bminus\b", "-"),
            // 3 x 4 -> 3 * 4
            (r"([\d.)])\s*x\s*([\d.(])", "$1*$2"),
        ]
        .iter()
        .filter_map(|&(pattern, replacement)| {
            Regex::new(pattern).ok().map(|pattern| Rewrite {
                pattern,
                replacement,
            })
        })
        .collect()
    })
}

const LEADING_FRAMES: &[&str] = &[
    "what is",
    "what's",
    "whats",
    "how much is",
    "calculate",
    "compute",
    "evaluate",
    "solve",
];

const TRAILING_FRAMES: &[&str] = &["?", "!", "=", "equals", "equal"];

/// Rewrite a user message into a bare arithmetic expression
///
/// Lower-cases, strips question framing, maps `×`/`÷`/`−` and operator words
/// to symbols and turns percent phrasing into a numeric expression. Characters
/// outside the whitelist are left in place so the tokenizer can reject them.
pub fn normalize(input: &str) -> String {
    let mut text = input
        .trim()
        .to_lowercase()
        .replace('×', "*")
        .replace('÷', "/")
        .replace('−', "-");

    loop {
        let before = text.len();
        for frame in LEADING_FRAMES {
            if let Some(rest) = text.strip_prefix(frame) {
                text = rest.trim_start().to_string();
            }
        }
        for frame in TRAILING_FRAMES {
            if let Some(rest) = text.strip_suffix(frame) {
                text = rest.trim_end().to_string();
            }
        }
        // a trailing period is sentence punctuation, not a decimal point
        if text.ends_with('.') && !text.ends_with("..") {
            text.pop();
            text = text.trim_end().to_string();
        }
        if text.len() == before {
            break;
        }
    }

    for rewrite in rewrites() {
        // overlapping matches ("2x3x4", "1,000,000") need repeated passes
        loop {
            let next = rewrite
                .pattern
                .replace_all(&text, rewrite.replacement)
                .to_string();
            if next == text {
                break;
            }
            text = next;
        }
    }

    text.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Caret => f.write_str("^"),
            Token::Percent => f.write_str("%"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, CalculatorError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        end = idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &expression[start..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalculatorError::MalformedNumber(literal.to_string()))?;
                Token::Number(value)
            }
            other => return Err(CalculatorError::DisallowedToken(other.to_string())),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), CalculatorError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalculatorError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<f64, CalculatorError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.bump();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalculatorError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.bump();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.bump();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(CalculatorError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, CalculatorError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                self.descend()?;
                let value = -self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Plus) => {
                self.bump();
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalculatorError> {
        let base = self.postfix()?;
        if self.peek() == Some(Token::Caret) {
            self.bump();
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            let value = base.powf(exponent);
            if !value.is_finite() {
                return Err(CalculatorError::NonFinite);
            }
            return Ok(value);
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<f64, CalculatorError> {
        let mut value = self.primary()?;
        while self.peek() == Some(Token::Percent) {
            self.bump();
            value /= 100.0;
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<f64, CalculatorError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(CalculatorError::UnbalancedParentheses),
                }
            }
            Some(Token::RParen) => Err(CalculatorError::UnbalancedParentheses),
            Some(token) => Err(CalculatorError::UnexpectedToken(token.to_string())),
            None => Err(CalculatorError::UnexpectedEnd),
        }
    }
}

fn round(value: f64) -> Result<f64, CalculatorError> {
    if !value.is_finite() {
        return Err(CalculatorError::NonFinite);
    }
    let factor = 10f64.powi(ROUND_DIGITS);
    let scaled = value * factor;
    let rounded = if scaled.is_finite() && scaled.abs() < 9.0e15 {
        scaled.round() / factor
    } else {
        value
    };
    // avoid printing "-0"
    Ok(if rounded == 0.0 { 0.0 } else { rounded })
}

/// Display a result without a trailing `.0`
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}
