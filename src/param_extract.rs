//! Parameter schema extraction from script source text.
//!
//! Extraction never runs user code. It is an ordered chain of strategies where
//! the first strategy that recognizes something wins:
//!
//! 1. [`DeclaredBlock`]: a literal assigned to `parameters` or
//!    `defaultParameters` (`let`/`const`, optionally `export`).
//! 2. [`FactoryLiterals`]: `key: number` pairs inside the `createGeometry`
//!    body, each turned into a numeric parameter in `[0, 100]`.
//!
//! A declared literal is parsed by an ordered chain of its own: strict JSON
//! first (after Rhai `#{` map markers are normalized), then a permissive
//! evaluator that tolerates unquoted keys, single quotes, trailing commas and
//! comments.
//!
//! ```rhai
//! let parameters = #{
//!     radius: #{ label: "Radius", default: 5, min: 1, max: 10, step: 0.5 },
//!     tint: "#ff8800",
//!     wireframe: false,
//! };
//! ```

use std::borrow::Cow;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use rhai::{Dynamic, Engine};
use serde_json::{Map, Value};

use crate::error::ExtractError;
use crate::params::{looks_like_hex_color, ParamType, ParamValue, ParameterDescriptor};

/// Names a declared parameter block may be assigned to.
pub const RECOGNIZED_BLOCK_NAMES: [&str; 2] = ["parameters", "defaultParameters"];

/// Range given to parameters inferred from factory literals.
const INFERRED_RANGE: (f64, f64) = (0.0, 100.0);

/// Where a schema came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// An explicit block assigned to one of [`RECOGNIZED_BLOCK_NAMES`].
    Declared { name: String },
    /// Synthesized from literals inside `createGeometry`.
    Inferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub source: SchemaSource,
    /// Which parser accepted the text (`strict`, `permissive` or `heuristic`).
    pub parser: &'static str,
    pub descriptors: Vec<ParameterDescriptor>,
}

/// Extract the parameter descriptors of a script.
///
/// A script with no recognizable schema yields an empty list.
pub fn extract(code: &str) -> Result<Vec<ParameterDescriptor>, ExtractError> {
    Ok(extract_schema(code)?
        .map(|extraction| extraction.descriptors)
        .unwrap_or_default())
}

/// Like [`extract`], but reports whether any strategy recognized a schema.
pub fn extract_schema(code: &str) -> Result<Option<Extraction>, ExtractError> {
    for strategy in SCHEMA_STRATEGIES {
        if let Some(result) = strategy.attempt(code) {
            log::debug!("Parameter schema recognized by {} strategy", strategy.name());
            return result.map(Some);
        }
    }
    Ok(None)
}

/// Replace a declared parameter block's literal with `()`, keeping line
/// structure, so the block may use syntax the script language itself rejects.
pub fn strip_declared_block(code: &str) -> Cow<'_, str> {
    let Some(Ok(block)) = find_declared_block(code) else {
        return Cow::Borrowed(code);
    };

    let mut stripped = String::with_capacity(code.len());
    stripped.push_str(&code[..block.literal.start]);
    stripped.push_str("()");
    for ch in code[block.literal.clone()].chars().skip(2) {
        stripped.push(if ch == '\n' { '\n' } else { ' ' });
    }
    stripped.push_str(&code[block.literal.end..]);
    Cow::Owned(stripped)
}

// ============================================================================
// Strategies
// ============================================================================

trait SchemaStrategy: Sync {
    fn name(&self) -> &'static str;

    /// `None` when the strategy does not recognize anything in `code`.
    fn attempt(&self, code: &str) -> Option<Result<Extraction, ExtractError>>;
}

static SCHEMA_STRATEGIES: [&dyn SchemaStrategy; 2] = [&DeclaredBlock, &FactoryLiterals];

struct DeclaredBlock;

impl SchemaStrategy for DeclaredBlock {
    fn name(&self) -> &'static str {
        "declared-block"
    }

    fn attempt(&self, code: &str) -> Option<Result<Extraction, ExtractError>> {
        let block = match find_declared_block(code)? {
            Ok(block) => block,
            Err(err) => return Some(Err(err)),
        };

        let literal = &code[block.literal];
        Some(parse_literal(literal).and_then(|(parser, value)| {
            Ok(Extraction {
                source: SchemaSource::Declared { name: block.name },
                parser,
                descriptors: normalize_schema(value)?,
            })
        }))
    }
}

struct FactoryLiterals;

impl SchemaStrategy for FactoryLiterals {
    fn name(&self) -> &'static str {
        "factory-literals"
    }

    fn attempt(&self, code: &str) -> Option<Result<Extraction, ExtractError>> {
        let starts = token_starts(code);
        let header = factory_pattern()
            .find_iter(code)
            .find(|m| starts.binary_search(&m.start()).is_ok())?;
        let body = match find_balanced(code, header.end()) {
            Ok(body) => body,
            Err(detail) => {
                log::debug!("createGeometry body could not be delimited: {detail}");
                return None;
            }
        };

        let descriptors = scan_numeric_pairs(&code[body]);
        if descriptors.is_empty() {
            return None;
        }
        Some(Ok(Extraction {
            source: SchemaSource::Inferred,
            parser: "heuristic",
            descriptors,
        }))
    }
}

struct BlockLocation {
    name: String,
    literal: Range<usize>,
}

fn declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:export\s+)?(?:let|const|var)\s+(parameters|defaultParameters)\s*=\s*")
            .expect("declaration pattern is valid")
    })
}

fn factory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:fn|function)\s+createGeometry\s*\([^)]*\)\s*")
            .expect("factory pattern is valid")
    })
}

/// Byte offsets at which code tokens begin. Offsets inside comments and
/// string literals never appear, so pattern matches there can be rejected.
fn token_starts(code: &str) -> Vec<usize> {
    Lexer::new(code, 0)
        .map_while(Result::ok)
        .map(|tok| tok.span.start)
        .collect()
}

/// First declaration whose right-hand side starts with an object or array literal.
fn find_declared_block(code: &str) -> Option<Result<BlockLocation, ExtractError>> {
    let starts = token_starts(code);
    for caps in declaration_pattern().captures_iter(code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if starts.binary_search(&whole.start()).is_err() {
            continue;
        }
        let rest = &code[whole.end()..];
        if !(rest.starts_with("#{") || rest.starts_with('{') || rest.starts_with('[')) {
            continue;
        }

        let name = name.as_str().to_string();
        return Some(match find_balanced(code, whole.end()) {
            Ok(literal) => Ok(BlockLocation { name, literal }),
            Err(detail) => Err(ExtractError::Unterminated { name, detail }),
        });
    }
    None
}

/// `key: number` pairs directly inside map literals, in source order.
fn scan_numeric_pairs(body: &str) -> Vec<ParameterDescriptor> {
    let tokens: Vec<Tok> = Lexer::new(body, 0).map_while(Result::ok).collect();
    let mut descriptors: Vec<ParameterDescriptor> = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        let key = match &tok.kind {
            TokKind::Ident => &body[tok.span.clone()],
            TokKind::Str(s) => s.as_str(),
            _ => continue,
        };
        let follows_separator = i > 0
            && matches!(
                tokens[i - 1].kind,
                TokKind::MapOpen | TokKind::Open('{') | TokKind::Comma
            );
        if !follows_separator || !matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokKind::Colon)) {
            continue;
        }

        let (negative, number_at) = match tokens.get(i + 2) {
            Some(t) if t.kind == TokKind::Punct && &body[t.span.clone()] == "-" => (true, i + 3),
            _ => (false, i + 2),
        };
        let Some(number) = tokens.get(number_at).filter(|t| t.kind == TokKind::Number) else {
            continue;
        };
        let Ok(value) = body[number.span.clone()].replace('_', "").parse::<f64>() else {
            continue;
        };
        if descriptors.iter().any(|d| d.key == key) {
            continue;
        }

        let value = if negative { -value } else { value };
        descriptors.push(
            ParameterDescriptor::new(key, ParamType::Number, ParamValue::Number(value)).with_range(
                Some(INFERRED_RANGE.0),
                Some(INFERRED_RANGE.1),
                None,
            ),
        );
    }
    descriptors
}

// ============================================================================
// Literal parsers
// ============================================================================

trait LiteralParser: Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, literal: &str) -> Result<Value, String>;
}

static LITERAL_PARSERS: [&dyn LiteralParser; 2] = [&StrictJson, &PermissiveEvaluator];

fn parse_literal(literal: &str) -> Result<(&'static str, Value), ExtractError> {
    let mut last_error = String::new();
    for parser in LITERAL_PARSERS {
        match parser.parse(literal) {
            Ok(value) => return Ok((parser.name(), value)),
            Err(err) => {
                log::debug!("{} parser rejected parameter block: {err}", parser.name());
                last_error = err;
            }
        }
    }
    Err(ExtractError::Unparseable(last_error))
}

/// JSON, with Rhai `#{` map openers read as `{`.
struct StrictJson;

impl LiteralParser for StrictJson {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn parse(&self, literal: &str) -> Result<Value, String> {
        let mut text = String::with_capacity(literal.len());
        let mut copied = 0;
        for tok in Lexer::new(literal, 0) {
            let tok = tok?;
            if tok.kind == TokKind::MapOpen {
                text.push_str(&literal[copied..tok.span.start]);
                text.push('{');
                copied = tok.span.end;
            }
        }
        text.push_str(&literal[copied..]);
        serde_json::from_str(&text).map_err(|e| e.to_string())
    }
}

/// Re-emits the literal as a Rhai constant expression and evaluates it on a
/// raw engine (no packages, no functions, tight operation budget).
struct PermissiveEvaluator;

impl LiteralParser for PermissiveEvaluator {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn parse(&self, literal: &str) -> Result<Value, String> {
        let (expr, top_level_keys) = to_rhai_expression(literal)?;

        let mut engine = Engine::new_raw();
        engine.set_max_operations(10_000);
        engine.set_max_expr_depths(32, 32);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(500);

        let value: Dynamic = engine.eval_expression(&expr).map_err(|e| e.to_string())?;
        Ok(order_top_level(dynamic_to_json(&value), &top_level_keys))
    }
}

fn to_rhai_expression(literal: &str) -> Result<(String, Vec<String>), String> {
    let tokens = Lexer::new(literal, 0).collect::<Result<Vec<_>, _>>()?;
    let mut out = String::with_capacity(literal.len() + 16);
    let mut containers: Vec<bool> = Vec::new();
    let mut top_level_keys = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).map(|t| &t.kind);
        let prev = i.checked_sub(1).map(|p| &tokens[p].kind);
        let in_map = containers.last() == Some(&true);
        let is_key = in_map
            && matches!(next, Some(TokKind::Colon))
            && matches!(prev, Some(TokKind::MapOpen | TokKind::Open('{') | TokKind::Comma));

        match &tok.kind {
            TokKind::MapOpen | TokKind::Open('{') => {
                containers.push(true);
                out.push_str("#{");
            }
            TokKind::Open(c) => {
                containers.push(false);
                out.push(*c);
            }
            TokKind::Close(c) => {
                containers.pop();
                out.push(*c);
            }
            TokKind::Comma => {
                if !matches!(next, Some(TokKind::Close(_))) {
                    out.push(',');
                }
            }
            TokKind::Str(s) => {
                if is_key && containers.len() == 1 {
                    top_level_keys.push(s.clone());
                }
                out.push_str(&rhai_string_literal(s));
            }
            TokKind::Ident => {
                let word = &literal[tok.span.clone()];
                if is_key {
                    if containers.len() == 1 {
                        top_level_keys.push(word.to_string());
                    }
                    out.push_str(&rhai_string_literal(word));
                } else if word == "null" || word == "undefined" {
                    out.push_str("()");
                } else {
                    out.push_str(word);
                }
            }
            TokKind::Colon => out.push(':'),
            TokKind::Number | TokKind::Punct => out.push_str(&literal[tok.span.clone()]),
        }
        out.push(' ');
    }

    Ok((out, top_level_keys))
}

fn rhai_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::from(i);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f64::from(f))
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(c) = value.as_char() {
        return Value::String(c.to_string());
    }
    if value.is_string() {
        return Value::String(value.clone().into_string().unwrap_or_default());
    }
    if let Some(items) = value.clone().try_cast::<rhai::Array>() {
        return Value::Array(items.iter().map(dynamic_to_json).collect());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        return Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                .collect(),
        );
    }
    Value::String(value.to_string())
}

/// Rhai maps are sorted; restore the source order of the outermost keys.
fn order_top_level(value: Value, keys: &[String]) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    let mut ordered = Map::with_capacity(map.len());
    for key in keys {
        if let Some(v) = map.remove(key) {
            ordered.insert(key.clone(), v);
        }
    }
    ordered.extend(map);
    Value::Object(ordered)
}

// ============================================================================
// Normalization
// ============================================================================

fn normalize_schema(value: Value) -> Result<Vec<ParameterDescriptor>, ExtractError> {
    match value {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(key, entry)| normalize_entry(key, entry))
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let key = item
                    .get("key")
                    .or_else(|| item.get("name"))
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ExtractError::InvalidEntry {
                        key: format!("[{index}]"),
                        reason: "array entries need a `key` or `name`".into(),
                    })?;
                normalize_entry(key, item)
            })
            .collect(),
        other => Err(ExtractError::InvalidEntry {
            key: "<block>".into(),
            reason: format!("expected an object or array, found {other}"),
        }),
    }
}

fn normalize_entry(key: String, entry: Value) -> Result<ParameterDescriptor, ExtractError> {
    let fields = match entry {
        Value::Object(fields) => fields,
        scalar => {
            let mut fields = Map::new();
            fields.insert("default".into(), scalar);
            fields
        }
    };

    let declared_type = match fields.get("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(ParamType::from_declared(name).ok_or_else(|| {
            ExtractError::InvalidEntry {
                key: key.clone(),
                reason: format!("unknown type `{name}`"),
            }
        })?),
        Some(other) => {
            return Err(ExtractError::InvalidEntry {
                key,
                reason: format!("`type` must be a string, found {other}"),
            })
        }
    };

    let number = |name: &str| fields.get(name).and_then(Value::as_f64);
    let min = number("min");
    let max = number("max");
    let step = number("step");

    let raw_default = fields
        .get("default")
        .or_else(|| fields.get("value"))
        .and_then(json_to_param);

    let param_type = declared_type.unwrap_or_else(|| match &raw_default {
        Some(ParamValue::Color(s)) if looks_like_hex_color(s) => ParamType::Color,
        Some(ParamValue::Boolean(_)) => ParamType::Boolean,
        _ => ParamType::Number,
    });

    let default = match raw_default {
        Some(value) => value.coerce(param_type).unwrap_or_else(|| {
            log::warn!("Parameter '{key}': default {value:?} is not a valid {param_type}");
            param_type.zero_value()
        }),
        None if param_type == ParamType::Number => ParamValue::Number(min.unwrap_or(0.0)),
        None => param_type.zero_value(),
    };

    let label = fields
        .get("label")
        .and_then(Value::as_str)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| key.clone());

    Ok(ParameterDescriptor::new(key, param_type, default)
        .with_label(label)
        .with_range(min, max, step))
}

fn json_to_param(value: &Value) -> Option<ParamValue> {
    match value {
        Value::Number(n) => n.as_f64().map(ParamValue::Number),
        Value::Bool(b) => Some(ParamValue::Boolean(*b)),
        Value::String(s) => Some(ParamValue::Color(s.clone())),
        _ => None,
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    /// Rhai `#{`.
    MapOpen,
    Open(char),
    Close(char),
    /// Decoded string contents (any quote style).
    Str(String),
    Ident,
    Number,
    Colon,
    Comma,
    Punct,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    span: Range<usize>,
}

/// Tokenizer for literal text; skips whitespace and comments. Spans are byte
/// offsets into the original source.
struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn skip_trivia(&mut self) -> Result<(), String> {
        loop {
            let rest = &self.src[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                let end = trimmed[2..]
                    .find("*/")
                    .ok_or_else(|| format!("unterminated block comment at byte {}", self.pos))?;
                self.pos += end + 4;
            } else {
                return Ok(());
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<TokKind, String> {
        let start = self.pos;
        self.pos += quote.len_utf8();
        let mut decoded = String::new();
        let mut chars = self.src[self.pos..].char_indices();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, 'n')) => decoded.push('\n'),
                    Some((_, 't')) => decoded.push('\t'),
                    Some((_, 'r')) => decoded.push('\r'),
                    Some((_, escaped)) => decoded.push(escaped),
                    None => break,
                },
                c if c == quote => {
                    self.pos += offset + c.len_utf8();
                    return Ok(TokKind::Str(decoded));
                }
                c => decoded.push(c),
            }
        }
        Err(format!("unterminated string starting at byte {start}"))
    }

    fn take_while(&mut self, mut keep: impl FnMut(char, Option<char>) -> bool) {
        let mut prev = None;
        while let Some(ch) = self.peek() {
            if !keep(ch, prev) {
                break;
            }
            prev = Some(ch);
            self.pos += ch.len_utf8();
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Tok, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.skip_trivia() {
            self.pos = self.src.len();
            return Some(Err(err));
        }
        let start = self.pos;
        let ch = self.peek()?;

        let kind = match ch {
            '#' if self.peek_second() == Some('{') => {
                self.pos += 2;
                TokKind::MapOpen
            }
            '{' | '[' | '(' => {
                self.pos += 1;
                TokKind::Open(ch)
            }
            '}' | ']' | ')' => {
                self.pos += 1;
                TokKind::Close(ch)
            }
            '"' | '\'' | '`' => match self.string(ch) {
                Ok(kind) => kind,
                Err(err) => {
                    self.pos = self.src.len();
                    return Some(Err(err));
                }
            },
            ':' if self.peek_second() == Some(':') => {
                self.pos += 2;
                TokKind::Punct
            }
            ':' => {
                self.pos += 1;
                TokKind::Colon
            }
            ',' => {
                self.pos += 1;
                TokKind::Comma
            }
            c if c.is_alphabetic() || c == '_' => {
                self.take_while(|c, _| c.is_alphanumeric() || c == '_');
                TokKind::Ident
            }
            c if c.is_ascii_digit()
                || (c == '.' && self.peek_second().is_some_and(|n| n.is_ascii_digit())) =>
            {
                let hex = self.src[self.pos..].starts_with("0x") || self.src[self.pos..].starts_with("0X");
                self.take_while(|c, prev| {
                    c.is_ascii_alphanumeric()
                        || c == '_'
                        || c == '.'
                        || (!hex && matches!(c, '+' | '-') && matches!(prev, Some('e' | 'E')))
                });
                TokKind::Number
            }
            c => {
                self.pos += c.len_utf8();
                TokKind::Punct
            }
        };

        Some(Ok(Tok {
            kind,
            span: start..self.pos,
        }))
    }
}

fn closing(open: char) -> char {
    match open {
        '[' => ']',
        '(' => ')',
        _ => '}',
    }
}

/// Span of the bracketed literal starting at `start` (after leading trivia).
fn find_balanced(code: &str, start: usize) -> Result<Range<usize>, String> {
    let mut expected: Vec<char> = Vec::new();
    let mut literal_start = None;

    for tok in Lexer::new(code, start) {
        let tok = tok?;
        match tok.kind {
            TokKind::MapOpen | TokKind::Open(_) => {
                literal_start.get_or_insert(tok.span.start);
                expected.push(match tok.kind {
                    TokKind::Open(c) => closing(c),
                    _ => '}',
                });
            }
            TokKind::Close(c) => match expected.pop() {
                Some(want) if want == c => {
                    if expected.is_empty() {
                        let begin = literal_start.unwrap_or(tok.span.start);
                        return Ok(begin..tok.span.end);
                    }
                }
                Some(want) => {
                    return Err(format!(
                        "expected `{want}` but found `{c}` at byte {}",
                        tok.span.start
                    ))
                }
                None => return Err(format!("unexpected `{c}` at byte {}", tok.span.start)),
            },
            _ if expected.is_empty() => {
                return Err(format!("expected a literal at byte {}", tok.span.start));
            }
            _ => {}
        }
    }

    Err(format!(
        "{} unclosed delimiter(s) at end of input",
        expected.len().max(1)
    ))
}
