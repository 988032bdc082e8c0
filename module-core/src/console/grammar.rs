#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the service console.
//!
//! `regal` turns a line into a bounded token stream and `winnow` parsers over
//! those tokens build a [`Command`]. Keywords match case-insensitively.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::catalog::{self, CommandTag};
use crate::power::ModuleState;

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 32;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[regex(r"[0-9]+")]
    Integer,
    /// Keyword or argument; hyphens are allowed after the first letter.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Anything the grammar has no use for.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "integer out of range at {span:?}")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// How a simulated node is rebooted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetKind {
    /// Watchdog expiry: the durable record survives.
    Watchdog,
    /// Power loss: everything starts cold.
    Power,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Can,
    State(ModuleState),
    Max(ModuleState),
    Isolate,
    Announce,
    Events,
    Help { topic: Option<&'a str> },
    Tick(u16),
    Register(u8),
    Deregister,
    RequestStatus,
    Overcurrent,
    AuxLoss,
    BusOff,
    TxError(u8),
    TxOk,
    Reset(ResetKind),
}

impl Command<'_> {
    /// Commands that stand in for the bus or the hardware and need a simulated board.
    #[must_use]
    pub const fn is_simulation(&self) -> bool {
        matches!(
            self,
            Command::Tick(_)
                | Command::Register(_)
                | Command::Deregister
                | Command::RequestStatus
                | Command::Overcurrent
                | Command::AuxLoss
                | Command::BusOff
                | Command::TxError(_)
                | Command::TxOk
                | Command::Reset(_)
        )
    }
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }
        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: buffer.len() + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        let Some(entry) = catalog::find(keyword.lexeme) else {
            *input = snapshot;
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&keyword),
            )));
        };

        match entry.tag {
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Can => Ok(Command::Can),
            CommandTag::State => state_argument().parse_next(input).map(Command::State),
            CommandTag::Max => state_argument().parse_next(input).map(Command::Max),
            CommandTag::Isolate => Ok(Command::Isolate),
            CommandTag::Announce => Ok(Command::Announce),
            CommandTag::Events => Ok(Command::Events),
            CommandTag::Help => {
                let topic = optional_kind(TokenKind::Ident).parse_next(input)?;
                Ok(Command::Help {
                    topic: topic.map(|token| token.lexeme),
                })
            }
            CommandTag::Tick => {
                let count = optional_integer::<u16>().parse_next(input)?;
                Ok(Command::Tick(count.unwrap_or(1)))
            }
            CommandTag::Register => {
                let token = expect_kind(TokenKind::Integer, "registration id").parse_next(input)?;
                let id = parse_integer::<u8>(&token).map_err(ErrMode::Cut)?;
                Ok(Command::Register(id))
            }
            CommandTag::Deregister => Ok(Command::Deregister),
            CommandTag::Request => {
                expect_keyword(&["status"], "status").parse_next(input)?;
                Ok(Command::RequestStatus)
            }
            CommandTag::Overcurrent => Ok(Command::Overcurrent),
            CommandTag::AuxLoss => Ok(Command::AuxLoss),
            CommandTag::BusOff => Ok(Command::BusOff),
            CommandTag::TxError => {
                let count = optional_integer::<u8>().parse_next(input)?;
                Ok(Command::TxError(count.unwrap_or(1)))
            }
            CommandTag::TxOk => Ok(Command::TxOk),
            CommandTag::Reset => {
                let index =
                    expect_keyword(&["watchdog", "power"], "watchdog or power").parse_next(input)?;
                Ok(Command::Reset(if index == 0 {
                    ResetKind::Watchdog
                } else {
                    ResetKind::Power
                }))
            }
        }
    }
}

const REQUESTABLE_STATES: [ModuleState; 4] = [
    ModuleState::Off,
    ModuleState::Standby,
    ModuleState::Precharge,
    ModuleState::On,
];

fn state_argument<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, ModuleState, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Ident, "state").parse_next(input)?;
        REQUESTABLE_STATES
            .iter()
            .copied()
            .find(|state| state.label().eq_ignore_ascii_case(token.lexeme))
            .ok_or_else(|| ErrMode::Cut(GrammarError::unexpected("state", Some(&token))))
    }
}

/// Matches one of `keywords` and yields its index.
fn expect_keyword<'src, 'slice>(
    keywords: &'static [&'static str],
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, usize, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Ident, label).parse_next(input)?;
        keywords
            .iter()
            .position(|keyword| keyword.eq_ignore_ascii_case(token.lexeme))
            .ok_or_else(|| ErrMode::Cut(GrammarError::unexpected(label, Some(&token))))
    }
}

fn optional_integer<'src, 'slice, T>()
-> impl Parser<Input<'src, 'slice>, Option<T>, GrammarError<'src>>
where
    'src: 'slice,
    T: core::str::FromStr,
{
    move |input: &mut Input<'src, 'slice>| {
        match optional_kind(TokenKind::Integer).parse_next(input)? {
            Some(token) => parse_integer::<T>(&token)
                .map(Some)
                .map_err(ErrMode::Cut),
            None => Ok(None),
        }
    }
}

/// Takes the next token if it has `kind`; anything else is left in place.
fn optional_kind<'src, 'slice>(
    kind: TokenKind,
) -> impl Parser<Input<'src, 'slice>, Option<Token<'src>>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(Some(token.clone()))
        }
        _ => Ok(None),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_integer<'a, T: core::str::FromStr>(token: &Token<'a>) -> Result<T, GrammarError<'a>> {
    token
        .lexeme
        .parse::<T>()
        .map_err(|_| GrammarError::invalid_integer(token))
}
