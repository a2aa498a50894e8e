//! Incremental, re-entrant XML parser.
//!
//! The parser consumes a document one decoded character at a time and keeps
//! every piece of in-flight text (tag names, attribute names and values,
//! element content) in a single byte arena governed by a caller-controlled
//! budget. One stack frame exists per currently-open element; popping a frame
//! truncates the arena back to the frame's start, so text spans of popped
//! frames are gone, exactly like the stack discipline of the original format.
//!
//! Re-entry contract:
//! - [`ParseCode::NeedMoreInput`]: the current chunk is exhausted. Call
//!   [`Parser::parse`] again with the *next* chunk of the same document.
//! - [`ParseCode::NeedMoreMemory`]: appending would exceed the budget. No
//!   state was modified; raise the budget with [`Parser::grow`] and call
//!   [`Parser::parse`] again with the *same* chunk.
//! - Any other code: an event was produced; call again with the same chunk.
//!
//! Fatal errors are sticky: once returned, every further call returns the
//! same error.

use crate::error::{Error, Result};

use super::encoding::{self, Decoded, Encoding};

/// Outcome of one [`Parser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseCode {
    /// The root element was closed; parsing is done.
    DocumentEnd,
    /// An element began and its name is available. For an element whose name
    /// is followed by whitespace this fires before any attributes are known.
    ElementBegin,
    /// An element closed (`</tag>` or `<tag/>`); name and accumulated
    /// content are available.
    ElementEnd,
    /// One attribute's name and value are available, right after its closing
    /// quote.
    Attribute,
    /// A processing instruction began and its target is available.
    ProcessingInstructionBegin,
    /// A processing instruction ended and its content is available.
    ProcessingInstructionEnd,
    /// The current chunk is exhausted mid-document; supply the next chunk.
    NeedMoreInput,
    /// The memory budget is exhausted; grow it and retry the same chunk.
    NeedMoreMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Utf8Bom1,
    Utf8Bom2,
    Utf16BeBom,
    Utf16LeBom,
    TagBegin,
    ElementName,
    ElementNameGap,
    AttributeName,
    AttributeNameGap,
    AttributeAssignment,
    AttributeValue,
    OpenTag,
    CommentCdataOrDoctype,
    CommentBegin,
    Comment,
    CommentEnd1,
    CommentEnd2,
    CdataMatch(u8),
    CdataContent,
    CdataEnd1,
    CdataEnd2,
    ReferenceBegin,
    ReferenceEntity,
    ReferenceNumeric,
    ReferenceHex,
    PiBegin,
    PiTarget,
    PiContent,
    PiEnd,
    DoctypeMatch(u8),
    DoctypeGap,
    DoctypeName,
    DoctypeContent,
    DoctypeBracket,
    Done,
}

/// Cleanup action deferred to the next `parse` call so the caller can still
/// read the just-emitted event's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostState {
    None,
    /// Pop the finished element (close tag, empty element, or PI).
    TagEnd,
    /// Remove the last attribute's name and value from the arena.
    AttributeEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Entity,
    Numeric,
    Hex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FatalKind {
    Syntax,
    TagMismatch,
    Encoding,
    MisplacedDeclaration,
    Internal,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct Frame {
    /// Arena offset where this frame's text begins; popping truncates here.
    text_start: usize,
    /// Length of the tag name, which is always the first text of the frame.
    tag_len: usize,
    end_tag: bool,
    empty: bool,
    pi: bool,
    double_quote: bool,
    begun: bool,
}

const FRAME_COST: usize = std::mem::size_of::<Frame>();

/// Default memory budget in bytes. Enough for typical documents; callers
/// that stream huge inline payloads grow it on demand.
pub const DEFAULT_BUDGET: usize = 16 * 1024;

enum Step {
    Continue,
    Event(ParseCode),
    NeedMemory,
}

/// The incremental parser. One instance parses exactly one document; nested
/// documents get their own instance.
#[derive(Debug)]
pub struct Parser {
    state: State,
    post: PostState,
    /// State to resume after a comment or reference finishes.
    return_state: State,
    reference_kind: ReferenceKind,
    fatal: Option<(FatalKind, u32, u32)>,

    encoding: Encoding,
    line: u32,
    column: u32,
    depth: u32,
    pending_depth: i32,
    /// Which character increments `line`; `\r\n` files count once.
    newline: Option<char>,

    frames: Vec<Frame>,
    arena: Vec<u8>,
    budget: usize,

    cursor: usize,
    awaiting_chunk: bool,
    carry: [u8; 4],
    carry_len: usize,

    cur_tag: Option<Span>,
    cur_attr: Option<Span>,
    cur_value: Option<Span>,
    cur_content: Option<Span>,
    attr_start: usize,
    value_start: usize,
    reference_start: usize,
    pi_content_start: Option<usize>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser with the default memory budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET)
    }

    /// Create a parser whose arena and frame stack may use at most `budget`
    /// bytes. When an append would exceed the budget the parser returns
    /// [`ParseCode::NeedMoreMemory`] without touching any state.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Parser {
            state: State::Start,
            post: PostState::None,
            return_state: State::Start,
            reference_kind: ReferenceKind::Entity,
            fatal: None,
            encoding: Encoding::Unknown,
            line: 1,
            column: 0,
            depth: 0,
            pending_depth: 0,
            newline: None,
            frames: Vec::new(),
            arena: Vec::new(),
            budget,
            cursor: 0,
            awaiting_chunk: false,
            carry: [0; 4],
            carry_len: 0,
            cur_tag: None,
            cur_attr: None,
            cur_value: None,
            cur_content: None,
            attr_start: 0,
            value_start: 0,
            reference_start: 0,
            pi_content_start: None,
        }
    }

    /// Raise the memory budget. Parsing state is untouched; the next
    /// [`Parser::parse`] call resumes from the same input position.
    pub fn grow(&mut self, budget: usize) {
        if budget > self.budget {
            self.budget = budget;
        }
    }

    /// Current memory budget in bytes.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Name of the open or just-closed tag, or PI target.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.span_str(self.cur_tag)
    }

    /// Name of the current attribute.
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        self.span_str(self.cur_attr)
    }

    /// Value of the current attribute.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.span_str(self.cur_value)
    }

    /// Accumulated content of the just-closed element or PI.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.span_str(self.cur_content)
    }

    /// Line currently being parsed (1-based).
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Column of the last parsed character on the current line.
    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Element nesting depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Detected document encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn span_str(&self, span: Option<Span>) -> Option<&str> {
        let span = span?;
        std::str::from_utf8(self.arena.get(span.start..span.end)?).ok()
    }

    /// Begin or continue parsing. See the module docs for the re-entry
    /// contract governing `chunk`.
    ///
    /// # Errors
    ///
    /// Returns the fatal parser conditions of the format: syntax errors,
    /// close-tag mismatches, encoding contradictions, misplaced declarations,
    /// and internal invariant violations. All are sticky.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<ParseCode> {
        if let Some(fatal) = self.fatal {
            return Err(self.fatal_error(fatal));
        }
        if self.state == State::Done {
            return Ok(ParseCode::DocumentEnd);
        }

        self.depth = self.depth.saturating_add_signed(self.pending_depth);
        self.pending_depth = 0;

        if self.post_cleanup() {
            self.state = State::Done;
            return Ok(ParseCode::DocumentEnd);
        }

        if self.awaiting_chunk {
            self.cursor = 0;
            self.awaiting_chunk = false;
        }

        loop {
            // Half the states assume an open frame; reaching one of them with
            // an empty stack means the machine itself is broken.
            if self.frames.is_empty() && self.needs_frame() {
                return Err(self.fail(FatalKind::Internal));
            }

            // The pre-document states consume raw bytes so byte-order marks
            // can be recognized before any character decoding applies.
            if let Some(code) = self.bom_step(chunk)? {
                match code {
                    Some(c) => return Ok(c),
                    None => continue,
                }
            }

            let (c, len) = match self.next_char(chunk) {
                CharRead::Char { c, len } => (c, len),
                CharRead::NeedInput => return Ok(ParseCode::NeedMoreInput),
                CharRead::Invalid => return Err(self.fail(FatalKind::Syntax)),
            };

            match self.step(c)? {
                Step::NeedMemory => return Ok(ParseCode::NeedMoreMemory),
                Step::Continue => {
                    self.consume(c, len);
                }
                Step::Event(code) => {
                    self.consume(c, len);
                    return Ok(code);
                }
            }
        }
    }

    fn needs_frame(&self) -> bool {
        matches!(
            self.state,
            State::TagBegin
                | State::ElementName
                | State::ElementNameGap
                | State::AttributeName
                | State::AttributeNameGap
                | State::AttributeAssignment
                | State::AttributeValue
                | State::OpenTag
                | State::ReferenceBegin
                | State::ReferenceEntity
                | State::ReferenceNumeric
                | State::ReferenceHex
        )
    }

    /// Handle the BOM-detection states on raw bytes. Returns `Ok(None)` when
    /// the current state is not a raw-byte state.
    fn bom_step(&mut self, chunk: &[u8]) -> Result<Option<Option<ParseCode>>> {
        let looking_at_bom = match self.state {
            State::Start => {
                matches!(chunk.get(self.cursor).copied(), Some(0xEF | 0xFE | 0xFF))
            }
            State::Utf8Bom1 | State::Utf8Bom2 | State::Utf16BeBom | State::Utf16LeBom => true,
            _ => false,
        };
        if !looking_at_bom {
            return Ok(None);
        }
        let Some(&byte) = chunk.get(self.cursor) else {
            self.awaiting_chunk = true;
            return Ok(Some(Some(ParseCode::NeedMoreInput)));
        };
        match (self.state, byte) {
            (State::Start, 0xEF) => self.state = State::Utf8Bom1,
            (State::Start, 0xFE) => self.state = State::Utf16BeBom,
            (State::Start, 0xFF) => self.state = State::Utf16LeBom,
            (State::Utf8Bom1, 0xBB) => self.state = State::Utf8Bom2,
            (State::Utf8Bom2, 0xBF) => {
                self.state = State::Start;
                self.encoding = Encoding::Utf8;
            }
            (State::Utf16BeBom, 0xFF) => {
                self.state = State::Start;
                self.encoding = Encoding::Utf16Be;
            }
            (State::Utf16LeBom, 0xFE) => {
                self.state = State::Start;
                self.encoding = Encoding::Utf16Le;
            }
            _ => return Err(self.fail(FatalKind::Syntax)),
        }
        self.cursor += 1;
        Ok(Some(None))
    }

    fn next_char(&mut self, chunk: &[u8]) -> CharRead {
        let avail = chunk.get(self.cursor..).unwrap_or(&[]);
        if self.carry_len == 0 {
            if avail.is_empty() {
                self.awaiting_chunk = true;
                return CharRead::NeedInput;
            }
            match encoding::decode(avail, self.encoding) {
                Decoded::Char { c, len } => CharRead::Char { c, len },
                Decoded::Incomplete => {
                    // The character's bytes are split across chunks; stash
                    // what we have and ask for more.
                    let n = avail.len().min(4);
                    self.carry[..n].copy_from_slice(&avail[..n]);
                    self.carry_len = n;
                    self.cursor = chunk.len();
                    self.awaiting_chunk = true;
                    CharRead::NeedInput
                }
                Decoded::Invalid => CharRead::Invalid,
            }
        } else {
            let mut buf = [0u8; 8];
            buf[..self.carry_len].copy_from_slice(&self.carry[..self.carry_len]);
            let take = avail.len().min(4);
            buf[self.carry_len..self.carry_len + take].copy_from_slice(&avail[..take]);
            match encoding::decode(&buf[..self.carry_len + take], self.encoding) {
                Decoded::Char { c, len } => CharRead::Char { c, len },
                Decoded::Incomplete if take == avail.len() => {
                    self.carry[self.carry_len..self.carry_len + take]
                        .copy_from_slice(&avail[..take]);
                    self.carry_len += take;
                    self.cursor = chunk.len();
                    self.awaiting_chunk = true;
                    CharRead::NeedInput
                }
                _ => CharRead::Invalid,
            }
        }
    }

    /// Commit one decoded character: advance the cursor and the position
    /// counters. Only called after its state action succeeded, so a
    /// [`ParseCode::NeedMoreMemory`] return leaves the exact input position.
    fn consume(&mut self, c: char, len: usize) {
        self.cursor += len - self.carry_len;
        self.carry_len = 0;
        if c == '\n' || c == '\r' {
            let newline = *self.newline.get_or_insert(c);
            if c == newline {
                self.line += 1;
            }
            self.column = 0;
        } else {
            self.column += 1;
        }
    }

    fn fail(&mut self, kind: FatalKind) -> Error {
        let err = self.fatal_error((kind, self.line, self.column));
        self.fatal = Some((kind, self.line, self.column));
        err
    }

    fn fatal_error(&self, (kind, line, column): (FatalKind, u32, u32)) -> Error {
        match kind {
            FatalKind::Syntax => Error::XmlSyntax { line, column },
            FatalKind::TagMismatch => Error::TagMismatch { line, column },
            FatalKind::Encoding => Error::EncodingConflict { line, column },
            FatalKind::MisplacedDeclaration => Error::MisplacedDeclaration { line, column },
            FatalKind::Internal => Error::ParserInternal { line, column },
        }
    }

    // ---- arena / frame helpers ------------------------------------------

    fn used(&self) -> usize {
        self.arena.len() + self.frames.len() * FRAME_COST
    }

    fn push_frame(&mut self) -> bool {
        if self.used() + FRAME_COST > self.budget {
            return false;
        }
        self.frames.push(Frame {
            text_start: self.arena.len(),
            tag_len: 0,
            end_tag: false,
            empty: false,
            pi: false,
            double_quote: false,
            begun: false,
        });
        true
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.arena.truncate(frame.text_start);
        }
        self.cur_tag = None;
        self.cur_attr = None;
        self.cur_value = None;
        self.cur_content = None;
    }

    fn append(&mut self, c: char) -> bool {
        let (bytes, len) = encoding::encode(c, Encoding::Utf8);
        if self.used() + len > self.budget {
            return false;
        }
        self.arena.extend_from_slice(&bytes[..len]);
        true
    }

    fn top(&self) -> &Frame {
        // Guarded by `needs_frame` before every state action.
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn top_tag_span(&self) -> Span {
        let top = self.top();
        Span {
            start: top.text_start,
            end: top.text_start + top.tag_len,
        }
    }

    fn tag_of(&self, frame: &Frame) -> &[u8] {
        &self.arena[frame.text_start..frame.text_start + frame.tag_len]
    }

    // ---- state machine ---------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, c: char) -> Result<Step> {
        let cp = u32::from(c);
        match self.state {
            State::Start => {
                if c == '<' {
                    return self.begin_tag();
                } else if !is_whitespace(c) {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::Utf8Bom1
            | State::Utf8Bom2
            | State::Utf16BeBom
            | State::Utf16LeBom
            | State::Done => {
                // Raw-byte states are handled before decoding; Done short-
                // circuits at the top of parse().
                return Err(self.fail(FatalKind::Internal));
            }
            State::TagBegin => {
                if c == '?' {
                    self.state = State::PiBegin;
                    self.top_mut().pi = true;
                } else if c == '/' {
                    self.top_mut().end_tag = true;
                } else if c == '!' {
                    self.state = State::CommentCdataOrDoctype;
                } else if is_name_start(cp) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.top_mut().tag_len = c.len_utf8();
                    self.state = State::ElementName;
                    self.cur_tag = Some(self.top_tag_span());
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::ElementName => {
                if c == '>' {
                    return self.end_tag().map(Step::Event);
                } else if c == '/' {
                    if self.top().end_tag {
                        return Err(self.fail(FatalKind::Syntax));
                    }
                    self.top_mut().empty = true;
                    self.state = State::ElementNameGap;
                    self.top_mut().begun = true;
                    self.cur_tag = Some(self.top_tag_span());
                    return Ok(Step::Event(ParseCode::ElementBegin));
                } else if is_whitespace(c) {
                    self.state = State::ElementNameGap;
                    if self.top().end_tag {
                        // `</tag >` carries no attributes and already had its
                        // begin event when the element opened.
                        return Ok(Step::Continue);
                    }
                    self.top_mut().begun = true;
                    self.cur_tag = Some(self.top_tag_span());
                    return Ok(Step::Event(ParseCode::ElementBegin));
                } else if is_name_char(cp) {
                    if self.top().empty {
                        return Err(self.fail(FatalKind::Syntax));
                    }
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.top_mut().tag_len += c.len_utf8();
                    self.cur_tag = Some(self.top_tag_span());
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::ElementNameGap => {
                if c == '>' {
                    let top = self.top();
                    if top.begun && !top.empty && !top.end_tag {
                        // The begin event already fired when whitespace ended
                        // the name; finish the open tag without yielding.
                        let _ = self.end_tag()?;
                        if self.post_cleanup() {
                            self.state = State::Done;
                            return Ok(Step::Event(ParseCode::DocumentEnd));
                        }
                    } else {
                        return self.end_tag().map(Step::Event);
                    }
                } else if c == '/' {
                    if self.top().end_tag {
                        return Err(self.fail(FatalKind::Syntax));
                    }
                    self.top_mut().empty = true;
                } else if is_name_start(cp) {
                    if self.top().end_tag || self.top().empty {
                        return Err(self.fail(FatalKind::Syntax));
                    }
                    self.attr_start = self.arena.len();
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.state = State::AttributeName;
                } else if !is_whitespace(c) {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::AttributeName => {
                if c == '=' {
                    self.finish_attr_name();
                    self.state = State::AttributeAssignment;
                } else if is_name_char(cp) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else if is_whitespace(c) {
                    self.finish_attr_name();
                    self.state = State::AttributeNameGap;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::AttributeNameGap => {
                if c == '=' {
                    self.state = State::AttributeAssignment;
                } else if !is_whitespace(c) {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::AttributeAssignment => {
                if c == '"' || c == '\'' {
                    self.top_mut().double_quote = c == '"';
                    self.value_start = self.arena.len();
                    self.state = State::AttributeValue;
                } else if !is_whitespace(c) {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::AttributeValue => {
                let closing = if self.top().double_quote { '"' } else { '\'' };
                if c == closing {
                    self.cur_value = Some(Span {
                        start: self.value_start,
                        end: self.arena.len(),
                    });
                    self.state = State::ElementNameGap;
                    self.post = PostState::AttributeEnd;
                    return Ok(Step::Event(ParseCode::Attribute));
                } else if c == '&' {
                    self.return_state = State::AttributeValue;
                    self.reference_start = self.arena.len();
                    self.state = State::ReferenceBegin;
                } else if is_char_data(c) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::OpenTag => {
                if c == '<' {
                    return self.begin_tag();
                } else if c == '&' {
                    self.return_state = State::OpenTag;
                    self.reference_start = self.arena.len();
                    self.state = State::ReferenceBegin;
                } else if is_char_data(c) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::CommentCdataOrDoctype => {
                if c == '-' {
                    // `<!` pushed a frame for what is now a comment; undo it.
                    self.pop_frame();
                    self.state = State::CommentBegin;
                } else if c == '[' {
                    self.pop_frame();
                    self.state = State::CdataMatch(0);
                } else if c == 'D' {
                    if self.return_state != State::Start {
                        return Err(self.fail(FatalKind::MisplacedDeclaration));
                    }
                    self.pop_frame();
                    self.state = State::DoctypeMatch(0);
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::CommentBegin => {
                if c == '-' {
                    self.state = State::Comment;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::Comment => {
                if c == '-' {
                    self.state = State::CommentEnd1;
                }
            }
            State::CommentEnd1 => {
                self.state = if c == '-' {
                    State::CommentEnd2
                } else {
                    State::Comment
                };
            }
            State::CommentEnd2 => {
                // `--` may only appear as part of the `-->` terminator.
                if c == '>' {
                    self.state = self.return_state;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::CdataMatch(i) => {
                const KEYWORD: &[u8] = b"CDATA[";
                if cp == u32::from(KEYWORD[usize::from(i)]) {
                    self.state = if usize::from(i) + 1 == KEYWORD.len() {
                        State::CdataContent
                    } else {
                        State::CdataMatch(i + 1)
                    };
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::CdataContent => {
                if !self.append(c) {
                    return Ok(Step::NeedMemory);
                }
                if c == ']' {
                    self.state = State::CdataEnd1;
                }
            }
            State::CdataEnd1 => {
                if !self.append(c) {
                    return Ok(Step::NeedMemory);
                }
                self.state = if c == ']' {
                    State::CdataEnd2
                } else {
                    State::CdataContent
                };
            }
            State::CdataEnd2 => {
                if c == '>' {
                    // The two `]` bytes were appended speculatively because
                    // the section might not have been ending; trim them.
                    self.arena.truncate(self.arena.len() - 2);
                    self.state = State::OpenTag;
                } else {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.state = if c == ']' {
                        // `]]]`: the first `]` was content, still two live
                        // candidates for the terminator.
                        State::CdataEnd2
                    } else {
                        State::CdataContent
                    };
                }
            }
            State::ReferenceBegin => {
                if c == '#' {
                    self.state = State::ReferenceNumeric;
                } else if matches!(c, 'a' | 'g' | 'l' | 'q') {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.state = State::ReferenceEntity;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::ReferenceEntity => {
                if c == ';' {
                    self.reference_kind = ReferenceKind::Entity;
                    return self.end_reference();
                } else if c.is_ascii_graphic() {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::ReferenceNumeric => {
                if c == 'x' {
                    self.state = State::ReferenceHex;
                } else if c == ';' {
                    self.reference_kind = ReferenceKind::Numeric;
                    return self.end_reference();
                } else if c.is_ascii_digit() {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::ReferenceHex => {
                if c == ';' {
                    self.reference_kind = ReferenceKind::Hex;
                    return self.end_reference();
                } else if c.is_ascii_hexdigit() {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::PiBegin => {
                if is_name_start(cp) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.top_mut().tag_len = c.len_utf8();
                    self.cur_tag = Some(self.top_tag_span());
                    self.state = State::PiTarget;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::PiTarget => {
                if is_whitespace(c) {
                    // `<?xml?>` must precede the root element.
                    if self.is_xml_declaration() && self.frames.len() > 1 {
                        return Err(self.fail(FatalKind::MisplacedDeclaration));
                    }
                    self.state = State::PiContent;
                    self.cur_tag = Some(self.top_tag_span());
                    return Ok(Step::Event(ParseCode::ProcessingInstructionBegin));
                } else if c == '?' {
                    self.state = State::PiEnd;
                } else if is_name_char(cp) {
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.top_mut().tag_len += c.len_utf8();
                    self.cur_tag = Some(self.top_tag_span());
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::PiContent => {
                if c == '?' {
                    self.check_encoding_declaration()?;
                    self.state = State::PiEnd;
                } else {
                    if self.pi_content_start.is_none() {
                        self.pi_content_start = Some(self.arena.len());
                    }
                    if !self.append(c) {
                        return Ok(Step::NeedMemory);
                    }
                    self.cur_content = Some(Span {
                        start: self.pi_content_start.unwrap_or(self.arena.len()),
                        end: self.arena.len(),
                    });
                }
            }
            State::PiEnd => {
                if c == '>' {
                    return self.end_tag().map(Step::Event);
                }
                return Err(self.fail(FatalKind::Syntax));
            }
            State::DoctypeMatch(i) => {
                const KEYWORD: &[u8] = b"OCTYPE";
                if cp == u32::from(KEYWORD[usize::from(i)]) {
                    self.state = if usize::from(i) + 1 == KEYWORD.len() {
                        State::DoctypeGap
                    } else {
                        State::DoctypeMatch(i + 1)
                    };
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::DoctypeGap => {
                if is_whitespace(c) {
                    self.state = State::DoctypeName;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::DoctypeName => {
                if c == '>' {
                    self.state = State::Start;
                } else if c == '[' {
                    self.state = State::DoctypeBracket;
                } else if is_whitespace(c) || is_name_char(cp) {
                    // The declaration's name and external identifiers are
                    // skipped, the same as comments.
                } else if is_char_data(c) {
                    self.state = State::DoctypeContent;
                } else {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::DoctypeContent => {
                if c == '[' {
                    self.state = State::DoctypeBracket;
                } else if c == '>' {
                    self.state = State::Start;
                } else if !is_char_data(c) {
                    return Err(self.fail(FatalKind::Syntax));
                }
            }
            State::DoctypeBracket => {
                // Markup declarations may appear between the brackets; allow
                // anything until the closing bracket.
                if c == ']' {
                    self.state = State::DoctypeContent;
                }
            }
        }
        Ok(Step::Continue)
    }

    fn begin_tag(&mut self) -> Result<Step> {
        if !self.push_frame() {
            return Ok(Step::NeedMemory);
        }
        self.return_state = self.state;
        self.state = State::TagBegin;
        Ok(Step::Continue)
    }

    fn finish_attr_name(&mut self) {
        self.cur_attr = Some(Span {
            start: self.attr_start,
            end: self.arena.len(),
        });
    }

    /// A tag just finished (`>` of an open, close, or empty tag, or `?>` of
    /// a PI). Decide which event it produces.
    fn end_tag(&mut self) -> Result<ParseCode> {
        self.state = State::OpenTag;
        self.post = PostState::TagEnd;
        let top_index = self.frames.len() - 1;
        if self.frames[top_index].end_tag {
            let matches = top_index > 0 && {
                let close = &self.frames[top_index];
                let open = &self.frames[top_index - 1];
                self.tag_of(close) == self.tag_of(open)
            };
            if !matches {
                return Err(self.fail(FatalKind::TagMismatch));
            }
            self.pop_frame();
            let open_tag = self.top_tag_span();
            self.cur_tag = Some(open_tag);
            self.cur_content = Some(Span {
                start: open_tag.end,
                end: self.arena.len(),
            });
            self.pending_depth -= 1;
            return Ok(ParseCode::ElementEnd);
        }
        if self.frames[top_index].empty {
            self.cur_tag = Some(self.top_tag_span());
            return Ok(ParseCode::ElementEnd);
        }
        if self.frames[top_index].pi {
            self.cur_tag = Some(self.top_tag_span());
            return Ok(ParseCode::ProcessingInstructionEnd);
        }
        // A plain open tag; a matching close tag is expected later.
        self.post = PostState::None;
        self.pending_depth += 1;
        self.cur_tag = Some(self.top_tag_span());
        Ok(ParseCode::ElementBegin)
    }

    /// Replace the accumulated reference text with the character it denotes
    /// and resume the state active before the `&`.
    fn end_reference(&mut self) -> Result<Step> {
        let text = std::str::from_utf8(&self.arena[self.reference_start..])
            .unwrap_or("")
            .to_owned();
        let c = match self.reference_kind {
            ReferenceKind::Entity => match text.as_str() {
                "lt" => '<',
                "gt" => '>',
                "amp" => '&',
                "apos" => '\'',
                "quot" => '"',
                _ => return Err(self.fail(FatalKind::Syntax)),
            },
            ReferenceKind::Numeric | ReferenceKind::Hex => {
                let radix = if self.reference_kind == ReferenceKind::Hex {
                    16
                } else {
                    10
                };
                match u32::from_str_radix(&text, radix).ok().filter(|&v| v != 0) {
                    Some(value) => match char::from_u32(value) {
                        Some(c) => c,
                        None => return Err(self.fail(FatalKind::Syntax)),
                    },
                    None => return Err(self.fail(FatalKind::Syntax)),
                }
            }
        };
        // The decoded character is never longer than the reference text it
        // replaces, so this cannot exceed the budget.
        self.arena.truncate(self.reference_start);
        let _ = self.append(c);
        self.state = self.return_state;
        self.return_state = State::Start;
        Ok(Step::Continue)
    }

    fn is_xml_declaration(&self) -> bool {
        let top = self.top();
        top.pi && self.tag_of(top).eq_ignore_ascii_case(b"xml")
    }

    /// On `?` ending a PI's content: if the content carries an encoding
    /// declaration, reconcile it with what the BOM established.
    fn check_encoding_declaration(&mut self) -> Result<()> {
        let declared = match self.content().and_then(declared_encoding) {
            Some(declared) => declared.to_owned(),
            None => return Ok(()),
        };
        match self.encoding {
            Encoding::Unknown => {
                if declared.eq_ignore_ascii_case("UTF-8") {
                    self.encoding = Encoding::Utf8;
                } else if declared.eq_ignore_ascii_case("UTF-16") {
                    // UTF-16 requires a byte-order mark; none was seen.
                    return Err(self.fail(FatalKind::Encoding));
                }
            }
            Encoding::Utf8 => {
                if !declared.eq_ignore_ascii_case("UTF-8") {
                    return Err(self.fail(FatalKind::Encoding));
                }
            }
            Encoding::Utf16Le | Encoding::Utf16Be => {
                if !declared.eq_ignore_ascii_case("UTF-16") {
                    return Err(self.fail(FatalKind::Encoding));
                }
            }
        }
        Ok(())
    }

    /// Run the cleanup deferred from the previous event. Returns true when
    /// the cleanup discovered the document has ended.
    fn post_cleanup(&mut self) -> bool {
        match self.post {
            PostState::None => false,
            PostState::TagEnd => {
                self.post = PostState::None;
                let was_declaration = !self.frames.is_empty() && self.is_xml_declaration();
                self.pi_content_start = None;
                self.pop_frame();
                if was_declaration {
                    // The document declaration parses like a PI but leaves
                    // the parser back at its initial state.
                    self.state = State::Start;
                    return false;
                }
                self.frames.is_empty()
            }
            PostState::AttributeEnd => {
                self.post = PostState::None;
                // The attribute's name and value are transient; removing them
                // keeps the element's content contiguous after its tag.
                self.arena.truncate(self.attr_start);
                self.cur_attr = None;
                self.cur_value = None;
                false
            }
        }
    }
}

enum CharRead {
    Char { c: char, len: usize },
    NeedInput,
    Invalid,
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn is_char_data(c: char) -> bool {
    c != '<' && c != '&'
}

fn is_name_start(cp: u32) -> bool {
    (cp >= u32::from(b'a') && cp <= u32::from(b'z'))
        || (cp >= u32::from(b'A') && cp <= u32::from(b'Z'))
        || cp == u32::from(b':')
        || cp == u32::from(b'_')
        || (0xC0..=0xD6).contains(&cp)
        || (0xD8..=0xF6).contains(&cp)
        || cp >= 0xF8
}

fn is_name_char(cp: u32) -> bool {
    is_name_start(cp)
        || cp == u32::from(b'-')
        || cp == u32::from(b'.')
        || (cp >= u32::from(b'0') && cp <= u32::from(b'9'))
}

/// Pull the value of an `encoding="..."` pseudo-attribute out of a document
/// declaration's content, if present.
fn declared_encoding(content: &str) -> Option<&str> {
    let idx = content.find("encoding=")?;
    let rest = &content[idx + "encoding=".len()..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Event {
        code: ParseCode,
        tag: Option<String>,
        attribute: Option<String>,
        value: Option<String>,
        content: Option<String>,
    }

    fn snapshot(parser: &Parser, code: ParseCode) -> Event {
        Event {
            code,
            tag: parser.tag().map(str::to_owned),
            attribute: parser.attribute().map(str::to_owned),
            value: parser.value().map(str::to_owned),
            content: parser.content().map(str::to_owned),
        }
    }

    /// Feed `doc` in chunks of `chunk_size` bytes with the given starting
    /// budget, growing on demand, and collect every event.
    fn run(doc: &[u8], chunk_size: usize, budget: usize) -> Result<Vec<Event>> {
        let mut parser = Parser::with_budget(budget);
        let mut events = Vec::new();
        let mut chunks = doc.chunks(chunk_size);
        let mut chunk = chunks.next().unwrap_or(&[]);
        loop {
            match parser.parse(chunk)? {
                ParseCode::NeedMoreInput => match chunks.next() {
                    Some(next) => chunk = next,
                    None => return Err(Error::UnexpectedEof),
                },
                ParseCode::NeedMoreMemory => {
                    let budget = parser.budget();
                    parser.grow(budget * 2);
                }
                ParseCode::DocumentEnd => return Ok(events),
                code => events.push(snapshot(&parser, code)),
            }
        }
    }

    fn run_whole(doc: &str) -> Result<Vec<Event>> {
        run(doc.as_bytes(), usize::MAX, DEFAULT_BUDGET)
    }

    #[test]
    fn elements_attributes_and_content() {
        let events =
            run_whole(r#"<map width="4"><layer name="g round"></layer>text</map>"#).unwrap();
        let codes: Vec<ParseCode> = events.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                ParseCode::ElementBegin,
                ParseCode::Attribute,
                ParseCode::ElementBegin,
                ParseCode::Attribute,
                ParseCode::ElementEnd,
                ParseCode::ElementEnd,
            ]
        );
        assert_eq!(events[0].tag.as_deref(), Some("map"));
        assert_eq!(events[1].attribute.as_deref(), Some("width"));
        assert_eq!(events[1].value.as_deref(), Some("4"));
        assert_eq!(events[3].attribute.as_deref(), Some("name"));
        assert_eq!(events[3].value.as_deref(), Some("g round"));
        assert_eq!(events[4].tag.as_deref(), Some("layer"));
        assert_eq!(events[4].content.as_deref(), Some(""));
        assert_eq!(events[5].tag.as_deref(), Some("map"));
        assert_eq!(events[5].content.as_deref(), Some("text"));
    }

    #[test]
    fn empty_element_yields_begin_and_end() {
        let events = run_whole("<a><b/></a>").unwrap();
        let codes: Vec<ParseCode> = events.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                ParseCode::ElementBegin,
                ParseCode::ElementBegin,
                ParseCode::ElementEnd,
                ParseCode::ElementEnd,
            ]
        );
        // An empty element has no content, as opposed to the empty string.
        assert_eq!(events[2].content, None);
    }

    #[test]
    fn entity_and_numeric_references() {
        let events = run_whole(r#"<a q="&quot;x&quot;">&lt;&#65;&#x42;&amp;</a>"#).unwrap();
        assert_eq!(events[1].value.as_deref(), Some("\"x\""));
        assert_eq!(events[2].content.as_deref(), Some("<AB&"));
    }

    #[test]
    fn cdata_verbatim_with_speculative_brackets() {
        let events = run_whole("<a><![CDATA[x ]] <&> y]]></a>").unwrap();
        assert_eq!(events[1].content.as_deref(), Some("x ]] <&> y"));
    }

    #[test]
    fn comments_are_skipped_everywhere() {
        let events = run_whole("<!-- pre --><a>x<!-- mid -->y</a>").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].content.as_deref(), Some("xy"));
    }

    #[test]
    fn processing_instruction_and_declaration() {
        let events = run_whole("<?xml version=\"1.0\"?><a><?php echo?></a>").unwrap();
        let codes: Vec<ParseCode> = events.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                ParseCode::ProcessingInstructionBegin,
                ParseCode::ProcessingInstructionEnd,
                ParseCode::ElementBegin,
                ParseCode::ProcessingInstructionBegin,
                ParseCode::ProcessingInstructionEnd,
                ParseCode::ElementEnd,
            ]
        );
        assert_eq!(events[0].tag.as_deref(), Some("xml"));
        assert_eq!(events[3].tag.as_deref(), Some("php"));
        assert_eq!(events[4].content.as_deref(), Some("echo"));
    }

    #[test]
    fn doctype_before_root_is_skipped() {
        let events = run_whole("<!DOCTYPE map [ <!ELEMENT map ANY> ]><map></map>").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag.as_deref(), Some("map"));
    }

    #[test]
    fn doctype_after_root_is_fatal() {
        let err = run_whole("<map><!DOCTYPE map></map>").unwrap_err();
        assert!(matches!(err, Error::MisplacedDeclaration { .. }));
    }

    #[test]
    fn doctype_requires_exact_keyword() {
        let err = run_whole("<!DOCTIPE map><map/>").unwrap_err();
        assert!(matches!(err, Error::XmlSyntax { .. }));
    }

    #[test]
    fn tag_mismatch_reports_offending_line() {
        let err = run_whole("<a>\n<b>\n</a>\n</b>").unwrap_err();
        match err {
            Error::TagMismatch { line, .. } => assert_eq!(line, 3),
            other => panic!("expected tag mismatch, got {other:?}"),
        }
    }

    #[test]
    fn mismatch_is_sticky() {
        let mut parser = Parser::new();
        let doc = b"<a></b>";
        let mut last = None;
        for _ in 0..3 {
            last = Some(parser.parse(doc));
        }
        assert!(matches!(last, Some(Err(Error::TagMismatch { .. }))));
    }

    #[test]
    fn chunking_invariance() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.10" width="2">
  <!-- a comment -->
  <layer name="&quot;x&quot;"><data encoding="csv">1,2,
3,4</data></layer>
</map>"#;
        let whole = run(doc.as_bytes(), usize::MAX, DEFAULT_BUDGET).unwrap();
        for chunk_size in [1, 2, 3, 5, 7, 16, 64] {
            let chunked = run(doc.as_bytes(), chunk_size, DEFAULT_BUDGET).unwrap();
            assert_eq!(whole, chunked, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn buffer_growth_invariance() {
        let doc = r#"<map name="growth"><layer><data>0,1,2,3,4,5,6,7</data></layer></map>"#;
        let comfortable = run(doc.as_bytes(), usize::MAX, DEFAULT_BUDGET).unwrap();
        // Small enough to force several NeedMoreMemory round trips, large
        // enough to hold one frame.
        let cramped = run(doc.as_bytes(), usize::MAX, FRAME_COST + 8).unwrap();
        assert_eq!(comfortable, cramped);
        // And with chunked input at the same time.
        let both = run(doc.as_bytes(), 3, FRAME_COST + 8).unwrap();
        assert_eq!(comfortable, both);
    }

    #[test]
    fn utf16le_bom_matches_utf8_form() {
        let utf8_doc = r#"<map name="héllo">wörld</map>"#;
        let expected = run_whole(utf8_doc).unwrap();

        let mut utf16: Vec<u8> = vec![0xFF, 0xFE];
        for unit in utf8_doc.encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        let actual = run(&utf16, usize::MAX, DEFAULT_BUDGET).unwrap();
        assert_eq!(expected, actual);
        // Split the BOM and surrogate-free units across chunk boundaries too.
        let chunked = run(&utf16, 3, DEFAULT_BUDGET).unwrap();
        assert_eq!(expected, chunked);
    }

    #[test]
    fn utf16_declaration_without_bom_is_encoding_error() {
        let err = run_whole(r#"<?xml version="1.0" encoding="UTF-16"?><a/>"#).unwrap_err();
        assert!(matches!(err, Error::EncodingConflict { .. }));
    }

    #[test]
    fn bom_contradicting_declaration_is_encoding_error() {
        let mut doc: Vec<u8> = Vec::new();
        doc.extend_from_slice(&encoding::UTF8_BOM);
        doc.extend_from_slice(br#"<?xml version="1.0" encoding="UTF-16"?><a/>"#);
        let err = run(&doc, usize::MAX, DEFAULT_BUDGET).unwrap_err();
        assert!(matches!(err, Error::EncodingConflict { .. }));
    }

    #[test]
    fn truncated_document_reports_need_more_input() {
        let mut parser = Parser::new();
        let mut code = parser.parse(b"<map><layer").unwrap();
        while !matches!(code, ParseCode::NeedMoreInput) {
            code = parser.parse(b"<map><layer").unwrap();
        }
        assert_eq!(code, ParseCode::NeedMoreInput);
    }

    #[test]
    fn declaration_after_root_is_fatal() {
        let err = run_whole("<a><?xml version=\"1.0\"?></a>").unwrap_err();
        assert!(matches!(err, Error::MisplacedDeclaration { .. }));
    }

    #[test]
    fn nested_content_excludes_children() {
        let events = run_whole("<a>x<b>inner</b>z</a>").unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.tag.as_deref(), Some("a"));
        assert_eq!(last.content.as_deref(), Some("xz"));
    }
}
