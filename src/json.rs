//! Streaming pull parser for nested key/value documents.
//!
//! The parser works on raw bytes and validates UTF-8 itself (overlong
//! sequences, surrogate code points and anything above U+10FFFF are
//! rejected), emitting one event per call so that callers can track the
//! container context of every scalar. That context is what lets the line
//! parser replay each scalar against the specifier registered for its dotted
//! key path.

use snafu::Snafu;

/// A diagnostic from the document parser. The first failure is sticky:
/// every later [`JsonParser::next_event`] call returns the same error.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(display("{message}"))]
pub struct JsonError {
    message: String,
}

/// One parsing event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JsonEvent {
    /// `{`
    ObjectStart,
    /// `}`
    ObjectEnd,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// A string literal; the text is available from [`JsonParser::current_str`].
    String,
    /// A number literal, kept as its literal text.
    Number,
    /// The literal `true`.
    True,
    /// The literal `false`.
    False,
    /// The literal `null`.
    Null,
    /// The document is complete.
    Done,
}

/// The kind of container the parser is currently inside.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JsonContext {
    /// Inside an object.
    Object,
    /// Inside an array.
    Array,
    /// Not inside any container.
    Top,
}

/// Pull parser over a byte buffer holding one document.
#[derive(Debug)]
pub struct JsonParser<'a> {
    input: &'a [u8],
    pos: usize,
    stack: Vec<(JsonContext, usize)>,
    scratch: String,
    streaming: bool,
    ntokens: usize,
    error: Option<JsonError>,
}

fn is_space(c: u8) -> bool {
    matches!(c, b'\t' | b'\n' | b'\r' | b' ')
}

fn describe(c: Option<u8>) -> char {
    match c {
        Some(b) => b as char,
        None => '\0',
    }
}

impl<'a> JsonParser<'a> {
    /// Create a parser over `input`. Streaming mode starts enabled: trailing
    /// whitespace after the root value is tolerated.
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            stack: Vec::new(),
            scratch: String::new(),
            streaming: true,
            ntokens: 0,
            error: None,
        }
    }

    /// Toggle streaming mode. When off, any non-whitespace byte after the
    /// root value is an error.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// The text of the most recent string or number event.
    pub fn current_str(&self) -> &str {
        &self.scratch
    }

    /// The current container kind and the number of parsing events observed
    /// inside it. Within an object, an odd count means the event just
    /// returned was a member name.
    pub fn context(&self) -> (JsonContext, usize) {
        self.stack
            .last()
            .map_or((JsonContext::Top, 0), |&(kind, count)| (kind, count))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn fail(&mut self, message: String) -> JsonError {
        if self.error.is_none() {
            self.error = Some(JsonError { message: message.clone() });
        }
        self.error.clone().unwrap_or(JsonError { message })
    }

    fn next_nonspace(&mut self) -> Option<u8> {
        loop {
            match self.bump() {
                Some(c) if is_space(c) => continue,
                other => return other,
            }
        }
    }

    fn expect_literal(
        &mut self,
        rest: &'static str,
        event: JsonEvent,
    ) -> Result<JsonEvent, JsonError> {
        for expected in rest.bytes() {
            let c = self.bump();
            if c != Some(expected) {
                return Err(self.fail(format!(
                    "expected '{}' instead of byte '{}'",
                    expected as char,
                    describe(c)
                )));
            }
        }
        Ok(event)
    }

    fn read_value(&mut self, c: Option<u8>) -> Result<JsonEvent, JsonError> {
        self.ntokens += 1;
        match c {
            None => Err(self.fail("unexpected end of text".to_owned())),
            Some(b'{') => {
                self.stack.push((JsonContext::Object, 0));
                Ok(JsonEvent::ObjectStart)
            }
            Some(b'[') => {
                self.stack.push((JsonContext::Array, 0));
                Ok(JsonEvent::ArrayStart)
            }
            Some(b'"') => self.read_string(),
            Some(b'n') => self.expect_literal("ull", JsonEvent::Null),
            Some(b'f') => self.expect_literal("alse", JsonEvent::False),
            Some(b't') => self.expect_literal("rue", JsonEvent::True),
            Some(c @ (b'0'..=b'9' | b'-')) => {
                self.scratch.clear();
                self.read_number(c)
            }
            Some(c) => Err(self.fail(format!("unexpected byte '{}' in value", c as char))),
        }
    }

    fn pop(&mut self, c: u8, expected: JsonContext) -> Result<JsonEvent, JsonError> {
        match self.stack.last() {
            Some(&(kind, _)) if kind == expected => {
                self.stack.pop();
                Ok(if expected == JsonContext::Array {
                    JsonEvent::ArrayEnd
                } else {
                    JsonEvent::ObjectEnd
                })
            }
            _ => Err(self.fail(format!("unexpected byte '{}'", c as char))),
        }
    }

    fn read_string(&mut self) -> Result<JsonEvent, JsonError> {
        self.scratch.clear();
        loop {
            match self.bump() {
                None => return Err(self.fail("unterminated string literal".to_owned())),
                Some(b'"') => return Ok(JsonEvent::String),
                Some(b'\\') => self.read_escaped()?,
                Some(c) if c >= 0x80 => self.read_utf8(c)?,
                Some(c) if c < 0x20 => {
                    return Err(self.fail("unescaped control character in string".to_owned()))
                }
                Some(c) => self.scratch.push(c as char),
            }
        }
    }

    fn read_escaped(&mut self) -> Result<(), JsonError> {
        match self.bump() {
            None => Err(self.fail("unterminated string literal in escape".to_owned())),
            Some(b'u') => self.read_unicode(),
            Some(c) => {
                let decoded = match c {
                    b'\\' => '\\',
                    b'b' => '\u{0008}',
                    b'f' => '\u{000c}',
                    b'n' => '\n',
                    b'r' => '\r',
                    b't' => '\t',
                    b'/' => '/',
                    b'"' => '"',
                    other => {
                        return Err(
                            self.fail(format!("invalid escaped byte '{}'", other as char))
                        )
                    }
                };
                self.scratch.push(decoded);
                Ok(())
            }
        }
    }

    fn read_unicode_cp(&mut self) -> Result<u32, JsonError> {
        let mut cp = 0;
        for _ in 0..4 {
            match self.bump() {
                None => {
                    return Err(self.fail("unterminated string literal in Unicode".to_owned()))
                }
                Some(c) => match (c as char).to_digit(16) {
                    Some(digit) => cp = cp * 16 + digit,
                    None => {
                        return Err(
                            self.fail(format!("invalid escape Unicode byte '{}'", c as char))
                        )
                    }
                },
            }
        }
        Ok(cp)
    }

    fn read_unicode(&mut self) -> Result<(), JsonError> {
        let cp = self.read_unicode_cp()?;

        let cp = if (0xd800..=0xdbff).contains(&cp) {
            // High half of a surrogate pair; the low half must follow.
            match self.bump() {
                None => {
                    return Err(self.fail("unterminated string literal in Unicode".to_owned()))
                }
                Some(b'\\') => {}
                Some(c) => {
                    return Err(self.fail(format!(
                        "invalid continuation for surrogate pair '{}', expected '\\'",
                        c as char
                    )))
                }
            }
            match self.bump() {
                None => {
                    return Err(self.fail("unterminated string literal in Unicode".to_owned()))
                }
                Some(b'u') => {}
                Some(c) => {
                    return Err(self.fail(format!(
                        "invalid continuation for surrogate pair '{}', expected 'u'",
                        c as char
                    )))
                }
            }
            let low = self.read_unicode_cp()?;
            if !(0xdc00..=0xdfff).contains(&low) {
                return Err(self.fail(format!(
                    "surrogate pair continuation \\u{low:04x} out of range (dc00-dfff)"
                )));
            }
            (cp - 0xd800) * 0x400 + (low - 0xdc00) + 0x10000
        } else if (0xdc00..=0xdfff).contains(&cp) {
            return Err(self.fail(format!("dangling surrogate \\u{cp:04x}")));
        } else {
            cp
        };

        match char::from_u32(cp) {
            Some(decoded) => {
                self.scratch.push(decoded);
                Ok(())
            }
            None => Err(self.fail(format!("unable to encode {cp:06x} as UTF-8"))),
        }
    }

    fn read_utf8(&mut self, first: u8) -> Result<(), JsonError> {
        let count = utf8_seq_length(first);
        if count == 0 {
            return Err(self.fail("invalid UTF-8 character".to_owned()));
        }
        let mut buf = [first, 0, 0, 0];
        for slot in buf.iter_mut().take(count).skip(1) {
            *slot = self.bump().unwrap_or(0);
        }
        if !is_legal_utf8(&buf[..count]) {
            return Err(self.fail("invalid UTF-8 text".to_owned()));
        }
        match std::str::from_utf8(&buf[..count]) {
            Ok(s) => {
                self.scratch.push_str(s);
                Ok(())
            }
            Err(_) => Err(self.fail("invalid UTF-8 text".to_owned())),
        }
    }

    fn read_digits(&mut self) -> Result<(), JsonError> {
        let mut nread = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            if let Some(c) = self.bump() {
                self.scratch.push(c as char);
                nread += 1;
            }
        }
        if nread == 0 {
            let c = self.peek();
            return Err(self.fail(format!("expected digit instead of byte '{}'", describe(c))));
        }
        Ok(())
    }

    fn read_number(&mut self, c: u8) -> Result<JsonEvent, JsonError> {
        self.scratch.push(c as char);
        if c == b'-' {
            return match self.bump() {
                Some(d) if d.is_ascii_digit() => self.read_number(d),
                other => {
                    Err(self.fail(format!("unexpected byte '{}' in number", describe(other))))
                }
            };
        }
        // A leading zero takes no further integer digits.
        if (b'1'..=b'9').contains(&c) && self.peek().is_some_and(|d| d.is_ascii_digit()) {
            self.read_digits()?;
        }
        if self.peek() == Some(b'.') {
            self.bump();
            self.scratch.push('.');
            self.read_digits()?;
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            if let Some(e) = self.bump() {
                self.scratch.push(e as char);
            }
            match self.peek() {
                Some(sign @ (b'+' | b'-')) => {
                    self.bump();
                    self.scratch.push(sign as char);
                    self.read_digits()?;
                }
                Some(d) if d.is_ascii_digit() => self.read_digits()?,
                other => {
                    return Err(
                        self.fail(format!("unexpected byte '{}' in number", describe(other)))
                    )
                }
            }
        }
        Ok(JsonEvent::Number)
    }

    /// Advance to the next event.
    pub fn next_event(&mut self) -> Result<JsonEvent, JsonError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if self.ntokens > 0 && self.stack.is_empty() {
            if !self.streaming {
                while self.peek().is_some_and(is_space) {
                    self.bump();
                }
                if let Some(c) = self.peek() {
                    return Err(
                        self.fail(format!("expected end of text instead of byte '{}'", c as char))
                    );
                }
            }
            return Ok(JsonEvent::Done);
        }

        let c = self.next_nonspace();
        let Some(&(kind, count)) = self.stack.last() else {
            if c.is_none() && self.streaming {
                return Ok(JsonEvent::Done);
            }
            return self.read_value(c);
        };

        match kind {
            JsonContext::Array => {
                if count == 0 {
                    if c == Some(b']') {
                        return self.pop(b']', JsonContext::Array);
                    }
                    self.bump_count();
                    self.read_value(c)
                } else if c == Some(b',') {
                    self.bump_count();
                    let next = self.next_nonspace();
                    self.read_value(next)
                } else if c == Some(b']') {
                    self.pop(b']', JsonContext::Array)
                } else {
                    Err(self.fail(format!("unexpected byte '{}'", describe(c))))
                }
            }
            JsonContext::Object => {
                if count == 0 {
                    if c == Some(b'}') {
                        return self.pop(b'}', JsonContext::Object);
                    }
                    let event = self.read_value(c)?;
                    if event != JsonEvent::String {
                        return Err(self.fail("expected member name or '}'".to_owned()));
                    }
                    self.bump_count();
                    Ok(event)
                } else if count % 2 == 0 {
                    match c {
                        Some(b'}') => self.pop(b'}', JsonContext::Object),
                        Some(b',') => {
                            let next = self.next_nonspace();
                            let event = self.read_value(next)?;
                            if event != JsonEvent::String {
                                return Err(self.fail("expected member name".to_owned()));
                            }
                            self.bump_count();
                            Ok(event)
                        }
                        _ => Err(self.fail("expected ',' or '}' after member value".to_owned())),
                    }
                } else {
                    if c != Some(b':') {
                        return Err(self.fail("expected ':' after member name".to_owned()));
                    }
                    self.bump_count();
                    let next = self.next_nonspace();
                    self.read_value(next)
                }
            }
            JsonContext::Top => Err(self.fail("invalid parser state".to_owned())),
        }
    }

    fn bump_count(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.1 += 1;
        }
    }
}

fn utf8_seq_length(byte: u8) -> usize {
    match byte {
        0x00..=0x7f => 1,
        // Continuation bytes and the overlong prefixes 0xC0/0xC1 cannot
        // start a sequence.
        0x80..=0xc1 => 0,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 0,
    }
}

fn is_legal_utf8(bytes: &[u8]) -> bool {
    let Some(&first) = bytes.first() else {
        return false;
    };
    if bytes.len() < 2 || bytes.len() > 4 {
        return bytes.len() == 1 && first <= 0x7f;
    }
    for &continuation in &bytes[2..] {
        if !(0x80..=0xbf).contains(&continuation) {
            return false;
        }
    }
    let second = bytes[1];
    let second_ok = match first {
        0xe0 => (0xa0..=0xbf).contains(&second),
        0xed => (0x80..=0x9f).contains(&second),
        0xf0 => (0x90..=0xbf).contains(&second),
        0xf4 => (0x80..=0x8f).contains(&second),
        _ => (0x80..=0xbf).contains(&second),
    };
    second_ok && (0xc2..=0xf4).contains(&first)
}

/// Failure surfaced by [`walk_document`].
pub(crate) enum WalkError<E> {
    /// The document itself was malformed.
    Document(JsonError),
    /// The visitor rejected a scalar.
    Visitor(E),
}

/// Stream the scalar values of a document to `visit`, keyed by dotted path.
///
/// Object member names accumulate into the path; array elements share the
/// path of the member that holds the array. Booleans arrive as
/// `true`/`false`, null as `-`, numbers as their literal text.
pub(crate) fn walk_document<E>(
    input: &[u8],
    streaming: bool,
    visit: &mut dyn FnMut(&str, &str) -> Result<(), E>,
) -> Result<(), WalkError<E>> {
    let mut parser = JsonParser::new(input);
    parser.set_streaming(streaming);
    let mut segments: Vec<String> = Vec::new();
    let mut started = false;

    loop {
        let event = parser.next_event().map_err(WalkError::Document)?;
        match event {
            JsonEvent::ObjectStart => started = true,
            JsonEvent::ObjectEnd | JsonEvent::ArrayEnd => {
                segments.pop();
            }
            JsonEvent::True | JsonEvent::False | JsonEvent::Null => {
                if !started {
                    return Ok(());
                }
                let value = match event {
                    JsonEvent::True => "true",
                    JsonEvent::False => "false",
                    _ => "-",
                };
                visit(&segments.join("."), value).map_err(WalkError::Visitor)?;
                if parser.context().0 != JsonContext::Array {
                    segments.pop();
                }
            }
            JsonEvent::String | JsonEvent::Number => {
                let (ctx, count) = parser.context();
                if ctx == JsonContext::Object && count % 2 == 1 {
                    segments.push(parser.current_str().to_owned());
                } else if started {
                    let value = parser.current_str().to_owned();
                    visit(&segments.join("."), &value).map_err(WalkError::Visitor)?;
                    if ctx != JsonContext::Array {
                        segments.pop();
                    }
                }
            }
            JsonEvent::ArrayStart => {}
            JsonEvent::Done => return Ok(()),
        }
    }
}

/// Whether the format string parses as a complete document under strict
/// (non-streaming) rules.
pub(crate) fn is_json_template(fmt: &str) -> bool {
    let mut parser = JsonParser::new(fmt.as_bytes());
    parser.set_streaming(false);
    loop {
        match parser.next_event() {
            Err(_) => return false,
            Ok(JsonEvent::Done) => return true,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(input: &str) -> Vec<JsonEvent> {
        let mut parser = JsonParser::new(input.as_bytes());
        let mut out = Vec::new();
        loop {
            match parser.next_event() {
                Ok(JsonEvent::Done) => return out,
                Ok(event) => out.push(event),
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
    }

    #[test]
    fn object_event_stream() {
        assert_eq!(
            events(r#"{"a": 1, "b": [true, null]}"#),
            vec![
                JsonEvent::ObjectStart,
                JsonEvent::String,
                JsonEvent::Number,
                JsonEvent::String,
                JsonEvent::ArrayStart,
                JsonEvent::True,
                JsonEvent::Null,
                JsonEvent::ArrayEnd,
                JsonEvent::ObjectEnd,
            ]
        );
    }

    #[test]
    fn numbers_keep_literal_text() {
        let mut parser = JsonParser::new(b"1646861401.5241024");
        assert_eq!(parser.next_event().unwrap(), JsonEvent::Number);
        assert_eq!(parser.current_str(), "1646861401.5241024");
    }

    #[test]
    fn number_grammar() {
        assert_eq!(events("-12.5e+3"), vec![JsonEvent::Number]);
        assert_eq!(events("0"), vec![JsonEvent::Number]);

        let mut parser = JsonParser::new(b"01");
        parser.set_streaming(false);
        assert_eq!(parser.next_event().unwrap(), JsonEvent::Number);
        assert!(parser.next_event().is_err());

        let mut parser = JsonParser::new(b"1.");
        assert!(parser.next_event().is_err());
    }

    #[test]
    fn string_escapes() {
        let mut parser = JsonParser::new(br#""a\tbA\"""#);
        assert_eq!(parser.next_event().unwrap(), JsonEvent::String);
        assert_eq!(parser.current_str(), "a\tbA\"");
    }

    #[test]
    fn surrogate_pairs() {
        let mut parser = JsonParser::new(b"\"\\ud83d\\ude00\"");
        assert_eq!(parser.next_event().unwrap(), JsonEvent::String);
        assert_eq!(parser.current_str(), "\u{1f600}");
    }

    #[test]
    fn dangling_surrogates_fail() {
        let mut parser = JsonParser::new(br#""\ud83d""#);
        assert!(parser.next_event().is_err());
        let mut parser = JsonParser::new(br#""\udc00""#);
        assert!(parser.next_event().is_err());
        let mut parser = JsonParser::new(br#""\ud83dA""#);
        assert!(parser.next_event().is_err());
    }

    #[test]
    fn raw_utf8_is_validated() {
        let mut parser = JsonParser::new("\"héllo\"".as_bytes());
        assert_eq!(parser.next_event().unwrap(), JsonEvent::String);
        assert_eq!(parser.current_str(), "héllo");

        // Overlong encoding of '/'.
        let mut parser = JsonParser::new(b"\"\xc0\xaf\"");
        assert!(parser.next_event().is_err());

        // Lone continuation byte.
        let mut parser = JsonParser::new(b"\"\x80\"");
        assert!(parser.next_event().is_err());

        // UTF-8 encoded surrogate.
        let mut parser = JsonParser::new(b"\"\xed\xa0\x80\"");
        assert!(parser.next_event().is_err());
    }

    #[test]
    fn control_characters_must_be_escaped() {
        let mut parser = JsonParser::new(b"\"a\x01b\"");
        assert!(parser.next_event().is_err());
    }

    #[test]
    fn errors_are_sticky() {
        let mut parser = JsonParser::new(b"{]");
        parser.next_event().unwrap();
        let first = parser.next_event().unwrap_err();
        let second = parser.next_event().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn streaming_tolerates_trailing_whitespace() {
        let mut parser = JsonParser::new(b"{}   \n");
        assert_eq!(parser.next_event().unwrap(), JsonEvent::ObjectStart);
        assert_eq!(parser.next_event().unwrap(), JsonEvent::ObjectEnd);
        assert_eq!(parser.next_event().unwrap(), JsonEvent::Done);
    }

    #[test]
    fn strict_mode_rejects_trailing_bytes() {
        let mut parser = JsonParser::new(b"{} x");
        parser.set_streaming(false);
        parser.next_event().unwrap();
        parser.next_event().unwrap();
        assert!(parser.next_event().is_err());
    }

    #[test]
    fn context_reports_member_names() {
        let mut parser = JsonParser::new(br#"{"key": "value"}"#);
        parser.next_event().unwrap();
        parser.next_event().unwrap();
        let (ctx, count) = parser.context();
        assert_eq!(ctx, JsonContext::Object);
        assert_eq!(count % 2, 1);
        parser.next_event().unwrap();
        let (_, count) = parser.context();
        assert_eq!(count % 2, 0);
    }

    #[test]
    fn walker_builds_dotted_paths() {
        let mut seen = Vec::new();
        walk_document::<()>(
            br#"{"a": {"b": "1", "c": ["x", "y"]}, "d": null, "e": true}"#,
            true,
            &mut |path, value| {
                seen.push((path.to_owned(), value.to_owned()));
                Ok(())
            },
        )
        .map_err(|_| "walk failed")
        .unwrap();
        assert_eq!(
            seen,
            vec![
                ("a.b".to_owned(), "1".to_owned()),
                ("a.c".to_owned(), "x".to_owned()),
                ("a.c".to_owned(), "y".to_owned()),
                ("d".to_owned(), "-".to_owned()),
                ("e".to_owned(), "true".to_owned()),
            ]
        );
    }

    #[test]
    fn template_detection() {
        assert!(is_json_template(r#"{ "ts": "%x.%^" }"#));
        assert!(!is_json_template("%h %^[%d:%t %^] \"%r\" %s %b"));
        assert!(!is_json_template("COMBINED"));
        assert!(!is_json_template(r#"{ "unterminated": "#));
    }
}
