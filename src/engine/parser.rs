//! Reply parsing: `[reaction] "dialogue"`.
//!
//! Never fails. Anything that does not fit the format is kept whole as
//! dialogue with no reaction.

/// A reply split into its optional reaction and the spoken text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub reaction: Option<String>,
    pub dialogue: String,
}

impl ParsedResponse {
    fn plain(raw: &str) -> Self {
        Self {
            reaction: None,
            dialogue: raw.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str, is_narrator: bool) -> ParsedResponse {
        if is_narrator {
            return ParsedResponse::plain(raw);
        }

        let Some(open) = raw.find('[') else {
            return ParsedResponse::plain(raw);
        };
        let Some(close) = raw[open..].find(']').map(|i| open + i) else {
            return ParsedResponse::plain(raw);
        };
        let Some(quote_start) = raw[close..].find('"').map(|i| close + i) else {
            return ParsedResponse::plain(raw);
        };
        // The spoken line runs to the last quote so inner quotes survive
        let quote_end = match raw.rfind('"') {
            Some(end) if end > quote_start => end,
            _ => return ParsedResponse::plain(raw),
        };

        let reaction = raw[open + 1..close].trim();
        ParsedResponse {
            reaction: (!reaction.is_empty()).then(|| reaction.to_string()),
            dialogue: raw[quote_start + 1..quote_end].trim().to_string(),
        }
    }
}
