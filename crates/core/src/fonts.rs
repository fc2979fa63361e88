use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Turns the bytes of a shown string into text for one font resource.
#[derive(Debug, Clone)]
pub(crate) enum FontDecoder {
    Simple(String),
    Mapped(ToUnicodeMap),
    Unmapped,
}

impl Default for FontDecoder {
    fn default() -> Self {
        FontDecoder::Simple("StandardEncoding".to_string())
    }
}

impl FontDecoder {
    fn from_font(document: &Document, font: &Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|subtype| subtype == b"Type0");

        if let Some(cmap) = to_unicode_stream(document, font) {
            let map = ToUnicodeMap::parse(&cmap, if composite { 2 } else { 1 });
            if !map.is_empty() {
                return FontDecoder::Mapped(map);
            }
        }

        if composite {
            FontDecoder::Unmapped
        } else {
            FontDecoder::Simple(base_encoding(font).to_string())
        }
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> String {
        let decoded = match self {
            FontDecoder::Simple(encoding) => {
                Document::decode_text(Some(encoding.as_str()), bytes)
            }
            FontDecoder::Mapped(map) => map.decode(bytes),
            FontDecoder::Unmapped => String::new(),
        };
        decoded
            .chars()
            .filter(|c| !c.is_control() || *c == '\n')
            .collect()
    }
}

pub(crate) fn page_font_decoders(
    document: &Document,
    page_id: ObjectId,
) -> BTreeMap<Vec<u8>, FontDecoder> {
    document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| {
            let decoder = FontDecoder::from_font(document, font);
            if matches!(decoder, FontDecoder::Unmapped) {
                debug!(font = %String::from_utf8_lossy(&name), "composite font has no ToUnicode map");
            }
            (name, decoder)
        })
        .collect()
}

fn base_encoding(font: &Dictionary) -> &str {
    match font.get(b"Encoding") {
        Ok(Object::Dictionary(differences)) => differences
            .get(b"BaseEncoding")
            .and_then(Object::as_name_str)
            .unwrap_or("StandardEncoding"),
        _ => font.get_font_encoding(),
    }
}

fn to_unicode_stream(document: &Document, font: &Dictionary) -> Option<Vec<u8>> {
    let stream = match font.get(b"ToUnicode").ok()? {
        Object::Reference(id) => document.get_object(*id).ok()?.as_stream().ok()?,
        Object::Stream(stream) => stream,
        _ => return None,
    };
    Some(
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone()),
    )
}

#[derive(Debug, Clone)]
enum RangeTarget {
    Offset(Vec<u16>),
    Listed(Vec<String>),
}

#[derive(Debug, Clone)]
struct CodeRange {
    low: u32,
    high: u32,
    target: RangeTarget,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ToUnicodeMap {
    code_len: usize,
    chars: HashMap<u32, String>,
    ranges: Vec<CodeRange>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
    Word(String),
}

fn tokenize(source: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < source.len() {
        match source[i] {
            b'<' if source.get(i + 1) == Some(&b'<') => {
                tokens.push(Token::Word("<<".to_string()));
                i += 2;
            }
            b'>' if source.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Word(">>".to_string()));
                i += 2;
            }
            b'<' => {
                let end = source[i..]
                    .iter()
                    .position(|byte| *byte == b'>')
                    .map_or(source.len(), |offset| i + offset);
                tokens.push(Token::Hex(hex_bytes(&source[i + 1..end])));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b']' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'(' => {
                let mut depth = 0usize;
                while i < source.len() {
                    match source[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            b'%' => {
                while i < source.len() && source[i] != b'\n' && source[i] != b'\r' {
                    i += 1;
                }
            }
            byte if byte.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < source.len()
                    && !source[i].is_ascii_whitespace()
                    && !b"<>[]()%".contains(&source[i])
                {
                    i += 1;
                }
                if i == start {
                    i += 1;
                    continue;
                }
                tokens.push(Token::Word(
                    String::from_utf8_lossy(&source[start..i]).to_string(),
                ));
            }
        }
    }
    tokens
}

fn hex_bytes(digits: &[u8]) -> Vec<u8> {
    let mut nibbles = digits
        .iter()
        .filter_map(|digit| (*digit as char).to_digit(16))
        .map(|nibble| nibble as u8)
        .collect::<Vec<_>>();
    if nibbles.len() % 2 == 1 {
        nibbles.push(0);
    }
    nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |value, byte| (value << 8) | u32::from(*byte))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => u16::from_be_bytes([*high, *low]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect()
}

fn utf16_text(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

impl ToUnicodeMap {
    pub(crate) fn parse(cmap: &[u8], default_code_len: usize) -> Self {
        let tokens = tokenize(cmap);
        let mut map = ToUnicodeMap {
            code_len: default_code_len,
            ..ToUnicodeMap::default()
        };
        let mut saw_codespace = false;
        let mut i = 0;

        while i < tokens.len() {
            let Token::Word(keyword) = &tokens[i] else {
                i += 1;
                continue;
            };
            i += 1;
            match keyword.as_str() {
                "begincodespacerange" => {
                    while let Some(Token::Hex(low)) = tokens.get(i) {
                        if !saw_codespace && !low.is_empty() {
                            map.code_len = low.len();
                            saw_codespace = true;
                        }
                        i += 2;
                    }
                }
                "beginbfchar" => {
                    while let (Some(Token::Hex(code)), Some(Token::Hex(target))) =
                        (tokens.get(i), tokens.get(i + 1))
                    {
                        map.chars.insert(code_value(code), utf16_text(target));
                        i += 2;
                    }
                }
                "beginbfrange" => {
                    while let (Some(Token::Hex(low)), Some(Token::Hex(high))) =
                        (tokens.get(i), tokens.get(i + 1))
                    {
                        i += 2;
                        let target = match tokens.get(i) {
                            Some(Token::Hex(start)) => {
                                i += 1;
                                RangeTarget::Offset(utf16_units(start))
                            }
                            Some(Token::Open) => {
                                i += 1;
                                let mut listed = Vec::new();
                                while let Some(Token::Hex(target)) = tokens.get(i) {
                                    listed.push(utf16_text(target));
                                    i += 1;
                                }
                                if tokens.get(i) == Some(&Token::Close) {
                                    i += 1;
                                }
                                RangeTarget::Listed(listed)
                            }
                            _ => break,
                        };
                        map.ranges.push(CodeRange {
                            low: code_value(low),
                            high: code_value(high),
                            target,
                        });
                    }
                }
                _ => {}
            }
        }

        map
    }

    fn is_empty(&self) -> bool {
        self.chars.is_empty() && self.ranges.is_empty()
    }

    fn lookup(&self, code: u32) -> Option<String> {
        if let Some(text) = self.chars.get(&code) {
            return Some(text.clone());
        }
        let range = self
            .ranges
            .iter()
            .find(|range| (range.low..=range.high).contains(&code))?;
        let offset = code - range.low;
        match &range.target {
            RangeTarget::Offset(start) => {
                let mut units = start.clone();
                let last = units.last_mut()?;
                *last = last.wrapping_add(offset as u16);
                Some(String::from_utf16_lossy(&units))
            }
            RangeTarget::Listed(listed) => listed.get(offset as usize).cloned(),
        }
    }

    /// Codes the map does not cover are dropped.
    pub(crate) fn decode(&self, bytes: &[u8]) -> String {
        bytes
            .chunks(self.code_len.max(1))
            .filter_map(|code| self.lookup(code_value(code)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMAP: &[u8] = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0010> <2019>
endbfchar
2 beginbfrange
<0024> <0026> <0041>
<0050> <0051> [<0066006C> <00E9>]
endbfrange
endcmap";

    #[test]
    fn to_unicode_map_reads_chars_and_ranges() {
        let map = ToUnicodeMap::parse(CMAP, 1);

        assert_eq!(map.code_len, 2);
        assert_eq!(map.decode(&[0x00, 0x24, 0x00, 0x26, 0x00, 0x03]), "AC ");
        assert_eq!(map.decode(&[0x00, 0x10]), "\u{2019}");
        assert_eq!(map.decode(&[0x00, 0x50, 0x00, 0x51]), "fl\u{e9}");
    }

    #[test]
    fn unmapped_codes_are_dropped() {
        let map = ToUnicodeMap::parse(CMAP, 2);
        assert_eq!(map.decode(&[0x00, 0x25, 0x7F, 0x7F, 0x00, 0x24]), "BA");
    }

    #[test]
    fn simple_fonts_use_their_base_encoding() {
        let win_ansi = FontDecoder::Simple("WinAnsiEncoding".to_string());
        assert_eq!(win_ansi.decode(b"don\x92t"), "don\u{2019}t");
        assert_eq!(FontDecoder::default().decode(b"Ace high"), "Ace high");
        assert_eq!(FontDecoder::Unmapped.decode(&[0x00, 0x24]), "");
    }
}
