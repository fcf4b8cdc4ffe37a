//! Request `Cookie:` header parsing.
//!
//! RFC 2965 reading with the relaxed real-world policy: outside quoted
//! strings, any non-control character is accepted in cookie names and values
//! (browsers send UTF-8 and unencoded separators where the RFC wants
//! tokens). `$Version` scopes the cookies that follow it; `$Path`, `$Domain`
//! and `$Port` attach to the preceding name/value pair; any other attribute
//! starts a new cookie. Both `;` and `,` separate attributes, `,`
//! additionally ends the current cookie. Values are percent-decoded.

use crate::error::{Error, ParseError, Result};
use crate::http::{is_http_char, is_http_control, is_space_or_tab};

/// One cookie received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCookie {
    /// Cookie name.
    pub name: String,
    /// Percent-decoded cookie value.
    pub value: String,
    /// `$Version` in effect for this cookie (empty when absent).
    pub version: String,
    /// `$Path` attribute (empty when absent).
    pub path: String,
    /// `$Domain` attribute (empty when absent).
    pub domain: String,
    /// `$Port` attribute (empty when absent).
    pub port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Cookie,
    Attribute,
    AttributeSp,
    Equals,
    QuotedValue,
    QuotedValueBackslash,
    Value,
    ValueSp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposerState {
    AwaitingVersion,
    AwaitingValue,
    AwaitingPath,
    AwaitingDomain,
    AwaitingPort,
}

struct CookieComposer {
    state: ComposerState,
    name: String,
    value: String,
    version: String,
    path: String,
    domain: String,
    port: String,
}

impl CookieComposer {
    fn new() -> Self {
        CookieComposer {
            state: ComposerState::AwaitingVersion,
            name: String::new(),
            value: String::new(),
            version: String::new(),
            path: String::new(),
            domain: String::new(),
            port: String::new(),
        }
    }

    fn flush_cookie(&mut self, out: &mut Vec<RequestCookie>) {
        out.push(RequestCookie {
            name: std::mem::take(&mut self.name),
            value: decode_percent(&self.value),
            version: self.version.clone(),
            path: std::mem::take(&mut self.path),
            domain: std::mem::take(&mut self.domain),
            port: std::mem::take(&mut self.port),
        });
        self.value.clear();
        self.state = ComposerState::AwaitingValue;
    }

    fn start_cookie(&mut self, name: String, value: String, end_of_cookie: bool, out: &mut Vec<RequestCookie>) {
        self.name = name;
        self.value = value;
        if end_of_cookie {
            self.flush_cookie(out);
        } else {
            self.state = ComposerState::AwaitingPath;
        }
    }

    /// Route one `name[=value]` attribute. `Err` carries the message for the
    /// caller's position bookkeeping.
    fn append_attribute(
        &mut self,
        name: String,
        value: String,
        end_of_cookie: bool,
        out: &mut Vec<RequestCookie>,
    ) -> std::result::Result<(), &'static str> {
        let is_scoping = matches!(name.as_str(), "$Path" | "$Domain" | "$Port");
        match self.state {
            ComposerState::AwaitingVersion => {
                if name == "$Version" {
                    self.version = value;
                    self.state = ComposerState::AwaitingValue;
                } else if !is_scoping {
                    self.start_cookie(name, value, end_of_cookie, out);
                } else {
                    return Err("Cookie version or value attribute expected");
                }
            }
            ComposerState::AwaitingValue => {
                if !is_scoping && name != "$Version" {
                    self.start_cookie(name, value, end_of_cookie, out);
                } else if name == "$Version" {
                    self.version = value;
                } else {
                    return Err("Cookie value attribute expected");
                }
            }
            ComposerState::AwaitingPath => {
                if name == "$Path" {
                    self.path = value;
                    self.state = ComposerState::AwaitingDomain;
                } else if !is_scoping {
                    self.flush_cookie(out);
                    self.start_cookie(name, value, end_of_cookie, out);
                } else {
                    return Err("Cookie path or value attribute expected");
                }
            }
            ComposerState::AwaitingDomain => {
                if name == "$Domain" {
                    self.domain = value;
                    self.state = ComposerState::AwaitingPort;
                } else if !is_scoping {
                    self.flush_cookie(out);
                    self.start_cookie(name, value, end_of_cookie, out);
                } else {
                    return Err("Cookie domain or value attribute expected");
                }
            }
            ComposerState::AwaitingPort => {
                if name == "$Port" {
                    self.port = value;
                    self.flush_cookie(out);
                } else if !is_scoping {
                    self.flush_cookie(out);
                    self.start_cookie(name, value, end_of_cookie, out);
                } else {
                    return Err("Cookie port or value attribute expected");
                }
            }
        }
        Ok(())
    }
}

/// Parse one `Cookie:` header value.
///
/// # Errors
///
/// [`Error::ParserBad`] on malformed input (control characters, misplaced
/// scoping attributes, premature end).
pub fn parse_request_cookies(header_value: &str) -> Result<Vec<RequestCookie>> {
    let bytes = header_value.as_bytes();
    let mut cookies = Vec::new();
    let mut composer = CookieComposer::new();
    let mut state = TokenState::Cookie;
    let mut attr_name = String::new();
    let mut attr_value = String::new();

    let bad = |pos: usize, b: u8, msg: &str| -> Error {
        Error::ParserBad(ParseError {
            ch: b,
            pos,
            line: 1,
            col: pos + 1,
            msg: msg.to_string(),
        })
    };

    for (pos, &b) in bytes.iter().enumerate() {
        match state {
            TokenState::Cookie => {
                if is_space_or_tab(b) {
                    // Leading whitespace is skipped.
                } else if !is_http_control(b) && b != b'=' {
                    attr_name.clear();
                    attr_name.push(b as char);
                    attr_value.clear();
                    state = TokenState::Attribute;
                } else {
                    return Err(bad(pos, b, "Cookie attribute starts with an invalid character"));
                }
            }
            TokenState::Attribute => match b {
                b';' | b',' => {
                    composer
                        .append_attribute(
                            std::mem::take(&mut attr_name),
                            std::mem::take(&mut attr_value),
                            b == b',',
                            &mut cookies,
                        )
                        .map_err(|msg| bad(pos, b, msg))?;
                    state = TokenState::Cookie;
                }
                b'=' => state = TokenState::Equals,
                _ if is_space_or_tab(b) => state = TokenState::AttributeSp,
                _ if !is_http_control(b) => attr_name.push(b as char),
                _ => return Err(bad(pos, b, "Cookie attribute contains an invalid character")),
            },
            TokenState::AttributeSp => match b {
                b';' | b',' => {
                    composer
                        .append_attribute(
                            std::mem::take(&mut attr_name),
                            std::mem::take(&mut attr_value),
                            b == b',',
                            &mut cookies,
                        )
                        .map_err(|msg| bad(pos, b, msg))?;
                    state = TokenState::Cookie;
                }
                b'=' => state = TokenState::Equals,
                _ if is_space_or_tab(b) => {}
                _ => {
                    return Err(bad(
                        pos,
                        b,
                        "Cookie attribute trailing space is followed by an invalid character",
                    ))
                }
            },
            TokenState::Equals => match b {
                b';' | b',' => {
                    composer
                        .append_attribute(
                            std::mem::take(&mut attr_name),
                            std::mem::take(&mut attr_value),
                            b == b',',
                            &mut cookies,
                        )
                        .map_err(|msg| bad(pos, b, msg))?;
                    state = TokenState::Cookie;
                }
                b'"' => {
                    attr_value.clear();
                    state = TokenState::QuotedValue;
                }
                _ if is_space_or_tab(b) => {}
                _ if is_http_char(b) && !is_http_control(b) => {
                    attr_value.clear();
                    attr_value.push(b as char);
                    state = TokenState::Value;
                }
                _ => {
                    return Err(bad(
                        pos,
                        b,
                        "Cookie attribute equals character is followed by an invalid character",
                    ))
                }
            },
            TokenState::QuotedValue => match b {
                b'"' => state = TokenState::ValueSp,
                b'\\' => state = TokenState::QuotedValueBackslash,
                _ if !is_http_control(b) || is_space_or_tab(b) => attr_value.push(b as char),
                _ => {
                    return Err(bad(
                        pos,
                        b,
                        "Cookie attribute quoted value contains an invalid character",
                    ))
                }
            },
            TokenState::QuotedValueBackslash => {
                if is_http_char(b) {
                    attr_value.push(b as char);
                    state = TokenState::QuotedValue;
                } else {
                    return Err(bad(
                        pos,
                        b,
                        "Cookie attribute quoted pair contains an invalid character",
                    ));
                }
            }
            TokenState::Value => match b {
                b';' | b',' => {
                    composer
                        .append_attribute(
                            std::mem::take(&mut attr_name),
                            std::mem::take(&mut attr_value),
                            b == b',',
                            &mut cookies,
                        )
                        .map_err(|msg| bad(pos, b, msg))?;
                    state = TokenState::Cookie;
                }
                _ if is_space_or_tab(b) => state = TokenState::ValueSp,
                _ if is_http_char(b) && !is_http_control(b) => attr_value.push(b as char),
                _ => return Err(bad(pos, b, "Cookie attribute value contains an invalid character")),
            },
            TokenState::ValueSp => match b {
                b';' | b',' => {
                    composer
                        .append_attribute(
                            std::mem::take(&mut attr_name),
                            std::mem::take(&mut attr_value),
                            b == b',',
                            &mut cookies,
                        )
                        .map_err(|msg| bad(pos, b, msg))?;
                    state = TokenState::Cookie;
                }
                _ if is_space_or_tab(b) => {}
                _ => {
                    return Err(bad(
                        pos,
                        b,
                        "Cookie attribute value is followed by an invalid character",
                    ))
                }
            },
        }
    }

    // End of header: only a complete (possibly empty) value may be pending.
    match state {
        TokenState::Equals | TokenState::Value | TokenState::ValueSp => {
            composer
                .append_attribute(attr_name, attr_value, true, &mut cookies)
                .map_err(|msg| bad(bytes.len(), 0, msg))?;
        }
        _ => {
            return Err(bad(
                bytes.len(),
                0,
                "Premature end of request cookie header value",
            ));
        }
    }
    Ok(cookies)
}

/// Decode `%XX` escapes; malformed escapes pass through literally.
fn decode_percent(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push(((hi * 16 + lo) as u8) as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────
