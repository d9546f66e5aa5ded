//! Extract raw fields from one AX.25/APRS frame.
//!
//! Responsibilities:
//! - Slice fixed-position fields out of the AX.25 header and APRS object
//! - Locate optional `key=value` tokens in the frame text
//! - Split multivalue tokens (timers, RX setting, ozone pump) into sub-fields
//! - Locate the transmit frequency by its `MHz` suffix
//!
//! Decoding never fails as a whole. A field whose bytes are missing or whose
//! text does not parse is left out of the result and logged.

use std::ops::Range;

use tracing::{error, trace};

use crate::types::{RawFields, RawValue};

/// Minimum frame length carrying an AX.25 header plus the APRS data type.
pub const MIN_FRAME_LEN: usize = 17;

// ---------------------------------------------------------------------------
// Field layout tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum FixedParse {
    /// Raw bytes, kept verbatim.
    Bytes,
    /// Single byte as an integer.
    Byte,
    /// Single byte as a character.
    Char,
    /// ASCII text up to the first space.
    Word,
    /// ASCII decimal integer.
    Int,
    /// GMM minute field that may be blank-padded.
    GmmMinute,
}

struct FixedField {
    name: &'static str,
    range: Range<usize>,
    parse: FixedParse,
}

const fn fixed(name: &'static str, start: usize, end: usize, parse: FixedParse) -> FixedField {
    FixedField {
        name,
        range: start..end,
        parse,
    }
}

static FIXED_FIELDS: &[FixedField] = &[
    fixed("destination_address", 0, 7, FixedParse::Bytes),
    fixed("source_address", 7, 14, FixedParse::Bytes),
    fixed("control", 14, 15, FixedParse::Byte),
    fixed("protocol_id", 15, 16, FixedParse::Byte),
    fixed("data_type", 16, 17, FixedParse::Char),
    fixed("serial", 17, 26, FixedParse::Word),
    fixed("hour", 27, 29, FixedParse::Int),
    fixed("minute", 29, 31, FixedParse::Int),
    fixed("second", 31, 33, FixedParse::Int),
    fixed("time_format", 33, 34, FixedParse::Char),
    fixed("latitude_degree", 34, 36, FixedParse::Int),
    fixed("latitude_minute", 36, 41, FixedParse::GmmMinute),
    fixed("latitude_ns", 41, 42, FixedParse::Char),
    fixed("longitude_degree", 43, 46, FixedParse::Int),
    fixed("longitude_minute", 46, 51, FixedParse::GmmMinute),
    fixed("longitude_we", 51, 52, FixedParse::Char),
    fixed("course", 53, 56, FixedParse::Int),
    fixed("speed", 57, 60, FixedParse::Int),
    fixed("altitude", 63, 69, FixedParse::Int),
    fixed("dao_D", 70, 71, FixedParse::Char),
    fixed("dao_A", 71, 72, FixedParse::Char),
    fixed("dao_O", 72, 73, FixedParse::Char),
];

#[derive(Debug, Clone, Copy)]
enum TokenParse {
    Int,
    Float,
    Text,
}

/// Optional tokens: (raw name, key, terminator, parse).
static OPTIONAL_TOKENS: &[(&str, &str, &str, TokenParse)] = &[
    ("clb", "Clb=", "m/s", TokenParse::Float),
    ("p", "p=", "hPa", TokenParse::Float),
    ("t", "t=", "C", TokenParse::Float),
    ("h", "h=", "%", TokenParse::Float),
    ("batt", "batt=", "V", TokenParse::Float),
    ("calibration", "calibration", "%", TokenParse::Int),
    ("fp", "fp=", "hPa", TokenParse::Float),
    ("og", "OG=", "m", TokenParse::Int),
    ("rssi", "rssi=", "dB", TokenParse::Float),
    ("tx", "tx=", "dBm", TokenParse::Int),
    ("hdil", "hdil=", "m", TokenParse::Float),
    ("o3", "o3=", "mPa", TokenParse::Float),
    ("type", "Type=", " ", TokenParse::Text),
    ("sats", "Sats=", " ", TokenParse::Int),
    ("fn", "FN=", " ", TokenParse::Int),
    ("azimuth", "azimuth=", " ", TokenParse::Int),
    ("elevation", "elevation=", " ", TokenParse::Float),
    ("dist", "dist=", " ", TokenParse::Float),
    ("dev", "dev=", " ", TokenParse::Text),
    ("ser", "ser=", " ", TokenParse::Text),
];

#[derive(Debug, Clone, Copy)]
enum MultiParse {
    Timer,
    Rx,
    Pump,
}

struct MultiToken {
    key: &'static str,
    terminator: &'static str,
    parse: MultiParse,
    subfields: &'static [&'static str],
}

static MULTI_TOKENS: &[MultiToken] = &[
    MultiToken {
        key: "TxPastBurst=",
        terminator: " ",
        parse: MultiParse::Timer,
        subfields: &[
            "tx_past_burst_hour",
            "tx_past_burst_minute",
            "tx_past_burst_second",
        ],
    },
    MultiToken {
        key: "powerup=",
        terminator: " ",
        parse: MultiParse::Timer,
        subfields: &["powerup_hour", "powerup_minute", "powerup_second"],
    },
    MultiToken {
        key: "rx=",
        terminator: " ",
        parse: MultiParse::Rx,
        subfields: &["rx_f", "rx_afc", "rx_afc_max"],
    },
    MultiToken {
        key: "Pump=",
        terminator: "V",
        parse: MultiParse::Pump,
        subfields: &["pump_ma", "pump_v"],
    },
];

const FREQUENCY_UNIT: &str = "MHz";

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode one AX.25 frame (FCS already removed) into raw fields.
///
/// Re-decoding identical bytes yields an identical result.
pub fn decode_aprs(frame: &[u8]) -> RawFields {
    let mut fields = RawFields::new();

    for field in FIXED_FIELDS {
        if frame.len() < field.range.end {
            error!(
                field = field.name,
                len = frame.len(),
                "frame too short for fixed field"
            );
            continue;
        }
        match parse_fixed(&frame[field.range.clone()], field.parse) {
            Some(value) => {
                trace!(field = field.name, %value, "fixed field parsed");
                fields.insert(field.name, value);
            }
            None => error!(field = field.name, "error parsing fixed field"),
        }
    }

    let text = String::from_utf8_lossy(frame);

    for &(name, key, terminator, parse) in OPTIONAL_TOKENS {
        let Some(token) = find_token(&text, key, terminator) else {
            trace!(field = name, "token not present");
            continue;
        };
        match parse_token(token, parse) {
            Some(value) => {
                trace!(field = name, %value, "optional field parsed");
                fields.insert(name, value);
            }
            None => error!(field = name, token, "error parsing optional field"),
        }
    }

    for multi in MULTI_TOKENS {
        let Some(token) = find_token(&text, multi.key, multi.terminator) else {
            trace!(key = multi.key, "token not present");
            continue;
        };
        let values = match multi.parse {
            MultiParse::Timer => parse_timer(token)
                .map(|(h, m, s)| vec![RawValue::Int(h), RawValue::Int(m), RawValue::Int(s)]),
            MultiParse::Rx => parse_rx(token).map(|(f, afc, max)| {
                vec![RawValue::Int(f), RawValue::Int(afc), RawValue::Int(max)]
            }),
            MultiParse::Pump => {
                parse_pump(token).map(|(ma, v)| vec![RawValue::Int(ma), RawValue::Float(v)])
            }
        };
        match values {
            Some(values) => {
                for (&name, value) in multi.subfields.iter().zip(values) {
                    trace!(field = name, %value, "subfield parsed");
                    fields.insert(name, value);
                }
            }
            None => error!(key = multi.key, token, "error parsing multivalue field"),
        }
    }

    if let Some(token) = find_frequency(&text) {
        match token.trim().parse::<f64>() {
            Ok(f) => {
                trace!(field = "f", value = f, "frequency parsed");
                fields.insert("f", RawValue::Float(f));
            }
            Err(_) => error!(field = "f", token, "error parsing frequency"),
        }
    }

    fields
}

fn parse_fixed(bytes: &[u8], parse: FixedParse) -> Option<RawValue> {
    match parse {
        FixedParse::Bytes => Some(RawValue::Bytes(bytes.to_vec())),
        FixedParse::Byte => bytes.first().map(|&b| RawValue::Int(b as i64)),
        FixedParse::Char => bytes.first().map(|&b| RawValue::Char(b as char)),
        FixedParse::Word => {
            let text = std::str::from_utf8(bytes).ok()?;
            let word = text.split(' ').next().unwrap_or_default();
            Some(RawValue::Text(word.to_string()))
        }
        FixedParse::Int => {
            let text = std::str::from_utf8(bytes).ok()?;
            text.trim().parse().ok().map(RawValue::Int)
        }
        FixedParse::GmmMinute => {
            let text = std::str::from_utf8(bytes).ok()?;
            parse_gmm_minute(text).map(RawValue::Float)
        }
    }
}

fn parse_token(token: &str, parse: TokenParse) -> Option<RawValue> {
    let token = token.trim();
    match parse {
        TokenParse::Int => token.parse().ok().map(RawValue::Int),
        TokenParse::Float => token.parse().ok().map(RawValue::Float),
        TokenParse::Text => {
            if token.is_empty() {
                None
            } else {
                Some(RawValue::Text(token.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Token location
// ---------------------------------------------------------------------------

/// Locate the value of a `key` preceded by a space or `!`.
///
/// The value runs up to the first `terminator` after the key, or to the end
/// of the text when the terminator is absent.
pub fn find_token<'a>(text: &'a str, key: &str, terminator: &str) -> Option<&'a str> {
    let start = [' ', '!'].iter().find_map(|prefix| {
        let needle = format!("{prefix}{key}");
        text.find(&needle).map(|idx| idx + needle.len())
    })?;
    let rest = &text[start..];
    let end = rest.find(terminator).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Locate the transmit frequency by its unit, scanning back to the nearest space.
fn find_frequency(text: &str) -> Option<&str> {
    let end = text.find(FREQUENCY_UNIT)?;
    let start = text[..end].rfind(' ').map(|i| i + 1).unwrap_or(0);
    Some(&text[start..end])
}

// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// Parse the minute part of a GMM coordinate, honoring blank-padded precision.
///
/// `"  .  "` means no minute data (0). A leading digit followed by blanks
/// means 10-minute precision. Anything else parses as a decimal.
pub fn parse_gmm_minute(text: &str) -> Option<f64> {
    if text == "  .  " {
        return Some(0.0);
    }
    let mut chars = text.chars();
    if let Some(first) = chars.next() {
        if let Some(digit) = first.to_digit(10) {
            if chars.as_str() == " .  " {
                return Some(digit as f64 * 10.0);
            }
        }
    }
    text.trim().parse().ok()
}

/// Parse a timer such as `12h34m56s`; missing components default to 0.
pub fn parse_timer(text: &str) -> Option<(i64, i64, i64)> {
    let (mut hour, mut minute, mut second) = (0, 0, 0);
    let mut digits = String::new();
    for c in text.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            'h' | 'm' | 's' => {
                let value: i64 = digits.parse().ok()?;
                match c {
                    'h' => hour = value,
                    'm' => minute = value,
                    _ => second = value,
                }
                digits.clear();
            }
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some((hour, minute, second))
}

/// Parse an RX setting such as `403900(+2/5)` into (kHz, AFC, AFC max).
pub fn parse_rx(text: &str) -> Option<(i64, i64, i64)> {
    let text = text.trim();
    let (freq, rest) = text.split_once('(')?;
    let (afc, rest) = rest.split_once('/')?;
    let (afc_max, _) = rest.split_once(')')?;
    Some((
        freq.trim().parse().ok()?,
        afc.trim().parse().ok()?,
        afc_max.trim().parse().ok()?,
    ))
}

/// Parse an ozone pump token such as `99mA 15.0V` into (mA, V).
pub fn parse_pump(text: &str) -> Option<(i64, f64)> {
    let (current, voltage) = text.trim().split_once("mA")?;
    let voltage = voltage.trim().trim_end_matches('V');
    Some((current.trim().parse().ok()?, voltage.trim().parse().ok()?))
}

/// Decode a 7-byte AX.25 address field into `CALL-SSID`.
///
/// Each callsign byte carries ASCII shifted left by one. The last byte holds
/// the SSID in bits 1-4. Pad spaces are trimmed and SSID 0 is omitted.
pub fn parse_address(address: &[u8]) -> Option<String> {
    let (&last, call) = address.split_last()?;
    let call: String = call.iter().map(|&b| (b >> 1) as char).collect();
    let call = call.trim_end();
    if call.is_empty() {
        return None;
    }
    let ssid = (last >> 1) & 0x0F;
    if ssid == 0 {
        Some(call.to_string())
    } else {
        Some(format!("{call}-{ssid}"))
    }
}

/// Encode `CALL-SSID` into a 7-byte AX.25 address field.
pub fn encode_address(callsign: &str, last: bool) -> [u8; 7] {
    let (call, ssid) = match callsign.split_once('-') {
        Some((call, ssid)) => (call, ssid.parse::<u8>().unwrap_or(0)),
        None => (callsign, 0),
    };
    let mut out = [b' ' << 1; 7];
    for (slot, b) in out.iter_mut().zip(call.bytes().take(6)) {
        *slot = b << 1;
    }
    out[6] = 0x60 | ((ssid & 0x0F) << 1) | u8::from(last);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
