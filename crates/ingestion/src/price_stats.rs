//! Encoding and decoding of the per-price level map stored in bar files.
//!
//! The canonical form is compact JSON keyed by the price's text form:
//! `{"5000.25":{"volume":3.0,"bid_volume":0.0,"ask_volume":3.0}}`.
//!
//! The decoder also accepts the looser dict-literal text produced by older
//! exports: single quotes, bare numeric keys, and scalar type wrappers such
//! as `np.float64(5000.25)`. Duplicate price keys are kept in input order so
//! the cleaner can merge them.

use std::fmt;

use ordered_float::OrderedFloat;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use trapped_core::{Error, LevelMap, PriceLevelStats, Result};
use tracing::warn;

/// Text form of a price key.
pub fn price_key(price: f64) -> String {
    format!("{price:?}")
}

// ============================================================================
// Encoding
// ============================================================================

/// Level entry with the legacy per-level delta, written to raw bar files.
#[derive(Serialize)]
struct RawLevel {
    volume: f64,
    delta: f64,
    bid_volume: f64,
    ask_volume: f64,
}

impl From<&PriceLevelStats> for RawLevel {
    fn from(l: &PriceLevelStats) -> Self {
        Self {
            volume: l.volume,
            delta: l.delta(),
            bid_volume: l.bid_volume,
            ask_volume: l.ask_volume,
        }
    }
}

/// Serializes a level map in ascending price order.
struct EncodedLevels<'a> {
    levels: &'a LevelMap,
    with_delta: bool,
}

impl Serialize for EncodedLevels<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.levels.len()))?;
        for (price, level) in self.levels {
            let key = price_key(price.0);
            if self.with_delta {
                map.serialize_entry(&key, &RawLevel::from(level))?;
            } else {
                map.serialize_entry(&key, level)?;
            }
        }
        map.end()
    }
}

/// Encode the canonical (cleaned) level map.
pub fn encode_levels(levels: &LevelMap) -> Result<String> {
    Ok(serde_json::to_string(&EncodedLevels {
        levels,
        with_delta: false,
    })?)
}

/// Encode a raw level map, including each level's delta.
pub fn encode_raw_levels(levels: &LevelMap) -> Result<String> {
    Ok(serde_json::to_string(&EncodedLevels {
        levels,
        with_delta: true,
    })?)
}

// ============================================================================
// Decoding
// ============================================================================

/// Map entries in input order, duplicates included.
struct OrderedEntries(Vec<(String, PriceLevelStats)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of price to level stats")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, level)) = access.next_entry::<String, PriceLevelStats>()? {
                    entries.push((key, level));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Remove `name(...)` scalar wrappers, keeping the wrapped value.
///
/// Text inside quoted strings is left alone.
pub fn strip_type_wrappers(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    // One entry per open paren: true if it belongs to a stripped wrapper
    let mut parens: Vec<bool> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            if i < chars.len() && chars[i] == '(' {
                parens.push(true);
                i += 1;
            } else {
                out.extend(&chars[start..i]);
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '(' => {
                parens.push(false);
                out.push(c);
            }
            ')' => {
                if !parens.pop().unwrap_or(false) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Rewrite dict-literal text as JSON: double quotes, quoted numeric keys,
/// and JSON spellings of the literal constants.
fn normalize_to_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                out.push('"');
                quote = None;
            } else if c == '"' {
                out.push_str("\\\"");
            } else {
                out.push(c);
            }
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            quote = Some(c);
            out.push('"');
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '.' | '-' | '+'))
            {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j] == ':' {
                out.push('"');
                out.push_str(&token);
                out.push('"');
            } else {
                out.push_str(token.trim_start_matches('+'));
            }
            continue;
        }

        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            out.push_str(match word.as_str() {
                "True" => "true",
                "False" => "false",
                "None" => "null",
                other => other,
            });
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

/// Decode level entries in input order, duplicates included.
///
/// Empty or blank text decodes to no entries.
pub fn decode_level_entries(text: &str) -> Result<Vec<(f64, PriceLevelStats)>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let json = normalize_to_json(&strip_type_wrappers(trimmed));
    let OrderedEntries(entries) = serde_json::from_str(&json)
        .map_err(|e| Error::parse(format!("level map: {e}")))?;

    entries
        .into_iter()
        .map(|(key, level)| {
            let price: f64 = key
                .trim()
                .parse()
                .map_err(|_| Error::parse(format!("level map: price key '{key}' is not numeric")))?;
            if !price.is_finite() {
                return Err(Error::parse(format!("level map: price key '{key}' is not finite")));
            }
            Ok((price, level))
        })
        .collect()
}

/// Decode into a level map, summing duplicate price keys.
pub fn decode_levels(text: &str) -> Result<LevelMap> {
    let mut levels = LevelMap::new();
    for (price, level) in decode_level_entries(text)? {
        levels.entry(OrderedFloat(price)).or_default().merge(&level);
    }
    Ok(levels)
}

/// Decode, falling back to an empty map (with a warning) on failure.
pub fn decode_levels_lossy(text: &str) -> LevelMap {
    match decode_levels(text) {
        Ok(levels) => levels,
        Err(e) => {
            warn!(error = %e, "unparseable level map treated as empty");
            LevelMap::new()
        }
    }
}
