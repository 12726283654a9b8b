//! Recorded SNMP walk file parser
//!
//! Walk files are plain text, one record per line:
//!
//! ```text
//! 1.3.6.1.2.1.1.1.0 = STRING: Motorola SB6141
//! 1.3.6.1.2.1.1.3.0 = Timeticks: (12345) 0:02:03.45
//! 1.3.6.1.2.1.2.2.1.10.1 = Counter32: 1234567
//! ```
//!
//! Failures are per-line: malformed lines are logged and skipped, the parser
//! never aborts the whole file. STRING values may continue across lines; a
//! line that does not open a new record is appended to the previous value.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::oid::Oid;
use super::tree::{Behavior, MibEntry, MibTree};
use super::value::SnmpValue;
use crate::{Error, Result};

static RECORD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.?\d+(\.\d+)*\s*=").expect("record line regex"));
static TIMETICKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+)\)").expect("timeticks regex"));
static ENUM_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((-?\d+)\)\s*$").expect("enum value regex"));

/// One decoded walk record
#[derive(Debug, Clone, PartialEq)]
pub struct WalkEntry {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl WalkEntry {
    /// Canonical `OID = TYPE: value` form.
    pub fn to_line(&self) -> String {
        match &self.value {
            SnmpValue::Null => format!("{} = NULL", self.oid),
            SnmpValue::Opaque(bytes) => {
                format!("{} = Opaque: {}", self.oid, hex_spaced(bytes))
            }
            value => format!("{} = {}: {}", self.oid, value.type_name(), value),
        }
    }
}

/// Per-file parse outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub parsed: usize,
    pub skipped: usize,
}

/// Parses walk text into entries, skipping malformed lines.
pub fn parse_walk_str(input: &str) -> (Vec<WalkEntry>, WalkStats) {
    let mut entries: Vec<WalkEntry> = Vec::new();
    let mut stats = WalkStats::default();

    for (lineno, raw) in input.lines().enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        if !RECORD_LINE.is_match(line.trim_start()) {
            // Continuation of a multi-line STRING value
            if let Some(last) = entries.last_mut() {
                if let SnmpValue::OctetString(bytes) = &mut last.value {
                    bytes.push(b'\n');
                    bytes.extend_from_slice(trim_quotes(line.trim()).as_bytes());
                    continue;
                }
            }
            warn!(line = lineno + 1, "skipping unrecognized walk line");
            stats.skipped += 1;
            continue;
        }

        match parse_record(line) {
            Ok(entry) => {
                stats.parsed += 1;
                entries.push(entry);
            }
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "skipping malformed walk line");
                stats.skipped += 1;
            }
        }
    }

    (entries, stats)
}

/// Parses a walk file from disk.
pub fn parse_walk_file<P: AsRef<Path>>(path: P) -> Result<(Vec<WalkEntry>, WalkStats)> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::walk(format!("cannot read {}: {}", path.display(), e)))?;

    let (entries, stats) = parse_walk_str(&contents);
    debug!(
        file = %path.display(),
        parsed = stats.parsed,
        skipped = stats.skipped,
        "parsed walk file"
    );
    Ok((entries, stats))
}

/// Loads walk entries into a tree, tagging dynamic types with behaviors.
pub fn build_tree(entries: Vec<WalkEntry>) -> MibTree {
    let mut tree = MibTree::new();
    for entry in entries {
        let mib_entry = match &entry.value {
            SnmpValue::Counter32(_) | SnmpValue::Counter64(_) => {
                MibEntry::with_behavior(entry.value, Behavior::DynamicCounter)
            }
            SnmpValue::Gauge32(_) => MibEntry::with_behavior(entry.value, Behavior::DynamicGauge),
            SnmpValue::TimeTicks(_) => MibEntry::with_behavior(entry.value, Behavior::Uptime),
            _ => MibEntry::new(entry.value),
        };
        tree.insert(entry.oid, mib_entry);
    }
    tree
}

fn parse_record(line: &str) -> Result<WalkEntry> {
    let (oid_part, value_part) = line
        .split_once('=')
        .ok_or_else(|| Error::walk("missing '='"))?;

    let oid = Oid::from_str(oid_part.trim())?;
    let value = parse_value(value_part.trim())?;
    Ok(WalkEntry { oid, value })
}

fn parse_value(input: &str) -> Result<SnmpValue> {
    if input.is_empty() || input == "\"\"" {
        return Ok(SnmpValue::OctetString(Vec::new()));
    }

    let (type_token, rest) = match input.split_once(':') {
        Some((token, rest))
            if !token.contains(' ')
                || matches!(token.trim(), "Network Address" | "OBJECT IDENTIFIER") =>
        {
            (token.trim(), rest.trim())
        }
        _ => return Ok(infer_bare_value(input)),
    };

    parse_typed(type_token, rest)
}

/// Decodes a `TYPE`/`value` pair in walk-file notation.
///
/// Also used by programmatic device profiles, which name types the same way.
pub fn parse_typed(type_token: &str, rest: &str) -> Result<SnmpValue> {
    match type_token {
        "STRING" => Ok(SnmpValue::OctetString(
            trim_quotes(rest).as_bytes().to_vec(),
        )),
        "Hex-STRING" => {
            let compact: String = rest.split_whitespace().collect();
            let bytes = hex::decode(&compact)
                .map_err(|e| Error::walk(format!("bad Hex-STRING: {}", e)))?;
            Ok(SnmpValue::OctetString(bytes))
        }
        "INTEGER" => Ok(SnmpValue::Integer(parse_integer(rest)?)),
        "Counter32" => Ok(SnmpValue::Counter32(parse_unsigned(rest)? as u32)),
        "Counter64" => Ok(SnmpValue::Counter64(parse_unsigned(rest)?)),
        "Gauge32" | "Unsigned32" => Ok(SnmpValue::Gauge32(parse_unsigned(rest)? as u32)),
        "Timeticks" => {
            let ticks = match TIMETICKS.captures(rest) {
                Some(caps) => caps[1]
                    .parse::<u32>()
                    .map_err(|e| Error::walk(format!("bad Timeticks: {}", e)))?,
                None => parse_unsigned(rest)? as u32,
            };
            Ok(SnmpValue::TimeTicks(ticks))
        }
        "IpAddress" | "Network Address" => {
            let addr: Ipv4Addr = rest
                .parse()
                .map_err(|e| Error::walk(format!("bad IpAddress: {}", e)))?;
            Ok(SnmpValue::IpAddress(addr.octets()))
        }
        "OID" | "OBJECT IDENTIFIER" => Ok(SnmpValue::ObjectId(Oid::from_str(rest)?)),
        "Opaque" => {
            let compact: String = rest.split_whitespace().collect();
            let bytes = hex::decode(&compact)
                .map_err(|e| Error::walk(format!("bad Opaque: {}", e)))?;
            Ok(SnmpValue::Opaque(bytes))
        }
        "BITS" => {
            let compact: String = rest
                .split_whitespace()
                .take_while(|tok| tok.chars().all(|c| c.is_ascii_hexdigit()))
                .collect();
            let bytes = hex::decode(&compact)
                .map_err(|e| Error::walk(format!("bad BITS: {}", e)))?;
            Ok(SnmpValue::OctetString(bytes))
        }
        "NULL" => Ok(SnmpValue::Null),
        other => Err(Error::walk(format!("unknown type token: {}", other))),
    }
}

fn infer_bare_value(input: &str) -> SnmpValue {
    let trimmed = input.trim();
    if trimmed
        .strip_prefix('-')
        .unwrap_or(trimmed)
        .chars()
        .all(|c| c.is_ascii_digit())
        && !trimmed.is_empty()
    {
        if let Ok(n) = trimmed.parse::<i64>() {
            return SnmpValue::Integer(n);
        }
    }
    SnmpValue::OctetString(trim_quotes(trimmed).as_bytes().to_vec())
}

// Accepts both `5` and enumerated forms like `up(1)`.
fn parse_integer(input: &str) -> Result<i64> {
    if let Ok(n) = input.parse::<i64>() {
        return Ok(n);
    }
    if let Some(caps) = ENUM_VALUE.captures(input) {
        return caps[1]
            .parse::<i64>()
            .map_err(|e| Error::walk(format!("bad INTEGER: {}", e)));
    }
    Err(Error::walk(format!("bad INTEGER: {}", input)))
}

fn parse_unsigned(input: &str) -> Result<u64> {
    let token = input.split_whitespace().next().unwrap_or("");
    token
        .parse::<u64>()
        .map_err(|e| Error::walk(format!("bad unsigned value '{}': {}", token, e)))
}

fn trim_quotes(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

fn hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_lines() {
        let input = "\
1.3.6.1.2.1.1.1.0 = STRING: Motorola SB6141
1.3.6.1.2.1.1.3.0 = Timeticks: (12345) 0:02:03.45
1.3.6.1.2.1.2.2.1.10.1 = Counter32: 1234567
1.3.6.1.2.1.2.2.1.5.1 = Gauge32: 100000000
1.3.6.1.2.1.4.20.1.1.1 = IpAddress: 10.0.0.1
1.3.6.1.2.1.1.2.0 = OID: .1.3.6.1.4.1.1166.1.19
1.3.6.1.2.1.1.7.0 = INTEGER: 72
";
        let (entries, stats) = parse_walk_str(input);
        assert_eq!(stats.parsed, 7);
        assert_eq!(stats.skipped, 0);
        assert_eq!(
            entries[0].value,
            SnmpValue::OctetString(b"Motorola SB6141".to_vec())
        );
        assert_eq!(entries[1].value, SnmpValue::TimeTicks(12345));
        assert_eq!(entries[2].value, SnmpValue::Counter32(1234567));
        assert_eq!(entries[3].value, SnmpValue::Gauge32(100000000));
        assert_eq!(entries[4].value, SnmpValue::IpAddress([10, 0, 0, 1]));
        assert_eq!(
            entries[5].value,
            SnmpValue::ObjectId("1.3.6.1.4.1.1166.1.19".parse().unwrap())
        );
        assert_eq!(entries[6].value, SnmpValue::Integer(72));
    }

    #[test]
    fn test_parse_enumerated_integer() {
        let (entries, _) =
            parse_walk_str("1.3.6.1.2.1.2.2.1.8.1 = INTEGER: up(1)\n");
        assert_eq!(entries[0].value, SnmpValue::Integer(1));
    }

    #[test]
    fn test_parse_hex_string() {
        let (entries, _) =
            parse_walk_str("1.3.6.1.2.1.2.2.1.6.1 = Hex-STRING: 00 1A 2B 3C 4D 5E\n");
        assert_eq!(
            entries[0].value,
            SnmpValue::OctetString(vec![0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E])
        );
    }

    #[test]
    fn test_parse_bare_values() {
        let (entries, _) = parse_walk_str("1.3.6.1.2.1.1.7.0 = 72\n1.3.6.1.2.1.1.5.0 = cm-lab1\n");
        assert_eq!(entries[0].value, SnmpValue::Integer(72));
        assert_eq!(entries[1].value, SnmpValue::OctetString(b"cm-lab1".to_vec()));
    }

    #[test]
    fn test_parse_empty_string_value() {
        let (entries, _) = parse_walk_str("1.3.6.1.2.1.1.6.0 = \"\"\n");
        assert_eq!(entries[0].value, SnmpValue::OctetString(Vec::new()));
    }

    #[test]
    fn test_malformed_lines_skipped_not_fatal() {
        let input = "\
1.3.6.1.2.1.1.1.0 = STRING: ok
not an oid at all
1.3.6.1.2.1.1.4.0 = Whatever: 1
1.3.6.1.2.1.1.5.0 = STRING: still parsed
";
        let (entries, stats) = parse_walk_str(input);
        assert_eq!(entries.len(), 2);
        assert_eq!(stats.parsed, 2);
        // "not an oid at all" is treated as a STRING continuation of line 1
        assert_eq!(stats.skipped, 1);
        assert_eq!(
            entries[0].value,
            SnmpValue::OctetString(b"ok\nnot an oid at all".to_vec())
        );
    }

    #[test]
    fn test_multiline_string_continuation() {
        let input = "\
1.3.6.1.2.1.1.1.0 = STRING: line one
line two
1.3.6.1.2.1.1.5.0 = STRING: next
";
        let (entries, stats) = parse_walk_str(input);
        assert_eq!(stats.parsed, 2);
        assert_eq!(
            entries[0].value,
            SnmpValue::OctetString(b"line one\nline two".to_vec())
        );
    }

    #[test]
    fn test_canonical_round_trip() {
        let input = "\
1.3.6.1.2.1.1.1.0 = STRING: Motorola SB6141
1.3.6.1.2.1.1.3.0 = Timeticks: (12345)
1.3.6.1.2.1.2.2.1.10.1 = Counter32: 1234567
1.3.6.1.2.1.4.20.1.1.1 = IpAddress: 10.0.0.1
";
        let (entries, _) = parse_walk_str(input);
        let serialized: String = entries
            .iter()
            .map(|e| format!("{}\n", e.to_line()))
            .collect();
        assert_eq!(serialized, input);

        let (reparsed, _) = parse_walk_str(&serialized);
        assert_eq!(reparsed, entries);
    }

    #[test]
    fn test_build_tree_tags_behaviors() {
        let (entries, _) = parse_walk_str(
            "1.3.6.1.2.1.2.2.1.10.1 = Counter32: 5\n1.3.6.1.2.1.2.2.1.5.1 = Gauge32: 9\n",
        );
        let tree = build_tree(entries);
        assert_eq!(
            tree.get(&"1.3.6.1.2.1.2.2.1.10.1".parse().unwrap())
                .unwrap()
                .behavior,
            Some(Behavior::DynamicCounter)
        );
        assert_eq!(
            tree.get(&"1.3.6.1.2.1.2.2.1.5.1".parse().unwrap())
                .unwrap()
                .behavior,
            Some(Behavior::DynamicGauge)
        );
    }
}
