//! C1 — frame codec: split the byte stream into `\n`-delimited frames,
//! parse the comma-separated uplink fields, and serialize downlink bodies
//! with the trailing XOR checksum the lock-module firmware validates.
//!
//! Grounded on `examples/original_source/server.go`'s
//! `strings.Split(message, ",")` + `util.MakeCMD` call sites.

const UPLINK_HEADER: &str = "*SCOR";
const SUBSYSTEM_TAG: &str = "OM";
const MIN_FIELDS: usize = 5;

/// A parsed uplink frame: the header guard has already passed and there are
/// at least `MIN_FIELDS` comma-separated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkFrame {
    pub fields: Vec<String>,
}

impl UplinkFrame {
    /// `arr[i]` access matching the dispatch table's 0-indexed field layout.
    pub fn field(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(String::as_str)
    }

    pub fn imei(&self) -> &str {
        &self.fields[2]
    }

    pub fn inst(&self) -> &str {
        &self.fields[3]
    }
}

/// Parses one already-trimmed line into an `UplinkFrame`.
///
/// Returns `None` for anything that doesn't pass the header guard — spec.md
/// §4.1: "Uplinks that do not begin with `*SCOR,OM,` with at least five
/// fields are ignored silently." Trailing `#<anything>` on the last field is
/// left intact; message families that need to strip it (e.g. `S6`'s network
/// signal field) do so at the call site per spec.md §4.4.
pub fn parse_line(line: &str) -> Option<UplinkFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let fields: Vec<String> = trimmed.split(',').map(str::to_string).collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }
    if fields[0] != UPLINK_HEADER || fields[1] != SUBSYSTEM_TAG {
        return None;
    }

    Some(UplinkFrame { fields })
}

/// Bitwise XOR over every byte strictly between the leading `*` and the
/// trailing `#` — see DESIGN.md OQ-1 for why this byte range was chosen.
pub fn checksum(body_between_delimiters: &[u8]) -> u8 {
    body_between_delimiters.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Strips the uplink frame terminator from a field. Every message family's
/// *last* comma-split field still carries the trailing `#` (and anything
/// after it, collapsed away by `split('\n')` upstream) — e.g. an `L0` ack
/// with `oper=0` comma-splits its last field to `"0#"`, not `"0"`. Any call
/// site reading a frame's last field must run it through this first.
pub fn strip_terminator(field: &str) -> &str {
    field.split('#').next().unwrap_or(field)
}

/// Assembles a downlink frame: `*SCOS,OM,<imei>,<body>#<checksum>\n`.
///
/// `body` is the comma-separated payload after the imei, e.g. `"S5,2,2,10,10"`.
pub fn encode_downlink(imei: &str, body: &str) -> Vec<u8> {
    let mut inner = String::with_capacity(imei.len() + body.len() + 16);
    inner.push_str("SCOS,OM,");
    inner.push_str(imei);
    inner.push(',');
    inner.push_str(body);

    let sum = checksum(inner.as_bytes());

    let mut frame = Vec::with_capacity(inner.len() + 4);
    frame.push(b'*');
    frame.extend_from_slice(inner.as_bytes());
    frame.push(b'#');
    frame.push(sum);
    frame.push(b'\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_header_lines() {
        assert_eq!(parse_line("hello"), None);
        assert_eq!(parse_line("*SCOR,OM,1#\n"), None); // too few fields
        assert_eq!(parse_line("*WRONG,OM,1,Q0,1#\n"), None);
    }

    #[test]
    fn parses_minimal_uplink() {
        let f = parse_line("*SCOR,OM,862461040000001,Q0,1#\n").unwrap();
        assert_eq!(f.imei(), "862461040000001");
        assert_eq!(f.inst(), "Q0");
        assert_eq!(f.field(4), Some("1#"));
    }

    #[test]
    fn blank_line_skipped() {
        assert_eq!(parse_line("\n"), None);
        assert_eq!(parse_line("   \n"), None);
    }

    #[test]
    fn encode_downlink_round_trips_header_and_checksum() {
        let frame = encode_downlink("862461040000001", "S5,2,2,10,10");
        let s = String::from_utf8(frame.clone()).unwrap();
        assert!(s.starts_with("*SCOS,OM,862461040000001,S5,2,2,10,10#"));
        assert!(s.ends_with('\n'));

        // Recompute the checksum over the same byte range and confirm it
        // matches the byte the encoder appended just before the newline.
        let hash_byte = frame[frame.len() - 2];
        let body = &frame[1..frame.len() - 3]; // strip leading '*' and trailing '#', checksum, '\n'
        assert_eq!(checksum(body), hash_byte);
    }

    #[test]
    fn checksum_is_pure_xor() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"A"), b'A');
        assert_eq!(checksum(b"AA"), 0);
    }

    #[test]
    fn strip_terminator_removes_trailing_hash_and_beyond() {
        assert_eq!(strip_terminator("0#"), "0");
        assert_eq!(strip_terminator("1#"), "1");
        assert_eq!(strip_terminator("22"), "22"); // no terminator present
        assert_eq!(strip_terminator(""), "");
    }
}
