//! Just enough of the MongoDB wire protocol to authenticate and send `ping`.
//!
//! Messages are `OP_MSG` with a single body section. Replies are scanned for
//! the few top-level fields the probe needs; everything else is skipped.

use std::io::Read;

use super::error::ProbeError;

/// `OP_MSG` opcode.
pub(crate) const OP_MSG: i32 = 2013;

const HEADER_LEN: usize = 16;

/// Largest reply accepted.
const MAX_MESSAGE: usize = 48 * 1024 * 1024;

// ============================================================================
// Encoding
// ============================================================================

/// Builds a BSON document one field at a time.
#[derive(Debug, Default)]
pub(crate) struct DocumentBuilder {
    body: Vec<u8>,
}

impl DocumentBuilder {
    pub(crate) fn int32(mut self, name: &str, value: i32) -> Self {
        self.body.push(0x10);
        self.cstring(name);
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn string(mut self, name: &str, value: &str) -> Self {
        self.body.push(0x02);
        self.cstring(name);
        let len = i32::try_from(value.len() + 1).unwrap_or(i32::MAX);
        self.body.extend_from_slice(&len.to_le_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(0);
        self
    }

    /// Appends generic binary data (subtype 0).
    pub(crate) fn binary(mut self, name: &str, value: &[u8]) -> Self {
        self.body.push(0x05);
        self.cstring(name);
        let len = i32::try_from(value.len()).unwrap_or(i32::MAX);
        self.body.extend_from_slice(&len.to_le_bytes());
        self.body.push(0x00);
        self.body.extend_from_slice(value);
        self
    }

    #[cfg(test)]
    pub(crate) fn boolean(mut self, name: &str, value: bool) -> Self {
        self.body.push(0x08);
        self.cstring(name);
        self.body.push(u8::from(value));
        self
    }

    #[cfg(test)]
    pub(crate) fn double(mut self, name: &str, value: f64) -> Self {
        self.body.push(0x01);
        self.cstring(name);
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let total = i32::try_from(self.body.len() + 5).unwrap_or(i32::MAX);
        let mut doc = Vec::with_capacity(self.body.len() + 5);
        doc.extend_from_slice(&total.to_le_bytes());
        doc.extend_from_slice(&self.body);
        doc.push(0);
        doc
    }

    fn cstring(&mut self, value: &str) {
        self.body.extend(value.bytes().filter(|b| *b != 0));
        self.body.push(0);
    }
}

/// Wraps a command document in an `OP_MSG`.
pub(crate) fn encode_message(request_id: i32, response_to: i32, document: &[u8]) -> Vec<u8> {
    let len = HEADER_LEN + 4 + 1 + document.len();
    let mut msg = Vec::with_capacity(len);
    msg.extend_from_slice(&i32::try_from(len).unwrap_or(i32::MAX).to_le_bytes());
    msg.extend_from_slice(&request_id.to_le_bytes());
    msg.extend_from_slice(&response_to.to_le_bytes());
    msg.extend_from_slice(&OP_MSG.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());
    msg.push(0);
    msg.extend_from_slice(document);
    msg
}

/// Finishes `command` with `$db` and wraps it in an `OP_MSG`.
pub(crate) fn encode_command(request_id: i32, database: &str, command: DocumentBuilder) -> Vec<u8> {
    let document = command.string("$db", database).finish();
    encode_message(request_id, 0, &document)
}

/// The `{ ping: 1 }` command.
pub(crate) fn ping() -> DocumentBuilder {
    DocumentBuilder::default().int32("ping", 1)
}

// ============================================================================
// Decoding
// ============================================================================

/// What a command reply said.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Reply {
    pub(crate) response_to: i32,
    pub(crate) ok: bool,
    pub(crate) errmsg: Option<String>,
    pub(crate) code: Option<i32>,
    pub(crate) conversation_id: Option<i32>,
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) done: bool,
}

/// Reads one `OP_MSG` reply.
pub(crate) fn read_reply<R: Read>(reader: &mut R) -> Result<Reply, ProbeError> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|e| ProbeError::from_io("read", e))?;

    let len = usize::try_from(le_i32(&header, 0)).unwrap_or(0);
    if !(HEADER_LEN + 5..=MAX_MESSAGE).contains(&len) {
        return Err(ProbeError::Malformed(format!("message length {len}")));
    }
    let opcode = le_i32(&header, 12);
    if opcode != OP_MSG {
        return Err(ProbeError::Malformed(format!("unexpected opcode {opcode}")));
    }

    let mut body = vec![0u8; len - HEADER_LEN];
    reader
        .read_exact(&mut body)
        .map_err(|e| ProbeError::from_io("read", e))?;

    // flagBits, then a kind-0 section holding the document.
    if body[4] != 0 {
        return Err(ProbeError::Malformed(format!("section kind {}", body[4])));
    }
    let mut reply = Reply {
        response_to: le_i32(&header, 8),
        ..Reply::default()
    };
    scan_document(&body[5..], &mut reply)?;
    Ok(reply)
}

fn scan_document(doc: &[u8], reply: &mut Reply) -> Result<(), ProbeError> {
    if doc.len() < 5 {
        return Err(ProbeError::Malformed("truncated document".to_string()));
    }
    let declared = usize::try_from(le_i32(doc, 0)).unwrap_or(0);
    if declared < 5 || declared > doc.len() {
        return Err(ProbeError::Malformed(format!("document length {declared}")));
    }

    let mut pos = 4;
    while pos < declared - 1 {
        let tag = doc[pos];
        pos += 1;
        let name_end = doc[pos..declared]
            .iter()
            .position(|b| *b == 0)
            .map(|i| pos + i)
            .ok_or_else(|| ProbeError::Malformed("unterminated field name".to_string()))?;
        let name = &doc[pos..name_end];
        pos = name_end + 1;

        let size = value_size(tag, &doc[pos..declared])?;
        let value = &doc[pos..pos + size];
        match (name, tag) {
            (b"ok", _) => reply.ok = int_value(tag, value) == Some(1),
            (b"errmsg", 0x02) => {
                reply.errmsg = value
                    .get(4..size.saturating_sub(1))
                    .map(|text| String::from_utf8_lossy(text).into_owned());
            }
            (b"code", _) => reply.code = int_value(tag, value).and_then(|v| i32::try_from(v).ok()),
            (b"conversationId", _) => {
                reply.conversation_id = int_value(tag, value).and_then(|v| i32::try_from(v).ok());
            }
            (b"payload", 0x05) => reply.payload = value.get(5..).map(<[u8]>::to_vec),
            (b"done", 0x08) => reply.done = value[0] == 1,
            _ => {}
        }
        pos += size;
    }
    Ok(())
}

/// Reads a numeric or boolean value as an integer; fractional doubles are `None`.
#[allow(clippy::cast_possible_truncation)]
fn int_value(tag: u8, value: &[u8]) -> Option<i64> {
    match tag {
        0x01 => {
            let v = f64::from_le_bytes(fixed(value));
            (v.fract().abs() < f64::EPSILON).then_some(v as i64)
        }
        0x10 => Some(i64::from(i32::from_le_bytes(fixed(value)))),
        0x12 => Some(i64::from_le_bytes(fixed(value))),
        0x08 => Some(i64::from(value[0])),
        _ => None,
    }
}

/// Returns the encoded size of a value of type `tag` at the start of `rest`.
fn value_size(tag: u8, rest: &[u8]) -> Result<usize, ProbeError> {
    let length_prefixed = |extra: usize| -> Result<usize, ProbeError> {
        if rest.len() < 4 {
            return Err(ProbeError::Malformed("truncated value".to_string()));
        }
        Ok(usize::try_from(le_i32(rest, 0)).unwrap_or(usize::MAX).saturating_add(extra))
    };
    let size = match tag {
        0x0A | 0x06 | 0x7F | 0xFF => 0,
        0x08 => 1,
        0x10 => 4,
        0x01 | 0x09 | 0x11 | 0x12 => 8,
        0x07 => 12,
        0x13 => 16,
        0x02 | 0x0D | 0x0E => length_prefixed(4)?,
        0x03 | 0x04 => length_prefixed(0)?,
        0x05 => length_prefixed(5)?,
        other => return Err(ProbeError::Malformed(format!("unsupported BSON type {other:#04x}"))),
    };
    if size > rest.len() {
        return Err(ProbeError::Malformed("value overruns document".to_string()));
    }
    Ok(size)
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(fixed(&bytes[at..at + 4]))
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(document: &[u8], response_to: i32) -> Vec<u8> {
        encode_message(99, response_to, document)
    }

    #[test]
    fn test_ping_layout() {
        let msg = encode_command(7, "admin", ping());
        assert_eq!(le_i32(&msg, 0) as usize, msg.len());
        assert_eq!(le_i32(&msg, 4), 7);
        assert_eq!(le_i32(&msg, 12), OP_MSG);
        assert_eq!(msg[20], 0);
        let doc = &msg[21..];
        assert_eq!(le_i32(doc, 0) as usize, doc.len());
        assert!(doc.windows(5).any(|w| w == b"ping\0"));
        assert!(doc.windows(6).any(|w| w == b"admin\0"));
    }

    #[test]
    fn test_read_ok_reply() {
        let doc = DocumentBuilder::default().double("ok", 1.0).finish();
        let bytes = reply(&doc, 7);
        let parsed = read_reply(&mut bytes.as_slice()).unwrap();
        assert_eq!(
            parsed,
            Reply {
                response_to: 7,
                ok: true,
                ..Reply::default()
            }
        );
    }

    #[test]
    fn test_read_failed_reply_with_message() {
        let doc = DocumentBuilder::default()
            .string("errmsg", "not authorized")
            .int32("code", 13)
            .double("ok", 0.0)
            .finish();
        let bytes = reply(&doc, 3);
        let parsed = read_reply(&mut bytes.as_slice()).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.errmsg.as_deref(), Some("not authorized"));
        assert_eq!(parsed.code, Some(13));
    }

    #[test]
    fn test_read_sasl_reply_fields() {
        let doc = DocumentBuilder::default()
            .int32("conversationId", 1)
            .boolean("done", false)
            .binary("payload", b"r=abc,s=c2FsdA==,i=4096")
            .double("ok", 1.0)
            .finish();
        let bytes = reply(&doc, 2);
        let parsed = read_reply(&mut bytes.as_slice()).unwrap();
        assert!(parsed.ok);
        assert!(!parsed.done);
        assert_eq!(parsed.conversation_id, Some(1));
        assert_eq!(parsed.payload.as_deref(), Some(&b"r=abc,s=c2FsdA==,i=4096"[..]));
    }

    #[test]
    fn test_fractional_ok_is_not_ok() {
        let doc = DocumentBuilder::default().double("ok", 0.5).finish();
        let parsed = read_reply(&mut reply(&doc, 1).as_slice()).unwrap();
        assert!(!parsed.ok);
    }

    #[test]
    fn test_truncated_reply_is_closed() {
        let doc = DocumentBuilder::default().double("ok", 1.0).finish();
        let bytes = reply(&doc, 1);
        let err = read_reply(&mut &bytes[..10]).unwrap_err();
        assert!(matches!(err, ProbeError::Closed));
    }

    #[test]
    fn test_wrong_opcode_is_malformed() {
        let mut bytes = reply(&DocumentBuilder::default().finish(), 1);
        bytes[12..16].copy_from_slice(&1i32.to_le_bytes());
        assert!(matches!(
            read_reply(&mut bytes.as_slice()),
            Err(ProbeError::Malformed(_))
        ));
    }
}
