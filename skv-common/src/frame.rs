//! Line framing over a raw read buffer.
//!
//! The server appends socket bytes to a `BytesMut` and drains complete
//! lines through [`take_line`]. A line that grows past the cap is a framing
//! error: the buffer cannot be resynchronized, so the caller must reply
//! once and close the connection.

use bytes::BytesMut;

use crate::error::KvError;

/// Maximum accepted line length in bytes, terminator excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// Extracts the next `\n`-terminated line from `buf`.
///
/// Returns `Ok(None)` when no complete line is buffered yet. A trailing
/// `\r` before the terminator is stripped. Errors are terminal for the
/// connection: the line exceeded `max_len`, or the bytes are not UTF-8.
pub fn take_line(buf: &mut BytesMut, max_len: usize) -> Result<Option<String>, KvError> {
    let pos = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => {
            if buf.len() > max_len {
                return Err(KvError::LineTooLong);
            }
            return Ok(None);
        }
    };

    if pos > max_len {
        return Err(KvError::LineTooLong);
    }

    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        let len = line.len() - 1;
        line.truncate(len);
    }

    match std::str::from_utf8(&line) {
        Ok(text) => Ok(Some(text.to_string())),
        Err(_) => Err(KvError::InvalidUtf8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_buffered_lines_in_order() {
        let mut buf = BytesMut::from(&b"GET a\nGET b\nGET c"[..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN).unwrap(), Some("GET a".into()));
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN).unwrap(), Some("GET b".into()));
        // Partial trailing line stays buffered.
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN).unwrap(), None);
        assert_eq!(&buf[..], b"GET c");
    }

    #[test]
    fn strips_carriage_return() {
        let mut buf = BytesMut::from(&b"QUIT\r\n"[..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN).unwrap(), Some("QUIT".into()));
    }

    #[test]
    fn empty_line_is_returned_not_skipped() {
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN).unwrap(), Some(String::new()));
    }

    #[test]
    fn oversized_line_is_a_framing_error() {
        let mut line = vec![b'x'; MAX_LINE_LEN + 1];
        line.push(b'\n');
        let mut buf = BytesMut::from(&line[..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN), Err(KvError::LineTooLong));

        // Same without a terminator in sight.
        let mut buf = BytesMut::from(&vec![b'x'; MAX_LINE_LEN + 1][..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN), Err(KvError::LineTooLong));
    }

    #[test]
    fn rejects_non_utf8_bytes() {
        let mut buf = BytesMut::from(&b"GET \xff\n"[..]);
        assert_eq!(take_line(&mut buf, MAX_LINE_LEN), Err(KvError::InvalidUtf8));
    }
}
