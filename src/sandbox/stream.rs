//! Demultiplexer for Docker's attached exec stream
//!
//! When an exec runs without a TTY the runtime interleaves stdout and stderr
//! on one connection, each frame prefixed by an 8-byte header:
//!
//! ```text
//! ┌────────┬────────┬────────┬────────┬────────────────────────────┐
//! │ stream │   0    │   0    │   0    │  payload length (u32, BE)  │
//! └────────┴────────┴────────┴────────┴────────────────────────────┘
//!   1 = stdout, 2 = stderr (0 = stdin, treated as stdout)
//! ```
//!
//! With a TTY there is no framing at all. A buffer that does not start with
//! a valid header is therefore passed through as raw stdout.

const HEADER_LEN: usize = 8;

/// Split a multiplexed buffer into (stdout, stderr)
pub fn demux(buf: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    if !starts_with_header(buf) {
        stdout.extend_from_slice(buf);
        return (stdout, stderr);
    }

    let mut rest = buf;
    while rest.len() >= HEADER_LEN && starts_with_header(rest) {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (HEADER_LEN + len).min(rest.len());
        let payload = &rest[HEADER_LEN..end];
        match rest[0] {
            2 => stderr.extend_from_slice(payload),
            _ => stdout.extend_from_slice(payload),
        }
        rest = &rest[end..];
    }

    // trailing bytes that are not a frame
    stdout.extend_from_slice(rest);
    (stdout, stderr)
}

fn starts_with_header(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN && buf[0] <= 2 && buf[1] == 0 && buf[2] == 0 && buf[3] == 0
}
