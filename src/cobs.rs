//! Consistent Overhead Byte Stuffing.
//!
//! Encoding removes every 0x00 from the payload so a bare 0x00 can delimit
//! frames on the serial link. Each group starts with a code byte giving
//! the distance to the next zero (or to the end of a 254-byte maximal
//! run); the implied zeros are re-inserted on decode.

/// Worst-case encoded size for `len` payload bytes, excluding the frame
/// delimiter: one code byte per started 254-byte run, at least one.
pub const fn max_encoded_len(len: usize) -> usize {
    len + len / 254 + 1
}

/// Encode `src` into `dst`, returning the encoded length. `dst` must hold
/// [`max_encoded_len`] bytes for `src.len()`; no delimiter is appended.
pub fn encode(src: &[u8], dst: &mut [u8]) -> usize {
    let mut code_at = 0;
    let mut code = 1u8;
    let mut write = 1;

    for &byte in src {
        if byte == 0 {
            dst[code_at] = code;
            code_at = write;
            write += 1;
            code = 1;
        } else {
            dst[write] = byte;
            write += 1;
            code += 1;
            if code == 0xFF {
                dst[code_at] = code;
                code_at = write;
                write += 1;
                code = 1;
            }
        }
    }

    dst[code_at] = code;
    write
}

/// Decode one delimiter-less frame from `src` into `dst`, returning the
/// decoded length, or `None` if the stream is malformed (an embedded zero
/// or a group running past the end of the frame).
pub fn decode(src: &[u8], dst: &mut [u8]) -> Option<usize> {
    let mut read = 0;
    let mut write = 0;

    while read < src.len() {
        let code = src[read] as usize;
        if code == 0 || read + code > src.len() {
            return None;
        }
        read += 1;

        for _ in 1..code {
            if src[read] == 0 {
                return None;
            }
            dst[write] = src[read];
            read += 1;
            write += 1;
        }

        if code != 0xFF && read != src.len() {
            dst[write] = 0;
            write += 1;
        }
    }

    Some(write)
}
