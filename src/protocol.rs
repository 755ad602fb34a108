//! Nice protocol framing.
//!
//! Every message, request or response, is a fixed-width length header
//! followed by an EUC-KR payload:
//!
//! ```text
//! <10 ASCII digits, zero padded><payload of exactly that many bytes>
//!
//! Example:
//! 0000000005HELLO
//! ```
//!
//! There is no delimiter beyond the header and no keep-alive: each
//! exchange uses its own connection.

use bytes::{Bytes, BytesMut};
use encoding_rs::EUC_KR;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, FramePart, Result};

/// Width of the decimal length header.
pub const HEADER_LEN: usize = 10;

/// Largest payload a 10-digit header can describe.
pub const MAX_PAYLOAD_LEN: u64 = 9_999_999_999;

/// Upper bound on a single read while accumulating a frame.
pub const READ_CHUNK: usize = 4096;

/// Cap on up-front buffer allocation; larger payloads grow as they arrive.
const MAX_PREALLOC: usize = 64 * 1024;

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: [u8; HEADER_LEN],
    payload: Bytes,
}

impl Frame {
    /// Raw payload bytes (header excluded).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of bytes the frame occupied on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Header and payload decoded together, as the proxy's clients see it.
    pub fn to_text(&self) -> Result<String> {
        let mut raw = Vec::with_capacity(self.wire_len());
        raw.extend_from_slice(&self.header);
        raw.extend_from_slice(&self.payload);
        decode_text(&raw)
    }

    /// Payload alone, decoded.
    pub fn payload_text(&self) -> Result<String> {
        decode_text(&self.payload)
    }
}

/// Format the zero-padded length header for a payload of `len` bytes.
pub fn frame_header(len: u64) -> Result<[u8; HEADER_LEN]> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::FrameTooLarge(len));
    }

    let digits = format!("{len:010}");
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Parse a length header. Exactly ten ASCII digits; no sign, no padding
/// other than leading zeros.
pub fn parse_header(header: &[u8]) -> Result<u64> {
    if header.len() != HEADER_LEN || !header.iter().all(u8::is_ascii_digit) {
        return Err(Error::Protocol(format!(
            "invalid length header {:?}",
            String::from_utf8_lossy(header)
        )));
    }

    Ok(header
        .iter()
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0')))
}

/// Encode `payload` as EUC-KR and prepend its length header.
pub fn encode_frame(payload: &str) -> Result<Bytes> {
    let (encoded, _, unmappable) = EUC_KR.encode(payload);
    if unmappable {
        return Err(Error::Encoding("payload"));
    }

    let header = frame_header(encoded.len() as u64)?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + encoded.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&encoded);
    Ok(frame.freeze())
}

/// Decode a complete frame back to its payload text, checking the header
/// against the payload length.
pub fn decode_frame(frame: &[u8]) -> Result<String> {
    if frame.len() < HEADER_LEN {
        return Err(Error::Protocol(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }

    let (header, payload) = frame.split_at(HEADER_LEN);
    let declared = parse_header(header)?;
    if declared != payload.len() as u64 {
        return Err(Error::Protocol(format!(
            "header declares {declared} bytes but payload has {}",
            payload.len()
        )));
    }

    decode_text(payload)
}

/// Strict EUC-KR decode; malformed sequences are an error, not U+FFFD.
pub fn decode_text(raw: &[u8]) -> Result<String> {
    EUC_KR
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(|text| text.into_owned())
        .ok_or(Error::Encoding("response"))
}

/// Read exactly `n` bytes, accumulating across partial reads.
///
/// EOF before `n` bytes is reported as [`Error::Closed`] naming `part`.
pub async fn read_exact<R>(reader: &mut R, n: usize, part: FramePart) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(n.min(MAX_PREALLOC));

    while buffer.len() < n {
        let want = (n - buffer.len()).min(READ_CHUNK);
        let start = buffer.len();
        buffer.resize(start + want, 0);

        let read = reader.read(&mut buffer[start..start + want]).await?;
        buffer.truncate(start + read);
        if read == 0 {
            return Err(Error::Closed(part));
        }
    }

    Ok(buffer)
}

/// Read one full frame: the header, then exactly the payload it declares.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let raw_header = read_exact(reader, HEADER_LEN, FramePart::Header).await?;
    let declared = parse_header(&raw_header)?;
    let len = usize::try_from(declared)
        .map_err(|_| Error::Protocol(format!("payload of {declared} bytes exceeds address space")))?;

    let payload = read_exact(reader, len, FramePart::Data).await?;

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&raw_header);
    Ok(Frame {
        header,
        payload: payload.freeze(),
    })
}
