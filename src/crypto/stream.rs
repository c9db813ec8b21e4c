//! # Stream Encryption
//!
//! Chunked form of the envelope for inputs that should not be held in
//! memory at once.
//!
//! ## Wire Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STREAM ENVELOPE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  u32 len │ header (bincode, mode = Stream)                             │
//! │  u32 len │ last u8 │ nonce │ AES-256-GCM(chunk 0)                      │
//! │  u32 len │ last u8 │ nonce │ AES-256-GCM(chunk 1)                      │
//! │  ...                                                                    │
//! │                                                                         │
//! │  chunk aad = header ‖ index (u64 BE) ‖ last                            │
//! │  every chunk holds STREAM_CHUNK_SIZE bytes except the last one         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Streams carry no signature. Binding the chunk index and the last-chunk
//! flag into the AAD makes reordered or truncated streams fail to open.
//! Chunks are written to the output as they verify, so a caller must
//! discard the output when decryption returns an error.

use std::io::{ErrorKind, Read, Write};

use zeroize::Zeroizing;

use crate::crypto::encryption::{self, EncryptionKey, Nonce, NONCE_SIZE};
use crate::crypto::envelope::{
    header_aad, new_header, unwrap_content_key, wrap_for_recipients, EnvelopeHeader, EnvelopeMode,
    ENVELOPE_VERSION,
};
use crate::crypto::keys::{EncryptionKeyPair, KeyPair, PublicKey};
use crate::error::{CryptoError, CryptoResult};

/// Plaintext bytes per chunk
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const TAG_SIZE: usize = 16;
const MAX_HEADER_SIZE: usize = 1024 * 1024;
const MAX_CHUNK_FRAME: usize = 1 + NONCE_SIZE + STREAM_CHUNK_SIZE + TAG_SIZE;

fn io_error(err: std::io::Error) -> CryptoError {
    CryptoError::Io(err.to_string())
}

/// Read until `buf` is full or the input ends
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> CryptoResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(e)),
        }
    }
    Ok(filled)
}

fn chunk_aad(header: &[u8], index: u64, last: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header.len() + 9);
    aad.extend_from_slice(header);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(u8::from(last));
    aad
}

fn write_frame(writer: &mut dyn Write, parts: &[&[u8]]) -> CryptoResult<()> {
    let len: usize = parts.iter().map(|part| part.len()).sum();
    let len = u32::try_from(len).map_err(|_| CryptoError::Encryption("Frame too large".into()))?;
    writer.write_all(&len.to_be_bytes()).map_err(io_error)?;
    for part in parts {
        writer.write_all(part).map_err(io_error)?;
    }
    Ok(())
}

/// One length-prefixed frame, `None` when the input ends cleanly
fn read_frame(reader: &mut dyn Read, max: usize) -> CryptoResult<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match fill(reader, &mut len)? {
        0 => return Ok(None),
        4 => {}
        _ => return Err(CryptoError::InvalidFormat("Truncated frame length".into())),
    }

    let len = u32::from_be_bytes(len) as usize;
    if len > max {
        return Err(CryptoError::InvalidFormat(format!(
            "Frame of {} bytes exceeds the limit of {}",
            len, max
        )));
    }

    let mut frame = vec![0u8; len];
    if fill(reader, &mut frame)? != len {
        return Err(CryptoError::InvalidFormat("Truncated frame".into()));
    }
    Ok(Some(frame))
}

/// Encrypt everything `input` yields to `recipients`
///
/// Returns the number of plaintext bytes. An empty input writes nothing
/// and returns 0.
pub fn encrypt_stream(input: &mut dyn Read, output: &mut dyn Write, recipients: &[PublicKey]) -> CryptoResult<u64> {
    if recipients.is_empty() {
        return Err(CryptoError::Encryption("No recipients".into()));
    }

    let mut current = Zeroizing::new(vec![0u8; STREAM_CHUNK_SIZE]);
    let mut current_len = fill(input, &mut current[..])?;
    if current_len == 0 {
        return Ok(0);
    }

    let content_key = EncryptionKey::random();
    let ephemeral = EncryptionKeyPair::generate();
    let slots = wrap_for_recipients(&content_key, &ephemeral, recipients)?;
    let header = header_aad(&new_header(EnvelopeMode::Stream, &ephemeral, slots))?;
    write_frame(output, &[&header[..]])?;

    let mut next = Zeroizing::new(vec![0u8; STREAM_CHUNK_SIZE]);
    let mut index = 0u64;
    let mut total = 0u64;
    loop {
        let next_len = fill(input, &mut next[..])?;
        let last = next_len == 0;

        let aad = chunk_aad(&header, index, last);
        let (nonce, ciphertext) = encryption::encrypt(&content_key, &current[..current_len], &aad)?;
        write_frame(output, &[&[u8::from(last)][..], &nonce.0[..], &ciphertext[..]])?;
        total += current_len as u64;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        index += 1;
    }

    output.flush().map_err(io_error)?;
    Ok(total)
}

/// Decrypt a stream produced by [`encrypt_stream`] with `recipient`'s key
///
/// Returns the number of plaintext bytes. An empty input returns 0.
pub fn decrypt_stream(input: &mut dyn Read, output: &mut dyn Write, recipient: &KeyPair) -> CryptoResult<u64> {
    let Some(header_bytes) = read_frame(input, MAX_HEADER_SIZE)? else {
        return Ok(0);
    };
    let header: EnvelopeHeader = bincode::deserialize(&header_bytes)
        .map_err(|e| CryptoError::InvalidFormat(format!("Malformed stream header: {}", e)))?;
    if header.version != ENVELOPE_VERSION {
        return Err(CryptoError::InvalidFormat(format!(
            "Unsupported envelope version {}",
            header.version
        )));
    }
    if header.mode != EnvelopeMode::Stream {
        return Err(CryptoError::InvalidFormat(format!(
            "Expected Stream envelope, found {:?}",
            header.mode
        )));
    }

    let content_key = unwrap_content_key(&header, recipient)?;

    let mut index = 0u64;
    let mut total = 0u64;
    loop {
        let frame = read_frame(input, MAX_CHUNK_FRAME)?
            .ok_or_else(|| CryptoError::InvalidFormat("Stream ended before its last chunk".into()))?;
        if frame.len() < 1 + NONCE_SIZE {
            return Err(CryptoError::InvalidFormat("Truncated chunk".into()));
        }

        let last = match frame[0] {
            0 => false,
            1 => true,
            other => return Err(CryptoError::InvalidFormat(format!("Invalid chunk flag {}", other))),
        };
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&frame[1..1 + NONCE_SIZE]);

        let aad = chunk_aad(&header_bytes, index, last);
        let plaintext = Zeroizing::new(encryption::decrypt(
            &content_key,
            &Nonce(nonce),
            &frame[1 + NONCE_SIZE..],
            &aad,
        )?);
        output.write_all(&plaintext).map_err(io_error)?;
        total += plaintext.len() as u64;

        if last {
            break;
        }
        index += 1;
    }

    let mut trailing = [0u8; 1];
    if fill(input, &mut trailing)? != 0 {
        return Err(CryptoError::InvalidFormat("Data after the last chunk".into()));
    }

    output.flush().map_err(io_error)?;
    Ok(total)
}

// ============================================================================
// TESTS
// ============================================================================
