//! Command encoding: `tag_len:u8 | tag_bytes | (field_len:N | field_bytes)*`.
//!
//! Field length prefixes are not a fixed width across the whole command —
//! each field's prefix width is fixed by its position (1 byte for names and
//! counts, 2 bytes for message bodies), matching the original
//! `pack_command(command, *blocks)` call sites.

use std::mem::size_of;

use crate::tag::CommandTag;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("command body exceeds the maximum representable frame length")]
    Overflow,
    #[error("command tag is not valid UTF-8 or is not a recognized command")]
    UnknownTag,
    #[error("buffer is shorter than the declared field length")]
    Truncated,
    #[error("field length does not fit in the declared {0}-byte prefix")]
    FieldTooLong(usize),
}

fn write_length(buf: &mut Vec<u8>, value: usize, length_size: usize) -> Result<(), CodecError> {
    let max = if length_size >= size_of::<usize>() {
        usize::MAX
    } else {
        (1usize << (length_size * 8)) - 1
    };
    if value > max {
        return Err(CodecError::FieldTooLong(length_size));
    }
    let bytes = value.to_be_bytes();
    buf.extend_from_slice(&bytes[bytes.len() - length_size..]);
    Ok(())
}

fn read_length(buf: &[u8]) -> usize {
    buf.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

/// Pack a command: the tag, then each `(data, length_size)` field in order.
pub fn pack_command(tag: CommandTag, fields: &[(&[u8], usize)]) -> Result<Vec<u8>, CodecError> {
    let tag_bytes = tag.as_str().as_bytes();
    let mut body = Vec::with_capacity(1 + tag_bytes.len());
    write_length(&mut body, tag_bytes.len(), 1)?;
    body.extend_from_slice(tag_bytes);

    for (data, length_size) in fields {
        write_length(&mut body, data.len(), *length_size)?;
        body.extend_from_slice(data);
    }

    if body.len() > u32::MAX as usize {
        return Err(CodecError::Overflow);
    }

    Ok(body)
}

/// Split off one length-prefixed field, returning `(field, rest)`.
pub fn parse_part(length_size: usize, buf: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    if buf.len() < length_size {
        return Err(CodecError::Truncated);
    }
    let len = read_length(&buf[..length_size]);
    let end = length_size
        .checked_add(len)
        .ok_or(CodecError::Truncated)?;
    if buf.len() < end {
        return Err(CodecError::Truncated);
    }
    Ok((&buf[length_size..end], &buf[end..]))
}

/// Split off the command tag (1-byte length prefix) and decode it.
pub fn parse_tag(buf: &[u8]) -> Result<(CommandTag, &[u8]), CodecError> {
    let (tag_bytes, rest) = parse_part(1, buf)?;
    let tag_str = std::str::from_utf8(tag_bytes).map_err(|_| CodecError::UnknownTag)?;
    let tag = CommandTag::parse(tag_str).ok_or(CodecError::UnknownTag)?;
    Ok((tag, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_parses_send_message() {
        let packed = pack_command(
            CommandTag::SendMessage,
            &[(b"bob".as_slice(), 1), (b"hello there".as_slice(), 2)],
        )
        .unwrap();

        let (tag, rest) = parse_tag(&packed).unwrap();
        assert_eq!(tag, CommandTag::SendMessage);

        let (receiver, rest) = parse_part(1, rest).unwrap();
        assert_eq!(receiver, b"bob");

        let (message, rest) = parse_part(2, rest).unwrap();
        assert_eq!(message, b"hello there");
        assert!(rest.is_empty());
    }

    #[test]
    fn packs_and_parses_a_bare_command_with_no_fields() {
        let packed = pack_command(CommandTag::Ping, &[]).unwrap();
        let (tag, rest) = parse_tag(&packed).unwrap();
        assert_eq!(tag, CommandTag::Ping);
        assert!(rest.is_empty());
    }

    #[test]
    fn rejects_a_field_too_long_for_its_prefix() {
        let huge = vec![0u8; 256];
        let err = pack_command(CommandTag::SendMessage, &[(&huge, 1), (b"x", 2)]).unwrap_err();
        assert!(matches!(err, CodecError::FieldTooLong(1)));
    }

    #[test]
    fn truncated_buffer_is_reported() {
        let packed = pack_command(CommandTag::SendMessage, &[(b"bob".as_slice(), 1)]).unwrap();
        let truncated = &packed[..packed.len() - 1];
        let (_, rest) = parse_tag(truncated).unwrap();
        assert!(matches!(parse_part(1, rest), Err(CodecError::Truncated)));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let packed = pack_command_with_raw_tag("zz");
        assert!(matches!(parse_tag(&packed), Err(CodecError::UnknownTag)));
    }

    fn pack_command_with_raw_tag(tag: &str) -> Vec<u8> {
        let tag_bytes = tag.as_bytes();
        let mut body = Vec::new();
        body.push(tag_bytes.len() as u8);
        body.extend_from_slice(tag_bytes);
        body
    }
}
