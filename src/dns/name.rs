use super::ParseError;

const MAX_JUMPS: usize = 100;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Encode a dotted name into DNS wire label format, terminated by the root
/// label. Trailing dot is optional on input and never duplicated on output.
pub fn encode(name: &str) -> Vec<u8> {
    let trimmed = name.trim_end_matches('.');
    let mut bytes = Vec::with_capacity(trimmed.len() + 2);
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            bytes.push(label.len() as u8);
            bytes.extend_from_slice(label.as_bytes());
        }
    }
    bytes.push(0);
    bytes
}

/// Decode a name starting at `offset` within `packet`, following compression
/// pointers (0xC0 prefix) up to `MAX_JUMPS` times. Returns the decoded name
/// and the offset immediately after the name as it appears at the *original*
/// position (pointer targets are not counted toward that offset).
pub fn decode(packet: &[u8], offset: usize) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = offset;
    let mut end_offset: Option<usize> = None;
    let mut jumps = 0usize;
    let mut total_len = 0usize;

    loop {
        let len = *packet
            .get(cursor)
            .ok_or_else(|| ParseError::Malformed("name runs past end of packet".into()))?;

        if len == 0 {
            cursor += 1;
            if end_offset.is_none() {
                end_offset = Some(cursor);
            }
            break;
        }

        if len & 0xC0 == 0xC0 {
            let hi = (len & 0x3F) as usize;
            let lo = *packet
                .get(cursor + 1)
                .ok_or_else(|| ParseError::Malformed("truncated compression pointer".into()))?
                as usize;
            if end_offset.is_none() {
                end_offset = Some(cursor + 2);
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(ParseError::Malformed("too many compression pointer jumps".into()));
            }
            cursor = (hi << 8) | lo;
            continue;
        }

        if len as usize > MAX_LABEL_LEN {
            return Err(ParseError::NameTooLong("label exceeds 63 octets".into()));
        }

        let start = cursor + 1;
        let stop = start + len as usize;
        let label_bytes = packet
            .get(start..stop)
            .ok_or_else(|| ParseError::Malformed("label runs past end of packet".into()))?;
        let label = std::str::from_utf8(label_bytes)
            .map_err(|_| ParseError::Malformed("label is not valid utf-8".into()))?;
        labels.push(label.to_string());
        total_len += label.len() + 1;
        if total_len > MAX_NAME_LEN {
            return Err(ParseError::NameTooLong("name exceeds 255 octets".into()));
        }
        cursor = stop;
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };

    Ok((name, end_offset.unwrap_or(cursor)))
}
