//! Invariant checks used by the configuration layer and the resolver
//! pipeline. `is_valid_name` re-checks a name the wire codec already
//! decoded, so a presentation-format name that's technically well-formed
//! but otherwise unacceptable never reaches the cache or upstream.

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_UDP_PACKET_LEN: usize = 512;

pub fn is_valid_port(port: u32) -> bool {
    port > 0 && port <= u16::MAX as u32
}

pub fn is_valid_packet_length(len: usize) -> bool {
    len >= 12 && len <= MAX_UDP_PACKET_LEN
}

/// Validate a presentation-format domain name (dot-separated labels,
/// trailing dot optional) against RFC 1035 length limits.
pub fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() || trimmed.len() > MAX_NAME_LEN {
        return false;
    }
    trimmed
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_must_be_in_valid_range() {
        assert!(is_valid_port(53));
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(70_000));
    }

    #[test]
    fn packet_length_bounds() {
        assert!(is_valid_packet_length(12));
        assert!(is_valid_packet_length(512));
        assert!(!is_valid_packet_length(11));
        assert!(!is_valid_packet_length(513));
    }

    #[test]
    fn rejects_empty_label() {
        assert!(!is_valid_name("example..com"));
    }

    #[test]
    fn rejects_label_over_63_octets() {
        let label = "a".repeat(64);
        let name = format!("{label}.com");
        assert!(!is_valid_name(&name));
    }

    #[test]
    fn accepts_trailing_dot() {
        assert!(is_valid_name("example.com."));
    }

    #[test]
    fn rejects_name_over_255_octets() {
        let name = std::iter::repeat("a").take(300).collect::<String>();
        assert!(!is_valid_name(&name));
    }
}
