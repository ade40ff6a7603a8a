use core::time::Duration;
use tonic::metadata::MetadataMap;

pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Longest `TimeoutValue` the gRPC wire format allows.
const MAX_TIMEOUT_DIGITS: usize = 8;

/// Parses the `grpc-timeout` header, if present and well formed.
///
/// The value is at most eight ASCII digits followed by one unit: `H`ours,
/// `M`inutes, `S`econds, `m`illiseconds, `u`microseconds or `n`anoseconds.
/// Malformed values are ignored.
pub fn grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    parse_timeout(value)
}

fn parse_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > MAX_TIMEOUT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(60 * 60)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_timeout("2H"), Some(Duration::from_secs(7_200)));
        assert_eq!(parse_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_timeout("10S"), Some(Duration::from_secs(10)));
        assert_eq!(parse_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_timeout("40u"), Some(Duration::from_micros(40)));
        assert_eq!(parse_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
        assert_eq!(parse_timeout("0S"), Some(Duration::ZERO));
    }

    #[test]
    fn rejects_malformed_values() {
        for value in ["", "S", "10", "10s", "123456789S", "-1S", "1.5S", " 1S", "1 S"] {
            assert_eq!(parse_timeout(value), None, "{value:?}");
        }
    }

    #[test]
    fn reads_the_header_from_metadata() {
        let mut metadata = MetadataMap::new();
        assert_eq!(grpc_timeout(&metadata), None);

        metadata.insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("1500m"));
        assert_eq!(grpc_timeout(&metadata), Some(Duration::from_millis(1_500)));
    }
}
