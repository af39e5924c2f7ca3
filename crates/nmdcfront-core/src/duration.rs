use std::time::Duration;

/// Parses a Go-style duration string (`"600ms"`, `"1s"`, `"1m30s"`) as accepted
/// by the `-wait` CLI flag and the `Wait` C ABI field's string form.
pub fn parse(s: &str) -> Result<Duration, String> {
	let nanos =
		go_parse_duration::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e:?}"))?;
	if nanos < 0 {
		return Err(format!("duration {s:?} must not be negative"));
	}
	Ok(Duration::from_nanos(nanos as u64))
}

/// Formats a duration the way it would appear in a log line or CLI help text.
pub fn format(d: Duration) -> String {
	durationfmt::to_string(d)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_milliseconds() {
		assert_eq!(parse("600ms").unwrap(), Duration::from_millis(600));
	}

	#[test]
	fn parses_compound_duration() {
		assert_eq!(parse("1m30s").unwrap(), Duration::from_secs(90));
	}

	#[test]
	fn rejects_garbage() {
		assert!(parse("not-a-duration").is_err());
	}
}
