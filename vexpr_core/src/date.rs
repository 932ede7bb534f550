use std::fmt::Write;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::FixedOffset;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Timelike;
use chrono::Utc;

use crate::value::Value;

pub const DEFAULT_DATE_FORMAT: &str = "F j, Y";

const NAIVE_DATETIME_FORMATS: &[&str] = &[
	"%Y-%m-%d %H:%M:%S",
	"%Y-%m-%dT%H:%M:%S",
	"%Y-%m-%d %H:%M",
	"%Y/%m/%d %H:%M:%S",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y", "%b %d, %Y"];

/// Interpret a value as a point in time.
///
/// Numbers and numeric strings are unix timestamps. Other strings may be
/// RFC 3339, RFC 2822, a plain date or date-time (read in `offset`), or one
/// of `now`, `today`, `tomorrow` and `yesterday`.
pub fn parse_datetime(input: &Value, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
	if input.is_numeric() {
		let timestamp = input.to_integer();
		return DateTime::from_timestamp(timestamp, 0).map(|time| time.with_timezone(&offset));
	}

	let text = input.as_str()?.trim();
	if text.is_empty() {
		return None;
	}

	let now = Utc::now().with_timezone(&offset);
	let midnight = |days: i64| {
		let date = now.date_naive() + Duration::days(days);
		date.and_hms_opt(0, 0, 0)
			.and_then(|time| offset.from_local_datetime(&time).single())
	};

	match text.to_ascii_lowercase().as_str() {
		"now" => return Some(now),
		"today" => return midnight(0),
		"tomorrow" => return midnight(1),
		"yesterday" => return midnight(-1),
		_ => {}
	}

	if let Ok(time) = DateTime::parse_from_rfc3339(text) {
		return Some(time.with_timezone(&offset));
	}

	if let Ok(time) = DateTime::parse_from_rfc2822(text) {
		return Some(time.with_timezone(&offset));
	}

	let naive = NAIVE_DATETIME_FORMATS
		.iter()
		.find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
		.or_else(|| {
			NAIVE_DATE_FORMATS
				.iter()
				.find_map(|format| NaiveDate::parse_from_str(text, format).ok())
				.and_then(|date| date.and_hms_opt(0, 0, 0))
		})?;

	offset.from_local_datetime(&naive).single()
}

/// Format `time` with a PHP-style format string such as `F j, Y` or
/// `Y-m-d H:i`. A backslash emits the next character literally; characters
/// without a meaning are copied through.
pub fn format_datetime(time: &DateTime<FixedOffset>, format: &str) -> String {
	let mut output = String::with_capacity(format.len() * 2);
	let mut characters = format.chars();

	while let Some(character) = characters.next() {
		if character == '\\' {
			if let Some(literal) = characters.next() {
				output.push(literal);
			}
			continue;
		}

		write_specifier(&mut output, time, character);
	}

	output
}

fn write_specifier(output: &mut String, time: &DateTime<FixedOffset>, specifier: char) {
	let offset_seconds = time.offset().local_minus_utc();
	let hour12 = match time.hour() % 12 {
		0 => 12,
		hour => hour,
	};

	// Writing into a `String` cannot fail.
	let _ = match specifier {
		'd' => write!(output, "{:02}", time.day()),
		'D' => write!(output, "{}", time.format("%a")),
		'j' => write!(output, "{}", time.day()),
		'l' => write!(output, "{}", time.format("%A")),
		'N' => write!(output, "{}", time.weekday().number_from_monday()),
		'S' => write!(output, "{}", ordinal_suffix(time.day())),
		'w' => write!(output, "{}", time.weekday().num_days_from_sunday()),
		'z' => write!(output, "{}", time.ordinal0()),
		'W' => write!(output, "{:02}", time.iso_week().week()),
		'F' => write!(output, "{}", time.format("%B")),
		'm' => write!(output, "{:02}", time.month()),
		'M' => write!(output, "{}", time.format("%b")),
		'n' => write!(output, "{}", time.month()),
		't' => write!(output, "{}", days_in_month(time.year(), time.month())),
		'L' => write!(output, "{}", u8::from(is_leap_year(time.year()))),
		'o' => write!(output, "{}", time.iso_week().year()),
		'Y' => write!(output, "{}", time.year()),
		'y' => write!(output, "{:02}", time.year().rem_euclid(100)),
		'a' => write!(output, "{}", if time.hour() < 12 { "am" } else { "pm" }),
		'A' => write!(output, "{}", if time.hour() < 12 { "AM" } else { "PM" }),
		'g' => write!(output, "{hour12}"),
		'G' => write!(output, "{}", time.hour()),
		'h' => write!(output, "{hour12:02}"),
		'H' => write!(output, "{:02}", time.hour()),
		'i' => write!(output, "{:02}", time.minute()),
		's' => write!(output, "{:02}", time.second()),
		'u' => write!(output, "{:06}", time.timestamp_subsec_micros()),
		'v' => write!(output, "{:03}", time.timestamp_subsec_millis()),
		'e' | 'T' | 'P' => write!(output, "{}", time.format("%:z")),
		'p' if offset_seconds == 0 => write!(output, "Z"),
		'p' => write!(output, "{}", time.format("%:z")),
		'O' => write!(output, "{}", time.format("%z")),
		'Z' => write!(output, "{offset_seconds}"),
		'c' => write!(output, "{}", time.format("%Y-%m-%dT%H:%M:%S%:z")),
		'r' => write!(output, "{}", time.format("%a, %d %b %Y %H:%M:%S %z")),
		'U' => write!(output, "{}", time.timestamp()),
		other => write!(output, "{other}"),
	};
}

fn ordinal_suffix(day: u32) -> &'static str {
	match (day % 10, day % 100) {
		(_, 11..=13) => "th",
		(1, _) => "st",
		(2, _) => "nd",
		(3, _) => "rd",
		_ => "th",
	}
}

fn is_leap_year(year: i32) -> bool {
	NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

fn days_in_month(year: i32, month: u32) -> u32 {
	let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

	NaiveDate::from_ymd_opt(next_year, next_month, 1)
		.and_then(|first| first.pred_opt())
		.map_or(31, |last| last.day())
}

/// Format a timestamp or date string, returning empty text when the input
/// cannot be read as a date.
pub fn format_date(input: &Value, format: &str, offset: FixedOffset) -> String {
	parse_datetime(input, offset)
		.map(|time| format_datetime(&time, format))
		.unwrap_or_default()
}
