//! Finds a burned-in date and time in recognized overlay text.

use std::sync::LazyLock;

use regex::Regex;

// Either YYYY-MM-DD (also with slashes) or MM/DD/YYYY style. The first
// alternative wins when both could match, so ISO dates are preferred.
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}[-/]\d{2}[-/]\d{2})|(\d{2}[-/]\d{2}[-/]\d{4})").unwrap());

// 24-hour zero-padded HH:MM:SS.
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}:\d{2}:\d{2}").unwrap());

/// Scans OCR text for the first date-looking and time-looking substrings.
/// Both must be present; the matches are returned verbatim, with no
/// normalization of day/month ordering.
pub fn scan_timestamp(text: &str) -> Option<(String, String)> {
    let date = DATE_RE.find(text)?.as_str().to_string();
    let time = TIME_RE.find(text)?.as_str().to_string();
    Some((date, time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_date_and_time() {
        let (date, time) = scan_timestamp("CAM02 2024-03-11 14:05:22").unwrap();
        assert_eq!(date, "2024-03-11");
        assert_eq!(time, "14:05:22");
    }

    #[test]
    fn us_style_date_with_slashes() {
        let (date, time) = scan_timestamp("03/11/2024 06:59:01 28F").unwrap();
        assert_eq!(date, "03/11/2024");
        assert_eq!(time, "06:59:01");
    }

    #[test]
    fn first_match_wins() {
        let (date, time) = scan_timestamp("2023-12-01 08:00:00 backup 2024-01-01 09:30:00").unwrap();
        assert_eq!(date, "2023-12-01");
        assert_eq!(time, "08:00:00");
    }

    #[test]
    fn date_without_time_is_no_match() {
        assert_eq!(scan_timestamp("TRAILCAM 2024-03-11"), None);
    }

    #[test]
    fn time_without_date_is_no_match() {
        assert_eq!(scan_timestamp("14:05:22 42F MOON"), None);
    }

    #[test]
    fn noise_is_no_match() {
        assert_eq!(scan_timestamp("grass trees 123 4:5"), None);
    }
}
