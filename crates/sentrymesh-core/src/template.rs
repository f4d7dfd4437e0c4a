//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Template token substitution (spec §6). Tokens are evaluated lazily at the
//! point of use — filename templates, hook arguments, overlay text.

use chrono::{DateTime, Local};

/// Values a template may reference. Not every field is populated by every
/// caller; missing values degrade to an empty-string token so a template
/// referencing an unavailable field still renders (never panics).
#[derive(Clone, Debug, Default)]
pub struct TemplateValues {
    pub device_name: String,
    pub device_index: Option<u32>,
    pub timestamp: Option<DateTime<Local>>,
    pub video_start_time: Option<DateTime<Local>>,
    pub timestamp_on_video_starts: Option<DateTime<Local>>,
    pub timestamp_on_device_offline: Option<DateTime<Local>>,
    pub change_rate: Option<f32>,
    pub fps: Option<f32>,
}

/// Evaluates every `{token[:strftime]}` occurrence in `input`. A template
/// with no tokens is returned unchanged (spec §8 round-trip law).
pub fn render(input: &str, values: &TemplateValues) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = input[i..].find('}') {
                let token = &input[i + 1..i + end];
                out.push_str(&resolve_token(token, values));
                i += end + 1;
                continue;
            }
        }
        // Push one UTF-8 char at a time to stay on char boundaries.
        let ch = input[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn resolve_token(token: &str, values: &TemplateValues) -> String {
    let (name, fmt) = match token.split_once(':') {
        Some((n, f)) => (n, Some(f)),
        None => (token, None),
    };

    match name {
        "deviceName" => values.device_name.clone(),
        "deviceIndex" => values
            .device_index
            .map(|i| i.to_string())
            .unwrap_or_default(),
        "timestamp" => format_ts(values.timestamp, fmt),
        "videoStartTime" => format_ts(values.video_start_time, fmt),
        "timestampOnVideoStarts" => format_ts(values.timestamp_on_video_starts, fmt),
        "timestampOnDeviceOffline" => format_ts(values.timestamp_on_device_offline, fmt),
        "changeRate" => values
            .change_rate
            .map(|v| format!("{v:.4}"))
            .unwrap_or_default(),
        "changeRatePct" => values
            .change_rate
            .map(|v| format!("{:.1}", v * 100.0))
            .unwrap_or_default(),
        "fps" => values.fps.map(|v| format!("{v:.1}")).unwrap_or_default(),
        _ => format!("{{{token}}}"), // unknown token: leave verbatim
    }
}

fn format_ts(ts: Option<DateTime<Local>>, fmt: Option<&str>) -> String {
    let Some(ts) = ts else {
        return String::new();
    };
    match fmt {
        // "milliseconds via %f" (spec §6): chrono's %f is nanoseconds, so we
        // truncate to 3 digits for a millisecond-looking field.
        Some(fmt) => {
            let rendered = ts.format(fmt).to_string();
            if fmt.contains("%f") {
                truncate_nanos_to_millis(&rendered)
            } else {
                rendered
            }
        }
        None => ts.timestamp_millis().to_string(),
    }
}

fn truncate_nanos_to_millis(rendered: &str) -> String {
    // crude but sufficient: chrono's %f produces 9 digits; keep the first 3.
    let mut out = String::with_capacity(rendered.len());
    let mut digit_run = 0usize;
    for ch in rendered.chars() {
        if ch.is_ascii_digit() {
            digit_run += 1;
            if digit_run <= 3 || digit_run > 9 {
                out.push(ch);
            }
        } else {
            digit_run = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn template_with_no_tokens_is_unchanged() {
        let values = TemplateValues::default();
        assert_eq!(render("plain-file.mp4", &values), "plain-file.mp4");
    }

    #[test]
    fn device_name_and_change_rate_pct_substitute() {
        let values = TemplateValues {
            device_name: "front-door".into(),
            change_rate: Some(0.125),
            ..Default::default()
        };
        assert_eq!(
            render("{deviceName}_{changeRatePct}.jpg", &values),
            "front-door_12.5.jpg"
        );
    }

    #[test]
    fn timestamp_strftime_applies() {
        let ts = Local.with_ymd_and_hms(2026, 7, 28, 10, 30, 0).unwrap();
        let values = TemplateValues {
            timestamp: Some(ts),
            ..Default::default()
        };
        assert_eq!(
            render("{timestamp:%Y%m%d_%H%M%S}", &values),
            "20260728_103000"
        );
    }

    #[test]
    fn unknown_token_left_verbatim() {
        let values = TemplateValues::default();
        assert_eq!(render("{bogusToken}", &values), "{bogusToken}");
    }
}
