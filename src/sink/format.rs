use crate::source::record::{LogRecord, Severity};
use console::{style, Style};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

/// Attribute renderings shorter than this are folded onto the record's line.
const SHORT_MORE_LIMIT: usize = 150;

/// Reserved attribute key the record context is shown under.
const CONTEXT_KEY: &str = "ctx";

const PLAIN_WHEN_FORMAT: &str = "%d.%m.%y %H:%M:%S%.6f";
const COLOR_WHEN_FORMAT: &str = "%d%m%y %H:%M:%S%.6f";

/// Turns a record into display text, trailing newline included.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> String;
}

/// The default human readable layout:
/// `when who (S) what {attributes}`.
#[derive(Debug, Clone)]
pub struct HumanReadableFormatter {
    color: bool,
    who_width: usize,
}

impl HumanReadableFormatter {
    pub fn new(color: bool, who_width: usize) -> Self {
        Self { color, who_width }
    }

    fn format_head(&self, record: &LogRecord) -> String {
        let who = rtruncate(&record.source, self.who_width);
        let code = record.severity.code();

        if !self.color {
            return format!(
                "{} {:>30} ({}) {} ",
                record.logged_at.format(PLAIN_WHEN_FORMAT),
                who,
                code,
                record.message
            );
        }

        let head = format!("{} {:>30}", record.logged_at.format(COLOR_WHEN_FORMAT), who);
        format!(
            "{}: ({}) {} ",
            style(head).force_styling(true).black().bright(),
            severity_style(record.severity).apply_to(code),
            style(&record.message).force_styling(true).cyan()
        )
    }
}

impl Formatter for HumanReadableFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let mut formatted = self.format_head(record);

        let mut more = record.attributes.clone();
        if let Some(context) = &record.context {
            more.insert(CONTEXT_KEY.to_string(), Value::String(context.clone()));
        }

        match render_more(&more) {
            Ok(rendered) if rendered.len() < SHORT_MORE_LIMIT => {
                formatted.push_str(&fold_short_more(&rendered));
            }
            Ok(rendered) => formatted.push_str(&rendered.replace("\\n", "\n")),
            Err(e) => formatted.push_str(&format!("<Error formatting more: {}>", e)),
        }

        formatted.push('\n');
        formatted
    }
}

fn severity_style(severity: Severity) -> Style {
    let base = Style::new().force_styling(true);
    match severity {
        Severity::Verbose => base.blue().bright(),
        Severity::Warning => base.yellow(),
        Severity::Error | Severity::Critical | Severity::Fatal | Severity::Panic => base.red(),
        _ => base,
    }
}

fn render_more(more: &Map<String, Value>) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    more.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn fold_short_more(rendered: &str) -> String {
    rendered
        .replace('\n', "")
        .replace("{    ", "{")
        .replace(",    ", ", ")
}

/// Keep the last `width` characters of `s`.
pub fn rtruncate(s: &str, width: usize) -> &str {
    let count = s.chars().count();
    if count <= width {
        return s;
    }
    s.char_indices()
        .nth(count - width)
        .map_or("", |(idx, _)| &s[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> LogRecord {
        LogRecord::parse(line).unwrap()
    }

    #[test]
    fn test_plain_layout() {
        let formatter = HumanReadableFormatter::new(false, 45);
        let rec = record(
            r#"{"when":"2016-06-19T09:56:29.043641","who":"access_control","what":"Using etcd discovery","severity":"DEBUG","more":{"etcd_address":"127.0.0.1:5251"}}"#,
        );

        assert_eq!(
            formatter.format(&rec),
            "19.06.16 09:56:29.043641                 access_control (D) Using etcd discovery {\"etcd_address\": \"127.0.0.1:5251\"}\n"
        );
    }

    #[test]
    fn test_empty_more_renders_braces() {
        let formatter = HumanReadableFormatter::new(false, 45);
        let rec = record(r#"{"when":"2016-06-19T09:56:29","who":"w","what":"x","severity":"INFO"}"#);
        assert!(formatter.format(&rec).ends_with("(I) x {}\n"));
    }

    #[test]
    fn test_context_merged_on_copy() {
        let formatter = HumanReadableFormatter::new(false, 45);
        let rec = record(
            r#"{"when":"2016-06-19T09:56:29","who":"w","what":"x","severity":"INFO","more":{"a":1},"ctx":"req-1"}"#,
        );

        let out = formatter.format(&rec);
        assert!(out.ends_with("{\"a\": 1, \"ctx\": \"req-1\"}\n"));
        assert!(!rec.attributes.contains_key("ctx"));
    }

    #[test]
    fn test_long_more_stays_indented() {
        let formatter = HumanReadableFormatter::new(false, 45);
        let long = "v".repeat(200);
        let line = format!(
            r#"{{"when":"2016-06-19T09:56:29","who":"w","what":"x","severity":"INFO","more":{{"trace":"line1\nline2","blob":"{}"}}}}"#,
            long
        );
        let out = formatter.format(&record(&line));

        assert!(out.contains("{\n    \"blob\""));
        assert!(out.contains("\"line1\nline2\""));
    }

    #[test]
    fn test_who_truncated_from_the_left() {
        assert_eq!(rtruncate("controller.worker.17", 9), "worker.17");
        assert_eq!(rtruncate("short", 45), "short");
        assert_eq!(rtruncate("ääbb", 2), "bb");
        assert_eq!(rtruncate("abc", 0), "");

        let formatter = HumanReadableFormatter::new(false, 4);
        let rec = record(r#"{"when":"2016-06-19T09:56:29","who":"abcdefgh","what":"x","severity":"INFO"}"#);
        assert!(formatter.format(&rec).contains(" efgh (I) x "));
    }

    #[test]
    fn test_color_layout_has_escapes() {
        let formatter = HumanReadableFormatter::new(true, 45);
        let rec = record(r#"{"when":"2016-06-19T09:56:29","who":"w","what":"boom","severity":"ERROR"}"#);
        let out = formatter.format(&rec);

        assert!(out.contains('\u{1b}'));
        assert!(out.contains("190616 09:56:29.000000"));
        assert!(out.contains("boom"));
        assert_eq!(console::strip_ansi_codes(&out).matches("(E)").count(), 1);
    }

    #[test]
    fn test_round_trip_head_fields() {
        let formatter = HumanReadableFormatter::new(false, 45);
        let rec = record(
            r#"{"when":"2020-01-02T03:04:05.000006","who":"svc.api","what":"request done","severity":"warning","more":{"status":200}}"#,
        );
        let out = formatter.format(&rec);

        let (head, _) = out.split_once(") ").unwrap();
        let (who_part, code) = head.rsplit_once(" (").unwrap();
        let who = who_part[24..].trim_start();
        let rest = &out[head.len() + 2..];
        let what = rest.strip_suffix(" {\"status\": 200}\n").unwrap();

        assert_eq!(who, rec.source);
        assert_eq!(code.chars().next(), Some(rec.severity.code()));
        assert_eq!(what, rec.message);
    }
}
