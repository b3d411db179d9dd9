//! Parser for tabular command output.
//!
//! Several switch commands (`sofia status` among them) answer with aligned
//! text tables: a header row, rule lines, data rows, and often a trailing
//! summary line. This parser turns that text into ordered records keyed by
//! the header row. Stripping trailing summary records is caller policy, not
//! parser policy - the parser cannot tell a summary from data.

use std::collections::HashMap;

/// Options controlling how raw tabular text is split into records.
#[derive(Debug, Clone)]
pub struct TableOptions<'a> {
    /// Lines starting with this prefix are skipped (rule lines like `====`).
    pub comment_prefix: Option<&'a str>,
    /// Field separator. `None` splits on runs of whitespace, with any excess
    /// columns folded into the last field.
    pub delimiter: Option<char>,
    /// Whether the first data row names the fields. Without it, fields are
    /// keyed by column index (`"0"`, `"1"`, ...).
    pub has_header_row: bool,
    /// Trim surrounding whitespace from each field.
    pub trim: bool,
}

impl Default for TableOptions<'_> {
    fn default() -> Self {
        Self {
            comment_prefix: None,
            delimiter: None,
            has_header_row: true,
            trim: true,
        }
    }
}

/// Parse tabular text into an ordered sequence of records.
///
/// Blank lines are skipped. Rows shorter than the header leave the missing
/// fields empty.
pub fn parse_table(raw: &str, options: &TableOptions<'_>) -> Vec<HashMap<String, String>> {
    let mut headers: Option<Vec<String>> = None;
    let mut records = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(prefix) = options.comment_prefix {
            if trimmed.starts_with(prefix) {
                continue;
            }
        }

        let fields = split_fields(line, options, headers.as_ref().map(|h| h.len()));

        if options.has_header_row && headers.is_none() {
            headers = Some(fields);
            continue;
        }

        let mut record = HashMap::new();
        match &headers {
            Some(names) => {
                for (i, name) in names.iter().enumerate() {
                    let value = fields
                        .get(i)
                        .cloned()
                        .unwrap_or_default();
                    record.insert(name.clone(), value);
                }
            }
            None => {
                for (i, value) in fields
                    .into_iter()
                    .enumerate()
                {
                    record.insert(i.to_string(), value);
                }
            }
        }
        records.push(record);
    }

    records
}

/// Split one line into fields, honoring the delimiter mode.
///
/// In whitespace mode, when the column count is known, tokens beyond it are
/// joined back into the last field so values like `RUNNING (0)` survive.
fn split_fields(line: &str, options: &TableOptions<'_>, width: Option<usize>) -> Vec<String> {
    let finish = |s: &str| {
        if options.trim {
            s.trim().to_string()
        } else {
            s.to_string()
        }
    };

    match options.delimiter {
        Some(delim) => line
            .split(delim)
            .map(finish)
            .collect(),
        None => {
            let tokens: Vec<&str> = line
                .split_whitespace()
                .collect();
            match width {
                Some(width) if width > 0 && tokens.len() > width => {
                    let mut fields: Vec<String> = tokens[..width - 1]
                        .iter()
                        .map(|s| finish(s))
                        .collect();
                    fields.push(tokens[width - 1..].join(" "));
                    fields
                }
                _ => tokens
                    .iter()
                    .map(|s| finish(s))
                    .collect(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOFIA_STATUS: &str = "\
                     Name          Type                                       Data      State
=================================================================================================
                 internal       profile                 sip:mod_sofia@10.0.0.5:5060    RUNNING (0)
                 external       profile                 sip:mod_sofia@10.0.0.5:5080    RUNNING (0)
            external::gw1       gateway                      sip:gw1.example.com       NOREG
=================================================================================================
2 profiles 1 gateway
";

    #[test]
    fn parses_sofia_status_rows() {
        let options = TableOptions {
            comment_prefix: Some("="),
            ..TableOptions::default()
        };
        let records = parse_table(SOFIA_STATUS, &options);

        // 3 data rows plus the summary line the caller is expected to strip
        assert_eq!(records.len(), 4);
        assert_eq!(
            records[0]
                .get("Name")
                .map(|s| s.as_str()),
            Some("internal")
        );
        assert_eq!(
            records[0]
                .get("Type")
                .map(|s| s.as_str()),
            Some("profile")
        );
        assert_eq!(
            records[0]
                .get("State")
                .map(|s| s.as_str()),
            Some("RUNNING (0)")
        );
        assert_eq!(
            records[2]
                .get("Type")
                .map(|s| s.as_str()),
            Some("gateway")
        );
    }

    #[test]
    fn record_order_matches_source() {
        let options = TableOptions {
            comment_prefix: Some("="),
            ..TableOptions::default()
        };
        let records = parse_table(SOFIA_STATUS, &options);
        let names: Vec<&str> = records
            .iter()
            .take(3)
            .filter_map(|r| {
                r.get("Name")
                    .map(|s| s.as_str())
            })
            .collect();
        assert_eq!(names, ["internal", "external", "external::gw1"]);
    }

    #[test]
    fn delimiter_mode() {
        let raw = "user,realm,status\n1001,default,Registered\n1002,default,Unregistered\n";
        let options = TableOptions {
            delimiter: Some(','),
            ..TableOptions::default()
        };
        let records = parse_table(raw, &options);

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1]
                .get("user")
                .map(|s| s.as_str()),
            Some("1002")
        );
        assert_eq!(
            records[1]
                .get("status")
                .map(|s| s.as_str()),
            Some("Unregistered")
        );
    }

    #[test]
    fn short_rows_leave_fields_empty() {
        let raw = "a,b,c\n1,2\n";
        let options = TableOptions {
            delimiter: Some(','),
            ..TableOptions::default()
        };
        let records = parse_table(raw, &options);
        assert_eq!(
            records[0]
                .get("c")
                .map(|s| s.as_str()),
            Some("")
        );
    }

    #[test]
    fn no_header_row_keys_by_index() {
        let raw = "one two\nthree four\n";
        let options = TableOptions {
            has_header_row: false,
            ..TableOptions::default()
        };
        let records = parse_table(raw, &options);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0]
                .get("0")
                .map(|s| s.as_str()),
            Some("one")
        );
        assert_eq!(
            records[1]
                .get("1")
                .map(|s| s.as_str()),
            Some("four")
        );
    }

    #[test]
    fn blank_and_comment_lines_skipped() {
        let raw = "a b\n\n==== rule ====\n1 2\n\n";
        let options = TableOptions {
            comment_prefix: Some("="),
            ..TableOptions::default()
        };
        let records = parse_table(raw, &options);
        assert_eq!(records.len(), 1);
    }
}
