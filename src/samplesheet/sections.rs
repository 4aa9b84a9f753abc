//! Line-oriented scanning of bracketed samplesheet sections.
//!
//! Every vendor dialect shares the same outer shape: a `[Name]` line opens a
//! section and its body runs until the next header (or, for some dialects,
//! the first blank line). What differs is how body lines become fields, which
//! is decided per section by [`SectionKind`].

use super::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRule {
    /// Body ends only at the next `[Section]` header. Blank lines are skipped.
    NextHeader,
    /// Body ends at the next header or the first blank line, whichever comes first.
    NextHeaderOrBlank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection<'a> {
    pub name: &'a str,
    pub lines: Vec<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct SectionScanner {
    stop: StopRule,
}

impl SectionScanner {
    pub fn new(stop: StopRule) -> Self {
        Self { stop }
    }

    pub fn scan<'a>(&self, text: &'a str) -> Vec<RawSection<'a>> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut sections: Vec<RawSection<'a>> = Vec::new();
        let mut open = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(name) = section_header(trimmed) {
                sections.push(RawSection {
                    name,
                    lines: Vec::new(),
                });
                open = true;
                continue;
            }
            if !open {
                continue;
            }
            if is_blank(trimmed) {
                if self.stop == StopRule::NextHeaderOrBlank {
                    open = false;
                }
                continue;
            }
            if let Some(section) = sections.last_mut() {
                section.lines.push(trimmed);
            }
        }
        sections
    }
}

fn section_header(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(',');
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let name = rest[..end].trim();
    (!name.is_empty()).then_some(name)
}

fn is_blank(line: &str) -> bool {
    line.trim_end_matches(',').trim().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `Key,Value` lines, folded into a single record.
    KeyValue,
    /// Header row followed by data rows.
    Table,
    /// Legacy `[Reads]`: one cycle count per line.
    ReadCycles,
}

impl SectionKind {
    pub fn for_section(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower == "reads" {
            SectionKind::ReadCycles
        } else if lower == "data" || lower.ends_with("_data") {
            SectionKind::Table
        } else {
            SectionKind::KeyValue
        }
    }

    pub fn build(self, lines: &[&str]) -> Vec<Record> {
        match self {
            SectionKind::KeyValue => vec![key_values(lines)],
            SectionKind::Table => table(lines),
            SectionKind::ReadCycles => vec![read_cycles(lines)],
        }
    }
}

fn key_values(lines: &[&str]) -> Record {
    let mut record = Record::new();
    for line in lines {
        let mut fields = fields(line);
        while fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }
        let Some((key, rest)) = fields.split_first() else {
            continue;
        };
        let key = normalize_key(key);
        if !key.is_empty() {
            record.insert(key, rest.join(","));
        }
    }
    record
}

/// Cloud sheets already use `Read1Cycles,151`. Legacy sheets list bare
/// numbers, which are numbered here so both end up as `read1_cycles`.
fn read_cycles(lines: &[&str]) -> Record {
    let mut record = Record::new();
    let mut ordinal = 0;
    for line in lines {
        let fields = fields(line);
        let first = fields.first().map(String::as_str).unwrap_or("");
        if first.is_empty() {
            continue;
        }
        if first.chars().all(|ch| ch.is_ascii_digit()) {
            ordinal += 1;
            record.insert(format!("read{ordinal}_cycles"), first.to_string());
        } else {
            let value = fields.get(1).cloned().unwrap_or_default();
            record.insert(normalize_key(first), value);
        }
    }
    record
}

fn table(lines: &[&str]) -> Vec<Record> {
    let Some((header, rows)) = lines.split_first() else {
        return Vec::new();
    };
    let columns: Vec<String> = fields(header).iter().map(|field| normalize_key(field)).collect();

    let mut records = Vec::new();
    for row in rows {
        let values = fields(row);
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        let mut record = Record::new();
        for (idx, column) in columns.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            let value = values.get(idx).cloned().unwrap_or_default();
            record.insert(column.clone(), value);
        }
        records.push(record);
    }
    records
}

/// Splits one line into trimmed fields; quoted fields may hold commas.
fn fields(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(str::to_string).collect(),
        Ok(false) => Vec::new(),
        Err(_) => line.split(',').map(|field| field.trim().to_string()).collect(),
    }
}

/// Vendor field names (`Sample_ID`, `IEMFileVersion`, `Experiment Name`,
/// `Read1Cycles`) to snake_case (`sample_id`, `iem_file_version`,
/// `experiment_name`, `read1_cycles`).
pub fn normalize_key(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (idx, &ch) in chars.iter().enumerate() {
        if ch == ' ' || ch == '-' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_ascii_uppercase() && idx > 0 && !out.ends_with('_') {
            let prev = chars[idx - 1];
            let next_is_lower = chars
                .get(idx + 1)
                .map(|next| next.is_ascii_lowercase())
                .unwrap_or(false);
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(ch.to_ascii_lowercase());
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_vendor_keys() {
        assert_eq!(normalize_key("Sample_ID"), "sample_id");
        assert_eq!(normalize_key("Sample_Project"), "sample_project");
        assert_eq!(normalize_key("IEMFileVersion"), "iem_file_version");
        assert_eq!(normalize_key("Experiment Name"), "experiment_name");
        assert_eq!(normalize_key("Read1Cycles"), "read1_cycles");
        assert_eq!(normalize_key("ProjectName"), "project_name");
        assert_eq!(normalize_key("index2"), "index2");
        assert_eq!(normalize_key("I7_Index_ID"), "i7_index_id");
    }

    #[test]
    fn blank_line_closes_section_when_requested() {
        let text = "[Header]\nRunName,abc\n\nStray,line\n[Reads]\nRead1Cycles,151\n";
        let sections = SectionScanner::new(StopRule::NextHeaderOrBlank).scan(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].lines, vec!["RunName,abc"]);

        let sections = SectionScanner::new(StopRule::NextHeader).scan(text);
        assert_eq!(sections[0].lines, vec!["RunName,abc", "Stray,line"]);
    }

    #[test]
    fn table_skips_empty_rows_and_pads_short_rows() {
        let lines = ["Sample_ID,Sample_Name,index", "LIB1,,ACGT", ",,", "LIB2"];
        let records = table(&lines);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["sample_name"], "");
        assert_eq!(records[1]["index"], "");
    }

    #[test]
    fn quoted_fields_keep_their_commas() {
        let lines = [
            "Sample_ID,Sample_Name,Description,index",
            r#"LIB1,LIB_1,"tumour, left lobe",ACGT"#,
        ];
        let records = table(&lines);
        assert_eq!(records[0]["description"], "tumour, left lobe");
        assert_eq!(records[0]["index"], "ACGT");

        let record = key_values(&[r#"Description,"pilot, rerun",,"#, "Experiment Name,run-42,,"]);
        assert_eq!(record["description"], "pilot, rerun");
        assert_eq!(record["experiment_name"], "run-42");
    }

    #[test]
    fn legacy_read_cycles_are_numbered() {
        let record = read_cycles(&["151,", "151"]);
        assert_eq!(record["read1_cycles"], "151");
        assert_eq!(record["read2_cycles"], "151");
    }
}
