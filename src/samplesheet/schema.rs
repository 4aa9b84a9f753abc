use super::SampleSheet;

#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    pub section: &'static str,
    pub required: bool,
    /// Fields that every record of the section must carry.
    pub required_fields: &'static [&'static str],
    /// Fields that must parse as unsigned integers when present.
    pub numeric_fields: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct SheetSchema {
    pub dialect: &'static str,
    pub rules: &'static [SectionRule],
}

pub const LEGACY_SCHEMA: SheetSchema = SheetSchema {
    dialect: "legacy",
    rules: &[
        SectionRule {
            section: "header",
            required: true,
            required_fields: &[],
            numeric_fields: &[],
        },
        SectionRule {
            section: "reads",
            required: true,
            required_fields: &["read1_cycles"],
            numeric_fields: &["read1_cycles", "read2_cycles"],
        },
        SectionRule {
            section: "settings",
            required: false,
            required_fields: &[],
            numeric_fields: &[],
        },
        SectionRule {
            section: "data",
            required: true,
            required_fields: &["sample_id"],
            numeric_fields: &[],
        },
    ],
};

impl SheetSchema {
    pub fn validate(&self, sheet: &SampleSheet) -> Vec<String> {
        let mut violations = Vec::new();
        for rule in self.rules {
            let Some(records) = sheet.sections.get(rule.section) else {
                if rule.required {
                    violations.push(format!("missing section [{}]", rule.section));
                }
                continue;
            };
            for (idx, record) in records.iter().enumerate() {
                for field in rule.required_fields {
                    if !record.contains_key(*field) {
                        violations.push(format!("{}[{idx}]: missing field {field}", rule.section));
                    }
                }
                for field in rule.numeric_fields {
                    if let Some(value) = record.get(*field) {
                        if value.trim().parse::<u32>().is_err() {
                            violations.push(format!(
                                "{}[{idx}]: field {field} is not an integer: {value:?}",
                                rule.section
                            ));
                        }
                    }
                }
            }
        }
        violations
    }
}
