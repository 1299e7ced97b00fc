use crate::types::{AffectedHousehold, Household};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Deserialize;
use std::collections::HashSet;

pub const CSV_HEADER: [&str; 6] = ["Name", "Sex", "Age", "Barangay", "Contact", "Disability"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportFilter {
    #[serde(default)]
    pub barangay: Option<String>,
    #[serde(default)]
    pub affected_only: bool,
}

impl ExportFilter {
    pub fn accepts(&self, household: &Household) -> bool {
        match self.barangay.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => household.barangay.trim().eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

/// Members of the households passing `filter`; with `affected_only` only
/// households inside the hazard are considered, each of them once.
pub fn filtered_csv(
    households: &[Household],
    affected: &[AffectedHousehold],
    filter: &ExportFilter,
) -> csv::Result<String> {
    if filter.affected_only {
        let mut seen = HashSet::new();
        members_csv(
            affected
                .iter()
                .map(|a| &a.record)
                .filter(|h: &&Household| {
                    let h: &Household = *h;
                    seen.insert(h.id.as_str())
                })
                .filter(|h| filter.accepts(h)),
        )
    } else {
        members_csv(households.iter().filter(|h| filter.accepts(h)))
    }
}

/// One row per member of each household, lines joined by `\n`. Fields that
/// contain separators are quoted.
pub fn members_csv<'a>(households: impl IntoIterator<Item = &'a Household>) -> csv::Result<String> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for household in households {
        for member in &household.members {
            writer.write_record([
                member.name.as_str(),
                member.sex.as_str(),
                member.age.as_str(),
                household.barangay.as_str(),
                household.contact.as_str(),
                member.disability.as_str(),
            ])?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}
