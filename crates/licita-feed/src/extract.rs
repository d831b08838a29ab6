use chrono::{DateTime, FixedOffset};
use licita_core::Row;
use tracing::debug;

use crate::ns::{FieldPath, Namespaces};
use crate::xml::FeedEntry;
use crate::FeedError;

/// Columns mined from an entry; `updated` and `raw_xml` are handled
/// separately, and `id` is read from `atom:id` outside the field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Id,
    FolderId,
    Status,
    Cpv,
    BudgetValue,
    EstimatedValue,
    AwardValue,
    Nuts,
    AwardDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Free text or code; defaults to `""`.
    Text,
    /// Monetary amount coerced to `f64`; defaults to `0.0`.
    Amount,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::FolderId => "folder_id",
            Self::Status => "status",
            Self::Cpv => "cpv",
            Self::BudgetValue => "budget_value",
            Self::EstimatedValue => "estimated_value",
            Self::AwardValue => "award_value",
            Self::Nuts => "nuts",
            Self::AwardDate => "award_date",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Self::BudgetValue | Self::EstimatedValue | Self::AwardValue => ColumnKind::Amount,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub column: Column,
    pub path: &'static str,
}

pub const FIELD_TABLE: &[FieldSpec] = &[
    FieldSpec {
        column: Column::FolderId,
        path: ".//cbc:ContractFolderID",
    },
    FieldSpec {
        column: Column::Status,
        path: ".//cac-place-ext:ContractFolderStatus/cbc-place-ext:ContractFolderStatusCode",
    },
    FieldSpec {
        column: Column::Cpv,
        path: ".//cac:RequiredCommodityClassification/cbc:ItemClassificationCode",
    },
    FieldSpec {
        column: Column::BudgetValue,
        path: ".//cbc:TotalAmount",
    },
    FieldSpec {
        column: Column::EstimatedValue,
        path: ".//cbc:EstimatedOverallContractAmount",
    },
    FieldSpec {
        column: Column::AwardValue,
        path: ".//cac:LegalMonetaryTotal/cbc:TaxExclusiveAmount",
    },
    FieldSpec {
        column: Column::Nuts,
        path: ".//cac:RealizedLocation/cbc:CountrySubentityCode",
    },
    FieldSpec {
        column: Column::AwardDate,
        path: ".//cac:TenderResult/cbc:AwardDate",
    },
];

/// A row plus the columns that fell back to their default.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub row: Row,
    pub defaulted: Vec<Column>,
}

/// The entry's `atom:id`, or `None` when it is absent or empty.
pub fn entry_id(entry: &FeedEntry, ns: &Namespaces) -> Option<String> {
    let path = FieldPath::parse("id").ok()?;
    entry
        .element
        .find_text(&path, ns)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// The entry's `updated` timestamp, which orders the feed newest-first.
pub fn entry_updated(entry: &FeedEntry, ns: &Namespaces) -> Result<DateTime<FixedOffset>, FeedError> {
    let path = FieldPath::parse("updated")?;
    let value = entry
        .element
        .find_text(&path, ns)
        .filter(|v| !v.is_empty())
        .ok_or(FeedError::MissingRequired("updated"))?;
    DateTime::parse_from_rfc3339(value).map_err(|source| FeedError::BadTimestamp {
        id: entry_id(entry, ns).unwrap_or_default(),
        value: value.to_string(),
        source,
    })
}

/// Build a [`Row`] from one entry, defaulting every field that is absent,
/// empty or (for amounts) not a finite number. A missing `id` becomes `""`;
/// only `updated` is required.
pub fn extract_row(
    entry: &FeedEntry,
    ns: &Namespaces,
    table: &[FieldSpec],
) -> Result<Extracted, FeedError> {
    let id = entry_id(entry, ns);
    let mut defaulted = Vec::new();
    if id.is_none() {
        defaulted.push(Column::Id);
    }
    let mut row = Row {
        id: id.unwrap_or_default(),
        updated: entry_updated(entry, ns)?,
        folder_id: String::new(),
        status: String::new(),
        cpv: String::new(),
        budget_value: 0.0,
        estimated_value: 0.0,
        award_value: 0.0,
        nuts: String::new(),
        award_date: String::new(),
        raw_xml: entry.raw_xml.clone(),
    };

    for field in table {
        let path = FieldPath::parse(field.path)?;
        let applied = match entry.element.find_text(&path, ns).filter(|t| !t.is_empty()) {
            Some(text) => assign(&mut row, field.column, text),
            None => false,
        };
        if !applied {
            defaulted.push(field.column);
        }
    }

    if !defaulted.is_empty() {
        debug!(id = %row.id, defaulted = ?defaulted, "fields defaulted");
    }
    Ok(Extracted { row, defaulted })
}

fn assign(row: &mut Row, column: Column, text: &str) -> bool {
    let slot = match column {
        Column::Id => &mut row.id,
        Column::FolderId => &mut row.folder_id,
        Column::Status => &mut row.status,
        Column::Cpv => &mut row.cpv,
        Column::Nuts => &mut row.nuts,
        Column::AwardDate => &mut row.award_date,
        Column::BudgetValue => return assign_amount(&mut row.budget_value, column, text),
        Column::EstimatedValue => return assign_amount(&mut row.estimated_value, column, text),
        Column::AwardValue => return assign_amount(&mut row.award_value, column, text),
    };
    *slot = text.to_string();
    true
}

fn assign_amount(slot: &mut f64, column: Column, text: &str) -> bool {
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            *slot = value;
            true
        }
        _ => {
            debug!(column = column.name(), text, "non-numeric amount");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_page;

    fn page(entries: &str) -> crate::FeedPage {
        let xml = format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"
                xmlns:cbc="urn:dgpe:names:draft:codice:schema:xsd:CommonBasicComponents-2"
                xmlns:cac="urn:dgpe:names:draft:codice:schema:xsd:CommonAggregateComponents-2"
                xmlns:cbc-place-ext="urn:dgpe:names:draft:codice-place-ext:schema:xsd:CommonBasicComponents-2"
                xmlns:cac-place-ext="urn:dgpe:names:draft:codice-place-ext:schema:xsd:CommonAggregateComponents-2">{entries}</feed>"#
        );
        parse_page(xml.as_bytes(), &Namespaces::well_known()).expect("page")
    }

    #[test]
    fn full_entry_extracts_every_field() {
        let page = page(
            r#"<entry><id>urn:full</id><updated>2024-05-10T12:00:00.5+02:00</updated>
              <cac-place-ext:ContractFolderStatus>
                <cbc:ContractFolderID>2024/001</cbc:ContractFolderID>
                <cbc-place-ext:ContractFolderStatusCode>ADJ</cbc-place-ext:ContractFolderStatusCode>
                <cac:ProcurementProject>
                  <cac:BudgetAmount>
                    <cbc:EstimatedOverallContractAmount>1000</cbc:EstimatedOverallContractAmount>
                    <cbc:TotalAmount>1210.50</cbc:TotalAmount>
                  </cac:BudgetAmount>
                  <cac:RequiredCommodityClassification><cbc:ItemClassificationCode>45000000</cbc:ItemClassificationCode></cac:RequiredCommodityClassification>
                  <cac:RealizedLocation><cbc:CountrySubentityCode>ES300</cbc:CountrySubentityCode></cac:RealizedLocation>
                </cac:ProcurementProject>
                <cac:TenderResult>
                  <cbc:AwardDate>2024-05-01</cbc:AwardDate>
                  <cac:AwardedTenderedProject><cac:LegalMonetaryTotal><cbc:TaxExclusiveAmount>950.25</cbc:TaxExclusiveAmount></cac:LegalMonetaryTotal></cac:AwardedTenderedProject>
                </cac:TenderResult>
              </cac-place-ext:ContractFolderStatus></entry>"#,
        );
        let extracted = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
        let row = extracted.row;
        assert!(extracted.defaulted.is_empty());
        assert_eq!(row.id, "urn:full");
        assert_eq!(
            row.updated,
            DateTime::parse_from_rfc3339("2024-05-10T10:00:00.5Z").expect("ts")
        );
        assert_eq!(row.folder_id, "2024/001");
        assert_eq!(row.status, "ADJ");
        assert_eq!(row.cpv, "45000000");
        assert_eq!(row.budget_value, 1210.50);
        assert_eq!(row.estimated_value, 1000.0);
        assert_eq!(row.award_value, 950.25);
        assert_eq!(row.nuts, "ES300");
        assert_eq!(row.award_date, "2024-05-01");
        assert!(row.raw_xml.starts_with("<entry xmlns="));
    }

    #[test]
    fn missing_fields_take_declared_defaults() {
        let page = page(
            r#"<entry><id>urn:bare</id><updated>2024-05-10T12:00:00Z</updated>
              <cbc:TotalAmount>n/a</cbc:TotalAmount><cbc:ContractFolderID>  </cbc:ContractFolderID></entry>"#,
        );
        let extracted = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
        let row = &extracted.row;
        assert_eq!(row.folder_id, "");
        assert_eq!(row.status, "");
        assert_eq!(row.cpv, "");
        assert_eq!(row.nuts, "");
        assert_eq!(row.award_date, "");
        assert_eq!(row.budget_value, 0.0);
        assert_eq!(row.estimated_value, 0.0);
        assert_eq!(row.award_value, 0.0);
        assert_eq!(extracted.defaulted.len(), FIELD_TABLE.len());
        assert!(row.raw_xml.contains("<cbc:TotalAmount>n/a</cbc:TotalAmount>"));
    }

    #[test]
    fn non_finite_amounts_default() {
        let page = page(
            r#"<entry><id>urn:nan</id><updated>2024-05-10T12:00:00Z</updated>
              <cbc:TotalAmount>NaN</cbc:TotalAmount><cbc:EstimatedOverallContractAmount>inf</cbc:EstimatedOverallContractAmount></entry>"#,
        );
        let extracted = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
        assert_eq!(extracted.row.budget_value, 0.0);
        assert_eq!(extracted.row.estimated_value, 0.0);
        assert!(extracted.defaulted.contains(&Column::BudgetValue));
        assert!(extracted.defaulted.contains(&Column::EstimatedValue));
    }

    #[test]
    fn status_path_requires_the_parent_step() {
        // A status code outside ContractFolderStatus does not match.
        let page = page(
            r#"<entry><id>urn:s</id><updated>2024-05-10T12:00:00Z</updated>
              <cbc-place-ext:ContractFolderStatusCode>PUB</cbc-place-ext:ContractFolderStatusCode></entry>"#,
        );
        let extracted = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
        assert_eq!(extracted.row.status, "");
    }

    #[test]
    fn missing_id_defaults_but_updated_is_required() {
        let page = page(
            r#"<entry><updated>2024-05-10T12:00:00Z</updated><cbc:ContractFolderID>F-1</cbc:ContractFolderID></entry>
               <entry><id>urn:x</id></entry>
               <entry><id>urn:y</id><updated>last tuesday</updated></entry>"#,
        );
        let ns = &page.namespaces;
        let anonymous = extract_row(&page.entries[0], ns, FIELD_TABLE).expect("row");
        assert_eq!(anonymous.row.id, "");
        assert_eq!(anonymous.row.folder_id, "F-1");
        assert_eq!(anonymous.defaulted.first(), Some(&Column::Id));
        assert!(anonymous.row.raw_xml.contains("<cbc:ContractFolderID>F-1</cbc:ContractFolderID>"));
        assert!(matches!(
            extract_row(&page.entries[1], ns, FIELD_TABLE),
            Err(FeedError::MissingRequired("updated"))
        ));
        assert!(matches!(
            entry_updated(&page.entries[1], ns),
            Err(FeedError::MissingRequired("updated"))
        ));
        match entry_updated(&page.entries[2], ns) {
            Err(FeedError::BadTimestamp { id, value, .. }) => {
                assert_eq!(id, "urn:y");
                assert_eq!(value, "last tuesday");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn field_table_resolves_against_well_known_namespaces() {
        let ns = Namespaces::well_known();
        for field in FIELD_TABLE {
            let path = FieldPath::parse(field.path).expect("path");
            for step in &path.steps {
                assert!(ns.resolve(step.prefix.as_deref()).is_some(), "{}", field.path);
            }
        }
        let amounts = FIELD_TABLE
            .iter()
            .filter(|field| field.column.kind() == ColumnKind::Amount)
            .count();
        assert_eq!(amounts, 3);
    }
}
