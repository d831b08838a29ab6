use std::path::PathBuf;

use chrono::DateTime;
use licita_feed::xml::parse_document;
use licita_feed::{extract_row, parse_page, Column, Namespaces, FIELD_TABLE};

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/feed")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|err| panic!("reading {}: {err}", path.display()))
}

#[test]
fn first_page_yields_entries_and_relative_next_link() {
    let page = parse_page(&fixture("page-1.atom"), &Namespaces::well_known()).expect("page");

    assert_eq!(page.entries.len(), 2, "tombstones are not entries");
    assert_eq!(
        page.next_url.as_deref(),
        Some("licitacionesPerfilesContratanteCompleto3_20240510_120000.atom")
    );

    let first = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
    assert!(first.defaulted.is_empty());
    let row = first.row;
    assert_eq!(
        row.id,
        "https://contrataciondelestado.es/sindicacion/licitacionesPerfilContratante/15123001"
    );
    assert_eq!(
        row.updated,
        DateTime::parse_from_rfc3339("2024-05-10T13:45:07.118+02:00").expect("ts")
    );
    assert_eq!(row.folder_id, "2024/SER/0042");
    assert_eq!(row.status, "ADJ");
    assert_eq!(row.cpv, "77310000");
    assert_eq!(row.budget_value, 48400.0);
    assert_eq!(row.estimated_value, 80000.0);
    assert_eq!(row.award_value, 38750.5);
    assert_eq!(row.nuts, "ES300");
    assert_eq!(row.award_date, "2024-05-08");

    let second = extract_row(&page.entries[1], &page.namespaces, FIELD_TABLE).expect("row");
    assert_eq!(
        second.defaulted,
        vec![
            Column::EstimatedValue,
            Column::AwardValue,
            Column::Nuts,
            Column::AwardDate
        ]
    );
    assert_eq!(second.row.budget_value, 121000.0);
    assert_eq!(second.row.award_value, 0.0);
    assert_eq!(second.row.nuts, "");
}

#[test]
fn last_page_has_no_next_link_and_defaults_bad_amounts() {
    let page = parse_page(&fixture("page-2.atom"), &Namespaces::well_known()).expect("page");
    assert!(page.next_url.is_none());
    assert_eq!(page.entries.len(), 1);

    let extracted = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");
    assert_eq!(extracted.row.status, "EV");
    assert_eq!(extracted.row.estimated_value, 0.0);
    assert_eq!(extracted.row.budget_value, 605000.0);
    assert_eq!(extracted.row.nuts, "ES243");
    assert_eq!(
        extracted.defaulted,
        vec![
            Column::Cpv,
            Column::EstimatedValue,
            Column::AwardValue,
            Column::AwardDate
        ]
    );
}

#[test]
fn raw_entry_xml_reparses_with_the_same_fields() {
    let page = parse_page(&fixture("page-1.atom"), &Namespaces::well_known()).expect("page");
    let original = extract_row(&page.entries[0], &page.namespaces, FIELD_TABLE).expect("row");

    let element = parse_document(&original.row.raw_xml).expect("standalone entry");
    assert_eq!(element.name, "entry");
    let reparsed = licita_feed::FeedEntry {
        element,
        raw_xml: original.row.raw_xml.clone(),
    };
    let again = extract_row(&reparsed, &Namespaces::well_known(), FIELD_TABLE).expect("row");
    assert_eq!(again.row, original.row);
}
