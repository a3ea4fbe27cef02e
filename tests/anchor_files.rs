//! Anchor chain tests: splitting into sibling files on write and splicing
//! them back on read.

use metskit::{
    write_files, ContentFile, DigitalDocument, FieldRule, Metadata, MetsError, MetsReader, Prefs,
    MD_PHYS_PAGE_NUMBER, REF_LOGICAL_PHYSICAL,
};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

fn chain_prefs() -> Prefs {
    let mut prefs = Prefs::new();
    prefs.add_struct_type("Periodical", Some("Periodical".to_string()));
    prefs.add_struct_type("PeriodicalVolume", Some("PeriodicalVolume".to_string()));
    prefs.add_struct_type("PeriodicalIssue", None);
    prefs.add_struct_type("MultiVolumeWork", Some("MultiVolumeWork".to_string()));
    prefs.add_struct_type("Volume", None);
    prefs.add_struct_type("physSequence", None);
    prefs.add_struct_type("page", None);
    prefs.add_metadata_kind("CatalogIDDigital", false, true);
    prefs.anchor_identifier_type = "CatalogIDDigital".to_string();
    prefs.set_pointer_urls([
        "https://example.org/periodical.xml",
        "https://example.org/volume.xml",
        "https://example.org/issue.xml",
    ]);
    prefs.add_rule(
        FieldRule::new("TitleDocMain")
            .write_path("./mods:titleInfo/mods:title")
            .read_path("./mods:titleInfo/mods:title"),
    );
    prefs.add_rule(
        FieldRule::new("CatalogIDDigital")
            .write_path("./mods:recordInfo/mods:recordIdentifier")
            .read_path("./mods:recordInfo/mods:recordIdentifier"),
    );
    prefs
}

fn attach_pages(doc: &mut DigitalDocument, leaf: metskit::DsId) {
    let seq = doc.create_node("physSequence");
    doc.physical_root = Some(seq);
    let page = doc.create_node("page");
    doc.add_metadata(page, Metadata::new(MD_PHYS_PAGE_NUMBER, "1"));
    doc.add_child(seq, page).unwrap();
    let fid = doc
        .file_set
        .add(ContentFile::new("FILE_0001", "file:///images/0001.tif", "image/tiff"));
    doc.attach_file(page, fid);
    doc.add_reference(leaf, page, REF_LOGICAL_PHYSICAL);
}

fn two_level_doc() -> DigitalDocument {
    let mut doc = DigitalDocument::new();
    let work = doc.create_node("MultiVolumeWork");
    doc.add_metadata(work, Metadata::new("CatalogIDDigital", "W1"));
    doc.add_metadata(work, Metadata::new("TitleDocMain", "Collected Works"));
    let volume = doc.create_node("Volume");
    doc.add_metadata(volume, Metadata::new("CatalogIDDigital", "W1V2"));
    doc.add_metadata(volume, Metadata::new("TitleDocMain", "Volume 2"));
    doc.add_child(work, volume).unwrap();
    doc.logical_root = Some(work);
    attach_pages(&mut doc, volume);
    doc
}

fn three_level_doc() -> DigitalDocument {
    let mut doc = DigitalDocument::new();
    let periodical = doc.create_node("Periodical");
    doc.add_metadata(periodical, Metadata::new("CatalogIDDigital", "P1"));
    doc.add_metadata(periodical, Metadata::new("TitleDocMain", "The Journal"));
    let volume = doc.create_node("PeriodicalVolume");
    doc.add_metadata(volume, Metadata::new("CatalogIDDigital", "P1V3"));
    doc.add_metadata(volume, Metadata::new("TitleDocMain", "1901"));
    let issue = doc.create_node("PeriodicalIssue");
    doc.add_metadata(issue, Metadata::new("CatalogIDDigital", "P1V3I7"));
    doc.add_metadata(issue, Metadata::new("TitleDocMain", "Issue 7"));
    doc.add_child(periodical, volume).unwrap();
    doc.add_child(volume, issue).unwrap();
    doc.logical_root = Some(periodical);
    attach_pages(&mut doc, issue);
    doc
}

#[test]
fn single_level_chain_writes_two_files() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&two_level_doc(), &prefs, &primary).unwrap();

    assert_eq!(written.len(), 2);
    assert_eq!(written[0], dir.path().join("meta_anchor.xml"));
    assert_eq!(written[1], primary);

    let anchor = fs::read_to_string(&written[0]).unwrap();
    assert!(anchor.contains("TYPE=\"MultiVolumeWork\""));
    assert!(anchor.contains("<mods:title>Collected Works</mods:title>"));
    assert!(anchor.contains("xlink:href=\"https://example.org/volume.xml\""));
    // The anchor file holds no pages.
    assert!(!anchor.contains("fileSec"));

    let child = fs::read_to_string(&written[1]).unwrap();
    assert!(child.contains("<mods:title>Volume 2</mods:title>"));
    assert!(!child.contains("Collected Works"));
    // The flagged identifier connects the file back to its anchor.
    assert!(child.contains("anchorId=\"true\""));
    assert!(child.contains(">W1<"));
}

#[test]
fn single_level_chain_resolves_on_read() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    write_files(&two_level_doc(), &prefs, &primary).unwrap();

    let reader = MetsReader::new(&prefs).unwrap();
    let doc = reader.read_file(&primary).unwrap();

    let work = doc.logical_root.unwrap();
    assert_eq!(doc.get(work).type_name, "MultiVolumeWork");
    assert_eq!(
        doc.first_metadata(work, "TitleDocMain").unwrap().value,
        "Collected Works"
    );
    let volume = doc.get(work).children[0];
    assert_eq!(
        doc.first_metadata(volume, "TitleDocMain").unwrap().value,
        "Volume 2"
    );
    // Pages and links come from the primary file.
    assert_eq!(doc.file_set.len(), 1);
    assert_eq!(doc.get(volume).references.len(), 1);
}

#[test]
fn three_level_chain_writes_three_files() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&three_level_doc(), &prefs, &primary).unwrap();

    assert_eq!(written.len(), 3);
    assert_eq!(written[0], dir.path().join("meta_Periodical.xml"));
    assert_eq!(written[1], dir.path().join("meta_PeriodicalVolume.xml"));
    assert_eq!(written[2], primary);

    // Outermost file: its own metadata plus one downward pointer.
    let top = fs::read_to_string(&written[0]).unwrap();
    assert!(top.contains("<mods:title>The Journal</mods:title>"));
    assert_eq!(top.matches("<mets:mptr").count(), 1);
    assert!(top.contains("xlink:href=\"https://example.org/volume.xml\""));
    assert!(!top.contains("1901"));

    // Middle file: volume metadata plus one downward pointer.
    let middle = fs::read_to_string(&written[1]).unwrap();
    assert!(middle.contains("<mods:title>1901</mods:title>"));
    assert_eq!(middle.matches("<mets:mptr").count(), 1);
    assert!(middle.contains("xlink:href=\"https://example.org/issue.xml\""));
    assert!(!middle.contains("The Journal"));

    // Innermost file: issue content plus one upward pointer.
    let rest = fs::read_to_string(&written[2]).unwrap();
    assert!(rest.contains("<mods:title>Issue 7</mods:title>"));
    assert_eq!(rest.matches("<mets:mptr").count(), 1);
    assert!(rest.contains("xlink:href=\"https://example.org/volume.xml\""));
    assert!(rest.contains("fileSec"));
}

#[test]
fn three_level_chain_resolves_on_read() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    write_files(&three_level_doc(), &prefs, &primary).unwrap();

    let reader = MetsReader::new(&prefs).unwrap();
    let doc = reader.read_file(&primary).unwrap();

    let periodical = doc.logical_root.unwrap();
    assert_eq!(
        doc.first_metadata(periodical, "TitleDocMain").unwrap().value,
        "The Journal"
    );
    let volume = doc.get(periodical).children[0];
    assert_eq!(doc.first_metadata(volume, "TitleDocMain").unwrap().value, "1901");
    let issue = doc.get(volume).children[0];
    assert_eq!(
        doc.first_metadata(issue, "TitleDocMain").unwrap().value,
        "Issue 7"
    );
}

#[test]
fn splice_is_idempotent_across_cycles() {
    let prefs = chain_prefs();
    let reader = MetsReader::new(&prefs).unwrap();

    let dir_a = TempDir::new().unwrap();
    let primary_a = dir_a.path().join("meta.xml");
    write_files(&three_level_doc(), &prefs, &primary_a).unwrap();
    let doc = reader.read_file(&primary_a).unwrap();

    let dir_b = TempDir::new().unwrap();
    let primary_b = dir_b.path().join("meta.xml");
    let written_b = write_files(&doc, &prefs, &primary_b).unwrap();
    let doc = reader.read_file(&primary_b).unwrap();

    let dir_c = TempDir::new().unwrap();
    let primary_c = dir_c.path().join("meta.xml");
    let written_c = write_files(&doc, &prefs, &primary_c).unwrap();

    for (b, c) in written_b.iter().zip(&written_c) {
        assert_eq!(
            fs::read_to_string(b).unwrap(),
            fs::read_to_string(c).unwrap()
        );
    }
}

#[test]
fn identifier_pattern_applied_on_both_sides() {
    let mut prefs = chain_prefs();
    prefs.anchor_identifier_pattern = Some("s/^PPN//".to_string());

    let mut doc = DigitalDocument::new();
    let work = doc.create_node("MultiVolumeWork");
    doc.add_metadata(work, Metadata::new("CatalogIDDigital", "PPNW1"));
    doc.add_metadata(work, Metadata::new("TitleDocMain", "Collected Works"));
    let volume = doc.create_node("Volume");
    doc.add_metadata(volume, Metadata::new("CatalogIDDigital", "PPNW1V2"));
    doc.add_metadata(volume, Metadata::new("TitleDocMain", "Volume 2"));
    doc.add_child(work, volume).unwrap();
    doc.logical_root = Some(work);
    attach_pages(&mut doc, volume);

    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&doc, &prefs, &primary).unwrap();

    // The flagged value carries the transformed form, the anchor's own
    // identifier stays raw.
    let child = fs::read_to_string(&written[1]).unwrap();
    assert!(child.contains(">W1<"));
    let anchor = fs::read_to_string(&written[0]).unwrap();
    assert!(anchor.contains(">PPNW1<"));

    let reader = MetsReader::new(&prefs).unwrap();
    let doc = reader.read_file(&primary).unwrap();
    let work = doc.logical_root.unwrap();
    assert_eq!(
        doc.first_metadata(work, "TitleDocMain").unwrap().value,
        "Collected Works"
    );
}

#[test]
fn missing_anchor_file_is_fatal() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&two_level_doc(), &prefs, &primary).unwrap();
    fs::remove_file(&written[0]).unwrap();

    let reader = MetsReader::new(&prefs).unwrap();
    let err = reader.read_file(&primary).unwrap_err();
    assert!(matches!(err, MetsError::AnchorError(_)));
}

#[test]
fn unresolved_identifier_is_fatal() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&two_level_doc(), &prefs, &primary).unwrap();
    // Make the anchor's identifier no longer match the flagged one.
    let anchor = fs::read_to_string(&written[0]).unwrap();
    fs::write(&written[0], anchor.replace(">W1<", ">OTHER<")).unwrap();

    let reader = MetsReader::new(&prefs).unwrap();
    let err = reader.read_file(&primary).unwrap_err();
    assert!(matches!(err, MetsError::AnchorError(_)));
}

#[test]
fn anchor_file_alone_reads_unresolved() {
    let prefs = chain_prefs();
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("meta.xml");
    let written = write_files(&two_level_doc(), &prefs, &primary).unwrap();

    // Reading the anchor file itself has nothing to resolve.
    let reader = MetsReader::new(&prefs).unwrap();
    let doc = reader.read_file(&written[0]).unwrap();
    let work = doc.logical_root.unwrap();
    assert_eq!(
        doc.first_metadata(work, "TitleDocMain").unwrap().value,
        "Collected Works"
    );
    // The downward pointer division stays a bare stub.
    let stub = doc.get(work).children[0];
    assert!(doc.get(stub).metadata.is_empty());
}

#[test]
fn short_pointer_list_is_fatal() {
    let mut prefs = chain_prefs();
    prefs.set_pointer_urls(["https://example.org/only.xml"]);
    let dir = TempDir::new().unwrap();
    let err = write_files(&two_level_doc(), &prefs, dir.path().join("meta.xml")).unwrap_err();
    assert!(matches!(err, MetsError::Config(_)));
}
