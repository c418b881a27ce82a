//! OOXML package rewrite
//!
//! The normalizer edits a workbook the way a spreadsheet library would, but
//! without re-encoding anything it does not touch: every untouched zip entry
//! is raw-copied into the output package, and only the worksheet XML for
//! recognized sheets (plus the package plumbing a new table part requires)
//! is rewritten.

use super::layout::CellRef;
use crate::utils::error::{AppError, AppResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::fmt::Display;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const RELATIONSHIP_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const TABLE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/table";
const TABLE_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.table+xml";

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

/// A table to register over a sheet's used range.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub ref_range: String,
    pub columns: Vec<String>,
}

/// Everything to change about one recognized sheet.
#[derive(Debug, Clone)]
pub struct SheetPatch {
    pub sheet_name: String,
    pub freeze: CellRef,
    pub table: TableSpec,
}

fn wb_err<E: Display>(e: E) -> AppError {
    AppError::Workbook(e.to_string())
}

/// Apply `patches` to the xlsx package in `bytes` and return the rewritten
/// package. An empty patch list still round-trips the package.
pub fn apply_patches(bytes: &[u8], patches: &[SheetPatch]) -> AppResult<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(wb_err)?;

    let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
    let mut additions: Vec<(String, Vec<u8>)> = Vec::new();

    if !patches.is_empty() {
        let sheets = parse_workbook_sheets(&read_part(&mut archive, WORKBOOK_PART)?)?;
        let rel_targets: HashMap<String, String> =
            parse_relationships(&read_part(&mut archive, WORKBOOK_RELS_PART)?)?
                .into_iter()
                .collect();

        let mut table_index = next_table_index(&archive);
        let mut table_part_names = Vec::new();

        for patch in patches {
            let rel_id = sheets
                .iter()
                .find(|(name, _)| name == &patch.sheet_name)
                .map(|(_, rel_id)| rel_id.clone())
                .ok_or_else(|| {
                    AppError::Workbook(format!(
                        "Sheet '{}' not found in workbook part",
                        patch.sheet_name
                    ))
                })?;
            let target = rel_targets.get(&rel_id).ok_or_else(|| {
                AppError::Workbook(format!(
                    "No relationship target for sheet '{}'",
                    patch.sheet_name
                ))
            })?;
            let sheet_part = resolve_part(target);
            let sheet_rels_part = rels_part_for(&sheet_part);

            let table_part = format!("xl/tables/table{}.xml", table_index);
            additions.push((table_part.clone(), build_table_xml(table_index, &patch.table)?));
            table_part_names.push(format!("/{}", table_part));

            let existing_rels = read_part_optional(&mut archive, &sheet_rels_part)?;
            let (rels_doc, table_rel_id) = add_table_relationship(
                existing_rels.as_deref(),
                &format!("../tables/table{}.xml", table_index),
            )?;
            if existing_rels.is_some() {
                replacements.insert(sheet_rels_part, rels_doc);
            } else {
                additions.push((sheet_rels_part, rels_doc));
            }

            let sheet_xml = read_part(&mut archive, &sheet_part)?;
            replacements.insert(
                sheet_part,
                patch_worksheet(&sheet_xml, patch.freeze, &table_rel_id)?,
            );

            table_index += 1;
        }

        let content_types = read_part(&mut archive, CONTENT_TYPES_PART)?;
        replacements.insert(
            CONTENT_TYPES_PART.to_string(),
            patch_content_types(&content_types, &table_part_names)?,
        );
    }

    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    for index in 0..archive.len() {
        let name = archive.by_index_raw(index).map_err(wb_err)?.name().to_string();
        if let Some(content) = replacements.get(&name) {
            out.start_file(name, SimpleFileOptions::default())
                .map_err(wb_err)?;
            out.write_all(content).map_err(wb_err)?;
        } else {
            let entry = archive.by_index_raw(index).map_err(wb_err)?;
            out.raw_copy_file(entry).map_err(wb_err)?;
        }
    }
    for (name, content) in additions {
        out.start_file(name, SimpleFileOptions::default())
            .map_err(wb_err)?;
        out.write_all(&content).map_err(wb_err)?;
    }

    let cursor = out.finish().map_err(wb_err)?;
    Ok(cursor.into_inner())
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> AppResult<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| AppError::Workbook(format!("Missing part '{}': {}", name, e)))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content).map_err(wb_err)?;
    Ok(content)
}

fn read_part_optional(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> AppResult<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut content = Vec::new();
            file.read_to_end(&mut content).map_err(wb_err)?;
            Ok(Some(content))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(wb_err(e)),
    }
}

/// Workbook-rels targets are relative to `xl/` unless package-absolute.
fn resolve_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn rels_part_for(sheet_part: &str) -> String {
    match sheet_part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", sheet_part),
    }
}

/// Next free index for `xl/tables/tableN.xml` parts.
fn next_table_index(archive: &ZipArchive<Cursor<&[u8]>>) -> u32 {
    archive
        .file_names()
        .filter_map(|name| {
            name.strip_prefix("xl/tables/table")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()
        })
        .max()
        .unwrap_or(0)
        + 1
}

/// Sheet name to relationship-id pairs from `xl/workbook.xml`.
fn parse_workbook_sheets(xml: &[u8]) -> AppResult<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(wb_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        name = Some(attr.unescape_value().map_err(wb_err)?.into_owned());
                    } else if attr.key.as_ref().ends_with(b":id") {
                        rel_id = Some(attr.unescape_value().map_err(wb_err)?.into_owned());
                    }
                }
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Relationship id to target pairs from a `.rels` part.
fn parse_relationships(xml: &[u8]) -> AppResult<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(wb_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value().map_err(wb_err)?.into_owned()),
                        b"Target" => {
                            target = Some(attr.unescape_value().map_err(wb_err)?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.push((id, target));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// Add a table relationship to a worksheet's rels part, creating the part
/// when the worksheet had none. Returns the new document and the assigned id.
fn add_table_relationship(
    existing: Option<&[u8]>,
    target: &str,
) -> AppResult<(Vec<u8>, String)> {
    let Some(xml) = existing else {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(wb_err)?;
        let mut root = BytesStart::new("Relationships");
        root.push_attribute(("xmlns", RELATIONSHIP_NS));
        writer.write_event(Event::Start(root)).map_err(wb_err)?;
        writer
            .write_event(Event::Empty(relationship_element("rId1", target)))
            .map_err(wb_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("Relationships")))
            .map_err(wb_err)?;
        return Ok((writer.into_inner(), "rId1".to_string()));
    };

    let next = parse_relationships(xml)?
        .iter()
        .filter_map(|(id, _)| id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0)
        + 1;
    let rel_id = format!("rId{}", next);

    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(wb_err)?;
        match event {
            Event::Eof => break,
            Event::End(e) if e.local_name().as_ref() == b"Relationships" => {
                writer
                    .write_event(Event::Empty(relationship_element(&rel_id, target)))
                    .map_err(wb_err)?;
                writer.write_event(Event::End(e)).map_err(wb_err)?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"Relationships" => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::Start(e)).map_err(wb_err)?;
                writer
                    .write_event(Event::Empty(relationship_element(&rel_id, target)))
                    .map_err(wb_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new(tag)))
                    .map_err(wb_err)?;
            }
            other => {
                writer.write_event(other).map_err(wb_err)?;
            }
        }
        buf.clear();
    }

    Ok((writer.into_inner(), rel_id))
}

fn relationship_element(id: &str, target: &str) -> BytesStart<'static> {
    let mut rel = BytesStart::new("Relationship");
    rel.push_attribute(("Id", id));
    rel.push_attribute(("Type", TABLE_REL_TYPE));
    rel.push_attribute(("Target", target));
    rel
}

fn active_pane(x_split: u32, y_split: u32) -> &'static str {
    match (x_split > 0, y_split > 0) {
        (true, true) => "bottomRight",
        (false, true) => "bottomLeft",
        (true, false) => "topRight",
        (false, false) => "topLeft",
    }
}

fn pane_element(freeze: CellRef) -> BytesStart<'static> {
    let x_split = freeze.col.saturating_sub(1);
    let y_split = freeze.row.saturating_sub(1);

    let mut pane = BytesStart::new("pane");
    if x_split > 0 {
        pane.push_attribute(("xSplit", x_split.to_string().as_str()));
    }
    if y_split > 0 {
        pane.push_attribute(("ySplit", y_split.to_string().as_str()));
    }
    pane.push_attribute(("topLeftCell", freeze.a1().as_str()));
    pane.push_attribute(("activePane", active_pane(x_split, y_split)));
    pane.push_attribute(("state", "frozen"));
    pane
}

fn write_sheet_views_block(writer: &mut Writer<Vec<u8>>, freeze: CellRef) -> AppResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new("sheetViews")))
        .map_err(wb_err)?;
    let mut view = BytesStart::new("sheetView");
    view.push_attribute(("workbookViewId", "0"));
    writer.write_event(Event::Start(view)).map_err(wb_err)?;
    writer
        .write_event(Event::Empty(pane_element(freeze)))
        .map_err(wb_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("sheetView")))
        .map_err(wb_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("sheetViews")))
        .map_err(wb_err)?;
    Ok(())
}

fn write_table_parts_block(writer: &mut Writer<Vec<u8>>, rel_id: &str) -> AppResult<()> {
    let mut parts = BytesStart::new("tableParts");
    parts.push_attribute(("count", "1"));
    writer.write_event(Event::Start(parts)).map_err(wb_err)?;
    writer
        .write_event(Event::Empty(table_part_element(rel_id)))
        .map_err(wb_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("tableParts")))
        .map_err(wb_err)?;
    Ok(())
}

fn table_part_element(rel_id: &str) -> BytesStart<'static> {
    let mut part = BytesStart::new("tablePart");
    part.push_attribute(("r:id", rel_id));
    part
}

#[derive(Default)]
struct WorksheetShape {
    has_sheet_views: bool,
    has_dimension: bool,
}

fn scan_worksheet(xml: &[u8]) -> AppResult<WorksheetShape> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut shape = WorksheetShape::default();

    loop {
        match reader.read_event_into(&mut buf).map_err(wb_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"sheetViews" => shape.has_sheet_views = true,
                b"dimension" => shape.has_dimension = true,
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    Ok(shape)
}

/// Rewrite one worksheet part: install the frozen pane in its first sheet
/// view (replacing any existing pane) and register the table part reference.
fn patch_worksheet(xml: &[u8], freeze: CellRef, table_rel_id: &str) -> AppResult<Vec<u8>> {
    let shape = scan_worksheet(xml)?;

    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    let mut pane_written = false;
    let mut table_written = false;
    let mut skipping_pane = false;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(wb_err)?;
        if matches!(event, Event::Eof) {
            break;
        }

        if skipping_pane {
            if let Event::End(ref e) = event {
                if e.local_name().as_ref() == b"pane" {
                    skipping_pane = false;
                }
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"worksheet" => {
                        writer.write_event(Event::Start(e)).map_err(wb_err)?;
                        if !shape.has_sheet_views && !shape.has_dimension && !pane_written {
                            write_sheet_views_block(&mut writer, freeze)?;
                            pane_written = true;
                        }
                    }
                    b"sheetView" if !pane_written => {
                        writer.write_event(Event::Start(e)).map_err(wb_err)?;
                        writer
                            .write_event(Event::Empty(pane_element(freeze)))
                            .map_err(wb_err)?;
                        pane_written = true;
                    }
                    b"pane" => {
                        skipping_pane = true;
                    }
                    b"tableParts" if !table_written => {
                        let mut count: u32 = 0;
                        let mut rebuilt =
                            BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"count" {
                                count = attr
                                    .unescape_value()
                                    .ok()
                                    .and_then(|v| v.parse().ok())
                                    .unwrap_or(0);
                            } else {
                                rebuilt.push_attribute(attr);
                            }
                        }
                        rebuilt.push_attribute(("count", (count + 1).to_string().as_str()));
                        writer.write_event(Event::Start(rebuilt)).map_err(wb_err)?;
                        writer
                            .write_event(Event::Empty(table_part_element(table_rel_id)))
                            .map_err(wb_err)?;
                        table_written = true;
                    }
                    _ => {
                        writer.write_event(Event::Start(e)).map_err(wb_err)?;
                    }
                }
            }
            Event::Empty(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"pane" => {}
                    b"sheetView" if !pane_written => {
                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(e)).map_err(wb_err)?;
                        writer
                            .write_event(Event::Empty(pane_element(freeze)))
                            .map_err(wb_err)?;
                        writer
                            .write_event(Event::End(BytesEnd::new(tag)))
                            .map_err(wb_err)?;
                        pane_written = true;
                    }
                    b"dimension" => {
                        writer.write_event(Event::Empty(e)).map_err(wb_err)?;
                        if !shape.has_sheet_views && !pane_written {
                            write_sheet_views_block(&mut writer, freeze)?;
                            pane_written = true;
                        }
                    }
                    b"tableParts" if !table_written => {
                        // An empty tableParts carries no parts; replace it.
                        write_table_parts_block(&mut writer, table_rel_id)?;
                        table_written = true;
                    }
                    _ => {
                        writer.write_event(Event::Empty(e)).map_err(wb_err)?;
                    }
                }
            }
            Event::End(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"dimension" => {
                        writer.write_event(Event::End(e)).map_err(wb_err)?;
                        if !shape.has_sheet_views && !pane_written {
                            write_sheet_views_block(&mut writer, freeze)?;
                            pane_written = true;
                        }
                    }
                    b"worksheet" => {
                        if !pane_written {
                            write_sheet_views_block(&mut writer, freeze)?;
                            pane_written = true;
                        }
                        if !table_written {
                            write_table_parts_block(&mut writer, table_rel_id)?;
                            table_written = true;
                        }
                        writer.write_event(Event::End(e)).map_err(wb_err)?;
                    }
                    _ => {
                        writer.write_event(Event::End(e)).map_err(wb_err)?;
                    }
                }
            }
            other => {
                writer.write_event(other).map_err(wb_err)?;
            }
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

/// Register the new table parts in `[Content_Types].xml`.
fn patch_content_types(xml: &[u8], part_names: &[String]) -> AppResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(wb_err)?;
        match event {
            Event::Eof => break,
            Event::End(e) if e.local_name().as_ref() == b"Types" => {
                for part_name in part_names {
                    let mut element = BytesStart::new("Override");
                    element.push_attribute(("PartName", part_name.as_str()));
                    element.push_attribute(("ContentType", TABLE_CONTENT_TYPE));
                    writer.write_event(Event::Empty(element)).map_err(wb_err)?;
                }
                writer.write_event(Event::End(e)).map_err(wb_err)?;
            }
            other => {
                writer.write_event(other).map_err(wb_err)?;
            }
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn build_table_xml(id: u32, spec: &TableSpec) -> AppResult<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(wb_err)?;

    let mut table = BytesStart::new("table");
    table.push_attribute(("xmlns", SPREADSHEET_NS));
    table.push_attribute(("id", id.to_string().as_str()));
    table.push_attribute(("name", spec.name.as_str()));
    table.push_attribute(("displayName", spec.name.as_str()));
    table.push_attribute(("ref", spec.ref_range.as_str()));
    writer.write_event(Event::Start(table)).map_err(wb_err)?;

    let mut filter = BytesStart::new("autoFilter");
    filter.push_attribute(("ref", spec.ref_range.as_str()));
    writer.write_event(Event::Empty(filter)).map_err(wb_err)?;

    let mut columns = BytesStart::new("tableColumns");
    columns.push_attribute(("count", spec.columns.len().to_string().as_str()));
    writer.write_event(Event::Start(columns)).map_err(wb_err)?;
    for (index, column) in spec.columns.iter().enumerate() {
        let mut element = BytesStart::new("tableColumn");
        element.push_attribute(("id", (index + 1).to_string().as_str()));
        element.push_attribute(("name", column.as_str()));
        writer.write_event(Event::Empty(element)).map_err(wb_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("tableColumns")))
        .map_err(wb_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("table")))
        .map_err(wb_err)?;

    Ok(writer.into_inner())
}
