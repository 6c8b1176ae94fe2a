//! Export pipeline checks driven through the public surface.

use std::cell::RefCell;
use std::fs;

use image::{Rgba, RgbaImage};

use folio::{
    ChromeZone, Editor, EditorOptions, ExportError, ExportFormat, ExportRequest, RasterKind,
    Rasterizer,
};

/// Records every markup string it is asked to render, per kind.
#[derive(Default)]
struct CountingRaster {
    bodies: RefCell<Vec<String>>,
    headers: RefCell<Vec<String>>,
    footers: RefCell<Vec<String>>,
}

impl Rasterizer for CountingRaster {
    fn rasterize(
        &self,
        html: &str,
        width_px: u32,
        height_px: u32,
        kind: RasterKind,
    ) -> Result<RgbaImage, ExportError> {
        match kind {
            RasterKind::Body => self.bodies.borrow_mut().push(html.to_string()),
            RasterKind::Header => self.headers.borrow_mut().push(html.to_string()),
            RasterKind::Footer => self.footers.borrow_mut().push(html.to_string()),
        }
        Ok(RgbaImage::from_pixel(
            width_px.max(1),
            height_px.max(1),
            Rgba([250, 250, 250, 255]),
        ))
    }
}

struct OfflineRaster;

impl Rasterizer for OfflineRaster {
    fn rasterize(
        &self,
        _html: &str,
        _width_px: u32,
        _height_px: u32,
        _kind: RasterKind,
    ) -> Result<RgbaImage, ExportError> {
        Err(ExportError::Raster("raster backend offline".to_string()))
    }
}

fn three_page_editor() -> Editor {
    Editor::new(
        EditorOptions {
            initial_content: Some(
                "<p>alpha</p><div class=\"page-break\"></div>\
                 <p>beta</p><div class=\"page-break\"></div><p>gamma</p>"
                    .to_string(),
            ),
            ..Default::default()
        },
        Box::new(()),
    )
}

#[test]
fn pdf_export_rasterizes_one_body_and_caches_repeated_headers() {
    let mut editor = three_page_editor();
    assert_eq!(editor.page_count(), 3);

    // Default header first, then the first-page override.
    editor.enter_chrome_edit(ChromeZone::Header).unwrap();
    assert!(editor.close_chrome_editor("<p>Company Confidential</p>"));
    editor.set_first_page_different(true);
    editor.enter_chrome_edit(ChromeZone::Header).unwrap();
    assert!(editor.close_chrome_editor("<p>Cover Sheet</p>"));

    let raster = CountingRaster::default();
    let out = editor
        .export(&ExportRequest::new(ExportFormat::Pdf), &raster)
        .unwrap();
    assert!(out.bytes().unwrap().starts_with(b"%PDF-"));
    assert_eq!(out.mime, "application/pdf");

    assert_eq!(raster.bodies.borrow().len(), 1, "body rasterized once");
    let headers = raster.headers.borrow();
    assert_eq!(
        headers.len(),
        2,
        "pages two and three share one cached header render"
    );
    assert!(headers.iter().any(|h| h.contains("Cover Sheet")));
    assert!(headers.iter().any(|h| h.contains("Company Confidential")));
    assert!(raster.footers.borrow().is_empty(), "empty chrome never renders");
}

#[test]
fn footer_counters_resolve_per_page_before_rendering() {
    let mut editor = Editor::new(
        EditorOptions {
            initial_content: Some(
                "<p>recto</p><div class=\"page-break\"></div><p>verso</p>".to_string(),
            ),
            ..Default::default()
        },
        Box::new(()),
    );
    editor.enter_chrome_edit(ChromeZone::Footer).unwrap();
    assert!(editor.close_chrome_editor("<p>Page {{page}} of {{total}}</p>"));

    let raster = CountingRaster::default();
    editor
        .export(&ExportRequest::new(ExportFormat::Pdf), &raster)
        .unwrap();
    let footers = raster.footers.borrow();
    assert_eq!(footers.len(), 2);
    assert!(footers[0].contains("Page 1 of 2"));
    assert!(footers[1].contains("Page 2 of 2"));
}

#[test]
fn html_and_docx_exports_need_no_rasterizer() {
    let mut editor = three_page_editor();

    let html = editor
        .export(&ExportRequest::new(ExportFormat::Html), &OfflineRaster)
        .unwrap();
    let html_text = String::from_utf8(html.bytes().unwrap().to_vec()).unwrap();
    assert!(html_text.starts_with("<!DOCTYPE html>"));
    assert!(html_text.contains("alpha"));
    assert_eq!(html.mime, "text/html");

    let docx = editor
        .export(
            &ExportRequest::with_filename(ExportFormat::Docx, "brief"),
            &OfflineRaster,
        )
        .unwrap();
    assert_eq!(docx.filename, "brief.docx");
    assert_eq!(docx.mime, "application/msword");
    let docx_text = String::from_utf8(docx.bytes().unwrap().to_vec()).unwrap();
    assert!(docx_text.contains("urn:schemas-microsoft-com:office:word"));
}

#[test]
fn download_destination_writes_under_the_requested_directory() {
    let mut editor = Editor::new(
        EditorOptions {
            initial_content: Some("<p>body for disk</p>".to_string()),
            ..Default::default()
        },
        Box::new(()),
    );
    let dir = std::env::temp_dir();
    let request = ExportRequest::with_filename(ExportFormat::Txt, "folio-pipeline-check")
        .download_to(&dir);
    let out = editor.export(&request, &OfflineRaster).unwrap();

    let path = out.path().unwrap();
    assert_eq!(path, dir.join("folio-pipeline-check.txt"));
    assert_eq!(fs::read(path).unwrap(), b"body for disk\n");
    fs::remove_file(path).unwrap();
}

#[test]
fn a_failed_export_reports_and_clears_the_busy_guard() {
    let mut editor = three_page_editor();
    let err = editor
        .export(&ExportRequest::new(ExportFormat::Pdf), &OfflineRaster)
        .unwrap_err();
    assert!(matches!(err, ExportError::Raster(_)));
    assert!(!editor.is_exporting());

    let out = editor
        .export(&ExportRequest::new(ExportFormat::Txt), &OfflineRaster)
        .unwrap();
    // Page breaks fall out as blank lines in the plain-text rendition.
    assert_eq!(out.bytes().unwrap(), b"alpha\n\nbeta\n\ngamma\n".as_slice());
}
