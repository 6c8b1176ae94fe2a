use image::RgbaImage;
use miniz_oxide::deflate::compress_to_vec_zlib;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use crate::document::config::PageConfig;
use crate::export::ExportError;

const PT_PER_PX: f32 = 72.0 / 96.0;
const ZLIB_LEVEL: u8 = 6;

/// Bitmaps composited onto one output page. The body slice always exists;
/// chrome bands are absent when the resolved variant is empty.
#[derive(Debug, Clone)]
pub struct PageRasters {
    pub body: RgbaImage,
    pub header: Option<RgbaImage>,
    pub footer: Option<RgbaImage>,
}

/// Assembles the sliced page bitmaps into a PDF at true page dimensions.
/// Every image lands as a Flate-compressed RGB XObject, with a grayscale soft
/// mask alongside when the raster carries transparency.
pub fn compose_pdf(pages: &[PageRasters], config: &PageConfig) -> Result<Vec<u8>, ExportError> {
    if pages.is_empty() {
        return Err(ExportError::Assembly("no pages to compose".into()));
    }

    let mut pdf = Pdf::new();
    let mut next_id = 1i32;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };

    let catalog_id = alloc();
    let pages_id = alloc();

    let watermark = config
        .watermark
        .as_ref()
        .filter(|w| !w.text.trim().is_empty());
    let font_ref = watermark.map(|_| alloc());
    let gs_ref = watermark.map(|_| alloc());
    if let Some(font_ref) = font_ref {
        pdf.type1_font(font_ref)
            .base_font(Name(b"Helvetica"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
    }
    if let (Some(gs_ref), Some(w)) = (gs_ref, watermark) {
        pdf.ext_graphics(gs_ref)
            .non_stroking_alpha(w.opacity.clamp(0.0, 1.0));
    }

    let page_w = config.page_width() * PT_PER_PX;
    let page_h = config.page_height() * PT_PER_PX;
    let margin_left = config.margins.left * PT_PER_PX;
    let margin_top = config.margins.top * PT_PER_PX;
    let margin_bottom = config.margins.bottom * PT_PER_PX;
    let content_w = config.content_width() * PT_PER_PX;
    let content_h = config.content_height() * PT_PER_PX;

    let mut image_names: Vec<(String, Ref)> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for page in pages {
        let mut content = Content::new();

        if let Some(bg) = &config.background {
            content
                .set_fill_rgb(
                    bg.r.clamp(0.0, 1.0),
                    bg.g.clamp(0.0, 1.0),
                    bg.b.clamp(0.0, 1.0),
                )
                .rect(0.0, 0.0, page_w, page_h)
                .fill_nonzero()
                .set_fill_gray(0.0);
        }

        let body_name = register_image(&mut pdf, &mut alloc, &mut image_names, &page.body);
        place_image(
            &mut content,
            &body_name,
            margin_left,
            margin_bottom,
            content_w,
            content_h,
        );

        if let Some(w) = watermark {
            draw_watermark(&mut content, &w.text, page_w, page_h);
        }

        if let Some(header) = &page.header {
            let name = register_image(&mut pdf, &mut alloc, &mut image_names, header);
            place_image(
                &mut content,
                &name,
                margin_left,
                page_h - margin_top,
                content_w,
                margin_top,
            );
        }

        if let Some(footer) = &page.footer {
            let name = register_image(&mut pdf, &mut alloc, &mut image_names, footer);
            place_image(&mut content, &name, margin_left, 0.0, content_w, margin_bottom);
        }

        contents.push(content);
    }

    let n = contents.len();
    let page_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();
    let content_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();

    for (i, c) in contents.into_iter().enumerate() {
        pdf.stream(content_ids[i], &c.finish());
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(n as i32);

    for i in 0..n {
        let mut page = pdf.page(page_ids[i]);
        page.media_box(Rect::new(0.0, 0.0, page_w, page_h))
            .parent(pages_id)
            .contents(content_ids[i]);
        let mut resources = page.resources();
        {
            let mut xobjects = resources.x_objects();
            for (name, xobj_ref) in &image_names {
                xobjects.pair(Name(name.as_bytes()), *xobj_ref);
            }
        }
        if let Some(font_ref) = font_ref {
            resources.fonts().pair(Name(b"F1"), font_ref);
        }
        if let Some(gs_ref) = gs_ref {
            resources.ext_g_states().pair(Name(b"GS1"), gs_ref);
        }
    }

    Ok(pdf.finish())
}

/// Embeds a raster and hands back its resource name. RGB and alpha planes are
/// deflated separately; the mask stream only exists for non-opaque images.
fn register_image(
    pdf: &mut Pdf,
    alloc: &mut impl FnMut() -> Ref,
    image_names: &mut Vec<(String, Ref)>,
    image: &RgbaImage,
) -> String {
    let pixel_count = image.width() as usize * image.height() as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);
    let mut opaque = true;
    for p in image.pixels() {
        rgb.extend_from_slice(&[p[0], p[1], p[2]]);
        alpha.push(p[3]);
        opaque &= p[3] == 255;
    }

    let image_ref = alloc();
    let smask_ref = if opaque { None } else { Some(alloc()) };

    let data = compress_to_vec_zlib(&rgb, ZLIB_LEVEL);
    {
        let mut xobj = pdf.image_xobject(image_ref, &data);
        xobj.filter(Filter::FlateDecode);
        xobj.width(image.width() as i32);
        xobj.height(image.height() as i32);
        xobj.color_space().device_rgb();
        xobj.bits_per_component(8);
        if let Some(smask_ref) = smask_ref {
            xobj.s_mask(smask_ref);
        }
    }

    if let Some(smask_ref) = smask_ref {
        let mask = compress_to_vec_zlib(&alpha, ZLIB_LEVEL);
        let mut xobj = pdf.image_xobject(smask_ref, &mask);
        xobj.filter(Filter::FlateDecode);
        xobj.width(image.width() as i32);
        xobj.height(image.height() as i32);
        xobj.color_space().device_gray();
        xobj.bits_per_component(8);
    }

    let name = format!("Im{}", image_names.len() + 1);
    image_names.push((name.clone(), image_ref));
    name
}

fn place_image(content: &mut Content, name: &str, x: f32, y: f32, w: f32, h: f32) {
    content.save_state();
    content.transform([w, 0.0, 0.0, h, x, y]);
    content.x_object(Name(name.as_bytes()));
    content.restore_state();
}

/// Diagonal translucent caption across the page center. Sized from an average
/// Helvetica advance so long captions shrink instead of running off the page.
fn draw_watermark(content: &mut Content, text: &str, page_w: f32, page_h: f32) {
    let bytes = latin1_bytes(text);
    if bytes.is_empty() {
        return;
    }

    let diagonal = (page_w * page_w + page_h * page_h).sqrt();
    let font_size = (diagonal * 0.6 / (0.55 * bytes.len() as f32)).clamp(24.0, 120.0);
    let est_width = 0.55 * font_size * bytes.len() as f32;
    let cos = std::f32::consts::FRAC_1_SQRT_2;

    content.save_state();
    content.set_parameters(Name(b"GS1"));
    content.set_fill_gray(0.6);
    content.transform([cos, -cos, cos, cos, page_w / 2.0, page_h / 2.0]);
    content
        .begin_text()
        .set_font(Name(b"F1"), font_size)
        .next_line(-est_width / 2.0, -font_size * 0.35)
        .show(Str(&bytes))
        .end_text();
    content.restore_state();
}

fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|c| u8::try_from(c as u32).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::document::config::Watermark;

    fn solid(width: u32, height: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(px))
    }

    fn page(body: RgbaImage) -> PageRasters {
        PageRasters {
            body,
            header: None,
            footer: None,
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn empty_page_list_is_rejected() {
        let err = compose_pdf(&[], &PageConfig::default()).unwrap_err();
        assert!(matches!(err, ExportError::Assembly(_)));
    }

    #[test]
    fn output_has_pdf_header_and_trailer() {
        let bytes =
            compose_pdf(&[page(solid(10, 10, [255, 255, 255, 255]))], &PageConfig::default())
                .unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        assert!(contains(&bytes, b"%%EOF"));
    }

    #[test]
    fn one_media_box_per_page() {
        let pages = vec![
            page(solid(10, 10, [0, 0, 0, 255])),
            page(solid(10, 10, [0, 0, 0, 255])),
            page(solid(10, 10, [0, 0, 0, 255])),
        ];
        let bytes = compose_pdf(&pages, &PageConfig::default()).unwrap();
        let count = bytes
            .windows(b"/MediaBox".len())
            .filter(|w| *w == b"/MediaBox")
            .count();
        assert_eq!(count, 3);
        assert!(contains(&bytes, b"/Count 3"));
    }

    #[test]
    fn transparent_raster_gets_a_soft_mask() {
        let mut with_header = page(solid(10, 10, [255, 255, 255, 255]));
        with_header.header = Some(solid(10, 4, [0, 0, 0, 128]));
        let bytes = compose_pdf(&[with_header], &PageConfig::default()).unwrap();
        assert!(contains(&bytes, b"/SMask"));
    }

    #[test]
    fn opaque_rasters_skip_the_soft_mask() {
        let bytes =
            compose_pdf(&[page(solid(10, 10, [20, 30, 40, 255]))], &PageConfig::default())
                .unwrap();
        assert!(!contains(&bytes, b"/SMask"));
    }

    #[test]
    fn watermark_registers_font_and_alpha_state() {
        let mut config = PageConfig::default();
        config.watermark = Some(Watermark {
            text: "DRAFT".into(),
            opacity: 0.2,
        });
        let bytes =
            compose_pdf(&[page(solid(10, 10, [255, 255, 255, 255]))], &config).unwrap();
        assert!(contains(&bytes, b"Helvetica"));
        assert!(contains(&bytes, b"/GS1"));
    }
}
