use std::collections::{HashMap, VecDeque};

use image::{Rgba, RgbaImage, imageops};

use crate::export::ExportError;

/// Body markup is rasterized once at this multiple of the CSS pixel size, then
/// sliced, so page bitmaps stay sharp when the PDF is zoomed or printed.
pub const RASTER_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterKind {
    Body,
    Header,
    Footer,
}

/// Markup-to-bitmap seam supplied by the host. Implementations must behave as
/// a pure function of the arguments: same markup, same box, same pixels.
///
/// `width_px` is binding. `height_px` is the expected height; a `Body` render
/// may come back taller or shorter than the hint (content determines it) and
/// the slicer squares that up, while `Header`/`Footer` renders are clipped to
/// the requested band.
pub trait Rasterizer {
    fn rasterize(
        &self,
        html: &str,
        width_px: u32,
        height_px: u32,
        kind: RasterKind,
    ) -> Result<RgbaImage, ExportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RasterKey {
    kind: RasterKind,
    html: String,
    width: u32,
    height: u32,
}

/// Memo table for one export run, keyed by resolved markup and box size.
/// Pages sharing a header variant hit the cache instead of re-rendering.
#[derive(Debug, Default)]
pub struct RasterCache {
    max_entries: usize,
    max_bytes: usize,
    current_bytes: usize,
    order: VecDeque<RasterKey>,
    items: HashMap<RasterKey, RgbaImage>,
}

impl RasterCache {
    pub fn with_capacity(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
            ..Self::default()
        }
    }

    /// Returns the cached bitmap for the key, rendering on a miss.
    pub fn render(
        &mut self,
        rasterizer: &dyn Rasterizer,
        html: &str,
        width: u32,
        height: u32,
        kind: RasterKind,
    ) -> Result<RgbaImage, ExportError> {
        let key = RasterKey {
            kind,
            html: html.to_string(),
            width,
            height,
        };
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let image = rasterizer.rasterize(html, width, height, kind)?;
        self.put(key, image.clone());
        Ok(image)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn get(&mut self, key: &RasterKey) -> Option<RgbaImage> {
        if let Some(hit) = self.items.get(key) {
            self.order.retain(|k| k != key);
            self.order.push_back(key.clone());
            Some(hit.clone())
        } else {
            None
        }
    }

    fn put(&mut self, key: RasterKey, value: RgbaImage) {
        let incoming_bytes = value.as_raw().len();

        if let Some(existing) = self.items.get(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(existing.as_raw().len());
        }

        self.order.retain(|k| *k != key);
        self.order.push_back(key.clone());
        self.items.insert(key, value);
        self.current_bytes = self.current_bytes.saturating_add(incoming_bytes);
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        while self.items.len() > self.max_entries || self.current_bytes > self.max_bytes {
            if let Some(old) = self.order.pop_front() {
                if let Some(old_value) = self.items.remove(&old) {
                    self.current_bytes = self
                        .current_bytes
                        .saturating_sub(old_value.as_raw().len());
                }
            } else {
                break;
            }
        }
    }
}

/// Cuts the single body raster into exactly `page_count` tiles of
/// `tile_height` pixels. A final partial tile is padded with white so every
/// page bitmap has identical dimensions; tiles past the raster's end come out
/// blank, which happens when trailing pages hold only spacer-driven breaks.
pub fn slice_pages(body: &RgbaImage, tile_height: u32, page_count: usize) -> Vec<RgbaImage> {
    let width = body.width().max(1);
    let tile_height = tile_height.max(1);
    let blank = || RgbaImage::from_pixel(width, tile_height, Rgba([255, 255, 255, 255]));

    let mut tiles = Vec::with_capacity(page_count.max(1));
    for index in 0..page_count.max(1) {
        let y = index as u32 * tile_height;
        if y >= body.height() {
            tiles.push(blank());
            continue;
        }
        let slice_h = tile_height.min(body.height() - y);
        let view = imageops::crop_imm(body, 0, y, width, slice_h).to_image();
        if slice_h == tile_height {
            tiles.push(view);
        } else {
            let mut canvas = blank();
            imageops::overlay(&mut canvas, &view, 0, 0);
            tiles.push(canvas);
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct CountingRasterizer {
        calls: RefCell<Vec<(RasterKind, String)>>,
    }

    impl CountingRasterizer {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Rasterizer for CountingRasterizer {
        fn rasterize(
            &self,
            html: &str,
            width_px: u32,
            height_px: u32,
            kind: RasterKind,
        ) -> Result<RgbaImage, ExportError> {
            self.calls.borrow_mut().push((kind, html.to_string()));
            Ok(RgbaImage::from_pixel(
                width_px.max(1),
                height_px.max(1),
                Rgba([255, 255, 255, 255]),
            ))
        }
    }

    #[test]
    fn identical_content_renders_once() {
        let rasterizer = CountingRasterizer::new();
        let mut cache = RasterCache::with_capacity(8, 1024 * 1024);
        cache
            .render(&rasterizer, "<p>Acme</p>", 100, 40, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "<p>Acme</p>", 100, 40, RasterKind::Header)
            .unwrap();
        assert_eq!(rasterizer.calls.borrow().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn kind_and_content_are_part_of_the_key() {
        let rasterizer = CountingRasterizer::new();
        let mut cache = RasterCache::with_capacity(8, 1024 * 1024);
        cache
            .render(&rasterizer, "<p>x</p>", 100, 40, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "<p>x</p>", 100, 40, RasterKind::Footer)
            .unwrap();
        cache
            .render(&rasterizer, "<p>y</p>", 100, 40, RasterKind::Header)
            .unwrap();
        assert_eq!(rasterizer.calls.borrow().len(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn cache_evicts_oldest_entries() {
        let rasterizer = CountingRasterizer::new();
        let mut cache = RasterCache::with_capacity(2, 1024 * 1024);
        cache
            .render(&rasterizer, "a", 10, 10, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "b", 10, 10, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "c", 10, 10, RasterKind::Header)
            .unwrap();
        assert_eq!(cache.len(), 2);

        // "a" was evicted, so it renders again; "c" is still warm.
        cache
            .render(&rasterizer, "a", 10, 10, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "c", 10, 10, RasterKind::Header)
            .unwrap();
        assert_eq!(rasterizer.calls.borrow().len(), 4);
    }

    #[test]
    fn cache_honors_byte_budget() {
        let rasterizer = CountingRasterizer::new();
        // One 10x10 RGBA tile is 400 bytes; budget fits a single tile.
        let mut cache = RasterCache::with_capacity(8, 400);
        cache
            .render(&rasterizer, "a", 10, 10, RasterKind::Header)
            .unwrap();
        cache
            .render(&rasterizer, "b", 10, 10, RasterKind::Header)
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.current_bytes <= 400);
    }

    #[test]
    fn slicing_yields_exactly_page_count_tiles() {
        let body = RgbaImage::from_pixel(10, 25, Rgba([10, 20, 30, 255]));
        let tiles = slice_pages(&body, 10, 3);
        assert_eq!(tiles.len(), 3);
        for tile in &tiles {
            assert_eq!((tile.width(), tile.height()), (10, 10));
        }
    }

    #[test]
    fn short_final_tile_is_padded_white() {
        let body = RgbaImage::from_pixel(10, 25, Rgba([200, 0, 0, 255]));
        let tiles = slice_pages(&body, 10, 3);
        // Rows 20..24 carry content, the rest of the last tile is padding.
        assert_eq!(*tiles[2].get_pixel(0, 0), Rgba([200, 0, 0, 255]));
        assert_eq!(*tiles[2].get_pixel(0, 9), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn tiles_past_the_raster_end_are_blank() {
        let body = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let tiles = slice_pages(&body, 10, 2);
        assert_eq!(tiles.len(), 2);
        assert_eq!(*tiles[1].get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }
}
