use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default page width in points (US Letter).
pub const DEFAULT_PAGE_WIDTH: f64 = 612.0;

/// Default page height in points (US Letter).
pub const DEFAULT_PAGE_HEIGHT: f64 = 792.0;

/// Page rotations, in degrees, a document may hold.
pub const RIGHT_ANGLES: [u16; 4] = [0, 90, 180, 270];

/// Metadata keys a document may carry.
pub const METADATA_KEYS: [&str; 6] = ["title", "author", "subject", "keywords", "creator", "producer"];

/// Full mutable state of one document.
///
/// Everything an operation can change lives here, so equality of two
/// `DocumentContent` values is equality of the documents they describe.
/// Uses `BTreeMap` for metadata to keep serialization deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentContent {
    /// Pages in display order.
    pub pages: Vec<Page>,
    /// Document information dictionary (title, author, ...).
    pub metadata: BTreeMap<String, String>,
}

impl DocumentContent {
    /// Creates content with `page_count` empty pages of the given size.
    #[must_use]
    pub fn with_blank_pages(page_count: usize, width: f64, height: f64) -> Self {
        Self {
            pages: (0..page_count).map(|_| Page::blank(width, height)).collect(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
    /// Clockwise rotation in degrees. Always one of [`RIGHT_ANGLES`].
    pub rotation: u16,
    /// Text runs placed on the page.
    pub text: Vec<TextBlock>,
    /// Annotations attached to the page.
    pub annotations: Vec<Annotation>,
}

impl Page {
    /// Creates an empty, unrotated page.
    #[must_use]
    pub fn blank(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            rotation: 0,
            text: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Whether `rect` lies fully inside the page's media box.
    #[must_use]
    pub fn contains(&self, rect: &Rect) -> bool {
        rect.x0 >= 0.0 && rect.y0 >= 0.0 && rect.x1 <= self.width && rect.y1 <= self.height
    }
}

/// A run of text at a fixed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub content: String,
}

/// Axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    /// A rectangle is well-formed when its coordinates are finite and it has
    /// positive width and height.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
            && self.x0 < self.x1
            && self.y0 < self.y1
    }
}

/// Discriminant for annotation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Note,
    Highlight,
    Underline,
    StrikeOut,
    FreeText,
    /// Used by watermarks.
    Stamp,
}

/// An annotation attached to a page region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub rect: Rect,
    pub contents: String,
    pub author: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_pages_have_requested_size() {
        let content = DocumentContent::with_blank_pages(3, 100.0, 200.0);
        assert_eq!(content.pages.len(), 3);
        assert!(content
            .pages
            .iter()
            .all(|p| p.width == 100.0 && p.height == 200.0 && p.rotation == 0));
        assert!(content.metadata.is_empty());
    }

    #[test]
    fn rect_well_formed() {
        let ok = Rect { x0: 0.0, y0: 0.0, x1: 10.0, y1: 10.0 };
        let flat = Rect { x0: 5.0, y0: 0.0, x1: 5.0, y1: 10.0 };
        let nan = Rect { x0: f64::NAN, y0: 0.0, x1: 10.0, y1: 10.0 };
        assert!(ok.is_well_formed());
        assert!(!flat.is_well_formed());
        assert!(!nan.is_well_formed());
    }

    #[test]
    fn page_contains_checks_media_box() {
        let page = Page::blank(100.0, 100.0);
        assert!(page.contains(&Rect { x0: 0.0, y0: 0.0, x1: 100.0, y1: 100.0 }));
        assert!(!page.contains(&Rect { x0: 50.0, y0: 50.0, x1: 101.0, y1: 60.0 }));
    }

    #[test]
    fn annotation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AnnotationKind::StrikeOut).unwrap();
        assert_eq!(json, "\"strike_out\"");
    }
}
