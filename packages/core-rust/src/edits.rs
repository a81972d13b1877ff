//! Built-in edit operations.
//!
//! Each variant carries a typed parameter record. The serialized form is
//! `{"type": "rotate_page", "parameters": {"page": 0, "angle": 90}}`, which is
//! what batch manifests use.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::operation::{ApplyError, ApplyOutcome, Operation, ValidationError, ValidationOutcome};
use crate::types::{
    Annotation, AnnotationKind, Page, Rect, TextBlock, METADATA_KEYS, RIGHT_ANGLES,
};

/// Fraction of each page edge left clear around a watermark stamp.
const WATERMARK_MARGIN: f64 = 0.1;

/// Built-in document edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum EditOperation {
    /// Rotate a page clockwise by `angle` degrees.
    RotatePage { page: usize, angle: u16 },
    /// Remove a page. The last remaining page cannot be deleted.
    DeletePage { page: usize },
    /// Insert an empty page before `index` (`index == page_count` appends).
    InsertPage { index: usize, width: f64, height: f64 },
    /// Reorder pages; `order[i]` is the old index of the page placed at `i`.
    ReorderPages { order: Vec<usize> },
    /// Place a run of text on a page.
    AddText {
        page: usize,
        text: String,
        x: f64,
        y: f64,
        font_size: f64,
    },
    /// Replace every occurrence of `search` in text runs, optionally on one page only.
    ReplaceText {
        search: String,
        replacement: String,
        #[serde(default)]
        page: Option<usize>,
    },
    AddAnnotation {
        page: usize,
        kind: AnnotationKind,
        rect: Rect,
        contents: String,
        #[serde(default)]
        author: Option<String>,
    },
    DeleteAnnotation { page: usize, index: usize },
    /// Set (or, with `value: None`, remove) a metadata entry.
    SetMetadata {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    /// Stamp `text` across every page.
    AddWatermark { text: String, opacity: f64 },
}

fn check_page(document: &Document, page: usize) -> ValidationOutcome {
    let page_count = document.page_count();
    if page < page_count {
        Ok(())
    } else {
        Err(ValidationError::PageOutOfRange { page, page_count })
    }
}

fn check_positive(name: &'static str, value: f64) -> ValidationOutcome {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::parameter(name, format!("must be a positive number, got {value}")))
    }
}

fn page_mut(document: &mut Document, page: usize) -> Result<&mut Page, ApplyError> {
    document
        .content_mut()
        .pages
        .get_mut(page)
        .ok_or_else(|| ApplyError::Failed(format!("page {page} disappeared during apply")))
}

impl Operation for EditOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::RotatePage { .. } => "rotate_page",
            Self::DeletePage { .. } => "delete_page",
            Self::InsertPage { .. } => "insert_page",
            Self::ReorderPages { .. } => "reorder_pages",
            Self::AddText { .. } => "add_text",
            Self::ReplaceText { .. } => "replace_text",
            Self::AddAnnotation { .. } => "add_annotation",
            Self::DeleteAnnotation { .. } => "delete_annotation",
            Self::SetMetadata { .. } => "set_metadata",
            Self::AddWatermark { .. } => "add_watermark",
        }
    }

    fn validate(&self, document: &Document) -> ValidationOutcome {
        match self {
            Self::RotatePage { page, angle } => {
                check_page(document, *page)?;
                if !RIGHT_ANGLES.contains(angle) {
                    return Err(ValidationError::InvalidAngle { angle: *angle });
                }
                let current = document.content().pages[*page].rotation;
                if RIGHT_ANGLES.contains(&current) {
                    Ok(())
                } else {
                    Err(ValidationError::parameter(
                        "page",
                        format!("page {page} has an unsupported rotation of {current}"),
                    ))
                }
            }
            Self::DeletePage { page } => {
                check_page(document, *page)?;
                if document.page_count() == 1 {
                    return Err(ValidationError::Invalid(
                        "cannot delete the only page of a document".to_string(),
                    ));
                }
                Ok(())
            }
            Self::InsertPage {
                index,
                width,
                height,
            } => {
                let page_count = document.page_count();
                if *index > page_count {
                    return Err(ValidationError::PageOutOfRange {
                        page: *index,
                        page_count,
                    });
                }
                check_positive("width", *width)?;
                check_positive("height", *height)
            }
            Self::ReorderPages { order } => {
                let page_count = document.page_count();
                if order.len() != page_count {
                    return Err(ValidationError::parameter(
                        "order",
                        format!("expected {page_count} entries, got {}", order.len()),
                    ));
                }
                let mut seen = vec![false; page_count];
                for &old in order {
                    match seen.get_mut(old) {
                        Some(slot) if !*slot => *slot = true,
                        Some(_) => {
                            return Err(ValidationError::parameter(
                                "order",
                                format!("page {old} listed twice"),
                            ))
                        }
                        None => {
                            return Err(ValidationError::PageOutOfRange {
                                page: old,
                                page_count,
                            })
                        }
                    }
                }
                Ok(())
            }
            Self::AddText {
                page,
                text,
                x,
                y,
                font_size,
            } => {
                check_page(document, *page)?;
                if text.is_empty() {
                    return Err(ValidationError::parameter("text", "must not be empty"));
                }
                check_positive("font_size", *font_size)?;
                let target = &document.content().pages[*page];
                let inside = x.is_finite()
                    && y.is_finite()
                    && (0.0..=target.width).contains(x)
                    && (0.0..=target.height).contains(y);
                if inside {
                    Ok(())
                } else {
                    Err(ValidationError::parameter(
                        "position",
                        format!("({x}, {y}) is outside page {page}"),
                    ))
                }
            }
            Self::ReplaceText { search, page, .. } => {
                if search.is_empty() {
                    return Err(ValidationError::parameter("search", "must not be empty"));
                }
                match page {
                    Some(page) => check_page(document, *page),
                    None => Ok(()),
                }
            }
            Self::AddAnnotation { page, rect, .. } => {
                check_page(document, *page)?;
                if !rect.is_well_formed() {
                    return Err(ValidationError::parameter(
                        "rect",
                        "must have positive width and height",
                    ));
                }
                if document.content().pages[*page].contains(rect) {
                    Ok(())
                } else {
                    Err(ValidationError::parameter(
                        "rect",
                        format!("extends beyond page {page}"),
                    ))
                }
            }
            Self::DeleteAnnotation { page, index } => {
                check_page(document, *page)?;
                let count = document.content().pages[*page].annotations.len();
                if *index < count {
                    Ok(())
                } else {
                    Err(ValidationError::AnnotationOutOfRange {
                        page: *page,
                        index: *index,
                        count,
                    })
                }
            }
            Self::SetMetadata { key, .. } => {
                if METADATA_KEYS.contains(&key.as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::parameter(
                        "key",
                        format!("unsupported metadata key `{key}`"),
                    ))
                }
            }
            Self::AddWatermark { text, opacity } => {
                if text.is_empty() {
                    return Err(ValidationError::parameter("text", "must not be empty"));
                }
                if opacity.is_finite() && *opacity > 0.0 && *opacity <= 1.0 {
                    Ok(())
                } else {
                    Err(ValidationError::parameter(
                        "opacity",
                        format!("must be in (0, 1], got {opacity}"),
                    ))
                }
            }
        }
    }

    fn apply(&self, document: &mut Document) -> ApplyOutcome {
        match self {
            Self::RotatePage { page, angle } => {
                let target = page_mut(document, *page)?;
                // Summed in u32 so a corrupt stored rotation cannot overflow; the
                // result is always below 360.
                #[allow(clippy::cast_possible_truncation)]
                let turned = ((u32::from(target.rotation) + u32::from(*angle)) % 360) as u16;
                target.rotation = turned;
            }
            Self::DeletePage { page } => {
                let pages = &mut document.content_mut().pages;
                if *page >= pages.len() {
                    return Err(ApplyError::Failed(format!("page {page} does not exist")));
                }
                pages.remove(*page);
            }
            Self::InsertPage {
                index,
                width,
                height,
            } => {
                let pages = &mut document.content_mut().pages;
                let index = (*index).min(pages.len());
                pages.insert(index, Page::blank(*width, *height));
            }
            Self::ReorderPages { order } => {
                let pages = &mut document.content_mut().pages;
                let mut taken: Vec<Option<Page>> = pages.drain(..).map(Some).collect();
                for &old in order {
                    let page = taken
                        .get_mut(old)
                        .and_then(Option::take)
                        .ok_or_else(|| ApplyError::Failed(format!("page {old} used twice")))?;
                    pages.push(page);
                }
            }
            Self::AddText {
                page,
                text,
                x,
                y,
                font_size,
            } => {
                page_mut(document, *page)?.text.push(TextBlock {
                    x: *x,
                    y: *y,
                    font_size: *font_size,
                    content: text.clone(),
                });
            }
            Self::ReplaceText {
                search,
                replacement,
                page,
            } => {
                let mut replaced = 0usize;
                for (index, target) in document.content_mut().pages.iter_mut().enumerate() {
                    if page.is_some_and(|only| only != index) {
                        continue;
                    }
                    for block in &mut target.text {
                        let hits = block.content.matches(search.as_str()).count();
                        if hits > 0 {
                            block.content = block.content.replace(search.as_str(), replacement);
                            replaced += hits;
                        }
                    }
                }
                if replaced == 0 {
                    return Err(ApplyError::Failed(format!("text `{search}` not found")));
                }
                tracing::debug!(search = %search, replaced, "replaced text");
            }
            Self::AddAnnotation {
                page,
                kind,
                rect,
                contents,
                author,
            } => {
                page_mut(document, *page)?.annotations.push(Annotation {
                    kind: *kind,
                    rect: *rect,
                    contents: contents.clone(),
                    author: author.clone(),
                });
            }
            Self::DeleteAnnotation { page, index } => {
                let annotations = &mut page_mut(document, *page)?.annotations;
                if *index >= annotations.len() {
                    return Err(ApplyError::Failed(format!(
                        "annotation {index} does not exist on page {page}"
                    )));
                }
                annotations.remove(*index);
            }
            Self::SetMetadata { key, value } => {
                let metadata = &mut document.content_mut().metadata;
                match value {
                    Some(value) => {
                        metadata.insert(key.clone(), value.clone());
                    }
                    None => {
                        metadata.remove(key);
                    }
                }
            }
            Self::AddWatermark { text, opacity } => {
                for target in &mut document.content_mut().pages {
                    let rect = Rect {
                        x0: target.width * WATERMARK_MARGIN,
                        y0: target.height * WATERMARK_MARGIN,
                        x1: target.width * (1.0 - WATERMARK_MARGIN),
                        y1: target.height * (1.0 - WATERMARK_MARGIN),
                    };
                    target.annotations.push(Annotation {
                        kind: AnnotationKind::Stamp,
                        rect,
                        contents: format!("{text} (opacity {opacity})"),
                        author: None,
                    });
                }
            }
        }
        Ok(())
    }
}
